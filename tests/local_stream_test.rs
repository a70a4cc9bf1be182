//! Integration tests for local file streaming and subtitle delivery.

mod common;

use common::{expect_event, small_episode, TestHarness};
use ds_server::bus::ClientEvent;
use serde_json::{json, Value};

const ONE_MIB: usize = 1024 * 1024;

async fn start_local(addr: std::net::SocketAddr, path: &std::path::Path) -> String {
    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/directstream/local"))
        .json(&json!({
            "clientId": "tv",
            "path": path,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    let body: Value = resp.json().await.unwrap();
    body["streamId"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn local_mkv_serves_ranges_and_subtitles() {
    let (h, addr) = TestHarness::with_server().await;
    let mut rx = h.subscribe();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("episode.mkv");
    let data = small_episode(ONE_MIB);
    std::fs::write(&path, &data).unwrap();

    let id = start_local(addr, &path).await;
    let watch = expect_event(&mut rx, |m| matches!(m.event, ClientEvent::Watch(_))).await;
    let ClientEvent::Watch(info) = watch.event else {
        unreachable!()
    };
    assert_eq!(info.id.to_string(), id);
    assert_eq!(info.content_length, ONE_MIB as u64);
    assert!(info.stream_url.ends_with(&format!("/stream?id={id}")));
    let metadata = info.mkv_metadata.expect("metadata parsed");
    assert_eq!(metadata.tracks.len(), 1);

    let client = reqwest::Client::new();
    let url = format!("http://{addr}/stream?id={id}");

    let head = client.head(&url).send().await.unwrap();
    assert_eq!(head.status(), 200);
    assert_eq!(
        head.headers()["content-length"].to_str().unwrap(),
        ONE_MIB.to_string()
    );
    assert_eq!(head.headers()["accept-ranges"].to_str().unwrap(), "bytes");
    assert_eq!(head.headers()["content-type"].to_str().unwrap(), "video/webm");

    let full = client
        .get(&url)
        .header("range", "bytes=0-")
        .send()
        .await
        .unwrap();
    assert_eq!(full.status(), 200);
    assert_eq!(full.bytes().await.unwrap().as_ref(), data.as_slice());

    let partial = client
        .get(&url)
        .header("range", "bytes=0-1023")
        .send()
        .await
        .unwrap();
    assert_eq!(partial.status(), 206);
    assert_eq!(
        partial.headers()["content-range"].to_str().unwrap(),
        format!("bytes 0-1023/{ONE_MIB}")
    );
    assert_eq!(partial.bytes().await.unwrap().as_ref(), &data[..1024]);

    let resp = client
        .post(format!("http://{addr}/directstream/player-event"))
        .json(&json!({"clientId": "tv", "type": "loaded-metadata"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);

    let message =
        expect_event(&mut rx, |m| matches!(m.event, ClientEvent::SubtitleEvent(_))).await;
    assert_eq!(message.client_id, "tv");
    let ClientEvent::SubtitleEvent(event) = message.event else {
        unreachable!()
    };
    assert_eq!(event.track_number, 2);
    assert_eq!(event.text, "Hi");
    assert_eq!(event.start_time, 100.0);
    assert_eq!(event.duration, 900.0);
}

#[tokio::test]
async fn unsatisfiable_range_is_416() {
    let (h, addr) = TestHarness::with_server().await;
    let mut rx = h.subscribe();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("episode.mkv");
    std::fs::write(&path, small_episode(4096)).unwrap();

    let id = start_local(addr, &path).await;
    expect_event(&mut rx, |m| matches!(m.event, ClientEvent::Watch(_))).await;

    let resp = reqwest::Client::new()
        .get(format!("http://{addr}/stream?id={id}"))
        .header("range", "bytes=9000-")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 416);
    assert_eq!(
        resp.headers()["content-range"].to_str().unwrap(),
        "bytes */4096"
    );
}

#[tokio::test]
async fn srt_upload_adds_track() {
    let (h, addr) = TestHarness::with_server().await;
    let mut rx = h.subscribe();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("episode.mkv");
    std::fs::write(&path, small_episode(4096)).unwrap();

    start_local(addr, &path).await;
    expect_event(&mut rx, |m| matches!(m.event, ClientEvent::Watch(_))).await;

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/directstream/subtitles"))
        .json(&json!({
            "filename": "episode.fre.srt",
            "content": "1\n00:00:01,000 --> 00:00:02,500\nBonjour\n\n\
                        2\n00:00:03,000 --> 00:00:04,000\nSalut\n",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);

    let message = expect_event(&mut rx, |m| matches!(m.event, ClientEvent::SetTracks(_))).await;
    let ClientEvent::SetTracks(tracks) = message.event else {
        unreachable!()
    };
    assert_eq!(tracks.len(), 2);
    let uploaded = tracks.iter().find(|t| t.number == 3).expect("new track");
    assert_eq!(uploaded.codec_id, "S_TEXT/ASS");
    assert_eq!(uploaded.language, "fre");
    let script = uploaded.codec_private.as_deref().unwrap();
    assert!(script.contains("Dialogue: 0,00:00:01.00,00:00:02.50,Default,,0,0,0,,Bonjour"));
    assert!(script.contains("Dialogue: 0,00:00:03.00,00:00:04.00,Default,,0,0,0,,Salut"));
}

#[tokio::test]
async fn missing_file_is_refused() {
    let (h, addr) = TestHarness::with_server().await;
    let mut rx = h.subscribe();

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/directstream/local"))
        .json(&json!({"clientId": "tv", "path": "/nonexistent/episode.mkv"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let message = expect_event(&mut rx, |m| matches!(m.event, ClientEvent::AbortOpen(_))).await;
    assert_eq!(message.client_id, "tv");
}

#[tokio::test]
async fn stop_ends_the_stream() {
    let (h, addr) = TestHarness::with_server().await;
    let mut rx = h.subscribe();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("episode.mkv");
    std::fs::write(&path, small_episode(4096)).unwrap();

    let id = start_local(addr, &path).await;
    expect_event(&mut rx, |m| matches!(m.event, ClientEvent::Watch(_))).await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://{addr}/directstream/stop"))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["stopped"], id);

    let resp = client
        .get(format!("http://{addr}/stream?id={id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}
