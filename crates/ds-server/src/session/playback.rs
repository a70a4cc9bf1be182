use ds_core::StreamId;
use ds_media::MkvMetadata;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Placeholder the client replaces with its view of the server address.
pub const SERVER_URL_PLACEHOLDER: &str = "{{SERVER_URL}}";

/// Which kind of source backs a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamType {
    File,
    Http,
    Torrent,
}

impl std::fmt::Display for StreamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            StreamType::File => "file",
            StreamType::Http => "http",
            StreamType::Torrent => "torrent",
        })
    }
}

/// Everything the client needs to start playback. Never mutated once sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackInfo {
    pub id: StreamId,
    pub stream_type: StreamType,
    pub content_length: u64,
    pub mime_type: String,
    pub stream_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episode: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mkv_metadata: Option<MkvMetadata>,
}

/// `{{SERVER_URL}}/stream?id=<id>`.
pub fn stream_url(id: StreamId) -> String {
    format!("{SERVER_URL_PLACEHOLDER}/stream?id={id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_template() {
        let id = StreamId::new();
        assert_eq!(stream_url(id), format!("{{{{SERVER_URL}}}}/stream?id={id}"));
    }

    #[test]
    fn serializes_camel_case() {
        let info = PlaybackInfo {
            id: StreamId::new(),
            stream_type: StreamType::File,
            content_length: 10,
            mime_type: "video/webm".into(),
            stream_url: "x".into(),
            server_url: None,
            episode: Some(serde_json::json!({"number": 3})),
            media: None,
            mkv_metadata: None,
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["streamType"], "file");
        assert_eq!(json["contentLength"], 10);
        assert_eq!(json["mimeType"], "video/webm");
        assert_eq!(json["episode"]["number"], 3);
        assert!(json.get("mkvMetadata").is_none());
    }
}
