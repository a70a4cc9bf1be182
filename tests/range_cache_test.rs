//! Concurrent access to the shared range cache.

use std::io::{Read, Seek, SeekFrom};
use std::thread;

use ds_io::RangeCache;
use tokio_util::sync::CancellationToken;

const LEN: usize = 4 * 1024 * 1024;
const CHUNK: usize = 64 * 1024;

fn pattern() -> Vec<u8> {
    (0..LEN).map(|i| (i * 31 % 251) as u8).collect()
}

#[test]
fn concurrent_readers_see_consistent_bytes() {
    let data = pattern();
    let cache = RangeCache::open(LEN as u64, None, CancellationToken::new()).unwrap();

    let readers: Vec<_> = (0..4)
        .map(|n| {
            let mut reader = cache.new_reader();
            let expected = data.clone();
            thread::spawn(move || {
                let start = n * LEN / 4;
                reader.seek(SeekFrom::Start(start as u64)).unwrap();
                let mut out = Vec::with_capacity(LEN - start);
                reader.read_to_end(&mut out).unwrap();
                assert_eq!(out.len(), LEN - start);
                assert!(out == expected[start..], "reader {n} saw corrupted bytes");
            })
        })
        .collect();

    // Fill from both ends towards the middle so readers wait on gaps.
    let chunks: Vec<usize> = (0..LEN / CHUNK).collect();
    let (low, high) = chunks.split_at(chunks.len() / 2);
    let writer = {
        let cache = cache.clone();
        let data = data.clone();
        let high = high.to_vec();
        thread::spawn(move || {
            for &i in high.iter().rev() {
                cache.write(&data[i * CHUNK..(i + 1) * CHUNK], (i * CHUNK) as u64).unwrap();
            }
        })
    };
    for &i in low {
        cache.write(&data[i * CHUNK..(i + 1) * CHUNK], (i * CHUNK) as u64).unwrap();
    }
    writer.join().unwrap();

    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(cache.intervals(), vec![(0, LEN as u64 - 1)]);
    cache.close();
}

#[test]
fn closing_releases_waiting_readers() {
    let cache = RangeCache::open(1024, None, CancellationToken::new()).unwrap();
    cache.write(&[7u8; 100], 0).unwrap();

    let mut reader = cache.new_reader();
    let handle = thread::spawn(move || {
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        out
    });

    thread::sleep(std::time::Duration::from_millis(50));
    cache.close();
    let out = handle.join().unwrap();
    assert_eq!(out, vec![7u8; 100]);
}
