//! Benchmarks for Matroska parsing and subtitle decoding
//!
//! Measures header parsing, packet iteration and cluster resynchronisation
//! over in-memory files built with the test builder.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ds_media::testing::{BlockSpec, MkvBuilder};
use ds_media::{DemuxerOptions, MkvDemuxer, Track, TrackKind};
use ds_subtitle::{SubtitleDecoder, SubtitlePacket};
use std::io::Cursor;

/// A file with `clusters` clusters of one 64 KiB video frame and one ASS line.
fn episode(clusters: u64) -> (Vec<u8>, Vec<u64>) {
    let mut builder = MkvBuilder::new()
        .duration_ms(clusters as f64 * 1000.0)
        .track(Track::new(1, TrackKind::Video, "V_VP9"))
        .ass_track(2)
        .attachment("font.ttf", "font/ttf", vec![0u8; 32 * 1024]);
    for n in 0..clusters {
        builder = builder.cluster(
            n * 1000,
            vec![
                BlockSpec::simple(1, 0, vec![0u8; 64 * 1024]).keyframe(),
                BlockSpec::group(
                    2,
                    10,
                    format!("{n},0,Default,,0,0,0,,{{\\i1}}Line{{\\i0}} number {n}").into_bytes(),
                    900,
                ),
            ],
        );
    }
    builder.build_with_offsets()
}

fn bench_open(c: &mut Criterion) {
    let (data, _) = episode(16);
    let mut group = c.benchmark_group("open");
    group.throughput(Throughput::Bytes(data.len() as u64));
    group.bench_function("headers", |b| {
        b.iter(|| {
            let demuxer =
                MkvDemuxer::open(Cursor::new(black_box(&data)), DemuxerOptions::default())
                    .unwrap();
            black_box(demuxer.metadata().tracks.len())
        })
    });
    group.finish();
}

fn bench_packets(c: &mut Criterion) {
    let mut group = c.benchmark_group("packets");
    for clusters in [16u64, 128] {
        let (data, _) = episode(clusters);
        group.throughput(Throughput::Bytes(data.len() as u64));
        group.bench_with_input(
            BenchmarkId::new("subtitle_track", clusters),
            &data,
            |b, data| {
                b.iter(|| {
                    let mut demuxer =
                        MkvDemuxer::open(Cursor::new(data), DemuxerOptions::default()).unwrap();
                    let mut decoder = SubtitleDecoder::new(&demuxer.metadata().tracks);
                    demuxer.set_track_filter(Some(decoder.track_numbers().collect()));
                    let mut events = 0usize;
                    while let Some(packet) = demuxer.read_packet().unwrap() {
                        events += decoder
                            .decode(SubtitlePacket {
                                track: packet.track,
                                data: &packet.data,
                                start_ms: packet.start_ns as f64 / 1e6,
                                duration_ms: packet.duration_ns() as f64 / 1e6,
                                head_pos: packet.head_pos,
                            })
                            .unwrap()
                            .len();
                    }
                    black_box(events)
                })
            },
        );
    }
    group.finish();
}

fn bench_resync(c: &mut Criterion) {
    let (data, offsets) = episode(128);
    let target = offsets[offsets.len() / 2] + 17;
    let mut group = c.benchmark_group("resync");
    group.bench_function("find_next_cluster", |b| {
        b.iter(|| {
            let mut demuxer =
                MkvDemuxer::open(Cursor::new(&data), DemuxerOptions::default()).unwrap();
            black_box(demuxer.find_next_cluster(black_box(target), 1024 * 1024).unwrap())
        })
    });
    group.finish();
}

criterion_group!(benches, bench_open, bench_packets, bench_resync);
criterion_main!(benches);
