//! Synthetic Matroska writer for tests.
//!
//! Produces small but structurally valid files: EBML header, Segment with
//! SeekHead, Info, Tracks, Chapters, Attachments and Clusters of SimpleBlocks
//! or BlockGroups.

use crate::ebml::ids;
use crate::metadata::{ContentCompression, Track, TrackKind};

/// Block lacing modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lacing {
    Xiph,
    Ebml,
    Fixed,
}

/// One block inside a cluster.
#[derive(Debug, Clone)]
pub struct BlockSpec {
    pub track: u64,
    pub relative: i16,
    pub frames: Vec<Vec<u8>>,
    pub lacing: Option<Lacing>,
    /// Written as a BlockGroup with BlockDuration when set.
    pub duration: Option<u64>,
    pub keyframe: bool,
}

impl BlockSpec {
    pub fn simple(track: u64, relative: i16, data: Vec<u8>) -> Self {
        Self {
            track,
            relative,
            frames: vec![data],
            lacing: None,
            duration: None,
            keyframe: false,
        }
    }

    pub fn group(track: u64, relative: i16, data: Vec<u8>, duration: u64) -> Self {
        Self {
            duration: Some(duration),
            ..Self::simple(track, relative, data)
        }
    }

    pub fn laced(track: u64, relative: i16, frames: Vec<Vec<u8>>, lacing: Lacing) -> Self {
        Self {
            track,
            relative,
            frames,
            lacing: Some(lacing),
            duration: None,
            keyframe: true,
        }
    }

    pub fn keyframe(mut self) -> Self {
        self.keyframe = true;
        self
    }
}

struct ChapterSpec {
    uid: u64,
    start: f64,
    end: f64,
    text: String,
}

struct AttachmentSpec {
    filename: String,
    mime: String,
    data: Vec<u8>,
}

/// Builder for synthetic Matroska files.
pub struct MkvBuilder {
    doc_type: String,
    timecode_scale: u64,
    duration_ms: Option<f64>,
    title: Option<String>,
    tracks: Vec<Track>,
    chapters: Vec<ChapterSpec>,
    attachments: Vec<AttachmentSpec>,
    clusters: Vec<(u64, Vec<BlockSpec>)>,
    attachments_at_end: bool,
    unknown_size_clusters: bool,
    pad_to: Option<usize>,
}

impl Default for MkvBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MkvBuilder {
    pub fn new() -> Self {
        Self {
            doc_type: "matroska".into(),
            timecode_scale: 1_000_000,
            duration_ms: None,
            title: None,
            tracks: Vec::new(),
            chapters: Vec::new(),
            attachments: Vec::new(),
            clusters: Vec::new(),
            attachments_at_end: false,
            unknown_size_clusters: false,
            pad_to: None,
        }
    }

    pub fn doc_type(mut self, doc_type: &str) -> Self {
        self.doc_type = doc_type.into();
        self
    }

    pub fn title(mut self, title: &str) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn duration_ms(mut self, duration_ms: f64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn track(mut self, track: Track) -> Self {
        self.tracks.push(track);
        self
    }

    /// Convenience: an ASS subtitle track with a minimal script header.
    pub fn ass_track(self, number: u64) -> Self {
        let mut track = Track::new(number, TrackKind::Subtitle, "S_TEXT/ASS");
        track.codec_private_raw =
            b"[Script Info]\nScriptType: v4.00+\n\n[Events]\nFormat: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text\n"
                .to_vec();
        self.track(track)
    }

    pub fn chapter(mut self, uid: u64, start: f64, end: f64, text: &str) -> Self {
        self.chapters.push(ChapterSpec {
            uid,
            start,
            end,
            text: text.into(),
        });
        self
    }

    pub fn attachment(mut self, filename: &str, mime: &str, data: Vec<u8>) -> Self {
        self.attachments.push(AttachmentSpec {
            filename: filename.into(),
            mime: mime.into(),
            data,
        });
        self
    }

    /// Place Attachments after the clusters, reachable only via the SeekHead.
    pub fn attachments_at_end(mut self) -> Self {
        self.attachments_at_end = true;
        self
    }

    pub fn unknown_size_clusters(mut self) -> Self {
        self.unknown_size_clusters = true;
        self
    }

    pub fn cluster(mut self, timecode: u64, blocks: Vec<BlockSpec>) -> Self {
        self.clusters.push((timecode, blocks));
        self
    }

    /// Append a Void element so the file is exactly `len` bytes.
    pub fn pad_to(mut self, len: usize) -> Self {
        self.pad_to = Some(len);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.build_with_offsets().0
    }

    /// Build the file and return the absolute offset of every Cluster.
    pub fn build_with_offsets(self) -> (Vec<u8>, Vec<u64>) {
        let mut out = Vec::new();

        let ebml_header = [
            element(0x4286, &uint(1)),
            element(0x42F7, &uint(1)),
            element(0x42F2, &uint(4)),
            element(0x42F3, &uint(8)),
            element(ids::DOC_TYPE, self.doc_type.as_bytes()),
            element(0x4287, &uint(4)),
            element(0x4285, &uint(2)),
        ]
        .concat();
        out.extend(element(ids::EBML, &ebml_header));

        // Segment with unknown size so padding can be appended freely.
        out.extend(id_bytes(ids::SEGMENT));
        out.extend([0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
        let segment_data = out.len() as u64;

        let info = self.info_element();
        let tracks = self.tracks_element();
        let chapters = self.chapters_element();
        let attachments = self.attachments_element();

        let mut body = Vec::new();
        let mut level1: Vec<(u32, u64)> = Vec::new();
        let seek_head_len = seek_head(&[(0, 0); 4]).len();
        let mut cursor = seek_head_len as u64;

        for (id, bytes) in [
            (ids::INFO, &info),
            (ids::TRACKS, &tracks),
            (ids::CHAPTERS, &chapters),
        ] {
            if !bytes.is_empty() {
                level1.push((id, cursor));
                cursor += bytes.len() as u64;
                body.extend_from_slice(bytes);
            }
        }
        if !self.attachments_at_end && !attachments.is_empty() {
            level1.push((ids::ATTACHMENTS, cursor));
            cursor += attachments.len() as u64;
            body.extend_from_slice(&attachments);
        }

        let mut cluster_rel = Vec::new();
        for (timecode, blocks) in &self.clusters {
            cluster_rel.push(cursor);
            let cluster = self.cluster_element(*timecode, blocks);
            cursor += cluster.len() as u64;
            body.extend(cluster);
        }
        if self.attachments_at_end && !attachments.is_empty() {
            level1.push((ids::ATTACHMENTS, cursor));
            body.extend_from_slice(&attachments);
        }

        while level1.len() < 4 {
            // Pad with Void entries so the SeekHead length is fixed.
            level1.push((ids::VOID, 0));
        }
        out.extend(seek_head(&level1));
        out.extend(body);

        if let Some(target) = self.pad_to {
            let remaining = target.saturating_sub(out.len());
            if remaining >= 9 {
                out.extend(id_bytes(ids::VOID));
                out.extend(size_bytes_fixed((remaining - 9) as u64, 8));
                out.resize(target, 0);
            }
        }

        let offsets = cluster_rel.iter().map(|rel| segment_data + rel).collect();
        (out, offsets)
    }

    fn info_element(&self) -> Vec<u8> {
        let mut payload = element(ids::TIMECODE_SCALE, &uint(self.timecode_scale));
        if let Some(ms) = self.duration_ms {
            let ticks = ms * 1_000_000.0 / self.timecode_scale as f64;
            payload.extend(element(ids::DURATION, &ticks.to_be_bytes()));
        }
        if let Some(title) = &self.title {
            payload.extend(element(ids::TITLE, title.as_bytes()));
        }
        payload.extend(element(ids::MUXING_APP, b"mkvbuilder"));
        payload.extend(element(ids::WRITING_APP, b"mkvbuilder"));
        element(ids::INFO, &payload)
    }

    fn tracks_element(&self) -> Vec<u8> {
        let mut payload = Vec::new();
        for track in &self.tracks {
            payload.extend(element(ids::TRACK_ENTRY, &track_entry(track)));
        }
        element(ids::TRACKS, &payload)
    }

    fn chapters_element(&self) -> Vec<u8> {
        if self.chapters.is_empty() {
            return Vec::new();
        }
        let mut edition = Vec::new();
        for chapter in &self.chapters {
            let display = [
                element(ids::CHAP_STRING, chapter.text.as_bytes()),
                element(ids::CHAP_LANGUAGE, b"eng"),
            ]
            .concat();
            let atom = [
                element(ids::CHAPTER_UID, &uint(chapter.uid)),
                element(ids::CHAPTER_TIME_START, &uint((chapter.start * 1e9) as u64)),
                element(ids::CHAPTER_TIME_END, &uint((chapter.end * 1e9) as u64)),
                element(ids::CHAPTER_DISPLAY, &display),
            ]
            .concat();
            edition.extend(element(ids::CHAPTER_ATOM, &atom));
        }
        element(ids::CHAPTERS, &element(ids::EDITION_ENTRY, &edition))
    }

    fn attachments_element(&self) -> Vec<u8> {
        if self.attachments.is_empty() {
            return Vec::new();
        }
        let mut payload = Vec::new();
        for (i, attachment) in self.attachments.iter().enumerate() {
            let file = [
                element(ids::FILE_NAME, attachment.filename.as_bytes()),
                element(ids::FILE_MIME_TYPE, attachment.mime.as_bytes()),
                element(ids::FILE_UID, &uint(i as u64 + 1)),
                element(ids::FILE_DATA, &attachment.data),
            ]
            .concat();
            payload.extend(element(ids::ATTACHED_FILE, &file));
        }
        element(ids::ATTACHMENTS, &payload)
    }

    fn cluster_element(&self, timecode: u64, blocks: &[BlockSpec]) -> Vec<u8> {
        let compression: Vec<Option<&ContentCompression>> = blocks
            .iter()
            .map(|b| {
                self.tracks
                    .iter()
                    .find(|t| t.number == b.track)
                    .and_then(|t| t.content_compression.as_ref())
            })
            .collect();

        let mut payload = element(ids::CLUSTER_TIMECODE, &uint(timecode));
        for (block, compression) in blocks.iter().zip(compression) {
            let frames: Vec<Vec<u8>> = block
                .frames
                .iter()
                .map(|f| encode_frame(f, compression))
                .collect();
            let body = block_body(block, &frames);
            match block.duration {
                None => payload.extend(element(ids::SIMPLE_BLOCK, &body)),
                Some(duration) => {
                    let group = [
                        element(ids::BLOCK, &body),
                        element(ids::BLOCK_DURATION, &uint(duration)),
                    ]
                    .concat();
                    payload.extend(element(ids::BLOCK_GROUP, &group));
                }
            }
        }

        if self.unknown_size_clusters {
            let mut out = id_bytes(ids::CLUSTER);
            out.push(0xFF);
            out.extend(payload);
            out
        } else {
            element(ids::CLUSTER, &payload)
        }
    }
}

fn track_entry(track: &Track) -> Vec<u8> {
    let kind = match track.kind {
        TrackKind::Video => 1,
        TrackKind::Audio => 2,
        TrackKind::Subtitle => 0x11,
        _ => 0x21,
    };
    let mut entry = [
        element(ids::TRACK_NUMBER, &uint(track.number)),
        element(ids::TRACK_UID, &uint(track.uid)),
        element(ids::TRACK_TYPE, &uint(kind)),
        element(ids::CODEC_ID, track.codec_id.as_bytes()),
        element(ids::LANGUAGE, track.language.as_bytes()),
        element(ids::FLAG_DEFAULT, &uint(track.default as u64)),
        element(ids::FLAG_FORCED, &uint(track.forced as u64)),
    ]
    .concat();
    if !track.name.is_empty() {
        entry.extend(element(ids::NAME, track.name.as_bytes()));
    }
    if track.default_duration > 0 {
        entry.extend(element(ids::DEFAULT_DURATION, &uint(track.default_duration)));
    }
    if !track.codec_private_raw.is_empty() {
        entry.extend(element(ids::CODEC_PRIVATE, &track.codec_private_raw));
    }
    if let Some(video) = &track.video {
        let v = [
            element(ids::PIXEL_WIDTH, &uint(video.pixel_width)),
            element(ids::PIXEL_HEIGHT, &uint(video.pixel_height)),
        ]
        .concat();
        entry.extend(element(ids::VIDEO, &v));
    }
    if let Some(compression) = &track.content_compression {
        let mut comp = match compression {
            ContentCompression::Zlib => element(ids::CONTENT_COMP_ALGO, &uint(0)),
            ContentCompression::HeaderStripping { .. } => element(ids::CONTENT_COMP_ALGO, &uint(3)),
            ContentCompression::Unsupported { algo } => element(ids::CONTENT_COMP_ALGO, &uint(*algo)),
        };
        if let ContentCompression::HeaderStripping { prefix } = compression {
            comp.extend(element(ids::CONTENT_COMP_SETTINGS, prefix));
        }
        let encoding = element(ids::CONTENT_ENCODING, &element(ids::CONTENT_COMPRESSION, &comp));
        entry.extend(element(ids::CONTENT_ENCODINGS, &encoding));
    }
    entry
}

fn encode_frame(frame: &[u8], compression: Option<&ContentCompression>) -> Vec<u8> {
    match compression {
        Some(ContentCompression::Zlib) => {
            use flate2::write::ZlibEncoder;
            use std::io::Write;
            let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(frame).expect("in-memory write");
            encoder.finish().expect("in-memory finish")
        }
        Some(ContentCompression::HeaderStripping { prefix }) => {
            frame.strip_prefix(prefix.as_slice()).unwrap_or(frame).to_vec()
        }
        _ => frame.to_vec(),
    }
}

fn block_body(block: &BlockSpec, frames: &[Vec<u8>]) -> Vec<u8> {
    let mut body = size_bytes(block.track);
    body.extend(block.relative.to_be_bytes());
    let mut flags = if block.keyframe && block.duration.is_none() {
        0x80
    } else {
        0
    };
    match block.lacing {
        None => {
            body.push(flags);
            body.extend(frames.concat());
        }
        Some(lacing) => {
            flags |= match lacing {
                Lacing::Xiph => 0b0010,
                Lacing::Fixed => 0b0100,
                Lacing::Ebml => 0b0110,
            };
            body.push(flags);
            body.push((frames.len() - 1) as u8);
            let last = frames.len() - 1;
            match lacing {
                Lacing::Xiph => {
                    for frame in &frames[..last] {
                        let mut n = frame.len();
                        while n >= 255 {
                            body.push(255);
                            n -= 255;
                        }
                        body.push(n as u8);
                    }
                }
                Lacing::Fixed => {}
                Lacing::Ebml => {
                    body.extend(size_bytes(frames[0].len() as u64));
                    for pair in frames[..last].windows(2) {
                        let delta = pair[1].len() as i64 - pair[0].len() as i64;
                        body.extend(signed_vint(delta));
                    }
                }
            }
            body.extend(frames.concat());
        }
    }
    body
}

fn seek_head(entries: &[(u32, u64)]) -> Vec<u8> {
    let mut payload = Vec::new();
    for (id, position) in entries {
        let seek = [
            element(ids::SEEK_ID, &id_bytes(*id)),
            element(ids::SEEK_POSITION, &position.to_be_bytes()),
        ]
        .concat();
        payload.extend(element(ids::SEEK, &seek));
    }
    element(ids::SEEK_HEAD, &payload)
}

/// Encode a full element with a minimal size field.
pub fn element(id: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = id_bytes(id);
    out.extend(size_bytes(payload.len() as u64));
    out.extend_from_slice(payload);
    out
}

fn id_bytes(id: u32) -> Vec<u8> {
    let bytes = id.to_be_bytes();
    let skip = bytes.iter().position(|&b| b != 0).unwrap_or(3);
    bytes[skip..].to_vec()
}

fn size_bytes(size: u64) -> Vec<u8> {
    let mut len = 1;
    while len < 8 && size >= (1u64 << (7 * len)) - 1 {
        len += 1;
    }
    size_bytes_fixed(size, len)
}

fn size_bytes_fixed(size: u64, len: usize) -> Vec<u8> {
    let marked = size | (1u64 << (7 * len));
    marked.to_be_bytes()[8 - len..].to_vec()
}

fn signed_vint(value: i64) -> Vec<u8> {
    let mut len = 1;
    while len < 8 && value.unsigned_abs() >= (1u64 << (7 * len - 1)) - 1 {
        len += 1;
    }
    let bias = (1i64 << (7 * len - 1)) - 1;
    size_bytes_fixed((value + bias) as u64, len)
}

fn uint(value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().position(|&b| b != 0).unwrap_or(7);
    bytes[skip..].to_vec()
}
