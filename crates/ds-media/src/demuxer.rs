//! Matroska demuxer over any `Read + Seek` source.
//!
//! [`MkvDemuxer::open`] parses the EBML header and the Segment's level-1
//! metadata elements (following the SeekHead for those that live after the
//! first Cluster). Clusters are only touched by [`MkvDemuxer::read_packet`],
//! which walks blocks in file order, and by [`MkvDemuxer::find_next_cluster`],
//! which resynchronises from an arbitrary byte offset.

use std::collections::{HashSet, VecDeque};
use std::io::{self, Read, Seek, SeekFrom};

use flate2::read::ZlibDecoder;
use tracing::{debug, trace, warn};

use crate::codecs::mime_codec;
use crate::ebml::{self, children, ids, parse_float, parse_string, parse_uint, ElementHeader};
use crate::error::EbmlError;
use crate::metadata::{
    Attachment, AttachmentKind, AudioSettings, Chapter, ContentCompression, MkvMetadata,
    SegmentLayout, Track, TrackKind, VideoSettings,
};

/// Size of the sliding window used by [`MkvDemuxer::find_next_cluster`].
pub const CLUSTER_SCAN_WINDOW: usize = 8 * 1024;
/// Bytes carried between scan windows so a split magic is still found.
const CLUSTER_SCAN_OVERLAP: usize = 3;
/// `CRC-32` element ID, allowed as the first child of a Cluster.
const CRC32_ID: u32 = 0xBF;
const DEFAULT_TIMECODE_SCALE: u64 = 1_000_000;

/// Tuning knobs for [`MkvDemuxer`].
#[derive(Debug, Clone)]
pub struct DemuxerOptions {
    /// Attachments up to this size are loaded during `open`; larger ones are
    /// left as `(offset, size)` descriptors.
    pub attachment_inline_limit: u64,
    /// Skips up to this many bytes are done by reading instead of seeking.
    pub skip_read_threshold: u64,
    /// Upper bound for any element payload buffered in memory.
    pub max_element_size: u64,
}

impl Default for DemuxerOptions {
    fn default() -> Self {
        Self {
            attachment_inline_limit: 8 * 1024 * 1024,
            skip_read_threshold: 1024 * 1024,
            max_element_size: 64 * 1024 * 1024,
        }
    }
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub track: u64,
    pub data: Vec<u8>,
    /// Presentation time in nanoseconds.
    pub start_ns: u64,
    /// End time in nanoseconds, 0 when the block carries no duration.
    pub end_ns: u64,
    /// Absolute offset of the Cluster this packet came from.
    pub head_pos: u64,
    pub keyframe: bool,
}

impl Packet {
    /// Duration in nanoseconds, 0 when unknown.
    pub fn duration_ns(&self) -> u64 {
        self.end_ns.saturating_sub(self.start_ns)
    }
}

#[derive(Debug, Clone, Copy)]
struct ClusterState {
    head_pos: u64,
    timecode: u64,
}

/// Streaming Matroska demuxer.
pub struct MkvDemuxer<R> {
    reader: R,
    options: DemuxerOptions,
    metadata: MkvMetadata,
    segment_data_offset: u64,
    segment_end: Option<u64>,
    first_cluster: Option<u64>,
    cluster: Option<ClusterState>,
    pending: VecDeque<Packet>,
    track_filter: Option<HashSet<u64>>,
}

impl<R: Read + Seek> MkvDemuxer<R> {
    /// Parse the document header and position the reader at the first Cluster.
    pub fn open(mut reader: R, options: DemuxerOptions) -> Result<Self, EbmlError> {
        reader.seek(SeekFrom::Start(0))?;
        read_ebml_header(&mut reader)?;

        let segment = loop {
            let header = ebml::read_element_header(&mut reader)?
                .ok_or_else(|| EbmlError::InvalidHeader("no Segment element".into()))?;
            if header.id == ids::SEGMENT {
                break header;
            }
            let size = header
                .size
                .ok_or_else(|| EbmlError::invalid(header.offset, "unknown-size element before Segment"))?;
            ebml::skip(&mut reader, size, options.skip_read_threshold)?;
        };

        let mut demuxer = Self {
            reader,
            options,
            metadata: MkvMetadata {
                timecode_scale: DEFAULT_TIMECODE_SCALE,
                ..Default::default()
            },
            segment_data_offset: segment.data_offset(),
            segment_end: segment.end(),
            first_cluster: None,
            cluster: None,
            pending: VecDeque::new(),
            track_filter: None,
        };
        demuxer.parse_segment_header()?;
        demuxer.metadata.layout = SegmentLayout {
            data_offset: demuxer.segment_data_offset,
            end: demuxer.segment_end,
            first_cluster: demuxer.first_cluster,
        };
        Ok(demuxer)
    }

    /// Continue a document whose header an earlier [`open`](Self::open)
    /// already parsed.
    ///
    /// Nothing is read: the reader is only positioned at the first Cluster,
    /// so a source that blocks on missing bytes is not touched until packets
    /// are requested. Attachments are not carried over.
    pub fn resume(
        reader: R,
        metadata: &MkvMetadata,
        options: DemuxerOptions,
    ) -> Result<Self, EbmlError> {
        let layout = metadata.layout;
        if layout.data_offset == 0 {
            return Err(EbmlError::InvalidHeader("metadata carries no segment layout".into()));
        }
        let mut demuxer = Self {
            reader,
            options,
            metadata: MkvMetadata {
                title: metadata.title.clone(),
                duration: metadata.duration,
                timecode_scale: metadata.timecode_scale,
                muxing_app: metadata.muxing_app.clone(),
                writing_app: metadata.writing_app.clone(),
                tracks: metadata.tracks.clone(),
                chapters: metadata.chapters.clone(),
                attachments: Vec::new(),
                mime_codec: metadata.mime_codec.clone(),
                layout,
            },
            segment_data_offset: layout.data_offset,
            segment_end: layout.end,
            first_cluster: layout.first_cluster,
            cluster: None,
            pending: VecDeque::new(),
            track_filter: None,
        };
        demuxer.rewind()?;
        Ok(demuxer)
    }

    /// Parsed header metadata.
    pub fn metadata(&self) -> &MkvMetadata {
        &self.metadata
    }

    /// Consume the demuxer and return its metadata.
    pub fn into_metadata(self) -> MkvMetadata {
        self.metadata
    }

    /// Only return packets of these tracks; other blocks are skipped without
    /// buffering their payload. `None` returns every packet.
    pub fn set_track_filter(&mut self, tracks: Option<HashSet<u64>>) {
        self.track_filter = tracks;
    }

    pub fn get_ref(&self) -> &R {
        &self.reader
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Return the next packet in file order, `Ok(None)` at end of segment.
    pub fn read_packet(&mut self) -> Result<Option<Packet>, EbmlError> {
        loop {
            if let Some(packet) = self.pending.pop_front() {
                return Ok(Some(packet));
            }

            let header = match ebml::read_element_header(&mut self.reader) {
                Ok(Some(header)) => header,
                Ok(None) => return Ok(None),
                Err(e) if is_plain_eof(&e) => return Ok(None),
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    let pos = self.reader.stream_position()?;
                    warn!(offset = pos, error = %e, "Corrupt element, resyncing to next cluster");
                    match self.find_next_cluster(pos, 0) {
                        Ok(_) => continue,
                        Err(EbmlError::NoCluster { .. }) => return Ok(None),
                        Err(e) => return Err(e),
                    }
                }
                Err(e) => return Err(e.into()),
            };

            if self.segment_end.is_some_and(|end| header.offset >= end) {
                return Ok(None);
            }

            match header.id {
                ids::CLUSTER => {
                    trace!(offset = header.offset, "Entering cluster");
                    self.cluster = Some(ClusterState {
                        head_pos: header.offset,
                        timecode: 0,
                    });
                }
                ids::CLUSTER_TIMECODE => {
                    let payload = self.read_payload(&header)?;
                    if let Some(cluster) = self.cluster.as_mut() {
                        cluster.timecode = parse_uint(&payload);
                    }
                }
                ids::SIMPLE_BLOCK => {
                    if let Some(payload) = self.read_block_payload(&header)? {
                        self.queue_block(&payload, None, None, header.offset)?;
                    }
                }
                ids::BLOCK_GROUP => {
                    let payload = self.read_payload(&header)?;
                    let mut block = None;
                    let mut duration = None;
                    let mut referenced = false;
                    for (id, data) in children(&payload) {
                        match id {
                            ids::BLOCK => block = Some(data),
                            ids::BLOCK_DURATION => duration = Some(parse_uint(data)),
                            ids::REFERENCE_BLOCK => referenced = true,
                            _ => {}
                        }
                    }
                    if let Some(block) = block {
                        if self.wants_block(block) {
                            self.queue_block(block, duration, Some(!referenced), header.offset)?;
                        }
                    }
                }
                ids::EBML => {
                    debug!(offset = header.offset, "Chained segment reached, stopping");
                    return Ok(None);
                }
                _ => {
                    let size = match header.size {
                        Some(size) => size,
                        // Unknown-size masters (Segment, BlockGroup in live files)
                        // are descended into.
                        None => continue,
                    };
                    ebml::skip(&mut self.reader, size, self.options.skip_read_threshold)?;
                }
            }
        }
    }

    /// Scan forward from `offset - backoff` for the next Cluster.
    ///
    /// On success the reader is positioned at the Cluster's first byte and
    /// its absolute offset is returned.
    pub fn find_next_cluster(&mut self, offset: u64, backoff: u64) -> Result<u64, EbmlError> {
        let start = offset.saturating_sub(backoff);
        self.pending.clear();
        self.cluster = None;

        let mut window_start = start;
        let mut buf = vec![0u8; CLUSTER_SCAN_WINDOW];
        let mut carry = 0usize;
        self.reader.seek(SeekFrom::Start(start))?;

        loop {
            let n = read_full(&mut self.reader, &mut buf[carry..])?;
            if n == 0 {
                return Err(EbmlError::NoCluster { offset: start });
            }
            let filled = carry + n;

            let mut search_from = 0;
            while let Some(rel) = find_magic(&buf[search_from..filled]) {
                let candidate = window_start + (search_from + rel) as u64;
                if self.is_cluster_at(candidate)? {
                    self.reader.seek(SeekFrom::Start(candidate))?;
                    debug!(offset, backoff, cluster = candidate, "Found cluster");
                    return Ok(candidate);
                }
                search_from += rel + 1;
            }

            let keep = CLUSTER_SCAN_OVERLAP.min(filled);
            buf.copy_within(filled - keep..filled, 0);
            window_start += (filled - keep) as u64;
            carry = keep;
            self.reader
                .seek(SeekFrom::Start(window_start + carry as u64))?;
        }
    }

    /// Position the reader at a known Cluster offset.
    pub fn seek_to_cluster(&mut self, offset: u64) -> Result<(), EbmlError> {
        self.pending.clear();
        self.cluster = None;
        self.reader.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    /// Rewind to the first Cluster.
    pub fn rewind(&mut self) -> Result<(), EbmlError> {
        let offset = self
            .first_cluster
            .or(self.segment_end)
            .unwrap_or(self.segment_data_offset);
        self.seek_to_cluster(offset)
    }

    /// Bytes of an attachment, reading lazily from the source when needed.
    ///
    /// The reader position is restored afterwards.
    pub fn read_attachment(&mut self, filename: &str) -> Result<Option<Vec<u8>>, EbmlError> {
        let Some(attachment) = self.metadata.attachment(filename).cloned() else {
            return Ok(None);
        };
        let pos = self.reader.stream_position()?;
        let data = load_attachment(&mut self.reader, &attachment)?;
        self.reader.seek(SeekFrom::Start(pos))?;
        Ok(Some(data))
    }

    fn parse_segment_header(&mut self) -> Result<(), EbmlError> {
        let mut seen: HashSet<u32> = HashSet::new();
        let mut seek_entries: Vec<(u32, u64)> = Vec::new();
        let mut stop_at = None;

        self.reader.seek(SeekFrom::Start(self.segment_data_offset))?;
        loop {
            if let Some(end) = self.segment_end {
                if self.reader.stream_position()? >= end {
                    break;
                }
            }
            let header = match ebml::read_element_header(&mut self.reader) {
                Ok(Some(h)) => h,
                Ok(None) => break,
                Err(e) if is_plain_eof(&e) => break,
                Err(e) => return Err(e.into()),
            };
            if header.id == ids::CLUSTER {
                self.first_cluster = Some(header.offset);
                stop_at = Some(header.offset);
                break;
            }
            seen.insert(header.id);
            match header.id {
                ids::SEEK_HEAD => {
                    let payload = self.read_payload(&header)?;
                    seek_entries.extend(parse_seek_head(&payload));
                }
                ids::ATTACHMENTS => self.parse_attachments(&header)?,
                ids::INFO | ids::TRACKS | ids::CHAPTERS => {
                    let payload = self.read_payload(&header)?;
                    self.apply_level1(header.id, &payload);
                }
                _ => {
                    let size = header.size.ok_or_else(|| {
                        EbmlError::invalid(header.offset, "unknown-size element in segment header")
                    })?;
                    ebml::skip(&mut self.reader, size, self.options.skip_read_threshold)?;
                }
            }
        }

        // Follow the SeekHead for metadata stored after the first Cluster.
        let mut followed_nested = false;
        let mut i = 0;
        while i < seek_entries.len() {
            let (id, rel) = seek_entries[i];
            i += 1;
            let wanted = matches!(
                id,
                ids::INFO | ids::TRACKS | ids::CHAPTERS | ids::ATTACHMENTS | ids::SEEK_HEAD
            );
            if !wanted || (id != ids::SEEK_HEAD && seen.contains(&id)) {
                continue;
            }
            let abs = self.segment_data_offset + rel;
            // Only a SeekHead past the first Cluster was missed by the linear pass.
            if id == ids::SEEK_HEAD && (followed_nested || stop_at.is_none_or(|s| abs < s)) {
                continue;
            }
            self.reader.seek(SeekFrom::Start(abs))?;
            let Some(header) = ebml::read_element_header(&mut self.reader)? else {
                continue;
            };
            if header.id != id {
                warn!(expected = id, found = header.id, offset = abs, "SeekHead entry points at wrong element");
                continue;
            }
            debug!(id, offset = abs, "Following SeekHead entry");
            seen.insert(id);
            match id {
                ids::SEEK_HEAD => {
                    followed_nested = true;
                    let payload = self.read_payload(&header)?;
                    seek_entries.extend(parse_seek_head(&payload));
                }
                ids::ATTACHMENTS => self.parse_attachments(&header)?,
                _ => {
                    let payload = self.read_payload(&header)?;
                    self.apply_level1(id, &payload);
                }
            }
        }

        if !seen.contains(&ids::TRACKS) {
            return Err(EbmlError::InvalidHeader("no Tracks element".into()));
        }

        self.metadata.mime_codec = mime_codec(&self.metadata.tracks);
        self.rewind()?;
        Ok(())
    }

    fn apply_level1(&mut self, id: u32, payload: &[u8]) {
        match id {
            ids::INFO => parse_info(payload, &mut self.metadata),
            ids::TRACKS => {
                self.metadata.tracks = children(payload)
                    .filter(|(id, _)| *id == ids::TRACK_ENTRY)
                    .filter_map(|(_, data)| parse_track_entry(data))
                    .collect();
            }
            ids::CHAPTERS => self.metadata.chapters = parse_chapters(payload),
            _ => {}
        }
    }

    fn parse_attachments(&mut self, parent: &ElementHeader) -> Result<(), EbmlError> {
        let end = parent
            .end()
            .ok_or_else(|| EbmlError::invalid(parent.offset, "Attachments with unknown size"))?;

        while self.reader.stream_position()? < end {
            let Some(file) = ebml::read_element_header(&mut self.reader)? else {
                break;
            };
            let file_end = file
                .end()
                .ok_or_else(|| EbmlError::invalid(file.offset, "AttachedFile with unknown size"))?;
            if file.id != ids::ATTACHED_FILE {
                self.reader.seek(SeekFrom::Start(file_end))?;
                continue;
            }

            let mut attachment = Attachment {
                uid: 0,
                filename: String::new(),
                mimetype: String::new(),
                description: String::new(),
                size: 0,
                kind: AttachmentKind::Other,
                offset: 0,
                data: None,
            };
            while self.reader.stream_position()? < file_end {
                let Some(child) = ebml::read_element_header(&mut self.reader)? else {
                    break;
                };
                let size = child
                    .size
                    .ok_or_else(|| EbmlError::invalid(child.offset, "attachment child with unknown size"))?;
                if child.id == ids::FILE_DATA {
                    attachment.offset = child.data_offset();
                    attachment.size = size;
                    if size <= self.options.attachment_inline_limit {
                        attachment.data = Some(ebml::read_payload(&mut self.reader, &child, size)?);
                    } else {
                        ebml::skip(&mut self.reader, size, 0)?;
                    }
                    continue;
                }
                let payload = self.read_payload(&child)?;
                match child.id {
                    ids::FILE_NAME => attachment.filename = parse_string(&payload),
                    ids::FILE_MIME_TYPE => attachment.mimetype = parse_string(&payload),
                    ids::FILE_DESCRIPTION => attachment.description = parse_string(&payload),
                    ids::FILE_UID => attachment.uid = parse_uint(&payload),
                    _ => {}
                }
            }
            attachment.kind = AttachmentKind::classify(&attachment.filename, &attachment.mimetype);
            trace!(
                filename = %attachment.filename,
                size = attachment.size,
                inline = attachment.data.is_some(),
                "Parsed attachment"
            );
            self.metadata.attachments.push(attachment);
            self.reader.seek(SeekFrom::Start(file_end))?;
        }
        self.reader.seek(SeekFrom::Start(end))?;
        Ok(())
    }

    fn read_payload(&mut self, header: &ElementHeader) -> Result<Vec<u8>, EbmlError> {
        Ok(ebml::read_payload(
            &mut self.reader,
            header,
            self.options.max_element_size,
        )?)
    }

    /// Read a SimpleBlock payload, or skip it when its track is filtered out.
    fn read_block_payload(&mut self, header: &ElementHeader) -> Result<Option<Vec<u8>>, EbmlError> {
        let Some(filter) = &self.track_filter else {
            return self.read_payload(header).map(Some);
        };
        let size = header
            .size
            .ok_or_else(|| EbmlError::invalid(header.offset, "SimpleBlock with unknown size"))?;

        let mut lead = [0u8; 8];
        self.reader.read_exact(&mut lead[..1])?;
        let len = ebml::vint_length(lead[0])
            .filter(|&l| l <= 8 && l as u64 <= size)
            .ok_or_else(|| EbmlError::invalid(header.offset, "bad block track number"))?;
        self.reader.read_exact(&mut lead[1..len])?;
        let (track, _) = ebml::vint_from_slice(&lead[..len])
            .ok_or_else(|| EbmlError::invalid(header.offset, "bad block track number"))?;

        if !filter.contains(&track) {
            ebml::skip(
                &mut self.reader,
                size - len as u64,
                self.options.skip_read_threshold,
            )?;
            return Ok(None);
        }
        if size > self.options.max_element_size {
            return Err(EbmlError::invalid(header.offset, "block exceeds size limit"));
        }
        let mut payload = vec![0u8; size as usize];
        payload[..len].copy_from_slice(&lead[..len]);
        self.reader.read_exact(&mut payload[len..])?;
        Ok(Some(payload))
    }

    fn wants_block(&self, block: &[u8]) -> bool {
        match (&self.track_filter, ebml::vint_from_slice(block)) {
            (None, _) => true,
            (Some(filter), Some((track, _))) => filter.contains(&track),
            (Some(_), None) => false,
        }
    }

    /// Split a Block/SimpleBlock into packets and queue them.
    ///
    /// `group_keyframe` is set for BlockGroups, whose Block has no keyframe flag.
    fn queue_block(
        &mut self,
        block: &[u8],
        duration: Option<u64>,
        group_keyframe: Option<bool>,
        element_offset: u64,
    ) -> Result<(), EbmlError> {
        let (track_number, len) = ebml::vint_from_slice(block)
            .ok_or_else(|| EbmlError::invalid(element_offset, "bad block track number"))?;
        if block.len() < len + 3 {
            return Err(EbmlError::invalid(element_offset, "truncated block header"));
        }
        let relative = i16::from_be_bytes([block[len], block[len + 1]]) as i64;
        let flags = block[len + 2];
        let body = &block[len + 3..];

        let cluster = self.cluster.unwrap_or(ClusterState {
            head_pos: element_offset,
            timecode: 0,
        });
        let scale = self.metadata.timecode_scale.max(1);
        let ticks = (cluster.timecode as i64 + relative).max(0) as u64;
        let start_ns = ticks.saturating_mul(scale);

        let track = self.metadata.track(track_number);
        let default_duration = track.map_or(0, |t| t.default_duration);
        let compression = track.and_then(|t| t.content_compression.clone());

        let frames = split_lacing(body, flags, element_offset)?;
        let frame_count = frames.len() as u64;
        for (i, frame) in frames.into_iter().enumerate() {
            let frame_start = start_ns + default_duration * i as u64;
            let end_ns = match duration {
                Some(d) if frame_count == 1 => start_ns + d.saturating_mul(scale),
                Some(d) => frame_start + d.saturating_mul(scale) / frame_count,
                None => 0,
            };
            let data = decode_frame(frame, compression.as_ref(), element_offset)?;
            self.pending.push_back(Packet {
                track: track_number,
                data,
                start_ns: frame_start,
                end_ns,
                head_pos: cluster.head_pos,
                keyframe: group_keyframe.unwrap_or(flags & 0x80 != 0),
            });
        }
        Ok(())
    }

    /// True when a valid Cluster header starts at `offset`.
    fn is_cluster_at(&mut self, offset: u64) -> Result<bool, EbmlError> {
        self.reader.seek(SeekFrom::Start(offset))?;
        let header = match ebml::read_element_header(&mut self.reader) {
            Ok(Some(h)) if h.id == ids::CLUSTER => h,
            Ok(_) => return Ok(false),
            Err(e) if is_plain_eof(&e) || e.kind() == io::ErrorKind::InvalidData => {
                return Ok(false)
            }
            Err(e) => return Err(e.into()),
        };
        match ebml::read_element_header(&mut self.reader) {
            Ok(Some(child)) => Ok(
                matches!(child.id, ids::CLUSTER_TIMECODE | CRC32_ID)
                    && child.size.is_some()
                    && header.size.is_none_or(|s| child.header_len <= s),
            ),
            Ok(None) => Ok(false),
            Err(e) if is_plain_eof(&e) || e.kind() == io::ErrorKind::InvalidData => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Read an attachment's bytes, from memory or from `reader`.
pub fn load_attachment<R: Read + Seek>(
    reader: &mut R,
    attachment: &Attachment,
) -> Result<Vec<u8>, EbmlError> {
    if let Some(data) = &attachment.data {
        return Ok(data.clone());
    }
    reader.seek(SeekFrom::Start(attachment.offset))?;
    let mut data = vec![0u8; attachment.size as usize];
    reader.read_exact(&mut data)?;
    Ok(data)
}

fn read_ebml_header<R: Read + Seek>(reader: &mut R) -> Result<(), EbmlError> {
    let header = ebml::read_element_header(reader)
        .map_err(|e| EbmlError::InvalidHeader(e.to_string()))?
        .ok_or_else(|| EbmlError::InvalidHeader("empty input".into()))?;
    if header.id != ids::EBML {
        return Err(EbmlError::InvalidHeader(format!(
            "expected EBML magic, found element {:#x}",
            header.id
        )));
    }
    let payload = ebml::read_payload(reader, &header, 4096)?;
    let doc_type = children(&payload)
        .find(|(id, _)| *id == ids::DOC_TYPE)
        .map(|(_, data)| parse_string(data))
        .unwrap_or_else(|| "matroska".to_string());
    if doc_type != "matroska" && doc_type != "webm" {
        return Err(EbmlError::UnsupportedDocType(doc_type));
    }
    Ok(())
}

fn parse_seek_head(payload: &[u8]) -> Vec<(u32, u64)> {
    children(payload)
        .filter(|(id, _)| *id == ids::SEEK)
        .filter_map(|(_, seek)| {
            let mut seek_id = None;
            let mut position = None;
            for (id, data) in children(seek) {
                match id {
                    ids::SEEK_ID => seek_id = Some(parse_uint(data) as u32),
                    ids::SEEK_POSITION => position = Some(parse_uint(data)),
                    _ => {}
                }
            }
            Some((seek_id?, position?))
        })
        .collect()
}

fn parse_info(payload: &[u8], meta: &mut MkvMetadata) {
    let mut duration_ticks = 0.0;
    for (id, data) in children(payload) {
        match id {
            ids::TIMECODE_SCALE => {
                let scale = parse_uint(data);
                if scale > 0 {
                    meta.timecode_scale = scale;
                }
            }
            ids::DURATION => duration_ticks = parse_float(data),
            ids::TITLE => meta.title = parse_string(data),
            ids::MUXING_APP => meta.muxing_app = parse_string(data),
            ids::WRITING_APP => meta.writing_app = parse_string(data),
            _ => {}
        }
    }
    meta.duration = duration_ticks * meta.timecode_scale as f64 / 1e9;
}

fn parse_track_entry(data: &[u8]) -> Option<Track> {
    let mut track = Track::new(0, TrackKind::Unknown, "");
    let mut uid = None;
    for (id, value) in children(data) {
        match id {
            ids::TRACK_NUMBER => track.number = parse_uint(value),
            ids::TRACK_UID => uid = Some(parse_uint(value)),
            ids::TRACK_TYPE => track.kind = TrackKind::from_type(parse_uint(value)),
            ids::CODEC_ID => track.codec_id = parse_string(value),
            ids::NAME => track.name = parse_string(value),
            ids::LANGUAGE => track.language = parse_string(value),
            ids::LANGUAGE_IETF => track.language_ietf = Some(parse_string(value)),
            ids::FLAG_DEFAULT => track.default = parse_uint(value) != 0,
            ids::FLAG_FORCED => track.forced = parse_uint(value) != 0,
            ids::FLAG_ENABLED => track.enabled = parse_uint(value) != 0,
            ids::DEFAULT_DURATION => track.default_duration = parse_uint(value),
            ids::CODEC_PRIVATE => track.codec_private_raw = value.to_vec(),
            ids::VIDEO => {
                let mut video = VideoSettings {
                    pixel_width: 0,
                    pixel_height: 0,
                };
                for (id, v) in children(value) {
                    match id {
                        ids::PIXEL_WIDTH => video.pixel_width = parse_uint(v),
                        ids::PIXEL_HEIGHT => video.pixel_height = parse_uint(v),
                        _ => {}
                    }
                }
                track.video = Some(video);
            }
            ids::AUDIO => {
                let mut audio = AudioSettings {
                    sampling_frequency: 8000.0,
                    channels: 1,
                    bit_depth: None,
                };
                for (id, v) in children(value) {
                    match id {
                        ids::SAMPLING_FREQUENCY => audio.sampling_frequency = parse_float(v),
                        ids::CHANNELS => audio.channels = parse_uint(v),
                        ids::BIT_DEPTH => audio.bit_depth = Some(parse_uint(v)),
                        _ => {}
                    }
                }
                track.audio = Some(audio);
            }
            ids::CONTENT_ENCODINGS => track.content_compression = parse_content_encodings(value),
            _ => {}
        }
    }
    if track.number == 0 {
        return None;
    }
    track.uid = uid.unwrap_or(track.number);
    if track.language.is_empty() {
        track.language = "eng".into();
    }
    if track.is_subtitle() && !track.codec_private_raw.is_empty() {
        track.codec_private = Some(String::from_utf8_lossy(&track.codec_private_raw).into_owned());
    }
    Some(track)
}

fn parse_content_encodings(data: &[u8]) -> Option<ContentCompression> {
    let (_, encoding) = children(data).find(|(id, _)| *id == ids::CONTENT_ENCODING)?;
    let (_, compression) = children(encoding).find(|(id, _)| *id == ids::CONTENT_COMPRESSION)?;
    let mut algo = 0;
    let mut settings = Vec::new();
    for (id, value) in children(compression) {
        match id {
            ids::CONTENT_COMP_ALGO => algo = parse_uint(value),
            ids::CONTENT_COMP_SETTINGS => settings = value.to_vec(),
            _ => {}
        }
    }
    Some(match algo {
        0 => ContentCompression::Zlib,
        3 => ContentCompression::HeaderStripping { prefix: settings },
        other => ContentCompression::Unsupported { algo: other },
    })
}

fn parse_chapters(data: &[u8]) -> Vec<Chapter> {
    let Some((_, edition)) = children(data).find(|(id, _)| *id == ids::EDITION_ENTRY) else {
        return Vec::new();
    };
    let mut chapters = Vec::new();
    collect_chapter_atoms(edition, &mut chapters);
    chapters
}

fn collect_chapter_atoms(parent: &[u8], out: &mut Vec<Chapter>) {
    for (id, atom) in children(parent) {
        if id == ids::CHAPTER_ATOM {
            parse_chapter_atom(atom, out);
        }
    }
}

/// Push one atom, then its nested atoms in order.
fn parse_chapter_atom(atom: &[u8], out: &mut Vec<Chapter>) {
    let mut chapter = Chapter {
        uid: 0,
        start: 0.0,
        end: 0.0,
        text: String::new(),
        languages: Vec::new(),
    };
    let mut nested = Vec::new();
    for (id, value) in children(atom) {
        match id {
            ids::CHAPTER_UID => chapter.uid = parse_uint(value),
            ids::CHAPTER_TIME_START => chapter.start = parse_uint(value) as f64 / 1e9,
            ids::CHAPTER_TIME_END => chapter.end = parse_uint(value) as f64 / 1e9,
            ids::CHAPTER_DISPLAY => {
                for (id, v) in children(value) {
                    match id {
                        ids::CHAP_STRING if chapter.text.is_empty() => {
                            chapter.text = parse_string(v)
                        }
                        ids::CHAP_LANGUAGE | ids::CHAP_LANGUAGE_IETF => {
                            let lang = parse_string(v);
                            if !chapter.languages.contains(&lang) {
                                chapter.languages.push(lang);
                            }
                        }
                        _ => {}
                    }
                }
            }
            ids::CHAPTER_ATOM => nested.push(value),
            _ => {}
        }
    }
    out.push(chapter);
    for child in nested {
        parse_chapter_atom(child, out);
    }
}

/// Split a block body into frames according to its lacing flags.
fn split_lacing(body: &[u8], flags: u8, offset: u64) -> Result<Vec<&[u8]>, EbmlError> {
    let lacing = (flags >> 1) & 0x03;
    if lacing == 0 {
        return Ok(vec![body]);
    }
    let bad = || EbmlError::invalid(offset, "malformed lacing");
    let count = *body.first().ok_or_else(bad)? as usize + 1;
    let mut pos = 1;
    let mut sizes = Vec::with_capacity(count);

    match lacing {
        // Xiph
        0b01 => {
            for _ in 0..count - 1 {
                let mut size = 0usize;
                loop {
                    let b = *body.get(pos).ok_or_else(bad)?;
                    pos += 1;
                    size += b as usize;
                    if b != 0xFF {
                        break;
                    }
                }
                sizes.push(size);
            }
        }
        // Fixed-size
        0b10 => {
            let remaining = body.len() - pos;
            if remaining % count != 0 {
                return Err(bad());
            }
            sizes.extend(std::iter::repeat_n(remaining / count, count - 1));
        }
        // EBML
        _ => {
            let (first, len) = ebml::vint_from_slice(&body[pos..]).ok_or_else(bad)?;
            pos += len;
            let mut prev = first as i64;
            sizes.push(first as usize);
            for _ in 1..count - 1 {
                let (delta, len) = ebml::signed_vint_from_slice(&body[pos..]).ok_or_else(bad)?;
                pos += len;
                prev += delta;
                if prev < 0 {
                    return Err(bad());
                }
                sizes.push(prev as usize);
            }
        }
    }

    let consumed: usize = sizes.iter().sum();
    if pos + consumed > body.len() {
        return Err(bad());
    }
    sizes.push(body.len() - pos - consumed);

    let mut frames = Vec::with_capacity(count);
    for size in sizes {
        frames.push(&body[pos..pos + size]);
        pos += size;
    }
    Ok(frames)
}

fn decode_frame(
    frame: &[u8],
    compression: Option<&ContentCompression>,
    offset: u64,
) -> Result<Vec<u8>, EbmlError> {
    match compression {
        Some(ContentCompression::Zlib) => {
            let mut out = Vec::with_capacity(frame.len() * 2);
            ZlibDecoder::new(frame)
                .read_to_end(&mut out)
                .map_err(|e| EbmlError::Decompress(format!("block at {offset}: {e}")))?;
            Ok(out)
        }
        Some(ContentCompression::HeaderStripping { prefix }) => {
            let mut out = Vec::with_capacity(prefix.len() + frame.len());
            out.extend_from_slice(prefix);
            out.extend_from_slice(frame);
            Ok(out)
        }
        Some(ContentCompression::Unsupported { .. }) | None => Ok(frame.to_vec()),
    }
}

fn find_magic(haystack: &[u8]) -> Option<usize> {
    haystack
        .windows(ids::CLUSTER_MAGIC.len())
        .position(|w| w == ids::CLUSTER_MAGIC)
}

/// Fill `buf` as far as possible, returning fewer bytes only at EOF.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted && e.get_ref().is_none() => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// An `UnexpectedEof` raised by the source itself rather than a tunnelled error.
fn is_plain_eof(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::UnexpectedEof && e.get_ref().is_none()
}
