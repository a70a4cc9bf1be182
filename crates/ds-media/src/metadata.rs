//! Parsed Matroska header metadata.
//!
//! All timestamps are kept in nanoseconds internally and converted to
//! floating seconds only when serialized for clients.

use serde::{Deserialize, Serialize};

/// Segment-level metadata published to clients with the playback info.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MkvMetadata {
    pub title: String,
    /// Duration in seconds.
    pub duration: f64,
    /// Nanoseconds per timestamp tick.
    pub timecode_scale: u64,
    pub muxing_app: String,
    pub writing_app: String,
    pub tracks: Vec<Track>,
    pub chapters: Vec<Chapter>,
    pub attachments: Vec<Attachment>,
    /// `video/x-matroska; codecs="..."` synthesized from the tracks.
    pub mime_codec: String,
    #[serde(skip)]
    pub layout: SegmentLayout,
}

/// Where the Segment payload and its first Cluster sit in the file.
///
/// Filled by [`MkvDemuxer::open`](crate::MkvDemuxer::open); a zero
/// `data_offset` means the metadata was not produced by a parse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SegmentLayout {
    pub data_offset: u64,
    pub end: Option<u64>,
    pub first_cluster: Option<u64>,
}

impl MkvMetadata {
    /// Look up a track by its number.
    pub fn track(&self, number: u64) -> Option<&Track> {
        self.tracks.iter().find(|t| t.number == number)
    }

    /// Subtitle tracks in track-number order.
    pub fn subtitle_tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter().filter(|t| t.kind == TrackKind::Subtitle)
    }

    pub fn has_subtitle_tracks(&self) -> bool {
        self.subtitle_tracks().next().is_some()
    }

    /// Find an attachment by exact filename.
    pub fn attachment(&self, filename: &str) -> Option<&Attachment> {
        self.attachments.iter().find(|a| a.filename == filename)
    }

    /// Highest track number in use, 0 when there are no tracks.
    pub fn max_track_number(&self) -> u64 {
        self.tracks.iter().map(|t| t.number).max().unwrap_or(0)
    }
}

/// Matroska `TrackType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
    Complex,
    Logo,
    Subtitle,
    Buttons,
    Control,
    Metadata,
    Unknown,
}

impl TrackKind {
    pub fn from_type(value: u64) -> Self {
        match value {
            1 => TrackKind::Video,
            2 => TrackKind::Audio,
            3 => TrackKind::Complex,
            0x10 => TrackKind::Logo,
            0x11 => TrackKind::Subtitle,
            0x12 => TrackKind::Buttons,
            0x20 => TrackKind::Control,
            0x21 => TrackKind::Metadata,
            _ => TrackKind::Unknown,
        }
    }
}

/// One `TrackEntry`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub number: u64,
    pub uid: u64,
    #[serde(rename = "type")]
    pub kind: TrackKind,
    #[serde(rename = "codecID")]
    pub codec_id: String,
    pub name: String,
    /// Legacy ISO-639-2 language, `eng` when absent.
    pub language: String,
    #[serde(rename = "languageIETF", skip_serializing_if = "Option::is_none")]
    pub language_ietf: Option<String>,
    pub default: bool,
    pub forced: bool,
    pub enabled: bool,
    /// Script header for text subtitle tracks (lossy UTF-8 of CodecPrivate).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codec_private: Option<String>,
    #[serde(skip)]
    pub codec_private_raw: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<VideoSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_compression: Option<ContentCompression>,
    /// Default frame duration in nanoseconds, 0 when absent.
    pub default_duration: u64,
}

impl Track {
    /// A track with Matroska defaults for every optional element.
    pub fn new(number: u64, kind: TrackKind, codec_id: impl Into<String>) -> Self {
        Self {
            number,
            uid: number,
            kind,
            codec_id: codec_id.into(),
            name: String::new(),
            language: "eng".into(),
            language_ietf: None,
            default: true,
            forced: false,
            enabled: true,
            codec_private: None,
            codec_private_raw: Vec::new(),
            video: None,
            audio: None,
            content_compression: None,
            default_duration: 0,
        }
    }

    pub fn is_subtitle(&self) -> bool {
        self.kind == TrackKind::Subtitle
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSettings {
    pub pixel_width: u64,
    pub pixel_height: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioSettings {
    pub sampling_frequency: f64,
    pub channels: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bit_depth: Option<u64>,
}

/// `ContentCompression` applied to every frame of a track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "camelCase")]
pub enum ContentCompression {
    /// Algo 0: each frame is a zlib stream.
    Zlib,
    /// Algo 3: `prefix` was stripped from every frame.
    HeaderStripping {
        #[serde(skip)]
        prefix: Vec<u8>,
    },
    /// Algos 1 and 2 (bzlib, lzo) are not decoded.
    Unsupported { algo: u64 },
}

/// One `ChapterAtom` from the default edition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    pub uid: u64,
    /// Start in seconds.
    pub start: f64,
    /// End in seconds (0 when absent).
    pub end: f64,
    pub text: String,
    pub languages: Vec<String>,
}

/// Classification used by the client to decide what to do with attachments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Font,
    Subtitle,
    Other,
}

impl AttachmentKind {
    pub fn classify(filename: &str, mime: &str) -> Self {
        let mime = mime.to_ascii_lowercase();
        let ext = filename
            .rsplit_once('.')
            .map(|(_, e)| e.to_ascii_lowercase())
            .unwrap_or_default();

        let font_mime = mime.starts_with("font/")
            || matches!(
                mime.as_str(),
                "application/x-truetype-font"
                    | "application/vnd.ms-opentype"
                    | "application/font-sfnt"
                    | "application/x-font-ttf"
                    | "application/x-font-otf"
                    | "application/font-woff"
            );
        if font_mime || matches!(ext.as_str(), "ttf" | "otf" | "ttc" | "woff" | "woff2") {
            return AttachmentKind::Font;
        }
        if matches!(ext.as_str(), "ass" | "ssa" | "srt" | "vtt") {
            return AttachmentKind::Subtitle;
        }
        AttachmentKind::Other
    }
}

/// One `AttachedFile`.
///
/// Small attachments carry their bytes in `data`; larger ones are read on
/// demand from `offset..offset + size` of the source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub uid: u64,
    pub filename: String,
    pub mimetype: String,
    pub description: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub kind: AttachmentKind,
    /// Absolute offset of the payload in the source.
    #[serde(skip)]
    pub offset: u64,
    #[serde(skip)]
    pub data: Option<Vec<u8>>,
}
