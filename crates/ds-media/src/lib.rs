//! Matroska (EBML/MKV/WebM) demuxing for the direct streaming engine.
//!
//! The demuxer parses a document up to and including `Segment/Info`,
//! `Tracks`, `Chapters` and `Attachments`, then yields block packets lazily
//! from any cluster boundary. Only `Read + Seek` is required of the source,
//! so the same parser runs over local files, the shared range cache and
//! remote HTTP readers.

pub mod codecs;
pub mod demuxer;
pub mod ebml;
pub mod error;
pub mod metadata;
pub mod sniff;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use codecs::mime_codec;
pub use demuxer::{load_attachment, DemuxerOptions, MkvDemuxer, Packet};
pub use error::EbmlError;
pub use metadata::{
    Attachment, AttachmentKind, AudioSettings, Chapter, ContentCompression, MkvMetadata,
    SegmentLayout, Track, TrackKind, VideoSettings,
};
