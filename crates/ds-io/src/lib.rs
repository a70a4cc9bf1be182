//! Byte sources shared by the stream handlers and the subtitle pipeline.
//!
//! - [`RangeCache`]: a sparse temporary file fed by proxied HTTP responses,
//!   with blocking readers that wait for the bytes they need.
//! - [`RangeHttpReadSeeker`]: `Read + Seek` over an HTTP URL using `Range`.
//! - [`CancellableReader`]: stops any reader when a scope is cancelled.

pub mod cancel;
pub mod http_reader;
pub mod range_cache;

use std::io::{Read, Seek};

pub use cancel::CancellableReader;
pub use http_reader::{head_length, parse_content_range, RangeHttpReadSeeker};
pub use range_cache::{RangeCache, RangeCacheReader, TEE_CHUNK_SIZE};

/// A seekable byte source that can move to a blocking worker thread.
pub trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

/// Owned, type-erased [`ReadSeek`].
pub type BoxReadSeek = Box<dyn ReadSeek>;
