//! Subtitle decoding and normalisation.
//!
//! Every packet coming out of the demuxer, whatever its codec, ends up as a
//! [`SubtitleEvent`]: ASS/SSA packets keep their dialogue fields, UTF-8 text
//! is rewritten as ASS markup and PGS bitmaps become PNG data URLs. Uploaded
//! subtitle files in other text formats are converted to a full ASS script.

pub mod ass;
pub mod convert;
pub mod decoder;
pub mod error;
pub mod event;
pub mod html;
pub mod pgs;

pub use convert::{convert_to_ass, language_from_filename, title_from_filename, SubtitleFormat};
pub use decoder::{is_supported_codec, SubtitleDecoder, SubtitlePacket};
pub use error::SubtitleError;
pub use event::SubtitleEvent;
pub use pgs::PgsDecoder;
