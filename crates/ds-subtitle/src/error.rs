//! Error types for ds-subtitle

#[derive(Debug, thiserror::Error)]
pub enum SubtitleError {
    /// A packet or file could not be parsed
    #[error("Subtitle parse error: {0}")]
    Parse(String),

    /// The uploaded file extension is not a known subtitle format
    #[error("Unsupported subtitle format: {0}")]
    UnsupportedFormat(String),

    /// A PGS bitmap could not be encoded
    #[error("Image encoding failed: {0}")]
    Image(String),
}

impl From<SubtitleError> for ds_core::Error {
    fn from(e: SubtitleError) -> Self {
        match e {
            SubtitleError::UnsupportedFormat(_) => ds_core::Error::UnsupportedContent(e.to_string()),
            other => ds_core::Error::Parse(other.to_string()),
        }
    }
}
