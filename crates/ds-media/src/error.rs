//! Error types for ds-media

/// Errors that can occur while demuxing a Matroska document.
#[derive(Debug, thiserror::Error)]
pub enum EbmlError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream does not start with an EBML header
    #[error("Invalid EBML header: {0}")]
    InvalidHeader(String),

    /// The EBML DocType is neither matroska nor webm
    #[error("Unsupported DocType: {0}")]
    UnsupportedDocType(String),

    /// An element could not be decoded
    #[error("Invalid element at offset {offset}: {reason}")]
    InvalidElement { offset: u64, reason: String },

    /// EOF was reached while scanning for a cluster
    #[error("No cluster found after offset {offset}")]
    NoCluster { offset: u64 },

    /// A compressed block could not be inflated
    #[error("Failed to decompress block: {0}")]
    Decompress(String),
}

impl EbmlError {
    pub(crate) fn invalid(offset: u64, reason: impl Into<String>) -> Self {
        EbmlError::InvalidElement {
            offset,
            reason: reason.into(),
        }
    }
}

impl From<EbmlError> for ds_core::Error {
    fn from(e: EbmlError) -> Self {
        match e {
            EbmlError::Io(source) => ds_core::Error::from(source),
            EbmlError::NoCluster { offset } => ds_core::Error::NoCluster { offset },
            other => ds_core::Error::Parse(other.to_string()),
        }
    }
}
