//! Unified error type for the streaming engine.
//!
//! All crates funnel their failures into [`Error`], which carries enough context
//! for HTTP handlers to derive a status code via [`Error::http_status`] and for
//! the session layer to decide whether a failure is worth reporting to the
//! client (cancellation never is).

use std::fmt;
use std::io;

/// Unified error type covering every failure kind of the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed request data (bad range syntax, missing stream id, ...).
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The requested entity could not be found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "stream", "attachment").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// The cache or session backing an operation has ended.
    #[error("Closed: {0}")]
    Closed(String),

    /// A remote `HEAD`/`GET` failed or answered with a non-success status.
    #[error("Upstream failure: {0}")]
    Upstream(String),

    /// The remote server ignored a `Range` request for a non-zero offset.
    #[error("Server does not support range requests at offset {offset}")]
    UnsupportedRange {
        /// Offset that was requested.
        offset: u64,
    },

    /// The source is not streamable video (wrong MIME, archive, ...).
    #[error("Unsupported content: {0}")]
    UnsupportedContent(String),

    /// Container or subtitle parsing failed.
    #[error("Parse error: {0}")]
    Parse(String),

    /// EOF was reached while scanning for a cluster.
    #[error("No cluster found after offset {offset}")]
    NoCluster {
        /// Offset the scan started from (after backoff).
        offset: u64,
    },

    /// The surrounding scope was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error to an appropriate HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::BadRequest(_) => 400,
            Error::NotFound { .. } => 404,
            Error::Closed(_) => 410,
            Error::Upstream(_) => 502,
            Error::UnsupportedRange { .. } => 502,
            Error::UnsupportedContent(_) => 415,
            Error::Parse(_) => 422,
            Error::NoCluster { .. } => 404,
            Error::Cancelled => 499,
            Error::Io { .. } => 500,
            Error::Internal(_) => 500,
        }
    }

    /// Short machine-readable code used in JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Error::BadRequest(_) => "bad_request",
            Error::NotFound { .. } => "not_found",
            Error::Closed(_) => "closed",
            Error::Upstream(_) => "upstream_failure",
            Error::UnsupportedRange { .. } => "unsupported_range",
            Error::UnsupportedContent(_) => "unsupported_content",
            Error::Parse(_) => "parse_failure",
            Error::NoCluster { .. } => "no_cluster",
            Error::Cancelled => "cancelled",
            Error::Io { .. } => "io_error",
            Error::Internal(_) => "internal_error",
        }
    }

    /// True for errors caused by a cancelled scope or a closed cache.
    ///
    /// Workers terminating with one of these are shutting down normally and
    /// should not surface an `Error` event to the client.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Error::Cancelled | Error::Closed(_))
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Wrap this error into an [`io::Error`] so it can travel through
    /// `Read`/`Seek` implementations and be recovered by `From<io::Error>`.
    pub fn into_io(self) -> io::Error {
        match self {
            Error::Io { source } => source,
            other => {
                let kind = match &other {
                    Error::Cancelled => io::ErrorKind::Interrupted,
                    Error::Closed(_) => io::ErrorKind::BrokenPipe,
                    Error::NoCluster { .. } => io::ErrorKind::UnexpectedEof,
                    _ => io::ErrorKind::Other,
                };
                io::Error::new(kind, other)
            }
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        // Recover errors that were tunnelled through `into_io`.
        if e.get_ref().is_some_and(|inner| inner.is::<Error>()) {
            if let Some(inner) = e.into_inner() {
                if let Ok(err) = inner.downcast::<Error>() {
                    return *err;
                }
            }
            return Error::Internal("failed to unwrap tunnelled error".into());
        }
        Error::Io { source: e }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display() {
        let err = Error::not_found("stream", "abc-123");
        assert_eq!(err.to_string(), "stream not found: abc-123");
        assert_eq!(err.http_status(), 404);
        assert_eq!(err.code(), "not_found");
    }

    #[test]
    fn bad_request_display() {
        let err = Error::BadRequest("missing id".into());
        assert_eq!(err.to_string(), "Bad request: missing id");
        assert_eq!(err.http_status(), 400);
    }

    #[test]
    fn unsupported_range_display() {
        let err = Error::UnsupportedRange { offset: 42 };
        assert!(err.to_string().contains("42"));
        assert_eq!(err.http_status(), 502);
    }

    #[test]
    fn unsupported_content_status() {
        let err = Error::UnsupportedContent("archive".into());
        assert_eq!(err.http_status(), 415);
        assert_eq!(err.code(), "unsupported_content");
    }

    #[test]
    fn shutdown_kinds() {
        assert!(Error::Cancelled.is_shutdown());
        assert!(Error::Closed("cache".into()).is_shutdown());
        assert!(!Error::Parse("bad".into()).is_shutdown());
    }

    #[test]
    fn io_from_std() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file missing");
        let err = Error::from(io_err);
        assert!(matches!(err, Error::Io { .. }));
        assert_eq!(err.http_status(), 500);
    }

    #[test]
    fn tunnelled_error_round_trips() {
        let io_err = Error::Closed("cache".into()).into_io();
        assert_eq!(io_err.kind(), io::ErrorKind::BrokenPipe);
        let back = Error::from(io_err);
        assert!(matches!(back, Error::Closed(ref m) if m == "cache"));
    }

    #[test]
    fn tunnelled_cancel_is_interrupted() {
        let io_err = Error::Cancelled.into_io();
        assert_eq!(io_err.kind(), io::ErrorKind::Interrupted);
        assert!(matches!(Error::from(io_err), Error::Cancelled));
    }

    #[test]
    fn io_variant_unwraps_to_source() {
        let io_err = Error::Io {
            source: io::Error::new(io::ErrorKind::TimedOut, "slow"),
        }
        .into_io();
        assert_eq!(io_err.kind(), io::ErrorKind::TimedOut);
    }
}
