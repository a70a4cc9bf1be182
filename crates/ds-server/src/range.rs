//! `Range` request parsing (RFC 7233, `bytes` unit only).

use std::fmt;

/// One satisfiable byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub length: u64,
}

impl ByteRange {
    /// Last byte covered (inclusive). Meaningless for zero-length ranges.
    pub fn end(&self) -> u64 {
        self.start + self.length.saturating_sub(1)
    }

    /// `Content-Range` value for this range of a `size`-byte resource.
    pub fn content_range(&self, size: u64) -> String {
        format!("bytes {}-{}/{size}", self.start, self.end())
    }

    /// True when the range is the whole resource.
    pub fn is_full(&self, size: u64) -> bool {
        self.start == 0 && self.length == size
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RangeError {
    #[error("invalid range")]
    Invalid,
    #[error("range does not overlap the content")]
    NoOverlap,
}

/// Parse a `Range` header value against a resource of `size` bytes.
///
/// An empty header yields no ranges. Ranges starting at or past `size` are
/// dropped; if every range was dropped the result is [`RangeError::NoOverlap`].
/// End positions past the resource are clamped.
pub fn parse_range(header: &str, size: u64) -> Result<Vec<ByteRange>, RangeError> {
    if header.is_empty() {
        return Ok(Vec::new());
    }
    let spec = header.strip_prefix("bytes=").ok_or(RangeError::Invalid)?;

    let mut ranges = Vec::new();
    let mut no_overlap = false;
    for part in spec.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (start, end) = part.split_once('-').ok_or(RangeError::Invalid)?;
        let (start, end) = (start.trim(), end.trim());

        if start.is_empty() {
            // Suffix range: the last `end` bytes.
            if end.is_empty() || end.starts_with('-') {
                return Err(RangeError::Invalid);
            }
            let suffix: u64 = end.parse().map_err(|_| RangeError::Invalid)?;
            if suffix == 0 || size == 0 {
                no_overlap = true;
                continue;
            }
            let suffix = suffix.min(size);
            ranges.push(ByteRange {
                start: size - suffix,
                length: suffix,
            });
            continue;
        }

        let first: u64 = start.parse().map_err(|_| RangeError::Invalid)?;
        if first >= size {
            no_overlap = true;
            continue;
        }
        let length = if end.is_empty() {
            size - first
        } else {
            let last: u64 = end.parse().map_err(|_| RangeError::Invalid)?;
            if first > last {
                return Err(RangeError::Invalid);
            }
            last.min(size - 1) - first + 1
        };
        ranges.push(ByteRange {
            start: first,
            length,
        });
    }

    if no_overlap && ranges.is_empty() {
        return Err(RangeError::NoOverlap);
    }
    Ok(ranges)
}

/// `bytes */<size>` for 416 responses.
pub fn unsatisfied_range(size: u64) -> String {
    format!("bytes */{size}")
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one(header: &str, size: u64) -> ByteRange {
        let ranges = parse_range(header, size).unwrap();
        assert_eq!(ranges.len(), 1, "{header}");
        ranges[0]
    }

    #[test]
    fn closed_range() {
        assert_eq!(one("bytes=0-1023", 1_048_576), ByteRange { start: 0, length: 1024 });
        assert_eq!(one("bytes=10-10", 100), ByteRange { start: 10, length: 1 });
    }

    #[test]
    fn open_range() {
        assert_eq!(one("bytes=500-", 1000), ByteRange { start: 500, length: 500 });
        assert!(one("bytes=0-", 1000).is_full(1000));
    }

    #[test]
    fn suffix_range() {
        assert_eq!(one("bytes=-100", 1000), ByteRange { start: 900, length: 100 });
        assert_eq!(one("bytes=-5000", 1000), ByteRange { start: 0, length: 1000 });
    }

    #[test]
    fn end_is_clamped() {
        assert_eq!(one("bytes=900-5000", 1000), ByteRange { start: 900, length: 100 });
    }

    #[test]
    fn invalid_syntax() {
        for header in ["items=0-1", "bytes=abc", "bytes=5-1", "bytes=-", "bytes=--5", "bytes=x-9"] {
            assert_eq!(parse_range(header, 1000), Err(RangeError::Invalid), "{header}");
        }
    }

    #[test]
    fn no_overlap() {
        assert_eq!(parse_range("bytes=1000-", 1000), Err(RangeError::NoOverlap));
        assert_eq!(parse_range("bytes=2000-3000", 1000), Err(RangeError::NoOverlap));
        assert_eq!(parse_range("bytes=-0", 1000), Err(RangeError::NoOverlap));
    }

    #[test]
    fn multi_range_keeps_order_and_drops_unsatisfiable() {
        let ranges = parse_range("bytes=0-9, 5000-6000, 20-29", 1000).unwrap();
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0], ByteRange { start: 0, length: 10 });
        assert_eq!(ranges[1], ByteRange { start: 20, length: 10 });
    }

    #[test]
    fn empty_header_means_whole_body() {
        assert!(parse_range("", 1000).unwrap().is_empty());
    }

    #[test]
    fn content_range_header() {
        let range = ByteRange { start: 0, length: 1024 };
        assert_eq!(range.content_range(1_048_576), "bytes 0-1023/1048576");
        assert_eq!(unsatisfied_range(77), "bytes */77");
    }
}
