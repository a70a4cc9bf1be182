//! Content-type resolution: extension table, EBML DocType sniffing and
//! normalisation of server-provided types.

use crate::ebml::ids::EBML_MAGIC;

/// Number of leading bytes inspected by [`sniff_ebml`].
pub const SNIFF_LEN: usize = 1024;

/// Content type for a file extension (without the dot).
///
/// `.mkv` deliberately maps to `video/webm`: HTML media elements accept the
/// WebM type far more uniformly than `video/x-matroska`.
pub fn content_type_for_extension(ext: &str) -> Option<&'static str> {
    match ext.to_ascii_lowercase().as_str() {
        "mp4" => Some("video/mp4"),
        "mkv" => Some("video/webm"),
        "webm" | "m4v" => Some("video/webm"),
        "avi" => Some("video/x-msvideo"),
        "mov" => Some("video/quicktime"),
        "flv" => Some("video/x-flv"),
        _ => None,
    }
}

/// Content type for a path or URL path, by its extension.
pub fn content_type_for_path(path: &str) -> Option<&'static str> {
    let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    let (_, ext) = name.rsplit_once('.')?;
    content_type_for_extension(ext)
}

/// Detect Matroska/WebM from the leading bytes of a file.
///
/// Requires the EBML magic at offset 0 and a `DocType` element whose string
/// starts at most three bytes after the `42 82` ID.
pub fn sniff_ebml(buf: &[u8]) -> Option<&'static str> {
    let buf = &buf[..buf.len().min(SNIFF_LEN)];
    if buf.len() < 4 || buf[..4] != EBML_MAGIC {
        return None;
    }

    let id_pos = buf.windows(2).position(|w| w == [0x42, 0x82])?;
    let after = &buf[id_pos + 2..];
    for skip in 0..=3usize.min(after.len()) {
        let candidate = &after[skip..];
        if candidate.starts_with(b"matroska") {
            return Some("video/x-matroska");
        }
        if candidate.starts_with(b"webm") {
            return Some("video/webm");
        }
    }
    None
}

/// Strip parameters, lowercase, and rewrite download types.
pub fn normalize_content_type(value: &str) -> String {
    let base = value.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    if base == "application/force-download" {
        return "application/octet-stream".into();
    }
    base
}

/// Best-effort detection for bytes without a declared type.
pub fn sniff_content_type(buf: &[u8]) -> &'static str {
    if let Some(mime) = sniff_ebml(buf) {
        return mime;
    }
    if buf.len() >= 8 && &buf[4..8] == b"ftyp" {
        return "video/mp4";
    }
    if buf.len() >= 12 && &buf[..4] == b"RIFF" && &buf[8..12] == b"AVI " {
        return "video/x-msvideo";
    }
    if buf.starts_with(b"FLV") {
        return "video/x-flv";
    }
    if buf.starts_with(b"PK\x03\x04") {
        return "application/zip";
    }
    if buf.starts_with(b"Rar!") {
        return "application/x-rar-compressed";
    }
    let head = String::from_utf8_lossy(&buf[..buf.len().min(64)]).to_ascii_lowercase();
    if head.trim_start().starts_with("<!doctype html") || head.trim_start().starts_with("<html") {
        return "text/html";
    }
    "application/octet-stream"
}

/// Archive extensions that can never be streamed.
pub fn is_archive_path(path: &str) -> bool {
    let lower = path
        .split(['?', '#'])
        .next()
        .unwrap_or(path)
        .to_ascii_lowercase();
    [".zip", ".rar", ".7z", ".tar", ".gz", ".tgz"]
        .iter()
        .any(|ext| lower.ends_with(ext))
}

/// Whether a resolved content type can be handed to a video element.
pub fn is_streamable_type(content_type: &str) -> bool {
    let base = normalize_content_type(content_type);
    base.starts_with("video/")
        || base == "application/octet-stream"
        || base == "application/x-matroska"
        || base == "binary/octet-stream"
}
