//! RFC-6381 codec tags for Matroska codec IDs.

use crate::metadata::{Track, TrackKind};

/// Map a Matroska codec ID to its RFC-6381 tag.
///
/// Unknown codec IDs degrade to the lowercased codec ID.
pub fn rfc6381_tag(codec_id: &str) -> String {
    let tag = match codec_id {
        "V_MPEGH/ISO/HEVC" => "hvc1",
        "V_MPEG4/ISO/AVC" => "avc1",
        "V_AV1" => "av01",
        "V_VP9" => "vp09",
        "V_VP8" => "vp8",
        "A_AAC" | "A_AAC/MPEG2/LC" | "A_AAC/MPEG4/LC" | "A_AAC/MPEG4/LC/SBR" => "mp4a.40.2",
        "A_AC3" => "ac-3",
        "A_EAC3" => "ec-3",
        "A_OPUS" => "opus",
        "A_DTS" | "A_DTS/EXPRESS" | "A_DTS/LOSSLESS" => "dts",
        "A_FLAC" => "flac",
        "A_TRUEHD" | "A_MLP" => "mlp",
        "A_VORBIS" => "vorbis",
        "A_MPEG/L3" => "mp3",
        other => return other.to_lowercase(),
    };
    tag.to_string()
}

/// Build `video/x-matroska; codecs="..."` from the video and audio tracks.
///
/// Subtitle and other tracks do not contribute; duplicate tags are joined once.
pub fn mime_codec(tracks: &[Track]) -> String {
    let mut tags: Vec<String> = Vec::new();
    for track in tracks
        .iter()
        .filter(|t| matches!(t.kind, TrackKind::Video | TrackKind::Audio))
    {
        let tag = rfc6381_tag(&track.codec_id);
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    format!("video/x-matroska; codecs=\"{}\"", tags.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_tags() {
        assert_eq!(rfc6381_tag("V_MPEGH/ISO/HEVC"), "hvc1");
        assert_eq!(rfc6381_tag("V_MPEG4/ISO/AVC"), "avc1");
        assert_eq!(rfc6381_tag("V_AV1"), "av01");
        assert_eq!(rfc6381_tag("V_VP9"), "vp09");
        assert_eq!(rfc6381_tag("A_AAC"), "mp4a.40.2");
        assert_eq!(rfc6381_tag("A_AC3"), "ac-3");
        assert_eq!(rfc6381_tag("A_EAC3"), "ec-3");
        assert_eq!(rfc6381_tag("A_OPUS"), "opus");
        assert_eq!(rfc6381_tag("A_DTS"), "dts");
        assert_eq!(rfc6381_tag("A_FLAC"), "flac");
        assert_eq!(rfc6381_tag("A_TRUEHD"), "mlp");
    }

    #[test]
    fn unknown_tag_is_lowercased() {
        assert_eq!(rfc6381_tag("V_MS/VFW/FOURCC"), "v_ms/vfw/fourcc");
    }

    #[test]
    fn mime_codec_joins_av_tracks() {
        let tracks = vec![
            Track::new(1, TrackKind::Video, "V_MPEGH/ISO/HEVC"),
            Track::new(2, TrackKind::Audio, "A_AAC"),
            Track::new(3, TrackKind::Audio, "A_AAC"),
            Track::new(4, TrackKind::Subtitle, "S_TEXT/ASS"),
        ];
        assert_eq!(
            mime_codec(&tracks),
            "video/x-matroska; codecs=\"hvc1,mp4a.40.2\""
        );
    }
}
