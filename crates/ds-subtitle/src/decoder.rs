//! Per-track subtitle packet decoding.

use std::collections::HashMap;

use ds_media::Track;

use crate::ass;
use crate::error::SubtitleError;
use crate::event::SubtitleEvent;
use crate::html;
use crate::pgs::PgsDecoder;

pub const ASS_CODEC_ID: &str = "S_TEXT/ASS";
pub const SSA_CODEC_ID: &str = "S_TEXT/SSA";
pub const UTF8_CODEC_ID: &str = "S_TEXT/UTF8";
pub const WEBVTT_CODEC_ID: &str = "S_TEXT/WEBVTT";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Codec {
    Ass,
    Ssa,
    Text,
    Pgs,
}

impl Codec {
    fn from_id(codec_id: &str) -> Option<Self> {
        match codec_id {
            ASS_CODEC_ID => Some(Codec::Ass),
            SSA_CODEC_ID => Some(Codec::Ssa),
            UTF8_CODEC_ID | WEBVTT_CODEC_ID => Some(Codec::Text),
            crate::pgs::PGS_CODEC_ID => Some(Codec::Pgs),
            _ => None,
        }
    }
}

/// True for subtitle codecs this crate can decode.
pub fn is_supported_codec(codec_id: &str) -> bool {
    Codec::from_id(codec_id).is_some()
}

/// One subtitle block as handed over by the pump.
#[derive(Debug, Clone, Copy)]
pub struct SubtitlePacket<'a> {
    pub track: u64,
    pub data: &'a [u8],
    pub start_ms: f64,
    /// 0 when neither the block nor the track carries a duration.
    pub duration_ms: f64,
    pub head_pos: u64,
}

#[derive(Debug)]
struct TrackState {
    codec: Codec,
    pending: Option<SubtitleEvent>,
    pgs: Option<PgsDecoder>,
}

/// Decodes packets of every supported subtitle track of a file.
///
/// Events whose duration is unknown are held back until the next event of
/// the same track arrives, then emitted with the gap as their duration.
#[derive(Debug, Default)]
pub struct SubtitleDecoder {
    tracks: HashMap<u64, TrackState>,
}

impl SubtitleDecoder {
    /// Register every supported subtitle track; others are ignored.
    pub fn new<'a>(tracks: impl IntoIterator<Item = &'a Track>) -> Self {
        let mut decoder = Self::default();
        for track in tracks {
            if !track.is_subtitle() {
                continue;
            }
            let Some(codec) = Codec::from_id(&track.codec_id) else {
                tracing::debug!(track = track.number, codec = %track.codec_id, "Skipping unsupported subtitle codec");
                continue;
            };
            decoder.tracks.insert(
                track.number,
                TrackState {
                    codec,
                    pending: None,
                    pgs: (codec == Codec::Pgs).then(PgsDecoder::new),
                },
            );
        }
        decoder
    }

    pub fn handles(&self, track: u64) -> bool {
        self.tracks.contains_key(&track)
    }

    pub fn track_numbers(&self) -> impl Iterator<Item = u64> + '_ {
        self.tracks.keys().copied()
    }

    /// Decode one packet into zero or more events ready to ship.
    pub fn decode(&mut self, packet: SubtitlePacket<'_>) -> Result<Vec<SubtitleEvent>, SubtitleError> {
        let Some(state) = self.tracks.get_mut(&packet.track) else {
            return Ok(Vec::new());
        };

        let event = match state.codec {
            Codec::Pgs => {
                let Some(pgs) = state.pgs.as_mut() else {
                    return Ok(Vec::new());
                };
                return pgs.decode(packet.track, packet.data, packet.start_ms, packet.head_pos);
            }
            Codec::Ass | Codec::Ssa => {
                let body = String::from_utf8_lossy(packet.data);
                let ssa = state.codec == Codec::Ssa;
                let (text, extra) = ass::parse_block(&body, ssa);
                SubtitleEvent {
                    track_number: packet.track,
                    text,
                    start_time: packet.start_ms,
                    duration: packet.duration_ms,
                    codec_id: (if ssa { SSA_CODEC_ID } else { ASS_CODEC_ID }).to_string(),
                    extra_data: extra,
                    head_pos: packet.head_pos,
                }
            }
            Codec::Text => SubtitleEvent {
                track_number: packet.track,
                text: html::to_ass_text(&String::from_utf8_lossy(packet.data)),
                start_time: packet.start_ms,
                duration: packet.duration_ms,
                codec_id: ASS_CODEC_ID.to_string(),
                extra_data: ass::default_fields(),
                head_pos: packet.head_pos,
            },
        };

        let mut out = Vec::with_capacity(2);
        if let Some(mut prev) = state.pending.take() {
            prev.duration = (event.start_time - prev.start_time).max(0.0);
            out.push(prev);
        }
        if event.duration == 0.0 {
            state.pending = Some(event);
        } else {
            out.push(event);
        }
        Ok(out)
    }

    /// Release everything still held back, e.g. at end of stream.
    pub fn flush(&mut self) -> Vec<SubtitleEvent> {
        let mut out: Vec<SubtitleEvent> = self
            .tracks
            .values_mut()
            .filter_map(|state| {
                state
                    .pending
                    .take()
                    .or_else(|| state.pgs.as_mut().and_then(PgsDecoder::flush))
            })
            .collect();
        out.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ds_media::TrackKind;

    fn packet(track: u64, data: &[u8], start_ms: f64, duration_ms: f64) -> SubtitlePacket<'_> {
        SubtitlePacket {
            track,
            data,
            start_ms,
            duration_ms,
            head_pos: 77,
        }
    }

    fn decoder() -> SubtitleDecoder {
        let tracks = [
            Track::new(1, TrackKind::Video, "V_MPEG4/ISO/AVC"),
            Track::new(2, TrackKind::Subtitle, ASS_CODEC_ID),
            Track::new(3, TrackKind::Subtitle, UTF8_CODEC_ID),
            Track::new(4, TrackKind::Subtitle, crate::pgs::PGS_CODEC_ID),
            Track::new(5, TrackKind::Subtitle, "S_VOBSUB"),
        ];
        SubtitleDecoder::new(&tracks)
    }

    #[test]
    fn registers_supported_subtitle_tracks_only() {
        let d = decoder();
        assert!(!d.handles(1));
        assert!(d.handles(2) && d.handles(3) && d.handles(4));
        assert!(!d.handles(5));
        assert!(is_supported_codec("S_TEXT/SSA"));
        assert!(!is_supported_codec("S_VOBSUB"));
    }

    #[test]
    fn ass_packet_with_duration_is_emitted_directly() {
        let mut d = decoder();
        let events = d
            .decode(packet(2, b"1,0,Default,,0,0,0,,Hello, world", 1500.0, 2000.0))
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].text, "Hello, world");
        assert_eq!(events[0].extra_data["readorder"], "1");
        assert_eq!(events[0].codec_id, ASS_CODEC_ID);
        assert_eq!(events[0].head_pos, 77);
    }

    #[test]
    fn zero_duration_is_back_filled_from_next_event() {
        let mut d = decoder();
        assert!(d.decode(packet(2, b"1,0,Default,,0,0,0,,A", 1000.0, 0.0)).unwrap().is_empty());
        // Other tracks do not release it.
        d.decode(packet(3, b"x", 1200.0, 500.0)).unwrap();
        let events = d.decode(packet(2, b"2,0,Default,,0,0,0,,B", 2500.0, 0.0)).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].text, "A");
        assert_eq!(events[0].duration, 1500.0);

        let rest = d.flush();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].text, "B");
    }

    #[test]
    fn utf8_becomes_ass() {
        let mut d = decoder();
        let events = d.decode(packet(3, b"<i>Hi</i>\nthere", 0.0, 1000.0)).unwrap();
        assert_eq!(events[0].codec_id, ASS_CODEC_ID);
        assert_eq!(events[0].text, "{\\i1}Hi{\\i0}\\Nthere");
        assert_eq!(events[0].extra_data["style"], "Default");
    }

    #[test]
    fn unknown_track_is_ignored() {
        let mut d = decoder();
        assert!(d.decode(packet(5, b"ignored", 0.0, 1.0)).unwrap().is_empty());
        assert!(d.decode(packet(9, b"ignored", 0.0, 1.0)).unwrap().is_empty());
    }

    #[test]
    fn pgs_packets_go_through_the_bitmap_decoder() {
        use crate::pgs::tests::{clear_packet, image_packet};
        let mut d = decoder();
        assert!(d.decode(packet(4, &image_packet(0x80), 1000.0, 0.0)).unwrap().is_empty());
        let events = d.decode(packet(4, &clear_packet(0x00), 2000.0, 0.0)).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].duration, 1000.0);
        assert!(events[0].is_image());
    }
}
