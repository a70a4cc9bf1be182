//! `S_HDMV/PGS` bitmap subtitles.
//!
//! [`PgsDecoder`] keeps one track's palette, windows, object buffers and
//! active composition across packets. A completed display set is rendered
//! to a PNG and buffered; it is emitted once the next display set (or a
//! clearing composition) tells us how long it stayed on screen.

mod palette;
mod rle;
pub mod segment;

use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{ImageFormat, Rgba, RgbaImage};

use crate::error::SubtitleError;
use crate::event::SubtitleEvent;
use palette::Palette;
use segment::{Composition, CompositionState, ObjectFragment, Segment, Window};

pub use palette::ycbcr_to_rgb;

pub const PGS_CODEC_ID: &str = "S_HDMV/PGS";

#[derive(Debug, Default)]
struct ObjectBuffer {
    width: u16,
    height: u16,
    rle: Vec<u8>,
    pixels: Option<Vec<u8>>,
}

impl ObjectBuffer {
    fn pixels(&mut self) -> Result<&[u8], SubtitleError> {
        if self.pixels.is_none() {
            self.pixels = Some(rle::decode(&self.rle, self.width, self.height)?);
        }
        Ok(self.pixels.as_deref().unwrap_or_default())
    }
}

/// Per-track PGS state.
#[derive(Debug, Default)]
pub struct PgsDecoder {
    palette: Palette,
    windows: HashMap<u8, Window>,
    objects: HashMap<u16, ObjectBuffer>,
    composition: Option<Composition>,
    pending: Option<SubtitleEvent>,
}

impl PgsDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one packet; returns the events whose duration became known.
    pub fn decode(
        &mut self,
        track_number: u64,
        data: &[u8],
        start_ms: f64,
        head_pos: u64,
    ) -> Result<Vec<SubtitleEvent>, SubtitleError> {
        let mut out = Vec::new();
        for segment in segment::parse_segments(data)? {
            match segment {
                Segment::Composition(c) => self.on_composition(c, start_ms, &mut out),
                Segment::Windows(windows) => {
                    for w in windows {
                        self.windows.insert(w.id, w);
                    }
                }
                Segment::Palette { entries, .. } => self.palette.update(&entries),
                Segment::Object(fragment) => self.on_object(fragment),
                Segment::End => {
                    if let Some(event) = self.render(track_number, start_ms, head_pos)? {
                        if let Some(mut prev) = self.pending.take() {
                            prev.duration = (event.start_time - prev.start_time).max(0.0);
                            out.push(prev);
                        }
                        self.pending = Some(event);
                    }
                }
                Segment::Unknown(kind) => {
                    tracing::trace!(kind, "Skipping unknown PGS segment");
                }
            }
        }
        Ok(out)
    }

    /// The buffered image, if any, with its duration still unknown.
    pub fn flush(&mut self) -> Option<SubtitleEvent> {
        self.pending.take()
    }

    fn on_composition(&mut self, c: Composition, now_ms: f64, out: &mut Vec<SubtitleEvent>) {
        let clears = c.objects.is_empty()
            && matches!(
                c.state,
                CompositionState::Normal | CompositionState::AcquisitionPoint
            );
        if clears {
            if let Some(mut prev) = self.pending.take() {
                prev.duration = (now_ms - prev.start_time).max(0.0);
                out.push(prev);
            }
            self.composition = None;
            return;
        }
        if c.state == CompositionState::EpochStart {
            self.objects.clear();
            self.windows.clear();
        }
        self.composition = Some(c);
    }

    fn on_object(&mut self, fragment: ObjectFragment<'_>) {
        if fragment.sequence.starts() {
            let (width, height) = fragment.size.unwrap_or_default();
            self.objects.insert(
                fragment.object_id,
                ObjectBuffer {
                    width,
                    height,
                    rle: fragment.data.to_vec(),
                    pixels: None,
                },
            );
        } else if let Some(buffer) = self.objects.get_mut(&fragment.object_id) {
            buffer.rle.extend_from_slice(fragment.data);
            buffer.pixels = None;
        }
    }

    /// Composite the active composition into a PNG event.
    fn render(
        &mut self,
        track_number: u64,
        start_ms: f64,
        head_pos: u64,
    ) -> Result<Option<SubtitleEvent>, SubtitleError> {
        let Some(composition) = self.composition.take() else {
            return Ok(None);
        };

        struct Placed {
            object_id: u16,
            src_x: u32,
            src_y: u32,
            dst_x: u32,
            dst_y: u32,
            width: u32,
            height: u32,
        }

        let (canvas_w, canvas_h) = (composition.width as u32, composition.height as u32);
        if canvas_w as usize * canvas_h as usize > rle::MAX_PIXELS {
            return Err(SubtitleError::Parse(format!(
                "PGS canvas {canvas_w}x{canvas_h} is too large"
            )));
        }

        let mut placed = Vec::with_capacity(composition.objects.len());
        for obj in &composition.objects {
            let Some(buffer) = self.objects.get(&obj.object_id) else {
                tracing::debug!(object_id = obj.object_id, "PGS composition references a missing object");
                return Ok(None);
            };
            if buffer.width as u32 > canvas_w || buffer.height as u32 > canvas_h {
                return Err(SubtitleError::Parse(format!(
                    "PGS object {}x{} exceeds the {canvas_w}x{canvas_h} canvas",
                    buffer.width, buffer.height
                )));
            }
            let (src_x, src_y, width, height) = match obj.crop {
                Some(crop) => (
                    crop.x as u32,
                    crop.y as u32,
                    (crop.width.min(buffer.width.saturating_sub(crop.x))) as u32,
                    (crop.height.min(buffer.height.saturating_sub(crop.y))) as u32,
                ),
                None => (0, 0, buffer.width as u32, buffer.height as u32),
            };
            let (dst_x, dst_y) = (obj.x as u32, obj.y as u32);
            let width = width.min(canvas_w.saturating_sub(dst_x));
            let height = height.min(canvas_h.saturating_sub(dst_y));
            if width == 0 || height == 0 {
                continue;
            }
            placed.push(Placed {
                object_id: obj.object_id,
                src_x,
                src_y,
                dst_x,
                dst_y,
                width,
                height,
            });
        }

        let left = placed.iter().map(|p| p.dst_x).min().unwrap_or(0);
        let top = placed.iter().map(|p| p.dst_y).min().unwrap_or(0);
        let right = placed.iter().map(|p| p.dst_x + p.width).max().unwrap_or(0);
        let bottom = placed.iter().map(|p| p.dst_y + p.height).max().unwrap_or(0);
        if right <= left || bottom <= top {
            return Ok(None);
        }

        let mut img = RgbaImage::new(right - left, bottom - top);
        for p in &placed {
            let Some(buffer) = self.objects.get_mut(&p.object_id) else {
                continue;
            };
            let stride = buffer.width as u32;
            let pixels = buffer.pixels()?;
            for row in 0..p.height {
                for col in 0..p.width {
                    let index = ((p.src_y + row) * stride + p.src_x + col) as usize;
                    let Some(&color) = pixels.get(index) else {
                        continue;
                    };
                    let rgba = self.palette.rgba(color);
                    if rgba[3] == 0 {
                        continue;
                    }
                    img.put_pixel(p.dst_x - left + col, p.dst_y - top + row, Rgba(rgba));
                }
            }
        }

        let mut png = Cursor::new(Vec::new());
        img.write_to(&mut png, ImageFormat::Png)
            .map_err(|e| SubtitleError::Image(e.to_string()))?;
        let text = format!("data:image/png;base64,{}", STANDARD.encode(png.into_inner()));

        let mut extra = BTreeMap::from([
            ("type".to_string(), "image".to_string()),
            ("canvas_width".to_string(), composition.width.to_string()),
            ("canvas_height".to_string(), composition.height.to_string()),
            ("x".to_string(), left.to_string()),
            ("y".to_string(), top.to_string()),
            ("width".to_string(), (right - left).to_string()),
            ("height".to_string(), (bottom - top).to_string()),
        ]);
        if let Some(crop) = composition.objects.iter().find_map(|o| o.crop) {
            extra.insert("crop_x".into(), crop.x.to_string());
            extra.insert("crop_y".into(), crop.y.to_string());
            extra.insert("crop_width".into(), crop.width.to_string());
            extra.insert("crop_height".into(), crop.height.to_string());
        }

        // Keep the composition so a later palette-only update can redraw it.
        self.composition = Some(composition);

        Ok(Some(SubtitleEvent {
            track_number,
            text,
            start_time: start_ms,
            duration: 0.0,
            codec_id: PGS_CODEC_ID.to_string(),
            extra_data: extra,
            head_pos,
        }))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::segment::{END, ODS, PCS, PDS, WDS};
    use super::*;

    fn seg(kind: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![kind];
        out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    fn pcs(state: u8, objects: &[(u16, u16, u16)]) -> Vec<u8> {
        let mut p = vec![0x07, 0x80, 0x04, 0x38, 0x10, 0x00, 0x00, state, 0x00, 0x00];
        p.push(objects.len() as u8);
        for &(id, x, y) in objects {
            p.extend_from_slice(&id.to_be_bytes());
            p.push(0);
            p.push(0);
            p.extend_from_slice(&x.to_be_bytes());
            p.extend_from_slice(&y.to_be_bytes());
        }
        seg(PCS, &p)
    }

    /// A full display set: one 2x1 opaque white object at (100, 900).
    pub(crate) fn image_packet(state: u8) -> Vec<u8> {
        display_set(state, (100, 900), (2, 1))
    }

    /// One object of `size` at `pos` on the 1920x1080 canvas; its first
    /// line holds two pixels of colour 1.
    fn display_set(state: u8, pos: (u16, u16), size: (u16, u16)) -> Vec<u8> {
        let mut packet = pcs(state, &[(0, pos.0, pos.1)]);
        packet.extend(seg(WDS, &[1, 0, 0, 100, 3, 0x84, 0, 2, 0, 1]));
        packet.extend(seg(PDS, &[0, 0, 1, 235, 128, 128, 255]));
        let rle = [1u8, 1, 0, 0];
        let mut ods = vec![0, 0, 0, 0xC0];
        ods.extend_from_slice(&((rle.len() + 4) as u32).to_be_bytes()[1..]);
        ods.extend_from_slice(&size.0.to_be_bytes());
        ods.extend_from_slice(&size.1.to_be_bytes());
        ods.extend_from_slice(&rle);
        packet.extend(seg(ODS, &ods));
        packet.extend(seg(END, &[]));
        packet
    }

    pub(crate) fn clear_packet(state: u8) -> Vec<u8> {
        let mut packet = pcs(state, &[]);
        packet.extend(seg(END, &[]));
        packet
    }

    #[test]
    fn image_is_buffered_until_cleared() {
        let mut decoder = PgsDecoder::new();
        let events = decoder.decode(4, &image_packet(0x80), 1000.0, 10).unwrap();
        assert!(events.is_empty());

        let events = decoder.decode(4, &clear_packet(0x00), 3500.0, 20).unwrap();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.start_time, 1000.0);
        assert_eq!(event.duration, 2500.0);
        assert_eq!(event.head_pos, 10);
        assert_eq!(event.codec_id, PGS_CODEC_ID);
        assert!(event.text.starts_with("data:image/png;base64,"));
        assert!(event.is_image());
        assert_eq!(event.extra_data["canvas_width"], "1920");
        assert_eq!(event.extra_data["x"], "100");
        assert_eq!(event.extra_data["y"], "900");
        assert_eq!(event.extra_data["width"], "2");

        assert!(decoder.flush().is_none());
    }

    #[test]
    fn acquisition_point_also_clears() {
        let mut decoder = PgsDecoder::new();
        decoder.decode(4, &image_packet(0x80), 0.0, 0).unwrap();
        let events = decoder.decode(4, &clear_packet(0x40), 750.0, 0).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].duration, 750.0);
    }

    #[test]
    fn clear_without_buffered_image_emits_nothing() {
        let mut decoder = PgsDecoder::new();
        assert!(decoder.decode(4, &clear_packet(0x00), 100.0, 0).unwrap().is_empty());
    }

    #[test]
    fn next_image_flushes_previous() {
        let mut decoder = PgsDecoder::new();
        decoder.decode(4, &image_packet(0x80), 1000.0, 0).unwrap();
        let events = decoder.decode(4, &image_packet(0x80), 4000.0, 0).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].start_time, 1000.0);
        assert_eq!(events[0].duration, 3000.0);
        let pending = decoder.flush().unwrap();
        assert_eq!(pending.start_time, 4000.0);
        assert_eq!(pending.duration, 0.0);
    }

    #[test]
    fn object_larger_than_canvas_is_rejected() {
        let mut decoder = PgsDecoder::new();
        let result = decoder.decode(4, &display_set(0x80, (0, 0), (65535, 65535)), 0.0, 0);
        assert!(matches!(result, Err(SubtitleError::Parse(_))));
        assert!(decoder.flush().is_none());

        // The track keeps decoding afterwards.
        decoder.decode(4, &image_packet(0x80), 1000.0, 0).unwrap();
        assert!(decoder.flush().is_some());
    }

    #[test]
    fn placement_is_clipped_to_canvas() {
        let mut decoder = PgsDecoder::new();
        decoder.decode(4, &display_set(0x80, (1919, 1079), (2, 1)), 0.0, 0).unwrap();
        let event = decoder.flush().unwrap();
        assert_eq!(event.extra_data["x"], "1919");
        assert_eq!(event.extra_data["width"], "1");

        // Entirely off-canvas: nothing to show.
        decoder.decode(4, &display_set(0x80, (1920, 0), (2, 1)), 0.0, 0).unwrap();
        assert!(decoder.flush().is_none());
    }

    #[test]
    fn png_decodes_back_to_palette_colour() {
        let mut decoder = PgsDecoder::new();
        decoder.decode(1, &image_packet(0x80), 0.0, 0).unwrap();
        let event = decoder.flush().unwrap();
        let b64 = event.text.trim_start_matches("data:image/png;base64,");
        let png = STANDARD.decode(b64).unwrap();
        let img = image::load_from_memory(&png).unwrap().to_rgba8();
        assert_eq!(img.dimensions(), (2, 1));
        assert_eq!(img.get_pixel(0, 0).0, [235, 235, 235, 255]);
    }
}
