use super::segment::PaletteEntry;

/// 256 RGBA colours; unset entries are fully transparent.
#[derive(Debug, Clone)]
pub struct Palette {
    colors: [[u8; 4]; 256],
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            colors: [[0; 4]; 256],
        }
    }
}

impl Palette {
    pub fn update(&mut self, entries: &[PaletteEntry]) {
        for e in entries {
            let [r, g, b] = ycbcr_to_rgb(e.y, e.cb, e.cr);
            self.colors[e.id as usize] = [r, g, b, e.alpha];
        }
    }

    pub fn rgba(&self, index: u8) -> [u8; 4] {
        self.colors[index as usize]
    }
}

/// Full-range BT.601 conversion, clamped to `0..=255`.
pub fn ycbcr_to_rgb(y: u8, cb: u8, cr: u8) -> [u8; 3] {
    let y = y as f32;
    let cb = cb as f32 - 128.0;
    let cr = cr as f32 - 128.0;
    let r = y + 1.402 * cr;
    let g = y - 0.344_136 * cb - 0.714_136 * cr;
    let b = y + 1.772 * cb;
    [clamp(r), clamp(g), clamp(b)]
}

fn clamp(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greys_and_clamping() {
        assert_eq!(ycbcr_to_rgb(235, 128, 128), [235, 235, 235]);
        assert_eq!(ycbcr_to_rgb(0, 128, 128), [0, 0, 0]);
        // Saturated red overshoots and is clamped.
        assert_eq!(ycbcr_to_rgb(255, 128, 255)[0], 255);
        assert_eq!(ycbcr_to_rgb(0, 0, 0)[2], 0);
    }

    #[test]
    fn update_sets_alpha() {
        let mut palette = Palette::default();
        palette.update(&[PaletteEntry {
            id: 3,
            y: 200,
            cr: 128,
            cb: 128,
            alpha: 0x80,
        }]);
        assert_eq!(palette.rgba(3), [200, 200, 200, 0x80]);
        assert_eq!(palette.rgba(4), [0, 0, 0, 0]);
    }
}
