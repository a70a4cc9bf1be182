//! PGS run-length bitmap decoding.

use crate::error::SubtitleError;

/// Largest object or canvas accepted, in pixels.
pub const MAX_PIXELS: usize = 4096 * 2160;

/// Decode an object's RLE data into `width * height` palette indices.
///
/// Index 0 is used for transparent runs; lines that end early are padded
/// with it.
pub fn decode(data: &[u8], width: u16, height: u16) -> Result<Vec<u8>, SubtitleError> {
    let (width, height) = (width as usize, height as usize);
    if width * height > MAX_PIXELS {
        return Err(SubtitleError::Parse(format!(
            "PGS object {width}x{height} is too large"
        )));
    }
    let mut pixels = vec![0u8; width * height];
    let mut x = 0usize;
    let mut y = 0usize;
    let mut i = 0usize;

    let next = |i: &mut usize| -> Result<u8, SubtitleError> {
        let b = *data
            .get(*i)
            .ok_or_else(|| SubtitleError::Parse("truncated PGS RLE data".into()))?;
        *i += 1;
        Ok(b)
    };

    while i < data.len() && y < height {
        let first = next(&mut i)?;
        let (color, run) = if first != 0 {
            (first, 1)
        } else {
            let flag = next(&mut i)?;
            if flag == 0 {
                // End of line.
                x = 0;
                y += 1;
                continue;
            }
            let short = (flag & 0x3F) as usize;
            match flag >> 6 {
                0b00 => (0, short),
                0b01 => (0, (short << 8) | next(&mut i)? as usize),
                0b10 => (next(&mut i)?, short),
                _ => {
                    let len = (short << 8) | next(&mut i)? as usize;
                    (next(&mut i)?, len)
                }
            }
        };

        let row = y * width;
        let end = (x + run).min(width);
        if x < end {
            pixels[row + x..row + end].fill(color);
        }
        x = end;
    }
    Ok(pixels)
}
