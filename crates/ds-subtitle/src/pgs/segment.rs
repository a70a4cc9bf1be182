//! HDMV presentation graphics segments.
//!
//! A Matroska `S_HDMV/PGS` block is a run of `(type u8, size u16be, payload)`
//! segments without the `PG` sync header used on Blu-ray discs.

use crate::error::SubtitleError;

pub const PDS: u8 = 0x14;
pub const ODS: u8 = 0x15;
pub const PCS: u8 = 0x16;
pub const WDS: u8 = 0x17;
pub const END: u8 = 0x80;

/// Composition state carried by a PCS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositionState {
    Normal,
    AcquisitionPoint,
    EpochStart,
    EpochContinue,
}

impl CompositionState {
    fn from_byte(b: u8) -> Self {
        match b & 0xC0 {
            0x40 => CompositionState::AcquisitionPoint,
            0x80 => CompositionState::EpochStart,
            0xC0 => CompositionState::EpochContinue,
            _ => CompositionState::Normal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crop {
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositionObject {
    pub object_id: u16,
    pub window_id: u8,
    pub x: u16,
    pub y: u16,
    pub crop: Option<Crop>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Composition {
    pub width: u16,
    pub height: u16,
    pub state: CompositionState,
    pub palette_update: bool,
    pub palette_id: u8,
    pub objects: Vec<CompositionObject>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub id: u8,
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
}

/// One palette entry as stored in the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaletteEntry {
    pub id: u8,
    pub y: u8,
    pub cr: u8,
    pub cb: u8,
    pub alpha: u8,
}

/// Position of an ODS fragment within its object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sequence {
    First,
    Last,
    Only,
    Middle,
}

impl Sequence {
    fn from_byte(b: u8) -> Self {
        match b & 0xC0 {
            0xC0 => Sequence::Only,
            0x80 => Sequence::First,
            0x40 => Sequence::Last,
            _ => Sequence::Middle,
        }
    }

    pub fn starts(self) -> bool {
        matches!(self, Sequence::First | Sequence::Only)
    }

    pub fn ends(self) -> bool {
        matches!(self, Sequence::Last | Sequence::Only)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectFragment<'a> {
    pub object_id: u16,
    pub sequence: Sequence,
    /// Set on the first fragment only.
    pub size: Option<(u16, u16)>,
    pub data: &'a [u8],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment<'a> {
    Palette {
        id: u8,
        entries: Vec<PaletteEntry>,
    },
    Object(ObjectFragment<'a>),
    Composition(Composition),
    Windows(Vec<Window>),
    End,
    Unknown(u8),
}

/// Split a packet into parsed segments.
pub fn parse_segments(mut data: &[u8]) -> Result<Vec<Segment<'_>>, SubtitleError> {
    let mut segments = Vec::new();
    while !data.is_empty() {
        if data.len() < 3 {
            return Err(SubtitleError::Parse("truncated PGS segment header".into()));
        }
        let kind = data[0];
        let size = u16::from_be_bytes([data[1], data[2]]) as usize;
        let payload = data
            .get(3..3 + size)
            .ok_or_else(|| SubtitleError::Parse(format!("PGS segment 0x{kind:02x} overruns packet")))?;
        segments.push(parse_segment(kind, payload)?);
        data = &data[3 + size..];
    }
    Ok(segments)
}

fn parse_segment(kind: u8, p: &[u8]) -> Result<Segment<'_>, SubtitleError> {
    let mut r = Cursor { data: p, pos: 0 };
    Ok(match kind {
        PDS => {
            let id = r.u8()?;
            let _version = r.u8()?;
            let mut entries = Vec::with_capacity(r.remaining() / 5);
            while r.remaining() >= 5 {
                entries.push(PaletteEntry {
                    id: r.u8()?,
                    y: r.u8()?,
                    cr: r.u8()?,
                    cb: r.u8()?,
                    alpha: r.u8()?,
                });
            }
            Segment::Palette { id, entries }
        }
        ODS => {
            let object_id = r.u16()?;
            let _version = r.u8()?;
            let sequence = Sequence::from_byte(r.u8()?);
            let size = if sequence.starts() {
                let _data_len = r.u24()?;
                Some((r.u16()?, r.u16()?))
            } else {
                None
            };
            Segment::Object(ObjectFragment {
                object_id,
                sequence,
                size,
                data: r.rest(),
            })
        }
        PCS => {
            let width = r.u16()?;
            let height = r.u16()?;
            let _frame_rate = r.u8()?;
            let _number = r.u16()?;
            let state = CompositionState::from_byte(r.u8()?);
            let palette_update = r.u8()? & 0x80 != 0;
            let palette_id = r.u8()?;
            let count = r.u8()?;
            let mut objects = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let object_id = r.u16()?;
                let window_id = r.u8()?;
                let cropped = r.u8()? & 0x80 != 0;
                let x = r.u16()?;
                let y = r.u16()?;
                let crop = if cropped {
                    Some(Crop {
                        x: r.u16()?,
                        y: r.u16()?,
                        width: r.u16()?,
                        height: r.u16()?,
                    })
                } else {
                    None
                };
                objects.push(CompositionObject {
                    object_id,
                    window_id,
                    x,
                    y,
                    crop,
                });
            }
            Segment::Composition(Composition {
                width,
                height,
                state,
                palette_update,
                palette_id,
                objects,
            })
        }
        WDS => {
            let count = r.u8()?;
            let mut windows = Vec::with_capacity(count as usize);
            for _ in 0..count {
                windows.push(Window {
                    id: r.u8()?,
                    x: r.u16()?,
                    y: r.u16()?,
                    width: r.u16()?,
                    height: r.u16()?,
                });
            }
            Segment::Windows(windows)
        }
        END => Segment::End,
        other => Segment::Unknown(other),
    })
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], SubtitleError> {
        let bytes = self
            .data
            .get(self.pos..self.pos + n)
            .ok_or_else(|| SubtitleError::Parse("truncated PGS segment".into()))?;
        self.pos += n;
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8, SubtitleError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, SubtitleError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u24(&mut self) -> Result<u32, SubtitleError> {
        let b = self.take(3)?;
        Ok(u32::from_be_bytes([0, b[0], b[1], b[2]]))
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn rest(&mut self) -> &'a [u8] {
        let rest = &self.data[self.pos..];
        self.pos = self.data.len();
        rest
    }
}
