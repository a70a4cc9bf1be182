//! EBML element header parsing and value decoding.
//!
//! Element IDs keep their length-marker bits (so `0x1F43B675` is a Cluster),
//! element sizes have the marker stripped. An all-ones size means "unknown"
//! and is reported as `None`.

pub mod ids;

use std::io::{self, Read, Seek, SeekFrom};

/// A parsed element header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementHeader {
    /// Element ID including marker bits.
    pub id: u32,
    /// Payload size, `None` when the size is unknown (live/streamed muxing).
    pub size: Option<u64>,
    /// Absolute offset of the first ID byte.
    pub offset: u64,
    /// Length of ID + size fields.
    pub header_len: u64,
}

impl ElementHeader {
    /// Absolute offset of the first payload byte.
    pub fn data_offset(&self) -> u64 {
        self.offset + self.header_len
    }

    /// Absolute offset one past the payload, if the size is known.
    pub fn end(&self) -> Option<u64> {
        self.size.map(|s| self.data_offset() + s)
    }
}

/// Read an element header from the current position.
///
/// Returns `Ok(None)` on a clean EOF before the first ID byte.
pub fn read_element_header<R: Read + Seek>(reader: &mut R) -> io::Result<Option<ElementHeader>> {
    let offset = reader.stream_position()?;

    let mut first = [0u8; 1];
    match reader.read_exact(&mut first) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let id_len = vint_length(first[0]).filter(|&l| l <= 4).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid element ID lead byte {:#04x} at {offset}", first[0]),
        )
    })?;
    let mut id = first[0] as u32;
    for _ in 1..id_len {
        id = (id << 8) | read_u8(reader)? as u32;
    }

    let size_lead = read_u8(reader)?;
    let size_len = vint_length(size_lead).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid element size lead byte {size_lead:#04x} at {offset}"),
        )
    })?;
    let mut size = (size_lead as u64) & (0xFF >> size_len);
    let mut all_ones = size == (0xFF >> size_len) as u64;
    for _ in 1..size_len {
        let b = read_u8(reader)?;
        all_ones &= b == 0xFF;
        size = (size << 8) | b as u64;
    }

    Ok(Some(ElementHeader {
        id,
        size: if all_ones { None } else { Some(size) },
        offset,
        header_len: (id_len + size_len) as u64,
    }))
}

/// Read the payload of an element with a known size.
pub fn read_payload<R: Read>(
    reader: &mut R,
    header: &ElementHeader,
    limit: u64,
) -> io::Result<Vec<u8>> {
    let size = header.size.ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("element {:#x} at {} has unknown size", header.id, header.offset),
        )
    })?;
    if size > limit {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "element {:#x} at {} is {size} bytes (limit {limit})",
                header.id, header.offset
            ),
        ));
    }
    let mut buf = vec![0u8; size as usize];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

/// Skip `n` bytes forward.
///
/// Small skips are consumed by reading so that sequential readers (HTTP
/// bodies) are not forced to reconnect; larger ones seek.
pub fn skip<R: Read + Seek>(reader: &mut R, n: u64, read_threshold: u64) -> io::Result<()> {
    if n == 0 {
        return Ok(());
    }
    if n <= read_threshold {
        let copied = io::copy(&mut reader.by_ref().take(n), &mut io::sink())?;
        if copied < n {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        Ok(())
    } else {
        reader.seek(SeekFrom::Current(n as i64))?;
        Ok(())
    }
}

/// Number of bytes in a vint given its first byte, or `None` for `0x00`.
pub fn vint_length(lead: u8) -> Option<usize> {
    if lead == 0 {
        None
    } else {
        Some(lead.leading_zeros() as usize + 1)
    }
}

/// Decode an unsigned vint (marker stripped) from the start of `buf`.
///
/// Returns the value and the number of bytes consumed.
pub fn vint_from_slice(buf: &[u8]) -> Option<(u64, usize)> {
    let lead = *buf.first()?;
    let len = vint_length(lead)?;
    if len > 8 || buf.len() < len {
        return None;
    }
    let mut value = (lead as u64) & (0xFF >> len);
    for b in &buf[1..len] {
        value = (value << 8) | *b as u64;
    }
    Some((value, len))
}

/// Decode a signed vint as used by EBML lacing deltas.
pub fn signed_vint_from_slice(buf: &[u8]) -> Option<(i64, usize)> {
    let (raw, len) = vint_from_slice(buf)?;
    let bias = (1i64 << (7 * len - 1)) - 1;
    Some((raw as i64 - bias, len))
}

/// Big-endian unsigned integer of 0..=8 bytes.
pub fn parse_uint(data: &[u8]) -> u64 {
    data.iter().take(8).fold(0u64, |acc, b| (acc << 8) | *b as u64)
}

/// Big-endian two's complement signed integer of 0..=8 bytes.
pub fn parse_int(data: &[u8]) -> i64 {
    if data.is_empty() {
        return 0;
    }
    let len = data.len().min(8);
    let raw = parse_uint(&data[..len]);
    let shift = 64 - (len as u32 * 8);
    ((raw << shift) as i64) >> shift
}

/// IEEE float of 0, 4 or 8 bytes.
pub fn parse_float(data: &[u8]) -> f64 {
    match data.len() {
        4 => f32::from_be_bytes([data[0], data[1], data[2], data[3]]) as f64,
        8 => f64::from_be_bytes([
            data[0], data[1], data[2], data[3], data[4], data[5], data[6], data[7],
        ]),
        _ => 0.0,
    }
}

/// UTF-8 (or ASCII) string, trailing NULs trimmed.
pub fn parse_string(data: &[u8]) -> String {
    let end = data.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
    String::from_utf8_lossy(&data[..end]).into_owned()
}

/// Iterate over the child elements contained in an in-memory payload.
///
/// Yields `(id, payload)` pairs and stops at the first malformed header.
pub fn children(data: &[u8]) -> ChildIter<'_> {
    ChildIter { data, pos: 0 }
}

pub struct ChildIter<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Iterator for ChildIter<'a> {
    type Item = (u32, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let rest = &self.data[self.pos..];
        let lead = *rest.first()?;
        let id_len = vint_length(lead).filter(|&l| l <= 4)?;
        if rest.len() < id_len {
            return None;
        }
        let id = rest[..id_len].iter().fold(0u32, |acc, b| (acc << 8) | *b as u32);
        let (size, size_len) = vint_from_slice(&rest[id_len..])?;
        let start = id_len + size_len;
        let end = start.checked_add(size as usize)?;
        // Unknown or overlong sizes are clamped to the parent payload.
        let end = end.min(rest.len());
        self.pos += end;
        Some((id, &rest[start..end]))
    }
}

fn read_u8<R: Read>(reader: &mut R) -> io::Result<u8> {
    let mut buf = [0u8; 1];
    reader.read_exact(&mut buf)?;
    Ok(buf[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn header_with_four_byte_id() {
        let data = [0x1F, 0x43, 0xB6, 0x75, 0x84, 1, 2, 3, 4];
        let mut cursor = Cursor::new(&data[..]);
        let header = read_element_header(&mut cursor).unwrap().unwrap();
        assert_eq!(header.id, ids::CLUSTER);
        assert_eq!(header.size, Some(4));
        assert_eq!(header.header_len, 5);
        assert_eq!(header.data_offset(), 5);
        assert_eq!(header.end(), Some(9));
    }

    #[test]
    fn header_unknown_size() {
        let data = [0x18, 0x53, 0x80, 0x67, 0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];
        let mut cursor = Cursor::new(&data[..]);
        let header = read_element_header(&mut cursor).unwrap().unwrap();
        assert_eq!(header.id, ids::SEGMENT);
        assert_eq!(header.size, None);
        assert_eq!(header.header_len, 12);
    }

    #[test]
    fn header_one_byte_unknown_size() {
        let data = [0x1F, 0x43, 0xB6, 0x75, 0xFF];
        let mut cursor = Cursor::new(&data[..]);
        let header = read_element_header(&mut cursor).unwrap().unwrap();
        assert_eq!(header.size, None);
    }

    #[test]
    fn header_eof_is_none() {
        let mut cursor = Cursor::new(&[][..]);
        assert!(read_element_header(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn header_zero_lead_is_error() {
        let mut cursor = Cursor::new(&[0x00, 0x81][..]);
        assert!(read_element_header(&mut cursor).is_err());
    }

    #[test]
    fn vint_decoding() {
        assert_eq!(vint_from_slice(&[0x81]), Some((1, 1)));
        assert_eq!(vint_from_slice(&[0x40, 0x02]), Some((2, 2)));
        assert_eq!(vint_from_slice(&[0x10, 0x00, 0x00, 0x05]), Some((5, 4)));
        assert_eq!(vint_from_slice(&[0x40]), None);
        assert_eq!(vint_from_slice(&[]), None);
    }

    #[test]
    fn signed_vint_decoding() {
        // 0xBF = 63 raw, bias 63 -> 0
        assert_eq!(signed_vint_from_slice(&[0xBF]), Some((0, 1)));
        assert_eq!(signed_vint_from_slice(&[0x80]), Some((-63, 1)));
        assert_eq!(signed_vint_from_slice(&[0xC0]), Some((1, 1)));
    }

    #[test]
    fn integer_values() {
        assert_eq!(parse_uint(&[0x0F, 0x42, 0x40]), 1_000_000);
        assert_eq!(parse_uint(&[]), 0);
        assert_eq!(parse_int(&[0xFF, 0xFE]), -2);
        assert_eq!(parse_int(&[0x00, 0x10]), 16);
    }

    #[test]
    fn float_values() {
        assert_eq!(parse_float(&1500.0f32.to_be_bytes()), 1500.0);
        assert_eq!(parse_float(&42.5f64.to_be_bytes()), 42.5);
        assert_eq!(parse_float(&[1, 2]), 0.0);
    }

    #[test]
    fn strings_trim_nul_padding() {
        assert_eq!(parse_string(b"webm\0\0"), "webm");
        assert_eq!(parse_string(b""), "");
    }

    #[test]
    fn child_iteration() {
        let data = [0x86, 0x82, b'V', b'1', 0xD7, 0x81, 0x02];
        let items: Vec<_> = children(&data).collect();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0], (0x86, &b"V1"[..]));
        assert_eq!(items[1], (0xD7, &[0x02][..]));
    }

    #[test]
    fn skip_by_reading_and_seeking() {
        let data = vec![0u8; 100];
        let mut cursor = Cursor::new(&data[..]);
        skip(&mut cursor, 10, 64).unwrap();
        assert_eq!(cursor.position(), 10);
        skip(&mut cursor, 80, 64).unwrap();
        assert_eq!(cursor.position(), 90);
        assert!(skip(&mut cursor, 20, 64).is_err());
    }
}
