//! Low-level byte helpers shared by the request codec, the client's frame
//! reassembly and the protocol emulator.

use crate::errors::C3Error;

/// Appends a u16 big-endian code-unit count followed by the UTF-16
/// little-endian encoding of `text`.
pub fn put_utf16(frame: &mut Vec<u8>, text: &str) {
    let units: Vec<u16> = text.encode_utf16().collect();
    frame.extend_from_slice(&(units.len() as u16).to_be_bytes());
    for unit in units {
        frame.extend_from_slice(&unit.to_le_bytes());
    }
}

/// Splits one complete frame off the front of a reassembly buffer, if the
/// 4-byte header and full body have arrived. TCP delivery boundaries carry
/// no meaning; zero or more frames complete per socket read.
pub fn take_frame(assembly: &mut Vec<u8>) -> Option<Vec<u8>> {
    if assembly.len() < 4 {
        return None;
    }
    let body_len = u16::from_be_bytes([assembly[2], assembly[3]]) as usize;
    let total = 4 + body_len;
    if assembly.len() < total {
        return None;
    }
    Some(assembly.drain(..total).collect())
}

/// Cursor over a received frame with bounds-checked big-endian reads.
pub struct FrameReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> FrameReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn take(&mut self, len: usize, field: &str) -> Result<&'a [u8], C3Error> {
        if self.offset + len > self.data.len() {
            return Err(C3Error::Decode(format!(
                "frame truncated reading {field} at offset {}",
                self.offset
            )));
        }
        let slice = &self.data[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    pub fn read_u8(&mut self, field: &str) -> Result<u8, C3Error> {
        Ok(self.take(1, field)?[0])
    }

    pub fn read_u16(&mut self, field: &str) -> Result<u16, C3Error> {
        let bytes = self.take(2, field)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    /// Length-prefixed UTF-16 LE string.
    pub fn read_utf16_string(&mut self, field: &str) -> Result<String, C3Error> {
        let unit_count = self.read_u16(field)? as usize;
        let bytes = self.take(unit_count * 2, field)?;
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16(&units)
            .map_err(|err| C3Error::Decode(format!("{field} is not valid UTF-16: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_frame_waits_for_full_body() {
        let mut assembly = vec![0x00, 0x01, 0x00, 0x04, 0xAA];
        assert!(take_frame(&mut assembly).is_none());
        assembly.extend_from_slice(&[0xBB, 0xCC, 0xDD]);
        let frame = take_frame(&mut assembly).unwrap();
        assert_eq!(frame.len(), 8);
        assert!(assembly.is_empty());
    }

    #[test]
    fn take_frame_splits_coalesced_frames() {
        // Two frames delivered in one read.
        let mut assembly = vec![
            0x00, 0x01, 0x00, 0x01, 0x04, // frame 1
            0x00, 0x02, 0x00, 0x02, 0x05, 0x06, // frame 2
        ];
        let first = take_frame(&mut assembly).unwrap();
        assert_eq!(first, vec![0x00, 0x01, 0x00, 0x01, 0x04]);
        let second = take_frame(&mut assembly).unwrap();
        assert_eq!(second, vec![0x00, 0x02, 0x00, 0x02, 0x05, 0x06]);
        assert!(take_frame(&mut assembly).is_none());
    }

    #[test]
    fn utf16_string_round_trip() {
        let mut frame = Vec::new();
        put_utf16(&mut frame, "$AXIS_ACT");
        let mut reader = FrameReader::new(&frame);
        assert_eq!(reader.read_utf16_string("name").unwrap(), "$AXIS_ACT");
    }
}
