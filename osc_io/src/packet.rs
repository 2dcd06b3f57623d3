use crate::error::OscError;

/// One typed OSC argument. Only the four numeric tags the gateway speaks
/// are representable; anything else fails at parse time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OscValue {
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
}

impl OscValue {
    fn type_tag(&self) -> u8 {
        match self {
            OscValue::Int32(_) => b'i',
            OscValue::Int64(_) => b'h',
            OscValue::Float32(_) => b'f',
            OscValue::Float64(_) => b'd',
        }
    }

    fn write_payload(&self, out: &mut Vec<u8>) {
        match self {
            OscValue::Int32(v) => out.extend_from_slice(&v.to_be_bytes()),
            OscValue::Int64(v) => out.extend_from_slice(&v.to_be_bytes()),
            OscValue::Float32(v) => out.extend_from_slice(&v.to_be_bytes()),
            OscValue::Float64(v) => out.extend_from_slice(&v.to_be_bytes()),
        }
    }
}

/// An OSC 1.0 message: an address path plus a typed argument list.
#[derive(Debug, Clone, PartialEq)]
pub struct OscPacket {
    path: String,
    values: Vec<OscValue>,
}

impl OscPacket {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            values: Vec::new(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn values(&self) -> &[OscValue] {
        &self.values
    }

    pub fn append(&mut self, value: OscValue) {
        self.values.push(value);
    }

    /// Parses one UDP datagram. Anything that is not a plain message with
    /// `i`/`h`/`f`/`d` arguments is rejected.
    pub fn parse(data: &[u8]) -> Result<Self, OscError> {
        if data.len() < 8 {
            return Err(OscError::ShortPacket(data.len()));
        }

        let mut offset = 0;
        let path = read_padded_string(data, &mut offset)?;
        let tags = read_padded_string(data, &mut offset)?;
        let tags = tags
            .strip_prefix(',')
            .ok_or(OscError::MissingTypeTags)?;

        let mut values = Vec::with_capacity(tags.len());
        for tag in tags.chars() {
            let value = match tag {
                'i' => OscValue::Int32(i32::from_be_bytes(read_quad(data, &mut offset)?)),
                'f' => OscValue::Float32(f32::from_be_bytes(read_quad(data, &mut offset)?)),
                'h' => OscValue::Int64(i64::from_be_bytes(read_octet(data, &mut offset)?)),
                'd' => OscValue::Float64(f64::from_be_bytes(read_octet(data, &mut offset)?)),
                other => return Err(OscError::UnsupportedTypeTag(other)),
            };
            values.push(value);
        }

        Ok(Self { path, values })
    }

    /// Serializes the message with 4-byte alignment padding.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.path.len() + 8 + self.values.len() * 8);
        write_padded_string(&self.path, &mut out);

        // Tag string padded like any OSC string.
        let mut tags = String::with_capacity(self.values.len() + 1);
        tags.push(',');
        for value in &self.values {
            tags.push(value.type_tag() as char);
        }
        write_padded_string(&tags, &mut out);

        for value in &self.values {
            value.write_payload(&mut out);
        }
        out
    }
}

fn pad4(len: usize) -> usize {
    (4 - (len % 4)) % 4
}

/// Reads a NUL-terminated string and skips its alignment padding.
fn read_padded_string(data: &[u8], offset: &mut usize) -> Result<String, OscError> {
    let start = *offset;
    let remainder = data.get(start..).ok_or(OscError::UnterminatedString)?;
    let nul = remainder
        .iter()
        .position(|&b| b == 0)
        .ok_or(OscError::UnterminatedString)?;
    let text = String::from_utf8_lossy(&remainder[..nul]).into_owned();

    // Consumed bytes include the terminator before padding is applied.
    let consumed = nul + 1;
    *offset = start + consumed + pad4(consumed);
    Ok(text)
}

fn write_padded_string(text: &str, out: &mut Vec<u8>) {
    // Truncate at an embedded NUL, matching how the string will read back.
    let text = text.split('\0').next().unwrap_or_default();
    out.extend_from_slice(text.as_bytes());
    out.push(0);
    for _ in 0..pad4(text.len() + 1) {
        out.push(0);
    }
}

fn read_quad(data: &[u8], offset: &mut usize) -> Result<[u8; 4], OscError> {
    let bytes = data
        .get(*offset..*offset + 4)
        .ok_or(OscError::TruncatedArguments)?;
    *offset += 4;
    Ok([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn read_octet(data: &[u8], offset: &mut usize) -> Result<[u8; 8], OscError> {
    let bytes = data
        .get(*offset..*offset + 8)
        .ok_or(OscError::TruncatedArguments)?;
    *offset += 8;
    let mut out = [0u8; 8];
    out.copy_from_slice(bytes);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_path_and_types() {
        let mut packet = OscPacket::new("/bot1/pos");
        packet.append(OscValue::Int32(5));
        packet.append(OscValue::Int64(-9));
        packet.append(OscValue::Float32(1.25));
        packet.append(OscValue::Float64(-2.5));

        let parsed = OscPacket::parse(&packet.to_bytes()).unwrap();
        assert_eq!(parsed.path(), "/bot1/pos");
        assert_eq!(
            parsed.values(),
            &[
                OscValue::Int32(5),
                OscValue::Int64(-9),
                OscValue::Float32(1.25),
                OscValue::Float64(-2.5),
            ]
        );
    }

    #[test]
    fn wire_layout_is_four_byte_aligned() {
        let mut packet = OscPacket::new("/ab"); // 3 bytes + NUL -> no padding
        packet.append(OscValue::Float32(0.0));
        let bytes = packet.to_bytes();
        assert_eq!(&bytes[0..4], b"/ab\0");
        // ",f" + NUL padded to 4.
        assert_eq!(&bytes[4..8], b",f\0\0");
        assert_eq!(bytes.len(), 12);
        assert_eq!(bytes.len() % 4, 0);

        let long = OscPacket::new("/abcd").to_bytes();
        // 5 bytes + NUL padded to 8, then ",\0\0\0".
        assert_eq!(&long[0..8], b"/abcd\0\0\0");
        assert_eq!(long.len(), 12);
    }

    #[test]
    fn six_float_message_parses() {
        let mut packet = OscPacket::new("/axis");
        for i in 0..6 {
            packet.append(OscValue::Float32(i as f32 * 10.0));
        }
        let parsed = OscPacket::parse(&packet.to_bytes()).unwrap();
        assert_eq!(parsed.values().len(), 6);
        assert_eq!(parsed.values()[3], OscValue::Float32(30.0));
    }

    #[test]
    fn short_datagram_is_rejected() {
        assert_eq!(
            OscPacket::parse(&[0x2F, 0x61, 0x00, 0x00]),
            Err(OscError::ShortPacket(4))
        );
    }

    #[test]
    fn unsupported_tag_is_rejected() {
        let mut bytes = Vec::new();
        write_padded_string("/x", &mut bytes);
        write_padded_string(",s", &mut bytes);
        bytes.extend_from_slice(b"abc\0");
        assert_eq!(
            OscPacket::parse(&bytes),
            Err(OscError::UnsupportedTypeTag('s'))
        );
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let mut bytes = Vec::new();
        write_padded_string("/x", &mut bytes);
        write_padded_string(",ii", &mut bytes);
        bytes.extend_from_slice(&1i32.to_be_bytes());
        assert_eq!(OscPacket::parse(&bytes), Err(OscError::TruncatedArguments));
    }

    #[test]
    fn missing_comma_is_rejected() {
        let mut bytes = Vec::new();
        write_padded_string("/x", &mut bytes);
        write_padded_string("ii", &mut bytes);
        assert_eq!(OscPacket::parse(&bytes), Err(OscError::MissingTypeTags));
    }
}
