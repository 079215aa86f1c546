//! Packet framing and payload codecs.
//!
//! Every packet starts with an 11-byte header: length (including the header),
//! id, flags, and then either a command set/command pair or a reply error code.
//! All multi-byte quantities are big-endian.

use super::{tag, JdwpError, Location, ObjectId, Value};
use std::io::Read;

pub const HEADER_LEN: usize = 11;
pub const REPLY_FLAG: u8 = 0x80;

/// Upper bound on a single packet body, to avoid allocating on a corrupt length.
const MAX_PACKET_LEN: usize = 64 * 1024 * 1024;

/// Widths of the variable-sized identifiers, as reported by `VirtualMachine.IDSizes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdSizes {
    pub field: usize,
    pub method: usize,
    pub object: usize,
    pub reference_type: usize,
    pub frame: usize,
}

impl Default for IdSizes {
    fn default() -> Self {
        Self {
            field: 8,
            method: 8,
            object: 8,
            reference_type: 8,
            frame: 8,
        }
    }
}

/// A command sent by either side (events from the VM are commands too).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPacket {
    pub id: u32,
    pub command_set: u8,
    pub command: u8,
    pub data: Vec<u8>,
}

/// A reply to a previously sent command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyPacket {
    pub id: u32,
    pub error_code: u16,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Command(CommandPacket),
    Reply(ReplyPacket),
}

impl CommandPacket {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.data.len());
        out.extend_from_slice(&((HEADER_LEN + self.data.len()) as u32).to_be_bytes());
        out.extend_from_slice(&self.id.to_be_bytes());
        out.push(0);
        out.push(self.command_set);
        out.push(self.command);
        out.extend_from_slice(&self.data);
        out
    }
}

impl ReplyPacket {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.data.len());
        out.extend_from_slice(&((HEADER_LEN + self.data.len()) as u32).to_be_bytes());
        out.extend_from_slice(&self.id.to_be_bytes());
        out.push(REPLY_FLAG);
        out.extend_from_slice(&self.error_code.to_be_bytes());
        out.extend_from_slice(&self.data);
        out
    }
}

impl Packet {
    /// Read one complete packet from `reader`.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Packet, JdwpError> {
        let mut header = [0u8; HEADER_LEN];
        reader.read_exact(&mut header)?;

        let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        if !(HEADER_LEN..=MAX_PACKET_LEN).contains(&length) {
            return Err(JdwpError::Malformed(format!(
                "packet length {length} out of range"
            )));
        }

        let id = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
        let flags = header[8];

        let mut data = vec![0u8; length - HEADER_LEN];
        reader.read_exact(&mut data)?;

        if flags & REPLY_FLAG != 0 {
            Ok(Packet::Reply(ReplyPacket {
                id,
                error_code: u16::from_be_bytes([header[9], header[10]]),
                data,
            }))
        } else {
            Ok(Packet::Command(CommandPacket {
                id,
                command_set: header[9],
                command: header[10],
                data,
            }))
        }
    }
}

/// Builder for command payloads.
#[derive(Debug)]
pub struct PacketWriter {
    buf: Vec<u8>,
    sizes: IdSizes,
}

impl PacketWriter {
    pub fn new(sizes: IdSizes) -> Self {
        Self {
            buf: Vec::new(),
            sizes,
        }
    }

    pub fn u8(mut self, v: u8) -> Self {
        self.buf.push(v);
        self
    }

    pub fn bool(self, v: bool) -> Self {
        self.u8(u8::from(v))
    }

    pub fn i32(mut self, v: i32) -> Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn u64(mut self, v: u64) -> Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn string(mut self, s: &str) -> Self {
        self.buf
            .extend_from_slice(&(s.len() as u32).to_be_bytes());
        self.buf.extend_from_slice(s.as_bytes());
        self
    }

    fn id(mut self, v: u64, width: usize) -> Self {
        let bytes = v.to_be_bytes();
        self.buf.extend_from_slice(&bytes[8 - width.min(8)..]);
        self
    }

    pub fn object_id(self, v: ObjectId) -> Self {
        let width = self.sizes.object;
        self.id(v, width)
    }

    pub fn reference_type_id(self, v: u64) -> Self {
        let width = self.sizes.reference_type;
        self.id(v, width)
    }

    pub fn method_id(self, v: u64) -> Self {
        let width = self.sizes.method;
        self.id(v, width)
    }

    pub fn field_id(self, v: u64) -> Self {
        let width = self.sizes.field;
        self.id(v, width)
    }

    pub fn frame_id(self, v: u64) -> Self {
        let width = self.sizes.frame;
        self.id(v, width)
    }

    pub fn location(self, loc: &Location) -> Self {
        self.u8(loc.type_tag)
            .reference_type_id(loc.class)
            .method_id(loc.method)
            .u64(loc.index)
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over a reply or event payload.
#[derive(Debug)]
pub struct PacketReader<'a> {
    data: &'a [u8],
    pos: usize,
    sizes: IdSizes,
}

impl<'a> PacketReader<'a> {
    pub fn new(data: &'a [u8], sizes: IdSizes) -> Self {
        Self { data, pos: 0, sizes }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], JdwpError> {
        if self.remaining() < n {
            return Err(JdwpError::Malformed(format!(
                "needed {n} bytes at offset {}, only {} left",
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], JdwpError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, JdwpError> {
        Ok(self.take(1)?[0])
    }

    pub fn bool(&mut self) -> Result<bool, JdwpError> {
        Ok(self.u8()? != 0)
    }

    pub fn u16(&mut self) -> Result<u16, JdwpError> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    pub fn i16(&mut self) -> Result<i16, JdwpError> {
        Ok(i16::from_be_bytes(self.array()?))
    }

    pub fn i32(&mut self) -> Result<i32, JdwpError> {
        Ok(i32::from_be_bytes(self.array()?))
    }

    pub fn i64(&mut self) -> Result<i64, JdwpError> {
        Ok(i64::from_be_bytes(self.array()?))
    }

    pub fn u64(&mut self) -> Result<u64, JdwpError> {
        Ok(u64::from_be_bytes(self.array()?))
    }

    pub fn f32(&mut self) -> Result<f32, JdwpError> {
        Ok(f32::from_be_bytes(self.array()?))
    }

    pub fn f64(&mut self) -> Result<f64, JdwpError> {
        Ok(f64::from_be_bytes(self.array()?))
    }

    /// A count prefix; negative counts are rejected.
    pub fn count(&mut self) -> Result<usize, JdwpError> {
        let n = self.i32()?;
        usize::try_from(n).map_err(|_| JdwpError::Malformed(format!("negative count {n}")))
    }

    /// Length of a list whose elements follow in this payload.
    ///
    /// Every element occupies at least one byte, so a length beyond the
    /// remaining bytes can only come from a corrupt packet.
    pub fn list_len(&mut self) -> Result<usize, JdwpError> {
        let n = self.count()?;
        if n > self.remaining() {
            return Err(JdwpError::Malformed(format!(
                "list of {n} elements at offset {}, only {} bytes left",
                self.pos,
                self.remaining()
            )));
        }
        Ok(n)
    }

    /// A string in the VM's modified UTF-8.
    pub fn string(&mut self) -> Result<String, JdwpError> {
        let len = self.count()?;
        let bytes = self.take(len)?;
        decode_modified_utf8(bytes).ok_or_else(|| {
            JdwpError::Malformed(format!(
                "string not representable as UTF-8: {}",
                String::from_utf8_lossy(bytes)
            ))
        })
    }

    fn id(&mut self, width: usize) -> Result<u64, JdwpError> {
        if width == 0 || width > 8 {
            return Err(JdwpError::Malformed(format!("unsupported id width {width}")));
        }
        Ok(self
            .take(width)?
            .iter()
            .fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
    }

    pub fn object_id(&mut self) -> Result<ObjectId, JdwpError> {
        self.id(self.sizes.object)
    }

    pub fn reference_type_id(&mut self) -> Result<u64, JdwpError> {
        self.id(self.sizes.reference_type)
    }

    pub fn method_id(&mut self) -> Result<u64, JdwpError> {
        self.id(self.sizes.method)
    }

    pub fn field_id(&mut self) -> Result<u64, JdwpError> {
        self.id(self.sizes.field)
    }

    pub fn frame_id(&mut self) -> Result<u64, JdwpError> {
        self.id(self.sizes.frame)
    }

    pub fn location(&mut self) -> Result<Location, JdwpError> {
        Ok(Location {
            type_tag: self.u8()?,
            class: self.reference_type_id()?,
            method: self.method_id()?,
            index: self.u64()?,
        })
    }

    /// A tag byte followed by the value it describes.
    pub fn tagged_value(&mut self) -> Result<Value, JdwpError> {
        let tag = self.u8()?;
        self.untagged_value(tag)
    }

    /// A value whose tag is known from context (array regions, frame slots).
    pub fn untagged_value(&mut self, value_tag: u8) -> Result<Value, JdwpError> {
        let value = match value_tag {
            tag::VOID => Value::Void,
            tag::BOOLEAN => Value::Boolean(self.bool()?),
            tag::BYTE => Value::Byte(self.u8()? as i8),
            tag::CHAR => Value::Char(self.u16()?),
            tag::SHORT => Value::Short(self.i16()?),
            tag::INT => Value::Int(self.i32()?),
            tag::LONG => Value::Long(self.i64()?),
            tag::FLOAT => Value::Float(self.f32()?),
            tag::DOUBLE => Value::Double(self.f64()?),
            t if tag::is_object(t) => {
                let id = self.object_id()?;
                match (id, t) {
                    (0, _) => Value::Null,
                    (_, tag::STRING) => Value::String(id),
                    (_, tag::ARRAY) => Value::Array(id),
                    _ => Value::Object(id),
                }
            }
            other => {
                return Err(JdwpError::Malformed(format!(
                    "unknown value tag {:?}",
                    other as char
                )))
            }
        };
        Ok(value)
    }
}

/// Decode modified UTF-8 (NUL as `C0 80`, supplementary characters as
/// surrogate pairs), also accepting standard 4-byte sequences.
///
/// `None` when the bytes are invalid or leave an unpaired surrogate.
fn decode_modified_utf8(bytes: &[u8]) -> Option<String> {
    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match b {
            0x00..=0x7f => {
                units.push(u16::from(b));
                i += 1;
            }
            0xc0..=0xdf => {
                let b1 = continuation(bytes, i + 1)?;
                units.push((u16::from(b & 0x1f) << 6) | b1);
                i += 2;
            }
            0xe0..=0xef => {
                let b1 = continuation(bytes, i + 1)?;
                let b2 = continuation(bytes, i + 2)?;
                units.push((u16::from(b & 0x0f) << 12) | (b1 << 6) | b2);
                i += 3;
            }
            0xf0..=0xf7 => {
                let mut code_point = u32::from(b & 0x07);
                for k in 1..4 {
                    code_point = (code_point << 6) | u32::from(continuation(bytes, i + k)?);
                }
                let mut pair = [0u16; 2];
                units.extend_from_slice(char::from_u32(code_point)?.encode_utf16(&mut pair));
                i += 4;
            }
            _ => return None,
        }
    }
    String::from_utf16(&units).ok()
}

fn continuation(bytes: &[u8], i: usize) -> Option<u16> {
    match bytes.get(i) {
        Some(&b) if b & 0xc0 == 0x80 => Some(u16::from(b & 0x3f)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_ids() -> IdSizes {
        IdSizes {
            field: 4,
            method: 4,
            object: 4,
            reference_type: 4,
            frame: 4,
        }
    }

    #[test]
    fn test_command_header_layout() {
        let packet = CommandPacket {
            id: 7,
            command_set: 1,
            command: 7,
            data: vec![],
        };
        assert_eq!(packet.encode(), vec![0, 0, 0, 11, 0, 0, 0, 7, 0, 1, 7]);
    }

    #[test]
    fn test_read_reply_packet() {
        let reply = ReplyPacket {
            id: 3,
            error_code: 101,
            data: vec![1, 2],
        };
        let bytes = reply.encode();
        let packet = Packet::read_from(&mut bytes.as_slice()).unwrap();
        assert_eq!(packet, Packet::Reply(reply));
    }

    #[test]
    fn test_read_rejects_short_length() {
        let bytes = [0u8, 0, 0, 5, 0, 0, 0, 1, 0, 1, 1];
        let err = Packet::read_from(&mut bytes.as_slice()).unwrap_err();
        assert!(matches!(err, JdwpError::Malformed(_)));
    }

    #[test]
    fn test_truncated_body_is_io_error() {
        let bytes = [0u8, 0, 0, 20, 0, 0, 0, 1, 0, 1, 1, 9, 9];
        let err = Packet::read_from(&mut bytes.as_slice()).unwrap_err();
        assert!(matches!(err, JdwpError::Io(_)));
    }

    #[test]
    fn test_writer_respects_id_sizes() {
        let data = PacketWriter::new(small_ids())
            .object_id(0x0102_0304)
            .string("ab")
            .finish();
        assert_eq!(data, vec![1, 2, 3, 4, 0, 0, 0, 2, b'a', b'b']);
    }

    #[test]
    fn test_reader_decodes_tagged_values() {
        let mut data = vec![tag::INT, 0, 0, 0, 42, tag::BOOLEAN, 1];
        data.extend_from_slice(&[tag::STRING, 0, 0, 0, 9]);
        data.extend_from_slice(&[tag::OBJECT, 0, 0, 0, 0]);
        data.extend_from_slice(&[tag::CHAR, 0, b'b']);
        data.extend_from_slice(&[tag::BYTE, 0xff]);
        data.extend_from_slice(&[tag::SHORT, 0xff, 0xfe]);
        data.push(tag::LONG);
        data.extend_from_slice(&(-5_000_000_000i64).to_be_bytes());
        data.push(tag::FLOAT);
        data.extend_from_slice(&1.5f32.to_be_bytes());
        data.push(tag::DOUBLE);
        data.extend_from_slice(&(-2.25f64).to_be_bytes());

        let mut reader = PacketReader::new(&data, small_ids());
        assert_eq!(reader.tagged_value().unwrap(), Value::Int(42));
        assert_eq!(reader.tagged_value().unwrap(), Value::Boolean(true));
        assert_eq!(reader.tagged_value().unwrap(), Value::String(9));
        assert_eq!(reader.tagged_value().unwrap(), Value::Null);
        assert_eq!(reader.tagged_value().unwrap(), Value::Char(u16::from(b'b')));
        assert_eq!(reader.tagged_value().unwrap(), Value::Byte(-1));
        assert_eq!(reader.tagged_value().unwrap(), Value::Short(-2));
        assert_eq!(reader.tagged_value().unwrap(), Value::Long(-5_000_000_000));
        assert_eq!(reader.tagged_value().unwrap(), Value::Float(1.5));
        assert_eq!(reader.tagged_value().unwrap(), Value::Double(-2.25));
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_reader_reports_truncation() {
        let data = [tag::LONG, 0, 0];
        let mut reader = PacketReader::new(&data, small_ids());
        assert!(matches!(
            reader.tagged_value(),
            Err(JdwpError::Malformed(_))
        ));
    }

    #[test]
    fn test_list_len_beyond_payload_is_malformed() {
        let data = [0x7f, 0xff, 0xff, 0xff, 1, 2];
        let mut reader = PacketReader::new(&data, small_ids());
        assert!(matches!(reader.list_len(), Err(JdwpError::Malformed(_))));

        let data = [0, 0, 0, 2, 1, 2];
        let mut reader = PacketReader::new(&data, small_ids());
        assert_eq!(reader.list_len().unwrap(), 2);
    }

    fn string_payload(bytes: &[u8]) -> Vec<u8> {
        let mut data = (bytes.len() as u32).to_be_bytes().to_vec();
        data.extend_from_slice(bytes);
        data
    }

    #[test]
    fn test_string_decodes_modified_utf8() {
        // NUL, then U+1F600 as a surrogate pair, then the same character in standard UTF-8
        let data = string_payload(&[
            b'a', 0xc0, 0x80, 0xed, 0xa0, 0xbd, 0xed, 0xb8, 0x80, 0xf0, 0x9f, 0x98, 0x80,
        ]);
        let mut reader = PacketReader::new(&data, small_ids());
        assert_eq!(reader.string().unwrap(), "a\0\u{1F600}\u{1F600}");
    }

    #[test]
    fn test_string_with_unpaired_surrogate_is_malformed() {
        let data = string_payload(&[b'x', 0xed, 0xa0, 0xbd]);
        let mut reader = PacketReader::new(&data, small_ids());
        assert!(matches!(reader.string(), Err(JdwpError::Malformed(_))));
    }

    #[test]
    fn test_reader_rejects_unknown_tag() {
        let data = [b'?', 0];
        let mut reader = PacketReader::new(&data, small_ids());
        assert!(matches!(
            reader.tagged_value(),
            Err(JdwpError::Malformed(_))
        ));
    }

    #[test]
    fn test_location_roundtrip_through_writer() {
        let loc = Location {
            type_tag: 1,
            class: 5,
            method: 6,
            index: 12,
        };
        let data = PacketWriter::new(small_ids()).location(&loc).finish();
        let mut reader = PacketReader::new(&data, small_ids());
        assert_eq!(reader.location().unwrap(), loc);
    }
}
