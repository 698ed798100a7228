//! Minimal protobuf wire-format reading and writing
//!
//! Only what the OSM block format needs: varints, length-delimited fields
//! and packed repeated scalars. Unknown fields are skipped by wire type.

use crate::varint::{write_svar, write_uvar, zigzag, Cursor};

const WIRE_VARINT: u8 = 0;
const WIRE_FIXED64: u8 = 1;
const WIRE_BYTES: u8 = 2;
const WIRE_FIXED32: u8 = 5;

/// Payload of one decoded field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value<'a> {
    Varint(u64),
    Fixed64(u64),
    Bytes(&'a [u8]),
    Fixed32(u32),
}

impl<'a> Value<'a> {
    pub fn as_u64(self) -> Option<u64> {
        match self {
            Value::Varint(v) | Value::Fixed64(v) => Some(v),
            Value::Fixed32(v) => Some(u64::from(v)),
            Value::Bytes(_) => None,
        }
    }

    /// Plain `int64`/`int32`: two's complement in a varint
    pub fn as_i64(self) -> Option<i64> {
        self.as_u64().map(|v| v as i64)
    }

    /// `sint64`/`sint32`: zig-zag
    pub fn as_sint(self) -> Option<i64> {
        self.as_u64().map(crate::varint::unzigzag)
    }

    pub fn as_bytes(self) -> Option<&'a [u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

/// Why a message could not be walked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireError(pub String);

/// Iterates `(field number, value)` pairs of one message
pub struct Fields<'a> {
    cursor: Cursor<'a>,
}

impl<'a> Fields<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(buf),
        }
    }
}

impl<'a> Iterator for Fields<'a> {
    type Item = Result<(u32, Value<'a>), WireError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor.is_empty() {
            return None;
        }
        let Some(key) = self.cursor.read_uvar() else {
            return Some(Err(WireError("truncated field key".into())));
        };
        let field = (key >> 3) as u32;
        let value = match (key & 7) as u8 {
            WIRE_VARINT => self.cursor.read_uvar().map(Value::Varint),
            WIRE_FIXED64 => self
                .cursor
                .read_bytes(8)
                .map(|b| Value::Fixed64(u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))),
            WIRE_BYTES => self
                .cursor
                .read_uvar()
                .and_then(|len| self.cursor.read_bytes(len as usize))
                .map(Value::Bytes),
            WIRE_FIXED32 => self
                .cursor
                .read_bytes(4)
                .map(|b| Value::Fixed32(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))),
            other => {
                self.cursor = Cursor::new(&[]);
                return Some(Err(WireError(format!(
                    "unsupported wire type {other} for field {field}"
                ))));
            }
        };
        Some(value.map(|v| (field, v)).ok_or_else(|| {
            self.cursor = Cursor::new(&[]);
            WireError(format!("truncated field {field}"))
        }))
    }
}

/// Decode a packed repeated varint field
pub fn packed_uvars(bytes: &[u8]) -> Result<Vec<u64>, WireError> {
    let mut cursor = Cursor::new(bytes);
    let mut out = Vec::new();
    while !cursor.is_empty() {
        out.push(
            cursor
                .read_uvar()
                .ok_or_else(|| WireError("truncated packed varint".into()))?,
        );
    }
    Ok(out)
}

/// Decode a packed `sint64` field and undo delta coding
pub fn packed_delta_sints(bytes: &[u8]) -> Result<Vec<i64>, WireError> {
    let mut cursor = Cursor::new(bytes);
    let mut out = Vec::new();
    let mut running = 0i64;
    while !cursor.is_empty() {
        let delta = cursor
            .read_svar()
            .ok_or_else(|| WireError("truncated packed sint".into()))?;
        running = running.wrapping_add(delta);
        out.push(running);
    }
    Ok(out)
}

/// Message builder
#[derive(Debug, Default, Clone)]
pub struct Message {
    buf: Vec<u8>,
}

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    fn key(&mut self, field: u32, wire: u8) {
        write_uvar(&mut self.buf, (u64::from(field) << 3) | u64::from(wire));
    }

    pub fn uint(&mut self, field: u32, value: u64) -> &mut Self {
        self.key(field, WIRE_VARINT);
        write_uvar(&mut self.buf, value);
        self
    }

    pub fn int(&mut self, field: u32, value: i64) -> &mut Self {
        self.uint(field, value as u64)
    }

    pub fn sint(&mut self, field: u32, value: i64) -> &mut Self {
        self.key(field, WIRE_VARINT);
        write_svar(&mut self.buf, value);
        self
    }

    pub fn bytes(&mut self, field: u32, value: &[u8]) -> &mut Self {
        self.key(field, WIRE_BYTES);
        write_uvar(&mut self.buf, value.len() as u64);
        self.buf.extend_from_slice(value);
        self
    }

    pub fn message(&mut self, field: u32, value: &Message) -> &mut Self {
        self.bytes(field, &value.buf)
    }

    pub fn packed_uints(&mut self, field: u32, values: impl IntoIterator<Item = u64>) -> &mut Self {
        let mut packed = Vec::new();
        for v in values {
            write_uvar(&mut packed, v);
        }
        if !packed.is_empty() {
            self.bytes(field, &packed);
        }
        self
    }

    /// Packed `sint64` of successive differences
    pub fn packed_delta_sints(
        &mut self,
        field: u32,
        values: impl IntoIterator<Item = i64>,
    ) -> &mut Self {
        let mut packed = Vec::new();
        let mut previous = 0i64;
        for v in values {
            write_uvar(&mut packed, zigzag(v.wrapping_sub(previous)));
            previous = v;
        }
        if !packed.is_empty() {
            self.bytes(field, &packed);
        }
        self
    }
}
