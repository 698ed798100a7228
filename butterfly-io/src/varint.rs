//! Variable-length integers and a bounds-checked byte cursor
//!
//! Both binary formats store integers as little-endian base-128 varints:
//! seven payload bits per byte, high bit set on every byte except the last.
//! Signed values are zig-zag mapped first so small magnitudes stay short:
//! `0, -1, 1, -2, 2 ...` become `0, 1, 2, 3, 4 ...`.

/// Longest encoding of a 64-bit value
pub const MAX_VARINT_LEN: usize = 10;

pub fn zigzag(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

pub fn unzigzag(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

pub fn write_uvar(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

pub fn write_svar(out: &mut Vec<u8>, value: i64) {
    write_uvar(out, zigzag(value));
}

/// Number of bytes `write_uvar` would emit
pub fn uvar_len(mut value: u64) -> usize {
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}

/// Read-only view over a buffer; every read checks the remaining length
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    pub fn peek(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    pub fn read_bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(len)?;
        let bytes = self.buf.get(self.pos..end)?;
        self.pos = end;
        Some(bytes)
    }

    /// Bytes up to (not including) the next NUL; the NUL is consumed
    pub fn read_until_nul(&mut self) -> Option<&'a [u8]> {
        let rest = &self.buf[self.pos..];
        let len = rest.iter().position(|&b| b == 0)?;
        self.pos += len + 1;
        Some(&rest[..len])
    }

    pub fn read_uvar(&mut self) -> Option<u64> {
        let mut value = 0u64;
        for i in 0..MAX_VARINT_LEN {
            let b = self.read_u8()?;
            value |= u64::from(b & 0x7f) << (7 * i);
            if b & 0x80 == 0 {
                return Some(value);
            }
        }
        None
    }

    pub fn read_svar(&mut self) -> Option<i64> {
        self.read_uvar().map(unzigzag)
    }

    /// Split off the next `len` bytes as their own cursor
    pub fn sub_cursor(&mut self, len: usize) -> Option<Cursor<'a>> {
        self.read_bytes(len).map(Cursor::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zigzag_maps_small_magnitudes_to_small_codes() {
        assert_eq!(zigzag(0), 0);
        assert_eq!(zigzag(-1), 1);
        assert_eq!(zigzag(1), 2);
        assert_eq!(zigzag(-2), 3);
        assert_eq!(unzigzag(zigzag(i64::MIN)), i64::MIN);
        assert_eq!(unzigzag(zigzag(i64::MAX)), i64::MAX);
    }

    #[test]
    fn varint_layout_matches_base128() {
        let mut out = Vec::new();
        write_uvar(&mut out, 300);
        assert_eq!(out, vec![0xac, 0x02]);
        assert_eq!(uvar_len(300), 2);

        out.clear();
        write_svar(&mut out, -65);
        assert_eq!(out, vec![0x81, 0x01]);
        assert_eq!(Cursor::new(&out).read_svar(), Some(-65));
    }

    #[test]
    fn truncated_varint_is_rejected() {
        let mut cursor = Cursor::new(&[0x80, 0x80]);
        assert_eq!(cursor.read_uvar(), None);
    }

    #[test]
    fn overlong_varint_is_rejected() {
        let bytes = [0xffu8; 11];
        assert_eq!(Cursor::new(&bytes).read_uvar(), None);
    }

    #[test]
    fn nul_terminated_reads() {
        let mut cursor = Cursor::new(b"highway\0primary\0rest");
        assert_eq!(cursor.read_until_nul(), Some(&b"highway"[..]));
        assert_eq!(cursor.read_until_nul(), Some(&b"primary"[..]));
        assert_eq!(cursor.read_until_nul(), None);
        assert_eq!(cursor.remaining(), 4);
    }
}
