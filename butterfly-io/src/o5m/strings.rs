//! o5m string table
//!
//! Strings and string pairs are written either inline or as a backward
//! reference into a ring of the most recently written entries:
//!
//! ```text
//! inline:     0x00 <s1> 0x00 [<s2> 0x00]
//! reference:  uvar n          (n = 1 .. RING_SIZE, 1 is the newest entry)
//! ```
//!
//! Both sides append every inline entry whose combined length is at most
//! [`MAX_STORED_LEN`], so encoder and decoder rings stay in lockstep. A
//! single string occupies a slot as the pair `(s, "")`.

use crate::varint::{write_uvar, Cursor};

pub const RING_SIZE: usize = 15_000;
pub const MAX_STORED_LEN: usize = 250;
const HASH_BUCKETS: usize = 150_001;

fn storable(s1: &[u8], s2: &[u8]) -> bool {
    s1.len() + s2.len() <= MAX_STORED_LEN
}

/// Decoder side: a plain ring indexed by distance from the newest entry
#[derive(Debug)]
pub(crate) struct StringRing {
    slots: Vec<(Vec<u8>, Vec<u8>)>,
    next: usize,
    filled: usize,
}

/// Why a string could not be decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StringError {
    Truncated,
    BadReference(u64),
}

impl StringRing {
    pub(crate) fn new() -> Self {
        Self {
            slots: vec![(Vec::new(), Vec::new()); RING_SIZE],
            next: 0,
            filled: 0,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.next = 0;
        self.filled = 0;
    }

    fn push(&mut self, s1: &[u8], s2: &[u8]) {
        let slot = &mut self.slots[self.next];
        slot.0.clear();
        slot.0.extend_from_slice(s1);
        slot.1.clear();
        slot.1.extend_from_slice(s2);
        self.next = (self.next + 1) % RING_SIZE;
        self.filled = (self.filled + 1).min(RING_SIZE);
    }

    fn lookup(&self, reference: u64) -> Result<&(Vec<u8>, Vec<u8>), StringError> {
        if reference == 0 || reference > self.filled as u64 {
            return Err(StringError::BadReference(reference));
        }
        let index = (self.next + RING_SIZE - reference as usize) % RING_SIZE;
        Ok(&self.slots[index])
    }

    /// Read a key/value style pair
    pub(crate) fn read_pair(
        &mut self,
        cursor: &mut Cursor<'_>,
    ) -> Result<(Vec<u8>, Vec<u8>), StringError> {
        if cursor.peek() == Some(0) {
            cursor.read_u8();
            let s1 = cursor.read_until_nul().ok_or(StringError::Truncated)?;
            let s2 = cursor.read_until_nul().ok_or(StringError::Truncated)?;
            if storable(s1, s2) {
                self.push(s1, s2);
            }
            return Ok((s1.to_vec(), s2.to_vec()));
        }
        let reference = cursor.read_uvar().ok_or(StringError::Truncated)?;
        self.lookup(reference).cloned()
    }

    /// Read a single string (relation member type and role)
    pub(crate) fn read_single(&mut self, cursor: &mut Cursor<'_>) -> Result<Vec<u8>, StringError> {
        if cursor.peek() == Some(0) {
            cursor.read_u8();
            let s = cursor.read_until_nul().ok_or(StringError::Truncated)?;
            if storable(s, &[]) {
                self.push(s, &[]);
            }
            return Ok(s.to_vec());
        }
        let reference = cursor.read_uvar().ok_or(StringError::Truncated)?;
        self.lookup(reference).map(|(s1, _)| s1.clone())
    }
}

const UNUSED: usize = usize::MAX;

/// Encoder side: the same ring plus a chained hash index for lookup by value
#[derive(Debug)]
pub(crate) struct StringTable {
    slots: Vec<(Vec<u8>, Vec<u8>)>,
    /// Bucket of each slot, `UNUSED` when the slot is empty
    slot_bucket: Vec<usize>,
    /// Circular doubly linked chains of slots sharing a bucket
    prev: Vec<usize>,
    next: Vec<usize>,
    /// One slot of each bucket's chain, `UNUSED` when empty
    buckets: Vec<usize>,
    /// Slot the next new entry goes to
    cursor: usize,
}

impl StringTable {
    pub(crate) fn new() -> Self {
        Self {
            slots: vec![(Vec::new(), Vec::new()); RING_SIZE],
            slot_bucket: vec![UNUSED; RING_SIZE],
            prev: vec![0; RING_SIZE],
            next: vec![0; RING_SIZE],
            buckets: vec![UNUSED; HASH_BUCKETS],
            cursor: 0,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.slot_bucket.fill(UNUSED);
        self.buckets.fill(UNUSED);
        self.cursor = 0;
    }

    fn hash(s1: &[u8], s2: &[u8]) -> usize {
        let mut h: u32 = 0;
        for (i, &c) in s1.iter().chain(s2.iter()).enumerate() {
            h = h.wrapping_add(u32::from(c) << (8 * (i % 4)));
        }
        h as usize % HASH_BUCKETS
    }

    fn find(&self, bucket: usize, s1: &[u8], s2: &[u8]) -> Option<u64> {
        let start = self.buckets[bucket];
        if start == UNUSED {
            return None;
        }
        let mut slot = start;
        loop {
            let (t1, t2) = &self.slots[slot];
            if t1 == s1 && t2 == s2 {
                let distance = (self.cursor + RING_SIZE - slot) % RING_SIZE;
                return Some(if distance == 0 { RING_SIZE } else { distance } as u64);
            }
            slot = self.next[slot];
            if slot == start {
                return None;
            }
        }
    }

    fn evict(&mut self, slot: usize) {
        let bucket = self.slot_bucket[slot];
        if bucket == UNUSED {
            return;
        }
        if self.next[slot] == slot {
            self.buckets[bucket] = UNUSED;
        } else {
            let (prev, next) = (self.prev[slot], self.next[slot]);
            self.buckets[bucket] = next;
            self.next[prev] = next;
            self.prev[next] = prev;
        }
        self.slot_bucket[slot] = UNUSED;
    }

    fn insert(&mut self, bucket: usize, s1: &[u8], s2: &[u8]) {
        let slot = self.cursor;
        self.evict(slot);

        let entry = &mut self.slots[slot];
        entry.0.clear();
        entry.0.extend_from_slice(s1);
        entry.1.clear();
        entry.1.extend_from_slice(s2);

        let head = self.buckets[bucket];
        if head == UNUSED {
            self.prev[slot] = slot;
            self.next[slot] = slot;
        } else {
            let tail = self.prev[head];
            self.next[slot] = head;
            self.prev[slot] = tail;
            self.next[tail] = slot;
            self.prev[head] = slot;
        }
        self.buckets[bucket] = slot;
        self.slot_bucket[slot] = bucket;
        self.cursor = (self.cursor + 1) % RING_SIZE;
    }

    fn write(&mut self, out: &mut Vec<u8>, s1: &[u8], s2: &[u8], single: bool) {
        if !storable(s1, s2) {
            write_inline(out, s1, s2, single);
            return;
        }
        let bucket = Self::hash(s1, s2);
        if let Some(reference) = self.find(bucket, s1, s2) {
            write_uvar(out, reference);
            return;
        }
        write_inline(out, s1, s2, single);
        self.insert(bucket, s1, s2);
    }

    pub(crate) fn write_pair(&mut self, out: &mut Vec<u8>, s1: &[u8], s2: &[u8]) {
        self.write(out, s1, s2, false);
    }

    pub(crate) fn write_single(&mut self, out: &mut Vec<u8>, s: &[u8]) {
        self.write(out, s, &[], true);
    }
}

fn write_inline(out: &mut Vec<u8>, s1: &[u8], s2: &[u8], single: bool) {
    out.push(0);
    out.extend_from_slice(s1);
    out.push(0);
    if !single {
        out.extend_from_slice(s2);
        out.push(0);
    }
}
