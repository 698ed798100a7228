//! Approximate per-kind id sets
//!
//! A [`PresenceTable`] is one bitset per object kind addressed by
//! `id mod bits`. Two ids that share a bit are indistinguishable, so a
//! lookup may answer "present" for an id that was never inserted. It never
//! answers "absent" for one that was. Extracts therefore err on the side of
//! keeping a few extra objects when the tables are small compared to the
//! id range.

use std::fmt;
use std::str::FromStr;

use butterfly_common::{Error, Result};
use butterfly_io::Kind;
use log::{debug, warn};

const MIB: usize = 1024 * 1024;
/// Smallest table worth using; allocation below this is fatal
const MIN_TABLE_BYTES: usize = 1024;

/// Table sizes in MiB per kind, each clamped to `1..=4000`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashMemory {
    pub nodes: usize,
    pub ways: usize,
    pub relations: usize,
}

impl HashMemory {
    pub const MIN_MIB: usize = 1;
    pub const MAX_MIB: usize = 4000;

    pub fn new(nodes: usize, ways: usize, relations: usize) -> Self {
        let clamp = |v: usize| v.clamp(Self::MIN_MIB, Self::MAX_MIB);
        Self {
            nodes: clamp(nodes),
            ways: clamp(ways),
            relations: clamp(relations),
        }
    }

    /// Split a total budget 90/9/1 between nodes, ways and relations
    pub fn from_total(total: usize) -> Self {
        Self::new(total * 90 / 100, total * 9 / 100, total / 100)
    }

    fn mib(&self, kind: Kind) -> usize {
        match kind {
            Kind::Node => self.nodes,
            Kind::Way => self.ways,
            Kind::Relation => self.relations,
        }
    }
}

impl Default for HashMemory {
    fn default() -> Self {
        Self::new(320, 60, 20)
    }
}

impl FromStr for HashMemory {
    type Err = Error;

    /// `N` (total MiB) or `N-N-N` (MiB for nodes, ways, relations)
    fn from_str(text: &str) -> Result<Self> {
        let bad = || {
            Error::InvalidArguments(format!(
                "hash memory must be N or N-N-N megabytes, got {text:?}"
            ))
        };
        let parts: Vec<usize> = text
            .split('-')
            .map(|p| p.trim().parse::<usize>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|_| bad())?;
        match parts.as_slice() {
            [total] => Ok(Self::from_total(*total)),
            [nodes, ways, relations] => Ok(Self::new(*nodes, *ways, *relations)),
            _ => Err(bad()),
        }
    }
}

impl fmt::Display for HashMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.nodes, self.ways, self.relations)
    }
}

/// Allocate `bytes` zeroed bytes, halving on failure down to 1 KiB
fn allocate(kind: Kind, mut bytes: usize) -> Result<Vec<u8>> {
    let requested = bytes;
    while bytes >= MIN_TABLE_BYTES {
        let mut table = Vec::new();
        if table.try_reserve_exact(bytes).is_ok() {
            table.resize(bytes, 0);
            if bytes < requested {
                warn!(
                    "{kind} presence table reduced from {} to {} KiB, expect more false positives",
                    requested / 1024,
                    bytes / 1024
                );
            }
            return Ok(table);
        }
        bytes /= 2;
    }
    Err(Error::HashAllocation(format!(
        "{kind} presence table ({} MiB requested)",
        requested / MIB
    )))
}

/// One lossy bitset per object kind
pub struct PresenceTable {
    tables: [Vec<u8>; 3],
}

impl PresenceTable {
    pub fn new(memory: HashMemory) -> Result<Self> {
        Self::with_bytes([
            memory.mib(Kind::Node) * MIB,
            memory.mib(Kind::Way) * MIB,
            memory.mib(Kind::Relation) * MIB,
        ])
    }

    /// Exact byte sizes, mostly for tests that want collisions
    pub fn with_bytes(bytes: [usize; 3]) -> Result<Self> {
        let [nodes, ways, relations] = bytes;
        let tables = [
            allocate(Kind::Node, nodes)?,
            allocate(Kind::Way, ways)?,
            allocate(Kind::Relation, relations)?,
        ];
        debug!(
            "presence tables: {} / {} / {} KiB",
            tables[0].len() / 1024,
            tables[1].len() / 1024,
            tables[2].len() / 1024
        );
        Ok(Self { tables })
    }

    fn locate(&self, kind: Kind, id: i64) -> (usize, u8) {
        let table = &self.tables[kind.index()];
        let bits = table.len() as i64 * 8;
        let bit = id.rem_euclid(bits) as usize;
        (bit >> 3, 1 << (bit & 7))
    }

    /// Mark `id`; returns whether its bit was clear before
    pub fn set(&mut self, kind: Kind, id: i64) -> bool {
        let (byte, mask) = self.locate(kind, id);
        let slot = &mut self.tables[kind.index()][byte];
        let was_clear = *slot & mask == 0;
        *slot |= mask;
        was_clear
    }

    /// `true` for every inserted id and possibly for others sharing its bit
    pub fn get(&self, kind: Kind, id: i64) -> bool {
        let (byte, mask) = self.locate(kind, id);
        self.tables[kind.index()][byte] & mask != 0
    }

    /// Number of distinct ids a kind's table can tell apart
    pub fn capacity(&self, kind: Kind) -> u64 {
        self.tables[kind.index()].len() as u64 * 8
    }
}
