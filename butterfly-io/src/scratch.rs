//! Append-then-replay log of id lists in an anonymous temporary file
//!
//! Each record is an owner id followed by the ids it references:
//!
//! ```text
//! svar owner | uvar count | svar delta-coded ids ...
//! ```
//!
//! The log is written once, then rewound and replayed as often as needed.
//! The file disappears when the log is dropped.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;

use butterfly_common::{Error, Result};

use crate::varint::{unzigzag, write_svar, write_uvar};

enum Mode {
    Writing(BufWriter<File>),
    Reading(BufReader<File>),
    /// Transitional, only observable after a failed seek
    Broken,
}

pub struct ScratchLog {
    mode: Mode,
    records: u64,
    record: Vec<u8>,
}

impl ScratchLog {
    /// Create the backing file in `dir`, or the system temporary directory
    pub fn new(dir: Option<&Path>) -> Result<Self> {
        let file = match dir {
            Some(dir) => tempfile::tempfile_in(dir),
            None => tempfile::tempfile(),
        }
        .map_err(Error::WriteFailed)?;
        Ok(Self {
            mode: Mode::Writing(BufWriter::new(file)),
            records: 0,
            record: Vec::new(),
        })
    }

    /// Number of records appended so far
    pub fn len(&self) -> u64 {
        self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    fn broken() -> Error {
        Error::Io(io::Error::other("scratch log unusable after an I/O error"))
    }

    /// Append one record; only valid before the first [`rewind`](Self::rewind)
    pub fn append(&mut self, owner: i64, ids: &[i64]) -> Result<()> {
        let Mode::Writing(out) = &mut self.mode else {
            return Err(Error::Io(io::Error::other(
                "scratch log appended to after replay started",
            )));
        };
        self.record.clear();
        write_svar(&mut self.record, owner);
        write_uvar(&mut self.record, ids.len() as u64);
        let mut previous = 0i64;
        for &id in ids {
            write_svar(&mut self.record, id.wrapping_sub(previous));
            previous = id;
        }
        out.write_all(&self.record)?;
        self.records += 1;
        Ok(())
    }

    /// Position at the first record for a replay pass
    pub fn rewind(&mut self) -> Result<()> {
        let mode = std::mem::replace(&mut self.mode, Mode::Broken);
        let mut file = match mode {
            Mode::Writing(out) => out.into_inner().map_err(|e| e.into_error())?,
            Mode::Reading(input) => input.into_inner(),
            Mode::Broken => return Err(Self::broken()),
        };
        file.seek(SeekFrom::Start(0))?;
        self.mode = Mode::Reading(BufReader::new(file));
        Ok(())
    }

    /// Next record: returns the owner and fills `ids`, `None` after the last
    pub fn next_record(&mut self, ids: &mut Vec<i64>) -> Result<Option<i64>> {
        if matches!(self.mode, Mode::Writing(_)) {
            self.rewind()?;
        }
        let Mode::Reading(input) = &mut self.mode else {
            return Err(Self::broken());
        };
        let Some(owner) = read_uvar(input)? else {
            return Ok(None);
        };
        let owner = unzigzag(owner);
        let count = read_uvar(input)?.ok_or_else(truncated)?;
        ids.clear();
        let mut previous = 0i64;
        for _ in 0..count {
            let delta = unzigzag(read_uvar(input)?.ok_or_else(truncated)?);
            previous = previous.wrapping_add(delta);
            ids.push(previous);
        }
        Ok(Some(owner))
    }
}

fn truncated() -> Error {
    Error::Io(io::Error::new(ErrorKind::UnexpectedEof, "scratch log record truncated"))
}

/// `None` on a clean end of file before the first byte
fn read_uvar(input: &mut impl Read) -> Result<Option<u64>> {
    let mut value = 0u64;
    let mut byte = [0u8; 1];
    for (i, shift) in (0..64).step_by(7).enumerate() {
        match input.read_exact(&mut byte) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof && i == 0 => return Ok(None),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Err(truncated()),
            Err(e) => return Err(e.into()),
        }
        value |= u64::from(byte[0] & 0x7f) << shift;
        if byte[0] & 0x80 == 0 {
            return Ok(Some(value));
        }
    }
    Err(truncated())
}
