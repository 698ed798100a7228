//! Per-run state: input opening and stdin spooling

use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;

use butterfly_common::{Error, Result};
use butterfly_io::{
    detect_input, detect_path, open_path, open_reader, InputFormat, Limits, ObjectReader,
};
use log::{debug, info};
use tempfile::NamedTempFile;

use crate::config::Source;
use crate::merge::{MergePolicy, Sequencer};

const IO_BUFFER: usize = 64 * 1024;

pub struct Context {
    limits: Limits,
    temp_dir: Option<PathBuf>,
    /// Copy standard input to disk so it can be scanned more than once
    spool_stdin: bool,
    spool: Option<NamedTempFile>,
    stdin_taken: bool,
}

impl Context {
    pub fn new(limits: Limits, temp_dir: Option<PathBuf>, spool_stdin: bool) -> Self {
        Self {
            limits,
            temp_dir,
            spool_stdin,
            spool: None,
            stdin_taken: false,
        }
    }

    fn spooled_stdin(&mut self) -> Result<File> {
        if self.spool.is_none() {
            let mut spool = match &self.temp_dir {
                Some(dir) => NamedTempFile::new_in(dir),
                None => NamedTempFile::new(),
            }
            .map_err(Error::WriteFailed)?;
            let bytes = io::copy(&mut io::stdin().lock(), spool.as_file_mut())?;
            info!("spooled {bytes} bytes of standard input to {}", spool.path().display());
            self.spool = Some(spool);
        }
        match &self.spool {
            Some(spool) => Ok(spool.reopen()?),
            None => Err(Error::Io(io::Error::other("standard input spool missing"))),
        }
    }

    /// Fresh reader over one input
    pub fn open(&mut self, source: &Source) -> Result<Box<dyn ObjectReader>> {
        debug!("opening {source}");
        match source {
            Source::Path(path) => open_path(path, self.limits),
            Source::Stdin if self.spool_stdin => {
                let file = self.spooled_stdin()?;
                open_reader(BufReader::with_capacity(IO_BUFFER, file), self.limits)
            }
            Source::Stdin => {
                if std::mem::replace(&mut self.stdin_taken, true) {
                    return Err(Error::InvalidArguments(
                        "standard input cannot be read twice".into(),
                    ));
                }
                open_reader(BufReader::with_capacity(IO_BUFFER, io::stdin()), self.limits)
            }
        }
    }

    /// Serialization of one input, `None` when it is empty
    pub fn input_format(&mut self, source: &Source) -> Result<Option<InputFormat>> {
        match source {
            Source::Path(path) => detect_path(path),
            Source::Stdin if self.spool_stdin => detect_input(&mut self.spooled_stdin()?),
            Source::Stdin => Err(Error::InvalidArguments(
                "the format of standard input cannot be checked before reading it".into(),
            )),
        }
    }

    /// All inputs merged into one sorted stream. A single input still goes
    /// through a [`Sequencer`] so that its order is checked.
    pub fn open_merged(&mut self, sources: &[Source], policy: MergePolicy) -> Result<Sequencer> {
        let readers = sources
            .iter()
            .map(|s| self.open(s))
            .collect::<Result<Vec<_>>>()?;
        Ok(Sequencer::new(readers, policy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use butterfly_io::{Coord, Format, Object, WriterOptions, StreamHeader};

    fn write_osm(dir: &std::path::Path, name: &str, objects: &[Object]) -> PathBuf {
        let path = dir.join(name);
        let file = File::create(&path).unwrap();
        let mut writer = butterfly_io::open_writer(
            file,
            Format::Osm,
            WriterOptions::default(),
            &StreamHeader::default(),
        )
        .unwrap();
        for o in objects {
            writer.write(o).unwrap();
        }
        writer.finish().unwrap();
        path
    }

    #[test]
    fn merges_several_files() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_osm(dir.path(), "a.osm", &[Object::node(1, Coord::new(1, 1))]);
        let b = write_osm(dir.path(), "b.osm", &[Object::node(2, Coord::new(2, 2))]);
        let mut ctx = Context::new(Limits::default(), None, false);
        let mut merged = ctx
            .open_merged(&[Source::Path(a), Source::Path(b)], MergePolicy::LastWins)
            .unwrap();
        let ids: Vec<i64> = std::iter::from_fn(|| merged.read_next().unwrap())
            .map(|o| o.id)
            .collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn single_inputs_are_order_checked() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_osm(
            dir.path(),
            "a.osm",
            &[Object::node(5, Coord::new(1, 1)), Object::node(2, Coord::new(2, 2))],
        );
        let mut ctx = Context::new(Limits::default(), None, false);
        let source = Source::Path(path);
        assert_eq!(ctx.input_format(&source).unwrap(), Some(InputFormat::Xml));
        let mut merged = ctx.open_merged(&[source], MergePolicy::LastWins).unwrap();
        while merged.read_next().unwrap().is_some() {}
        assert_eq!(merged.out_of_order(), 1);
    }

    #[test]
    fn missing_file_is_unreadable() {
        let mut ctx = Context::new(Limits::default(), None, false);
        let err = ctx
            .open(&Source::Path("/nonexistent/input.osm".into()))
            .err()
            .unwrap();
        assert!(matches!(err, Error::Unreadable { .. }));
    }
}
