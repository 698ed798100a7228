//! Output format selection, input format detection and codec factories

use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use butterfly_common::{Error, Result};
use log::debug;

use crate::memory::MemoryReader;
use crate::model::StreamHeader;
use crate::o5m::{self, O5mReader, O5mWriter};
use crate::pbf::{self, PbfReader, PbfWriter};
use crate::stream::{Limits, ObjectReader, ObjectWriter};
use crate::xml::{self, Dialect, XmlKind, XmlOptions, XmlReader, XmlWriter};

/// Bytes inspected to recognise an input
const SNIFF_LEN: usize = 32;
const IO_BUFFER: usize = 64 * 1024;

/// Serialization written by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    #[default]
    Osm,
    Osc,
    Osh,
    O5m,
    O5c,
    Pbf,
}

impl Format {
    pub const ALL: [Format; 6] = [
        Format::Osm,
        Format::Osc,
        Format::Osh,
        Format::O5m,
        Format::O5c,
        Format::Pbf,
    ];

    pub fn extension(self) -> &'static str {
        match self {
            Format::Osm => "osm",
            Format::Osc => "osc",
            Format::Osh => "osh",
            Format::O5m => "o5m",
            Format::O5c => "o5c",
            Format::Pbf => "pbf",
        }
    }

    /// Format implied by a file name, e.g. `out.o5c` or `planet.osm.pbf`
    pub fn from_path(path: &Path) -> Option<Format> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        Format::ALL.into_iter().find(|f| f.extension() == ext)
    }

    /// Whether the format carries create/modify/delete records
    pub fn is_change(self) -> bool {
        matches!(self, Format::Osc | Format::O5c)
    }

    /// Change-file counterpart used for diff output; PBF has none
    pub fn change_variant(self) -> Option<Format> {
        match self {
            Format::Osm | Format::Osc => Some(Format::Osc),
            Format::O5m | Format::O5c => Some(Format::O5c),
            Format::Osh => Some(Format::Osh),
            Format::Pbf => None,
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Serialization recognised from the first bytes of an input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Xml,
    O5m,
    Pbf,
}

impl InputFormat {
    pub fn detect(prefix: &[u8]) -> Option<InputFormat> {
        if o5m::sniff(prefix) {
            Some(InputFormat::O5m)
        } else if pbf::sniff(prefix) {
            Some(InputFormat::Pbf)
        } else if xml::sniff(prefix) {
            Some(InputFormat::Xml)
        } else {
            None
        }
    }
}

/// Writer settings that do not depend on the format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriterOptions {
    pub dialect: Dialect,
    /// Give XML delete records zero coordinates
    pub fake_lonlat: bool,
}

fn read_prefix(input: &mut impl Read) -> Result<Vec<u8>> {
    let mut prefix = Vec::with_capacity(SNIFF_LEN);
    input.take(SNIFF_LEN as u64).read_to_end(&mut prefix)?;
    Ok(prefix)
}

fn classify(prefix: &[u8]) -> Result<Option<InputFormat>> {
    if prefix.is_empty() {
        return Ok(None);
    }
    InputFormat::detect(prefix).map(Some).ok_or_else(|| {
        Error::Unsupported(format!(
            "unrecognised input starting with {:02x?}",
            &prefix[..prefix.len().min(8)]
        ))
    })
}

/// Detect the serialization of `input` and build the matching reader.
///
/// An empty input is an empty stream.
pub fn open_reader<R: BufRead + 'static>(
    mut input: R,
    limits: Limits,
) -> Result<Box<dyn ObjectReader>> {
    let prefix = read_prefix(&mut input)?;
    let Some(format) = classify(&prefix)? else {
        debug!("empty input");
        return Ok(Box::new(MemoryReader::default()));
    };
    debug!("detected {format:?} input");
    let input = io::Cursor::new(prefix).chain(input);
    Ok(match format {
        InputFormat::O5m => Box::new(O5mReader::new(input, limits)?),
        InputFormat::Xml => Box::new(XmlReader::new(input, limits)?),
        InputFormat::Pbf => Box::new(PbfReader::new(input, limits)?),
    })
}

/// Open a file and build a reader for it
pub fn open_path(path: &Path, limits: Limits) -> Result<Box<dyn ObjectReader>> {
    let file = File::open(path).map_err(|e| Error::unreadable(path, e))?;
    open_reader(BufReader::with_capacity(IO_BUFFER, file), limits)
}

/// Serialization of the file at `path`, `None` when it is empty
pub fn detect_path(path: &Path) -> Result<Option<InputFormat>> {
    let mut file = File::open(path).map_err(|e| Error::unreadable(path, e))?;
    detect_input(&mut file)
}

/// Serialization of whatever `input` starts with, consuming the prefix
pub fn detect_input(input: &mut impl Read) -> Result<Option<InputFormat>> {
    classify(&read_prefix(input)?)
}

/// Build a buffered writer of the given format
pub fn open_writer<W: Write + 'static>(
    output: W,
    format: Format,
    options: WriterOptions,
    header: &StreamHeader,
) -> Result<Box<dyn ObjectWriter>> {
    let output = BufWriter::with_capacity(IO_BUFFER, output);
    let xml_kind = |kind| XmlOptions {
        dialect: options.dialect,
        kind,
        fake_lonlat: options.fake_lonlat,
    };
    Ok(match format {
        Format::Osm => Box::new(XmlWriter::new(output, xml_kind(XmlKind::Osm), header)?),
        Format::Osc => Box::new(XmlWriter::new(output, xml_kind(XmlKind::Osc), header)?),
        Format::Osh => Box::new(XmlWriter::new(output, xml_kind(XmlKind::Osh), header)?),
        Format::O5m => Box::new(O5mWriter::new(output, false, header)?),
        Format::O5c => Box::new(O5mWriter::new(output, true, header)?),
        Format::Pbf => Box::new(PbfWriter::new(output, header)?),
    })
}
