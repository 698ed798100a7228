//! # butterfly-io
//!
//! OSM object model and streaming codecs for butterfly-osm.
//!
//! Three serializations share one [`ObjectReader`] / [`ObjectWriter`]
//! contract:
//!
//! - [`xml`]: `.osm`, `.osc` and `.osh` documents
//! - [`o5m`]: the delta-coded `.o5m` / `.o5c` binary format
//! - [`pbf`]: the block-based `.osm.pbf` format
//!
//! [`format::open_reader`] recognises an input from its first bytes and
//! [`format::open_writer`] builds the writer for a chosen [`Format`].

pub mod format;
pub mod memory;
pub mod model;
pub mod o5m;
pub mod pbf;
pub mod scratch;
pub mod stream;
pub mod text;
pub mod varint;
pub mod xml;

pub use format::{
    detect_input, detect_path, open_path, open_reader, open_writer, Format, InputFormat,
    WriterOptions,
};
pub use memory::{MemoryReader, MemoryWriter};
pub use model::{
    Action, Author, BBox, Coord, Geometry, Kind, Member, Object, ObjectKey, StreamHeader,
};
pub use scratch::ScratchLog;
pub use stream::{Limits, ObjectReader, ObjectWriter};
pub use xml::Dialect;
