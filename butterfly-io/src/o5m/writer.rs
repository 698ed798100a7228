//! Streaming o5m/o5c encoder

use std::io::Write;

use butterfly_common::{Error, Result};

use super::strings::StringTable;
use super::{
    Delta, BBOX_DATASET, END_OF_FILE, FORMAT_TAG_CHANGE, FORMAT_TAG_DATA, HEADER_DATASET,
    NODE_DATASET, RELATION_DATASET, RESET, TIMESTAMP_DATASET, WAY_DATASET,
};
use crate::model::{Author, Geometry, Kind, Object, StreamHeader};
use crate::stream::ObjectWriter;
use crate::varint::{write_svar, write_uvar};

/// Encodes objects as o5m, or o5c when `change` is set
pub struct O5mWriter<W: Write> {
    output: W,
    strings: StringTable,
    delta: Delta,
    section: Option<Kind>,
    body: Vec<u8>,
    refs: Vec<u8>,
    uid: Vec<u8>,
}

impl<W: Write> O5mWriter<W> {
    /// Write the signature and header datasets
    pub fn new(output: W, change: bool, header: &StreamHeader) -> Result<Self> {
        let mut writer = Self {
            output,
            strings: StringTable::new(),
            delta: Delta::default(),
            section: None,
            body: Vec::new(),
            refs: Vec::new(),
            uid: Vec::new(),
        };
        let tag = if change { FORMAT_TAG_CHANGE } else { FORMAT_TAG_DATA };
        writer.put(&[RESET])?;
        writer.body.extend_from_slice(tag);
        writer.flush_dataset(HEADER_DATASET)?;
        if let Some(bbox) = header.bbox {
            for value in [bbox.min_lon, bbox.min_lat, bbox.max_lon, bbox.max_lat] {
                write_svar(&mut writer.body, i64::from(value));
            }
            writer.flush_dataset(BBOX_DATASET)?;
        }
        if let Some(ts) = header.timestamp {
            write_svar(&mut writer.body, ts);
            writer.flush_dataset(TIMESTAMP_DATASET)?;
        }
        Ok(writer)
    }

    fn put(&mut self, bytes: &[u8]) -> Result<()> {
        self.output.write_all(bytes).map_err(Error::WriteFailed)
    }

    /// Emit `body` as one dataset and clear it
    fn flush_dataset(&mut self, dataset: u8) -> Result<()> {
        let mut prefix = Vec::with_capacity(11);
        prefix.push(dataset);
        write_uvar(&mut prefix, self.body.len() as u64);
        self.output.write_all(&prefix).map_err(Error::WriteFailed)?;
        self.output.write_all(&self.body).map_err(Error::WriteFailed)?;
        self.body.clear();
        Ok(())
    }

    fn write_author(&mut self, author: &Author) {
        write_uvar(&mut self.body, u64::from(author.version));
        if author.version == 0 {
            return;
        }
        write_svar(&mut self.body, author.timestamp.wrapping_sub(self.delta.timestamp));
        self.delta.timestamp = author.timestamp;
        if author.timestamp == 0 {
            return;
        }
        write_svar(&mut self.body, author.changeset.wrapping_sub(self.delta.changeset));
        self.delta.changeset = author.changeset;
        if author.has_user() {
            self.uid.clear();
            write_uvar(&mut self.uid, u64::from(author.uid));
            self.strings
                .write_pair(&mut self.body, &self.uid, author.user.as_bytes());
        } else {
            self.strings.write_pair(&mut self.body, b"", b"");
        }
    }
}

impl<W: Write> ObjectWriter for O5mWriter<W> {
    fn write(&mut self, object: &Object) -> Result<()> {
        let kind = object.kind();
        if self.section != Some(kind) {
            self.put(&[RESET])?;
            self.delta = Delta::default();
            self.strings.reset();
            self.section = Some(kind);
        }

        write_svar(&mut self.body, object.id.wrapping_sub(self.delta.id));
        self.delta.id = object.id;
        self.write_author(&object.author);

        let dataset = match kind {
            Kind::Node => NODE_DATASET,
            Kind::Way => WAY_DATASET,
            Kind::Relation => RELATION_DATASET,
        };
        if object.is_deleted() {
            return self.flush_dataset(dataset);
        }

        match &object.geometry {
            Geometry::Node(coord) => {
                write_svar(&mut self.body, i64::from(coord.lon.wrapping_sub(self.delta.lon)));
                write_svar(&mut self.body, i64::from(coord.lat.wrapping_sub(self.delta.lat)));
                self.delta.lon = coord.lon;
                self.delta.lat = coord.lat;
            }
            Geometry::Way(refs) => {
                self.refs.clear();
                for &node in refs {
                    write_svar(&mut self.refs, node.wrapping_sub(self.delta.refs[0]));
                    self.delta.refs[0] = node;
                }
                write_uvar(&mut self.body, self.refs.len() as u64);
                self.body.extend_from_slice(&self.refs);
            }
            Geometry::Relation(members) => {
                self.refs.clear();
                let mut type_role = Vec::new();
                for member in members {
                    let slot = &mut self.delta.refs[member.kind.index()];
                    write_svar(&mut self.refs, member.id.wrapping_sub(*slot));
                    *slot = member.id;
                    type_role.clear();
                    type_role.push(b'0' + member.kind.index() as u8);
                    type_role.extend_from_slice(member.role.as_bytes());
                    self.strings.write_single(&mut self.refs, &type_role);
                }
                write_uvar(&mut self.body, self.refs.len() as u64);
                self.body.extend_from_slice(&self.refs);
            }
        }

        for (key, value) in &object.tags {
            self.strings
                .write_pair(&mut self.body, key.as_bytes(), value.as_bytes());
        }
        self.flush_dataset(dataset)
    }

    fn finish(&mut self) -> Result<()> {
        self.put(&[END_OF_FILE])?;
        self.output.flush().map_err(Error::WriteFailed)
    }
}
