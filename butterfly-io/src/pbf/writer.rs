//! Streaming PBF encoder

use std::io::Write;

use butterfly_common::{Error, Result};
use byteorder::{BigEndian, WriteBytesExt};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use log::debug;
use rustc_hash::FxHashMap;

use super::proto::Message;
use super::{
    BLOB_DATA, BLOB_HEADER, BLOCK_OBJECT_LIMIT, BLOCK_SIZE_LIMIT, NANO_PER_UNIT,
    REQUIRED_FEATURES, WRITING_PROGRAM,
};
use crate::model::{Author, Coord, Geometry, Kind, Object, StreamHeader};
use crate::stream::ObjectWriter;
use crate::varint::{uvar_len, zigzag};

/// Field key plus a length prefix of up to five bytes
const KEY_AND_LEN: usize = 6;
/// Field key plus a ten-byte varint
const VARINT_FIELD: usize = 11;
/// Keys and length prefixes around the block contents: the string table,
/// the group, dense nodes with their info and nine packed columns
const BLOCK_FRAMING: usize = 13 * KEY_AND_LEN;
/// Info message of a way or relation: version, timestamp, changeset, uid, user
const INFO_BOUND: usize = KEY_AND_LEN + 3 * VARINT_FIELD + 2 * KEY_AND_LEN;

fn sint_len(value: i64) -> usize {
    uvar_len(zigzag(value))
}

/// Encoded bytes of `values` as a packed delta column, without its key
fn delta_len(values: impl IntoIterator<Item = i64>) -> usize {
    let mut previous = 0i64;
    values
        .into_iter()
        .map(|v| {
            let len = sint_len(v.wrapping_sub(previous));
            previous = v;
            len
        })
        .sum()
}

/// Bytes a value adds to a delta column whose last entry is `column.last()`
fn next_delta_len(column: &[i64], value: i64) -> usize {
    sint_len(value.wrapping_sub(column.last().copied().unwrap_or(0)))
}

/// Objects of one kind waiting to become a primitive block
#[derive(Default)]
struct BlockBuilder {
    kind: Option<Kind>,
    strings: Vec<String>,
    index: FxHashMap<String, u32>,
    count: usize,
    /// Encoded bytes of the contents so far, framing excluded. Optional
    /// dense columns count even when the block ends up leaving them out.
    size: usize,
    // dense node columns
    ids: Vec<i64>,
    lats: Vec<i64>,
    lons: Vec<i64>,
    keys_vals: Vec<u64>,
    has_tags: bool,
    versions: Vec<u64>,
    timestamps: Vec<i64>,
    changesets: Vec<i64>,
    uids: Vec<i64>,
    user_sids: Vec<i64>,
    has_info: bool,
    // ways and relations, already encoded
    messages: Vec<Message>,
}

impl BlockBuilder {
    fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Index of `s` in the block's string table; 0 is reserved for ""
    fn intern(&mut self, s: &str) -> u32 {
        if self.strings.is_empty() {
            self.strings.push(String::new());
            self.index.insert(String::new(), 0);
        }
        if let Some(&i) = self.index.get(s) {
            return i;
        }
        let i = self.strings.len() as u32;
        self.strings.push(s.to_owned());
        self.index.insert(s.to_owned(), i);
        self.size += 1 + uvar_len(s.len() as u64) + s.len();
        i
    }

    fn info(&mut self, author: &Author) -> Message {
        let user_sid = self.intern(&author.user);
        let mut info = Message::new();
        info.int(1, i64::from(author.version))
            .int(2, author.timestamp)
            .int(3, author.changeset)
            .int(4, i64::from(author.uid))
            .uint(5, u64::from(user_sid));
        info
    }

    fn tag_columns(&mut self, tags: &[(String, String)]) -> (Vec<u64>, Vec<u64>) {
        tags.iter()
            .map(|(k, v)| (u64::from(self.intern(k)), u64::from(self.intern(v))))
            .unzip()
    }

    /// Column bytes of one dense node, given the bytes of its tag string
    /// ids and its user string id
    fn dense_node_size(&self, object: &Object, coord: Coord, tag_bytes: usize, user_sid: u64) -> usize {
        let author = &object.author;
        next_delta_len(&self.ids, object.id)
            + next_delta_len(&self.lats, i64::from(coord.lat))
            + next_delta_len(&self.lons, i64::from(coord.lon))
            + tag_bytes
            + 1
            + uvar_len(u64::from(author.version))
            + next_delta_len(&self.timestamps, author.timestamp)
            + next_delta_len(&self.changesets, author.changeset)
            + next_delta_len(&self.uids, i64::from(author.uid))
            + next_delta_len(&self.user_sids, user_sid as i64)
    }

    /// Most bytes `object` can add to the block, new strings included
    fn bound(&self, object: &Object) -> usize {
        let mut strings: Vec<&str> = object
            .tags
            .iter()
            .flat_map(|(k, v)| [k.as_str(), v.as_str()])
            .collect();
        strings.push(&object.author.user);
        if let Geometry::Relation(members) = &object.geometry {
            strings.extend(members.iter().map(|m| m.role.as_str()));
        }
        strings.retain(|s| !self.index.contains_key(*s));
        let mut table: usize = strings
            .iter()
            .map(|s| 1 + uvar_len(s.len() as u64) + s.len())
            .sum();
        if self.strings.is_empty() {
            table += 2;
        }
        let max_sid = (self.strings.len().max(1) + strings.len()) as u64;
        let sid = uvar_len(max_sid);
        let tags = 2 * object.tags.len() * sid;

        let body = match &object.geometry {
            Geometry::Node(coord) => {
                let user_sid = self
                    .index
                    .get(object.author.user.as_str())
                    .map_or(max_sid, |&i| u64::from(i));
                self.dense_node_size(object, *coord, tags, user_sid)
            }
            Geometry::Way(refs) => {
                KEY_AND_LEN
                    + VARINT_FIELD
                    + 2 * KEY_AND_LEN
                    + tags
                    + INFO_BOUND
                    + KEY_AND_LEN
                    + delta_len(refs.iter().copied())
            }
            Geometry::Relation(members) => {
                KEY_AND_LEN
                    + VARINT_FIELD
                    + 2 * KEY_AND_LEN
                    + tags
                    + INFO_BOUND
                    + 3 * KEY_AND_LEN
                    + members.len() * (sid + 1)
                    + delta_len(members.iter().map(|m| m.id))
            }
        };
        table + body
    }

    /// Adds an encoded way or relation and its key in the group
    fn push_message(&mut self, message: Message) {
        self.size += 1 + uvar_len(message.len() as u64) + message.len();
        self.messages.push(message);
    }

    fn push(&mut self, object: &Object) {
        self.kind = Some(object.kind());
        self.count += 1;
        match &object.geometry {
            Geometry::Node(coord) => {
                let mut tag_bytes = 0;
                for (k, v) in &object.tags {
                    let (k, v) = (self.intern(k), self.intern(v));
                    tag_bytes += uvar_len(u64::from(k)) + uvar_len(u64::from(v));
                    self.keys_vals.extend([u64::from(k), u64::from(v)]);
                    self.has_tags = true;
                }
                self.keys_vals.push(0);
                let author = &object.author;
                if author.is_present() {
                    self.has_info = true;
                }
                let user_sid = self.intern(&author.user);
                self.size += self.dense_node_size(object, *coord, tag_bytes, u64::from(user_sid));
                self.ids.push(object.id);
                self.lats.push(i64::from(coord.lat));
                self.lons.push(i64::from(coord.lon));
                self.versions.push(u64::from(author.version));
                self.timestamps.push(author.timestamp);
                self.changesets.push(author.changeset);
                self.uids.push(i64::from(author.uid));
                self.user_sids.push(i64::from(user_sid));
            }
            Geometry::Way(refs) => {
                let (keys, vals) = self.tag_columns(&object.tags);
                let mut way = Message::new();
                way.int(1, object.id)
                    .packed_uints(2, keys)
                    .packed_uints(3, vals);
                if object.author.is_present() {
                    let info = self.info(&object.author);
                    way.message(4, &info);
                }
                way.packed_delta_sints(8, refs.iter().copied());
                self.push_message(way);
            }
            Geometry::Relation(members) => {
                let (keys, vals) = self.tag_columns(&object.tags);
                let roles: Vec<u64> = members
                    .iter()
                    .map(|m| u64::from(self.intern(&m.role)))
                    .collect();
                let mut relation = Message::new();
                relation
                    .int(1, object.id)
                    .packed_uints(2, keys)
                    .packed_uints(3, vals);
                if object.author.is_present() {
                    let info = self.info(&object.author);
                    relation.message(4, &info);
                }
                relation
                    .packed_uints(8, roles)
                    .packed_delta_sints(9, members.iter().map(|m| m.id))
                    .packed_uints(10, members.iter().map(|m| m.kind.index() as u64));
                self.push_message(relation);
            }
        }
    }

    /// Encode and reset; returns the raw `PrimitiveBlock` bytes
    fn take_block(&mut self) -> Vec<u8> {
        let builder = std::mem::take(self);

        let mut table = Message::new();
        for s in &builder.strings {
            table.bytes(1, s.as_bytes());
        }

        let mut group = Message::new();
        match builder.kind {
            Some(Kind::Node) => {
                let mut dense = Message::new();
                dense.packed_delta_sints(1, builder.ids);
                if builder.has_info {
                    let mut info = Message::new();
                    info.packed_uints(1, builder.versions)
                        .packed_delta_sints(2, builder.timestamps)
                        .packed_delta_sints(3, builder.changesets)
                        .packed_delta_sints(4, builder.uids)
                        .packed_delta_sints(5, builder.user_sids);
                    dense.message(5, &info);
                }
                dense
                    .packed_delta_sints(8, builder.lats)
                    .packed_delta_sints(9, builder.lons);
                if builder.has_tags {
                    dense.packed_uints(10, builder.keys_vals);
                }
                group.message(2, &dense);
            }
            Some(Kind::Way) => {
                for way in &builder.messages {
                    group.message(3, way);
                }
            }
            Some(Kind::Relation) => {
                for relation in &builder.messages {
                    group.message(4, relation);
                }
            }
            None => {}
        }

        let mut block = Message::new();
        block.message(1, &table).message(2, &group);
        block.into_bytes()
    }
}

/// Writes objects as an OSM PBF file with zlib-compressed blobs
pub struct PbfWriter<W: Write> {
    output: W,
    block: BlockBuilder,
    compression: Compression,
    skipped_deletes: u64,
}

impl<W: Write> PbfWriter<W> {
    pub fn new(output: W, header: &StreamHeader) -> Result<Self> {
        let mut writer = Self {
            output,
            block: BlockBuilder::default(),
            compression: Compression::default(),
            skipped_deletes: 0,
        };

        let mut block = Message::new();
        if let Some(bbox) = header.bbox {
            let mut edges = Message::new();
            edges
                .sint(1, i64::from(bbox.min_lon) * NANO_PER_UNIT)
                .sint(2, i64::from(bbox.max_lon) * NANO_PER_UNIT)
                .sint(3, i64::from(bbox.max_lat) * NANO_PER_UNIT)
                .sint(4, i64::from(bbox.min_lat) * NANO_PER_UNIT);
            block.message(1, &edges);
        }
        for feature in REQUIRED_FEATURES {
            block.bytes(4, feature.as_bytes());
        }
        block.bytes(16, WRITING_PROGRAM.as_bytes());
        if let Some(ts) = header.timestamp {
            block.int(32, ts);
        }
        writer.write_blob(BLOB_HEADER, &block.into_bytes())?;
        Ok(writer)
    }

    fn write_blob(&mut self, blob_type: &str, raw: &[u8]) -> Result<()> {
        let mut encoder = ZlibEncoder::new(Vec::new(), self.compression);
        encoder.write_all(raw).map_err(Error::WriteFailed)?;
        let compressed = encoder.finish().map_err(Error::WriteFailed)?;

        let mut blob = Message::new();
        blob.int(2, raw.len() as i64).bytes(3, &compressed);
        let blob = blob.into_bytes();

        let mut blob_header = Message::new();
        blob_header
            .bytes(1, blob_type.as_bytes())
            .int(3, blob.len() as i64);
        let blob_header = blob_header.into_bytes();

        self.output
            .write_u32::<BigEndian>(blob_header.len() as u32)
            .map_err(Error::WriteFailed)?;
        self.output.write_all(&blob_header).map_err(Error::WriteFailed)?;
        self.output.write_all(&blob).map_err(Error::WriteFailed)
    }

    fn flush_block(&mut self) -> Result<()> {
        if self.block.is_empty() {
            return Ok(());
        }
        let raw = self.block.take_block();
        self.write_blob(BLOB_DATA, &raw)
    }
}

impl<W: Write> ObjectWriter for PbfWriter<W> {
    fn write(&mut self, object: &Object) -> Result<()> {
        if object.is_deleted() {
            self.skipped_deletes += 1;
            return Ok(());
        }
        let full = self.block.kind != Some(object.kind())
            || self.block.count >= BLOCK_OBJECT_LIMIT
            || BLOCK_FRAMING + self.block.size + self.block.bound(object) > BLOCK_SIZE_LIMIT;
        if full {
            self.flush_block()?;
        }
        self.block.push(object);
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.flush_block()?;
        if self.skipped_deletes > 0 {
            debug!("{} delete records have no PBF form, skipped", self.skipped_deletes);
        }
        self.output.flush().map_err(Error::WriteFailed)
    }
}
