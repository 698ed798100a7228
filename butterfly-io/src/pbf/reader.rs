//! Streaming PBF decoder

use std::io::{ErrorKind, Read};

use butterfly_common::{Error, Result};
use byteorder::{BigEndian, ByteOrder};
use flate2::read::ZlibDecoder;
use log::debug;

use super::proto::{packed_delta_sints, packed_uvars, Fields, Value, WireError};
use super::{
    BLOB_DATA, BLOB_HEADER, MAX_BLOB_HEADER_LEN, MAX_BLOB_LEN, NANO_PER_UNIT, REQUIRED_FEATURES,
    SUPPORTED_FEATURES,
};
use crate::model::{Action, Author, BBox, Coord, Geometry, Kind, Member, Object, StreamHeader};
use crate::stream::{CapacityGuard, Limits, ObjectReader};

const FORMAT: &str = "pbf";

/// Decoder progress; one variant per stage
enum DecodeState {
    /// Nothing read yet; the first blob must be an `OSMHeader`
    AwaitHeader,
    /// Between blocks
    AwaitData,
    /// Handing out the objects of the last decoded block
    Draining(std::vec::IntoIter<Object>),
    Finished,
}

/// Decodes an OSM PBF stream block by block
pub struct PbfReader<R> {
    input: R,
    offset: u64,
    header: StreamHeader,
    state: DecodeState,
    guard: CapacityGuard,
}

impl<R: Read> PbfReader<R> {
    /// Read and validate the header block
    pub fn new(input: R, limits: Limits) -> Result<Self> {
        let mut reader = Self {
            input,
            offset: 0,
            header: StreamHeader::default(),
            state: DecodeState::AwaitHeader,
            guard: CapacityGuard::new(limits),
        };
        reader.step()?;
        Ok(reader)
    }

    /// Fill `buf` completely; `Ok(false)` on a clean end of stream before
    /// the first byte.
    fn read_exact_or_eof(&mut self, buf: &mut [u8]) -> Result<bool> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.input.read(&mut buf[filled..]) {
                Ok(0) if filled == 0 => return Ok(false),
                Ok(0) => {
                    return Err(Error::malformed(
                        FORMAT,
                        self.offset + filled as u64,
                        format!("unexpected end of stream, {} bytes missing", buf.len() - filled),
                    ))
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.offset += filled as u64;
        Ok(true)
    }

    /// Next `(type, uncompressed payload, start offset)`, `None` at end of stream
    fn read_blob(&mut self) -> Result<Option<(String, Vec<u8>, u64)>> {
        let start = self.offset;
        let mut len_bytes = [0u8; 4];
        if !self.read_exact_or_eof(&mut len_bytes)? {
            return Ok(None);
        }
        let header_len = BigEndian::read_u32(&len_bytes) as usize;
        if header_len > MAX_BLOB_HEADER_LEN {
            return Err(Error::malformed(
                FORMAT,
                start,
                format!("blob header of {header_len} bytes exceeds limit"),
            ));
        }
        let mut header = vec![0u8; header_len];
        if !self.read_exact_or_eof(&mut header)? {
            return Err(Error::malformed(FORMAT, start, "missing blob header"));
        }

        let mut blob_type = None;
        let mut data_size = None;
        for field in Fields::new(&header) {
            let (number, value) = field.map_err(|e| wire(start, e))?;
            match number {
                1 => {
                    let bytes = value
                        .as_bytes()
                        .ok_or_else(|| Error::malformed(FORMAT, start, "blob type is not a string"))?;
                    blob_type = Some(String::from_utf8_lossy(bytes).into_owned());
                }
                3 => data_size = value.as_u64(),
                _ => {}
            }
        }
        let blob_type =
            blob_type.ok_or_else(|| Error::malformed(FORMAT, start, "blob header without type"))?;
        let data_size = data_size
            .ok_or_else(|| Error::malformed(FORMAT, start, "blob header without data size"))?
            as usize;
        if data_size > MAX_BLOB_LEN {
            return Err(Error::malformed(
                FORMAT,
                start,
                format!("blob of {data_size} bytes exceeds limit"),
            ));
        }

        let blob_start = self.offset;
        let mut blob = vec![0u8; data_size];
        if !self.read_exact_or_eof(&mut blob)? && data_size > 0 {
            return Err(Error::malformed(FORMAT, blob_start, "missing blob body"));
        }
        let payload = decompress(&blob, blob_start)?;
        Ok(Some((blob_type, payload, blob_start)))
    }

    /// Advance the state machine by one transition
    fn step(&mut self) -> Result<Option<Object>> {
        match std::mem::replace(&mut self.state, DecodeState::Finished) {
            DecodeState::AwaitHeader => {
                let Some((blob_type, payload, start)) = self.read_blob()? else {
                    return Err(Error::malformed(FORMAT, 0, "empty stream, no header block"));
                };
                if blob_type != BLOB_HEADER {
                    return Err(Error::malformed(
                        FORMAT,
                        start,
                        format!("expected {BLOB_HEADER} block, found {blob_type}"),
                    ));
                }
                self.header = decode_header_block(&payload, start)?;
                self.state = DecodeState::AwaitData;
                Ok(None)
            }
            DecodeState::AwaitData => {
                match self.read_blob()? {
                    None => self.state = DecodeState::Finished,
                    Some((blob_type, payload, start)) if blob_type == BLOB_DATA => {
                        let mut objects = decode_primitive_block(&payload, start)?;
                        for object in &mut objects {
                            self.guard.enforce(object);
                        }
                        self.state = DecodeState::Draining(objects.into_iter());
                    }
                    Some((blob_type, _, start)) => {
                        debug!("skipping {blob_type} blob at byte {start}");
                        self.state = DecodeState::AwaitData;
                    }
                }
                Ok(None)
            }
            DecodeState::Draining(mut objects) => match objects.next() {
                Some(object) => {
                    self.state = DecodeState::Draining(objects);
                    Ok(Some(object))
                }
                None => {
                    self.state = DecodeState::AwaitData;
                    Ok(None)
                }
            },
            DecodeState::Finished => Ok(None),
        }
    }
}

impl<R: Read> ObjectReader for PbfReader<R> {
    fn header(&self) -> &StreamHeader {
        &self.header
    }

    fn read_next(&mut self) -> Result<Option<Object>> {
        loop {
            if let DecodeState::Finished = self.state {
                return Ok(None);
            }
            if let Some(object) = self.step()? {
                return Ok(Some(object));
            }
        }
    }
}

fn wire(offset: u64, e: WireError) -> Error {
    Error::malformed(FORMAT, offset, e.0)
}

fn decompress(blob: &[u8], offset: u64) -> Result<Vec<u8>> {
    let mut raw = None;
    let mut raw_size = None;
    let mut zlib = None;
    for field in Fields::new(blob) {
        let (number, value) = field.map_err(|e| wire(offset, e))?;
        match number {
            1 => raw = value.as_bytes(),
            2 => raw_size = value.as_u64().map(|v| v as usize),
            3 => zlib = value.as_bytes(),
            4 => return Err(Error::Unsupported("LZMA-compressed PBF blobs".into())),
            5 => return Err(Error::Unsupported("bzip2-compressed PBF blobs".into())),
            6 => return Err(Error::Unsupported("LZ4-compressed PBF blobs".into())),
            7 => return Err(Error::Unsupported("ZSTD-compressed PBF blobs".into())),
            _ => {}
        }
    }
    if let Some(raw) = raw {
        return Ok(raw.to_vec());
    }
    let zlib = zlib.ok_or_else(|| Error::malformed(FORMAT, offset, "blob without data"))?;
    let expected = raw_size.unwrap_or(0);
    if expected > MAX_BLOB_LEN {
        return Err(Error::malformed(
            FORMAT,
            offset,
            format!("declared raw size {expected} exceeds limit"),
        ));
    }
    let mut out = Vec::with_capacity(expected);
    ZlibDecoder::new(zlib)
        .take(MAX_BLOB_LEN as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| Error::malformed(FORMAT, offset, format!("zlib: {e}")))?;
    if raw_size.is_some() && out.len() != expected {
        return Err(Error::malformed(
            FORMAT,
            offset,
            format!("blob inflated to {} bytes, header says {expected}", out.len()),
        ));
    }
    Ok(out)
}

fn decode_header_block(payload: &[u8], offset: u64) -> Result<StreamHeader> {
    let mut header = StreamHeader::default();
    let mut required = [false; REQUIRED_FEATURES.len()];
    for field in Fields::new(payload) {
        let (number, value) = field.map_err(|e| wire(offset, e))?;
        match number {
            1 => {
                let bytes = value
                    .as_bytes()
                    .ok_or_else(|| Error::malformed(FORMAT, offset, "bad header bbox"))?;
                let mut edges = [0i64; 4];
                for f in Fields::new(bytes) {
                    let (n, v) = f.map_err(|e| wire(offset, e))?;
                    if (1..=4).contains(&n) {
                        edges[n as usize - 1] = v.as_sint().unwrap_or(0);
                    }
                }
                let [left, right, top, bottom] = edges.map(nano_to_fixed);
                header.bbox = Some(BBox::new(left, bottom, right, top));
            }
            4 => {
                let feature = String::from_utf8_lossy(value.as_bytes().unwrap_or_default());
                if !SUPPORTED_FEATURES.contains(&feature.as_ref()) {
                    return Err(Error::Unsupported(format!(
                        "PBF required feature '{feature}'"
                    )));
                }
                if let Some(i) = REQUIRED_FEATURES.iter().position(|f| *f == feature) {
                    required[i] = true;
                }
            }
            32 => header.timestamp = value.as_i64(),
            _ => {}
        }
    }
    if let Some(i) = required.iter().position(|seen| !seen) {
        return Err(Error::Unsupported(format!(
            "PBF header without required feature '{}'",
            REQUIRED_FEATURES[i]
        )));
    }
    Ok(header)
}

fn nano_to_fixed(nano: i64) -> i32 {
    (nano + NANO_PER_UNIT / 2).div_euclid(NANO_PER_UNIT) as i32
}

/// Per-block coordinate and time scaling
struct BlockDecoder {
    strings: Vec<String>,
    granularity: i64,
    lat_offset: i64,
    lon_offset: i64,
    date_granularity: i64,
    offset: u64,
}

fn decode_primitive_block(payload: &[u8], offset: u64) -> Result<Vec<Object>> {
    let mut decoder = BlockDecoder {
        strings: Vec::new(),
        granularity: 100,
        lat_offset: 0,
        lon_offset: 0,
        date_granularity: 1000,
        offset,
    };
    let mut groups = Vec::new();
    for field in Fields::new(payload) {
        let (number, value) = field.map_err(|e| wire(offset, e))?;
        match (number, value) {
            (1, Value::Bytes(table)) => {
                for s in Fields::new(table) {
                    let (n, v) = s.map_err(|e| wire(offset, e))?;
                    if let (1, Value::Bytes(bytes)) = (n, v) {
                        decoder.strings.push(String::from_utf8_lossy(bytes).into_owned());
                    }
                }
            }
            (2, Value::Bytes(group)) => groups.push(group),
            (17, v) => decoder.granularity = v.as_i64().unwrap_or(100),
            (18, v) => decoder.date_granularity = v.as_i64().unwrap_or(1000),
            (19, v) => decoder.lat_offset = v.as_i64().unwrap_or(0),
            (20, v) => decoder.lon_offset = v.as_i64().unwrap_or(0),
            _ => {}
        }
    }

    let mut objects = Vec::new();
    for group in groups {
        for field in Fields::new(group) {
            let (number, value) = field.map_err(|e| wire(offset, e))?;
            let Value::Bytes(bytes) = value else { continue };
            match number {
                1 => objects.push(decoder.node(bytes)?),
                2 => decoder.dense_nodes(bytes, &mut objects)?,
                3 => objects.push(decoder.way(bytes)?),
                4 => objects.push(decoder.relation(bytes)?),
                _ => {}
            }
        }
    }
    Ok(objects)
}

impl BlockDecoder {
    fn bad(&self, message: impl Into<String>) -> Error {
        Error::malformed(FORMAT, self.offset, message)
    }

    fn string(&self, index: u64) -> Result<String> {
        self.strings
            .get(index as usize)
            .cloned()
            .ok_or_else(|| self.bad(format!("string index {index} outside table")))
    }

    fn coord(&self, raw_lon: i64, raw_lat: i64) -> Coord {
        Coord::new(
            nano_to_fixed(self.lon_offset + self.granularity * raw_lon),
            nano_to_fixed(self.lat_offset + self.granularity * raw_lat),
        )
    }

    fn seconds(&self, raw: i64) -> i64 {
        raw * self.date_granularity / 1000
    }

    fn tags(&self, keys: &[u64], vals: &[u64]) -> Result<Vec<(String, String)>> {
        if keys.len() != vals.len() {
            return Err(self.bad("key and value counts differ"));
        }
        keys.iter()
            .zip(vals)
            .map(|(&k, &v)| Ok((self.string(k)?, self.string(v)?)))
            .collect()
    }

    /// `Info` message; returns author and the visible flag
    fn info(&self, bytes: &[u8]) -> Result<(Author, bool)> {
        let mut author = Author::default();
        let mut visible = true;
        for field in Fields::new(bytes) {
            let (number, value) = field.map_err(|e| wire(self.offset, e))?;
            match number {
                1 => author.version = value.as_i64().unwrap_or(0).max(0) as u32,
                2 => author.timestamp = self.seconds(value.as_i64().unwrap_or(0)),
                3 => author.changeset = value.as_i64().unwrap_or(0),
                4 => author.uid = value.as_i64().unwrap_or(0).max(0) as u32,
                5 => author.user = self.string(value.as_u64().unwrap_or(0))?,
                6 => visible = value.as_u64().unwrap_or(1) != 0,
                _ => {}
            }
        }
        Ok((author, visible))
    }

    fn finish(&self, mut object: Object, visible: bool) -> Object {
        if !visible {
            object.action = Action::Delete;
            object.geometry = Geometry::empty(object.kind());
        }
        object
    }

    fn node(&self, bytes: &[u8]) -> Result<Object> {
        let (mut id, mut lat, mut lon) = (0, 0, 0);
        let (mut keys, mut vals) = (Vec::new(), Vec::new());
        let mut author = Author::default();
        let mut visible = true;
        for field in Fields::new(bytes) {
            let (number, value) = field.map_err(|e| wire(self.offset, e))?;
            match (number, value) {
                (1, v) => id = v.as_sint().unwrap_or(0),
                (2, Value::Bytes(b)) => keys = packed_uvars(b).map_err(|e| wire(self.offset, e))?,
                (3, Value::Bytes(b)) => vals = packed_uvars(b).map_err(|e| wire(self.offset, e))?,
                (4, Value::Bytes(b)) => (author, visible) = self.info(b)?,
                (8, v) => lat = v.as_sint().unwrap_or(0),
                (9, v) => lon = v.as_sint().unwrap_or(0),
                _ => {}
            }
        }
        let object = Object {
            id,
            author,
            tags: self.tags(&keys, &vals)?,
            geometry: Geometry::Node(self.coord(lon, lat)),
            action: Action::Plain,
        };
        Ok(self.finish(object, visible))
    }

    fn dense_nodes(&self, bytes: &[u8], out: &mut Vec<Object>) -> Result<()> {
        let w = |e| wire(self.offset, e);
        let (mut ids, mut lats, mut lons) = (Vec::new(), Vec::new(), Vec::new());
        let mut keys_vals = Vec::new();
        let mut info = None;
        for field in Fields::new(bytes) {
            let (number, value) = field.map_err(w)?;
            let Value::Bytes(b) = value else { continue };
            match number {
                1 => ids = packed_delta_sints(b).map_err(w)?,
                5 => info = Some(b),
                8 => lats = packed_delta_sints(b).map_err(w)?,
                9 => lons = packed_delta_sints(b).map_err(w)?,
                10 => keys_vals = packed_uvars(b).map_err(w)?,
                _ => {}
            }
        }
        if lats.len() != ids.len() || lons.len() != ids.len() {
            return Err(self.bad("dense node columns differ in length"));
        }

        let mut versions = Vec::new();
        let (mut timestamps, mut changesets, mut uids, mut users) =
            (Vec::new(), Vec::new(), Vec::new(), Vec::new());
        let mut visibles = Vec::new();
        if let Some(info) = info {
            for field in Fields::new(info) {
                let (number, value) = field.map_err(w)?;
                let Value::Bytes(b) = value else { continue };
                match number {
                    1 => versions = packed_uvars(b).map_err(w)?,
                    2 => timestamps = packed_delta_sints(b).map_err(w)?,
                    3 => changesets = packed_delta_sints(b).map_err(w)?,
                    4 => uids = packed_delta_sints(b).map_err(w)?,
                    5 => users = packed_delta_sints(b).map_err(w)?,
                    6 => visibles = packed_uvars(b).map_err(w)?,
                    _ => {}
                }
            }
        }

        let mut kv = keys_vals.iter().copied();
        for i in 0..ids.len() {
            let mut tags = Vec::new();
            if !keys_vals.is_empty() {
                loop {
                    match kv.next() {
                        None | Some(0) => break,
                        Some(k) => {
                            let v = kv
                                .next()
                                .ok_or_else(|| self.bad("dense keys_vals ends inside a pair"))?;
                            tags.push((self.string(k)?, self.string(v)?));
                        }
                    }
                }
            }
            let mut author = Author::default();
            if let Some(&version) = versions.get(i) {
                author.version = (version as i64).max(0) as u32;
                author.timestamp = self.seconds(timestamps.get(i).copied().unwrap_or(0));
                author.changeset = changesets.get(i).copied().unwrap_or(0);
                author.uid = uids.get(i).copied().unwrap_or(0).max(0) as u32;
                author.user = match users.get(i) {
                    Some(&sid) => self.string(sid.max(0) as u64)?,
                    None => String::new(),
                };
            }
            let visible = visibles.get(i).map_or(true, |&v| v != 0);
            let object = Object {
                id: ids[i],
                author,
                tags,
                geometry: Geometry::Node(self.coord(lons[i], lats[i])),
                action: Action::Plain,
            };
            out.push(self.finish(object, visible));
        }
        Ok(())
    }

    fn way(&self, bytes: &[u8]) -> Result<Object> {
        let w = |e| wire(self.offset, e);
        let mut id = 0;
        let (mut keys, mut vals, mut refs) = (Vec::new(), Vec::new(), Vec::new());
        let mut author = Author::default();
        let mut visible = true;
        for field in Fields::new(bytes) {
            let (number, value) = field.map_err(w)?;
            match (number, value) {
                (1, v) => id = v.as_i64().unwrap_or(0),
                (2, Value::Bytes(b)) => keys = packed_uvars(b).map_err(w)?,
                (3, Value::Bytes(b)) => vals = packed_uvars(b).map_err(w)?,
                (4, Value::Bytes(b)) => (author, visible) = self.info(b)?,
                (8, Value::Bytes(b)) => refs = packed_delta_sints(b).map_err(w)?,
                _ => {}
            }
        }
        let object = Object {
            id,
            author,
            tags: self.tags(&keys, &vals)?,
            geometry: Geometry::Way(refs),
            action: Action::Plain,
        };
        Ok(self.finish(object, visible))
    }

    fn relation(&self, bytes: &[u8]) -> Result<Object> {
        let w = |e| wire(self.offset, e);
        let mut id = 0;
        let (mut keys, mut vals) = (Vec::new(), Vec::new());
        let (mut roles, mut member_ids, mut types) = (Vec::new(), Vec::new(), Vec::new());
        let mut author = Author::default();
        let mut visible = true;
        for field in Fields::new(bytes) {
            let (number, value) = field.map_err(w)?;
            match (number, value) {
                (1, v) => id = v.as_i64().unwrap_or(0),
                (2, Value::Bytes(b)) => keys = packed_uvars(b).map_err(w)?,
                (3, Value::Bytes(b)) => vals = packed_uvars(b).map_err(w)?,
                (4, Value::Bytes(b)) => (author, visible) = self.info(b)?,
                (8, Value::Bytes(b)) => roles = packed_uvars(b).map_err(w)?,
                (9, Value::Bytes(b)) => member_ids = packed_delta_sints(b).map_err(w)?,
                (10, Value::Bytes(b)) => types = packed_uvars(b).map_err(w)?,
                _ => {}
            }
        }
        if roles.len() != member_ids.len() || types.len() != member_ids.len() {
            return Err(self.bad(format!("relation {id}: member columns differ in length")));
        }
        let mut members = Vec::with_capacity(member_ids.len());
        for ((&member_id, &role), &kind) in member_ids.iter().zip(&roles).zip(&types) {
            let kind = Kind::from_index(kind)
                .ok_or_else(|| self.bad(format!("relation {id}: member type {kind}")))?;
            members.push(Member {
                id: member_id,
                kind,
                role: self.string(role)?,
            });
        }
        let object = Object {
            id,
            author,
            tags: self.tags(&keys, &vals)?,
            geometry: Geometry::Relation(members),
            action: Action::Plain,
        };
        Ok(self.finish(object, visible))
    }
}
