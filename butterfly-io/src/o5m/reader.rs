//! Streaming o5m/o5c decoder

use std::io::{BufRead, ErrorKind, Read};

use butterfly_common::{Error, Result, Throttle};
use log::debug;

use super::strings::{StringError, StringRing};
use super::{
    Delta, BBOX_DATASET, END_OF_FILE, FORMAT_TAG_CHANGE, FORMAT_TAG_DATA, HEADER_DATASET,
    MAX_DATASET_LEN, NODE_DATASET, RELATION_DATASET, RESET, TIMESTAMP_DATASET, WAY_DATASET,
};
use crate::model::{Action, Author, BBox, Coord, Geometry, Kind, Member, Object, StreamHeader};
use crate::stream::{CapacityGuard, Limits, ObjectReader};
use crate::varint::Cursor;

const FORMAT: &str = "o5m";

enum Dataset {
    Object(Object),
    Reset,
    End,
    Other,
}

/// Decodes an o5m or o5c byte stream into objects
pub struct O5mReader<R> {
    input: R,
    offset: u64,
    header: StreamHeader,
    change: bool,
    strings: StringRing,
    delta: Delta,
    guard: CapacityGuard,
    unknown: Throttle,
    body: Vec<u8>,
    finished: bool,
}

impl<R: BufRead> O5mReader<R> {
    /// Check the signature and consume the header datasets preceding the
    /// first object.
    pub fn new(input: R, limits: Limits) -> Result<Self> {
        let mut reader = Self {
            input,
            offset: 0,
            header: StreamHeader::default(),
            change: false,
            strings: StringRing::new(),
            delta: Delta::default(),
            guard: CapacityGuard::new(limits),
            unknown: Throttle::new("unknown o5m dataset"),
            body: Vec::new(),
            finished: false,
        };
        if reader.read_byte()? != Some(RESET) {
            return Err(Error::malformed(FORMAT, 0, "missing leading reset byte"));
        }
        loop {
            match reader.peek_byte()? {
                None => {
                    reader.finished = true;
                    break;
                }
                Some(NODE_DATASET..=RELATION_DATASET) => break,
                Some(_) => {
                    if let Dataset::End = reader.read_dataset()? {
                        reader.finished = true;
                        break;
                    }
                }
            }
        }
        Ok(reader)
    }

    /// Whether the signature announced a change file
    pub fn is_change(&self) -> bool {
        self.change
    }

    fn peek_byte(&mut self) -> Result<Option<u8>> {
        loop {
            match self.input.fill_buf() {
                Ok(buf) => return Ok(buf.first().copied()),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn read_byte(&mut self) -> Result<Option<u8>> {
        let b = self.peek_byte()?;
        if b.is_some() {
            self.input.consume(1);
            self.offset += 1;
        }
        Ok(b)
    }

    fn read_length(&mut self) -> Result<usize> {
        let start = self.offset;
        let mut value = 0u64;
        for shift in (0..70).step_by(7) {
            let b = self
                .read_byte()?
                .ok_or_else(|| Error::malformed(FORMAT, start, "truncated dataset length"))?;
            value |= u64::from(b & 0x7f) << shift;
            if b & 0x80 == 0 {
                if value > MAX_DATASET_LEN as u64 {
                    return Err(Error::malformed(
                        FORMAT,
                        start,
                        format!("dataset of {value} bytes exceeds buffer capacity"),
                    ));
                }
                return Ok(value as usize);
            }
        }
        Err(Error::malformed(FORMAT, start, "overlong dataset length"))
    }

    fn read_body(&mut self, len: usize) -> Result<()> {
        self.body.resize(len, 0);
        match self.input.read_exact(&mut self.body) {
            Ok(()) => {
                self.offset += len as u64;
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(Error::malformed(
                FORMAT,
                self.offset,
                format!("dataset truncated, {len} bytes expected"),
            )),
            Err(e) => Err(e.into()),
        }
    }

    fn read_dataset(&mut self) -> Result<Dataset> {
        let start = self.offset;
        let Some(kind_byte) = self.read_byte()? else {
            return Ok(Dataset::End);
        };
        match kind_byte {
            RESET => {
                self.delta = Delta::default();
                self.strings.reset();
                return Ok(Dataset::Reset);
            }
            END_OF_FILE => return Ok(Dataset::End),
            0xf0..=0xfd => {
                self.unknown
                    .warn(format!("single-byte dataset 0x{kind_byte:02x} at byte {start}"));
                return Ok(Dataset::Other);
            }
            _ => {}
        }

        let len = self.read_length()?;
        self.read_body(len)?;
        let body = std::mem::take(&mut self.body);
        let result = match kind_byte {
            NODE_DATASET => self.decode_object(Kind::Node, &body, start).map(Dataset::Object),
            WAY_DATASET => self.decode_object(Kind::Way, &body, start).map(Dataset::Object),
            RELATION_DATASET => self
                .decode_object(Kind::Relation, &body, start)
                .map(Dataset::Object),
            HEADER_DATASET => self.decode_signature(&body, start).map(|_| Dataset::Other),
            BBOX_DATASET => self.decode_bbox(&body, start).map(|_| Dataset::Other),
            TIMESTAMP_DATASET => {
                let mut cursor = Cursor::new(&body);
                let ts = cursor
                    .read_svar()
                    .ok_or_else(|| Error::malformed(FORMAT, start, "truncated file timestamp"))?;
                self.header.timestamp = Some(ts);
                Ok(Dataset::Other)
            }
            other => {
                debug!("skipping o5m dataset 0x{other:02x} of {len} bytes at byte {start}");
                Ok(Dataset::Other)
            }
        };
        self.body = body;
        result
    }

    fn decode_signature(&mut self, body: &[u8], start: u64) -> Result<()> {
        if body == FORMAT_TAG_DATA {
            self.change = false;
        } else if body == FORMAT_TAG_CHANGE {
            self.change = true;
        } else {
            return Err(Error::malformed(
                FORMAT,
                start,
                format!("unknown format tag {:?}", String::from_utf8_lossy(body)),
            ));
        }
        Ok(())
    }

    fn decode_bbox(&mut self, body: &[u8], start: u64) -> Result<()> {
        let mut cursor = Cursor::new(body);
        let mut next = || {
            cursor
                .read_svar()
                .map(|v| v as i32)
                .ok_or_else(|| Error::malformed(FORMAT, start, "truncated bounding box"))
        };
        let (x1, y1, x2, y2) = (next()?, next()?, next()?, next()?);
        self.header.bbox = Some(BBox::new(x1, y1, x2, y2));
        Ok(())
    }

    fn decode_object(&mut self, kind: Kind, body: &[u8], start: u64) -> Result<Object> {
        let malformed = |message: &str| Error::malformed(FORMAT, start, message);
        let string_error = |e: StringError| match e {
            StringError::Truncated => Error::malformed(FORMAT, start, "truncated string"),
            StringError::BadReference(r) => Error::malformed(
                FORMAT,
                start,
                format!("string reference {r} points outside the table"),
            ),
        };
        let mut c = Cursor::new(body);

        let id = self
            .delta
            .id
            .wrapping_add(c.read_svar().ok_or_else(|| malformed("truncated id"))?);
        self.delta.id = id;

        let mut author = Author::default();
        if !c.is_empty() {
            author.version = c.read_uvar().ok_or_else(|| malformed("truncated version"))? as u32;
            if author.version != 0 {
                let ts = self
                    .delta
                    .timestamp
                    .wrapping_add(c.read_svar().ok_or_else(|| malformed("truncated timestamp"))?);
                self.delta.timestamp = ts;
                author.timestamp = ts;
                if ts != 0 {
                    let cs = self
                        .delta
                        .changeset
                        .wrapping_add(c.read_svar().ok_or_else(|| malformed("truncated changeset"))?);
                    self.delta.changeset = cs;
                    author.changeset = cs;
                    let (uid, user) = self.strings.read_pair(&mut c).map_err(string_error)?;
                    author.uid = Cursor::new(&uid).read_uvar().unwrap_or(0) as u32;
                    author.user = utf8(user);
                }
            }
        }

        if c.is_empty() {
            return Ok(Object {
                author,
                ..Object::deleted(kind, id)
            });
        }

        let geometry = match kind {
            Kind::Node => {
                let lon = self.delta.lon.wrapping_add(
                    c.read_svar().ok_or_else(|| malformed("truncated longitude"))? as i32,
                );
                let lat = self.delta.lat.wrapping_add(
                    c.read_svar().ok_or_else(|| malformed("truncated latitude"))? as i32,
                );
                self.delta.lon = lon;
                self.delta.lat = lat;
                Geometry::Node(Coord::new(lon, lat))
            }
            Kind::Way => {
                let len = c.read_uvar().ok_or_else(|| malformed("truncated reference length"))?;
                let mut refs_area = c
                    .sub_cursor(len as usize)
                    .ok_or_else(|| malformed("reference area exceeds dataset"))?;
                let mut refs = Vec::new();
                while !refs_area.is_empty() {
                    let delta = refs_area
                        .read_svar()
                        .ok_or_else(|| malformed("truncated node reference"))?;
                    self.delta.refs[0] = self.delta.refs[0].wrapping_add(delta);
                    refs.push(self.delta.refs[0]);
                }
                Geometry::Way(refs)
            }
            Kind::Relation => {
                let len = c.read_uvar().ok_or_else(|| malformed("truncated reference length"))?;
                let mut refs_area = c
                    .sub_cursor(len as usize)
                    .ok_or_else(|| malformed("reference area exceeds dataset"))?;
                let mut members = Vec::new();
                while !refs_area.is_empty() {
                    let delta = refs_area
                        .read_svar()
                        .ok_or_else(|| malformed("truncated member reference"))?;
                    let type_role = self
                        .strings
                        .read_single(&mut refs_area)
                        .map_err(string_error)?;
                    let (&type_char, role) = type_role
                        .split_first()
                        .ok_or_else(|| malformed("member without type"))?;
                    let member_kind = type_char
                        .checked_sub(b'0')
                        .and_then(|d| Kind::from_index(u64::from(d)))
                        .ok_or_else(|| malformed("unknown member type"))?;
                    let slot = &mut self.delta.refs[member_kind.index()];
                    *slot = slot.wrapping_add(delta);
                    members.push(Member {
                        id: *slot,
                        kind: member_kind,
                        role: utf8(role.to_vec()),
                    });
                }
                Geometry::Relation(members)
            }
        };

        let mut tags = Vec::new();
        while !c.is_empty() {
            let (k, v) = self.strings.read_pair(&mut c).map_err(string_error)?;
            tags.push((utf8(k), utf8(v)));
        }

        let mut object = Object {
            id,
            author,
            tags,
            geometry,
            action: Action::Plain,
        };
        self.guard.enforce(&mut object);
        Ok(object)
    }
}

fn utf8(bytes: Vec<u8>) -> String {
    String::from_utf8(bytes)
        .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

impl<R: BufRead> ObjectReader for O5mReader<R> {
    fn header(&self) -> &StreamHeader {
        &self.header
    }

    fn read_next(&mut self) -> Result<Option<Object>> {
        while !self.finished {
            match self.read_dataset()? {
                Dataset::Object(object) => return Ok(Some(object)),
                Dataset::End => self.finished = true,
                Dataset::Reset | Dataset::Other => {}
            }
        }
        Ok(None)
    }
}

impl<R> Drop for O5mReader<R> {
    fn drop(&mut self) {
        self.unknown.summarize();
    }
}
