//! Streaming OSM XML decoder for `.osm`, `.osc` and `.osh` input

use std::io::BufRead;
use std::str::FromStr;

use butterfly_common::{Error, Result, Throttle};
use log::debug;

use super::tokenizer::{Tag, TagKind, Tokenizer};
use crate::model::{Action, Author, BBox, Coord, Geometry, Kind, Member, Object, StreamHeader};
use crate::stream::{CapacityGuard, Limits, ObjectReader};
use crate::text::{parse_fixed7, parse_timestamp};

const FORMAT: &str = "xml";

fn object_kind(tag: &Tag) -> Option<Kind> {
    match tag.kind {
        TagKind::Open | TagKind::Empty => Kind::from_name(&tag.name),
        TagKind::Close => None,
    }
}

fn section_action(name: &str) -> Option<Action> {
    match name {
        "create" => Some(Action::Create),
        "modify" => Some(Action::Modify),
        "delete" => Some(Action::Delete),
        _ => None,
    }
}

/// Reads `<osm>` and `<osmChange>` documents
pub struct XmlReader<R> {
    tokens: Tokenizer<R>,
    header: StreamHeader,
    change: bool,
    section: Action,
    pending: Option<Tag>,
    guard: CapacityGuard,
    bad_members: Throttle,
}

impl<R: BufRead> XmlReader<R> {
    /// Consume everything up to the first object so that the header is
    /// known before reading starts.
    pub fn new(input: R, limits: Limits) -> Result<Self> {
        let mut reader = Self {
            tokens: Tokenizer::new(input),
            header: StreamHeader::default(),
            change: false,
            section: Action::Plain,
            pending: None,
            guard: CapacityGuard::new(limits),
            bad_members: Throttle::new("unknown member type"),
        };
        while let Some(tag) = reader.tokens.next_tag()? {
            if object_kind(&tag).is_some() {
                reader.pending = Some(tag);
                break;
            }
            reader.structural(&tag)?;
        }
        Ok(reader)
    }

    /// Whether the document root is `<osmChange>`
    pub fn is_change(&self) -> bool {
        self.change
    }

    /// Handle a tag outside of any object
    fn structural(&mut self, tag: &Tag) -> Result<()> {
        if let Some(action) = section_action(&tag.name) {
            match tag.kind {
                TagKind::Open => self.section = action,
                TagKind::Close => self.section = Action::Plain,
                TagKind::Empty => {}
            }
            return Ok(());
        }
        if tag.kind == TagKind::Close {
            return Ok(());
        }
        match tag.name.as_str() {
            "osm" | "osmChange" => {
                self.change = tag.name == "osmChange";
                if let Some(ts) = tag.attr("timestamp") {
                    self.header.timestamp = Some(parse_timestamp(ts).ok_or_else(|| {
                        Error::malformed(FORMAT, tag.offset, format!("bad file timestamp {ts:?}"))
                    })?);
                }
            }
            "bounds" => {
                let edges = ["minlon", "minlat", "maxlon", "maxlat"]
                    .map(|name| tag.attr(name).and_then(parse_fixed7));
                if let [Some(x1), Some(y1), Some(x2), Some(y2)] = edges {
                    self.header.bbox = Some(BBox::new(x1, y1, x2, y2));
                } else {
                    debug!("ignoring incomplete <bounds> at byte {}", tag.offset);
                }
            }
            "bound" => {
                let edges: Option<Vec<i32>> = tag
                    .attr("box")
                    .and_then(|b| b.split(',').map(parse_fixed7).collect());
                match edges.as_deref() {
                    Some(&[y1, x1, y2, x2]) => self.header.bbox = Some(BBox::new(x1, y1, x2, y2)),
                    _ => debug!("ignoring malformed <bound> at byte {}", tag.offset),
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn read_object(&mut self, kind: Kind, head: Tag) -> Result<Object> {
        let offset = head.offset;
        let id: i64 = number(&head, "id")?
            .ok_or_else(|| Error::malformed(FORMAT, offset, format!("<{}> without id", head.name)))?;

        let mut author = Author {
            version: number(&head, "version")?.unwrap_or(0),
            changeset: number(&head, "changeset")?.unwrap_or(0),
            uid: number(&head, "uid")?.unwrap_or(0),
            user: head.attr("user").unwrap_or_default().to_owned(),
            ..Author::default()
        };
        if let Some(ts) = head.attr("timestamp") {
            author.timestamp = parse_timestamp(ts).ok_or_else(|| {
                Error::malformed(FORMAT, offset, format!("bad timestamp {ts:?}"))
            })?;
        }

        let invisible = head
            .attr("visible")
            .is_some_and(|v| v.starts_with(['f', 'n']));
        let delete_action = head.attr("action").is_some_and(|v| v.starts_with("de"));
        let action = if invisible || delete_action {
            Action::Delete
        } else {
            self.section
        };

        let mut geometry = match kind {
            Kind::Node => {
                let lon = coordinate(&head, "lon")?;
                let lat = coordinate(&head, "lat")?;
                Geometry::Node(Coord::new(lon, lat))
            }
            other => Geometry::empty(other),
        };
        let mut tags = Vec::new();

        if head.kind == TagKind::Open {
            loop {
                let child = self.tokens.next_tag()?.ok_or_else(|| {
                    Error::malformed(FORMAT, offset, format!("unterminated <{}>", head.name))
                })?;
                if child.kind == TagKind::Close {
                    if child.name == head.name {
                        break;
                    }
                    continue;
                }
                match (child.name.as_str(), &mut geometry) {
                    ("tag", _) => {
                        if let Some(k) = child.attr("k") {
                            let v = child.attr("v").unwrap_or_default();
                            tags.push((k.to_owned(), v.to_owned()));
                        }
                    }
                    ("nd", Geometry::Way(refs)) => {
                        if let Some(r) = number(&child, "ref")? {
                            refs.push(r);
                        }
                    }
                    ("member", Geometry::Relation(members)) => {
                        let Some(r) = number(&child, "ref")? else {
                            continue;
                        };
                        let type_name = child.attr("type").unwrap_or_default();
                        match Kind::from_name(type_name) {
                            Some(member_kind) => members.push(Member::new(
                                member_kind,
                                r,
                                child.attr("role").unwrap_or_default(),
                            )),
                            None => self.bad_members.warn(format!(
                                "relation {id} member {r} has type {type_name:?}"
                            )),
                        }
                    }
                    ("node" | "way" | "relation", _) => {
                        return Err(Error::malformed(
                            FORMAT,
                            child.offset,
                            format!("<{}> nested inside <{}>", child.name, head.name),
                        ));
                    }
                    _ => {}
                }
            }
        }

        let mut object = Object {
            id,
            author,
            tags,
            geometry,
            action,
        };
        self.guard.enforce(&mut object);
        Ok(object)
    }
}

fn number<T: FromStr>(tag: &Tag, name: &str) -> Result<Option<T>> {
    match tag.attr(name) {
        None => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|_| {
            Error::malformed(
                FORMAT,
                tag.offset,
                format!("<{}> attribute {name}={raw:?} is not a number", tag.name),
            )
        }),
    }
}

/// Missing coordinates read as 0, as delete records often omit them
fn coordinate(tag: &Tag, name: &str) -> Result<i32> {
    match tag.attr(name) {
        None => Ok(0),
        Some(raw) => parse_fixed7(raw).ok_or_else(|| {
            Error::malformed(
                FORMAT,
                tag.offset,
                format!("<{}> attribute {name}={raw:?} is not a coordinate", tag.name),
            )
        }),
    }
}

impl<R: BufRead> ObjectReader for XmlReader<R> {
    fn header(&self) -> &StreamHeader {
        &self.header
    }

    fn read_next(&mut self) -> Result<Option<Object>> {
        loop {
            let tag = match self.pending.take() {
                Some(tag) => tag,
                None => match self.tokens.next_tag()? {
                    Some(tag) => tag,
                    None => return Ok(None),
                },
            };
            match object_kind(&tag) {
                Some(kind) => return self.read_object(kind, tag).map(Some),
                None => self.structural(&tag)?,
            }
        }
    }
}

impl<R> Drop for XmlReader<R> {
    fn drop(&mut self) {
        self.bad_members.summarize();
    }
}
