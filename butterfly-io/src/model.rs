//! OSM object model shared by every codec
//!
//! Coordinates are fixed-point WGS84 degrees in units of 1e-7, which is the
//! native precision of the OSM database and fits in an `i32` for the whole
//! valid longitude range.

use std::cmp::Ordering;
use std::fmt;

/// One degree in fixed-point units
pub const COORD_SCALE: i32 = 10_000_000;

/// Object kind; the derived order is the stream order Node < Way < Relation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Kind {
    Node,
    Way,
    Relation,
}

impl Kind {
    pub const ALL: [Kind; 3] = [Kind::Node, Kind::Way, Kind::Relation];

    /// Position in [`Kind::ALL`], used to index per-kind tables
    pub fn index(self) -> usize {
        match self {
            Kind::Node => 0,
            Kind::Way => 1,
            Kind::Relation => 2,
        }
    }

    pub fn from_index(index: u64) -> Option<Kind> {
        match index {
            0 => Some(Kind::Node),
            1 => Some(Kind::Way),
            2 => Some(Kind::Relation),
            _ => None,
        }
    }

    /// Element / member type name used by the XML format
    pub fn name(self) -> &'static str {
        match self {
            Kind::Node => "node",
            Kind::Way => "way",
            Kind::Relation => "relation",
        }
    }

    pub fn from_name(name: &str) -> Option<Kind> {
        match name {
            "node" => Some(Kind::Node),
            "way" => Some(Kind::Way),
            "relation" => Some(Kind::Relation),
            _ => None,
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Fixed-point position, 1e-7 degree units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Coord {
    pub lon: i32,
    pub lat: i32,
}

impl Coord {
    pub fn new(lon: i32, lat: i32) -> Self {
        Self { lon, lat }
    }

    /// Build from floating degrees, rounding to the nearest unit
    pub fn from_degrees(lon: f64, lat: f64) -> Self {
        Self {
            lon: degrees_to_fixed(lon),
            lat: degrees_to_fixed(lat),
        }
    }
}

pub fn degrees_to_fixed(degrees: f64) -> i32 {
    let scaled = (degrees * f64::from(COORD_SCALE)).round();
    scaled.clamp(f64::from(i32::MIN), f64::from(i32::MAX)) as i32
}

pub fn fixed_to_degrees(value: i32) -> f64 {
    f64::from(value) / f64::from(COORD_SCALE)
}

/// Axis-aligned rectangle in fixed-point units, bounds inclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BBox {
    pub min_lon: i32,
    pub min_lat: i32,
    pub max_lon: i32,
    pub max_lat: i32,
}

impl BBox {
    pub fn new(min_lon: i32, min_lat: i32, max_lon: i32, max_lat: i32) -> Self {
        Self {
            min_lon: min_lon.min(max_lon),
            min_lat: min_lat.min(max_lat),
            max_lon: min_lon.max(max_lon),
            max_lat: min_lat.max(max_lat),
        }
    }

    pub fn contains(&self, coord: Coord) -> bool {
        coord.lon >= self.min_lon
            && coord.lon <= self.max_lon
            && coord.lat >= self.min_lat
            && coord.lat <= self.max_lat
    }

    /// Smallest box holding every given position
    pub fn enclosing(coords: impl IntoIterator<Item = Coord>) -> Option<BBox> {
        let mut iter = coords.into_iter();
        let first = iter.next()?;
        let mut bbox = BBox::new(first.lon, first.lat, first.lon, first.lat);
        for c in iter {
            bbox.extend(c);
        }
        Some(bbox)
    }

    pub fn extend(&mut self, coord: Coord) {
        self.min_lon = self.min_lon.min(coord.lon);
        self.min_lat = self.min_lat.min(coord.lat);
        self.max_lon = self.max_lon.max(coord.lon);
        self.max_lat = self.max_lat.max(coord.lat);
    }

    pub fn merge(&mut self, other: &BBox) {
        self.extend(Coord::new(other.min_lon, other.min_lat));
        self.extend(Coord::new(other.max_lon, other.max_lat));
    }

    pub fn center(&self) -> Coord {
        let lon = (i64::from(self.min_lon) + i64::from(self.max_lon)) / 2;
        let lat = (i64::from(self.min_lat) + i64::from(self.max_lat)) / 2;
        Coord::new(lon as i32, lat as i32)
    }
}

/// Author metadata; `version == 0` means the object carries none
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Author {
    pub version: u32,
    /// Seconds since the Unix epoch, 0 when unknown
    pub timestamp: i64,
    pub changeset: i64,
    pub uid: u32,
    pub user: String,
}

impl Author {
    pub fn is_present(&self) -> bool {
        self.version != 0
    }

    /// Whether uid and user name should be written
    pub fn has_user(&self) -> bool {
        self.uid != 0 && !self.user.is_empty()
    }
}

/// Relation member
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub id: i64,
    pub kind: Kind,
    pub role: String,
}

impl Member {
    pub fn new(kind: Kind, id: i64, role: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            role: role.into(),
        }
    }
}

/// Kind-specific payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Geometry {
    Node(Coord),
    Way(Vec<i64>),
    Relation(Vec<Member>),
}

impl Geometry {
    pub fn kind(&self) -> Kind {
        match self {
            Geometry::Node(_) => Kind::Node,
            Geometry::Way(_) => Kind::Way,
            Geometry::Relation(_) => Kind::Relation,
        }
    }

    /// Payload-free geometry of the given kind, as carried by delete records
    pub fn empty(kind: Kind) -> Self {
        match kind {
            Kind::Node => Geometry::Node(Coord::default()),
            Kind::Way => Geometry::Way(Vec::new()),
            Kind::Relation => Geometry::Relation(Vec::new()),
        }
    }
}

/// What a change-aware stream says about an object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Action {
    /// Plain data, no change context
    #[default]
    Plain,
    Create,
    Modify,
    Delete,
}

/// One OSM object as it flows through the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Object {
    pub id: i64,
    pub author: Author,
    pub tags: Vec<(String, String)>,
    pub geometry: Geometry,
    pub action: Action,
}

/// Sort key of a stream: kind first, then id
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    pub kind: Kind,
    pub id: i64,
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.id)
    }
}

impl Object {
    pub fn node(id: i64, coord: Coord) -> Self {
        Self::with_geometry(id, Geometry::Node(coord))
    }

    pub fn way(id: i64, refs: Vec<i64>) -> Self {
        Self::with_geometry(id, Geometry::Way(refs))
    }

    pub fn relation(id: i64, members: Vec<Member>) -> Self {
        Self::with_geometry(id, Geometry::Relation(members))
    }

    pub fn with_geometry(id: i64, geometry: Geometry) -> Self {
        Self {
            id,
            author: Author::default(),
            tags: Vec::new(),
            geometry,
            action: Action::Plain,
        }
    }

    /// Delete record: kind and id only
    pub fn deleted(kind: Kind, id: i64) -> Self {
        Self {
            action: Action::Delete,
            ..Self::with_geometry(id, Geometry::empty(kind))
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push((key.into(), value.into()));
        self
    }

    pub fn with_author(mut self, author: Author) -> Self {
        self.author = author;
        self
    }

    pub fn kind(&self) -> Kind {
        self.geometry.kind()
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey {
            kind: self.kind(),
            id: self.id,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.action == Action::Delete
    }

    pub fn coord(&self) -> Option<Coord> {
        match &self.geometry {
            Geometry::Node(c) => Some(*c),
            _ => None,
        }
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Field-by-field comparison that ignores the change action
    pub fn same_content(&self, other: &Object) -> bool {
        self.id == other.id
            && self.author == other.author
            && self.tags == other.tags
            && self.geometry == other.geometry
    }

    /// Compare by stream order
    pub fn cmp_key(&self, other: &Object) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// Optional information carried in a file header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamHeader {
    pub bbox: Option<BBox>,
    /// Seconds since the Unix epoch
    pub timestamp: Option<i64>,
}
