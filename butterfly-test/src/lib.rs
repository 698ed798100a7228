//! # butterfly-test
//!
//! Seeded synthetic OSM datasets and file helpers shared by the
//! cross-crate property tests. Every generator is deterministic for a given
//! seed so a failing case can be replayed.

use std::fs::File;
use std::path::{Path, PathBuf};

use butterfly_common::{Error, Result};
use butterfly_io::{
    open_path, open_writer, Author, BBox, Coord, Format, Geometry, Kind, Limits, Member, Object,
    ObjectReader, StreamHeader, WriterOptions,
};
use geo::LineString;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

const TAGS: &[(&str, &str)] = &[
    ("highway", "residential"),
    ("name", "Rue d'Ixelles"),
    ("amenity", "café"),
    ("note", "a < b & c > \"d\""),
    ("building", "yes"),
    ("name:zh", "北京"),
    ("surface", "cobblestone"),
];
const RELATION_TYPES: &[&str] = &["multipolygon", "route", "boundary", "site"];
const ROLES: &[&str] = &["", "outer", "inner", "stop", "platform"];

/// Shape of a generated dataset
#[derive(Debug, Clone)]
pub struct DatasetShape {
    pub seed: u64,
    pub nodes: usize,
    pub ways: usize,
    pub relations: usize,
    /// Area nodes are scattered over
    pub extent: BBox,
}

impl Default for DatasetShape {
    fn default() -> Self {
        Self {
            seed: 1,
            nodes: 400,
            ways: 80,
            relations: 20,
            extent: BBox::new(0, 0, 10_000_000, 10_000_000),
        }
    }
}

fn author(rng: &mut StdRng) -> Author {
    let (uid, user) = if rng.gen_bool(0.8) {
        let uid = rng.gen_range(1..1_000_000);
        (uid, format!("mapper{uid}"))
    } else {
        (0, String::new())
    };
    Author {
        version: rng.gen_range(1..6),
        timestamp: rng.gen_range(1_200_000_000..1_700_000_000),
        changeset: rng.gen_range(1..10_000_000),
        uid,
        user,
    }
}

fn tags(rng: &mut StdRng, max: usize) -> Vec<(String, String)> {
    let count = rng.gen_range(0..=max);
    TAGS.choose_multiple(rng, count)
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Increasing ids with random gaps
fn ids(rng: &mut StdRng, count: usize) -> Vec<i64> {
    let mut next = 0i64;
    (0..count)
        .map(|_| {
            next += rng.gen_range(1..4);
            next
        })
        .collect()
}

/// Sorted dataset: nodes, then ways over those nodes, then relations.
/// About one way in twenty refers to a node that does not exist, and
/// relations may refer to relations further down the stream.
pub fn dataset(shape: &DatasetShape) -> Vec<Object> {
    let mut rng = StdRng::seed_from_u64(shape.seed);
    let node_ids = ids(&mut rng, shape.nodes);
    let way_ids = ids(&mut rng, shape.ways);
    let relation_ids = ids(&mut rng, shape.relations);
    let missing_node = node_ids.last().copied().unwrap_or(0) + 1_000;
    let extent = shape.extent;

    let mut objects = Vec::with_capacity(shape.nodes + shape.ways + shape.relations);
    for &id in &node_ids {
        let coord = Coord::new(
            rng.gen_range(extent.min_lon..=extent.max_lon),
            rng.gen_range(extent.min_lat..=extent.max_lat),
        );
        let tags = tags(&mut rng, 2);
        objects.push(Object {
            tags,
            ..Object::node(id, coord).with_author(author(&mut rng))
        });
    }
    for &id in &way_ids {
        let len = rng.gen_range(2..8);
        let mut refs: Vec<i64> = (0..len)
            .filter_map(|_| node_ids.choose(&mut rng).copied())
            .collect();
        if rng.gen_bool(0.05) {
            refs.push(missing_node);
        }
        let tags = tags(&mut rng, 3);
        objects.push(Object {
            tags,
            ..Object::way(id, refs).with_author(author(&mut rng))
        });
    }
    for &id in &relation_ids {
        let len = rng.gen_range(1..6);
        let mut members = Vec::with_capacity(len);
        for _ in 0..len {
            let kind = Kind::ALL[rng.gen_range(0..3)];
            let pool = match kind {
                Kind::Node => &node_ids,
                Kind::Way => &way_ids,
                Kind::Relation => &relation_ids,
            };
            if let Some(&member) = pool.choose(&mut rng) {
                let role = ROLES.choose(&mut rng).copied().unwrap_or_default();
                members.push(Member::new(kind, member, role));
            }
        }
        let mut tags = tags(&mut rng, 2);
        if let Some(kind) = RELATION_TYPES.choose(&mut rng) {
            tags.insert(0, ("type".to_string(), kind.to_string()));
        }
        objects.push(Object {
            tags,
            ..Object::relation(id, members).with_author(author(&mut rng))
        });
    }
    objects
}

/// Next version of `base`: about a tenth of the objects disappear, a fifth
/// are edited with a version bump, and a few new ones with fresh ids appear
/// per kind.
pub fn evolve(base: &[Object], seed: u64) -> Vec<Object> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut groups: [Vec<Object>; 3] = Default::default();
    for object in base {
        let roll: f64 = rng.gen();
        if roll < 0.1 {
            continue;
        }
        let mut object = object.clone();
        if roll < 0.3 {
            object.author.version += 1;
            object.author.timestamp += 3_600;
            match &mut object.geometry {
                Geometry::Node(c) => c.lon = c.lon.wrapping_add(rng.gen_range(-500..500)),
                Geometry::Way(refs) => refs.reverse(),
                Geometry::Relation(members) => members.truncate(1),
            }
            object.tags.push(("fixme".into(), format!("edit {}", rng.gen::<u16>())));
        }
        groups[object.kind().index()].push(object);
    }
    let mut top = [0i64; 3];
    for object in base {
        let slot = &mut top[object.kind().index()];
        *slot = (*slot).max(object.id);
    }
    for (group, top) in groups.iter_mut().zip(top) {
        let Some(last) = group.last().cloned() else {
            continue;
        };
        // fresh ids start above every base id of the kind
        for step in 1..=3 {
            let mut fresh = last.clone();
            fresh.id = top + 10 * step;
            fresh.author.version = 1;
            group.push(fresh);
        }
    }
    groups.into_iter().flatten().collect()
}

/// Star-shaped ring around `center`: vertices at increasing angles with
/// radii between half and all of `radius`
pub fn star_ring(seed: u64, center: Coord, radius: i32, vertices: usize) -> Vec<Coord> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..vertices)
        .map(|i| {
            let angle = std::f64::consts::TAU * i as f64 / vertices as f64;
            let r = f64::from(radius) * rng.gen_range(0.5..1.0);
            Coord::new(
                center.lon + (r * angle.cos()).round() as i32,
                center.lat + (r * angle.sin()).round() as i32,
            )
        })
        .collect()
}

/// The same rings as a `geo` polygon: first ring outer, the rest holes
pub fn to_geo(rings: &[Vec<Coord>]) -> geo::Polygon<f64> {
    let line = |ring: &Vec<Coord>| {
        LineString::from(
            ring.iter()
                .map(|c| (f64::from(c.lon), f64::from(c.lat)))
                .collect::<Vec<_>>(),
        )
    };
    let mut rings = rings.iter().map(line);
    let exterior = rings.next().unwrap_or_else(|| LineString::new(Vec::new()));
    geo::Polygon::new(exterior, rings.collect())
}

/// Temporary directory that disappears with the value
pub struct Scratch {
    dir: TempDir,
}

impl Scratch {
    pub fn new() -> Result<Self> {
        Ok(Self {
            dir: tempfile::tempdir().map_err(Error::WriteFailed)?,
        })
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Write `objects` to a new file in the directory
    pub fn write(&self, name: &str, format: Format, objects: &[Object]) -> Result<PathBuf> {
        let path = self.path(name);
        write_objects(&path, format, objects)?;
        Ok(path)
    }
}

pub fn write_objects(path: &Path, format: Format, objects: &[Object]) -> Result<()> {
    let file = File::create(path).map_err(Error::WriteFailed)?;
    let mut writer = open_writer(file, format, WriterOptions::default(), &StreamHeader::default())?;
    for object in objects {
        writer.write(object)?;
    }
    writer.finish()
}

pub fn drain(reader: &mut dyn ObjectReader) -> Result<Vec<Object>> {
    let mut objects = Vec::new();
    while let Some(object) = reader.read_next()? {
        objects.push(object);
    }
    Ok(objects)
}

pub fn read_objects(path: &Path) -> Result<Vec<Object>> {
    drain(open_path(path, Limits::default())?.as_mut())
}
