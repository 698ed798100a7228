//! Collapse tagged ways and relations into single nodes
//!
//! Each tagged way or relation becomes a node at the centre of its bounding
//! box, carrying its tags and author. Its id is shifted by a fixed offset
//! (twice the offset for relations) so it cannot collide with real nodes.
//! The input must be sorted: node positions are remembered before ways need
//! them, way boxes before relations.
//!
//! Every node position and way box seen stays in memory until the run
//! ends, about 24 bytes an entry plus hash map overhead. A planet file
//! needs tens of gigabytes here, so the pipeline logs the table sizes
//! when it finishes.

use butterfly_io::{BBox, Coord, Geometry, Kind, Object};
use log::debug;
use rustc_hash::FxHashMap;

pub const DEFAULT_ID_OFFSET: i64 = 1_000_000_000_000_000;

pub struct ToNodes {
    offset: i64,
    nodes: FxHashMap<i64, Coord>,
    ways: FxHashMap<i64, BBox>,
    relations: FxHashMap<i64, BBox>,
}

impl ToNodes {
    pub fn new(offset: i64) -> Self {
        Self {
            offset,
            nodes: FxHashMap::default(),
            ways: FxHashMap::default(),
            relations: FxHashMap::default(),
        }
    }

    /// Remembered node positions, way boxes and relation boxes
    pub fn table_sizes(&self) -> [usize; 3] {
        [self.nodes.len(), self.ways.len(), self.relations.len()]
    }

    fn member_bbox(&self, kind: Kind, id: i64) -> Option<BBox> {
        match kind {
            Kind::Node => self.nodes.get(&id).map(|&c| BBox::new(c.lon, c.lat, c.lon, c.lat)),
            Kind::Way => self.ways.get(&id).copied(),
            Kind::Relation => self.relations.get(&id).copied(),
        }
    }

    /// Convert one object; `None` drops it
    pub fn convert(&mut self, object: Object) -> Option<Object> {
        if object.is_deleted() {
            return Some(object);
        }
        let bbox = match &object.geometry {
            Geometry::Node(c) => {
                self.nodes.insert(object.id, *c);
                return Some(object);
            }
            Geometry::Way(refs) => {
                let bbox = BBox::enclosing(refs.iter().filter_map(|id| self.nodes.get(id).copied()));
                if let Some(b) = bbox {
                    self.ways.insert(object.id, b);
                }
                bbox
            }
            Geometry::Relation(members) => {
                let mut bbox: Option<BBox> = None;
                for m in members {
                    if let Some(b) = self.member_bbox(m.kind, m.id) {
                        bbox.get_or_insert(b).merge(&b);
                    }
                }
                if let Some(b) = bbox {
                    self.relations.insert(object.id, b);
                }
                bbox
            }
        };
        if object.tags.is_empty() {
            return None;
        }
        let Some(bbox) = bbox else {
            debug!("{} has no located members, dropped", object.key());
            return None;
        };
        let shift = match object.kind() {
            Kind::Way => self.offset,
            _ => self.offset.saturating_mul(2),
        };
        Some(Object {
            id: object.id.saturating_add(shift),
            geometry: Geometry::Node(bbox.center()),
            ..object
        })
    }
}
