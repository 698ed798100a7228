//! Dependency resolution for border extracts
//!
//! A single scan over a sorted stream decides, kind by kind, which objects
//! belong to the extract:
//!
//! 1. nodes inside the border are marked;
//! 2. a way with at least one marked node is marked; in complete-ways mode
//!    its nodes are logged and marked before the first relation (a way
//!    arriving later marks its nodes directly, with a warning);
//! 3. a relation with a marked member is marked. Relations that refer to
//!    relations later in the stream are logged and the log is replayed
//!    until nothing changes or the pass bound is reached.
//!
//! In complex-ways mode the member ways of marked multipolygon and boundary
//! relations are marked too, and one more scan marks every node of every
//! marked way. The emit pass then keeps whatever carries a mark.

use std::path::PathBuf;

use butterfly_common::{Result, Throttle};
use butterfly_io::{Geometry, Kind, Object, ObjectReader, ScratchLog};
use log::{debug, info, warn};

use crate::border::Border;
use crate::presence::{HashMemory, PresenceTable};

/// Relation types whose member ways form an area
const AREA_RELATIONS: [&str; 2] = ["multipolygon", "boundary"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DependencyOptions {
    /// Keep every node of a kept way, even outside the border
    pub complete_ways: bool,
    /// Keep all member ways of kept area relations, with their nodes
    pub complex_ways: bool,
    /// Remove references to objects that are not in the output
    pub drop_broken_refs: bool,
    pub max_relation_passes: u32,
}

impl Default for DependencyOptions {
    fn default() -> Self {
        Self {
            complete_ways: false,
            complex_ways: false,
            drop_broken_refs: false,
            max_relation_passes: 12,
        }
    }
}

/// Outcome of [`Resolver::resolve`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Resolution {
    /// Input scans before the emit pass
    pub scans: u32,
    /// Replays of the relation log
    pub relation_passes: u32,
    /// False when the pass bound stopped a still-growing closure
    pub converged: bool,
    /// Marks set per kind, in [`Kind::index`] order
    pub marked: [u64; 3],
    /// Complete-ways mode: ways that came after the first relation
    pub late_ways: u64,
}

pub struct Resolver {
    border: Border,
    options: DependencyOptions,
    table: PresenceTable,
    temp_dir: Option<PathBuf>,
    marked: [u64; 3],
}

impl Resolver {
    pub fn new(
        border: Border,
        options: DependencyOptions,
        memory: HashMemory,
        temp_dir: Option<PathBuf>,
    ) -> Result<Self> {
        Ok(Self::with_table(
            border,
            options,
            PresenceTable::new(memory)?,
            temp_dir,
        ))
    }

    pub fn with_table(
        border: Border,
        options: DependencyOptions,
        table: PresenceTable,
        temp_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            border,
            options,
            table,
            temp_dir,
            marked: [0; 3],
        }
    }

    fn mark(&mut self, kind: Kind, id: i64) -> bool {
        let fresh = self.table.set(kind, id);
        if fresh {
            self.marked[kind.index()] += 1;
        }
        fresh
    }

    fn scratch(&self) -> Result<ScratchLog> {
        ScratchLog::new(self.temp_dir.as_deref())
    }

    /// Mark every id of every record of `log` as `kind`
    fn apply_log(&mut self, log: &mut ScratchLog, kind: Kind) -> Result<()> {
        let mut ids = Vec::new();
        log.rewind()?;
        while log.next_record(&mut ids)?.is_some() {
            for &id in &ids {
                self.mark(kind, id);
            }
        }
        Ok(())
    }

    /// Run every scan needed to decide membership. `open` must return a
    /// fresh stream over the same input each time it is called.
    pub fn resolve(
        &mut self,
        mut open: impl FnMut() -> Result<Box<dyn ObjectReader>>,
    ) -> Result<Resolution> {
        let complete_ways = self.options.complete_ways && !self.options.complex_ways;
        let mut node_log = complete_ways.then(|| self.scratch()).transpose()?;
        let mut complex_log = self
            .options
            .complex_ways
            .then(|| self.scratch())
            .transpose()?;
        let mut relation_log = self.scratch()?;
        let mut node_log_pending = node_log.is_some();
        let mut late_ways = Throttle::new("way after relations");

        let mut input = open()?;
        while let Some(object) = input.read_next()? {
            if object.is_deleted() {
                continue;
            }
            match &object.geometry {
                Geometry::Node(coord) => {
                    if self.border.contains(*coord) {
                        self.mark(Kind::Node, object.id);
                    }
                }
                Geometry::Way(refs) => {
                    if refs.iter().any(|&id| self.table.get(Kind::Node, id)) {
                        self.mark(Kind::Way, object.id);
                        match node_log.as_mut() {
                            Some(log) if node_log_pending => log.append(object.id, refs)?,
                            Some(_) => {
                                // node log already replayed
                                late_ways
                                    .warn(format!("way {} marks its nodes directly", object.id));
                                for &id in refs {
                                    self.mark(Kind::Node, id);
                                }
                            }
                            None => {}
                        }
                    }
                }
                Geometry::Relation(members) => {
                    if node_log_pending {
                        node_log_pending = false;
                        if let Some(log) = node_log.as_mut() {
                            self.apply_log(log, Kind::Node)?;
                        }
                    }
                    if members.iter().any(|m| self.table.get(m.kind, m.id)) {
                        self.mark(Kind::Relation, object.id);
                    } else {
                        let children: Vec<i64> = members
                            .iter()
                            .filter(|m| m.kind == Kind::Relation)
                            .map(|m| m.id)
                            .collect();
                        if !children.is_empty() {
                            relation_log.append(object.id, &children)?;
                        }
                    }
                    if let Some(log) = complex_log.as_mut() {
                        if object.tag("type").is_some_and(|t| AREA_RELATIONS.contains(&t)) {
                            let ways: Vec<i64> = members
                                .iter()
                                .filter(|m| m.kind == Kind::Way)
                                .map(|m| m.id)
                                .collect();
                            if !ways.is_empty() {
                                log.append(object.id, &ways)?;
                            }
                        }
                    }
                }
            }
        }
        drop(input);
        late_ways.summarize();
        if node_log_pending {
            if let Some(log) = node_log.as_mut() {
                self.apply_log(log, Kind::Node)?;
            }
        }

        let (relation_passes, converged) = self.close_relations(&mut relation_log)?;
        let mut scans = 1;
        if let Some(log) = complex_log.as_mut() {
            self.add_area_ways(log)?;
            self.mark_way_nodes(open()?.as_mut())?;
            scans += 1;
        }
        let resolution = Resolution {
            scans,
            relation_passes,
            converged,
            marked: self.marked,
            late_ways: late_ways.count(),
        };
        info!(
            "extract holds {} nodes, {} ways, {} relations",
            self.marked[0], self.marked[1], self.marked[2]
        );
        Ok(resolution)
    }

    /// Replay the parent/child relation log until no parent changes
    fn close_relations(&mut self, log: &mut ScratchLog) -> Result<(u32, bool)> {
        if log.is_empty() {
            return Ok((0, true));
        }
        let max = self.options.max_relation_passes;
        let mut ids = Vec::new();
        let mut passes = 0;
        loop {
            if passes >= max {
                warn!(
                    "relation closure still growing after {max} passes, \
                     some parent relations may be missing"
                );
                return Ok((passes, false));
            }
            passes += 1;
            log.rewind()?;
            let mut flipped = 0u64;
            while let Some(parent) = log.next_record(&mut ids)? {
                if !self.table.get(Kind::Relation, parent)
                    && ids.iter().any(|&child| self.table.get(Kind::Relation, child))
                {
                    self.mark(Kind::Relation, parent);
                    flipped += 1;
                }
            }
            debug!("relation pass {passes}: {flipped} added");
            if flipped == 0 {
                return Ok((passes, true));
            }
        }
    }

    fn add_area_ways(&mut self, log: &mut ScratchLog) -> Result<()> {
        let mut ids = Vec::new();
        log.rewind()?;
        while let Some(relation) = log.next_record(&mut ids)? {
            if self.table.get(Kind::Relation, relation) {
                for &way in &ids {
                    self.mark(Kind::Way, way);
                }
            }
        }
        Ok(())
    }

    fn mark_way_nodes(&mut self, input: &mut dyn ObjectReader) -> Result<()> {
        while let Some(object) = input.read_next()? {
            match &object.geometry {
                Geometry::Node(_) => continue,
                Geometry::Way(refs) => {
                    if !object.is_deleted() && self.table.get(Kind::Way, object.id) {
                        for &id in refs {
                            self.mark(Kind::Node, id);
                        }
                    }
                }
                Geometry::Relation(_) => break,
            }
        }
        Ok(())
    }

    pub fn retains(&self, object: &Object) -> bool {
        object.is_deleted() || self.table.get(object.kind(), object.id)
    }

    /// Filter for the emit pass: `None` drops the object
    pub fn admit(&self, mut object: Object) -> Option<Object> {
        if !self.retains(&object) {
            return None;
        }
        if self.options.drop_broken_refs {
            match &mut object.geometry {
                Geometry::Node(_) => {}
                Geometry::Way(refs) => refs.retain(|&id| self.table.get(Kind::Node, id)),
                Geometry::Relation(members) => {
                    members.retain(|m| self.table.get(m.kind, m.id))
                }
            }
        }
        Some(object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use butterfly_io::{BBox, Coord, MemoryReader, Member};

    fn inside_box() -> Border {
        Border::BBox(BBox::new(0, 0, 100, 100))
    }

    fn resolver(options: DependencyOptions) -> Resolver {
        let table = PresenceTable::with_bytes([4096, 4096, 4096]).unwrap();
        Resolver::with_table(inside_box(), options, table, None)
    }

    fn run(resolver: &mut Resolver, data: &[Object]) -> (Resolution, Vec<(Kind, i64)>) {
        let resolution = resolver
            .resolve(|| Ok(Box::new(MemoryReader::new(data.to_vec())) as Box<dyn ObjectReader>))
            .unwrap();
        let kept = data
            .iter()
            .cloned()
            .filter_map(|o| resolver.admit(o))
            .map(|o| (o.kind(), o.id))
            .collect();
        (resolution, kept)
    }

    fn way_crossing_border() -> Vec<Object> {
        vec![
            Object::node(1, Coord::new(50, 50)),
            Object::node(2, Coord::new(500, 50)),
            Object::node(3, Coord::new(600, 600)),
            Object::way(10, vec![1, 2]),
            Object::way(11, vec![2, 3]),
        ]
    }

    #[test]
    fn keeps_ways_touching_the_border() {
        let (resolution, kept) = run(&mut resolver(DependencyOptions::default()), &way_crossing_border());
        assert_eq!(kept, vec![(Kind::Node, 1), (Kind::Way, 10)]);
        assert_eq!(resolution.scans, 1);
        assert!(resolution.converged);
    }

    #[test]
    fn complete_ways_pulls_in_outside_nodes() {
        let options = DependencyOptions {
            complete_ways: true,
            ..DependencyOptions::default()
        };
        let (_, kept) = run(&mut resolver(options), &way_crossing_border());
        assert_eq!(kept, vec![(Kind::Node, 1), (Kind::Node, 2), (Kind::Way, 10)]);
    }

    #[test]
    fn complete_ways_tolerates_ways_after_relations() {
        let options = DependencyOptions {
            complete_ways: true,
            ..DependencyOptions::default()
        };
        let data = vec![
            Object::node(1, Coord::new(50, 50)),
            Object::node(2, Coord::new(500, 50)),
            Object::relation(5, vec![Member::new(Kind::Node, 1, "")]),
            Object::way(10, vec![1, 2]),
        ];
        let (resolution, kept) = run(&mut resolver(options), &data);
        assert_eq!(resolution.late_ways, 1);
        assert_eq!(
            kept,
            vec![
                (Kind::Node, 1),
                (Kind::Node, 2),
                (Kind::Relation, 5),
                (Kind::Way, 10)
            ]
        );
    }

    #[test]
    fn drop_broken_refs_trims_ways_and_relations() {
        let options = DependencyOptions {
            drop_broken_refs: true,
            ..DependencyOptions::default()
        };
        let mut r = resolver(options);
        let mut data = way_crossing_border();
        data.push(Object::relation(
            20,
            vec![Member::new(Kind::Way, 10, ""), Member::new(Kind::Way, 11, "")],
        ));
        run(&mut r, &data);
        let way = r.admit(Object::way(10, vec![1, 2])).unwrap();
        assert_eq!(way.geometry, Geometry::Way(vec![1]));
        let rel = r.admit(data[5].clone()).unwrap();
        assert_eq!(rel.geometry, Geometry::Relation(vec![Member::new(Kind::Way, 10, "")]));
    }

    /// Relation `i` contains relation `i + 1`; the last one holds the node
    fn descending_chain(len: i64) -> Vec<Object> {
        let mut data = vec![Object::node(1, Coord::new(1, 1))];
        for id in 1..len {
            data.push(Object::relation(id, vec![Member::new(Kind::Relation, id + 1, "")]));
        }
        data.push(Object::relation(len, vec![Member::new(Kind::Node, 1, "")]));
        data
    }

    #[test]
    fn relation_closure_reaches_forward_parents() {
        let (resolution, kept) = run(&mut resolver(DependencyOptions::default()), &descending_chain(5));
        assert!(resolution.converged);
        assert_eq!(resolution.relation_passes, 5);
        assert_eq!(kept.len(), 6);
    }

    #[test]
    fn relation_closure_stops_at_the_bound() {
        let options = DependencyOptions {
            max_relation_passes: 3,
            ..DependencyOptions::default()
        };
        let (resolution, kept) = run(&mut resolver(options), &descending_chain(10));
        assert!(!resolution.converged);
        assert_eq!(resolution.relation_passes, 3);
        // the node, the innermost relation and one parent per pass
        assert_eq!(kept.len(), 1 + 1 + 3);
        assert!(kept.contains(&(Kind::Relation, 7)));
        assert!(!kept.contains(&(Kind::Relation, 6)));
    }

    #[test]
    fn complex_ways_completes_area_relations() {
        let options = DependencyOptions {
            complex_ways: true,
            ..DependencyOptions::default()
        };
        let data = vec![
            Object::node(1, Coord::new(50, 50)),
            Object::node(2, Coord::new(500, 500)),
            Object::node(3, Coord::new(600, 500)),
            Object::way(10, vec![1, 2]),
            Object::way(11, vec![2, 3]),
            Object::way(12, vec![3]),
            Object::relation(
                30,
                vec![Member::new(Kind::Way, 10, "outer"), Member::new(Kind::Way, 11, "outer")],
            )
            .with_tag("type", "multipolygon"),
        ];
        let (resolution, kept) = run(&mut resolver(options), &data);
        assert_eq!(resolution.scans, 2);
        assert_eq!(
            kept,
            vec![
                (Kind::Node, 1),
                (Kind::Node, 2),
                (Kind::Node, 3),
                (Kind::Way, 10),
                (Kind::Way, 11),
                (Kind::Relation, 30)
            ]
        );
    }

    #[test]
    fn deletes_always_pass() {
        let r = resolver(DependencyOptions::default());
        assert!(r.admit(Object::deleted(Kind::Node, 99)).is_some());
        assert!(r.admit(Object::node(99, Coord::new(1, 1))).is_none());
    }
}
