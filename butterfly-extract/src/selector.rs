//! Object and tag filters with their dependencies
//!
//! Objects are kept when the keep filter of their kind accepts them, or
//! when that kind has no keep filter. A drop filter removes an object
//! whatever else holds. Unless dependencies are ignored, a kept relation
//! also keeps its members (relations inside relations through a bounded
//! number of passes) and a kept way keeps its nodes. That takes one scan
//! for the relations and a second one for way nodes.

use std::path::PathBuf;

use butterfly_common::Result;
use butterfly_io::{Geometry, Kind, Object, ObjectReader, ScratchLog};
use log::{debug, info, warn};

use crate::filter::{ObjectFilter, TagFilter};
use crate::policy::KindFilter;
use crate::presence::{HashMemory, PresenceTable};
use crate::resolver::Resolution;

/// Filters per kind, indexed by [`Kind::index`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterSet {
    pub keep: [Option<ObjectFilter>; 3],
    pub drop: [Option<ObjectFilter>; 3],
    pub keep_tags: [Option<TagFilter>; 3],
    pub drop_tags: [Option<TagFilter>; 3],
    /// Judge every object on its own tags only
    pub ignore_dependencies: bool,
}

fn add_filter(slots: &mut [Option<ObjectFilter>; 3], kinds: &[Kind], filter: &ObjectFilter) {
    for kind in kinds {
        let slot = &mut slots[kind.index()];
        *slot = Some(match slot.take() {
            Some(existing) => existing.or(filter.clone()),
            None => filter.clone(),
        });
    }
}

fn add_tag_filter(slots: &mut [Option<TagFilter>; 3], kinds: &[Kind], filter: &TagFilter) {
    for kind in kinds {
        let slot = &mut slots[kind.index()];
        *slot = Some(match slot.take() {
            Some(existing) => existing.merge(filter.clone()),
            None => filter.clone(),
        });
    }
}

impl FilterSet {
    /// Repeated keep filters for a kind accept what any of them accepts
    pub fn add_keep(&mut self, kinds: &[Kind], filter: &ObjectFilter) {
        add_filter(&mut self.keep, kinds, filter);
    }

    pub fn add_drop(&mut self, kinds: &[Kind], filter: &ObjectFilter) {
        add_filter(&mut self.drop, kinds, filter);
    }

    pub fn add_keep_tags(&mut self, kinds: &[Kind], filter: &TagFilter) {
        add_tag_filter(&mut self.keep_tags, kinds, filter);
    }

    pub fn add_drop_tags(&mut self, kinds: &[Kind], filter: &TagFilter) {
        add_tag_filter(&mut self.drop_tags, kinds, filter);
    }

    pub fn has_object_filters(&self) -> bool {
        self.keep.iter().chain(&self.drop).any(Option::is_some)
    }

    pub fn is_active(&self) -> bool {
        self.has_object_filters()
            || self.keep_tags.iter().chain(&self.drop_tags).any(Option::is_some)
    }

    /// Dependencies between objects have to be followed
    pub fn tracks_dependencies(&self) -> bool {
        self.has_object_filters() && !self.ignore_dependencies
    }

    fn wanted(&self, object: &Object) -> bool {
        self.keep[object.kind().index()]
            .as_ref()
            .map_or(true, |f| f.matches(object))
    }

    fn dropped(&self, object: &Object) -> bool {
        self.drop[object.kind().index()]
            .as_ref()
            .is_some_and(|f| f.matches(object))
    }

    /// Apply the tag filters of the object's kind
    pub fn shape_tags(&self, object: &mut Object) {
        let kind = object.kind().index();
        let (keep, drop) = (&self.keep_tags[kind], &self.drop_tags[kind]);
        if keep.is_none() && drop.is_none() {
            return;
        }
        object.tags.retain(|(key, value)| {
            keep.as_ref().map_or(true, |f| f.keeps(key, value))
                && !drop.as_ref().is_some_and(|f| f.drops(key, value))
        });
    }
}

pub struct Selector {
    filters: FilterSet,
    kinds: KindFilter,
    /// Present while dependencies are tracked
    table: Option<PresenceTable>,
    temp_dir: Option<PathBuf>,
    max_relation_passes: u32,
    marked: [u64; 3],
}

impl Selector {
    pub fn new(
        filters: FilterSet,
        kinds: KindFilter,
        memory: HashMemory,
        temp_dir: Option<PathBuf>,
    ) -> Result<Self> {
        let table = if filters.tracks_dependencies() {
            Some(PresenceTable::new(memory)?)
        } else {
            None
        };
        Ok(Self {
            filters,
            kinds,
            table,
            temp_dir,
            max_relation_passes: 12,
            marked: [0; 3],
        })
    }

    pub fn with_table(
        filters: FilterSet,
        kinds: KindFilter,
        table: PresenceTable,
        temp_dir: Option<PathBuf>,
    ) -> Self {
        let table = filters.tracks_dependencies().then_some(table);
        Self {
            filters,
            kinds,
            table,
            temp_dir,
            max_relation_passes: 12,
            marked: [0; 3],
        }
    }

    pub fn max_relation_passes(mut self, passes: u32) -> Self {
        self.max_relation_passes = passes;
        self
    }

    /// Whether [`Selector::resolve`] has to read the input before the emit pass
    pub fn needs_scans(&self) -> bool {
        self.table.is_some()
    }

    fn mark(&mut self, kind: Kind, id: i64) -> bool {
        let fresh = self.table.as_mut().is_some_and(|t| t.set(kind, id));
        if fresh {
            self.marked[kind.index()] += 1;
        }
        fresh
    }

    fn is_marked(&self, kind: Kind, id: i64) -> bool {
        self.table.as_ref().is_some_and(|t| t.get(kind, id))
    }

    /// Follow dependencies of filtered objects. `open` must return a fresh
    /// stream over the same input each time it is called.
    pub fn resolve(
        &mut self,
        mut open: impl FnMut() -> Result<Box<dyn ObjectReader>>,
    ) -> Result<Resolution> {
        if self.table.is_none() {
            return Ok(Resolution {
                converged: true,
                ..Resolution::default()
            });
        }
        let scratch = || ScratchLog::new(self.temp_dir.as_deref());
        let mut node_members = scratch()?;
        let mut way_members = scratch()?;
        let mut child_relations = scratch()?;

        let mut input = open()?;
        while let Some(object) = input.read_next()? {
            if object.is_deleted() || !self.kinds.allows(object.kind()) {
                continue;
            }
            match &object.geometry {
                Geometry::Node(_) => {}
                Geometry::Way(_) => {
                    if self.filters.wanted(&object) && !self.filters.dropped(&object) {
                        self.mark(Kind::Way, object.id);
                    }
                }
                Geometry::Relation(members) => {
                    if self.filters.dropped(&object) {
                        continue;
                    }
                    if self.filters.wanted(&object) {
                        self.mark(Kind::Relation, object.id);
                    }
                    let logs = [
                        (Kind::Node, &mut node_members),
                        (Kind::Way, &mut way_members),
                        (Kind::Relation, &mut child_relations),
                    ];
                    for (kind, log) in logs {
                        if !self.kinds.allows(kind) {
                            continue;
                        }
                        let ids: Vec<i64> = members
                            .iter()
                            .filter(|m| m.kind == kind)
                            .map(|m| m.id)
                            .collect();
                        if !ids.is_empty() {
                            log.append(object.id, &ids)?;
                        }
                    }
                }
            }
        }
        drop(input);

        let (relation_passes, converged) = self.close_relations(&mut child_relations)?;
        self.pull_members(&mut way_members, Kind::Way)?;
        self.pull_members(&mut node_members, Kind::Node)?;

        let mut scans = 1;
        if self.kinds.ways && self.kinds.nodes {
            scans += 1;
            self.pull_way_nodes(open()?.as_mut())?;
        }
        info!(
            "filters keep {} nodes, {} ways, {} relations by dependency",
            self.marked[0], self.marked[1], self.marked[2]
        );
        Ok(Resolution {
            scans,
            relation_passes,
            converged,
            marked: self.marked,
            late_ways: 0,
        })
    }

    /// Mark the children of marked relations until nothing changes
    fn close_relations(&mut self, log: &mut ScratchLog) -> Result<(u32, bool)> {
        if log.is_empty() {
            return Ok((0, true));
        }
        let max = self.max_relation_passes;
        let mut ids = Vec::new();
        let mut passes = 0;
        loop {
            if passes >= max {
                warn!(
                    "relation members still growing after {max} passes, \
                     some nested relations may be missing"
                );
                return Ok((passes, false));
            }
            passes += 1;
            log.rewind()?;
            let mut flipped = 0u64;
            while let Some(parent) = log.next_record(&mut ids)? {
                if self.is_marked(Kind::Relation, parent) {
                    for &child in &ids {
                        if self.mark(Kind::Relation, child) {
                            flipped += 1;
                        }
                    }
                }
            }
            debug!("member pass {passes}: {flipped} relations added");
            if flipped == 0 {
                return Ok((passes, true));
            }
        }
    }

    fn pull_members(&mut self, log: &mut ScratchLog, kind: Kind) -> Result<()> {
        let mut ids = Vec::new();
        log.rewind()?;
        while let Some(relation) = log.next_record(&mut ids)? {
            if self.is_marked(Kind::Relation, relation) {
                for &id in &ids {
                    self.mark(kind, id);
                }
            }
        }
        Ok(())
    }

    fn pull_way_nodes(&mut self, input: &mut dyn ObjectReader) -> Result<()> {
        while let Some(object) = input.read_next()? {
            if let Geometry::Way(refs) = &object.geometry {
                if !object.is_deleted()
                    && self.is_marked(Kind::Way, object.id)
                    && !self.filters.dropped(&object)
                {
                    for &id in refs {
                        self.mark(Kind::Node, id);
                    }
                }
            }
        }
        Ok(())
    }

    /// Filter for the emit pass: `None` drops the object
    pub fn admit(&self, mut object: Object) -> Option<Object> {
        if object.is_deleted() {
            return Some(object);
        }
        let kept = self.is_marked(object.kind(), object.id) || self.filters.wanted(&object);
        if !kept || self.filters.dropped(&object) {
            return None;
        }
        self.filters.shape_tags(&mut object);
        Some(object)
    }
}
