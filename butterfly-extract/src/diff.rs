//! Change records between an old and a new sorted stream

use std::cmp::Ordering;

use butterfly_common::Result;
use butterfly_io::{Action, Object, ObjectReader, StreamHeader};

/// How two objects with the same key are compared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiffMode {
    /// Only the version number decides
    #[default]
    Version,
    /// Any difference in author, coordinates, tags or references counts
    Contents,
}

impl DiffMode {
    fn differs(self, old: &Object, new: &Object) -> bool {
        match self {
            DiffMode::Version => old.author.version != new.author.version,
            DiffMode::Contents => !old.same_content(new),
        }
    }
}

/// Walks both streams in lockstep and yields create, modify and delete
/// records. Objects equal in both are skipped.
pub struct DiffEngine<A, B> {
    old: A,
    new: B,
    mode: DiffMode,
    old_head: Option<Object>,
    new_head: Option<Object>,
    started: bool,
}

impl<A: ObjectReader, B: ObjectReader> DiffEngine<A, B> {
    pub fn new(old: A, new: B, mode: DiffMode) -> Self {
        Self {
            old,
            new,
            mode,
            old_head: None,
            new_head: None,
            started: false,
        }
    }

    /// The old and the new stream
    pub fn inputs(&self) -> (&A, &B) {
        (&self.old, &self.new)
    }

    fn created(mut object: Object) -> Object {
        object.action = if object.author.version > 1 {
            Action::Modify
        } else {
            Action::Create
        };
        object
    }
}

impl<A: ObjectReader, B: ObjectReader> ObjectReader for DiffEngine<A, B> {
    fn header(&self) -> &StreamHeader {
        self.new.header()
    }

    fn read_next(&mut self) -> Result<Option<Object>> {
        if !self.started {
            self.started = true;
            self.old_head = self.old.read_next()?;
            self.new_head = self.new.read_next()?;
        }
        loop {
            let order = match (&self.old_head, &self.new_head) {
                (None, None) => return Ok(None),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some(old), Some(new)) => old.cmp_key(new),
            };
            match order {
                Ordering::Less => {
                    let old = std::mem::replace(&mut self.old_head, self.old.read_next()?);
                    if let Some(old) = old.filter(|o| !o.is_deleted()) {
                        return Ok(Some(Object::deleted(old.kind(), old.id)));
                    }
                }
                Ordering::Greater => {
                    let new = std::mem::replace(&mut self.new_head, self.new.read_next()?);
                    if let Some(new) = new.filter(|o| !o.is_deleted()) {
                        return Ok(Some(Self::created(new)));
                    }
                }
                Ordering::Equal => {
                    let old = std::mem::replace(&mut self.old_head, self.old.read_next()?);
                    let new = std::mem::replace(&mut self.new_head, self.new.read_next()?);
                    if let (Some(old), Some(mut new)) = (old, new) {
                        match (old.is_deleted(), new.is_deleted()) {
                            (true, true) => {}
                            (false, true) => return Ok(Some(Object::deleted(old.kind(), old.id))),
                            (true, false) => return Ok(Some(Self::created(new))),
                            (false, false) if self.mode.differs(&old, &new) => {
                                new.action = Action::Modify;
                                return Ok(Some(new));
                            }
                            (false, false) => {}
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use butterfly_io::{Author, Coord, Kind, MemoryReader};

    fn versioned(object: Object, version: u32) -> Object {
        object.with_author(Author {
            version,
            timestamp: 1_285_874_610,
            changeset: 5,
            uid: 1,
            user: "mapper".into(),
        })
    }

    fn diff(old: Vec<Object>, new: Vec<Object>, mode: DiffMode) -> Vec<Object> {
        let mut engine = DiffEngine::new(MemoryReader::new(old), MemoryReader::new(new), mode);
        std::iter::from_fn(|| engine.read_next().unwrap()).collect()
    }

    #[test]
    fn classifies_create_modify_delete() {
        let old = vec![
            versioned(Object::node(1, Coord::new(0, 0)), 1),
            versioned(Object::node(2, Coord::new(0, 0)), 1),
            versioned(Object::way(9, vec![1, 2]), 3),
        ];
        let new = vec![
            versioned(Object::node(1, Coord::new(0, 0)), 1),
            versioned(Object::node(2, Coord::new(5, 5)), 2),
            versioned(Object::node(3, Coord::new(1, 1)), 1),
            versioned(Object::node(4, Coord::new(1, 1)), 4),
        ];
        let out = diff(old, new, DiffMode::Version);
        let summary: Vec<(Kind, i64, Action)> =
            out.iter().map(|o| (o.kind(), o.id, o.action)).collect();
        assert_eq!(
            summary,
            vec![
                (Kind::Node, 2, Action::Modify),
                (Kind::Node, 3, Action::Create),
                (Kind::Node, 4, Action::Modify),
                (Kind::Way, 9, Action::Delete),
            ]
        );
        assert_eq!(out[3], Object::deleted(Kind::Way, 9));
    }

    #[test]
    fn contents_mode_sees_silent_edits() {
        let old = vec![versioned(Object::node(1, Coord::new(0, 0)), 2)];
        let new = vec![versioned(Object::node(1, Coord::new(0, 0)), 2).with_tag("name", "x")];
        assert!(diff(old.clone(), new.clone(), DiffMode::Version).is_empty());
        let out = diff(old, new, DiffMode::Contents);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].action, Action::Modify);
        assert_eq!(out[0].tag("name"), Some("x"));
    }

    #[test]
    fn identical_streams_have_no_difference() {
        let data = vec![
            versioned(Object::node(1, Coord::new(3, 4)), 1),
            versioned(Object::way(1, vec![1]), 2),
            versioned(Object::relation(1, vec![]), 1),
        ];
        assert!(diff(data.clone(), data.clone(), DiffMode::Contents).is_empty());
        assert!(diff(Vec::new(), Vec::new(), DiffMode::Version).is_empty());
    }
}
