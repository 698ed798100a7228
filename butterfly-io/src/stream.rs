//! Reader and writer contracts shared by all codecs

use butterfly_common::{Result, Throttle};

use crate::model::{Geometry, Object, StreamHeader};

/// Sequential source of objects
pub trait ObjectReader {
    /// Bounding box and timestamp announced by the input, if any
    fn header(&self) -> &StreamHeader;

    /// Next object, `Ok(None)` at end of stream
    fn read_next(&mut self) -> Result<Option<Object>>;
}

/// Sequential sink of objects
pub trait ObjectWriter {
    fn write(&mut self, object: &Object) -> Result<()>;

    /// Write trailers and flush; no writes are accepted afterwards.
    fn finish(&mut self) -> Result<()>;
}

impl<R: ObjectReader + ?Sized> ObjectReader for Box<R> {
    fn header(&self) -> &StreamHeader {
        (**self).header()
    }

    fn read_next(&mut self) -> Result<Option<Object>> {
        (**self).read_next()
    }
}

impl<W: ObjectWriter + ?Sized> ObjectWriter for Box<W> {
    fn write(&mut self, object: &Object) -> Result<()> {
        (**self).write(object)
    }

    fn finish(&mut self) -> Result<()> {
        (**self).finish()
    }
}

/// Per-object capacity ceilings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Node refs per way, members per relation
    pub max_refs: usize,
    /// Key/value pairs per object
    pub max_tags: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_refs: 100_000,
            max_tags: 8_000,
        }
    }
}

/// Truncates oversized objects and reports it through throttled warnings
#[derive(Debug)]
pub(crate) struct CapacityGuard {
    limits: Limits,
    refs: Throttle,
    tags: Throttle,
}

impl CapacityGuard {
    pub(crate) fn new(limits: Limits) -> Self {
        Self {
            limits,
            refs: Throttle::new("too many references"),
            tags: Throttle::new("too many tags"),
        }
    }

    /// Enforce both ceilings on a freshly decoded object
    pub(crate) fn enforce(&mut self, object: &mut Object) {
        let key = object.key();
        let max_refs = self.limits.max_refs;
        let refs = match &mut object.geometry {
            Geometry::Node(_) => 0,
            Geometry::Way(refs) => {
                let len = refs.len();
                refs.truncate(max_refs);
                len
            }
            Geometry::Relation(members) => {
                let len = members.len();
                members.truncate(max_refs);
                len
            }
        };
        if refs > max_refs {
            self.refs
                .warn(format!("{key} has {refs} references, kept {max_refs}"));
        }
        let tags = object.tags.len();
        if tags > self.limits.max_tags {
            object.tags.truncate(self.limits.max_tags);
            self.tags
                .warn(format!("{key} has {tags} tags, kept {}", self.limits.max_tags));
        }
    }
}

impl Drop for CapacityGuard {
    fn drop(&mut self) {
        self.refs.summarize();
        self.tags.summarize();
    }
}
