//! In-memory object streams

use std::collections::VecDeque;

use butterfly_common::Result;

use crate::model::{Object, StreamHeader};
use crate::stream::{ObjectReader, ObjectWriter};

/// Replays a fixed list of objects
#[derive(Debug, Default, Clone)]
pub struct MemoryReader {
    header: StreamHeader,
    objects: VecDeque<Object>,
}

impl MemoryReader {
    pub fn new(objects: impl IntoIterator<Item = Object>) -> Self {
        Self {
            header: StreamHeader::default(),
            objects: objects.into_iter().collect(),
        }
    }

    pub fn with_header(mut self, header: StreamHeader) -> Self {
        self.header = header;
        self
    }
}

impl ObjectReader for MemoryReader {
    fn header(&self) -> &StreamHeader {
        &self.header
    }

    fn read_next(&mut self) -> Result<Option<Object>> {
        Ok(self.objects.pop_front())
    }
}

/// Collects written objects
#[derive(Debug, Default, Clone)]
pub struct MemoryWriter {
    objects: Vec<Object>,
    finished: bool,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn objects(&self) -> &[Object] {
        &self.objects
    }

    pub fn into_objects(self) -> Vec<Object> {
        self.objects
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl ObjectWriter for MemoryWriter {
    fn write(&mut self, object: &Object) -> Result<()> {
        self.objects.push(object.clone());
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        Ok(())
    }
}
