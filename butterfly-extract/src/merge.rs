//! k-way merge of sorted object streams

use butterfly_common::{Result, Throttle};
use butterfly_io::{Object, ObjectKey, ObjectReader, StreamHeader};
use log::debug;

/// What happens when several inputs hold the same (kind, id)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergePolicy {
    /// Keep only the object of the last input holding the key
    #[default]
    LastWins,
    /// Emit every copy, earlier inputs first
    KeepAll,
}

struct Lane {
    reader: Box<dyn ObjectReader>,
    head: Option<Object>,
    last: Option<ObjectKey>,
}

/// Merges N streams into one ascending by (kind, id)
///
/// Inputs are expected to be sorted already. A key that goes backwards is
/// passed through with a warning; the output is then only as sorted as the
/// inputs were.
pub struct Sequencer {
    lanes: Vec<Lane>,
    policy: MergePolicy,
    header: StreamHeader,
    started: bool,
    disorder: Throttle,
}

impl Sequencer {
    pub fn new(readers: Vec<Box<dyn ObjectReader>>, policy: MergePolicy) -> Self {
        let mut header = StreamHeader::default();
        for reader in &readers {
            let h = reader.header();
            if let Some(b) = h.bbox {
                header.bbox.get_or_insert(b).merge(&b);
            }
            header.timestamp = header.timestamp.max(h.timestamp);
        }
        debug!("merging {} inputs ({policy:?})", readers.len());
        let lanes = readers
            .into_iter()
            .map(|reader| Lane {
                reader,
                head: None,
                last: None,
            })
            .collect();
        Self {
            lanes,
            policy,
            header,
            started: false,
            disorder: Throttle::new("input not sorted"),
        }
    }

    /// Keys seen so far that were lower than their predecessor in the same input
    pub fn out_of_order(&self) -> u64 {
        self.disorder.count()
    }

    /// Replace a lane's head with its next object
    fn advance(&mut self, lane: usize) -> Result<Option<Object>> {
        let next = self.lanes[lane].reader.read_next()?;
        if let Some(object) = &next {
            let key = object.key();
            if self.lanes[lane].last.is_some_and(|last| key < last) {
                self.disorder
                    .warn(format!("input {} has {key} after a higher key", lane + 1));
            }
            self.lanes[lane].last = Some(key);
        }
        Ok(std::mem::replace(&mut self.lanes[lane].head, next))
    }

    fn fill(&mut self) -> Result<()> {
        if !self.started {
            self.started = true;
            for lane in 0..self.lanes.len() {
                self.advance(lane)?;
            }
        }
        Ok(())
    }

    /// Lane with the smallest head; ties go to the earlier lane
    fn smallest(&self) -> Option<(usize, ObjectKey)> {
        let mut best: Option<(usize, ObjectKey)> = None;
        for (i, lane) in self.lanes.iter().enumerate() {
            if let Some(head) = &lane.head {
                let key = head.key();
                if best.map_or(true, |(_, b)| key < b) {
                    best = Some((i, key));
                }
            }
        }
        best
    }
}

impl ObjectReader for Sequencer {
    fn header(&self) -> &StreamHeader {
        &self.header
    }

    fn read_next(&mut self) -> Result<Option<Object>> {
        self.fill()?;
        let Some((first, key)) = self.smallest() else {
            return Ok(None);
        };
        let mut chosen = self.advance(first)?;
        if self.policy == MergePolicy::LastWins {
            for lane in first + 1..self.lanes.len() {
                if self.lanes[lane].head.as_ref().is_some_and(|h| h.key() == key) {
                    chosen = self.advance(lane)?;
                }
            }
        }
        Ok(chosen)
    }
}

impl Drop for Sequencer {
    fn drop(&mut self) {
        self.disorder.summarize();
    }
}
