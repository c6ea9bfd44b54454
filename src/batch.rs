use chrono::{DateTime, Utc};

use crate::domain::{Batch, Pmid};
use crate::schedule::RateSchedule;

#[derive(Debug, PartialEq, Eq)]
pub enum Offer {
    Accepted,
    Full(Batch),
}

/// Buffers identifiers until the batch opened by the first offer is full.
///
/// Capacity is read from the schedule only when a new batch starts; a batch
/// in progress keeps its capacity even if the load window changes.
#[derive(Debug)]
pub struct BatchAccumulator {
    schedule: RateSchedule,
    pending: Vec<Pmid>,
    capacity: usize,
}

impl BatchAccumulator {
    pub fn new(schedule: RateSchedule) -> Self {
        Self {
            schedule,
            pending: Vec::new(),
            capacity: 0,
        }
    }

    pub fn offer(&mut self, id: Pmid, now: DateTime<Utc>) -> Offer {
        if self.pending.is_empty() {
            self.capacity = self.schedule.batch_size(now).max(1);
            self.pending.reserve(self.capacity);
        }
        self.pending.push(id);
        if self.pending.len() >= self.capacity {
            let ids = std::mem::take(&mut self.pending);
            return Offer::Full(Batch::new(ids));
        }
        Offer::Accepted
    }

    /// Capacity of the batch being filled, if one has started.
    pub fn capacity(&self) -> Option<usize> {
        (!self.pending.is_empty()).then_some(self.capacity)
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Hands over whatever is buffered at end of stream.
    pub fn take_partial(&mut self) -> Option<Batch> {
        if self.pending.is_empty() {
            return None;
        }
        Some(Batch::new(std::mem::take(&mut self.pending)))
    }
}
