//! Filter application and checkpoint cadence for filtered subscriptions.

use crate::filter::EventFilter;
use crate::types::{Checkpoint, ResolvedEvent};

/// Wraps the user filter and counts scanned events.
///
/// Every event that passes deduplication is scanned, matched or not. After
/// every `interval` scanned events a checkpoint notification is due, so long
/// runs of non-matching events still move the consumer's resume point.
#[derive(Debug)]
pub(crate) struct FilterAdapter {
    filter: EventFilter,
    interval: u32,
    scanned: u32,
}

impl FilterAdapter {
    pub(crate) fn new(filter: EventFilter, interval: u32) -> Self {
        Self {
            filter,
            interval: interval.max(1),
            scanned: 0,
        }
    }

    pub(crate) fn matches<C: Checkpoint>(&self, event: &ResolvedEvent<C>) -> bool {
        self.filter.is_match(event)
    }

    /// Count a scanned event. Returns the checkpoint to report when a
    /// notification is due.
    pub(crate) fn scanned<C: Checkpoint>(&mut self, checkpoint: C) -> Option<C> {
        self.scanned += 1;
        if self.scanned >= self.interval {
            self.scanned = 0;
            Some(checkpoint)
        } else {
            None
        }
    }
}
