//! Paged historical reads.

use crate::source::{ReadRequest, Slice};
use crate::types::Checkpoint;

/// What to do after a page has been consumed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PageOutcome {
    /// Request the next page right away.
    More,
    /// The log ended before the target was reached; retry shortly.
    AwaitFlush,
    /// Nothing left to read for the current pass.
    EndOfData,
}

/// Cursor over forward reads.
///
/// The cursor is the exclusive start of the next page. A pass either runs to
/// the end of the stream (no target) or until the cursor reaches the target
/// checkpoint taken from the live feed.
#[derive(Debug)]
pub(crate) struct HistoricalReader<C> {
    cursor: Option<C>,
    target: Option<C>,
    page_size: usize,
    resolve_link_tos: bool,
    pages_read: u64,
}

impl<C: Checkpoint> HistoricalReader<C> {
    pub(crate) fn new(after: Option<C>, page_size: usize, resolve_link_tos: bool) -> Self {
        Self {
            cursor: after,
            target: None,
            page_size,
            resolve_link_tos,
            pages_read: 0,
        }
    }

    pub(crate) fn cursor(&self) -> Option<C> {
        self.cursor
    }

    pub(crate) fn pages_read(&self) -> u64 {
        self.pages_read
    }

    pub(crate) fn next_request(&self) -> ReadRequest<C> {
        ReadRequest {
            after: self.cursor,
            max_count: self.page_size,
            resolve_link_tos: self.resolve_link_tos,
        }
    }

    /// Start a pass that ends once the cursor reaches `target`.
    pub(crate) fn read_until(&mut self, target: C) {
        self.target = Some(target);
    }

    /// Move the cursor forward without reading.
    pub(crate) fn skip_to(&mut self, checkpoint: C) {
        if self.cursor.map_or(true, |cursor| checkpoint > cursor) {
            self.cursor = Some(checkpoint);
        }
    }

    pub(crate) fn has_reached(&self, target: C) -> bool {
        self.cursor.is_some_and(|cursor| cursor >= target)
    }

    /// Advance past a page and decide how the pass continues.
    pub(crate) fn complete(&mut self, slice: &Slice<C>) -> PageOutcome {
        self.pages_read += 1;
        if let Some(last) = slice.last_checkpoint {
            self.skip_to(last);
        }
        match self.target {
            None if slice.is_end_of_stream => PageOutcome::EndOfData,
            None => PageOutcome::More,
            Some(target) if self.has_reached(target) => PageOutcome::EndOfData,
            Some(_) if slice.is_end_of_stream => PageOutcome::AwaitFlush,
            Some(_) => PageOutcome::More,
        }
    }
}
