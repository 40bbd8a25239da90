//! Interfaces consumed from the storage/transport collaborator.
//!
//! A catch-up subscription needs three things from whatever sits underneath
//! it: paged forward reads, a live push subscription, and a way to cancel
//! that push subscription. [`EventSource`] bundles them. Sources are scoped:
//! one source reads a single stream (checkpoint [`StreamRevision`]) or the
//! whole log (checkpoint [`Position`]).
//!
//! [`StreamRevision`]: crate::types::StreamRevision
//! [`Position`]: crate::types::Position

use crate::error::Result;
use crate::subscriptions::LiveSink;
use crate::types::{Checkpoint, ResolvedEvent};

/// A forward read of at most `max_count` records.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadRequest<C> {
    /// Exclusive start; `None` reads from the start of the stream or log.
    pub after: Option<C>,
    pub max_count: usize,
    pub resolve_link_tos: bool,
}

/// One page of a forward read.
#[derive(Clone, Debug)]
pub struct Slice<C> {
    pub events: Vec<ResolvedEvent<C>>,
    /// Checkpoint of the last record scanned for this page (the next
    /// exclusive start). `None` when nothing was scanned.
    pub last_checkpoint: Option<C>,
    /// The page reached the end of the stream or log.
    pub is_end_of_stream: bool,
}

impl<C: Checkpoint> Slice<C> {
    pub fn end(last_checkpoint: Option<C>) -> Self {
        Self {
            events: Vec::new(),
            last_checkpoint,
            is_end_of_stream: true,
        }
    }
}

/// Parameters for opening a live feed.
///
/// Carries no event filter. Filtering happens in the subscription, which has
/// to see every event to count scanned checkpoints.
#[derive(Clone, Debug)]
pub struct SubscribeRequest {
    pub resolve_link_tos: bool,
    pub subscription_name: String,
}

/// Source-assigned identifier of an open live feed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LiveHandle(pub u64);

/// Acknowledgement of an opened live feed.
#[derive(Clone, Copy, Debug)]
pub struct LiveSubscription<C> {
    pub handle: LiveHandle,
    /// Last checkpoint in the stream or log when the feed was opened.
    /// `None` when it was empty. Everything after it arrives on the feed.
    pub last_checkpoint: Option<C>,
}

/// The storage/transport collaborator behind a catch-up subscription.
///
/// Calls are made from a dedicated I/O thread and may block. Errors must be
/// returned as they are: the subscription classifies them, the source never
/// retries on its behalf.
pub trait EventSource<C: Checkpoint>: Send + Sync {
    /// Read the next page after `request.after`.
    fn read_page(&self, request: &ReadRequest<C>) -> Result<Slice<C>>;

    /// Open a live feed pushing into `sink` until unsubscribed or dropped.
    fn subscribe(&self, request: &SubscribeRequest, sink: LiveSink<C>)
        -> Result<LiveSubscription<C>>;

    /// Close a live feed. Unknown handles are ignored.
    fn unsubscribe(&self, handle: LiveHandle);

    /// Human-readable name of what is being read (`<all>` or a stream id).
    fn describe(&self) -> String;
}
