//! Live feed plumbing: the sink handed to the transport and the buffer that
//! holds early arrivals while history is still being read.

use super::reconciler::Command;
use super::types::DropReason;
use crate::error::SubscriptionError;
use crate::types::{Checkpoint, ResolvedEvent};
#[cfg(test)]
use crossbeam_channel::Receiver;
use crossbeam_channel::{SendTimeoutError, Sender};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How often a blocked push rechecks for a stop request.
const STOP_POLL: Duration = Duration::from_millis(10);

/// Engine-side endpoint of a live feed.
///
/// The transport pushes appended events through `event_appeared` and reports
/// connection health through `dropped`. The event channel is bounded, so a
/// subscription that is busy catching up pauses the transport instead of
/// growing without limit. A push blocked on a full queue gives up as soon
/// as the subscription is asked to stop.
pub struct LiveSink<C> {
    events: Sender<ResolvedEvent<C>>,
    control: Sender<Command<C>>,
    stopping: Arc<AtomicBool>,
}

impl<C> Clone for LiveSink<C> {
    fn clone(&self) -> Self {
        Self {
            events: self.events.clone(),
            control: self.control.clone(),
            stopping: Arc::clone(&self.stopping),
        }
    }
}

impl<C: Checkpoint> LiveSink<C> {
    pub(crate) fn new(
        events: Sender<ResolvedEvent<C>>,
        control: Sender<Command<C>>,
        stopping: Arc<AtomicBool>,
    ) -> Self {
        Self {
            events,
            control,
            stopping,
        }
    }

    /// A sink detached from any subscription, with both of its receiving ends.
    #[cfg(test)]
    pub(crate) fn channel(
        capacity: usize,
    ) -> (Self, Receiver<ResolvedEvent<C>>, Receiver<Command<C>>) {
        let (events, events_rx) = crossbeam_channel::bounded(capacity);
        let (control, control_rx) = crossbeam_channel::unbounded();
        let stopping = Arc::new(AtomicBool::new(false));
        (Self::new(events, control, stopping), events_rx, control_rx)
    }

    /// Push an appended event. Blocks while the subscription's live queue is
    /// full, until it drains or a stop is requested. Returns false once the
    /// subscription is stopping or gone; the transport should then forget
    /// this sink.
    pub fn event_appeared(&self, mut event: ResolvedEvent<C>) -> bool {
        loop {
            if self.stopping.load(Ordering::SeqCst) {
                return false;
            }
            match self.events.send_timeout(event, STOP_POLL) {
                Ok(()) => return true,
                Err(SendTimeoutError::Timeout(unsent)) => event = unsent,
                Err(SendTimeoutError::Disconnected(_)) => return false,
            }
        }
    }

    /// Report that the live feed ended.
    pub fn dropped(&self, reason: DropReason, error: Option<SubscriptionError>) {
        let _ = self.control.send(Command::LiveDropped { reason, error });
    }

    /// Report a transport failure, classifying it into a drop reason.
    pub fn failed(&self, error: SubscriptionError) {
        let reason = error.drop_reason();
        self.dropped(reason, Some(error));
    }
}

/// Bounded, checkpoint-ordered queue of live events received before the gap
/// between history and the live start is closed.
///
/// Draining goes through `next_after`, which moves the replay cursor past
/// anything already processed by the historical path, so the drain is a single
/// skip-then-deliver pass.
pub(crate) struct LiveBuffer<C> {
    events: VecDeque<ResolvedEvent<C>>,
    capacity: usize,
    /// Checkpoint of the newest buffered event.
    newest: Option<C>,
    /// Checkpoint of the last event released or skipped.
    cursor: Option<C>,
    skipped: usize,
}

impl<C: Checkpoint> LiveBuffer<C> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::new(),
            capacity,
            newest: None,
            cursor: None,
            skipped: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.events.len()
    }

    pub(crate) fn is_full(&self) -> bool {
        self.events.len() >= self.capacity
    }

    pub(crate) fn skipped(&self) -> usize {
        self.skipped
    }

    /// Append an arrival. Returns false (and discards it) when it does not
    /// advance past the newest buffered checkpoint.
    pub(crate) fn push(&mut self, event: ResolvedEvent<C>) -> bool {
        if self.newest.is_some_and(|newest| event.checkpoint <= newest) {
            return false;
        }
        self.newest = Some(event.checkpoint);
        self.events.push_back(event);
        true
    }

    /// Release the next buffered event after `processed`, skipping duplicates.
    pub(crate) fn next_after(&mut self, processed: Option<C>) -> Option<ResolvedEvent<C>> {
        let floor = match (processed, self.cursor) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        while let Some(event) = self.events.pop_front() {
            self.cursor = Some(event.checkpoint);
            if floor.is_some_and(|floor| event.checkpoint <= floor) {
                self.skipped += 1;
                continue;
            }
            return Some(event);
        }
        None
    }

    pub(crate) fn clear(&mut self) {
        self.events.clear();
    }
}
