//! Live feed broadcaster for the in-memory log.

use crate::error::SubscriptionError;
use crate::source::LiveHandle;
use crate::subscriptions::{DropReason, LiveSink};
use crate::types::{Position, RecordedEvent, ResolvedEvent, StreamRevision};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

/// Where a subscriber's events go and how they are checkpointed.
#[derive(Clone)]
enum Sink {
    Stream {
        stream: String,
        sink: LiveSink<StreamRevision>,
    },
    All(LiveSink<Position>),
}

#[derive(Clone)]
struct Subscriber {
    sink: Sink,
    resolve_link_tos: bool,
}

impl Subscriber {
    fn matches(&self, event: &RecordedEvent) -> bool {
        match &self.sink {
            Sink::Stream { stream, .. } => *stream == event.stream_id,
            Sink::All(_) => true,
        }
    }

    /// Push an appended event. Returns false if the subscriber is gone.
    fn send(&self, event: &RecordedEvent, target: Option<&RecordedEvent>) -> bool {
        let (resolved, link) = match target {
            Some(target) if self.resolve_link_tos => (target.clone(), Some(event.clone())),
            _ => (event.clone(), None),
        };
        match &self.sink {
            Sink::Stream { sink, .. } => {
                let mut delivered = ResolvedEvent::new(resolved, event.revision);
                delivered.link = link;
                sink.event_appeared(delivered)
            }
            Sink::All(sink) => {
                let mut delivered = ResolvedEvent::new(resolved, event.position);
                delivered.link = link;
                sink.event_appeared(delivered)
            }
        }
    }

    fn dropped(&self, reason: DropReason, error: SubscriptionError) {
        match &self.sink {
            Sink::Stream { sink, .. } => sink.dropped(reason, Some(error)),
            Sink::All(sink) => sink.dropped(reason, Some(error)),
        }
    }
}

/// Registry of live feeds.
///
/// Sends block while a subscriber's queue is full, so broadcasting works on
/// a snapshot of the registry instead of holding its lock.
pub(crate) struct LiveHub {
    subscribers: RwLock<HashMap<LiveHandle, Subscriber>>,
    next_id: AtomicU64,
}

impl LiveHub {
    pub(crate) fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub(crate) fn subscribe_stream(
        &self,
        stream: &str,
        sink: LiveSink<StreamRevision>,
        resolve_link_tos: bool,
    ) -> LiveHandle {
        self.register(Subscriber {
            sink: Sink::Stream {
                stream: stream.to_string(),
                sink,
            },
            resolve_link_tos,
        })
    }

    pub(crate) fn subscribe_all(&self, sink: LiveSink<Position>, resolve_link_tos: bool) -> LiveHandle {
        self.register(Subscriber {
            sink: Sink::All(sink),
            resolve_link_tos,
        })
    }

    fn register(&self, subscriber: Subscriber) -> LiveHandle {
        let handle = LiveHandle(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.subscribers.write().insert(handle, subscriber);
        trace!(handle = handle.0, "live subscriber registered");
        handle
    }

    pub(crate) fn unsubscribe(&self, handle: LiveHandle) {
        if self.subscribers.write().remove(&handle).is_some() {
            trace!(handle = handle.0, "live subscriber removed");
        }
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Push an appended event (and its link target, if any) to every
    /// matching subscriber. Subscribers that are gone are removed.
    pub(crate) fn broadcast(&self, event: &RecordedEvent, target: Option<&RecordedEvent>) {
        let matching: Vec<(LiveHandle, Subscriber)> = {
            let subscribers = self.subscribers.read();
            subscribers
                .iter()
                .filter(|(_, subscriber)| subscriber.matches(event))
                .map(|(handle, subscriber)| (*handle, subscriber.clone()))
                .collect()
        };

        let mut to_remove = Vec::new();
        for (handle, subscriber) in matching {
            if !subscriber.send(event, target) {
                to_remove.push(handle);
            }
        }

        if !to_remove.is_empty() {
            let mut subscribers = self.subscribers.write();
            for handle in to_remove {
                subscribers.remove(&handle);
            }
        }
    }

    /// End every live feed on `stream`.
    pub(crate) fn drop_stream(&self, stream: &str) {
        let dropped = self.remove_where(|subscriber| {
            matches!(&subscriber.sink, Sink::Stream { stream: s, .. } if s == stream)
        });
        for subscriber in dropped {
            subscriber.dropped(
                DropReason::StreamDeleted,
                SubscriptionError::StreamDeleted(stream.to_string()),
            );
        }
    }

    /// End every live feed as if the connection was lost.
    pub(crate) fn disconnect_all(&self) {
        for subscriber in self.remove_where(|_| true) {
            subscriber.dropped(
                DropReason::ConnectionClosed,
                SubscriptionError::ConnectionClosed("disconnected by the event log".to_string()),
            );
        }
    }

    fn remove_where<F>(&self, predicate: F) -> Vec<Subscriber>
    where
        F: Fn(&Subscriber) -> bool,
    {
        let mut subscribers = self.subscribers.write();
        let handles: Vec<LiveHandle> = subscribers
            .iter()
            .filter(|(_, subscriber)| predicate(subscriber))
            .map(|(handle, _)| *handle)
            .collect();
        handles
            .into_iter()
            .filter_map(|handle| subscribers.remove(&handle))
            .collect()
    }
}

impl Default for LiveHub {
    fn default() -> Self {
        Self::new()
    }
}
