//! In-memory event log.

use super::hub::LiveHub;
use crate::error::{Result, SubscriptionError};
use crate::source::{EventSource, LiveHandle, LiveSubscription, ReadRequest, Slice, SubscribeRequest};
use crate::subscriptions::LiveSink;
use crate::types::{
    Checkpoint, EventData, Position, RecordedEvent, ResolvedEvent, StreamRevision, Timestamp,
};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Fixed per-record overhead counted into log positions.
const RECORD_HEADER_SIZE: u64 = 48;

/// Name reported by the whole-log source.
pub const ALL_STREAM: &str = "<all>";

#[derive(Default)]
struct LogState {
    /// Every record in commit order.
    all: Vec<RecordedEvent>,
    /// Indexes into `all`, per stream, in revision order.
    streams: HashMap<String, Vec<usize>>,
    deleted: HashSet<String>,
    /// End offset of the last record.
    offset: u64,
}

impl LogState {
    fn check_not_deleted(&self, stream: &str) -> Result<()> {
        if self.deleted.contains(stream) {
            return Err(SubscriptionError::StreamDeleted(stream.to_string()));
        }
        Ok(())
    }

    fn last_revision(&self, stream: &str) -> Option<StreamRevision> {
        self.streams
            .get(stream)
            .and_then(|indexes| indexes.len().checked_sub(1))
            .map(|last| StreamRevision(last as u64))
    }

    fn last_position(&self) -> Option<Position> {
        self.all.last().map(|event| event.position)
    }

    /// Follow a link record to its target, if it still exists.
    fn link_target(&self, event: &RecordedEvent) -> Option<&RecordedEvent> {
        let (revision, stream) = event.link_target()?;
        if self.deleted.contains(&stream) {
            return None;
        }
        let index = *self.streams.get(&stream)?.get(revision.0 as usize)?;
        self.all.get(index)
    }

    fn resolve<C: Checkpoint>(
        &self,
        event: &RecordedEvent,
        checkpoint: C,
        resolve_link_tos: bool,
    ) -> ResolvedEvent<C> {
        match self.link_target(event).filter(|_| resolve_link_tos) {
            Some(target) => ResolvedEvent::new(target.clone(), checkpoint).with_link(event.clone()),
            None => ResolvedEvent::new(event.clone(), checkpoint),
        }
    }
}

/// A thread-safe, in-process event log with live feeds.
///
/// Streams are append-only and addressed by revision; every event also gets
/// a position in the global log. Positions are byte offsets of a notional
/// on-disk layout, so they increase but are not contiguous.
///
/// Appends and live-feed registration are serialized, so a feed opened at
/// checkpoint L receives exactly the events appended after L.
pub struct InMemoryEventLog {
    state: RwLock<LogState>,
    hub: LiveHub,
    publish: Mutex<()>,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(LogState::default()),
            hub: LiveHub::new(),
            publish: Mutex::new(()),
        }
    }

    /// Append events to `stream`, returning the revision of the last one.
    ///
    /// Blocks while any live subscriber of the stream has a full queue. A
    /// handler that appends to the log it is subscribed to can therefore wait
    /// on its own queue; the append resumes once that subscription drains or
    /// is asked to stop.
    pub fn append(&self, stream: &str, events: Vec<EventData>) -> Result<StreamRevision> {
        if events.is_empty() {
            return Err(SubscriptionError::InvalidSettings(
                "append needs at least one event".to_string(),
            ));
        }

        let _publish = self.publish.lock();
        let (appended, last) = {
            let mut state = self.state.write();
            state.check_not_deleted(stream)?;

            let mut appended = Vec::with_capacity(events.len());
            for data in events {
                let revision = state.last_revision(stream).map_or(StreamRevision::START, StreamRevision::next);
                let size = RECORD_HEADER_SIZE
                    + (stream.len() + data.event_type.len() + data.data.len() + data.metadata.len())
                        as u64;
                state.offset += size;
                let position = Position::new(state.offset, state.offset);

                let event = RecordedEvent {
                    stream_id: stream.to_string(),
                    revision,
                    position,
                    event_type: data.event_type,
                    data: data.data,
                    metadata: data.metadata,
                    created: Timestamp::now(),
                };
                let target = state.link_target(&event).cloned();
                let index = state.all.len();
                state.all.push(event.clone());
                state.streams.entry(stream.to_string()).or_default().push(index);
                appended.push((event, target));
            }
            let last = appended
                .last()
                .map(|(event, _)| event.revision)
                .unwrap_or(StreamRevision::START);
            (appended, last)
        };

        for (event, target) in &appended {
            self.hub.broadcast(event, target.as_ref());
        }
        Ok(last)
    }

    /// Append a link to `revision` of `target_stream` onto `stream`.
    pub fn append_link(
        &self,
        stream: &str,
        target_stream: &str,
        revision: StreamRevision,
    ) -> Result<StreamRevision> {
        self.append(stream, vec![EventData::link_to(target_stream, revision)])
    }

    /// Delete a stream. Reads of it fail from now on and its live feeds are
    /// dropped with `StreamDeleted`. Its events stay in the global log.
    pub fn delete_stream(&self, stream: &str) -> Result<()> {
        let _publish = self.publish.lock();
        {
            let mut state = self.state.write();
            state.check_not_deleted(stream)?;
            state.deleted.insert(stream.to_string());
        }
        debug!(stream, "stream deleted");
        self.hub.drop_stream(stream);
        Ok(())
    }

    /// Drop every live feed with `ConnectionClosed`.
    pub fn disconnect_subscribers(&self) {
        let _publish = self.publish.lock();
        debug!(subscribers = self.hub.subscriber_count(), "disconnecting live subscribers");
        self.hub.disconnect_all();
    }

    /// Source over a single stream.
    pub fn stream(self: &Arc<Self>, stream: impl Into<String>) -> Arc<StreamSource> {
        Arc::new(StreamSource {
            log: Arc::clone(self),
            stream: stream.into(),
        })
    }

    /// Source over the whole log.
    pub fn all(self: &Arc<Self>) -> Arc<AllSource> {
        Arc::new(AllSource {
            log: Arc::clone(self),
        })
    }

    pub fn head_position(&self) -> Option<Position> {
        self.state.read().last_position()
    }

    pub fn stream_revision(&self, stream: &str) -> Option<StreamRevision> {
        self.state.read().last_revision(stream)
    }

    /// Number of open live feeds.
    pub fn subscriber_count(&self) -> usize {
        self.hub.subscriber_count()
    }

    pub fn len(&self) -> usize {
        self.state.read().all.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryEventLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads and live feeds for one stream, checkpointed by revision.
pub struct StreamSource {
    log: Arc<InMemoryEventLog>,
    stream: String,
}

impl EventSource<StreamRevision> for StreamSource {
    fn read_page(&self, request: &ReadRequest<StreamRevision>) -> Result<Slice<StreamRevision>> {
        let state = self.log.state.read();
        state.check_not_deleted(&self.stream)?;
        let Some(indexes) = state.streams.get(&self.stream) else {
            return Ok(Slice::end(None));
        };

        let start = match request.after {
            Some(after) => usize::try_from(after.0)
                .ok()
                .and_then(|after| after.checked_add(1))
                .unwrap_or(usize::MAX),
            None => 0,
        };
        let end = start.saturating_add(request.max_count).min(indexes.len());
        let events: Vec<_> = indexes
            .get(start..end)
            .unwrap_or_default()
            .iter()
            .map(|&index| {
                let event = &state.all[index];
                state.resolve(event, event.revision, request.resolve_link_tos)
            })
            .collect();

        Ok(Slice {
            last_checkpoint: events.last().map(|event| event.checkpoint),
            is_end_of_stream: end >= indexes.len(),
            events,
        })
    }

    fn subscribe(
        &self,
        request: &SubscribeRequest,
        sink: LiveSink<StreamRevision>,
    ) -> Result<LiveSubscription<StreamRevision>> {
        let _publish = self.log.publish.lock();
        let last_checkpoint = {
            let state = self.log.state.read();
            state.check_not_deleted(&self.stream)?;
            state.last_revision(&self.stream)
        };
        let handle = self
            .log
            .hub
            .subscribe_stream(&self.stream, sink, request.resolve_link_tos);
        debug!(stream = %self.stream, handle = handle.0, ?last_checkpoint, "live feed opened");
        Ok(LiveSubscription {
            handle,
            last_checkpoint,
        })
    }

    fn unsubscribe(&self, handle: LiveHandle) {
        self.log.hub.unsubscribe(handle);
    }

    fn describe(&self) -> String {
        self.stream.clone()
    }
}

/// Reads and live feeds for the whole log, checkpointed by position.
pub struct AllSource {
    log: Arc<InMemoryEventLog>,
}

impl EventSource<Position> for AllSource {
    fn read_page(&self, request: &ReadRequest<Position>) -> Result<Slice<Position>> {
        let state = self.log.state.read();
        let start = match request.after {
            Some(after) => state.all.partition_point(|event| event.position <= after),
            None => 0,
        };
        let end = start.saturating_add(request.max_count).min(state.all.len());
        let events: Vec<_> = state.all[start..end]
            .iter()
            .map(|event| state.resolve(event, event.position, request.resolve_link_tos))
            .collect();

        Ok(Slice {
            last_checkpoint: events.last().map(|event| event.checkpoint),
            is_end_of_stream: end >= state.all.len(),
            events,
        })
    }

    fn subscribe(
        &self,
        request: &SubscribeRequest,
        sink: LiveSink<Position>,
    ) -> Result<LiveSubscription<Position>> {
        let _publish = self.log.publish.lock();
        let last_checkpoint = self.log.state.read().last_position();
        let handle = self.log.hub.subscribe_all(sink, request.resolve_link_tos);
        debug!(handle = handle.0, ?last_checkpoint, "live feed opened on the whole log");
        Ok(LiveSubscription {
            handle,
            last_checkpoint,
        })
    }

    fn unsubscribe(&self, handle: LiveHandle) {
        self.log.hub.unsubscribe(handle);
    }

    fn describe(&self) -> String {
        ALL_STREAM.to_string()
    }
}
