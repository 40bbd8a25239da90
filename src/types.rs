//! Core types for catch-up subscriptions.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Event type used for link events.
pub const LINK_EVENT_TYPE: &str = "$>";

/// A comparable resume token.
///
/// Checkpoints are totally ordered and serve both as the exclusive start of a
/// read and as the deduplication key for deliveries.
pub trait Checkpoint:
    Copy + Ord + fmt::Debug + fmt::Display + Send + Sync + Serialize + DeserializeOwned + 'static
{
}

/// Position of an event within a single stream.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct StreamRevision(pub u64);

impl StreamRevision {
    pub const START: StreamRevision = StreamRevision(0);
    pub const END: StreamRevision = StreamRevision(u64::MAX);

    pub fn next(self) -> Self {
        StreamRevision(self.0 + 1)
    }

    pub fn prev(self) -> Option<Self> {
        if self.0 > 0 {
            Some(StreamRevision(self.0 - 1))
        } else {
            None
        }
    }
}

impl fmt::Debug for StreamRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rev({})", self.0)
    }
}

impl fmt::Display for StreamRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Checkpoint for StreamRevision {}

/// Position of an event in the global log.
///
/// Ordered by commit offset, then prepare offset.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Position {
    pub commit: u64,
    pub prepare: u64,
}

impl Position {
    pub const START: Position = Position {
        commit: 0,
        prepare: 0,
    };
    pub const END: Position = Position {
        commit: u64::MAX,
        prepare: u64::MAX,
    };

    pub fn new(commit: u64, prepare: u64) -> Self {
        Self { commit, prepare }
    }
}

impl fmt::Debug for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pos({}/{})", self.commit, self.prepare)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C:{}/P:{}", self.commit, self.prepare)
    }
}

impl Checkpoint for Position {}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("Time went backwards");
        Timestamp(duration.as_micros() as i64)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// An event as it was written to the log.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecordedEvent {
    /// Stream the event was written to.
    pub stream_id: String,

    /// Position within that stream.
    pub revision: StreamRevision,

    /// Position within the global log.
    pub position: Position,

    /// Application-defined type. Types starting with `$` are system events.
    pub event_type: String,

    pub data: Vec<u8>,

    pub metadata: Vec<u8>,

    pub created: Timestamp,
}

impl RecordedEvent {
    pub fn is_link(&self) -> bool {
        self.event_type == LINK_EVENT_TYPE
    }

    pub fn is_system(&self) -> bool {
        self.event_type.starts_with('$')
    }

    /// Parse the `"<revision>@<stream>"` target of a link event.
    pub fn link_target(&self) -> Option<(StreamRevision, String)> {
        if !self.is_link() {
            return None;
        }
        let text = std::str::from_utf8(&self.data).ok()?;
        let (revision, stream) = text.split_once('@')?;
        let revision = revision.parse::<u64>().ok()?;
        Some((StreamRevision(revision), stream.to_string()))
    }
}

/// An event delivered to a subscription, with the checkpoint it was read at.
#[derive(Clone, Debug)]
pub struct ResolvedEvent<C> {
    /// The resolved event (the link target when a link was followed).
    pub event: RecordedEvent,

    /// The link record, when `event` was reached through a link.
    pub link: Option<RecordedEvent>,

    /// Checkpoint of the record the subscription actually read.
    pub checkpoint: C,
}

impl<C: Checkpoint> ResolvedEvent<C> {
    pub fn new(event: RecordedEvent, checkpoint: C) -> Self {
        Self {
            event,
            link: None,
            checkpoint,
        }
    }

    pub fn with_link(mut self, link: RecordedEvent) -> Self {
        self.link = Some(link);
        self
    }

    /// The record positioned in the log: the link when present, otherwise the event.
    pub fn original_event(&self) -> &RecordedEvent {
        self.link.as_ref().unwrap_or(&self.event)
    }

    pub fn original_stream_id(&self) -> &str {
        &self.original_event().stream_id
    }
}

/// A unit delivered by a catch-up subscription.
#[derive(Clone, Debug)]
pub enum Envelope<C> {
    /// A (possibly filtered) event.
    Event(ResolvedEvent<C>),
    /// Filtered subscriptions only: scanning progressed to this checkpoint.
    CheckpointReached(C),
}

impl<C: Checkpoint> Envelope<C> {
    pub fn checkpoint(&self) -> C {
        match self {
            Envelope::Event(event) => event.checkpoint,
            Envelope::CheckpointReached(checkpoint) => *checkpoint,
        }
    }
}

/// Where a catch-up subscription begins.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartFrom<C> {
    /// Replay everything from the start of the stream or log.
    Beginning,
    /// Resume after this checkpoint (exclusive).
    Checkpoint(C),
    /// Skip history and start at the live end.
    Current,
}

impl<C: Checkpoint> StartFrom<C> {
    /// Last checkpoint considered processed before anything is delivered.
    pub(crate) fn processed(&self) -> Option<C> {
        match self {
            StartFrom::Checkpoint(checkpoint) => Some(*checkpoint),
            StartFrom::Beginning | StartFrom::Current => None,
        }
    }
}

/// Input for appending an event (before revision/position assigned).
#[derive(Clone, Debug)]
pub struct EventData {
    pub event_type: String,
    pub data: Vec<u8>,
    pub metadata: Vec<u8>,
}

impl EventData {
    /// Create an event with a JSON payload.
    pub fn json(
        event_type: impl Into<String>,
        payload: &impl Serialize,
    ) -> std::result::Result<Self, serde_json::Error> {
        Ok(Self {
            event_type: event_type.into(),
            data: serde_json::to_vec(payload)?,
            metadata: Vec::new(),
        })
    }

    /// Create an event with raw bytes.
    pub fn raw(event_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            metadata: Vec::new(),
        }
    }

    /// Create a link to `revision` of `stream`.
    pub fn link_to(stream: &str, revision: StreamRevision) -> Self {
        Self::raw(LINK_EVENT_TYPE, format!("{}@{}", revision.0, stream).into_bytes())
    }

    pub fn with_metadata(mut self, metadata: Vec<u8>) -> Self {
        self.metadata = metadata;
        self
    }
}
