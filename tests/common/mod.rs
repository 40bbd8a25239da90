//! Shared helpers for subscription tests.

#![allow(dead_code)]

use chronicle_catchup::{
    CatchUpSubscription, Checkpoint, DropReason, EventData, EventSource, HandlerError, LiveHandle,
    LiveSink, LiveSubscription, Position, ReadRequest, RecordedEvent, ResolvedEvent, Result,
    Slice, StreamRevision, SubscribeRequest, SubscriptionError, SubscriptionHandler, Timestamp,
};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub fn events(n: usize) -> Vec<EventData> {
    (0..n)
        .map(|i| EventData::raw("OrderPlaced", format!("{{\"n\":{}}}", i).into_bytes()))
        .collect()
}

pub fn recorded(stream: &str, revision: u64) -> RecordedEvent {
    RecordedEvent {
        stream_id: stream.to_string(),
        revision: StreamRevision(revision),
        position: Position::new(revision * 100 + 100, revision * 100 + 100),
        event_type: "OrderPlaced".to_string(),
        data: Vec::new(),
        metadata: Vec::new(),
        created: Timestamp::now(),
    }
}

/// Event of stream "orders" checkpointed by revision.
pub fn at(revision: u64) -> ResolvedEvent<StreamRevision> {
    ResolvedEvent::new(recorded("orders", revision), StreamRevision(revision))
}

/// A page of "orders" events `range`, ending at the stream end when `end`.
pub fn page(range: std::ops::Range<u64>, end: bool) -> Slice<StreamRevision> {
    let events: Vec<_> = range.map(at).collect();
    Slice {
        last_checkpoint: events.last().map(|event| event.checkpoint),
        is_end_of_stream: end,
        events,
    }
}

// --- Recording handler ---

/// What a handler saw, in callback order.
#[derive(Debug)]
pub enum Observed<C> {
    Event(ResolvedEvent<C>),
    Checkpoint(C),
    LiveStarted,
    Dropped(DropReason, Option<String>),
}

type Hook<C> = Box<dyn FnMut(&CatchUpSubscription<C>, &ResolvedEvent<C>) -> std::result::Result<(), HandlerError> + Send>;

pub struct Recorder<C: Checkpoint> {
    sender: Sender<Observed<C>>,
    hook: Option<Hook<C>>,
    panic_on_drop: bool,
}

impl<C: Checkpoint> Recorder<C> {
    pub fn new() -> (Self, Receiver<Observed<C>>) {
        let (sender, receiver) = unbounded();
        (
            Self {
                sender,
                hook: None,
                panic_on_drop: false,
            },
            receiver,
        )
    }

    /// Run `hook` before recording each event; its error fails the callback.
    pub fn with_hook<F>(mut self, hook: F) -> Self
    where
        F: FnMut(&CatchUpSubscription<C>, &ResolvedEvent<C>) -> std::result::Result<(), HandlerError>
            + Send
            + 'static,
    {
        self.hook = Some(Box::new(hook));
        self
    }

    pub fn panicking_on_drop(mut self) -> Self {
        self.panic_on_drop = true;
        self
    }
}

impl<C: Checkpoint> SubscriptionHandler<C> for Recorder<C> {
    fn on_event(
        &mut self,
        subscription: &CatchUpSubscription<C>,
        event: &ResolvedEvent<C>,
    ) -> std::result::Result<(), HandlerError> {
        if let Some(hook) = self.hook.as_mut() {
            hook(subscription, event)?;
        }
        let _ = self.sender.send(Observed::Event(event.clone()));
        Ok(())
    }

    fn on_checkpoint(
        &mut self,
        _subscription: &CatchUpSubscription<C>,
        checkpoint: C,
    ) -> std::result::Result<(), HandlerError> {
        let _ = self.sender.send(Observed::Checkpoint(checkpoint));
        Ok(())
    }

    fn on_live_processing_started(&mut self, _subscription: &CatchUpSubscription<C>) {
        let _ = self.sender.send(Observed::LiveStarted);
    }

    fn on_dropped(
        &mut self,
        _subscription: &CatchUpSubscription<C>,
        reason: DropReason,
        error: Option<&SubscriptionError>,
    ) {
        let _ = self
            .sender
            .send(Observed::Dropped(reason, error.map(|e| e.to_string())));
        if self.panic_on_drop {
            panic!("on_dropped blew up");
        }
    }
}

/// Collect event checkpoints until live processing starts.
pub fn until_live<C: Checkpoint>(observed: &Receiver<Observed<C>>) -> Vec<C> {
    let mut checkpoints = Vec::new();
    loop {
        match observed.recv_timeout(TIMEOUT).expect("timed out waiting for live") {
            Observed::Event(event) => checkpoints.push(event.checkpoint),
            Observed::Checkpoint(_) => {}
            Observed::LiveStarted => return checkpoints,
            Observed::Dropped(reason, error) => {
                panic!("dropped before going live: {} {:?}", reason, error)
            }
        }
    }
}

/// Collect the next `n` event checkpoints.
pub fn next_events<C: Checkpoint>(observed: &Receiver<Observed<C>>, n: usize) -> Vec<C> {
    let mut checkpoints = Vec::new();
    while checkpoints.len() < n {
        match observed.recv_timeout(TIMEOUT).expect("timed out waiting for events") {
            Observed::Event(event) => checkpoints.push(event.checkpoint),
            Observed::Checkpoint(_) | Observed::LiveStarted => {}
            Observed::Dropped(reason, error) => panic!("dropped: {} {:?}", reason, error),
        }
    }
    checkpoints
}

/// Skip to the drop notification, returning the events seen on the way.
pub fn until_dropped<C: Checkpoint>(
    observed: &Receiver<Observed<C>>,
) -> (Vec<C>, DropReason, Option<String>) {
    let mut checkpoints = Vec::new();
    loop {
        match observed.recv_timeout(TIMEOUT).expect("timed out waiting for drop") {
            Observed::Event(event) => checkpoints.push(event.checkpoint),
            Observed::Checkpoint(_) | Observed::LiveStarted => {}
            Observed::Dropped(reason, error) => return (checkpoints, reason, error),
        }
    }
}

/// Assert nothing else is reported for a short while.
pub fn assert_quiet<C: Checkpoint>(observed: &Receiver<Observed<C>>) {
    if let Ok(extra) = observed.recv_timeout(Duration::from_millis(100)) {
        panic!("unexpected callback: {:?}", extra);
    }
}

pub fn revisions(range: std::ops::Range<u64>) -> Vec<StreamRevision> {
    range.map(StreamRevision).collect()
}

/// Poll until `condition` holds.
pub fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

// --- Scripted source ---

type ReadFn<C> = Box<dyn FnMut(&ReadRequest<C>) -> Result<Slice<C>> + Send>;
type SubscribeFn<C> =
    Box<dyn FnMut(&SubscribeRequest, &LiveSink<C>) -> Result<LiveSubscription<C>> + Send>;

/// An event source driven by closures, recording every call.
pub struct ScriptedSource<C: Checkpoint> {
    read: Mutex<ReadFn<C>>,
    subscribe: Mutex<SubscribeFn<C>>,
    pub reads: Mutex<Vec<ReadRequest<C>>>,
    pub sinks: Mutex<Vec<LiveSink<C>>>,
    pub unsubscribed: Mutex<Vec<LiveHandle>>,
}

impl<C: Checkpoint> ScriptedSource<C> {
    pub fn new<R, S>(read: R, subscribe: S) -> Arc<Self>
    where
        R: FnMut(&ReadRequest<C>) -> Result<Slice<C>> + Send + 'static,
        S: FnMut(&SubscribeRequest, &LiveSink<C>) -> Result<LiveSubscription<C>> + Send + 'static,
    {
        Arc::new(Self {
            read: Mutex::new(Box::new(read)),
            subscribe: Mutex::new(Box::new(subscribe)),
            reads: Mutex::new(Vec::new()),
            sinks: Mutex::new(Vec::new()),
            unsubscribed: Mutex::new(Vec::new()),
        })
    }

    /// The sink handed over by the most recent subscribe call.
    pub fn last_sink(&self) -> Option<LiveSink<C>> {
        self.sinks.lock().last().cloned()
    }

    pub fn subscribe_count(&self) -> usize {
        self.sinks.lock().len()
    }
}

impl<C: Checkpoint> EventSource<C> for ScriptedSource<C> {
    fn read_page(&self, request: &ReadRequest<C>) -> Result<Slice<C>> {
        self.reads.lock().push(request.clone());
        let mut read = self.read.lock();
        (*read)(request)
    }

    fn subscribe(
        &self,
        request: &SubscribeRequest,
        sink: LiveSink<C>,
    ) -> Result<LiveSubscription<C>> {
        self.sinks.lock().push(sink.clone());
        let mut subscribe = self.subscribe.lock();
        (*subscribe)(request, &sink)
    }

    fn unsubscribe(&self, handle: LiveHandle) {
        self.unsubscribed.lock().push(handle);
    }

    fn describe(&self) -> String {
        "orders".to_string()
    }
}

/// Open a live feed starting after `last`.
pub fn opened<C>(last: Option<C>) -> Result<LiveSubscription<C>> {
    Ok(LiveSubscription {
        handle: LiveHandle(1),
        last_checkpoint: last,
    })
}
