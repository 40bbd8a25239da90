//! The worker loop of a catch-up subscription.
//!
//! One worker thread owns all mutable subscription state. It reacts to
//! commands on its inbox (page results, live feed open/drop, stop) and to
//! events on the bounded live channel:
//!
//! ```text
//! Historical --end of data--> Subscribing --feed opened--> ReconcilingGap
//!      ReconcilingGap --cursor reached live start--> drain buffer --> Live
//!      any phase --failure or stop--> Dropped
//! ```
//!
//! Everything delivered goes through `process`, which skips checkpoints not
//! past the last processed one. That single rule keeps the historical path,
//! the gap read and the buffered live events from overlapping.

use super::coordinator::{DropCoordinator, Trigger};
use super::filtered::FilterAdapter;
use super::handle::CatchUpSubscription;
use super::io::IoRequest;
use super::live::{LiveBuffer, LiveSink};
use super::reader::{HistoricalReader, PageOutcome};
use super::types::{DropReason, Phase, SubscriptionHandler};
use crate::error::{Result, SubscriptionError};
use crate::settings::SubscriptionSettings;
use crate::source::{EventSource, LiveHandle, LiveSubscription, Slice, SubscribeRequest};
use crate::types::{Checkpoint, Envelope, ResolvedEvent, StartFrom};
use crossbeam_channel::{Receiver, Select, Sender};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, debug_span, trace, warn};

/// Pause before re-reading when the log has not yet caught up with the live
/// start.
const FLUSH_DELAY: Duration = Duration::from_millis(1);

/// Messages for the worker thread.
pub(crate) enum Command<C> {
    PageRead(Result<Slice<C>>),
    LiveOpened(Result<LiveSubscription<C>>),
    LiveDropped {
        reason: DropReason,
        error: Option<SubscriptionError>,
    },
    Stop,
}

enum Next<C> {
    Command(Command<C>),
    Live(ResolvedEvent<C>),
    Disconnected,
}

/// Channels connecting the worker to the handle, the I/O thread and the
/// live feed.
pub(crate) struct Wiring<C> {
    pub(crate) control: Receiver<Command<C>>,
    pub(crate) live: Receiver<ResolvedEvent<C>>,
    pub(crate) sink: LiveSink<C>,
    pub(crate) io: Sender<IoRequest<C>>,
    pub(crate) io_thread: JoinHandle<()>,
}

pub(crate) struct Reconciler<C: Checkpoint, H> {
    subscription: CatchUpSubscription<C>,
    source: Arc<dyn EventSource<C>>,
    handler: H,
    settings: SubscriptionSettings,
    start: StartFrom<C>,
    wiring: Wiring<C>,
    reader: HistoricalReader<C>,
    buffer: LiveBuffer<C>,
    filter: Option<FilterAdapter>,
    coordinator: DropCoordinator,
    phase: Phase,
    processed: Option<C>,
    live: Option<LiveHandle>,
    live_started: bool,
    delivered: u64,
}

impl<C: Checkpoint, H: SubscriptionHandler<C>> Reconciler<C, H> {
    pub(crate) fn new(
        subscription: CatchUpSubscription<C>,
        source: Arc<dyn EventSource<C>>,
        handler: H,
        settings: SubscriptionSettings,
        start: StartFrom<C>,
        wiring: Wiring<C>,
    ) -> Self {
        let processed = start.processed();
        let reader =
            HistoricalReader::new(processed, settings.page_size(), settings.resolve_link_tos);
        let buffer = LiveBuffer::new(settings.max_live_queue_size);
        let filter = settings
            .filter
            .clone()
            .map(|filter| FilterAdapter::new(filter, settings.checkpoint_interval));
        Self {
            subscription,
            source,
            handler,
            settings,
            start,
            wiring,
            reader,
            buffer,
            filter,
            coordinator: DropCoordinator::new(),
            phase: Phase::Historical,
            processed,
            live: None,
            live_started: false,
            delivered: 0,
        }
    }

    pub(crate) fn run(mut self) {
        let span = debug_span!(
            "catch_up",
            subscription = %self.subscription.name(),
            target = %self.subscription.target(),
        );
        let _entered = span.enter();
        self.subscription.shared().mark_worker();

        self.begin();
        while !self.coordinator.is_dropped() {
            match self.next() {
                Next::Command(command) => self.handle(command),
                Next::Live(event) => self.live_event_appeared(event),
                Next::Disconnected => self.drop_subscription(Trigger::ChannelClosed, None),
            }
        }
        self.shutdown();
    }

    fn begin(&mut self) {
        match self.start {
            StartFrom::Current => {
                debug!("starting at the live end");
                self.subscribe();
            }
            _ => {
                debug!(after = ?self.processed, page_size = self.settings.page_size(), "reading history");
                self.request_page(None);
            }
        }
    }

    /// Control messages take priority over live events.
    fn next(&self) -> Next<C> {
        if let Ok(command) = self.wiring.control.try_recv() {
            return Next::Command(command);
        }

        let mut select = Select::new();
        let control = select.recv(&self.wiring.control);
        if self.accepts_live() {
            select.recv(&self.wiring.live);
        }
        let operation = select.select();
        if operation.index() == control {
            match operation.recv(&self.wiring.control) {
                Ok(command) => Next::Command(command),
                Err(_) => Next::Disconnected,
            }
        } else {
            match operation.recv(&self.wiring.live) {
                Ok(event) => Next::Live(event),
                Err(_) => Next::Disconnected,
            }
        }
    }

    /// While catching up, live events are pulled only as long as the buffer
    /// has room. Once it is full the channel fills and the transport blocks.
    fn accepts_live(&self) -> bool {
        match self.phase {
            Phase::Live => true,
            Phase::Subscribing | Phase::ReconcilingGap => !self.buffer.is_full(),
            Phase::Historical | Phase::Dropped => false,
        }
    }

    fn handle(&mut self, command: Command<C>) {
        match command {
            Command::PageRead(Ok(slice)) => self.page_read(slice),
            Command::PageRead(Err(error)) => {
                self.drop_subscription(Trigger::ReadFailed, Some(error))
            }
            Command::LiveOpened(Ok(live)) => self.live_opened(live),
            Command::LiveOpened(Err(error)) => {
                self.drop_subscription(Trigger::SubscribeFailed, Some(error))
            }
            Command::LiveDropped { reason, error } => {
                self.drop_subscription(Trigger::LiveDropped(reason), error)
            }
            Command::Stop => self.drop_subscription(Trigger::Stop, None),
        }
    }

    fn request_page(&mut self, delay: Option<Duration>) {
        let request = self.reader.next_request();
        self.send_io(IoRequest::Read { request, delay });
    }

    fn subscribe(&mut self) {
        self.set_phase(Phase::Subscribing);
        let request = SubscribeRequest {
            resolve_link_tos: self.settings.resolve_link_tos,
            subscription_name: self.subscription.name().to_string(),
        };
        let sink = self.wiring.sink.clone();
        self.send_io(IoRequest::Subscribe { request, sink });
    }

    fn send_io(&mut self, request: IoRequest<C>) {
        if self.wiring.io.send(request).is_err() {
            let error = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "I/O thread exited");
            self.drop_subscription(Trigger::ChannelClosed, Some(error.into()));
        }
    }

    fn page_read(&mut self, slice: Slice<C>) {
        let outcome = self.reader.complete(&slice);
        trace!(
            events = slice.events.len(),
            last = ?slice.last_checkpoint,
            end = slice.is_end_of_stream,
            ?outcome,
            "page read"
        );

        for event in slice.events {
            self.process(event);
            if self.coordinator.is_dropped() {
                return;
            }
        }
        if self.subscription.shared().stop_requested() {
            return;
        }

        match outcome {
            PageOutcome::More => self.request_page(None),
            PageOutcome::AwaitFlush => self.request_page(Some(FLUSH_DELAY)),
            PageOutcome::EndOfData => match self.phase {
                Phase::Historical => {
                    debug!(
                        pages = self.reader.pages_read(),
                        last = ?self.processed,
                        "history read, opening live feed"
                    );
                    self.subscribe();
                }
                Phase::ReconcilingGap => self.go_live(),
                _ => {}
            },
        }
    }

    fn live_opened(&mut self, live: LiveSubscription<C>) {
        self.live = Some(live.handle);
        debug!(handle = live.handle.0, live_start = ?live.last_checkpoint, "live feed opened");

        if let (StartFrom::Current, None, Some(last)) =
            (self.start, self.processed, live.last_checkpoint)
        {
            self.mark_processed(last);
            self.reader.skip_to(last);
        }

        self.set_phase(Phase::ReconcilingGap);
        match live.last_checkpoint {
            Some(live_start)
                if !self.reader.has_reached(live_start)
                    && self.processed.map_or(true, |processed| processed < live_start) =>
            {
                trace!(from = ?self.reader.cursor(), to = %live_start, "reading gap");
                self.reader.read_until(live_start);
                self.request_page(None);
            }
            _ => self.go_live(),
        }
    }

    fn go_live(&mut self) {
        let buffered = self.buffer.len();
        while let Some(event) = self.buffer.next_after(self.processed) {
            self.process(event);
            if self.coordinator.is_dropped() {
                return;
            }
        }
        debug!(
            buffered,
            skipped = self.buffer.skipped(),
            delivered = self.delivered,
            "caught up"
        );

        if self.subscription.shared().stop_requested() {
            return;
        }
        if !self.live_started {
            self.live_started = true;
            let subscription = &self.subscription;
            let handler = &mut self.handler;
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                handler.on_live_processing_started(subscription)
            }));
            if let Err(payload) = outcome {
                let error = SubscriptionError::HandlerPanicked(panic_message(payload.as_ref()));
                self.drop_subscription(Trigger::HandlerFailed(self.phase), Some(error));
                return;
            }
        }
        self.set_phase(Phase::Live);
    }

    fn live_event_appeared(&mut self, event: ResolvedEvent<C>) {
        match self.phase {
            Phase::Live => self.process(event),
            Phase::Subscribing | Phase::ReconcilingGap => {
                let checkpoint = event.checkpoint;
                if !self.buffer.push(event) {
                    warn!(%checkpoint, "discarding out-of-order live event");
                }
            }
            Phase::Historical | Phase::Dropped => {}
        }
    }

    /// Deliver one event unless it was already processed. Nothing is
    /// delivered once a stop has been requested.
    fn process(&mut self, event: ResolvedEvent<C>) {
        if self.subscription.shared().stop_requested() {
            return;
        }
        let checkpoint = event.checkpoint;
        if self.processed.is_some_and(|processed| checkpoint <= processed) {
            trace!(%checkpoint, "skipping already processed event");
            return;
        }

        let matched = self.filter.as_ref().map_or(true, |filter| filter.matches(&event));
        if matched {
            if let Err(error) = self.dispatch(Envelope::Event(event)) {
                self.drop_subscription(Trigger::HandlerFailed(self.phase), Some(error));
                return;
            }
            self.delivered += 1;
        }
        self.mark_processed(checkpoint);

        if let Some(reached) = self.filter.as_mut().and_then(|filter| filter.scanned(checkpoint)) {
            if let Err(error) = self.dispatch(Envelope::CheckpointReached(reached)) {
                self.drop_subscription(Trigger::HandlerFailed(self.phase), Some(error));
            }
        }
    }

    fn dispatch(&mut self, envelope: Envelope<C>) -> Result<()> {
        let subscription = &self.subscription;
        let handler = &mut self.handler;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| match &envelope {
            Envelope::Event(event) => handler.on_event(subscription, event),
            Envelope::CheckpointReached(checkpoint) => {
                handler.on_checkpoint(subscription, *checkpoint)
            }
        }));
        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(error)) => Err(SubscriptionError::Handler(error)),
            Err(payload) => Err(SubscriptionError::HandlerPanicked(panic_message(
                payload.as_ref(),
            ))),
        }
    }

    fn mark_processed(&mut self, checkpoint: C) {
        self.processed = Some(checkpoint);
        self.subscription.shared().set_last_processed(checkpoint);
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.phase != phase {
            trace!(from = %self.phase, to = %phase, "phase change");
            self.phase = phase;
            self.subscription.shared().set_phase(phase);
        }
    }

    /// Drop once: record the reason, notify the handler, then release the
    /// live feed. Later triggers are ignored.
    fn drop_subscription(&mut self, trigger: Trigger, error: Option<SubscriptionError>) {
        let Some(reason) = self.coordinator.claim(trigger) else {
            trace!(?trigger, "already dropped");
            return;
        };
        debug!(
            %reason,
            phase = %self.phase,
            last = ?self.processed,
            error = ?error.as_ref().map(|e| e.to_string()),
            "dropping subscription"
        );
        self.phase = Phase::Dropped;
        self.subscription.shared().record_drop(reason);

        let subscription = &self.subscription;
        let handler = &mut self.handler;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            handler.on_dropped(subscription, reason, error.as_ref())
        }));
        if let Err(payload) = outcome {
            warn!(panic = %panic_message(payload.as_ref()), "on_dropped panicked");
        }

        if let Some(handle) = self.live.take() {
            self.source.unsubscribe(handle);
        }
        self.buffer.clear();
        self.subscription.shared().mark_finished();
    }

    /// Wait out the I/O thread and release a live feed that opened after
    /// the drop.
    fn shutdown(self) {
        let Reconciler { source, wiring, .. } = self;
        let Wiring {
            control,
            live,
            io,
            io_thread,
            ..
        } = wiring;
        drop(live);
        drop(io);
        if io_thread.join().is_err() {
            warn!("I/O thread panicked");
        }
        for command in control.try_iter() {
            if let Command::LiveOpened(Ok(opened)) = command {
                debug!(handle = opened.handle.0, "releasing live feed opened after drop");
                source.unsubscribe(opened.handle);
            }
        }
        trace!("worker finished");
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
