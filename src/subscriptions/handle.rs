//! The public subscription handle.

use super::io::{self, IoRequest};
use super::live::LiveSink;
use super::reconciler::{Command, Reconciler, Wiring};
use super::types::{DropReason, Phase, SubscriptionHandler};
use crate::error::{Result, SubscriptionError};
use crate::settings::SubscriptionSettings;
use crate::source::EventSource;
use crate::types::{Checkpoint, StartFrom};
use crossbeam_channel::{bounded, unbounded, Sender};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tracing::debug;

/// State visible from outside the worker thread.
struct Observed<C> {
    phase: Phase,
    last_processed: Option<C>,
    drop_reason: Option<DropReason>,
    finished: bool,
}

pub(crate) struct Shared<C> {
    name: String,
    target: String,
    observed: Mutex<Observed<C>>,
    finished: Condvar,
    stop_requested: Arc<AtomicBool>,
    control: Sender<Command<C>>,
    worker: OnceLock<ThreadId>,
}

impl<C: Checkpoint> Shared<C> {
    pub(crate) fn mark_worker(&self) {
        let _ = self.worker.set(thread::current().id());
    }

    fn is_worker_thread(&self) -> bool {
        self.worker.get() == Some(&thread::current().id())
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    pub(crate) fn set_phase(&self, phase: Phase) {
        self.observed.lock().phase = phase;
    }

    pub(crate) fn set_last_processed(&self, checkpoint: C) {
        self.observed.lock().last_processed = Some(checkpoint);
    }

    pub(crate) fn record_drop(&self, reason: DropReason) {
        let mut observed = self.observed.lock();
        observed.phase = Phase::Dropped;
        observed.drop_reason = Some(reason);
    }

    pub(crate) fn mark_finished(&self) {
        self.observed.lock().finished = true;
        self.finished.notify_all();
    }
}

/// A running catch-up subscription.
///
/// Replays history from the start point, then switches to the live feed
/// without gaps or duplicates. Callbacks run on a dedicated worker thread;
/// this handle is cheap to clone and can be used from any thread, including
/// from inside the callbacks.
pub struct CatchUpSubscription<C: Checkpoint> {
    shared: Arc<Shared<C>>,
}

impl<C: Checkpoint> Clone for CatchUpSubscription<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: Checkpoint> CatchUpSubscription<C> {
    /// Start a subscription over `source`.
    ///
    /// Fails only when the settings are invalid or the threads cannot be
    /// spawned; everything after that is reported through `on_dropped`.
    pub fn start<H>(
        source: Arc<dyn EventSource<C>>,
        from: StartFrom<C>,
        settings: SubscriptionSettings,
        handler: H,
    ) -> Result<Self>
    where
        H: SubscriptionHandler<C>,
    {
        settings.validate()?;

        let target = source.describe();
        let name = if settings.subscription_name.is_empty() {
            format!("catch-up:{}", target)
        } else {
            settings.subscription_name.clone()
        };

        let (control_tx, control_rx) = unbounded();
        let (live_tx, live_rx) = bounded(settings.max_live_queue_size);
        let (io_tx, io_rx) = unbounded::<IoRequest<C>>();

        let shared = Arc::new(Shared {
            name: name.clone(),
            target,
            observed: Mutex::new(Observed {
                phase: match from {
                    StartFrom::Current => Phase::Subscribing,
                    _ => Phase::Historical,
                },
                last_processed: from.processed(),
                drop_reason: None,
                finished: false,
            }),
            finished: Condvar::new(),
            stop_requested: Arc::new(AtomicBool::new(false)),
            control: control_tx.clone(),
            worker: OnceLock::new(),
        });
        let subscription = CatchUpSubscription { shared };

        let io_source = Arc::clone(&source);
        let io_thread = thread::Builder::new()
            .name(format!("{}-io", name))
            .spawn(move || io::run(io_source, io_rx, control_tx))?;

        let sink = LiveSink::new(
            live_tx,
            subscription.shared.control.clone(),
            Arc::clone(&subscription.shared.stop_requested),
        );
        let wiring = Wiring {
            control: control_rx,
            live: live_rx,
            sink,
            io: io_tx,
            io_thread,
        };
        let reconciler = Reconciler::new(subscription.clone(), source, handler, settings, from, wiring);
        thread::Builder::new()
            .name(name.clone())
            .spawn(move || reconciler.run())?;

        debug!(subscription = %name, ?from, "subscription started");
        Ok(subscription)
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// The stream id, or `<all>`.
    pub fn target(&self) -> &str {
        &self.shared.target
    }

    pub fn phase(&self) -> Phase {
        self.shared.observed.lock().phase
    }

    /// Checkpoint of the last event delivered (or scanned, when filtered).
    pub fn last_processed_checkpoint(&self) -> Option<C> {
        self.shared.observed.lock().last_processed
    }

    pub fn drop_reason(&self) -> Option<DropReason> {
        self.shared.observed.lock().drop_reason
    }

    pub fn is_dropped(&self) -> bool {
        self.drop_reason().is_some()
    }

    /// Ask the worker to drop with `UserInitiated` without waiting.
    pub fn request_stop(&self) {
        if !self.shared.stop_requested.swap(true, Ordering::SeqCst) {
            debug!(subscription = %self.shared.name, "stop requested");
            let _ = self.shared.control.send(Command::Stop);
        }
    }

    /// Stop the subscription and wait until `on_dropped` has returned.
    ///
    /// Called from inside a callback this only requests the stop: the worker
    /// cannot wait for itself. Stopping an already dropped subscription
    /// returns immediately.
    pub fn stop(&self, timeout: Duration) -> Result<()> {
        self.request_stop();
        if self.shared.is_worker_thread() {
            return Ok(());
        }

        let deadline = Instant::now() + timeout;
        let mut observed = self.shared.observed.lock();
        while !observed.finished {
            if self
                .shared
                .finished
                .wait_until(&mut observed, deadline)
                .timed_out()
                && !observed.finished
            {
                return Err(SubscriptionError::StopTimeout(self.shared.name.clone()));
            }
        }
        Ok(())
    }

    /// Wait until the subscription has dropped for any reason.
    pub fn wait_dropped(&self, timeout: Duration) -> Option<DropReason> {
        let deadline = Instant::now() + timeout;
        let mut observed = self.shared.observed.lock();
        while !observed.finished {
            if self
                .shared
                .finished
                .wait_until(&mut observed, deadline)
                .timed_out()
            {
                break;
            }
        }
        if observed.finished {
            observed.drop_reason
        } else {
            None
        }
    }

    pub(crate) fn shared(&self) -> &Shared<C> {
        &self.shared
    }

    /// Whether the caller is running inside one of this subscription's
    /// callbacks.
    pub(crate) fn on_worker_thread(&self) -> bool {
        self.shared.is_worker_thread()
    }
}

impl<C: Checkpoint> fmt::Debug for CatchUpSubscription<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let observed = self.shared.observed.lock();
        f.debug_struct("CatchUpSubscription")
            .field("name", &self.shared.name)
            .field("target", &self.shared.target)
            .field("phase", &observed.phase)
            .field("last_processed", &observed.last_processed)
            .field("drop_reason", &observed.drop_reason)
            .finish()
    }
}
