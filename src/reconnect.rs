//! Automatic resubscription after a lost connection.
//!
//! A [`ReconnectingSubscription`] wraps a chain of [`CatchUpSubscription`]s
//! sharing one handler. When the live feed drops with
//! [`DropReason::ConnectionClosed`], a fresh subscription is started after a
//! linear backoff, resuming after the last processed checkpoint. Other drop
//! reasons, and running out of attempts, end the chain and reach the
//! handler's `on_dropped` exactly once.

use crate::error::{HandlerError, Result, SubscriptionError};
use crate::settings::SubscriptionSettings;
use crate::source::EventSource;
use crate::subscriptions::{CatchUpSubscription, DropReason, SubscriptionHandler};
use crate::types::{Checkpoint, ResolvedEvent, StartFrom};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const DEFAULT_MAX_RECONNECTS: u32 = 5;
const DEFAULT_BASE_BACKOFF_MS: u64 = 200;
const DEFAULT_MAX_BACKOFF_MS: u64 = 5_000;

/// Retry policy for lost connections.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSettings {
    /// Consecutive attempts before giving up. Reset once a subscription
    /// goes live again.
    pub max_reconnects: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            max_reconnects: DEFAULT_MAX_RECONNECTS,
            base_backoff_ms: DEFAULT_BASE_BACKOFF_MS,
            max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
        }
    }
}

impl ReconnectSettings {
    /// Zero values fall back to the defaults.
    pub fn new(max_reconnects: u32, base_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            max_reconnects,
            base_backoff_ms,
            max_backoff_ms,
        }
        .normalized()
    }

    fn normalized(self) -> Self {
        Self {
            max_reconnects: if self.max_reconnects == 0 {
                DEFAULT_MAX_RECONNECTS
            } else {
                self.max_reconnects
            },
            base_backoff_ms: if self.base_backoff_ms == 0 {
                DEFAULT_BASE_BACKOFF_MS
            } else {
                self.base_backoff_ms
            },
            max_backoff_ms: if self.max_backoff_ms == 0 {
                DEFAULT_MAX_BACKOFF_MS
            } else {
                self.max_backoff_ms
            },
        }
    }

    /// Linear backoff before attempt `attempt` (zero-based), capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let ms = self
            .base_backoff_ms
            .saturating_mul(u64::from(attempt) + 1)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

struct ChainState<C: Checkpoint> {
    current: Option<CatchUpSubscription<C>>,
    attempts: u32,
    stopped: bool,
    /// Thread delivering the final `on_dropped`, once chosen.
    finishing: Option<ThreadId>,
    finished: Option<DropReason>,
}

struct Chain<C: Checkpoint> {
    source: Arc<dyn EventSource<C>>,
    from: StartFrom<C>,
    settings: SubscriptionSettings,
    reconnect: ReconnectSettings,
    handler: Mutex<Box<dyn SubscriptionHandler<C>>>,
    state: Mutex<ChainState<C>>,
    changed: Condvar,
}

impl<C: Checkpoint> Chain<C> {
    fn dropped(
        self: &Arc<Self>,
        subscription: &CatchUpSubscription<C>,
        reason: DropReason,
        error: Option<&SubscriptionError>,
    ) {
        let attempt = {
            let mut state = self.state.lock();
            if state.stopped
                || reason != DropReason::ConnectionClosed
                || state.attempts >= self.reconnect.max_reconnects
            {
                None
            } else {
                state.attempts += 1;
                Some(state.attempts)
            }
        };
        let Some(attempt) = attempt else {
            self.finish(subscription, reason, error);
            return;
        };

        let delay = self.reconnect.backoff(attempt - 1);
        let resume = subscription
            .last_processed_checkpoint()
            .map_or(self.from, StartFrom::Checkpoint);
        warn!(
            subscription = %subscription.name(),
            attempt,
            max_reconnects = self.reconnect.max_reconnects,
            delay_ms = delay.as_millis() as u64,
            error = ?error.map(|e| e.to_string()),
            "connection lost, resubscribing"
        );

        let chain = Arc::clone(self);
        let previous = subscription.clone();
        let spawned = thread::Builder::new()
            .name(format!("{}-reconnect", subscription.name()))
            .spawn(move || chain.resubscribe(previous, resume, delay));
        if let Err(e) = spawned {
            let error = SubscriptionError::Io(e);
            self.finish(subscription, reason, Some(&error));
        }
    }

    fn resubscribe(
        self: Arc<Self>,
        previous: CatchUpSubscription<C>,
        resume: StartFrom<C>,
        delay: Duration,
    ) {
        let deadline = Instant::now() + delay;
        {
            let mut state = self.state.lock();
            while !state.stopped {
                if self.changed.wait_until(&mut state, deadline).timed_out() {
                    break;
                }
            }
            if state.stopped {
                drop(state);
                self.finish(&previous, DropReason::UserInitiated, None);
                return;
            }
        }

        let relay = Relay {
            chain: Arc::clone(&self),
        };
        match CatchUpSubscription::start(
            Arc::clone(&self.source),
            resume,
            self.settings.clone(),
            relay,
        ) {
            Ok(next) => {
                debug!(subscription = %next.name(), ?resume, "resubscribed");
                let stopped = {
                    let mut state = self.state.lock();
                    state.current = Some(next.clone());
                    state.stopped
                };
                if stopped {
                    next.request_stop();
                }
            }
            Err(error) => self.finish(&previous, DropReason::SubscribingError, Some(&error)),
        }
    }

    /// Deliver the final drop to the user handler, once.
    fn finish(
        &self,
        subscription: &CatchUpSubscription<C>,
        reason: DropReason,
        error: Option<&SubscriptionError>,
    ) {
        {
            let mut state = self.state.lock();
            if state.finishing.is_some() {
                return;
            }
            state.finishing = Some(thread::current().id());
        }
        debug!(subscription = %subscription.name(), %reason, "subscription chain ended");

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.handler.lock().on_dropped(subscription, reason, error)
        }));
        if outcome.is_err() {
            warn!(subscription = %subscription.name(), "on_dropped panicked");
        }

        self.state.lock().finished = Some(reason);
        self.changed.notify_all();
    }
}

/// Handler installed on every subscription of a chain.
struct Relay<C: Checkpoint> {
    chain: Arc<Chain<C>>,
}

impl<C: Checkpoint> SubscriptionHandler<C> for Relay<C> {
    fn on_event(
        &mut self,
        subscription: &CatchUpSubscription<C>,
        event: &ResolvedEvent<C>,
    ) -> std::result::Result<(), HandlerError> {
        self.chain.handler.lock().on_event(subscription, event)
    }

    fn on_checkpoint(
        &mut self,
        subscription: &CatchUpSubscription<C>,
        checkpoint: C,
    ) -> std::result::Result<(), HandlerError> {
        self.chain.handler.lock().on_checkpoint(subscription, checkpoint)
    }

    fn on_live_processing_started(&mut self, subscription: &CatchUpSubscription<C>) {
        self.chain.state.lock().attempts = 0;
        self.chain
            .handler
            .lock()
            .on_live_processing_started(subscription);
    }

    fn on_dropped(
        &mut self,
        subscription: &CatchUpSubscription<C>,
        reason: DropReason,
        error: Option<&SubscriptionError>,
    ) {
        self.chain.dropped(subscription, reason, error);
    }
}

/// A catch-up subscription that resubscribes after lost connections.
pub struct ReconnectingSubscription<C: Checkpoint> {
    chain: Arc<Chain<C>>,
}

impl<C: Checkpoint> Clone for ReconnectingSubscription<C> {
    fn clone(&self) -> Self {
        Self {
            chain: Arc::clone(&self.chain),
        }
    }
}

impl<C: Checkpoint> ReconnectingSubscription<C> {
    pub fn start<H>(
        source: Arc<dyn EventSource<C>>,
        from: StartFrom<C>,
        settings: SubscriptionSettings,
        reconnect: ReconnectSettings,
        handler: H,
    ) -> Result<Self>
    where
        H: SubscriptionHandler<C>,
    {
        let chain = Arc::new(Chain {
            source: Arc::clone(&source),
            from,
            settings: settings.clone(),
            reconnect: reconnect.normalized(),
            handler: Mutex::new(Box::new(handler) as Box<dyn SubscriptionHandler<C>>),
            state: Mutex::new(ChainState {
                current: None,
                attempts: 0,
                stopped: false,
                finishing: None,
                finished: None,
            }),
            changed: Condvar::new(),
        });

        let relay = Relay {
            chain: Arc::clone(&chain),
        };
        let first = CatchUpSubscription::start(source, from, settings, relay)?;
        chain.state.lock().current.get_or_insert(first);
        Ok(Self { chain })
    }

    /// The subscription currently in the chain.
    pub fn current(&self) -> Option<CatchUpSubscription<C>> {
        self.chain.state.lock().current.clone()
    }

    pub fn last_processed_checkpoint(&self) -> Option<C> {
        self.current()
            .and_then(|subscription| subscription.last_processed_checkpoint())
    }

    /// Attempts made since the chain was last live.
    pub fn reconnect_attempts(&self) -> u32 {
        self.chain.state.lock().attempts
    }

    /// Final drop reason, once the chain has ended.
    pub fn drop_reason(&self) -> Option<DropReason> {
        self.chain.state.lock().finished
    }

    /// Wait until the chain ends for any reason.
    pub fn wait_finished(&self, timeout: Duration) -> Option<DropReason> {
        let deadline = Instant::now() + timeout;
        let mut state = self.chain.state.lock();
        while state.finished.is_none() {
            if self.chain.changed.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        state.finished
    }

    /// Stop the chain and wait for the final `on_dropped`.
    pub fn stop(&self, timeout: Duration) -> Result<()> {
        let current = {
            let mut state = self.chain.state.lock();
            state.stopped = true;
            if state.finishing == Some(thread::current().id()) {
                return Ok(());
            }
            state.current.clone()
        };
        self.chain.changed.notify_all();

        let name = match &current {
            Some(subscription) => {
                subscription.request_stop();
                if subscription.on_worker_thread() {
                    return Ok(());
                }
                subscription.name().to_string()
            }
            None => self.chain.settings.subscription_name.clone(),
        };

        let deadline = Instant::now() + timeout;
        let mut state = self.chain.state.lock();
        while state.finished.is_none() {
            if self.chain.changed.wait_until(&mut state, deadline).timed_out()
                && state.finished.is_none()
            {
                return Err(SubscriptionError::StopTimeout(name));
            }
        }
        Ok(())
    }
}
