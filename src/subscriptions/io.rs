//! The I/O thread: runs blocking source calls for one subscription.
//!
//! The worker never calls the source's `read_page` or `subscribe` itself.
//! It queues an [`IoRequest`] and keeps serving its inbox (stop requests,
//! live drops) while the call is in flight; the result comes back as a
//! [`Command`].

use super::live::LiveSink;
use super::reconciler::{panic_message, Command};
use crate::error::SubscriptionError;
use crate::source::{EventSource, ReadRequest, SubscribeRequest};
use crate::types::Checkpoint;
use crossbeam_channel::{Receiver, SendError, Sender};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{trace, warn};

pub(crate) enum IoRequest<C> {
    Read {
        request: ReadRequest<C>,
        /// Wait this long before reading.
        delay: Option<Duration>,
    },
    Subscribe {
        request: SubscribeRequest,
        sink: LiveSink<C>,
    },
}

/// Serve requests until the worker hangs up.
pub(crate) fn run<C: Checkpoint>(
    source: Arc<dyn EventSource<C>>,
    requests: Receiver<IoRequest<C>>,
    completions: Sender<Command<C>>,
) {
    for request in requests.iter() {
        match request {
            IoRequest::Read { request, delay } => {
                if let Some(delay) = delay {
                    thread::sleep(delay);
                }
                trace!(after = ?request.after, max_count = request.max_count, "reading page");
                let result = guarded(|| source.read_page(&request));
                if completions.send(Command::PageRead(result)).is_err() {
                    break;
                }
            }
            IoRequest::Subscribe { request, sink } => {
                let result = guarded(|| source.subscribe(&request, sink));
                if let Err(SendError(command)) = completions.send(Command::LiveOpened(result)) {
                    // Nobody is left to release the feed.
                    if let Command::LiveOpened(Ok(live)) = command {
                        warn!(handle = live.handle.0, "subscription gone before its live feed opened");
                        source.unsubscribe(live.handle);
                    }
                    break;
                }
            }
        }
    }
    trace!("I/O thread finished");
}

fn guarded<T>(call: impl FnOnce() -> crate::error::Result<T>) -> crate::error::Result<T> {
    panic::catch_unwind(AssertUnwindSafe(call)).unwrap_or_else(|payload| {
        Err(SubscriptionError::Server(format!(
            "event source panicked: {}",
            panic_message(payload.as_ref())
        )))
    })
}
