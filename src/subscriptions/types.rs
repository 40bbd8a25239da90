//! Subscription types shared by the engine and its callers.

use super::handle::CatchUpSubscription;
use crate::error::{HandlerError, SubscriptionError};
use crate::types::{Checkpoint, ResolvedEvent};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a subscription was dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// `stop` was called.
    UserInitiated,
    /// The live feed lost its connection.
    ConnectionClosed,
    /// A historical read failed, or a callback failed before going live.
    CatchUpError,
    /// The live feed could not be opened.
    SubscribingError,
    /// The server reported an error on the live feed.
    ServerError,
    AccessDenied,
    NotAuthenticated,
    StreamDeleted,
    /// A callback failed while live.
    ProcessingError,
    Unknown,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DropReason::UserInitiated => "user_initiated",
            DropReason::ConnectionClosed => "connection_closed",
            DropReason::CatchUpError => "catch_up_error",
            DropReason::SubscribingError => "subscribing_error",
            DropReason::ServerError => "server_error",
            DropReason::AccessDenied => "access_denied",
            DropReason::NotAuthenticated => "not_authenticated",
            DropReason::StreamDeleted => "stream_deleted",
            DropReason::ProcessingError => "processing_error",
            DropReason::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Lifecycle phase of a catch-up subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Paging through history.
    Historical,
    /// Waiting for the live feed to open.
    Subscribing,
    /// Reading the history between the last page and the live start.
    ReconcilingGap,
    /// Forwarding live events.
    Live,
    Dropped,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Historical => "historical",
            Phase::Subscribing => "subscribing",
            Phase::ReconcilingGap => "reconciling_gap",
            Phase::Live => "live",
            Phase::Dropped => "dropped",
        };
        f.write_str(name)
    }
}

/// Callbacks of a catch-up subscription.
///
/// All methods run on the subscription's worker thread, one at a time and in
/// checkpoint order. Returning an error (or panicking) from `on_event` or
/// `on_checkpoint` drops the subscription.
pub trait SubscriptionHandler<C: Checkpoint>: Send + 'static {
    fn on_event(
        &mut self,
        subscription: &CatchUpSubscription<C>,
        event: &ResolvedEvent<C>,
    ) -> Result<(), HandlerError>;

    /// Filtered subscriptions only: scanning reached `checkpoint`.
    fn on_checkpoint(
        &mut self,
        _subscription: &CatchUpSubscription<C>,
        _checkpoint: C,
    ) -> Result<(), HandlerError> {
        Ok(())
    }

    /// History is caught up; everything from now on comes from the live feed.
    fn on_live_processing_started(&mut self, _subscription: &CatchUpSubscription<C>) {}

    /// Called exactly once, as the last callback of the subscription.
    fn on_dropped(
        &mut self,
        _subscription: &CatchUpSubscription<C>,
        _reason: DropReason,
        _error: Option<&SubscriptionError>,
    ) {
    }
}
