//! Drop classification and the single-fire guard.

use super::types::{DropReason, Phase};

/// Condition that ends a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Trigger {
    Stop,
    ReadFailed,
    SubscribeFailed,
    /// The live feed reported its own reason.
    LiveDropped(DropReason),
    /// A callback failed or panicked during the given phase.
    HandlerFailed(Phase),
    /// The engine lost its own control channel.
    ChannelClosed,
}

impl Trigger {
    pub(crate) fn reason(self) -> DropReason {
        match self {
            Trigger::Stop => DropReason::UserInitiated,
            Trigger::ReadFailed => DropReason::CatchUpError,
            Trigger::SubscribeFailed => DropReason::SubscribingError,
            Trigger::LiveDropped(reason) => reason,
            Trigger::HandlerFailed(Phase::Live) => DropReason::ProcessingError,
            Trigger::HandlerFailed(_) => DropReason::CatchUpError,
            Trigger::ChannelClosed => DropReason::Unknown,
        }
    }
}

/// Makes sure a subscription is dropped once, keeping the first reason.
#[derive(Debug, Default)]
pub(crate) struct DropCoordinator {
    reason: Option<DropReason>,
}

impl DropCoordinator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_dropped(&self) -> bool {
        self.reason.is_some()
    }

    pub(crate) fn reason(&self) -> Option<DropReason> {
        self.reason
    }

    /// Claim the drop. Returns the reason to report, or `None` when the
    /// subscription was already dropped.
    pub(crate) fn claim(&mut self, trigger: Trigger) -> Option<DropReason> {
        if self.reason.is_some() {
            return None;
        }
        let reason = trigger.reason();
        self.reason = Some(reason);
        Some(reason)
    }
}
