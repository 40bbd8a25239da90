//! Event predicates for filtered subscriptions.

use crate::types::{Checkpoint, ResolvedEvent};
use serde::{Deserialize, Serialize};

/// Predicate applied to every scanned event of a filtered subscription.
///
/// Predicates look at the record positioned in the log, so a link event is
/// matched on its own stream and type rather than on its target's.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "on", rename_all = "snake_case")]
pub enum EventFilter {
    /// Match events whose stream id starts with any of the prefixes.
    StreamPrefix { prefixes: Vec<String> },
    /// Match events whose type starts with any of the prefixes.
    EventTypePrefix { prefixes: Vec<String> },
    /// Match everything except system events (types starting with `$`).
    ExcludeSystemEvents,
}

impl EventFilter {
    pub fn stream_prefix<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        EventFilter::StreamPrefix {
            prefixes: prefixes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn event_type_prefix<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        EventFilter::EventTypePrefix {
            prefixes: prefixes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn exclude_system_events() -> Self {
        EventFilter::ExcludeSystemEvents
    }

    /// Check a scanned event against the predicate.
    pub fn is_match<C: Checkpoint>(&self, event: &ResolvedEvent<C>) -> bool {
        let original = event.original_event();
        match self {
            EventFilter::StreamPrefix { prefixes } => prefixes
                .iter()
                .any(|prefix| original.stream_id.starts_with(prefix.as_str())),
            EventFilter::EventTypePrefix { prefixes } => prefixes
                .iter()
                .any(|prefix| original.event_type.starts_with(prefix.as_str())),
            EventFilter::ExcludeSystemEvents => !original.is_system(),
        }
    }

    /// Reject filters that can never match anything.
    pub(crate) fn validate(&self) -> Result<(), String> {
        match self {
            EventFilter::StreamPrefix { prefixes } | EventFilter::EventTypePrefix { prefixes }
                if prefixes.is_empty() =>
            {
                Err("filter needs at least one prefix".to_string())
            }
            _ => Ok(()),
        }
    }
}
