//! Subscription configuration.

use crate::error::{Result, SubscriptionError};
use crate::filter::EventFilter;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Largest page a single historical read may request.
pub const MAX_READ_BATCH_SIZE: usize = 4096;

/// Settings for one catch-up subscription.
///
/// Created once at start and never mutated afterwards.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionSettings {
    /// Events requested per historical page.
    /// Default: 500
    pub read_batch_size: usize,

    /// Live events buffered while catching up before the feed is paused.
    /// Default: 10000
    pub max_live_queue_size: usize,

    /// Follow link events to their targets.
    /// Default: true
    pub resolve_link_tos: bool,

    /// Optional predicate; makes the subscription a filtered one.
    pub filter: Option<EventFilter>,

    /// Scanned events between checkpoint notifications (filtered only).
    /// Default: 32
    pub checkpoint_interval: u32,

    /// Scanned events per filtered historical page (None = read_batch_size).
    pub max_search_window: Option<usize>,

    /// Name used in diagnostics.
    pub subscription_name: String,
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self {
            read_batch_size: 500,
            max_live_queue_size: 10_000,
            resolve_link_tos: true,
            filter: None,
            checkpoint_interval: 32,
            max_search_window: None,
            subscription_name: String::new(),
        }
    }
}

impl SubscriptionSettings {
    /// Parse settings from JSON. Missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.subscription_name = name.into();
        self
    }

    pub fn with_read_batch_size(mut self, size: usize) -> Self {
        self.read_batch_size = size;
        self
    }

    pub fn with_max_live_queue_size(mut self, size: usize) -> Self {
        self.max_live_queue_size = size;
        self
    }

    pub fn with_resolve_link_tos(mut self, resolve: bool) -> Self {
        self.resolve_link_tos = resolve;
        self
    }

    pub fn with_filter(mut self, filter: EventFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_checkpoint_interval(mut self, interval: u32) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    pub fn with_max_search_window(mut self, window: usize) -> Self {
        self.max_search_window = Some(window);
        self
    }

    /// Page size for historical reads.
    pub(crate) fn page_size(&self) -> usize {
        match (&self.filter, self.max_search_window) {
            (Some(_), Some(window)) => window,
            _ => self.read_batch_size,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.read_batch_size == 0 || self.read_batch_size > MAX_READ_BATCH_SIZE {
            return Err(SubscriptionError::InvalidSettings(format!(
                "read_batch_size must be in 1..={}, got {}",
                MAX_READ_BATCH_SIZE, self.read_batch_size
            )));
        }
        if self.max_live_queue_size == 0 {
            return Err(SubscriptionError::InvalidSettings(
                "max_live_queue_size must be positive".to_string(),
            ));
        }
        if self.checkpoint_interval == 0 {
            return Err(SubscriptionError::InvalidSettings(
                "checkpoint_interval must be positive".to_string(),
            ));
        }
        if let Some(window) = self.max_search_window {
            if window == 0 || window > MAX_READ_BATCH_SIZE {
                return Err(SubscriptionError::InvalidSettings(format!(
                    "max_search_window must be in 1..={}, got {}",
                    MAX_READ_BATCH_SIZE, window
                )));
            }
        }
        if let Some(filter) = &self.filter {
            filter.validate().map_err(SubscriptionError::InvalidSettings)?;
        }
        Ok(())
    }
}
