//! # Chronicle catch-up subscriptions
//!
//! Reliable, ordered delivery of every event after a checkpoint, bridging
//! paged history reads and a live push feed without gaps or duplicates.
//!
//! ## Core Concepts
//!
//! - **Checkpoints**: Totally ordered resume tokens ([`StreamRevision`] for a
//!   stream, [`Position`] for the whole log)
//! - **Event sources**: Paged reads plus a live feed ([`EventSource`])
//! - **Catch-up subscriptions**: History first, then live ([`CatchUpSubscription`])
//! - **Filtering**: Server-style predicates with periodic checkpoints ([`EventFilter`])
//! - **Reconnection**: Resubscribe after lost connections ([`ReconnectingSubscription`])
//!
//! ## Example
//!
//! ```ignore
//! use chronicle_catchup::{
//!     CatchUpSubscription, EventData, InMemoryEventLog, StartFrom, SubscriptionSettings,
//! };
//!
//! let log = Arc::new(InMemoryEventLog::new());
//! log.append("orders", vec![EventData::json("OrderPlaced", &json!({"id": 1}))?])?;
//!
//! let subscription = CatchUpSubscription::start(
//!     log.stream("orders"),
//!     StartFrom::Beginning,
//!     SubscriptionSettings::default().with_name("order-projection"),
//!     projector,
//! )?;
//! ```

pub mod error;
pub mod filter;
pub mod memory;
pub mod reconnect;
pub mod settings;
pub mod source;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use error::{HandlerError, Result, SubscriptionError};
pub use filter::EventFilter;
pub use memory::{AllSource, InMemoryEventLog, StreamSource, ALL_STREAM};
pub use reconnect::{ReconnectSettings, ReconnectingSubscription};
pub use settings::{SubscriptionSettings, MAX_READ_BATCH_SIZE};
pub use source::{
    EventSource, LiveHandle, LiveSubscription, ReadRequest, Slice, SubscribeRequest,
};
pub use subscriptions::{
    CatchUpSubscription, DropReason, LiveSink, Phase, SubscriptionHandler,
};
pub use types::*;
