//! Catch-up subscriptions.
//!
//! A catch-up subscription delivers every event of a stream (or of the whole
//! log) after a starting checkpoint, in order and exactly once: first by
//! paging through history, then by switching to a live push feed. Events
//! that arrive on the live feed while history is still being read are
//! buffered and deduplicated against what the historical path delivered.
//!
//! # Example
//!
//! ```ignore
//! let log = Arc::new(InMemoryEventLog::new());
//!
//! struct Projector;
//! impl SubscriptionHandler<StreamRevision> for Projector {
//!     fn on_event(
//!         &mut self,
//!         _subscription: &CatchUpSubscription<StreamRevision>,
//!         event: &ResolvedEvent<StreamRevision>,
//!     ) -> Result<(), HandlerError> {
//!         println!("{} {}", event.checkpoint, event.event.event_type);
//!         Ok(())
//!     }
//! }
//!
//! let subscription = CatchUpSubscription::start(
//!     log.stream("orders"),
//!     StartFrom::Beginning,
//!     SubscriptionSettings::default(),
//!     Projector,
//! )?;
//!
//! // ...
//! subscription.stop(Duration::from_secs(5))?;
//! ```

mod coordinator;
mod filtered;
mod handle;
mod io;
mod live;
mod reader;
mod reconciler;
mod types;

pub use handle::CatchUpSubscription;
pub use live::LiveSink;
pub use types::{DropReason, Phase, SubscriptionHandler};
