//! # Queue Session
//!
//! Transactional consumer sessions for a message-queue broker.
//!
//! This library provides:
//! - Reliable retrieval through open / confirm / abort transactions
//! - Redelivery of every open item when a client disconnects
//! - A per-queue, per-session cap on open transactions
//! - Deadline-bounded long-poll fetching
//!
//! The queue storage engine is a collaborator behind the [`QueueStore`]
//! trait; [`InMemoryQueueStore`] is a complete in-process implementation.
//!
//! ## Module Organization
//!
//! - [`error`] - Error types
//! - [`item`] - Items and transaction ids
//! - [`store`] - Queue store interface
//! - [`stores`] - Queue store implementations
//! - [`pending`] - Per-session open-transaction registry
//! - [`session`] - Per-connection session operations
//! - [`fetch`] - Continuous (long-poll) fetch
//! - [`stats`] - Process-wide counters
//! - [`lifecycle`] - Process shutdown hook
//! - [`config`] - Configuration loading
//! - [`logging`] - Tracing subscriber setup
//!
//! ## Example
//!
//! ```rust
//! use queue_session::{
//!     InMemoryQueueStore, QueueStore, Session, SessionConfig, SessionStats, ShutdownNotifier,
//! };
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let store: Arc<dyn QueueStore> = Arc::new(InMemoryQueueStore::default());
//! let session = Session::new(
//!     store,
//!     Arc::new(SessionStats::new()),
//!     Arc::new(ShutdownNotifier::new()),
//!     SessionConfig::default(),
//!     "127.0.0.1:52100",
//! );
//!
//! session.set_item("jobs", 0, None, "payload".into()).await;
//! let item = session.get_item("jobs", None, true, false).await?.unwrap();
//! assert_eq!(session.pending_count("jobs"), 1);
//!
//! assert!(session.close_transaction("jobs").await);
//! assert_eq!(item.data, "payload");
//! session.finish().await;
//! # Ok::<(), queue_session::SessionError>(())
//! # }).unwrap();
//! ```

// Module declarations
pub mod config;
pub mod error;
pub mod fetch;
pub mod item;
pub mod lifecycle;
pub mod logging;
pub mod pending;
pub mod session;
pub mod stats;
pub mod store;
pub mod stores;

// Re-export commonly used types at crate root for convenience
pub use config::{BrokerConfig, LoggingConfig, SessionConfig, StoreConfig};
pub use error::{ConfigurationError, SessionError, ValidationError};
pub use fetch::ContinuousFetch;
pub use item::{Item, NewItem, Timestamp, Xid};
pub use lifecycle::{ProcessLifecycle, ShutdownNotifier};
pub use logging::init_logging;
pub use pending::{PendingTransactions, SlotReservation};
pub use session::Session;
pub use stats::{SessionStats, StatsSnapshot};
pub use store::QueueStore;
pub use stores::InMemoryQueueStore;

#[cfg(test)]
mod test_support;

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
