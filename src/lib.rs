//! Offline resilience layer for the skill tree client.
//!
//! The crate keeps the application usable while connectivity comes and goes:
//! - `cache`: a two-partition response cache stored in SQLite
//! - `interceptor`: per-request caching strategies (network-first for API data,
//!   cache-first for static assets) with a versioned cache generation lifecycle
//! - `queue`: a persisted mutation queue that replays writes once back online
//! - `monitor`: edge-triggered connectivity tracking
//! - `sync`: glue that replays the queue on reconnect and reports the outcome

pub mod cache;
pub mod client;
pub mod config;
pub mod http;
pub mod interceptor;
pub mod logging;
pub mod monitor;
pub mod queue;
pub mod store;
pub mod sync;

#[cfg(test)]
pub(crate) mod testutil;

pub use client::{OfflineClient, SendOutcome};
pub use config::Config;
pub use interceptor::FetchInterceptor;
pub use monitor::{ConnectivityState, NetworkMonitor};
pub use queue::{MutationQueue, QueuedRequest, SyncResult};
pub use store::Store;
pub use sync::{SyncNotice, SyncOrchestrator};
