//! Connection lifecycle management
//!
//! State machine, exponential reconnect and the offline queues that hold
//! requests while the connection is down.

pub mod backoff;
pub mod manager;
pub mod offline_queue;
pub mod state;

pub use backoff::Backoff;
pub(crate) use manager::ConnectionObserver;
pub use manager::ConnectionManager;
pub use offline_queue::OfflineQueue;
pub use state::ConnectionState;
