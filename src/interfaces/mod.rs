//! Abstract interfaces for bus collaborators.
//!
//! These traits define the contracts for:
//! - Event storage (the durable tail of events)
//! - Notification primitive (wakeups naming channels)
//! - Session validation (authorization at delivery time)
//! - Client connections (the transport a batch is pushed through)

pub mod connection;
pub mod event_store;
pub mod notifier;
pub mod session;

pub use connection::{Connection, ConnectionId, SendError};
pub use event_store::{EventStore, StorageError};
pub use notifier::{NotificationStream, Notifier, NotifyError};
pub use session::{SessionInfo, SessionInvalid, SessionValidator};
