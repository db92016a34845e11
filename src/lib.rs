//! imbus - real-time notification bus
//!
//! A process-local dispatcher that fans database-originated events out to a
//! dynamic set of long-lived client connections. Producers stage events in a
//! unit of work; on commit the events are appended to a durable tail and a
//! wakeup naming the affected channels is emitted on the backend's
//! notification primitive. The dispatcher consumes wakeups, finds the
//! connections subscribed to those channels, polls the tail past each
//! connection's cursor, validates the owning session and pushes the batch.

pub mod bus;
pub mod channel;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod event;
pub mod interfaces;
pub mod listener;
pub mod notify;
pub mod publisher;
pub mod registry;
pub mod session;
pub mod storage;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod utils;

pub use bus::{Bus, BusError};
pub use channel::{Channel, NamespacedChannel};
pub use config::{BusConfig, Config};
pub use event::{Event, NewEvent};
pub use publisher::{Publisher, UnitOfWork};
