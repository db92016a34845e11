//! Shared storage integration tests.
//!
//! Tests the EventStore interface against all implementations. Each
//! implementation's test binary imports these functions and runs them.

pub mod event_store_tests;
