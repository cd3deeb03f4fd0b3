//! Queue store implementations.
//!
//! This module contains concrete implementations of the `QueueStore` trait.

pub mod memory;

pub use memory::InMemoryQueueStore;
