//! Disposable read-model storage.

pub mod state_store;

pub use state_store::{InMemoryStateStore, StateStore};
