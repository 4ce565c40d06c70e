//! Versioned read model storage abstractions.

pub mod versioned_store;

pub use versioned_store::{InMemoryVersionedStore, ReadStoreError, VersionedReadStore};
