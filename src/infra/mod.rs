//! Infrastructure adapters for account storage.

pub mod store;

pub use store::InMemoryAccountStore;
