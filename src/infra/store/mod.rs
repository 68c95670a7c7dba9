//! Account store backends.

pub mod memory;

pub use memory::InMemoryAccountStore;
