//! Task snapshot storage for TaskPilot.
//!
//! This crate provides a trait-based store interface with an in-memory and a
//! JSON-file implementation.

#![warn(missing_docs)]

pub mod trait_;
pub mod memory;
pub mod json_storage;

pub use trait_::{TaskStore, StorageError, Result};
pub use memory::InMemoryTaskStore;
pub use json_storage::JsonTaskStore;
