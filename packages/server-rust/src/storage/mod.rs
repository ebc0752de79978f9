//! Persistence collaborator for the interceptor.
//!
//! - [`StorageEngine`]: low-level row storage keyed by record type and primary key
//! - [`engines`]: in-memory engine implementations
//! - [`ModelStore`]: the save path that emits pre-write and post-write events

pub mod engine;
pub mod engines;
pub mod model_store;

pub use engine::{Row, StorageEngine};
pub use engines::HashMapStorage;
pub use model_store::ModelStore;
