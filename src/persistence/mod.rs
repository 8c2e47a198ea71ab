//! Persistence layer modules.

pub mod store;

pub use store::{DocumentLease, DocumentStore};
