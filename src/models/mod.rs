//! Domain model module declarations.

pub mod document;
pub mod event;
pub mod session;
pub mod stage;
