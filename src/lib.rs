#![forbid(unsafe_code)]

//! Interactive session coordinator for a multi-stage task-specification
//! pipeline. Each stage is driven by an agent that can pause mid-computation
//! to ask the connected operator a clarifying question.

pub mod agent;
pub mod channel;
pub mod config;
pub mod errors;
pub mod models;
pub mod persistence;
pub mod pipeline;
pub mod session;
pub mod transport;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
