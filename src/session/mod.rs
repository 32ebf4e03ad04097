//! Job engine access

pub mod opencode;
pub mod provider;

pub use opencode::OpenCodeClient;
pub use provider::{EventFeed, JobEngine};
