//! Shared data structures used across the controller
//!
//! - `SecurityAlert`, `AlertKind`, `Severity`: alert sink payloads
//! - `SystemStatus`: security manager lifecycle/health state

mod alert;
mod status;

pub use alert::*;
pub use status::*;
