//! Token rotation: secret set, value generation and the rotation manager

mod generator;
mod manager;
mod secret;

pub use generator::{generate, random_alphanumeric, random_key};
pub use manager::{RotationError, RotationRecord, RotationStatus, TokenRotationManager};
pub use secret::{Secret, SecretKind, SecretSet, BACKUP_MARKER};
