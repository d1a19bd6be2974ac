//! Controller Configuration Module
//!
//! Provides the controller configuration loaded from TOML, covering the
//! monitor roster, secret roster, recovery providers and alert channels.
//!
//! ## Loading Order
//!
//! 1. `WARDEN_CONFIG` environment variable (path to TOML file)
//! 2. `warden.toml` in the current working directory
//! 3. Built-in defaults
//!
//! ## Usage
//!
//! Call `config::init()` once at startup, then `config::get()` anywhere:
//!
//! ```ignore
//! config::init(WardenConfig::load());
//! let interval = config::get().monitor.interval();
//! ```

mod warden_config;
pub mod defaults;

pub use warden_config::*;

use std::sync::OnceLock;

/// Global controller configuration, initialized once at startup.
static WARDEN_CONFIG: OnceLock<WardenConfig> = OnceLock::new();

/// Initialize the global configuration.
///
/// A second call is ignored with a warning.
pub fn init(config: WardenConfig) {
    if WARDEN_CONFIG.set(config).is_err() {
        tracing::warn!("config::init() called more than once, ignoring");
    }
}

/// Get a reference to the global configuration, if initialized.
pub fn get() -> Option<&'static WardenConfig> {
    WARDEN_CONFIG.get()
}

/// Check whether the config has been initialized.
pub fn is_initialized() -> bool {
    WARDEN_CONFIG.get().is_some()
}
