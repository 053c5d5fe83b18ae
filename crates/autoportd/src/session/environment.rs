//! Daemon-owned environment overlay for device settings.

use std::collections::HashMap;
use std::env;

/// Values recorded with `set_env`, layered over the process environment.
///
/// The overlay never mutates the process environment, so overrides stay
/// confined to the daemon's session and vanish with it.
#[derive(Debug, Clone, Default)]
pub struct DeviceEnvironment {
    overrides: HashMap<String, String>,
}

impl DeviceEnvironment {
    /// Records an override.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.overrides.insert(key.into(), value.into());
    }

    /// Looks `key` up in the overlay, then in the process environment.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        self.overrides
            .get(key)
            .cloned()
            .or_else(|| env::var(key).ok())
    }
}
