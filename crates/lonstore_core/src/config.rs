//! Store configuration.

use crate::header::PERSISTENCE_VERSION;
use std::time::Duration;

/// Configuration for a [`crate::PersistenceStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Minimum delay after the first dirty mark before a commit pass runs.
    pub guard_band: Duration,

    /// Pause between per-segment stores within one commit pass.
    pub commit_yield: Duration,

    /// Identity of the firmware build; stored in every header.
    pub application_signature: u32,

    /// Newest header version this reader accepts.
    pub max_supported_version: u16,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            guard_band: Duration::from_millis(1000),
            commit_yield: Duration::from_millis(20),
            application_signature: 0,
            max_supported_version: PERSISTENCE_VERSION,
        }
    }
}

impl StoreConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the guard band.
    #[must_use]
    pub const fn guard_band(mut self, value: Duration) -> Self {
        self.guard_band = value;
        self
    }

    /// Sets the guard band in milliseconds.
    #[must_use]
    pub const fn guard_band_millis(mut self, millis: u64) -> Self {
        self.guard_band = Duration::from_millis(millis);
        self
    }

    /// Sets the pause between per-segment stores.
    #[must_use]
    pub const fn commit_yield(mut self, value: Duration) -> Self {
        self.commit_yield = value;
        self
    }

    /// Sets the application signature.
    #[must_use]
    pub const fn application_signature(mut self, value: u32) -> Self {
        self.application_signature = value;
        self
    }

    /// Sets the newest accepted header version.
    #[must_use]
    pub const fn max_supported_version(mut self, value: u16) -> Self {
        self.max_supported_version = value;
        self
    }
}
