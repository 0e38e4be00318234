//! Runtime knobs of the observation worker.

use std::time::Duration;

use eye_capture::DEFAULT_ACQUIRE_TIMEOUT;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Wait for the next native frame.
    pub acquire_timeout: Duration,

    /// Lifetime of thumbnails in the cache.
    pub thumbnail_ttl: Duration,

    /// Lifetime of snapshots and their metadata in the cache.
    pub snapshot_ttl: Duration,

    /// Anchor size used when an align request carries none.
    pub default_alignment_pixel_size: u32,

    /// How often observation statistics are logged.
    pub stats_interval: Duration,
}

impl EngineConfig {
    pub const DEFAULT_THUMBNAIL_TTL: Duration = Duration::from_secs(30);
    pub const DEFAULT_SNAPSHOT_TTL: Duration = Duration::from_secs(2 * 60 * 60);
    pub const DEFAULT_ALIGNMENT_PIXEL_SIZE: u32 = 2;
    pub const DEFAULT_STATS_INTERVAL: Duration = Duration::from_secs(5);
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            thumbnail_ttl: Self::DEFAULT_THUMBNAIL_TTL,
            snapshot_ttl: Self::DEFAULT_SNAPSHOT_TTL,
            default_alignment_pixel_size: Self::DEFAULT_ALIGNMENT_PIXEL_SIZE,
            stats_interval: Self::DEFAULT_STATS_INTERVAL,
        }
    }
}
