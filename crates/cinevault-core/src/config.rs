//! Configuration module
//!
//! Tuning knobs for the upload engine: part sizing, concurrency ceilings,
//! retry/backoff, finalization, and progress emission. Values can be loaded
//! from `CINEVAULT_*` environment variables or constructed directly when
//! embedding the engine.

use std::env;
use std::time::Duration;

use anyhow::{bail, Result};

use crate::planner::{MAX_PART_COUNT, MIN_PART_SIZE};

// Defaults taken from the production operating point.
const PART_SIZE: u64 = 50 * 1024 * 1024;
const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024 * 1024;
const MAX_CONCURRENT_PARTS: usize = 8;
const SESSION_CONCURRENCY: usize = 4;
const MAX_ATTEMPTS: u32 = 5;
const RETRY_BASE_DELAY_MS: u64 = 500;
const RETRY_MAX_DELAY_MS: u64 = 30_000;
const PART_TIMEOUT_SECS: u64 = 60;
const FINALIZE_ATTEMPTS: u32 = 3;
const FINALIZE_RETRY_DELAY_MS: u64 = 2_000;
const SNAPSHOT_INTERVAL_MS: u64 = 250;
const SPEED_WINDOW_SECS: u64 = 5;
const BROADCAST_CAPACITY: usize = 32;

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Upload engine configuration.
#[derive(Clone, Debug)]
pub struct UploaderConfig {
    /// Target (and minimum) part size in bytes. Clamped to the provider
    /// floor of 5 MiB; grown automatically when a file would otherwise
    /// exceed `max_part_count`.
    pub part_size: u64,
    /// Maximum number of parts per upload (provider limit is 10,000).
    pub max_part_count: u32,
    /// Largest file accepted at session creation.
    pub max_file_size: u64,
    /// Accepted content types for ingested masters. Empty = allow all.
    pub allowed_content_types: Vec<String>,
    /// Global ceiling on concurrent part uploads across all sessions.
    pub max_concurrent_parts: usize,
    /// Maximum concurrent part uploads for a single session.
    pub session_concurrency: usize,
    /// Maximum upload attempts per part, including the first.
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Upper bound on a single `upload_part` network call.
    pub part_timeout_secs: u64,
    /// Attempts for the provider `complete` call before the session fails.
    pub finalize_attempts: u32,
    pub finalize_retry_delay_ms: u64,
    /// Minimum interval between progress emissions per session, and the
    /// coordinator's wall-clock tick for refreshing speed/ETA.
    pub snapshot_interval_ms: u64,
    /// Sliding window for instantaneous speed calculation.
    pub speed_window_secs: u64,
    /// Capacity of each session's progress broadcast channel; lagging
    /// observers lose the oldest snapshots.
    pub broadcast_capacity: usize,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            part_size: PART_SIZE,
            max_part_count: MAX_PART_COUNT,
            max_file_size: MAX_FILE_SIZE,
            allowed_content_types: vec![
                "video/mp4".to_string(),
                "video/x-matroska".to_string(),
                "video/quicktime".to_string(),
            ],
            max_concurrent_parts: MAX_CONCURRENT_PARTS,
            session_concurrency: SESSION_CONCURRENCY,
            max_attempts: MAX_ATTEMPTS,
            retry_base_delay_ms: RETRY_BASE_DELAY_MS,
            retry_max_delay_ms: RETRY_MAX_DELAY_MS,
            part_timeout_secs: PART_TIMEOUT_SECS,
            finalize_attempts: FINALIZE_ATTEMPTS,
            finalize_retry_delay_ms: FINALIZE_RETRY_DELAY_MS,
            snapshot_interval_ms: SNAPSHOT_INTERVAL_MS,
            speed_window_secs: SPEED_WINDOW_SECS,
            broadcast_capacity: BROADCAST_CAPACITY,
        }
    }
}

impl UploaderConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let allowed_content_types = env::var("CINEVAULT_ALLOWED_CONTENT_TYPES")
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or(defaults.allowed_content_types);

        let config = Self {
            part_size: env_parse("CINEVAULT_PART_SIZE", defaults.part_size),
            max_part_count: env_parse("CINEVAULT_MAX_PART_COUNT", defaults.max_part_count),
            max_file_size: env_parse("CINEVAULT_MAX_FILE_SIZE", defaults.max_file_size),
            allowed_content_types,
            max_concurrent_parts: env_parse(
                "CINEVAULT_MAX_CONCURRENT_PARTS",
                defaults.max_concurrent_parts,
            ),
            session_concurrency: env_parse(
                "CINEVAULT_SESSION_CONCURRENCY",
                defaults.session_concurrency,
            ),
            max_attempts: env_parse("CINEVAULT_MAX_ATTEMPTS", defaults.max_attempts),
            retry_base_delay_ms: env_parse(
                "CINEVAULT_RETRY_BASE_DELAY_MS",
                defaults.retry_base_delay_ms,
            ),
            retry_max_delay_ms: env_parse(
                "CINEVAULT_RETRY_MAX_DELAY_MS",
                defaults.retry_max_delay_ms,
            ),
            part_timeout_secs: env_parse("CINEVAULT_PART_TIMEOUT_SECS", defaults.part_timeout_secs),
            finalize_attempts: env_parse("CINEVAULT_FINALIZE_ATTEMPTS", defaults.finalize_attempts),
            finalize_retry_delay_ms: env_parse(
                "CINEVAULT_FINALIZE_RETRY_DELAY_MS",
                defaults.finalize_retry_delay_ms,
            ),
            snapshot_interval_ms: env_parse(
                "CINEVAULT_SNAPSHOT_INTERVAL_MS",
                defaults.snapshot_interval_ms,
            ),
            speed_window_secs: env_parse("CINEVAULT_SPEED_WINDOW_SECS", defaults.speed_window_secs),
            broadcast_capacity: env_parse(
                "CINEVAULT_BROADCAST_CAPACITY",
                defaults.broadcast_capacity,
            ),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_part_count == 0 || self.max_part_count > MAX_PART_COUNT {
            bail!(
                "max_part_count must be in 1..={}, got {}",
                MAX_PART_COUNT,
                self.max_part_count
            );
        }
        if self.max_file_size == 0 {
            bail!("max_file_size must be greater than zero");
        }
        if self.max_concurrent_parts == 0 || self.session_concurrency == 0 {
            bail!("concurrency limits must be greater than zero");
        }
        if self.session_concurrency > self.max_concurrent_parts {
            bail!(
                "session_concurrency ({}) cannot exceed max_concurrent_parts ({})",
                self.session_concurrency,
                self.max_concurrent_parts
            );
        }
        if self.max_attempts == 0 || self.finalize_attempts == 0 {
            bail!("attempt limits must be greater than zero");
        }
        if self.snapshot_interval_ms == 0 {
            bail!("snapshot_interval_ms must be greater than zero");
        }
        if self.broadcast_capacity == 0 {
            bail!("broadcast_capacity must be greater than zero");
        }
        Ok(())
    }

    /// Part size with the provider floor applied.
    pub fn effective_part_size(&self) -> u64 {
        self.part_size.max(MIN_PART_SIZE)
    }

    pub fn content_type_allowed(&self, content_type: &str) -> bool {
        self.allowed_content_types.is_empty()
            || self
                .allowed_content_types
                .iter()
                .any(|t| t.eq_ignore_ascii_case(content_type))
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }

    pub fn part_timeout(&self) -> Duration {
        Duration::from_secs(self.part_timeout_secs)
    }

    pub fn finalize_retry_delay(&self) -> Duration {
        Duration::from_millis(self.finalize_retry_delay_ms)
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_millis(self.snapshot_interval_ms)
    }

    pub fn speed_window(&self) -> Duration {
        Duration::from_secs(self.speed_window_secs)
    }
}
