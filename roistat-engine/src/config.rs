//! Engine configuration.

use std::num::NonZeroUsize;
use std::time::Duration;

use roistat_core::ResolveOptions;

use crate::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Configuration for the compute scheduler.
///
/// Intervals are stored in milliseconds so the configuration reads naturally
/// from JSON; the `*_timeout` and `*_poll` accessors return [`Duration`]s.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct EngineConfig {
    /// Frames submitted per bulk chunk.
    pub chunk_size: usize,
    /// Worker pool size. `None` uses the available parallelism.
    pub worker_threads: Option<usize>,
    /// Wait on the priority channel while bulk work is pending (ms).
    pub priority_poll_ms: u64,
    /// Wait on the priority channel when there is no work at all (ms).
    pub bulk_poll_ms: u64,
    /// Wait between iterations while paused (ms).
    pub idle_backoff_ms: u64,
    /// Upper bound on waiting for one chunk's tasks (ms).
    pub chunk_timeout_ms: u64,
    /// Upper bound on draining outstanding tasks in `stop` (ms).
    pub shutdown_timeout_ms: u64,
    /// Shape resolution options.
    pub resolve: ResolveOptions,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: 100,
            worker_threads: None,
            priority_poll_ms: 10,
            bulk_poll_ms: 100,
            idle_backoff_ms: 50,
            chunk_timeout_ms: 1000,
            shutdown_timeout_ms: 1000,
            resolve: ResolveOptions::default(),
        }
    }
}

impl EngineConfig {
    /// Set the number of frames per bulk chunk.
    ///
    /// Values less than 1 are clamped to 1. Use [`Self::try_with_chunk_size`]
    /// to surface invalid values as an error instead.
    #[must_use]
    pub fn with_chunk_size(mut self, frames: usize) -> Self {
        self.chunk_size = frames.max(1);
        self
    }

    /// Set the worker pool size.
    ///
    /// Values less than 1 are clamped to 1. Use
    /// [`Self::try_with_worker_threads`] to surface invalid values as an
    /// error instead.
    #[must_use]
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = Some(threads.max(1));
        self
    }

    /// Set the bounded chunk wait.
    #[must_use]
    pub fn with_chunk_timeout(mut self, timeout: Duration) -> Self {
        self.chunk_timeout_ms = duration_ms(timeout);
        self
    }

    /// Set the bounded shutdown drain.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout_ms = duration_ms(timeout);
        self
    }

    /// Set the priority channel poll interval.
    #[must_use]
    pub fn with_priority_poll(mut self, interval: Duration) -> Self {
        self.priority_poll_ms = duration_ms(interval);
        self
    }

    /// Set the resolve options used for every job.
    #[must_use]
    pub fn with_resolve_options(mut self, options: ResolveOptions) -> Self {
        self.resolve = options;
        self
    }

    /// Fallible variant of [`Self::with_chunk_size`].
    ///
    /// # Errors
    /// Returns an error if `frames` is 0.
    pub fn try_with_chunk_size(mut self, frames: usize) -> Result<Self> {
        if frames == 0 {
            return Err(Error::InvalidConfig(
                "chunk_size must be at least 1".to_string(),
            ));
        }
        self.chunk_size = frames;
        Ok(self)
    }

    /// Fallible variant of [`Self::with_worker_threads`].
    ///
    /// # Errors
    /// Returns an error if `threads` is 0.
    pub fn try_with_worker_threads(mut self, threads: usize) -> Result<Self> {
        if threads == 0 {
            return Err(Error::InvalidConfig(
                "worker_threads must be at least 1".to_string(),
            ));
        }
        self.worker_threads = Some(threads);
        Ok(self)
    }

    /// Check values that may have come from a deserialized file.
    ///
    /// # Errors
    /// Returns an error naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::InvalidConfig(
                "chunk_size must be at least 1".to_string(),
            ));
        }
        if self.worker_threads == Some(0) {
            return Err(Error::InvalidConfig(
                "worker_threads must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Return the configured chunk size, clamped to at least 1.
    #[must_use]
    pub fn effective_chunk_size(&self) -> usize {
        self.chunk_size.max(1)
    }

    /// Return the worker pool size, falling back to the available
    /// parallelism.
    #[must_use]
    pub fn effective_worker_threads(&self) -> usize {
        self.worker_threads
            .unwrap_or_else(|| {
                std::thread::available_parallelism().map_or(1, NonZeroUsize::get)
            })
            .max(1)
    }

    /// Priority channel poll interval.
    #[must_use]
    pub fn priority_poll(&self) -> Duration {
        Duration::from_millis(self.priority_poll_ms)
    }

    /// Idle wait when both channels are empty.
    #[must_use]
    pub fn bulk_poll(&self) -> Duration {
        Duration::from_millis(self.bulk_poll_ms)
    }

    /// Wait between iterations while paused.
    #[must_use]
    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }

    /// Bounded chunk wait.
    #[must_use]
    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_millis(self.chunk_timeout_ms)
    }

    /// Bounded shutdown drain.
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
