//! Error types for roistat-engine.

use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while configuring or driving the engine.
#[derive(Error, Debug)]
pub enum Error {
    /// Error from the core crate (dataset access, frames).
    #[error(transparent)]
    Core(#[from] roistat_core::Error),

    /// Invalid engine configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The worker pool could not be created.
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// The dispatch thread could not be spawned.
    #[error("failed to spawn dispatch thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// The engine has been stopped and no longer accepts work.
    #[error("engine is stopped")]
    Stopped,
}
