//! Error types for roistat-core.

use thiserror::Error;

/// Result type alias for roistat operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for roistat operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or degenerate ROI geometry.
    #[error("geometry error: {0}")]
    Geometry(#[from] GeometryError),

    /// Frame index outside the dataset at query time.
    #[error("frame {index} out of range (dataset has {total} frames)")]
    FrameOutOfRange { index: usize, total: usize },

    /// No dataset is attached.
    #[error("no dataset available")]
    DatasetUnavailable,

    /// Frame data could not be read or has the wrong layout.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// A worker failed while computing a statistic.
    #[error("computation failed for ROI '{roi}': {message}")]
    Computation { roi: String, message: String },
}

/// Reasons an ROI shape cannot be resolved against a frame.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    /// A coordinate or parameter is NaN or infinite.
    #[error("non-finite geometry parameter")]
    NonFinite,

    /// Rectangle with zero or negative extent.
    #[error("rectangle size must be positive, got {width}x{height}")]
    NonPositiveSize { width: f64, height: f64 },

    /// Circle or ellipse with zero or negative radius.
    #[error("radius must be positive, got {0}")]
    NonPositiveRadius(f64),

    /// Arc with inverted or negative radii.
    #[error("invalid arc radii: inner {inner}, outer {outer}")]
    InvalidRadii { inner: f64, outer: f64 },

    /// Polygon with fewer than three vertices.
    #[error("polygon needs at least 3 points, got {0}")]
    TooFewPoints(usize),

    /// Sampled position lies outside the frame.
    #[error("position ({x}, {y}) outside {width}x{height} frame")]
    OutOfBounds {
        x: f64,
        y: f64,
        width: usize,
        height: usize,
    },
}
