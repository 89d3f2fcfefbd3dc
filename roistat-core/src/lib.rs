//! roistat-core: ROI model, frame datasets and mask resolution.
//!
//! This crate provides the foundational types shared by the statistics
//! engine and the persistence layer: ROI shapes, the dataset provider
//! trait, and the resolver that turns a shape into a per-frame mean.
//!

pub mod color;
pub mod dataset;
pub mod error;
pub mod live;
pub mod mask;
pub mod roi;

pub use color::{Color, ParseColorError};
pub use dataset::{Dataset, DatasetHandle, Frame, InMemoryStack, SingleImage};
pub use error::{Error, GeometryError, Result};
pub use live::{epoch_seconds, LiveRecord};
pub use mask::{
    bresenham_line, build_mask, compute_statistic, compute_statistic_with, point_in_polygon,
    ResolveOptions, SamplingPlan,
};
pub use roi::{Roi, RoiKind, RoiShape};
