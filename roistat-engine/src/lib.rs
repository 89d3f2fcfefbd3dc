//! roistat-engine: Concurrent ROI statistics over time-series image stacks.
//!
//! This crate provides the moving parts behind the statistics facade:
//! - **Cache** - per-ROI, per-frame means plus append-only live logs
//! - **Scheduler** - priority (current frame) and bulk (backfill) jobs on a
//!   rayon worker pool
//! - **Events** - typed result, progress and error notifications
//! - **Facade** - [`RoiStatistics`], the boundary object UI code talks to
//!
#![warn(missing_docs)]

pub mod cache;
mod config;
mod error;
pub mod event;
mod scheduler;
mod stats;

pub use cache::{RoiSummary, StatCache};
pub use config::EngineConfig;
pub use error::{Error, Result};
pub use event::{EngineEvent, EventBus};
pub use scheduler::ComputeEngine;
pub use stats::{Mode, RoiStatistics};

// Re-export the core model used in the public API
pub use roistat_core::{Color, Dataset, DatasetHandle, Frame, LiveRecord, Roi, RoiShape};
