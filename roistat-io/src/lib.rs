//! roistat-io: ROI files and HDF5 persistence.
//!
//! This crate provides:
//! - [`RoiRecord`], the dictionary form of an ROI shared by all formats
//! - JSON ROI definition files
//! - HDF5 ROI embedding, live-capture export and the file-backed
//!   [`Hdf5Stack`] dataset (feature `hdf5`)

mod error;
#[cfg(feature = "hdf5")]
pub mod hdf5;
mod json;
pub mod record;

pub use error::{Error, Result};
pub use json::{load_rois_json, rois_from_json, rois_to_json, save_rois_json};
pub use record::{Param, RoiRecord};

#[cfg(feature = "hdf5")]
pub use crate::hdf5::{
    export_live_hdf5, find_image_stacks, hdf5_has_rois, hdf5_is_writable, load_live_hdf5,
    load_rois_hdf5, save_rois_hdf5, Hdf5Stack,
};
