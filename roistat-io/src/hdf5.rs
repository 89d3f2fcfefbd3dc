//! HDF5 persistence: embedded ROI metadata, live-capture export and
//! file-backed frame stacks.
//!
//! Layout written by this module:
//!
//! ```text
//! /roi_metadata            attrs: embed_enabled (bool), roi_count (i64)
//!     ROI_<i>/             attrs: class, name, color; one f64 dataset per parameter
//! /live_data               attrs: frame_count (i64)
//!     ROI_<i>/             attrs: name, color; datasets: mean (f32), timestamp (f64)
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use hdf5::types::{H5Type, VarLenUnicode};
use hdf5::{File, Group};
use ndarray::{s, ArrayView1, ArrayView2};
use roistat_core::{Dataset, Error as CoreError, Frame, LiveRecord, Roi};

use crate::record::{Param, RoiRecord};
use crate::{Error, Result};

/// Group holding embedded ROI definitions.
pub const ROI_GROUP: &str = "roi_metadata";
/// Attribute flagging whether embedding is enabled for the file.
pub const EMBED_FLAG: &str = "embed_enabled";
/// Group holding exported live-capture timeseries.
pub const LIVE_GROUP: &str = "live_data";

const ROI_COUNT: &str = "roi_count";
const FRAME_COUNT: &str = "frame_count";

fn roi_key(index: usize) -> String {
    format!("ROI_{index}")
}

/// Embeds ROI definitions into an existing HDF5 file.
///
/// Any previously embedded ROIs are replaced.
///
/// # Errors
/// Returns an error if the file cannot be opened for writing or HDF5 I/O fails.
pub fn save_rois_hdf5<P: AsRef<Path>>(path: P, rois: &[Roi], embed_enabled: bool) -> Result<()> {
    let path = path.as_ref();
    let file = File::open_rw(path)?;
    write_roi_group(&file, rois, embed_enabled)?;
    file.flush()?;
    log::info!("Embedded {} ROIs in {}", rois.len(), path.display());
    Ok(())
}

fn write_roi_group(file: &File, rois: &[Roi], embed_enabled: bool) -> Result<()> {
    if file.link_exists(ROI_GROUP) {
        file.unlink(ROI_GROUP)?;
    }
    let group = file.create_group(ROI_GROUP)?;
    group
        .new_attr::<bool>()
        .create(EMBED_FLAG)?
        .write_scalar(&embed_enabled)?;
    write_count_attr(&group, ROI_COUNT, rois.len())?;

    for (index, roi) in rois.iter().enumerate() {
        let record = RoiRecord::from(roi);
        let sub = group.create_group(&roi_key(index))?;
        set_attr_str_group(&sub, "class", &record.class)?;
        set_attr_str_group(&sub, "name", &record.name)?;
        if let Some(color) = &record.color {
            set_attr_str_group(&sub, "color", color)?;
        }
        for (key, param) in &record.params {
            write_param(&sub, key, param)?;
        }
    }
    Ok(())
}

fn write_param(group: &Group, name: &str, param: &Param) -> Result<()> {
    match param {
        Param::Scalar(value) => write_vec(group, name, &[*value]),
        Param::Vector(values) => write_vec(group, name, values),
        Param::Matrix(rows) => {
            let cols = rows.first().map_or(0, Vec::len);
            if rows.iter().any(|row| row.len() != cols) {
                return Err(Error::InvalidFormat(format!(
                    "ragged matrix parameter '{name}'"
                )));
            }
            let flat: Vec<f64> = rows.iter().flatten().copied().collect();
            let view = ArrayView2::from_shape((rows.len(), cols), &flat)
                .map_err(|e| Error::InvalidFormat(format!("parameter '{name}': {e}")))?;
            group
                .new_dataset::<f64>()
                .shape((rows.len(), cols))
                .create(name)?
                .write(view)?;
            Ok(())
        }
    }
}

fn write_vec<T: H5Type>(group: &Group, name: &str, values: &[T]) -> Result<()> {
    group
        .new_dataset::<T>()
        .shape((values.len(),))
        .create(name)?
        .write(ArrayView1::from(values))?;
    Ok(())
}

fn write_count_attr(group: &Group, name: &str, count: usize) -> Result<()> {
    let count = i64::try_from(count)
        .map_err(|_| Error::InvalidFormat(format!("{name} overflows i64")))?;
    group.new_attr::<i64>().create(name)?.write_scalar(&count)?;
    Ok(())
}

/// Loads ROI definitions embedded in an HDF5 file.
///
/// Returns `None` if the file has no ROI group, otherwise the ROIs and the
/// embed flag. Records that are missing or cannot be parsed are skipped with
/// a warning.
///
/// # Errors
/// Returns an error if the file cannot be opened or the group attributes
/// cannot be read.
pub fn load_rois_hdf5<P: AsRef<Path>>(path: P) -> Result<Option<(Vec<Roi>, bool)>> {
    let file = File::open(path)?;
    if !file.link_exists(ROI_GROUP) {
        return Ok(None);
    }
    let group = file.group(ROI_GROUP)?;
    let embed_enabled = read_attr_opt::<bool>(&group, EMBED_FLAG)?.unwrap_or(false);
    let count = read_attr_opt::<i64>(&group, ROI_COUNT)?.unwrap_or(0);
    let count = usize::try_from(count).unwrap_or(0);

    let mut rois = Vec::with_capacity(count);
    for index in 0..count {
        let key = roi_key(index);
        if !group.link_exists(&key) {
            log::warn!("ROI record {key} listed but missing");
            continue;
        }
        match read_roi(&group.group(&key)?) {
            Ok(roi) => rois.push(roi),
            Err(e) => log::warn!("Skipping ROI record {key}: {e}"),
        }
    }
    Ok(Some((rois, embed_enabled)))
}

fn read_roi(group: &Group) -> Result<Roi> {
    let class = read_attr_opt_string(group, "class")?
        .ok_or_else(|| Error::InvalidFormat("record has no class".to_string()))?;
    let name = read_attr_opt_string(group, "name")?.unwrap_or_default();
    let color = read_attr_opt_string(group, "color")?;

    let mut params = BTreeMap::new();
    for member in group.member_names()? {
        if let Ok(values) = read_dataset_vec::<f64>(group, &member) {
            params.insert(member, Param::Vector(values));
        }
    }
    Roi::try_from(RoiRecord {
        class,
        name,
        color,
        params,
    })
}

/// Whether the file carries an embedded ROI group.
#[must_use]
pub fn hdf5_has_rois<P: AsRef<Path>>(path: P) -> bool {
    File::open(path).is_ok_and(|file| file.link_exists(ROI_GROUP))
}

/// Whether the file can be opened for writing.
#[must_use]
pub fn hdf5_is_writable<P: AsRef<Path>>(path: P) -> bool {
    File::open_rw(path).is_ok()
}

/// Writes live-capture timeseries to a new HDF5 file.
///
/// ROI geometry is embedded alongside when `rois` is given.
///
/// # Errors
/// Returns an error if the file cannot be created or HDF5 I/O fails.
pub fn export_live_hdf5<P: AsRef<Path>>(
    path: P,
    records: &[LiveRecord],
    rois: Option<&[Roi]>,
) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path)?;

    let live = file.create_group(LIVE_GROUP)?;
    let frame_count = records.iter().map(LiveRecord::len).max().unwrap_or(0);
    write_count_attr(&live, FRAME_COUNT, frame_count)?;

    for (index, record) in records.iter().enumerate() {
        if record.values.len() != record.timestamps.len() {
            return Err(Error::InvalidFormat(format!(
                "live record '{}' has {} values but {} timestamps",
                record.name,
                record.values.len(),
                record.timestamps.len()
            )));
        }
        let sub = live.create_group(&roi_key(index))?;
        set_attr_str_group(&sub, "name", &record.name)?;
        set_attr_str_group(&sub, "color", &record.color.to_hex())?;
        write_vec(&sub, "mean", &record.values)?;
        write_vec(&sub, "timestamp", &record.timestamps)?;
    }

    if let Some(rois) = rois {
        write_roi_group(&file, rois, true)?;
    }
    file.flush()?;
    log::info!(
        "Exported live data for {} ROIs ({frame_count} frames) to {}",
        records.len(),
        path.display()
    );
    Ok(())
}

/// Reads live-capture timeseries written by [`export_live_hdf5`].
///
/// # Errors
/// Returns an error if the file or the live group cannot be read.
pub fn load_live_hdf5<P: AsRef<Path>>(path: P) -> Result<Vec<LiveRecord>> {
    let file = File::open(path)?;
    let live = file.group(LIVE_GROUP)?;
    let mut keys: Vec<(usize, String)> = live
        .member_names()?
        .into_iter()
        .filter_map(|key| {
            let index = key.strip_prefix("ROI_")?.parse().ok()?;
            Some((index, key))
        })
        .collect();
    keys.sort_unstable();

    keys.into_iter()
        .map(|(_, key)| {
            let sub = live.group(&key)?;
            let color = match read_attr_opt_string(&sub, "color")? {
                Some(hex) => hex
                    .parse()
                    .map_err(|e| Error::InvalidFormat(format!("{key}: {e}")))?,
                None => roistat_core::Color::default(),
            };
            Ok(LiveRecord {
                name: read_attr_opt_string(&sub, "name")?.unwrap_or_default(),
                color,
                values: read_dataset_vec::<f32>(&sub, "mean")?,
                timestamps: read_dataset_vec::<f64>(&sub, "timestamp")?,
            })
        })
        .collect()
}

/// Lists 2-D and 3-D datasets in a file as `(path, shape)` pairs.
///
/// # Errors
/// Returns an error if the file cannot be opened.
pub fn find_image_stacks<P: AsRef<Path>>(path: P) -> Result<Vec<(String, Vec<usize>)>> {
    let file = File::open(path)?;
    let mut found = Vec::new();
    collect_stacks(&file, "", &mut found)?;
    Ok(found)
}

fn collect_stacks(group: &Group, prefix: &str, found: &mut Vec<(String, Vec<usize>)>) -> Result<()> {
    for member in group.member_names()? {
        let full = format!("{prefix}/{member}");
        if let Ok(dataset) = group.dataset(&member) {
            let shape = dataset.shape();
            if matches!(shape.len(), 2 | 3) {
                found.push((full, shape));
            }
        } else if let Ok(sub) = group.group(&member) {
            collect_stacks(&sub, &full, found)?;
        }
    }
    Ok(())
}

/// Frame stack backed by a 2-D or 3-D dataset in an HDF5 file.
///
/// The shape is read from the file on every access, so a dataset that is
/// extended by a writer is picked up through
/// `RoiStatistics::sync_dataset_length`.
pub struct Hdf5Stack {
    path: PathBuf,
    name: String,
    dataset: hdf5::Dataset,
    _file: File,
}

impl Hdf5Stack {
    /// Opens `dataset_path` inside `path`.
    ///
    /// # Errors
    /// Returns an error if the file or dataset cannot be opened, or the
    /// dataset is not 2-D or 3-D.
    pub fn open<P: AsRef<Path>>(path: P, dataset_path: &str) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let dataset = file.dataset(dataset_path)?;
        let ndim = dataset.ndim();
        if !matches!(ndim, 2 | 3) {
            return Err(Error::InvalidFormat(format!(
                "{dataset_path} is {ndim}-D; expected a 2-D image or 3-D stack"
            )));
        }
        log::info!(
            "Opened {}:{dataset_path} with shape {:?}",
            path.display(),
            dataset.shape()
        );
        Ok(Self {
            path: path.to_path_buf(),
            name: dataset_path.to_string(),
            dataset,
            _file: file,
        })
    }

    /// File the stack was opened from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Dataset path inside the file.
    #[must_use]
    pub fn dataset_path(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for Hdf5Stack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hdf5Stack")
            .field("path", &self.path)
            .field("dataset", &self.name)
            .finish_non_exhaustive()
    }
}

impl Dataset for Hdf5Stack {
    fn shape(&self) -> Vec<usize> {
        self.dataset.shape()
    }

    fn frame(&self, index: usize) -> roistat_core::Result<Arc<Frame>> {
        let total = self.total_frames();
        if index >= total {
            return Err(CoreError::FrameOutOfRange { index, total });
        }
        let read = if self.dataset.ndim() == 3 {
            self.dataset.read_slice_2d::<f32, _>(s![index, .., ..])
        } else {
            self.dataset.read_2d::<f32>()
        };
        read.map(Arc::new).map_err(|e| {
            CoreError::InvalidFrame(format!("{}[{index}]: {e}", self.name))
        })
    }
}

fn set_attr_str_group(group: &Group, name: &str, value: &str) -> Result<()> {
    let value = to_var_len_unicode(value)?;
    group
        .new_attr::<VarLenUnicode>()
        .create(name)?
        .write_scalar(&value)?;
    Ok(())
}

fn read_dataset_vec<T: H5Type>(group: &Group, name: &str) -> Result<Vec<T>> {
    let dataset = group.dataset(name)?;
    Ok(dataset.read_raw::<T>()?)
}

fn read_attr_opt<T: H5Type + Clone>(group: &Group, name: &str) -> Result<Option<T>> {
    match group.attr(name) {
        Ok(attr) => Ok(Some(attr.read_scalar::<T>()?)),
        Err(_) => Ok(None),
    }
}

fn read_attr_opt_string(group: &Group, name: &str) -> Result<Option<String>> {
    match group.attr(name) {
        Ok(attr) => {
            let value: VarLenUnicode = attr.read_scalar()?;
            Ok(Some(value.to_string()))
        }
        Err(_) => Ok(None),
    }
}

fn to_var_len_unicode(value: &str) -> Result<VarLenUnicode> {
    VarLenUnicode::from_str(value)
        .map_err(|e| Error::InvalidFormat(format!("invalid utf-8 attribute: {e}")))
}
