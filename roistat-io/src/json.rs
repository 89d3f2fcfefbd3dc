//! ROI definition files in JSON.
//!
//! The file holds a single object with a `rois` array of [`RoiRecord`]s.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use roistat_core::Roi;
use serde::{Deserialize, Serialize};

use crate::record::RoiRecord;
use crate::Result;

#[derive(Debug, Default, Serialize, Deserialize)]
struct RoiFile {
    #[serde(default)]
    rois: Vec<RoiRecord>,
}

/// Encodes ROIs as a pretty-printed JSON document.
///
/// # Errors
/// Returns an error if serialization fails.
pub fn rois_to_json(rois: &[Roi]) -> Result<String> {
    let file = RoiFile {
        rois: rois.iter().map(RoiRecord::from).collect(),
    };
    Ok(serde_json::to_string_pretty(&file)?)
}

/// Decodes ROIs from a JSON document.
///
/// # Errors
/// Returns an error on malformed JSON or the first invalid record.
pub fn rois_from_json(text: &str) -> Result<Vec<Roi>> {
    let file: RoiFile = serde_json::from_str(text)?;
    file.rois.iter().map(Roi::try_from).collect()
}

/// Writes ROIs to a JSON file, replacing any existing file.
///
/// # Errors
/// Returns an error if the file cannot be written.
pub fn save_rois_json<P: AsRef<Path>>(path: P, rois: &[Roi]) -> Result<()> {
    let path = path.as_ref();
    let file = RoiFile {
        rois: rois.iter().map(RoiRecord::from).collect(),
    };
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, &file)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    log::info!("Saved {} ROIs to {}", rois.len(), path.display());
    Ok(())
}

/// Reads ROIs from a JSON file.
///
/// # Errors
/// Returns an error if the file cannot be read, is not valid JSON, or
/// contains an invalid record.
pub fn load_rois_json<P: AsRef<Path>>(path: P) -> Result<Vec<Roi>> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);
    let file: RoiFile = serde_json::from_reader(reader)?;
    let rois = file
        .rois
        .iter()
        .map(Roi::try_from)
        .collect::<Result<Vec<_>>>()?;
    log::info!("Loaded {} ROIs from {}", rois.len(), path.display());
    Ok(rois)
}
