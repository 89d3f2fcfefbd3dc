//! Dictionary form of an ROI, shared by the JSON and HDF5 formats.
//!
//! A record carries a `class` tag such as `"RectangleROI"`, the ROI name, a
//! `#rrggbb` color and named numeric parameters:
//!
//! | class | parameters |
//! |---|---|
//! | `PointROI`, `CrossROI` | `position [x, y]` |
//! | `LineROI` | `start [x, y]`, `end [x, y]` |
//! | `HorizontalLineROI`, `VerticalLineROI` | `position [v]` |
//! | `RectangleROI` | `origin [x, y]`, `size [w, h]` |
//! | `CircleROI` | `center [x, y]`, `radius [r]` |
//! | `EllipseROI` | `center`, `major_radius`, `minor_radius`, `orientation` (degrees) |
//! | `PolygonROI` | `points [[x, y], ...]` |
//! | `ArcROI` | `center`, `inner_radius`, `outer_radius`, `start_angle`, `end_angle` (radians) |

use std::collections::BTreeMap;

use roistat_core::{Roi, RoiKind, RoiShape};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A numeric record parameter.
///
/// Single values are written as one-element vectors; readers accept any of
/// the three forms and flatten them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Param {
    Scalar(f64),
    Vector(Vec<f64>),
    Matrix(Vec<Vec<f64>>),
}

impl Param {
    /// All values in row-major order.
    #[must_use]
    pub fn flatten(&self) -> Vec<f64> {
        match self {
            Param::Scalar(v) => vec![*v],
            Param::Vector(values) => values.clone(),
            Param::Matrix(rows) => rows.iter().flatten().copied().collect(),
        }
    }
}

/// Serializable dictionary form of an [`Roi`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoiRecord {
    pub class: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(flatten)]
    pub params: BTreeMap<String, Param>,
}

impl RoiRecord {
    /// Flattened values of a parameter.
    ///
    /// # Errors
    /// Returns [`Error::InvalidFormat`] if the parameter is missing.
    pub fn values(&self, key: &str) -> Result<Vec<f64>> {
        self.params
            .get(key)
            .map(Param::flatten)
            .ok_or_else(|| self.invalid(&format!("missing '{key}'")))
    }

    fn scalar(&self, key: &str) -> Result<f64> {
        self.values(key)?
            .first()
            .copied()
            .ok_or_else(|| self.invalid(&format!("'{key}' is empty")))
    }

    fn pair(&self, key: &str) -> Result<(f64, f64)> {
        match self.values(key)?.as_slice() {
            [x, y, ..] => Ok((*x, *y)),
            _ => Err(self.invalid(&format!("'{key}' needs two values"))),
        }
    }

    fn points(&self, key: &str) -> Result<Vec<(f64, f64)>> {
        let values = self.values(key)?;
        if values.len() % 2 != 0 {
            return Err(self.invalid(&format!("'{key}' has an odd number of coordinates")));
        }
        Ok(values.chunks_exact(2).map(|p| (p[0], p[1])).collect())
    }

    fn invalid(&self, message: &str) -> Error {
        Error::InvalidFormat(format!("{} record '{}': {message}", self.class, self.name))
    }
}

fn vector(values: &[f64]) -> Param {
    Param::Vector(values.to_vec())
}

impl From<&Roi> for RoiRecord {
    fn from(roi: &Roi) -> Self {
        let mut params = BTreeMap::new();
        let mut put = |key: &str, param: Param| {
            params.insert(key.to_string(), param);
        };
        match &roi.shape {
            RoiShape::Point { x, y } | RoiShape::Cross { x, y } => put("position", vector(&[*x, *y])),
            RoiShape::Line { start, end } => {
                put("start", vector(&[start.0, start.1]));
                put("end", vector(&[end.0, end.1]));
            }
            RoiShape::HorizontalLine { y } => put("position", vector(&[*y])),
            RoiShape::VerticalLine { x } => put("position", vector(&[*x])),
            RoiShape::Rectangle { origin, size } => {
                put("origin", vector(&[origin.0, origin.1]));
                put("size", vector(&[size.0, size.1]));
            }
            RoiShape::Circle { center, radius } => {
                put("center", vector(&[center.0, center.1]));
                put("radius", vector(&[*radius]));
            }
            RoiShape::Ellipse {
                center,
                major_radius,
                minor_radius,
                orientation,
            } => {
                put("center", vector(&[center.0, center.1]));
                put("major_radius", vector(&[*major_radius]));
                put("minor_radius", vector(&[*minor_radius]));
                put("orientation", vector(&[*orientation]));
            }
            RoiShape::Polygon { vertices } => {
                put(
                    "points",
                    Param::Matrix(vertices.iter().map(|&(x, y)| vec![x, y]).collect()),
                );
            }
            RoiShape::Arc {
                center,
                inner_radius,
                outer_radius,
                start_angle,
                end_angle,
            } => {
                put("center", vector(&[center.0, center.1]));
                put("inner_radius", vector(&[*inner_radius]));
                put("outer_radius", vector(&[*outer_radius]));
                put("start_angle", vector(&[*start_angle]));
                put("end_angle", vector(&[*end_angle]));
            }
        }
        Self {
            class: roi.kind().tag().to_string(),
            name: roi.name.clone(),
            color: Some(roi.color.to_hex()),
            params,
        }
    }
}

impl TryFrom<&RoiRecord> for Roi {
    type Error = Error;

    fn try_from(record: &RoiRecord) -> Result<Self> {
        let kind: RoiKind = record.class.parse().map_err(Error::InvalidFormat)?;
        let shape = match kind {
            RoiKind::Point | RoiKind::Cross => {
                let (x, y) = record.pair("position")?;
                if kind == RoiKind::Point {
                    RoiShape::Point { x, y }
                } else {
                    RoiShape::Cross { x, y }
                }
            }
            RoiKind::Line => RoiShape::Line {
                start: record.pair("start")?,
                end: record.pair("end")?,
            },
            RoiKind::HorizontalLine => RoiShape::HorizontalLine {
                y: record.scalar("position")?,
            },
            RoiKind::VerticalLine => RoiShape::VerticalLine {
                x: record.scalar("position")?,
            },
            RoiKind::Rectangle => RoiShape::Rectangle {
                origin: record.pair("origin")?,
                size: record.pair("size")?,
            },
            RoiKind::Circle => RoiShape::Circle {
                center: record.pair("center")?,
                radius: record.scalar("radius")?,
            },
            RoiKind::Ellipse => RoiShape::Ellipse {
                center: record.pair("center")?,
                major_radius: record.scalar("major_radius")?,
                minor_radius: record.scalar("minor_radius")?,
                orientation: record.scalar("orientation")?,
            },
            RoiKind::Polygon => RoiShape::Polygon {
                vertices: record.points("points")?,
            },
            RoiKind::Arc => RoiShape::Arc {
                center: record.pair("center")?,
                inner_radius: record.scalar("inner_radius")?,
                outer_radius: record.scalar("outer_radius")?,
                start_angle: record.scalar("start_angle")?,
                end_angle: record.scalar("end_angle")?,
            },
        };

        let mut roi = Roi::new(record.name.clone(), shape);
        if let Some(color) = &record.color {
            roi.color = color
                .parse()
                .map_err(|e| record.invalid(&format!("{e}")))?;
        }
        Ok(roi)
    }
}

impl TryFrom<RoiRecord> for Roi {
    type Error = Error;

    fn try_from(record: RoiRecord) -> Result<Self> {
        Roi::try_from(&record)
    }
}
