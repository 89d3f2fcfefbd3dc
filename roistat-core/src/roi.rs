//! ROI data structures.
//!
//! An ROI is a named, colored shape. Shapes are plain geometry in pixel
//! coordinates `(x, y)` where `x` is the column and `y` is the row of the
//! frame. The name is the identity key used by the cache and the scheduler.

use std::fmt;
use std::str::FromStr;

use crate::color::Color;
use crate::error::GeometryError;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Region of interest definition.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Roi {
    pub name: String,
    pub color: Color,
    pub shape: RoiShape,
}

impl Roi {
    /// Creates an ROI with the default color.
    pub fn new(name: impl Into<String>, shape: RoiShape) -> Self {
        Self {
            name: name.into(),
            color: Color::default(),
            shape,
        }
    }

    /// Sets the display color.
    #[must_use]
    pub fn with_color(mut self, color: Color) -> Self {
        self.color = color;
        self
    }

    /// Shape kind tag.
    #[must_use]
    pub fn kind(&self) -> RoiKind {
        self.shape.kind()
    }
}

/// ROI shape variants.
///
/// Ellipse orientation is in degrees, arc angles are in radians measured
/// from the +x axis towards +y.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", rename_all = "snake_case"))]
pub enum RoiShape {
    Point {
        x: f64,
        y: f64,
    },
    Cross {
        x: f64,
        y: f64,
    },
    Line {
        start: (f64, f64),
        end: (f64, f64),
    },
    HorizontalLine {
        y: f64,
    },
    VerticalLine {
        x: f64,
    },
    Rectangle {
        origin: (f64, f64),
        size: (f64, f64),
    },
    Circle {
        center: (f64, f64),
        radius: f64,
    },
    Ellipse {
        center: (f64, f64),
        major_radius: f64,
        minor_radius: f64,
        orientation: f64,
    },
    Polygon {
        vertices: Vec<(f64, f64)>,
    },
    Arc {
        center: (f64, f64),
        inner_radius: f64,
        outer_radius: f64,
        start_angle: f64,
        end_angle: f64,
    },
}

impl RoiShape {
    /// Shape kind tag.
    #[must_use]
    pub fn kind(&self) -> RoiKind {
        match self {
            RoiShape::Point { .. } => RoiKind::Point,
            RoiShape::Cross { .. } => RoiKind::Cross,
            RoiShape::Line { .. } => RoiKind::Line,
            RoiShape::HorizontalLine { .. } => RoiKind::HorizontalLine,
            RoiShape::VerticalLine { .. } => RoiKind::VerticalLine,
            RoiShape::Rectangle { .. } => RoiKind::Rectangle,
            RoiShape::Circle { .. } => RoiKind::Circle,
            RoiShape::Ellipse { .. } => RoiKind::Ellipse,
            RoiShape::Polygon { .. } => RoiKind::Polygon,
            RoiShape::Arc { .. } => RoiKind::Arc,
        }
    }

    /// Check frame-independent geometry constraints.
    ///
    /// # Errors
    /// Returns the first constraint the shape violates.
    pub fn validate(&self) -> Result<(), GeometryError> {
        match self {
            RoiShape::Point { x, y } | RoiShape::Cross { x, y } => finite(&[*x, *y]),
            RoiShape::Line { start, end } => finite(&[start.0, start.1, end.0, end.1]),
            RoiShape::HorizontalLine { y } => finite(&[*y]),
            RoiShape::VerticalLine { x } => finite(&[*x]),
            RoiShape::Rectangle { origin, size } => {
                finite(&[origin.0, origin.1, size.0, size.1])?;
                if size.0 <= 0.0 || size.1 <= 0.0 {
                    return Err(GeometryError::NonPositiveSize {
                        width: size.0,
                        height: size.1,
                    });
                }
                Ok(())
            }
            RoiShape::Circle { center, radius } => {
                finite(&[center.0, center.1, *radius])?;
                positive_radius(*radius)
            }
            RoiShape::Ellipse {
                center,
                major_radius,
                minor_radius,
                orientation,
            } => {
                finite(&[center.0, center.1, *major_radius, *minor_radius, *orientation])?;
                positive_radius(*major_radius)?;
                positive_radius(*minor_radius)
            }
            RoiShape::Polygon { vertices } => {
                if vertices.len() < 3 {
                    return Err(GeometryError::TooFewPoints(vertices.len()));
                }
                if vertices.iter().any(|(x, y)| !x.is_finite() || !y.is_finite()) {
                    return Err(GeometryError::NonFinite);
                }
                Ok(())
            }
            RoiShape::Arc {
                center,
                inner_radius,
                outer_radius,
                start_angle,
                end_angle,
            } => {
                finite(&[
                    center.0,
                    center.1,
                    *inner_radius,
                    *outer_radius,
                    *start_angle,
                    *end_angle,
                ])?;
                if *inner_radius < 0.0 || *outer_radius <= 0.0 || inner_radius > outer_radius {
                    return Err(GeometryError::InvalidRadii {
                        inner: *inner_radius,
                        outer: *outer_radius,
                    });
                }
                Ok(())
            }
        }
    }

    /// Axis-aligned bounds `(min_x, max_x, min_y, max_y)` of an area shape.
    ///
    /// Returns `None` for point and line kinds, which are sampled directly.
    #[must_use]
    pub fn area_bounds(&self) -> Option<(f64, f64, f64, f64)> {
        match self {
            RoiShape::Rectangle { origin, size } => {
                Some((origin.0, origin.0 + size.0, origin.1, origin.1 + size.1))
            }
            RoiShape::Circle { center, radius } => Some((
                center.0 - radius,
                center.0 + radius,
                center.1 - radius,
                center.1 + radius,
            )),
            RoiShape::Ellipse {
                center,
                major_radius,
                minor_radius,
                ..
            } => {
                let r = major_radius.max(*minor_radius);
                Some((center.0 - r, center.0 + r, center.1 - r, center.1 + r))
            }
            RoiShape::Arc {
                center,
                outer_radius,
                ..
            } => Some((
                center.0 - outer_radius,
                center.0 + outer_radius,
                center.1 - outer_radius,
                center.1 + outer_radius,
            )),
            RoiShape::Polygon { vertices } => {
                let mut min_x = f64::INFINITY;
                let mut max_x = f64::NEG_INFINITY;
                let mut min_y = f64::INFINITY;
                let mut max_y = f64::NEG_INFINITY;
                for (x, y) in vertices {
                    min_x = min_x.min(*x);
                    max_x = max_x.max(*x);
                    min_y = min_y.min(*y);
                    max_y = max_y.max(*y);
                }
                if !min_x.is_finite() || !min_y.is_finite() {
                    None
                } else {
                    Some((min_x, max_x, min_y, max_y))
                }
            }
            _ => None,
        }
    }
}

fn finite(values: &[f64]) -> Result<(), GeometryError> {
    if values.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(GeometryError::NonFinite)
    }
}

fn positive_radius(radius: f64) -> Result<(), GeometryError> {
    if radius > 0.0 {
        Ok(())
    } else {
        Err(GeometryError::NonPositiveRadius(radius))
    }
}

/// Shape kind tag, as stored in ROI files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum RoiKind {
    Point,
    Cross,
    Line,
    HorizontalLine,
    VerticalLine,
    Rectangle,
    Circle,
    Ellipse,
    Polygon,
    Arc,
}

impl RoiKind {
    /// Every kind, in tag order.
    pub const ALL: [RoiKind; 10] = [
        RoiKind::Point,
        RoiKind::Cross,
        RoiKind::Line,
        RoiKind::HorizontalLine,
        RoiKind::VerticalLine,
        RoiKind::Rectangle,
        RoiKind::Circle,
        RoiKind::Ellipse,
        RoiKind::Polygon,
        RoiKind::Arc,
    ];

    /// Class tag written to ROI files.
    #[must_use]
    pub fn tag(self) -> &'static str {
        match self {
            RoiKind::Point => "PointROI",
            RoiKind::Cross => "CrossROI",
            RoiKind::Line => "LineROI",
            RoiKind::HorizontalLine => "HorizontalLineROI",
            RoiKind::VerticalLine => "VerticalLineROI",
            RoiKind::Rectangle => "RectangleROI",
            RoiKind::Circle => "CircleROI",
            RoiKind::Ellipse => "EllipseROI",
            RoiKind::Polygon => "PolygonROI",
            RoiKind::Arc => "ArcROI",
        }
    }
}

impl fmt::Display for RoiKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for RoiKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RoiKind::ALL
            .into_iter()
            .find(|kind| kind.tag() == s)
            .ok_or_else(|| format!("unknown ROI class: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tags_roundtrip() {
        for kind in RoiKind::ALL {
            assert_eq!(kind.tag().parse::<RoiKind>().unwrap(), kind);
        }
        assert!("HorizontalRangeROI".parse::<RoiKind>().is_err());
    }

    #[test]
    fn test_validate_rejects_degenerate_shapes() {
        let circle = RoiShape::Circle {
            center: (5.0, 5.0),
            radius: 0.0,
        };
        assert_eq!(
            circle.validate(),
            Err(GeometryError::NonPositiveRadius(0.0))
        );

        let polygon = RoiShape::Polygon {
            vertices: vec![(0.0, 0.0), (1.0, 1.0)],
        };
        assert_eq!(polygon.validate(), Err(GeometryError::TooFewPoints(2)));

        let point = RoiShape::Point {
            x: f64::NAN,
            y: 0.0,
        };
        assert_eq!(point.validate(), Err(GeometryError::NonFinite));

        let arc = RoiShape::Arc {
            center: (0.0, 0.0),
            inner_radius: 4.0,
            outer_radius: 2.0,
            start_angle: 0.0,
            end_angle: 1.0,
        };
        assert!(matches!(
            arc.validate(),
            Err(GeometryError::InvalidRadii { .. })
        ));
    }

    #[test]
    fn test_polygon_bounds() {
        let shape = RoiShape::Polygon {
            vertices: vec![(1.0, 2.0), (6.0, 3.0), (4.0, 8.0)],
        };
        assert_eq!(shape.area_bounds(), Some((1.0, 6.0, 2.0, 8.0)));
        assert_eq!(RoiShape::VerticalLine { x: 3.0 }.area_bounds(), None);
    }

    #[test]
    fn test_roi_builder() {
        let roi = Roi::new("ROI 1", RoiShape::HorizontalLine { y: 4.0 })
            .with_color(Color::palette(2));
        assert_eq!(roi.kind(), RoiKind::HorizontalLine);
        assert_eq!(roi.color, Color::palette(2));
    }
}
