//! Geometry-to-mask resolution and per-frame mean intensity.
//!
//! Shapes are resolved once against the frame dimensions into a
//! [`SamplingPlan`], which is then applied to every frame of a job:
//!
//! - **Point / Cross** - single pixel at the rounded position
//! - **Line** - Bresenham path between the truncated endpoints, clipped to
//!   the frame
//! - **Horizontal / Vertical line** - a full row or column at the truncated
//!   position
//! - **Rectangle, Circle, Ellipse, Polygon, Arc** - boolean pixel mask
//!
//! Pixel `(row, col)` sits at coordinate `(x = col, y = row)`. Rectangles are
//! half-open `[origin, origin + size)`, circles and ellipses are closed.

use std::f64::consts::TAU;

use log::warn;
use ndarray::{Array2, ArrayView2, Zip};

use crate::error::{Error, GeometryError, Result};
use crate::roi::{Roi, RoiShape};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Options controlling how shapes are resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ResolveOptions {
    /// Restrict arc masks to the `[start_angle, end_angle]` sector.
    ///
    /// Off by default: arcs resolve to the full annulus.
    pub arc_angle_filter: bool,
}

impl ResolveOptions {
    /// Enables or disables angular filtering of arc masks.
    #[must_use]
    pub fn with_arc_angle_filter(mut self, enabled: bool) -> Self {
        self.arc_angle_filter = enabled;
        self
    }
}

/// A shape resolved against fixed frame dimensions.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingPlan {
    dims: (usize, usize),
    sampler: Sampler,
}

#[derive(Debug, Clone, PartialEq)]
enum Sampler {
    /// Nothing to sample; the statistic is 0.0.
    Empty,
    Pixel { row: usize, col: usize },
    /// In-bounds `(row, col)` pixels in rasterization order.
    Path(Vec<(usize, usize)>),
    Row(usize),
    Column(usize),
    Mask { mask: Array2<bool>, count: usize },
}

impl SamplingPlan {
    /// Resolves a shape for `(height, width)` frames.
    ///
    /// # Errors
    /// Returns a [`GeometryError`] for malformed shapes and for point, row
    /// and column positions outside the frame.
    pub fn resolve(
        shape: &RoiShape,
        dims: (usize, usize),
        options: &ResolveOptions,
    ) -> std::result::Result<Self, GeometryError> {
        shape.validate()?;
        let (height, width) = dims;
        if height == 0 || width == 0 {
            return Ok(Self::empty(dims));
        }

        let sampler = match shape {
            RoiShape::Point { x, y } | RoiShape::Cross { x, y } => {
                match (to_index(y.round(), height), to_index(x.round(), width)) {
                    (Some(row), Some(col)) => Sampler::Pixel { row, col },
                    _ => return Err(out_of_bounds(*x, *y, dims)),
                }
            }
            RoiShape::Line { start, end } => {
                let start = (truncate_coord(start.0), truncate_coord(start.1));
                let end = (truncate_coord(end.0), truncate_coord(end.1));
                match clip_segment(start, end, dims) {
                    Some(((x0, y0), (x1, y1))) => {
                        let path: Vec<(usize, usize)> = bresenham_line(x0, y0, x1, y1)
                            .into_iter()
                            .filter_map(|(x, y)| {
                                let col = usize::try_from(x).ok().filter(|&c| c < width)?;
                                let row = usize::try_from(y).ok().filter(|&r| r < height)?;
                                Some((row, col))
                            })
                            .collect();
                        if path.is_empty() {
                            Sampler::Empty
                        } else {
                            Sampler::Path(path)
                        }
                    }
                    None => Sampler::Empty,
                }
            }
            RoiShape::HorizontalLine { y } => match to_index(y.trunc(), height) {
                Some(row) => Sampler::Row(row),
                None => return Err(out_of_bounds(0.0, *y, dims)),
            },
            RoiShape::VerticalLine { x } => match to_index(x.trunc(), width) {
                Some(col) => Sampler::Column(col),
                None => return Err(out_of_bounds(*x, 0.0, dims)),
            },
            _ => match build_mask(shape, dims, options) {
                Some(mask) => {
                    let count = mask.iter().filter(|&&inside| inside).count();
                    if count == 0 {
                        Sampler::Empty
                    } else {
                        Sampler::Mask { mask, count }
                    }
                }
                None => Sampler::Empty,
            },
        };

        Ok(Self { dims, sampler })
    }

    /// A plan that samples nothing and always yields `0.0`.
    #[must_use]
    pub fn empty(dims: (usize, usize)) -> Self {
        Self {
            dims,
            sampler: Sampler::Empty,
        }
    }

    /// Frame `(height, width)` the plan was resolved for.
    #[must_use]
    pub fn dims(&self) -> (usize, usize) {
        self.dims
    }

    /// Number of pixels contributing to the statistic.
    #[must_use]
    pub fn pixel_count(&self) -> usize {
        let (height, width) = self.dims;
        match &self.sampler {
            Sampler::Empty => 0,
            Sampler::Pixel { .. } => 1,
            Sampler::Path(path) => path.len(),
            Sampler::Row(_) => width,
            Sampler::Column(_) => height,
            Sampler::Mask { count, .. } => *count,
        }
    }

    /// Mean intensity of the sampled pixels, `0.0` when nothing is sampled.
    ///
    /// # Errors
    /// Returns [`Error::InvalidFrame`] if the frame does not have the
    /// dimensions the plan was resolved for.
    #[allow(clippy::cast_possible_truncation)]
    pub fn mean(&self, frame: ArrayView2<'_, f32>) -> Result<f32> {
        if frame.dim() != self.dims {
            return Err(Error::InvalidFrame(format!(
                "plan resolved for {}x{} frames, got {}x{}",
                self.dims.0,
                self.dims.1,
                frame.nrows(),
                frame.ncols()
            )));
        }

        let mean = match &self.sampler {
            Sampler::Empty => 0.0,
            Sampler::Pixel { row, col } => f64::from(frame[[*row, *col]]),
            Sampler::Path(path) => {
                let sum: f64 = path.iter().map(|&(r, c)| f64::from(frame[[r, c]])).sum();
                sum / usize_to_f64(path.len())
            }
            Sampler::Row(row) => mean_of(frame.row(*row).iter().copied()),
            Sampler::Column(col) => mean_of(frame.column(*col).iter().copied()),
            Sampler::Mask { mask, count } => {
                let mut sum = 0.0f64;
                Zip::from(&frame).and(mask).for_each(|&value, &inside| {
                    if inside {
                        sum += f64::from(value);
                    }
                });
                sum / usize_to_f64(*count)
            }
        };
        Ok(mean as f32)
    }
}

/// Mean intensity of an ROI on one frame.
///
/// Never fails: malformed geometry, out-of-range positions and empty masks
/// all yield `0.0`, with a warning logged for the error cases.
#[must_use]
pub fn compute_statistic(roi: &Roi, frame: ArrayView2<'_, f32>) -> f32 {
    compute_statistic_with(roi, frame, &ResolveOptions::default())
}

/// [`compute_statistic`] with explicit resolve options.
#[must_use]
pub fn compute_statistic_with(
    roi: &Roi,
    frame: ArrayView2<'_, f32>,
    options: &ResolveOptions,
) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    let result = SamplingPlan::resolve(&roi.shape, frame.dim(), options)
        .map_err(Error::from)
        .and_then(|plan| plan.mean(frame));
    match result {
        Ok(value) => value,
        Err(e) => {
            warn!("ROI '{}' ({}): {e}", roi.name, roi.kind());
            0.0
        }
    }
}

/// Boolean membership mask of an area shape over a `(height, width)` frame.
///
/// Returns `None` for point and line kinds, which have no area.
#[must_use]
pub fn build_mask(
    shape: &RoiShape,
    dims: (usize, usize),
    options: &ResolveOptions,
) -> Option<Array2<bool>> {
    let (height, width) = dims;
    let (min_x, max_x, min_y, max_y) = shape.area_bounds()?;
    let mut mask = Array2::from_elem(dims, false);

    let (Some(cols), Some(rows)) = (
        index_span(min_x, max_x, width),
        index_span(min_y, max_y, height),
    ) else {
        return Some(mask);
    };

    let inside: Box<dyn Fn(f64, f64) -> bool + '_> = match shape {
        RoiShape::Rectangle { origin, size } => {
            let (x0, y0) = *origin;
            let (x1, y1) = (x0 + size.0, y0 + size.1);
            Box::new(move |x, y| x >= x0 && x < x1 && y >= y0 && y < y1)
        }
        RoiShape::Circle { center, radius } => {
            let (cx, cy) = *center;
            let r_sq = radius * radius;
            Box::new(move |x, y| (x - cx).powi(2) + (y - cy).powi(2) <= r_sq)
        }
        RoiShape::Ellipse {
            center,
            major_radius,
            minor_radius,
            orientation,
        } => {
            let (cx, cy) = *center;
            let (sin_a, cos_a) = orientation.to_radians().sin_cos();
            let (a_sq, b_sq) = (major_radius.powi(2), minor_radius.powi(2));
            Box::new(move |x, y| {
                let (dx, dy) = (x - cx, y - cy);
                let x_rot = dx * cos_a + dy * sin_a;
                let y_rot = -dx * sin_a + dy * cos_a;
                x_rot * x_rot / a_sq + y_rot * y_rot / b_sq <= 1.0
            })
        }
        RoiShape::Polygon { vertices } => {
            Box::new(move |x, y| point_in_polygon(x, y, vertices))
        }
        RoiShape::Arc {
            center,
            inner_radius,
            outer_radius,
            start_angle,
            end_angle,
        } => {
            let (cx, cy) = *center;
            let (inner_sq, outer_sq) = (inner_radius.powi(2), outer_radius.powi(2));
            let sector = options
                .arc_angle_filter
                .then(|| AngularSector::new(*start_angle, *end_angle));
            Box::new(move |x, y| {
                let (dx, dy) = (x - cx, y - cy);
                let dist_sq = dx * dx + dy * dy;
                dist_sq >= inner_sq
                    && dist_sq <= outer_sq
                    && sector.as_ref().map_or(true, |s| s.contains(dy.atan2(dx)))
            })
        }
        _ => return None,
    };

    for row in rows.0..=rows.1 {
        let y = usize_to_f64(row);
        for col in cols.0..=cols.1 {
            if inside(usize_to_f64(col), y) {
                mask[[row, col]] = true;
            }
        }
    }
    Some(mask)
}

/// Angular range swept from the smaller to the larger bound.
struct AngularSector {
    start: f64,
    span: f64,
}

impl AngularSector {
    fn new(start_angle: f64, end_angle: f64) -> Self {
        let (start, end) = if end_angle >= start_angle {
            (start_angle, end_angle)
        } else {
            (end_angle, start_angle)
        };
        Self {
            start,
            span: end - start,
        }
    }

    fn contains(&self, angle: f64) -> bool {
        self.span >= TAU || (angle - self.start).rem_euclid(TAU) <= self.span
    }
}

/// Integer pixel coordinates `(x, y)` along a line, endpoints included.
#[must_use]
pub fn bresenham_line(x0: i64, y0: i64, x1: i64, y1: i64) -> Vec<(i64, i64)> {
    let dx = (i128::from(x1) - i128::from(x0)).abs();
    let dy = (i128::from(y1) - i128::from(y0)).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };

    let capacity = usize::try_from(dx.max(dy) + 1)
        .map_or(MAX_PATH_RESERVE, |n| n.min(MAX_PATH_RESERVE));
    let mut coords = Vec::with_capacity(capacity);
    let mut err = dx - dy;
    let (mut x, mut y) = (x0, y0);
    loop {
        coords.push((x, y));
        if x == x1 && y == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 > -dy {
            err -= dy;
            x += sx;
        }
        if e2 < dx {
            err += dx;
            y += sy;
        }
    }
    coords
}

const MAX_PATH_RESERVE: usize = 4096;

/// Endpoint magnitude bound keeping the clip arithmetic inside `i128`.
const COORD_LIMIT: i64 = 1 << 62;

/// Liang-Barsky clip of an integer segment to the pixel box
/// `[0, width - 1] x [0, height - 1]`, with exact rational parameters.
fn clip_segment(
    start: (i64, i64),
    end: (i64, i64),
    dims: (usize, usize),
) -> Option<((i64, i64), (i64, i64))> {
    let (height, width) = dims;
    let x_max = i128::try_from(width).ok()? - 1;
    let y_max = i128::try_from(height).ok()? - 1;
    if x_max < 0 || y_max < 0 {
        return None;
    }
    let (x0, y0) = (i128::from(start.0), i128::from(start.1));
    let (dx, dy) = (i128::from(end.0) - x0, i128::from(end.1) - y0);

    // parameters are fractions (num, den) with den > 0
    let (mut t0, mut t1) = ((0i128, 1i128), (1i128, 1i128));
    for (p, q) in [(-dx, x0), (dx, x_max - x0), (-dy, y0), (dy, y_max - y0)] {
        if p == 0 {
            if q < 0 {
                return None;
            }
            continue;
        }
        if p < 0 {
            let r = (-q, -p);
            if fraction_lt(t1, r) {
                return None;
            }
            if fraction_lt(t0, r) {
                t0 = r;
            }
        } else {
            let r = (q, p);
            if fraction_lt(r, t0) {
                return None;
            }
            if fraction_lt(r, t1) {
                t1 = r;
            }
        }
    }

    let at = |(num, den): (i128, i128)| {
        let x = (x0 + div_round(dx * num, den)).clamp(0, x_max);
        let y = (y0 + div_round(dy * num, den)).clamp(0, y_max);
        (
            i64::try_from(x).unwrap_or(i64::MAX),
            i64::try_from(y).unwrap_or(i64::MAX),
        )
    };
    Some((at(t0), at(t1)))
}

fn fraction_lt(a: (i128, i128), b: (i128, i128)) -> bool {
    a.0 * b.1 < b.0 * a.1
}

/// `a / b` rounded half up, for `b > 0`.
fn div_round(a: i128, b: i128) -> i128 {
    (a + b / 2).div_euclid(b)
}

/// Even-odd (crossing number) point-in-polygon test.
#[must_use]
pub fn point_in_polygon(x: f64, y: f64, vertices: &[(f64, f64)]) -> bool {
    let n = vertices.len();
    if n < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi) = vertices[i];
        let (xj, yj) = vertices[j];
        // (yi > y) != (yj > y) implies yi != yj
        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

fn out_of_bounds(x: f64, y: f64, dims: (usize, usize)) -> GeometryError {
    GeometryError::OutOfBounds {
        x,
        y,
        width: dims.1,
        height: dims.0,
    }
}

/// Whole-number coordinate as an index into an axis of length `len`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_index(value: f64, len: usize) -> Option<usize> {
    if !value.is_finite() || value < 0.0 || value >= usize_to_f64(len) {
        return None;
    }
    Some(value as usize)
}

/// Inclusive index range covering `[min, max]` clipped to an axis.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn index_span(min: f64, max: f64, len: usize) -> Option<(usize, usize)> {
    if len == 0 {
        return None;
    }
    let lo = min.floor().max(0.0);
    let hi = max.ceil().min(usize_to_f64(len - 1));
    if !lo.is_finite() || !hi.is_finite() || lo > hi {
        return None;
    }
    Some((lo as usize, hi as usize))
}

/// Line endpoint coordinate truncated toward zero and bounded to
/// `COORD_LIMIT`.
#[allow(clippy::cast_possible_truncation)]
fn truncate_coord(value: f64) -> i64 {
    // `as` saturates for out-of-range floats
    (value.trunc() as i64).clamp(-COORD_LIMIT, COORD_LIMIT)
}

#[allow(clippy::cast_precision_loss)]
fn usize_to_f64(value: usize) -> f64 {
    value as f64
}

fn mean_of(values: impl ExactSizeIterator<Item = f32>) -> f64 {
    let len = values.len();
    if len == 0 {
        return 0.0;
    }
    values.map(f64::from).sum::<f64>() / usize_to_f64(len)
}
