//! Frame datasets.
//!
//! A dataset is either a 3-D stack `(frames, height, width)` or a single 2-D
//! image. Providers may grow the first axis over time, so the frame count is
//! always read fresh through [`Dataset::total_frames`].

use std::sync::{Arc, PoisonError, RwLock};

use ndarray::{Array2, Array3, Axis};

use crate::error::{Error, Result};

/// A single 2-D frame, indexed `[row, column]`.
pub type Frame = Array2<f32>;

/// Shared, reference-counted dataset handle.
pub type DatasetHandle = Arc<dyn Dataset>;

/// Read-only access to a stack of frames.
pub trait Dataset: Send + Sync {
    /// Current shape. The first axis is the frame count for 3-D datasets.
    fn shape(&self) -> Vec<usize>;

    /// Reads one frame.
    ///
    /// # Errors
    /// Returns [`Error::FrameOutOfRange`] if `index` is past the current end,
    /// or a provider-specific error if the read fails.
    fn frame(&self, index: usize) -> Result<Arc<Frame>>;

    /// Number of axes.
    fn ndim(&self) -> usize {
        self.shape().len()
    }

    /// Number of frames available right now.
    fn total_frames(&self) -> usize {
        let shape = self.shape();
        match shape.len() {
            3 => shape[0],
            2 => 1,
            _ => 0,
        }
    }

    /// Frame `(height, width)`, if the dataset has a 2-D or 3-D layout.
    fn frame_dims(&self) -> Option<(usize, usize)> {
        let shape = self.shape();
        match shape.len() {
            3 => Some((shape[1], shape[2])),
            2 => Some((shape[0], shape[1])),
            _ => None,
        }
    }
}

/// Growable in-memory frame stack, e.g. a live recording buffer.
#[derive(Debug)]
pub struct InMemoryStack {
    height: usize,
    width: usize,
    frames: RwLock<Vec<Arc<Frame>>>,
}

impl InMemoryStack {
    /// Creates an empty stack of `height x width` frames.
    #[must_use]
    pub fn new(height: usize, width: usize) -> Self {
        Self {
            height,
            width,
            frames: RwLock::new(Vec::new()),
        }
    }

    /// Builds a stack from a `(frames, height, width)` array.
    #[must_use]
    pub fn from_array(stack: &Array3<f32>) -> Self {
        let (_, height, width) = stack.dim();
        let frames = stack
            .axis_iter(Axis(0))
            .map(|frame| Arc::new(frame.to_owned()))
            .collect();
        Self {
            height,
            width,
            frames: RwLock::new(frames),
        }
    }

    /// Appends a frame and returns its index.
    ///
    /// # Errors
    /// Returns [`Error::InvalidFrame`] if the frame has the wrong dimensions.
    pub fn push_frame(&self, frame: Frame) -> Result<usize> {
        if frame.dim() != (self.height, self.width) {
            return Err(Error::InvalidFrame(format!(
                "expected {}x{} frame, got {}x{}",
                self.height,
                self.width,
                frame.nrows(),
                frame.ncols()
            )));
        }
        let mut frames = self.frames.write().unwrap_or_else(PoisonError::into_inner);
        frames.push(Arc::new(frame));
        Ok(frames.len() - 1)
    }

    /// Number of stored frames.
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns true if no frames are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Dataset for InMemoryStack {
    fn shape(&self) -> Vec<usize> {
        vec![self.len(), self.height, self.width]
    }

    fn frame(&self, index: usize) -> Result<Arc<Frame>> {
        let frames = self.frames.read().unwrap_or_else(PoisonError::into_inner);
        frames
            .get(index)
            .cloned()
            .ok_or(Error::FrameOutOfRange {
                index,
                total: frames.len(),
            })
    }
}

/// A standalone 2-D image exposed as a one-frame dataset.
#[derive(Debug, Clone)]
pub struct SingleImage {
    image: Arc<Frame>,
}

impl SingleImage {
    #[must_use]
    pub fn new(image: Frame) -> Self {
        Self {
            image: Arc::new(image),
        }
    }
}

impl Dataset for SingleImage {
    fn shape(&self) -> Vec<usize> {
        vec![self.image.nrows(), self.image.ncols()]
    }

    fn frame(&self, index: usize) -> Result<Arc<Frame>> {
        if index == 0 {
            Ok(Arc::clone(&self.image))
        } else {
            Err(Error::FrameOutOfRange { index, total: 1 })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_grows() {
        let stack = InMemoryStack::new(2, 3);
        assert_eq!(stack.total_frames(), 0);
        assert_eq!(stack.frame_dims(), Some((2, 3)));

        assert_eq!(stack.push_frame(Frame::zeros((2, 3))).unwrap(), 0);
        assert_eq!(stack.push_frame(Frame::ones((2, 3))).unwrap(), 1);
        assert_eq!(stack.total_frames(), 2);
        assert!((stack.frame(1).unwrap()[[1, 2]] - 1.0).abs() < f32::EPSILON);
        assert!(matches!(
            stack.frame(2),
            Err(Error::FrameOutOfRange { index: 2, total: 2 })
        ));
    }

    #[test]
    fn test_stack_rejects_wrong_dims() {
        let stack = InMemoryStack::new(2, 3);
        assert!(matches!(
            stack.push_frame(Frame::zeros((3, 2))),
            Err(Error::InvalidFrame(_))
        ));
        assert!(stack.is_empty());
    }

    #[test]
    fn test_from_array_splits_first_axis() {
        let data = Array3::from_shape_fn((4, 2, 2), |(n, _, _)| n as f32);
        let stack = InMemoryStack::from_array(&data);
        assert_eq!(stack.shape(), vec![4, 2, 2]);
        assert!((stack.frame(3).unwrap()[[0, 0]] - 3.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_single_image_has_one_frame() {
        let image = SingleImage::new(Frame::zeros((5, 4)));
        assert_eq!(image.ndim(), 2);
        assert_eq!(image.total_frames(), 1);
        assert_eq!(image.frame_dims(), Some((5, 4)));
        assert!(image.frame(0).is_ok());
        assert!(image.frame(1).is_err());
    }
}
