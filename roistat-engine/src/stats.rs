//! Statistics facade.
//!
//! [`RoiStatistics`] is the object UI code talks to. It owns one cache, one
//! event bus and one compute engine, and translates dataset and ROI changes
//! into cache updates and scheduled jobs.

use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, info, warn};
use roistat_core::{DatasetHandle, Error as CoreError, Frame, LiveRecord, Roi};

use crate::cache::{RoiSummary, StatCache};
use crate::config::EngineConfig;
use crate::event::{EngineEvent, EventBus};
use crate::scheduler::ComputeEngine;
use crate::{Error, Result};

/// Which store [`RoiStatistics::get_timeseries`] reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Per-frame values of the attached dataset.
    #[default]
    Dataset,
    /// Append-only live capture logs.
    Live,
}

#[derive(Default)]
struct FacadeState {
    dataset: Option<DatasetHandle>,
    total_frames: usize,
    current_frame: usize,
    mode: Mode,
}

/// Boundary object for ROI statistics.
pub struct RoiStatistics {
    cache: Arc<StatCache>,
    events: Arc<EventBus>,
    engine: ComputeEngine,
    state: Mutex<FacadeState>,
}

impl RoiStatistics {
    /// Creates the cache and event bus and starts the compute engine.
    ///
    /// # Errors
    /// Returns an error if the engine cannot start.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let cache = Arc::new(StatCache::new());
        let events = Arc::new(EventBus::new());
        let engine = ComputeEngine::start(config, Arc::clone(&cache), Arc::clone(&events))?;
        Ok(Self {
            cache,
            events,
            engine,
            state: Mutex::new(FacadeState::default()),
        })
    }

    fn state(&self) -> MutexGuard<'_, FacadeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Shared statistic cache.
    #[must_use]
    pub fn cache(&self) -> &Arc<StatCache> {
        &self.cache
    }

    /// Underlying compute engine.
    #[must_use]
    pub fn engine(&self) -> &ComputeEngine {
        &self.engine
    }

    /// Attaches a dataset and schedules a backfill of every tracked ROI.
    ///
    /// Re-attaching the same handle keeps cached values; a different handle
    /// invalidates them.
    pub fn set_dataset(&self, dataset: DatasetHandle) {
        let total = dataset.total_frames();
        let switched = {
            let mut state = self.state();
            let same = state
                .dataset
                .as_ref()
                .is_some_and(|current| same_dataset(current, &dataset));
            state.dataset = Some(Arc::clone(&dataset));
            state.total_frames = total;
            !same
        };
        if switched {
            self.cache.invalidate_all();
            info!("dataset attached: shape {:?}", dataset.shape());
        }
        self.cache.resize_dataset(total);
        self.engine.set_dataset(Some(dataset));
        self.schedule_backfill();
    }

    /// Detaches the dataset and forgets every dataset-mode value.
    pub fn clear_dataset(&self) {
        {
            let mut state = self.state();
            state.dataset = None;
            state.total_frames = 0;
            state.current_frame = 0;
        }
        self.engine.set_dataset(None);
        self.cache.invalidate_all();
        self.cache.resize_dataset(0);
        info!("dataset detached");
    }

    /// Attached dataset.
    #[must_use]
    pub fn dataset(&self) -> Option<DatasetHandle> {
        self.state().dataset.clone()
    }

    /// Frame count as of the last dataset attach or sync.
    #[must_use]
    pub fn total_frames(&self) -> usize {
        self.state().total_frames
    }

    /// Re-reads the dataset length after frames were appended (or removed).
    ///
    /// Resizes the cache and backfills only the new frames. Returns the
    /// current frame count.
    pub fn sync_dataset_length(&self) -> usize {
        let (total, changed) = {
            let mut state = self.state();
            let Some(dataset) = state.dataset.clone() else {
                return 0;
            };
            let total = dataset.total_frames();
            let changed = total != state.total_frames;
            state.total_frames = total;
            (total, changed)
        };
        if changed {
            debug!("dataset length changed to {total}");
            self.cache.resize_dataset(total);
            self.schedule_backfill();
        }
        total
    }

    /// Starts tracking an ROI.
    ///
    /// In dataset mode the current frame is computed right away and a
    /// backfill is queued.
    ///
    /// # Errors
    /// Returns [`Error::Stopped`] if the engine has been stopped.
    pub fn register_roi(&self, roi: Roi) -> Result<()> {
        if !self.engine.is_running() {
            return Err(Error::Stopped);
        }
        let (total, current, mode) = {
            let state = self.state();
            (state.total_frames, state.current_frame, state.mode)
        };
        self.cache.add_roi(roi.clone(), total);
        // A dataset attached between the read above and the insert resized
        // every entry except this one.
        let (dataset, latest) = {
            let state = self.state();
            (state.dataset.clone(), state.total_frames)
        };
        if latest != total {
            self.cache.resize_dataset(latest);
        }
        let total = latest;

        let Some(dataset) = dataset.filter(|_| mode == Mode::Dataset && total > 0) else {
            return Ok(());
        };
        let index = current.min(total - 1);
        match dataset.frame(index) {
            Ok(frame) => self.engine.submit_priority(index, frame, &[roi.clone()])?,
            Err(e) => warn!("cannot read frame {index} for '{}': {e}", roi.name),
        }
        self.engine.enqueue_bulk(&roi);
        Ok(())
    }

    /// Stops tracking an ROI. Returns false if the name was unknown.
    pub fn unregister_roi(&self, name: &str) -> bool {
        self.cache.remove_roi(name)
    }

    /// Snapshots of every tracked ROI, in registration order.
    #[must_use]
    pub fn tracked_rois(&self) -> Vec<Roi> {
        self.cache.rois()
    }

    /// Computes every tracked ROI on the displayed frame.
    ///
    /// Reads the frame from the dataset unless `frame` is given.
    ///
    /// # Errors
    /// Returns an error if no frame is given and the dataset is missing or
    /// does not have `frame_index`, or if the engine has been stopped.
    pub fn update_current_frame(&self, frame_index: usize, frame: Option<Frame>) -> Result<()> {
        let dataset = {
            let mut state = self.state();
            state.current_frame = frame_index;
            state.dataset.clone()
        };
        let frame = match frame {
            Some(frame) => Arc::new(frame),
            None => dataset
                .ok_or(CoreError::DatasetUnavailable)?
                .frame(frame_index)?,
        };
        self.engine
            .submit_priority(frame_index, frame, &self.cache.rois())
    }

    /// Computes every tracked ROI on a live frame, appending to the live logs.
    ///
    /// # Errors
    /// Returns [`Error::Stopped`] if the engine has been stopped.
    pub fn push_live_frame(&self, frame: Frame) -> Result<()> {
        self.engine
            .submit_live(Arc::new(frame), &self.cache.rois())
    }

    /// `(frame indices, values)` for plotting, from the store of the current
    /// mode.
    #[must_use]
    pub fn get_timeseries(&self, name: &str) -> (Vec<usize>, Vec<f32>) {
        match self.mode() {
            Mode::Dataset => self.cache.get_all_means(name),
            Mode::Live => self.cache.get_live_means(name),
        }
    }

    /// Replaces an ROI's geometry, invalidates its values and re-queues its
    /// backfill. Returns false if the ROI is not tracked.
    pub fn notify_geometry_changed(&self, roi: &Roi) -> bool {
        if self.cache.update_roi(roi).is_none() {
            return false;
        }
        let backfill = {
            let state = self.state();
            state.mode == Mode::Dataset && state.dataset.is_some()
        };
        if backfill {
            self.engine.enqueue_bulk(roi);
        }
        true
    }

    /// Switches between dataset and live mode.
    ///
    /// Returning to dataset mode schedules a backfill of every ROI.
    pub fn set_live_mode(&self, live: bool) {
        let mode = if live { Mode::Live } else { Mode::Dataset };
        let previous = std::mem::replace(&mut self.state().mode, mode);
        if previous != mode {
            info!("switched to {mode:?} mode");
            if mode == Mode::Dataset {
                self.schedule_backfill();
            }
        }
    }

    /// Current mode.
    #[must_use]
    pub fn mode(&self) -> Mode {
        self.state().mode
    }

    /// Subscribes to engine events.
    pub fn subscribe(&self) -> Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// `(computed, total)` frame counts of an ROI.
    #[must_use]
    pub fn progress(&self, name: &str) -> Option<(usize, usize)> {
        self.cache.progress(name)
    }

    /// Completion summary of every ROI.
    #[must_use]
    pub fn summary(&self) -> Vec<RoiSummary> {
        self.cache.summary()
    }

    /// Live logs of every ROI, for export.
    #[must_use]
    pub fn live_snapshot(&self) -> Vec<LiveRecord> {
        self.cache.live_snapshot()
    }

    /// Empties every live log.
    pub fn clear_live_data(&self) {
        self.cache.clear_live_data();
    }

    /// Pauses bulk backfill.
    pub fn pause(&self) {
        self.engine.pause();
    }

    /// Resumes bulk backfill.
    pub fn resume(&self) {
        self.engine.resume();
    }

    /// Returns true while bulk backfill is paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.engine.is_paused()
    }

    /// Blocks until no work is queued or running, or `timeout` elapses.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        self.engine.wait_until_idle(timeout)
    }

    /// Stops the compute engine. Safe to call more than once.
    pub fn stop(&self) {
        self.engine.stop();
    }

    fn schedule_backfill(&self) {
        let ready = {
            let state = self.state();
            state.mode == Mode::Dataset && state.dataset.is_some() && state.total_frames > 0
        };
        if !ready {
            return;
        }
        for roi in self.cache.rois() {
            self.engine.enqueue_bulk(&roi);
        }
    }
}

fn same_dataset(a: &DatasetHandle, b: &DatasetHandle) -> bool {
    // compare data pointers only; vtable pointers may differ per codegen unit
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
