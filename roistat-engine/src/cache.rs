//! Statistic cache.
//!
//! Per-ROI storage of dataset-mode means keyed by frame index, plus an
//! append-only live log per ROI. Every method takes the single cache lock for
//! its full duration; no method calls another while holding it.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use roistat_core::{epoch_seconds, Color, LiveRecord, Roi};

/// Completion summary for one ROI.
#[derive(Debug, Clone, PartialEq)]
pub struct RoiSummary {
    /// ROI name.
    pub name: String,
    /// Frames in the dataset.
    pub total_frames: usize,
    /// Frames with a computed value.
    pub computed: usize,
    /// `computed / total_frames` as a percentage (100 for empty datasets).
    pub percent: f64,
}

#[derive(Debug)]
struct RoiEntry {
    roi: Roi,
    means: Vec<f32>,
    computed: BTreeSet<usize>,
    total_frames: usize,
    generation: u64,
}

#[derive(Debug, Default)]
struct LiveEntry {
    values: Vec<f32>,
    timestamps: Vec<f64>,
}

#[derive(Debug, Default)]
struct CacheState {
    order: Vec<String>,
    entries: HashMap<String, RoiEntry>,
    live: HashMap<String, LiveEntry>,
    live_frame_count: usize,
    next_generation: u64,
}

impl CacheState {
    fn bump_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }
}

/// Thread-safe store of per-ROI, per-frame mean intensities.
#[derive(Debug, Default)]
pub struct StatCache {
    state: Mutex<CacheState>,
}

impl StatCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts tracking an ROI with `total_frames` empty slots and an empty
    /// live log. Re-adding a name replaces its entries and returns the new
    /// generation.
    pub fn add_roi(&self, roi: Roi, total_frames: usize) -> u64 {
        let mut state = self.lock();
        let generation = state.bump_generation();
        let name = roi.name.clone();
        if !state.entries.contains_key(&name) {
            state.order.push(name.clone());
        }
        state.entries.insert(
            name.clone(),
            RoiEntry {
                roi,
                means: vec![0.0; total_frames],
                computed: BTreeSet::new(),
                total_frames,
                generation,
            },
        );
        state.live.insert(name, LiveEntry::default());
        generation
    }

    /// Stops tracking an ROI. Returns false if the name was unknown.
    pub fn remove_roi(&self, name: &str) -> bool {
        let mut state = self.lock();
        state.live.remove(name);
        if state.entries.remove(name).is_none() {
            return false;
        }
        state.order.retain(|n| n != name);
        true
    }

    /// Returns true if the ROI is tracked.
    #[must_use]
    pub fn has_roi(&self, name: &str) -> bool {
        self.lock().entries.contains_key(name)
    }

    /// Stored ROI snapshot.
    #[must_use]
    pub fn roi(&self, name: &str) -> Option<Roi> {
        self.lock().entries.get(name).map(|e| e.roi.clone())
    }

    /// Stored ROI snapshot together with its current generation.
    #[must_use]
    pub fn roi_with_generation(&self, name: &str) -> Option<(Roi, u64)> {
        self.lock()
            .entries
            .get(name)
            .map(|e| (e.roi.clone(), e.generation))
    }

    /// Current generation of an ROI.
    #[must_use]
    pub fn generation(&self, name: &str) -> Option<u64> {
        self.lock().entries.get(name).map(|e| e.generation)
    }

    /// Display color, white for unknown names.
    #[must_use]
    pub fn color(&self, name: &str) -> Color {
        self.lock()
            .entries
            .get(name)
            .map_or(Color::WHITE, |e| e.roi.color)
    }

    /// Tracked ROI names in insertion order.
    #[must_use]
    pub fn active_rois(&self) -> Vec<String> {
        self.lock().order.clone()
    }

    /// Tracked ROI snapshots in insertion order.
    #[must_use]
    pub fn rois(&self) -> Vec<Roi> {
        let state = self.lock();
        state
            .order
            .iter()
            .filter_map(|name| state.entries.get(name).map(|e| e.roi.clone()))
            .collect()
    }

    /// Stores a value, growing the backing array if needed. No-op for unknown
    /// names.
    pub fn set_mean(&self, name: &str, frame_index: usize, value: f32) {
        let mut state = self.lock();
        if let Some(entry) = state.entries.get_mut(name) {
            store(entry, frame_index, value);
        }
    }

    /// Stores a value only if the ROI is still at `generation`.
    ///
    /// Returns false when the write was discarded (unknown name, geometry
    /// changed since the value was computed, or frame past the dataset end).
    pub fn set_mean_if_current(
        &self,
        name: &str,
        generation: u64,
        frame_index: usize,
        value: f32,
    ) -> bool {
        let mut state = self.lock();
        match state.entries.get_mut(name) {
            Some(entry) if entry.generation == generation && frame_index < entry.total_frames => {
                store(entry, frame_index, value);
                true
            }
            _ => false,
        }
    }

    /// Cached value, `None` unless computed and inside the current dataset.
    #[must_use]
    pub fn get_mean(&self, name: &str, frame_index: usize) -> Option<f32> {
        let state = self.lock();
        let entry = state.entries.get(name)?;
        if frame_index < entry.means.len() && entry.computed.contains(&frame_index) {
            Some(entry.means[frame_index])
        } else {
            None
        }
    }

    /// All computed `(frame indices, values)`, indices ascending.
    #[must_use]
    pub fn get_all_means(&self, name: &str) -> (Vec<usize>, Vec<f32>) {
        let state = self.lock();
        let Some(entry) = state.entries.get(name) else {
            return (Vec::new(), Vec::new());
        };
        entry
            .computed
            .iter()
            .filter(|&&i| i < entry.means.len())
            .map(|&i| (i, entry.means[i]))
            .unzip()
    }

    /// Frame indices below the dataset end that still need computing.
    #[must_use]
    pub fn missing_frames(&self, name: &str) -> Vec<usize> {
        let state = self.lock();
        state.entries.get(name).map_or_else(Vec::new, |entry| {
            (0..entry.total_frames)
                .filter(|i| !entry.computed.contains(i))
                .collect()
        })
    }

    /// Resizes every ROI to `new_total` frames.
    ///
    /// Growing zero-pads, shrinking truncates and forgets computed frames at
    /// or past the new end. Calling twice with the same size is a no-op.
    pub fn resize_dataset(&self, new_total: usize) {
        let mut state = self.lock();
        for entry in state.entries.values_mut() {
            entry.means.resize(new_total, 0.0);
            // split_off returns everything >= new_total
            entry.computed.split_off(&new_total);
            entry.total_frames = new_total;
        }
    }

    /// Forgets every computed frame of an ROI, keeping its size.
    ///
    /// Bumps the generation so in-flight results for the old geometry are
    /// discarded. Returns the new generation.
    pub fn update_roi_geometry(&self, name: &str) -> Option<u64> {
        let mut state = self.lock();
        let generation = state.bump_generation();
        let entry = state.entries.get_mut(name)?;
        entry.computed.clear();
        entry.generation = generation;
        Some(generation)
    }

    /// Replaces the stored ROI snapshot and invalidates its computed frames.
    ///
    /// The live log is kept. Returns the new generation, or `None` for
    /// unknown names.
    pub fn update_roi(&self, roi: &Roi) -> Option<u64> {
        let mut state = self.lock();
        let generation = state.bump_generation();
        let entry = state.entries.get_mut(&roi.name)?;
        entry.roi = roi.clone();
        entry.computed.clear();
        entry.generation = generation;
        Some(generation)
    }

    /// Invalidates every ROI, e.g. when the dataset is replaced.
    pub fn invalidate_all(&self) {
        let mut state = self.lock();
        let generation = state.bump_generation();
        for entry in state.entries.values_mut() {
            entry.computed.clear();
            entry.generation = generation;
        }
    }

    /// Returns true once every frame of the ROI is computed.
    #[must_use]
    pub fn is_fully_computed(&self, name: &str) -> bool {
        self.lock()
            .entries
            .get(name)
            .is_some_and(|e| e.computed.len() >= e.total_frames)
    }

    /// `(computed, total)` frame counts.
    #[must_use]
    pub fn progress(&self, name: &str) -> Option<(usize, usize)> {
        self.lock()
            .entries
            .get(name)
            .map(|e| (e.computed.len(), e.total_frames))
    }

    /// Completion summary of every ROI, in insertion order.
    #[must_use]
    pub fn summary(&self) -> Vec<RoiSummary> {
        let state = self.lock();
        state
            .order
            .iter()
            .filter_map(|name| state.entries.get(name))
            .map(|entry| {
                let computed = entry.computed.len();
                #[allow(clippy::cast_precision_loss)]
                let percent = if entry.total_frames == 0 {
                    100.0
                } else {
                    computed as f64 / entry.total_frames as f64 * 100.0
                };
                RoiSummary {
                    name: entry.roi.name.clone(),
                    total_frames: entry.total_frames,
                    computed,
                    percent,
                }
            })
            .collect()
    }

    /// Drops every ROI and live log.
    pub fn clear_all(&self) {
        let mut state = self.lock();
        state.order.clear();
        state.entries.clear();
        state.live.clear();
        state.live_frame_count = 0;
    }

    /// Appends a live value stamped with the current time.
    ///
    /// Returns the position of the value in the log, or `None` for unknown
    /// names.
    pub fn append_live_mean(&self, name: &str, value: f32) -> Option<usize> {
        self.append_live_mean_at(name, value, SystemTime::now())
    }

    /// Appends a live value with an explicit timestamp.
    pub fn append_live_mean_at(
        &self,
        name: &str,
        value: f32,
        timestamp: SystemTime,
    ) -> Option<usize> {
        let mut state = self.lock();
        let log = state.live.get_mut(name)?;
        log.values.push(value);
        log.timestamps.push(epoch_seconds(timestamp));
        let len = log.values.len();
        state.live_frame_count = state.live_frame_count.max(len);
        Some(len - 1)
    }

    /// Live `(indices, values)` of an ROI.
    #[must_use]
    pub fn get_live_means(&self, name: &str) -> (Vec<usize>, Vec<f32>) {
        self.lock().live.get(name).map_or_else(
            || (Vec::new(), Vec::new()),
            |log| ((0..log.values.len()).collect(), log.values.clone()),
        )
    }

    /// Live timestamps of an ROI, seconds since the Unix epoch.
    #[must_use]
    pub fn live_timestamps(&self, name: &str) -> Vec<f64> {
        self.lock()
            .live
            .get(name)
            .map_or_else(Vec::new, |log| log.timestamps.clone())
    }

    /// Length of the longest live log since the last clear.
    #[must_use]
    pub fn live_frame_count(&self) -> usize {
        self.lock().live_frame_count
    }

    /// Empties every live log.
    pub fn clear_live_data(&self) {
        let mut state = self.lock();
        for log in state.live.values_mut() {
            log.values.clear();
            log.timestamps.clear();
        }
        state.live_frame_count = 0;
    }

    /// Copies every live log for export, in insertion order.
    #[must_use]
    pub fn live_snapshot(&self) -> Vec<LiveRecord> {
        let state = self.lock();
        state
            .order
            .iter()
            .filter_map(|name| {
                let entry = state.entries.get(name)?;
                let log = state.live.get(name)?;
                Some(LiveRecord {
                    name: name.clone(),
                    color: entry.roi.color,
                    values: log.values.clone(),
                    timestamps: log.timestamps.clone(),
                })
            })
            .collect()
    }
}

fn store(entry: &mut RoiEntry, frame_index: usize, value: f32) {
    if frame_index >= entry.means.len() {
        entry.means.resize(frame_index + 1, 0.0);
    }
    entry.means[frame_index] = value;
    entry.computed.insert(frame_index);
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use roistat_core::RoiShape;
    use std::time::{Duration, UNIX_EPOCH};

    fn roi(name: &str) -> Roi {
        Roi::new(name, RoiShape::Point { x: 0.0, y: 0.0 })
    }

    #[test]
    fn test_set_then_get() {
        let cache = StatCache::new();
        cache.add_roi(roi("A"), 5);
        cache.set_mean("A", 2, 42.25);
        assert_eq!(cache.get_mean("A", 2), Some(42.25));
        assert_eq!(cache.get_mean("A", 1), None);
        assert_eq!(cache.get_mean("B", 2), None);
    }

    #[test]
    fn test_set_unknown_is_noop() {
        let cache = StatCache::new();
        cache.set_mean("ghost", 0, 1.0);
        assert!(!cache.has_roi("ghost"));
        assert_eq!(cache.get_all_means("ghost"), (vec![], vec![]));
    }

    #[test]
    fn test_set_grows_backing_array() {
        let cache = StatCache::new();
        cache.add_roi(roi("A"), 2);
        cache.set_mean("A", 7, 3.0);
        assert_eq!(cache.get_mean("A", 7), Some(3.0));
        assert_eq!(cache.get_all_means("A"), (vec![7], vec![3.0]));
    }

    #[test]
    fn test_all_means_sorted() {
        let cache = StatCache::new();
        cache.add_roi(roi("A"), 10);
        for (i, v) in [(5, 5.0), (1, 1.0), (8, 8.0), (3, 3.0)] {
            cache.set_mean("A", i, v);
        }
        let (frames, values) = cache.get_all_means("A");
        assert_eq!(frames, vec![1, 3, 5, 8]);
        assert_eq!(values, vec![1.0, 3.0, 5.0, 8.0]);
    }

    #[test]
    fn test_resize_shrink_drops_tail() {
        let cache = StatCache::new();
        cache.add_roi(roi("A"), 10);
        for i in 0..10 {
            cache.set_mean("A", i, 1.0);
        }
        cache.resize_dataset(4);
        let (frames, _) = cache.get_all_means("A");
        assert!(frames.iter().all(|&i| i < 4));
        assert_eq!(cache.progress("A"), Some((4, 4)));

        cache.resize_dataset(4);
        assert_eq!(cache.progress("A"), Some((4, 4)));
    }

    #[test]
    fn test_resize_grow_preserves() {
        let cache = StatCache::new();
        cache.add_roi(roi("A"), 2);
        cache.set_mean("A", 1, 9.0);
        cache.resize_dataset(6);
        assert_eq!(cache.get_mean("A", 1), Some(9.0));
        assert_eq!(cache.missing_frames("A"), vec![0, 2, 3, 4, 5]);
        assert!(!cache.is_fully_computed("A"));
    }

    #[test]
    fn test_geometry_update_clears_computed_only() {
        let cache = StatCache::new();
        let gen = cache.add_roi(roi("A"), 3);
        for i in 0..3 {
            cache.set_mean("A", i, 2.0);
        }
        assert!(cache.is_fully_computed("A"));

        let next = cache.update_roi_geometry("A").unwrap();
        assert!(next > gen);
        assert_eq!(cache.progress("A"), Some((0, 3)));
        assert_eq!(cache.missing_frames("A"), vec![0, 1, 2]);
        assert_eq!(cache.get_all_means("A"), (vec![], vec![]));
    }

    #[test]
    fn test_stale_generation_write_discarded() {
        let cache = StatCache::new();
        let old = cache.add_roi(roi("A"), 3);
        let new = cache
            .update_roi(&roi("A").with_color(Color::palette(3)))
            .unwrap();
        assert!(!cache.set_mean_if_current("A", old, 0, 1.0));
        assert_eq!(cache.get_mean("A", 0), None);
        assert!(cache.set_mean_if_current("A", new, 0, 1.0));
        assert_eq!(cache.get_mean("A", 0), Some(1.0));
        assert_eq!(cache.color("A"), Color::palette(3));
    }

    #[test]
    fn test_readd_after_remove_gets_fresh_generation() {
        let cache = StatCache::new();
        let first = cache.add_roi(roi("A"), 3);
        assert!(cache.remove_roi("A"));
        let second = cache.add_roi(roi("A"), 3);
        assert_ne!(first, second);
        assert!(!cache.set_mean_if_current("A", first, 0, 1.0));
    }

    #[test]
    fn test_active_rois_keep_insertion_order() {
        let cache = StatCache::new();
        for name in ["c", "a", "b"] {
            cache.add_roi(roi(name), 1);
        }
        cache.add_roi(roi("a"), 1);
        assert_eq!(cache.active_rois(), vec!["c", "a", "b"]);
        cache.remove_roi("a");
        assert_eq!(cache.active_rois(), vec!["c", "b"]);
        assert!(!cache.remove_roi("a"));
    }

    #[test]
    fn test_color_defaults_to_white() {
        let cache = StatCache::new();
        assert_eq!(cache.color("nope"), Color::WHITE);
    }

    #[test]
    fn test_live_log_append_and_clear() {
        let cache = StatCache::new();
        cache.add_roi(roi("A"), 0);
        for v in [1.0, 2.0, 3.0] {
            cache.append_live_mean("A", v);
        }
        assert_eq!(cache.get_live_means("A"), (vec![0, 1, 2], vec![1.0, 2.0, 3.0]));
        assert_eq!(cache.live_frame_count(), 3);

        cache.clear_live_data();
        assert_eq!(cache.get_live_means("A"), (vec![], vec![]));
        assert_eq!(cache.live_frame_count(), 0);
        assert!(cache.has_roi("A"));
    }

    #[test]
    fn test_live_frame_count_tracks_longest_log() {
        let cache = StatCache::new();
        cache.add_roi(roi("A"), 0);
        cache.add_roi(roi("B"), 0);
        cache.append_live_mean("A", 1.0);
        cache.append_live_mean("A", 1.0);
        cache.append_live_mean("B", 1.0);
        assert_eq!(cache.live_frame_count(), 2);
        assert_eq!(cache.append_live_mean("ghost", 1.0), None);
    }

    #[test]
    fn test_live_snapshot_and_timestamps() {
        let cache = StatCache::new();
        cache.add_roi(roi("A").with_color(Color::palette(1)), 0);
        let t = UNIX_EPOCH + Duration::from_secs(100);
        cache.append_live_mean_at("A", 4.0, t);

        assert_eq!(cache.live_timestamps("A"), vec![100.0]);
        let snapshot = cache.live_snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].name, "A");
        assert_eq!(snapshot[0].color, Color::palette(1));
        assert_relative_eq!(snapshot[0].values[0], 4.0);
    }

    #[test]
    fn test_summary_percent() {
        let cache = StatCache::new();
        cache.add_roi(roi("A"), 4);
        cache.add_roi(roi("B"), 0);
        cache.set_mean("A", 0, 1.0);
        let summary = cache.summary();
        assert_eq!(summary[0].computed, 1);
        assert_relative_eq!(summary[0].percent, 25.0);
        assert_relative_eq!(summary[1].percent, 100.0);

        cache.clear_all();
        assert!(cache.summary().is_empty());
    }
}
