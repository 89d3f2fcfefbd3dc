#![allow(clippy::cast_precision_loss)]
use std::sync::Arc;
use std::time::Duration;

use approx::assert_relative_eq;
use ndarray::Array3;
use roistat_core::{Error as CoreError, InMemoryStack, ResolveOptions};
use roistat_engine::{
    Dataset, DatasetHandle, EngineConfig, EngineEvent, Frame, Mode, Roi, RoiShape, RoiStatistics,
};

const WAIT: Duration = Duration::from_secs(20);

fn facade(chunk_size: usize) -> RoiStatistics {
    let config = EngineConfig::default()
        .with_chunk_size(chunk_size)
        .with_worker_threads(4);
    RoiStatistics::new(config).unwrap()
}

/// Stack whose n-th frame is filled with `n`.
fn ramp_stack(frames: usize, height: usize, width: usize) -> Arc<InMemoryStack> {
    let data = Array3::from_shape_fn((frames, height, width), |(n, _, _)| n as f32);
    Arc::new(InMemoryStack::from_array(&data))
}

fn full_rect(name: &str, width: f64, height: f64) -> Roi {
    Roi::new(
        name,
        RoiShape::Rectangle {
            origin: (0.0, 0.0),
            size: (width, height),
        },
    )
}

#[test]
fn test_constant_stack_full_rectangle() {
    let stats = facade(3);
    let data = Array3::from_elem((10, 8, 8), 100.0f32);
    stats.set_dataset(Arc::new(InMemoryStack::from_array(&data)));
    stats.register_roi(full_rect("R", 8.0, 8.0)).unwrap();

    assert!(stats.wait_until_idle(WAIT));
    let (frames, values) = stats.get_timeseries("R");
    assert_eq!(frames, (0..10).collect::<Vec<_>>());
    for value in values {
        assert_relative_eq!(value, 100.0);
    }
    assert!(stats.cache().is_fully_computed("R"));
}

#[test]
fn test_point_outside_frame_is_zero_without_error() {
    let stats = facade(4);
    let events = stats.subscribe();
    let data = Array3::from_elem((6, 10, 10), 42.0f32);
    stats.set_dataset(Arc::new(InMemoryStack::from_array(&data)));
    stats
        .register_roi(Roi::new("P", RoiShape::Point { x: 50.0, y: 50.0 }))
        .unwrap();

    assert!(stats.wait_until_idle(WAIT));
    let (frames, values) = stats.get_timeseries("P");
    assert_eq!(frames.len(), 6);
    assert!(values.iter().all(|&v| v.abs() < f32::EPSILON));
    assert!(!events
        .try_iter()
        .any(|e| matches!(e, EngineEvent::Error { .. })));
}

#[test]
fn test_ramp_values_follow_frame_index() {
    let stats = facade(7);
    stats.set_dataset(ramp_stack(40, 5, 5));
    stats.register_roi(full_rect("R", 5.0, 5.0)).unwrap();
    stats
        .register_roi(Roi::new("L", RoiShape::HorizontalLine { y: 2.0 }))
        .unwrap();

    assert!(stats.wait_until_idle(WAIT));
    for name in ["R", "L"] {
        let (frames, values) = stats.get_timeseries(name);
        assert_eq!(frames.len(), 40);
        for (frame, value) in frames.into_iter().zip(values) {
            assert_relative_eq!(value, frame as f32);
        }
    }
    let summary = stats.summary();
    assert_eq!(summary.len(), 2);
    assert!(summary.iter().all(|s| (s.percent - 100.0).abs() < 1e-9));
}

#[test]
fn test_bulk_emits_progress_and_completion() {
    let stats = facade(5);
    let events = stats.subscribe();
    stats.set_dataset(ramp_stack(12, 4, 4));
    stats.register_roi(full_rect("R", 4.0, 4.0)).unwrap();
    assert!(stats.wait_until_idle(WAIT));

    let events: Vec<EngineEvent> = events.try_iter().collect();
    let progress: Vec<(usize, usize)> = events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::BulkProgress { done, total, .. } => Some((*done, *total)),
            _ => None,
        })
        .collect();
    assert!(!progress.is_empty());
    assert!(progress.windows(2).all(|w| w[0].0 <= w[1].0));
    assert_eq!(progress.last(), Some(&(12, 12)));
    assert!(events.contains(&EngineEvent::BulkComplete { roi: "R".into() }));
}

#[test]
fn test_geometry_change_recomputes() {
    let stats = facade(4);
    // column index as intensity
    let data = Array3::from_shape_fn((8, 4, 6), |(_, _, c)| c as f32);
    stats.set_dataset(Arc::new(InMemoryStack::from_array(&data)));

    let left = full_rect("R", 2.0, 4.0);
    stats.register_roi(left.clone()).unwrap();
    assert!(stats.wait_until_idle(WAIT));
    let (_, values) = stats.get_timeseries("R");
    assert!(values.iter().all(|&v| (v - 0.5).abs() < 1e-6));

    let right = Roi {
        shape: RoiShape::Rectangle {
            origin: (4.0, 0.0),
            size: (2.0, 4.0),
        },
        ..left
    };
    assert!(stats.notify_geometry_changed(&right));
    assert!(stats.wait_until_idle(WAIT));
    let (frames, values) = stats.get_timeseries("R");
    assert_eq!(frames.len(), 8);
    assert!(values.iter().all(|&v| (v - 4.5).abs() < 1e-6));
    assert_eq!(stats.tracked_rois()[0], right);

    assert!(!stats.notify_geometry_changed(&full_rect("ghost", 1.0, 1.0)));
}

#[test]
fn test_dataset_growth_backfills_new_frames() {
    let stats = facade(3);
    let stack = Arc::new(InMemoryStack::new(3, 3));
    for n in 0..4 {
        stack.push_frame(Frame::from_elem((3, 3), n as f32)).unwrap();
    }
    let handle: DatasetHandle = stack.clone();
    stats.set_dataset(handle);
    stats.register_roi(full_rect("R", 3.0, 3.0)).unwrap();
    assert!(stats.wait_until_idle(WAIT));
    assert_eq!(stats.progress("R"), Some((4, 4)));

    for n in 4..9 {
        stack.push_frame(Frame::from_elem((3, 3), n as f32)).unwrap();
    }
    assert_eq!(stats.sync_dataset_length(), 9);
    assert!(stats.wait_until_idle(WAIT));

    let (frames, values) = stats.get_timeseries("R");
    assert_eq!(frames, (0..9).collect::<Vec<_>>());
    assert_relative_eq!(values[8], 8.0);
    assert_eq!(stats.total_frames(), 9);
}

#[test]
fn test_priority_during_bulk_is_kept() {
    let stats = facade(5);
    let events = stats.subscribe();
    let stack = ramp_stack(400, 16, 16);
    stats.set_dataset(stack);
    stats.register_roi(full_rect("R", 16.0, 16.0)).unwrap();

    for index in [350, 120, 399] {
        stats.update_current_frame(index, None).unwrap();
    }
    assert!(stats.wait_until_idle(WAIT));

    for index in [350usize, 120, 399] {
        assert_eq!(stats.cache().get_mean("R", index), Some(index as f32));
    }
    let (frames, values) = stats.get_timeseries("R");
    assert_eq!(frames.len(), 400);
    for (frame, value) in frames.into_iter().zip(values) {
        assert_relative_eq!(value, frame as f32);
    }
    let ready: Vec<usize> = events
        .try_iter()
        .filter_map(|e| match e {
            EngineEvent::CurrentFrameReady { frame, .. } => Some(frame),
            _ => None,
        })
        .collect();
    for index in [350, 120, 399] {
        assert!(ready.contains(&index));
    }
}

#[test]
fn test_live_capture_log() {
    let stats = facade(4);
    stats.register_roi(full_rect("A", 4.0, 4.0)).unwrap();
    stats.set_live_mode(true);
    for value in [1.0f32, 2.0, 3.0] {
        stats.push_live_frame(Frame::from_elem((4, 4), value)).unwrap();
    }
    assert!(stats.wait_until_idle(WAIT));

    assert_eq!(stats.mode(), Mode::Live);
    assert_eq!(stats.get_timeseries("A"), (vec![0, 1, 2], vec![1.0, 2.0, 3.0]));
    assert_eq!(stats.cache().live_frame_count(), 3);
    let snapshot = stats.live_snapshot();
    assert_eq!(snapshot[0].timestamps.len(), 3);
    assert!(snapshot[0].timestamps.windows(2).all(|w| w[0] <= w[1]));

    stats.clear_live_data();
    assert_eq!(stats.get_timeseries("A"), (vec![], vec![]));
}

#[test]
fn test_pause_holds_backfill() {
    let stats = facade(2);
    stats.pause();
    stats.set_dataset(ramp_stack(6, 2, 2));
    stats.register_roi(full_rect("R", 2.0, 2.0)).unwrap();

    // only the current frame is computed while paused
    std::thread::sleep(Duration::from_millis(300));
    let (computed, total) = stats.progress("R").unwrap();
    assert!(computed <= 1);
    assert_eq!(total, 6);
    assert!(!stats.wait_until_idle(Duration::from_millis(100)));

    stats.resume();
    assert!(stats.wait_until_idle(WAIT));
    assert_eq!(stats.progress("R"), Some((6, 6)));
}

#[test]
fn test_unregister_drops_results() {
    let stats = facade(4);
    stats.set_dataset(ramp_stack(20, 4, 4));
    stats.register_roi(full_rect("R", 4.0, 4.0)).unwrap();
    assert!(stats.unregister_roi("R"));
    assert!(stats.wait_until_idle(WAIT));
    assert_eq!(stats.get_timeseries("R"), (vec![], vec![]));
    assert!(stats.tracked_rois().is_empty());
    assert!(!stats.unregister_roi("R"));
}

#[test]
fn test_stop_twice_and_drop() {
    let stats = facade(4);
    stats.set_dataset(ramp_stack(50, 8, 8));
    stats.register_roi(full_rect("R", 8.0, 8.0)).unwrap();
    stats.stop();
    stats.stop();
    assert!(stats.push_live_frame(Frame::zeros((8, 8))).is_err());
    drop(stats);
}

/// Dataset that fails on one frame and panics on another.
struct FaultyDataset {
    inner: Arc<InMemoryStack>,
}

impl Dataset for FaultyDataset {
    fn shape(&self) -> Vec<usize> {
        self.inner.shape()
    }

    fn frame(&self, index: usize) -> roistat_core::Result<Arc<Frame>> {
        match index {
            3 => Err(CoreError::InvalidFrame("corrupt frame".into())),
            5 => panic!("reader crashed"),
            _ => self.inner.frame(index),
        }
    }
}

#[test]
fn test_task_failures_are_reported_and_counted() {
    let stats = facade(4);
    let events = stats.subscribe();
    stats.set_dataset(Arc::new(FaultyDataset {
        inner: ramp_stack(8, 2, 2),
    }));
    stats.register_roi(full_rect("R", 2.0, 2.0)).unwrap();
    assert!(stats.wait_until_idle(WAIT));

    let (frames, _) = stats.get_timeseries("R");
    assert_eq!(frames, vec![0, 1, 2, 4, 6, 7]);
    let errors: Vec<String> = events
        .try_iter()
        .filter_map(|e| match e {
            EngineEvent::Error { message, .. } => Some(message),
            _ => None,
        })
        .collect();
    assert_eq!(errors.len(), 2);
    assert!(errors.iter().any(|m| m.contains("corrupt frame")));
    assert!(errors.iter().any(|m| m.contains("reader crashed")));
    assert!(errors
        .iter()
        .all(|m| m.starts_with("computation failed for ROI 'R'")));
    assert!(stats.engine().is_running());
}

#[test]
fn test_priority_job_uses_cached_geometry() {
    let stats = facade(2);
    // column index as intensity
    let data = Array3::from_shape_fn((4, 4, 6), |(_, _, c)| c as f32);
    stats.set_dataset(Arc::new(InMemoryStack::from_array(&data)));
    let left = full_rect("R", 2.0, 4.0);
    stats.register_roi(left.clone()).unwrap();
    assert!(stats.wait_until_idle(WAIT));

    stats.pause();
    let right = Roi {
        shape: RoiShape::Rectangle {
            origin: (4.0, 0.0),
            size: (2.0, 4.0),
        },
        ..left.clone()
    };
    assert!(stats.notify_geometry_changed(&right));
    // a snapshot taken before the change must not store a left-side mean
    let frame = stats.dataset().unwrap().frame(0).unwrap();
    stats.engine().submit_priority(0, frame, &[left]).unwrap();
    stats.resume();
    assert!(stats.wait_until_idle(WAIT));

    let (frames, values) = stats.get_timeseries("R");
    assert_eq!(frames, vec![0, 1, 2, 3]);
    for value in values {
        assert_relative_eq!(value, 4.5);
    }
}

/// Dataset that takes a while to read each frame.
struct SlowDataset {
    inner: Arc<InMemoryStack>,
    delay: Duration,
}

impl Dataset for SlowDataset {
    fn shape(&self) -> Vec<usize> {
        self.inner.shape()
    }

    fn frame(&self, index: usize) -> roistat_core::Result<Arc<Frame>> {
        std::thread::sleep(self.delay);
        self.inner.frame(index)
    }
}

#[test]
fn test_slow_chunks_time_out_softly() {
    let config = EngineConfig::default()
        .with_chunk_size(4)
        .with_worker_threads(2)
        .with_chunk_timeout(Duration::from_millis(1));
    let stats = RoiStatistics::new(config).unwrap();
    let events = stats.subscribe();
    stats.set_dataset(Arc::new(SlowDataset {
        inner: ramp_stack(12, 3, 3),
        delay: Duration::from_millis(20),
    }));
    stats.register_roi(full_rect("R", 3.0, 3.0)).unwrap();
    assert!(stats.wait_until_idle(WAIT));

    assert!(stats.cache().is_fully_computed("R"));
    let (frames, values) = stats.get_timeseries("R");
    assert_eq!(frames.len(), 12);
    for (frame, value) in frames.into_iter().zip(values) {
        assert_relative_eq!(value, frame as f32);
    }
    let events: Vec<EngineEvent> = events.try_iter().collect();
    assert!(events
        .iter()
        .any(|e| matches!(e, EngineEvent::BulkProgress { .. })));
    assert!(!events
        .iter()
        .any(|e| matches!(e, EngineEvent::Error { .. })));
}

#[test]
fn test_arc_filter_follows_engine_config() {
    // 1 below and right of the centre, 0 elsewhere
    let data = Array3::from_shape_fn((2, 21, 21), |(_, r, c)| {
        if r >= 10 && c >= 10 {
            1.0f32
        } else {
            0.0
        }
    });
    let arc = Roi::new(
        "A",
        RoiShape::Arc {
            center: (10.0, 10.0),
            inner_radius: 3.0,
            outer_radius: 5.0,
            start_angle: 0.0,
            end_angle: std::f64::consts::FRAC_PI_2,
        },
    );

    let mean_with = |config: EngineConfig| {
        let stats = RoiStatistics::new(config).unwrap();
        stats.set_dataset(Arc::new(InMemoryStack::from_array(&data)));
        stats.register_roi(arc.clone()).unwrap();
        assert!(stats.wait_until_idle(WAIT));
        let (frames, values) = stats.get_timeseries("A");
        assert_eq!(frames, vec![0, 1]);
        values[1]
    };

    let annulus = mean_with(EngineConfig::default().with_worker_threads(2));
    let sector = mean_with(
        EngineConfig::default()
            .with_worker_threads(2)
            .with_resolve_options(ResolveOptions::default().with_arc_angle_filter(true)),
    );
    assert!(annulus > 0.0 && annulus < 0.5);
    assert_relative_eq!(sector, 1.0);
}

#[test]
fn test_registration_during_dataset_swap_is_sized() {
    let stats = Arc::new(facade(4));
    stats.set_dataset(ramp_stack(3, 2, 2));
    let swapper = {
        let stats = Arc::clone(&stats);
        std::thread::spawn(move || stats.set_dataset(ramp_stack(9, 2, 2)))
    };
    for n in 0..20 {
        stats
            .register_roi(full_rect(&format!("R{n}"), 2.0, 2.0))
            .unwrap();
    }
    swapper.join().unwrap();
    assert!(stats.wait_until_idle(WAIT));

    let summary = stats.summary();
    assert_eq!(summary.len(), 20);
    for roi in summary {
        assert_eq!(roi.total_frames, 9, "{}", roi.name);
        assert_eq!(roi.computed, 9, "{}", roi.name);
    }
}
