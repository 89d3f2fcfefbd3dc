//! Background compute scheduler.
//!
//! One dispatch thread routes jobs to a rayon worker pool:
//!
//! - **Priority jobs** (current or live frame) are polled first every
//!   iteration and fan out one task per ROI.
//! - **Bulk jobs** backfill every missing frame of one ROI in fixed-size
//!   chunks. Before each chunk the dispatcher checks for queued priority
//!   work and, if any, puts the bulk job back at the head of the queue.
//!
//! The dispatcher never computes. It waits, bounded by the chunk timeout, on
//! a completion channel owned by the chunk it just submitted.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use rayon::{ThreadPool, ThreadPoolBuilder};
use roistat_core::{
    compute_statistic_with, DatasetHandle, Error as CoreError, Frame, Roi, SamplingPlan,
};

use crate::cache::StatCache;
use crate::config::EngineConfig;
use crate::event::{EngineEvent, EventBus};
use crate::{Error, Result};

const IDLE_CHECK_INTERVAL: Duration = Duration::from_millis(5);

/// Where the results of a priority job go.
#[derive(Debug, Clone, Copy)]
enum Target {
    Frame(usize),
    Live,
}

struct PriorityJob {
    target: Target,
    frame: Arc<Frame>,
    rois: Vec<(Roi, u64)>,
    /// Set by whichever side accounts for the job: the dispatcher running
    /// it, the shutdown drain, or a submit that lost the race with stop.
    claimed: Arc<AtomicBool>,
}

impl PriorityJob {
    fn claim(&self) -> bool {
        !self.claimed.swap(true, Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
struct BulkJob {
    roi: Roi,
    generation: u64,
}

enum Signal {
    Priority(PriorityJob),
    Wake,
}

struct Shared {
    config: EngineConfig,
    cache: Arc<StatCache>,
    events: Arc<EventBus>,
    pool: ThreadPool,
    dataset: RwLock<Option<DatasetHandle>>,
    bulk_queue: Mutex<VecDeque<BulkJob>>,
    running: AtomicBool,
    paused: AtomicBool,
    bulk_active: AtomicBool,
    /// Priority jobs sent but not yet picked up by the dispatcher.
    queued_priority: AtomicUsize,
    /// Priority tasks not yet finished.
    pending_priority: AtomicUsize,
    /// Worker tasks of any kind not yet finished.
    active_tasks: AtomicUsize,
}

/// Prioritized background computation of ROI statistics.
///
/// Results are written to the shared [`StatCache`] and announced on the
/// [`EventBus`]. Dropping the engine stops it.
pub struct ComputeEngine {
    shared: Arc<Shared>,
    signals: Sender<Signal>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl ComputeEngine {
    /// Builds the worker pool and starts the dispatch thread.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or the pool or
    /// dispatch thread cannot be created.
    pub fn start(
        config: EngineConfig,
        cache: Arc<StatCache>,
        events: Arc<EventBus>,
    ) -> Result<Self> {
        config.validate()?;
        let workers = config.effective_worker_threads();
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("roistat-worker-{i}"))
            .build()?;

        let shared = Arc::new(Shared {
            config,
            cache,
            events,
            pool,
            dataset: RwLock::new(None),
            bulk_queue: Mutex::new(VecDeque::new()),
            running: AtomicBool::new(true),
            paused: AtomicBool::new(false),
            bulk_active: AtomicBool::new(false),
            queued_priority: AtomicUsize::new(0),
            pending_priority: AtomicUsize::new(0),
            active_tasks: AtomicUsize::new(0),
        });

        let (signals, rx) = channel();
        let loop_shared = Arc::clone(&shared);
        let dispatcher = std::thread::Builder::new()
            .name("roistat-dispatch".to_string())
            .spawn(move || dispatch_loop(&loop_shared, &rx))?;

        info!("compute engine started with {workers} workers");
        Ok(Self {
            shared,
            signals,
            dispatcher: Mutex::new(Some(dispatcher)),
        })
    }

    /// Replaces the dataset bulk jobs read from.
    pub fn set_dataset(&self, dataset: Option<DatasetHandle>) {
        *self
            .shared
            .dataset
            .write()
            .unwrap_or_else(PoisonError::into_inner) = dataset;
    }

    /// Current dataset handle.
    #[must_use]
    pub fn dataset(&self) -> Option<DatasetHandle> {
        self.shared.dataset()
    }

    /// Computes every given ROI on one dataset frame.
    ///
    /// Only the names of `rois` are used: geometry and generation come from
    /// the cache in one lookup, so a geometry change that lands before the
    /// job runs cannot store a value for the old shape. ROIs the cache does
    /// not track are skipped.
    ///
    /// # Errors
    /// Returns [`Error::Stopped`] after [`Self::stop`].
    pub fn submit_priority(&self, frame_index: usize, frame: Arc<Frame>, rois: &[Roi]) -> Result<()> {
        self.submit(Target::Frame(frame_index), frame, rois)
    }

    /// Computes every given ROI on a live frame and appends to the live logs.
    ///
    /// Live jobs are processed one at a time, so each ROI's log follows
    /// submission order.
    ///
    /// # Errors
    /// Returns [`Error::Stopped`] after [`Self::stop`].
    pub fn submit_live(&self, frame: Arc<Frame>, rois: &[Roi]) -> Result<()> {
        self.submit(Target::Live, frame, rois)
    }

    fn submit(&self, target: Target, frame: Arc<Frame>, rois: &[Roi]) -> Result<()> {
        if !self.is_running() {
            return Err(Error::Stopped);
        }
        let rois: Vec<(Roi, u64)> = rois
            .iter()
            .filter_map(|roi| self.shared.cache.roi_with_generation(&roi.name))
            .collect();
        if rois.is_empty() {
            return Ok(());
        }

        let tasks = rois.len();
        self.shared.pending_priority.fetch_add(tasks, Ordering::SeqCst);
        self.shared.active_tasks.fetch_add(tasks, Ordering::SeqCst);
        self.shared.queued_priority.fetch_add(1, Ordering::SeqCst);
        let claimed = Arc::new(AtomicBool::new(false));
        let job = PriorityJob {
            target,
            frame,
            rois,
            claimed: Arc::clone(&claimed),
        };
        if self.signals.send(Signal::Priority(job)).is_err() {
            self.shared.release_priority(tasks);
            return Err(Error::Stopped);
        }
        // A stop between the running check and the send can leave the job in
        // a channel nobody reads any more.
        if !self.is_running() && !claimed.swap(true, Ordering::SeqCst) {
            self.shared.release_priority(tasks);
            return Err(Error::Stopped);
        }
        Ok(())
    }

    /// Queues a backfill of every missing frame of a tracked ROI.
    ///
    /// Returns false if the ROI is unknown, an identical job is already
    /// queued, or the engine is stopped.
    pub fn enqueue_bulk(&self, roi: &Roi) -> bool {
        if !self.is_running() {
            return false;
        }
        let Some(generation) = self.shared.cache.generation(&roi.name) else {
            return false;
        };
        {
            let mut queue = self.shared.queue();
            if queue
                .iter()
                .any(|job| job.roi.name == roi.name && job.generation == generation)
            {
                return false;
            }
            queue.push_back(BulkJob {
                roi: roi.clone(),
                generation,
            });
        }
        debug!("queued bulk job for '{}'", roi.name);
        // Wakes an idle dispatcher; failure means it has already exited.
        let _ = self.signals.send(Signal::Wake);
        true
    }

    /// Stops servicing bulk jobs. Priority jobs keep running.
    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::SeqCst);
        debug!("bulk processing paused");
    }

    /// Resumes bulk servicing.
    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::SeqCst);
        let _ = self.signals.send(Signal::Wake);
        debug!("bulk processing resumed");
    }

    /// Returns true while bulk servicing is paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::SeqCst)
    }

    /// Returns true until [`Self::stop`] is called.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Drops every queued bulk job. Priority work is kept.
    pub fn clear_queue(&self) {
        let dropped = {
            let mut queue = self.shared.queue();
            let n = queue.len();
            queue.clear();
            n
        };
        debug!("cleared {dropped} queued bulk jobs");
    }

    /// Number of queued bulk jobs.
    #[must_use]
    pub fn queue_size(&self) -> usize {
        self.shared.queue().len()
    }

    /// Number of priority tasks not yet finished.
    #[must_use]
    pub fn pending_priority(&self) -> usize {
        self.shared.pending_priority.load(Ordering::SeqCst)
    }

    /// Returns true when no job is queued or running.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        let queue = self.shared.queue();
        queue.is_empty()
            && !self.shared.bulk_active.load(Ordering::SeqCst)
            && self.shared.queued_priority.load(Ordering::SeqCst) == 0
            && self.shared.active_tasks.load(Ordering::SeqCst) == 0
    }

    /// Blocks until the engine is idle or `timeout` elapses.
    ///
    /// Returns true if the engine became idle.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_idle() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(IDLE_CHECK_INTERVAL);
        }
    }

    /// Stops the dispatch thread.
    ///
    /// Waits up to the shutdown timeout for running tasks, then drops every
    /// queued job. Safe to call more than once.
    pub fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let _ = self.signals.send(Signal::Wake);

        let deadline = Instant::now() + self.shared.config.shutdown_timeout();
        while self.shared.active_tasks.load(Ordering::SeqCst) > 0 && Instant::now() < deadline {
            std::thread::sleep(IDLE_CHECK_INTERVAL);
        }
        let outstanding = self.shared.active_tasks.load(Ordering::SeqCst);
        if outstanding > 0 {
            warn!("{outstanding} tasks still running after shutdown timeout");
        }

        self.clear_queue();
        let handle = self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("dispatch thread panicked");
            }
        }
        info!("compute engine stopped");
    }
}

impl Drop for ComputeEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Shared {
    fn queue(&self) -> MutexGuard<'_, VecDeque<BulkJob>> {
        self.bulk_queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn dataset(&self) -> Option<DatasetHandle> {
        self.dataset
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn has_bulk(&self) -> bool {
        !self.queue().is_empty()
    }

    fn pop_bulk(&self) -> Option<BulkJob> {
        let mut queue = self.queue();
        let job = queue.pop_front()?;
        self.bulk_active.store(true, Ordering::SeqCst);
        Some(job)
    }

    fn requeue_front(&self, job: BulkJob) {
        self.queue().push_front(job);
    }

    fn publish(&self, event: &EngineEvent) {
        self.events.publish(event);
    }

    /// Undoes the counters of a priority job that will never run.
    fn release_priority(&self, tasks: usize) {
        self.queued_priority.fetch_sub(1, Ordering::SeqCst);
        self.pending_priority.fetch_sub(tasks, Ordering::SeqCst);
        self.active_tasks.fetch_sub(tasks, Ordering::SeqCst);
    }

    fn report_failure(&self, roi: &str, message: impl Into<String>) {
        let err = CoreError::Computation {
            roi: roi.to_string(),
            message: message.into(),
        };
        self.report_error(roi, &err);
    }

    fn report_error(&self, roi: &str, err: &CoreError) {
        error!("ROI '{roi}': {err}");
        self.publish(&EngineEvent::Error {
            roi: roi.to_string(),
            message: err.to_string(),
        });
    }

    /// Waits for `expected` completions, bounded by the chunk timeout.
    fn wait_for(&self, done: &Receiver<()>, expected: usize, label: &str) -> bool {
        let deadline = Instant::now() + self.config.chunk_timeout();
        for finished in 0..expected {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if done.recv_timeout(remaining).is_err() {
                warn!("timed out waiting for {label}: {finished}/{expected} tasks finished");
                return false;
            }
        }
        true
    }

    fn run_priority(self: &Arc<Self>, job: PriorityJob) {
        let PriorityJob {
            target,
            frame,
            rois,
            ..
        } = job;
        let expected = rois.len();
        let (done_tx, done_rx) = channel();

        for (roi, generation) in rois {
            let shared = Arc::clone(self);
            let frame = Arc::clone(&frame);
            let done = done_tx.clone();
            self.pool.spawn(move || {
                let outcome = catch_unwind(AssertUnwindSafe(|| {
                    compute_statistic_with(&roi, frame.view(), &shared.config.resolve)
                }));
                match outcome {
                    Ok(value) => shared.record_priority(&roi.name, generation, target, value),
                    Err(panic) => shared.report_failure(&roi.name, panic_message(panic.as_ref())),
                }
                shared.pending_priority.fetch_sub(1, Ordering::SeqCst);
                shared.active_tasks.fetch_sub(1, Ordering::SeqCst);
                let _ = done.send(());
            });
        }
        drop(done_tx);

        if matches!(target, Target::Live) {
            self.wait_for(&done_rx, expected, "live frame");
        }
    }

    fn record_priority(&self, roi: &str, generation: u64, target: Target, value: f32) {
        match target {
            Target::Frame(frame) => {
                if !self.cache.set_mean_if_current(roi, generation, frame, value) {
                    debug!("priority result for '{roi}' frame {frame} not cached");
                }
                self.publish(&EngineEvent::CurrentFrameReady {
                    roi: roi.to_string(),
                    frame,
                    value,
                });
            }
            Target::Live => {
                if let Some(index) = self.cache.append_live_mean(roi, value) {
                    self.publish(&EngineEvent::LiveValueReady {
                        roi: roi.to_string(),
                        index,
                        value,
                    });
                }
            }
        }
    }

    fn run_bulk(self: &Arc<Self>, job: BulkJob) {
        let name = job.roi.name.clone();
        let Some(dataset) = self.dataset() else {
            self.report_error(&name, &CoreError::DatasetUnavailable);
            return;
        };
        match self.cache.generation(&name) {
            Some(current) if current == job.generation => {}
            Some(_) => {
                debug!("dropping stale bulk job for '{name}'");
                return;
            }
            None => {
                debug!("dropping bulk job for removed ROI '{name}'");
                return;
            }
        }

        let total = dataset.total_frames();
        let Some(dims) = dataset.frame_dims() else {
            let err = CoreError::InvalidFrame(format!(
                "dataset shape {:?} has no 2-D frames",
                dataset.shape()
            ));
            self.report_error(&name, &err);
            return;
        };
        let missing: Vec<usize> = self
            .cache
            .missing_frames(&name)
            .into_iter()
            .filter(|&i| i < total)
            .collect();
        if missing.is_empty() {
            self.publish(&EngineEvent::BulkComplete { roi: name });
            return;
        }

        let plan = match SamplingPlan::resolve(&job.roi.shape, dims, &self.config.resolve) {
            Ok(plan) => plan,
            Err(e) => {
                warn!("ROI '{name}' ({}): {e}", job.roi.kind());
                SamplingPlan::empty(dims)
            }
        };
        let plan = Arc::new(plan);
        let generation = job.generation;

        for chunk in missing.chunks(self.config.effective_chunk_size()) {
            if !self.running.load(Ordering::SeqCst) {
                return;
            }
            if self.queued_priority.load(Ordering::SeqCst) > 0 || self.paused.load(Ordering::SeqCst)
            {
                debug!("bulk job for '{name}' yields at frame {}", chunk[0]);
                self.requeue_front(job);
                return;
            }

            let (done_tx, done_rx) = channel();
            for &index in chunk {
                self.active_tasks.fetch_add(1, Ordering::SeqCst);
                let shared = Arc::clone(self);
                let dataset = Arc::clone(&dataset);
                let plan = Arc::clone(&plan);
                let name = name.clone();
                let done = done_tx.clone();
                self.pool.spawn(move || {
                    let outcome = catch_unwind(AssertUnwindSafe(|| {
                        dataset
                            .frame(index)
                            .and_then(|frame| plan.mean(frame.view()))
                    }));
                    match outcome {
                        Ok(Ok(value)) => {
                            shared.cache.set_mean_if_current(&name, generation, index, value);
                        }
                        Ok(Err(e)) => shared.report_failure(&name, format!("frame {index}: {e}")),
                        Err(panic) => shared.report_failure(
                            &name,
                            format!("frame {index}: {}", panic_message(panic.as_ref())),
                        ),
                    }
                    shared.active_tasks.fetch_sub(1, Ordering::SeqCst);
                    let _ = done.send(());
                });
            }
            drop(done_tx);

            self.wait_for(&done_rx, chunk.len(), &format!("bulk chunk of '{name}'"));
            let (done, total) = self.cache.progress(&name).unwrap_or((0, total));
            self.publish(&EngineEvent::BulkProgress {
                roi: name.clone(),
                done,
                total,
            });
        }

        if self.cache.generation(&name) == Some(generation) {
            self.publish(&EngineEvent::BulkComplete { roi: name });
        }
    }

    fn drain(&self, rx: &Receiver<Signal>) {
        let mut dropped = 0usize;
        for signal in rx.try_iter() {
            if let Signal::Priority(job) = signal {
                if job.claim() {
                    self.release_priority(job.rois.len());
                    dropped += 1;
                }
            }
        }
        self.queue().clear();
        if dropped > 0 {
            debug!("dropped {dropped} queued priority jobs on shutdown");
        }
    }
}

fn dispatch_loop(shared: &Arc<Shared>, rx: &Receiver<Signal>) {
    while shared.running.load(Ordering::SeqCst) {
        let paused = shared.paused.load(Ordering::SeqCst);
        let wait = if paused {
            shared.config.idle_backoff()
        } else if shared.has_bulk() {
            shared.config.priority_poll()
        } else {
            shared.config.bulk_poll()
        };

        match rx.recv_timeout(wait) {
            Ok(Signal::Priority(job)) => {
                if job.claim() {
                    shared.queued_priority.fetch_sub(1, Ordering::SeqCst);
                    shared.run_priority(job);
                }
                continue;
            }
            Ok(Signal::Wake) | Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if !shared.running.load(Ordering::SeqCst) || shared.paused.load(Ordering::SeqCst) {
            continue;
        }
        if let Some(job) = shared.pop_bulk() {
            shared.run_bulk(job);
            shared.bulk_active.store(false, Ordering::SeqCst);
        }
    }
    shared.drain(rx);
    debug!("dispatch loop exited");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("worker panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("worker panicked: {s}")
    } else {
        "worker panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roistat_core::{InMemoryStack, RoiShape};

    const WAIT: Duration = Duration::from_secs(10);

    fn engine(chunk_size: usize) -> (ComputeEngine, Arc<StatCache>, Receiver<EngineEvent>) {
        let cache = Arc::new(StatCache::new());
        let events = Arc::new(EventBus::new());
        let rx = events.subscribe();
        let config = EngineConfig::default()
            .with_chunk_size(chunk_size)
            .with_worker_threads(2);
        let engine = ComputeEngine::start(config, Arc::clone(&cache), events).unwrap();
        (engine, cache, rx)
    }

    fn stack(frames: usize, value: f32) -> DatasetHandle {
        let stack = InMemoryStack::new(4, 4);
        for _ in 0..frames {
            stack.push_frame(Frame::from_elem((4, 4), value)).unwrap();
        }
        Arc::new(stack)
    }

    fn full_frame() -> Roi {
        Roi::new(
            "R",
            RoiShape::Rectangle {
                origin: (0.0, 0.0),
                size: (4.0, 4.0),
            },
        )
    }

    #[test]
    fn test_bulk_fills_every_frame() {
        let (engine, cache, rx) = engine(3);
        let dataset = stack(10, 5.0);
        cache.add_roi(full_frame(), dataset.total_frames());
        engine.set_dataset(Some(dataset));

        assert!(engine.enqueue_bulk(&full_frame()));
        assert!(engine.wait_until_idle(WAIT));
        assert!(cache.is_fully_computed("R"));
        assert_eq!(cache.get_mean("R", 9), Some(5.0));

        let events: Vec<EngineEvent> = rx.try_iter().collect();
        assert!(events.contains(&EngineEvent::BulkComplete { roi: "R".into() }));
        assert!(events.contains(&EngineEvent::BulkProgress {
            roi: "R".into(),
            done: 10,
            total: 10,
        }));
    }

    #[test]
    fn test_bulk_without_dataset_reports_error() {
        let (engine, cache, rx) = engine(3);
        cache.add_roi(full_frame(), 0);
        assert!(engine.enqueue_bulk(&full_frame()));
        assert!(engine.wait_until_idle(WAIT));
        let event = rx.recv_timeout(WAIT).unwrap();
        assert!(matches!(event, EngineEvent::Error { ref roi, .. } if roi == "R"));
    }

    #[test]
    fn test_unknown_roi_not_queued() {
        let (engine, _cache, _rx) = engine(3);
        assert!(!engine.enqueue_bulk(&full_frame()));
        assert_eq!(engine.queue_size(), 0);
    }

    #[test]
    fn test_paused_engine_keeps_bulk_queued() {
        let (engine, cache, _rx) = engine(3);
        let dataset = stack(4, 1.0);
        cache.add_roi(full_frame(), 4);
        engine.set_dataset(Some(dataset));

        engine.pause();
        assert!(engine.is_paused());
        engine.enqueue_bulk(&full_frame());
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(cache.progress("R"), Some((0, 4)));
        assert_eq!(engine.queue_size(), 1);

        // priority work still runs while paused
        let frame = Arc::new(Frame::from_elem((4, 4), 8.0));
        engine.submit_priority(2, frame, &[full_frame()]).unwrap();
        let deadline = Instant::now() + WAIT;
        while engine.pending_priority() > 0 && Instant::now() < deadline {
            std::thread::sleep(IDLE_CHECK_INTERVAL);
        }
        assert_eq!(cache.get_mean("R", 2), Some(8.0));
        assert_eq!(cache.progress("R"), Some((1, 4)));

        engine.clear_queue();
        assert_eq!(engine.queue_size(), 0);
        engine.resume();
        assert!(engine.wait_until_idle(WAIT));
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (engine, cache, _rx) = engine(3);
        cache.add_roi(full_frame(), 0);
        engine.stop();
        engine.stop();
        assert!(!engine.is_running());
        assert!(!engine.enqueue_bulk(&full_frame()));
        let frame = Arc::new(Frame::zeros((4, 4)));
        assert!(matches!(
            engine.submit_priority(0, frame, &[full_frame()]),
            Err(Error::Stopped)
        ));
    }

    #[test]
    fn test_submit_racing_stop_leaves_engine_idle() {
        for _ in 0..10 {
            let (engine, cache, _rx) = engine(3);
            cache.add_roi(full_frame(), 1);
            let engine = Arc::new(engine);
            let submitter = {
                let engine = Arc::clone(&engine);
                std::thread::spawn(move || {
                    let frame = Arc::new(Frame::zeros((4, 4)));
                    while engine
                        .submit_priority(0, Arc::clone(&frame), &[full_frame()])
                        .is_ok()
                    {}
                })
            };
            std::thread::sleep(Duration::from_millis(5));
            engine.stop();
            submitter.join().unwrap();
            assert!(engine.wait_until_idle(WAIT));
            assert_eq!(engine.pending_priority(), 0);
        }
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "worker panicked: boom");
    }
}
