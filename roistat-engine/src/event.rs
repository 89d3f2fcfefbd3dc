//! Typed engine events and the subscriber bus.

use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Mutex, PoisonError};

/// Events published by the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A priority (current frame) result was written to the cache.
    CurrentFrameReady {
        /// ROI name.
        roi: String,
        /// Dataset frame index.
        frame: usize,
        /// Mean intensity.
        value: f32,
    },
    /// A live-capture value was appended to the live log.
    LiveValueReady {
        /// ROI name.
        roi: String,
        /// Position in the live log.
        index: usize,
        /// Mean intensity.
        value: f32,
    },
    /// A bulk chunk finished.
    BulkProgress {
        /// ROI name.
        roi: String,
        /// Frames computed so far.
        done: usize,
        /// Frames in the dataset.
        total: usize,
    },
    /// Every frame of a bulk job is computed.
    BulkComplete {
        /// ROI name.
        roi: String,
    },
    /// A task or job failed.
    Error {
        /// ROI name.
        roi: String,
        /// Human-readable failure.
        message: String,
    },
}

impl EngineEvent {
    /// ROI the event refers to.
    #[must_use]
    pub fn roi(&self) -> &str {
        match self {
            EngineEvent::CurrentFrameReady { roi, .. }
            | EngineEvent::LiveValueReady { roi, .. }
            | EngineEvent::BulkProgress { roi, .. }
            | EngineEvent::BulkComplete { roi }
            | EngineEvent::Error { roi, .. } => roi,
        }
    }
}

/// Fan-out of [`EngineEvent`]s to any number of subscribers.
///
/// Subscribers whose receiver has been dropped are pruned on the next publish.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<EngineEvent>>>,
}

impl EventBus {
    /// Creates a bus with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new subscriber and returns its receiving end.
    pub fn subscribe(&self) -> Receiver<EngineEvent> {
        let (tx, rx) = channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Sends an event to every live subscriber.
    pub fn publish(&self, event: &EngineEvent) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Number of connected subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_subscriber_receives() {
        let bus = EventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();
        bus.publish(&EngineEvent::BulkComplete { roi: "A".into() });
        assert_eq!(a.try_recv().unwrap().roi(), "A");
        assert_eq!(b.try_recv().unwrap().roi(), "A");
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let bus = EventBus::new();
        let keep = bus.subscribe();
        drop(bus.subscribe());
        assert_eq!(bus.subscriber_count(), 2);
        bus.publish(&EngineEvent::BulkComplete { roi: "A".into() });
        assert_eq!(bus.subscriber_count(), 1);
        assert!(keep.try_recv().is_ok());
    }
}
