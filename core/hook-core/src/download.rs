//! Aggregates download notifications into the five download events.
//!
//! The tracker sits behind the `postNotification`/`retractNotification`
//! interceptions. Pulling metadata out of a raw notification is host-specific
//! and lives behind [`NotificationDecoder`]; the tracker only keeps the set of
//! in-flight downloads and derives count, current filename, aggregate progress,
//! completion and cancellation from it.

use overlay_protocol::DownloadEvent;
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::host::{CallFrame, NotificationObserver};
use crate::router::DownloadEvents;

/// Download metadata decoded from one notification.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadNotification {
    pub key: String,
    pub filename: String,
    /// `None` for indeterminate progress.
    pub progress: Option<f32>,
    pub finished: bool,
}

pub trait NotificationDecoder: Send + Sync {
    /// Returns `None` for notifications that are not downloads.
    fn decode(&self, frame: &CallFrame<'_>) -> Option<DownloadNotification>;
}

struct Entry {
    filename: String,
    progress: Option<f32>,
    seq: u64,
}

#[derive(Default)]
struct TrackerState {
    active: BTreeMap<String, Entry>,
    next_seq: u64,
    last_filename: Option<String>,
    last_count: u32,
}

impl TrackerState {
    fn count(&self) -> u32 {
        self.active.len() as u32
    }

    /// Filename of the most recently started download still in flight.
    fn current_filename(&self) -> Option<String> {
        self.active
            .values()
            .max_by_key(|e| e.seq)
            .map(|e| e.filename.clone())
    }

    fn mean_progress(&self) -> Option<f32> {
        let known: Vec<f32> = self.active.values().filter_map(|e| e.progress).collect();
        if known.is_empty() {
            return None;
        }
        Some(known.iter().sum::<f32>() / known.len() as f32)
    }

    /// Events describing the aggregate after a change.
    fn summary_events(&mut self, events: &mut Vec<DownloadEvent>) {
        let count = self.count();
        if count != self.last_count {
            self.last_count = count;
            events.push(DownloadEvent::ActiveCountChanged { count });
        }
        let filename = self.current_filename();
        if filename != self.last_filename {
            events.push(DownloadEvent::FilenameChanged {
                name: filename.clone().unwrap_or_default(),
            });
            self.last_filename = filename;
        }
        if let Some(progress) = self.mean_progress() {
            events.push(DownloadEvent::ProgressChanged { progress });
        }
    }

    /// The whole aggregate, regardless of what was emitted before.
    fn full_summary(&mut self) -> Vec<DownloadEvent> {
        self.last_count = self.count();
        self.last_filename = self.current_filename();
        let mut events = vec![
            DownloadEvent::ActiveCountChanged {
                count: self.last_count,
            },
            DownloadEvent::FilenameChanged {
                name: self.last_filename.clone().unwrap_or_default(),
            },
        ];
        if let Some(progress) = self.mean_progress() {
            events.push(DownloadEvent::ProgressChanged { progress });
        }
        events
    }
}

pub struct DownloadTracker {
    decoder: Box<dyn NotificationDecoder>,
    events: DownloadEvents,
    state: Mutex<TrackerState>,
}

impl DownloadTracker {
    pub fn new(decoder: Box<dyn NotificationDecoder>, events: DownloadEvents) -> Self {
        Self {
            decoder,
            events,
            state: Mutex::new(TrackerState::default()),
        }
    }

    pub fn active_count(&self) -> u32 {
        self.lock().count()
    }

    pub fn posted(&self, notification: DownloadNotification) {
        let events = {
            let mut state = self.lock();
            let mut events = Vec::new();
            if notification.finished {
                if state.active.remove(&notification.key).is_none() {
                    return;
                }
                events.push(DownloadEvent::Complete);
            } else {
                let seq = match state.active.get(&notification.key) {
                    Some(existing) => existing.seq,
                    None => {
                        state.next_seq += 1;
                        state.next_seq
                    }
                };
                state.active.insert(
                    notification.key,
                    Entry {
                        filename: notification.filename,
                        progress: notification.progress,
                        seq,
                    },
                );
            }
            state.summary_events(&mut events);
            events
        };
        self.dispatch(events);
    }

    pub fn retracted(&self, key: &str) {
        let events = {
            let mut state = self.lock();
            if state.active.remove(key).is_none() {
                return;
            }
            let mut events = vec![DownloadEvent::Cancelled];
            state.summary_events(&mut events);
            events
        };
        self.dispatch(events);
    }

    /// Re-emits count, filename and progress. A freshly attached overlay has
    /// seen none of the earlier changes.
    pub fn replay(&self) {
        let events = self.lock().full_summary();
        self.dispatch(events);
    }

    // Emit outside the lock: consumers may call back into the tracker.
    fn dispatch(&self, events: Vec<DownloadEvent>) {
        for event in events {
            self.events.emit(event);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        // Recover from poisoning - worst case the aggregate is briefly off
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl NotificationObserver for DownloadTracker {
    fn on_posted(&self, frame: &CallFrame<'_>) {
        if let Some(notification) = self.decoder.decode(frame) {
            self.posted(notification);
        }
    }

    fn on_retracted(&self, frame: &CallFrame<'_>) {
        if let Some(notification) = self.decoder.decode(frame) {
            self.retracted(&notification.key);
        }
    }

    fn on_overlay_attached(&self) {
        self.replay();
    }
}
