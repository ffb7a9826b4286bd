//! Routes producer events to the overlay.
//!
//! Every consumer reads the current overlay record, drops the event if there
//! is none, and otherwise posts exactly one mutation to the overlay's owning
//! thread. Completion events additionally request a haptic pulse. Delivery is
//! fire-and-forget: producers get no acknowledgment and no backpressure.

use overlay_protocol::{DownloadEvent, EventKind, OverlayMutation, PreferenceEvent, RoutedEvent};
use std::sync::Arc;

use crate::attachment::AttachmentState;
use crate::haptics::HapticFeedback;
use crate::slots::{EventHandler, EventSlots};

/// The one mutation each event maps to.
pub fn mutation_for(event: &RoutedEvent) -> OverlayMutation {
    match event {
        RoutedEvent::Download(event) => match event {
            DownloadEvent::ProgressChanged { progress } => OverlayMutation::SetProgress {
                progress: sanitize_progress(*progress),
            },
            DownloadEvent::Complete => OverlayMutation::CompletionPulse,
            DownloadEvent::Cancelled => OverlayMutation::ShowError { visible: true },
            DownloadEvent::ActiveCountChanged { count } => {
                OverlayMutation::SetActiveCount { count: *count }
            }
            DownloadEvent::FilenameChanged { name } => {
                OverlayMutation::SetFilename { name: name.clone() }
            }
        },
        RoutedEvent::Preference(event) => match event {
            PreferenceEvent::AppVisibilityChanged { visible } => {
                OverlayMutation::SetAppVisible { visible: *visible }
            }
            PreferenceEvent::TestProgressChanged { progress } => OverlayMutation::SetProgress {
                progress: sanitize_progress(*progress),
            },
            PreferenceEvent::PreviewTriggered => OverlayMutation::StartPreview,
            PreferenceEvent::GeometryPreviewTriggered => OverlayMutation::ShowGeometryPreview,
            PreferenceEvent::DownloadComplete => OverlayMutation::CompletionPulse,
            PreferenceEvent::TestErrorChanged { is_error } => {
                OverlayMutation::ShowError { visible: *is_error }
            }
        },
    }
}

pub fn triggers_haptic(kind: EventKind) -> bool {
    matches!(
        kind,
        EventKind::DownloadComplete | EventKind::TestDownloadComplete
    )
}

fn sanitize_progress(progress: f32) -> f32 {
    if progress.is_finite() {
        progress.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

#[derive(Clone)]
pub struct EventRouter {
    state: Arc<AttachmentState>,
    slots: Arc<EventSlots>,
    haptics: HapticFeedback,
}

impl EventRouter {
    pub fn new(state: Arc<AttachmentState>, slots: Arc<EventSlots>, haptics: HapticFeedback) -> Self {
        Self {
            state,
            slots,
            haptics,
        }
    }

    /// Binds a consumer to each of the eleven slots, replacing earlier bindings.
    pub fn wire_callbacks(&self) {
        for kind in EventKind::ALL {
            self.slots.bind(kind, self.consumer());
        }
        tracing::debug!(slots = self.slots.bound_count(), "Event consumers wired");
    }

    // Consumers capture only the state and haptics; capturing the slot table
    // would make every bound handler keep the table alive.
    fn consumer(&self) -> EventHandler {
        let state = Arc::clone(&self.state);
        let haptics = self.haptics.clone();
        Arc::new(move |event: RoutedEvent| {
            route(&state, &haptics, event);
        })
    }

    /// Pushes an OS power-save change to the overlay.
    pub fn route_power_save(&self, active: bool) -> bool {
        let Some(attached) = self.state.current() else {
            return false;
        };
        attached
            .overlay
            .post(OverlayMutation::SetPowerSaveActive { active })
    }
}

/// Delivers one event. Returns false if it was dropped because nothing is attached.
fn route(state: &AttachmentState, haptics: &HapticFeedback, event: RoutedEvent) -> bool {
    let Some(attached) = state.current() else {
        tracing::trace!(kind = %event.kind(), "Overlay not attached; event dropped");
        return false;
    };
    let kind = event.kind();
    attached.overlay.post(mutation_for(&event));
    if triggers_haptic(kind) {
        haptics.trigger(attached.context.as_ref());
    }
    true
}

/// Handle given to the download producer.
#[derive(Clone)]
pub struct DownloadEvents {
    slots: Arc<EventSlots>,
}

impl DownloadEvents {
    pub fn new(slots: Arc<EventSlots>) -> Self {
        Self { slots }
    }

    pub fn on_progress_changed(&self, progress: f32) {
        self.emit(DownloadEvent::ProgressChanged { progress });
    }

    pub fn on_download_complete(&self) {
        self.emit(DownloadEvent::Complete);
    }

    pub fn on_download_cancelled(&self) {
        self.emit(DownloadEvent::Cancelled);
    }

    pub fn on_active_count_changed(&self, count: u32) {
        self.emit(DownloadEvent::ActiveCountChanged { count });
    }

    pub fn on_filename_changed(&self, name: &str) {
        self.emit(DownloadEvent::FilenameChanged {
            name: name.to_string(),
        });
    }

    pub fn emit(&self, event: DownloadEvent) {
        self.slots.emit(event.into());
    }
}

/// Handle given to the preference layer.
#[derive(Clone)]
pub struct PreferenceEvents {
    slots: Arc<EventSlots>,
}

impl PreferenceEvents {
    pub fn new(slots: Arc<EventSlots>) -> Self {
        Self { slots }
    }

    pub fn on_app_visibility_changed(&self, visible: bool) {
        self.emit(PreferenceEvent::AppVisibilityChanged { visible });
    }

    pub fn on_test_progress_changed(&self, progress: f32) {
        self.emit(PreferenceEvent::TestProgressChanged { progress });
    }

    pub fn on_preview_triggered(&self) {
        self.emit(PreferenceEvent::PreviewTriggered);
    }

    pub fn on_geometry_preview_triggered(&self) {
        self.emit(PreferenceEvent::GeometryPreviewTriggered);
    }

    pub fn on_download_complete(&self) {
        self.emit(PreferenceEvent::DownloadComplete);
    }

    pub fn on_test_error_changed(&self, is_error: bool) {
        self.emit(PreferenceEvent::TestErrorChanged { is_error });
    }

    pub fn emit(&self, event: PreferenceEvent) {
        self.slots.emit(event.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_maps_to_a_mutation() {
        let events: Vec<RoutedEvent> = vec![
            DownloadEvent::ProgressChanged { progress: 0.5 }.into(),
            DownloadEvent::Complete.into(),
            DownloadEvent::Cancelled.into(),
            DownloadEvent::ActiveCountChanged { count: 2 }.into(),
            DownloadEvent::FilenameChanged {
                name: "a.zip".to_string(),
            }
            .into(),
            PreferenceEvent::AppVisibilityChanged { visible: true }.into(),
            PreferenceEvent::TestProgressChanged { progress: 0.25 }.into(),
            PreferenceEvent::PreviewTriggered.into(),
            PreferenceEvent::GeometryPreviewTriggered.into(),
            PreferenceEvent::DownloadComplete.into(),
            PreferenceEvent::TestErrorChanged { is_error: true }.into(),
        ];
        let kinds: Vec<_> = events.iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, EventKind::ALL.to_vec());

        assert_eq!(
            mutation_for(&events[3]),
            OverlayMutation::SetActiveCount { count: 2 }
        );
        assert_eq!(mutation_for(&events[9]), OverlayMutation::CompletionPulse);
        assert_eq!(
            mutation_for(&events[10]),
            OverlayMutation::ShowError { visible: true }
        );
    }

    #[test]
    fn test_progress_is_clamped() {
        let event: RoutedEvent = DownloadEvent::ProgressChanged { progress: 3.0 }.into();
        assert_eq!(
            mutation_for(&event),
            OverlayMutation::SetProgress { progress: 1.0 }
        );
        let event: RoutedEvent = PreferenceEvent::TestProgressChanged {
            progress: f32::NAN,
        }
        .into();
        assert_eq!(
            mutation_for(&event),
            OverlayMutation::SetProgress { progress: 0.0 }
        );
    }

    #[test]
    fn test_only_completions_trigger_haptics() {
        let haptic: Vec<_> = EventKind::ALL
            .into_iter()
            .filter(|k| triggers_haptic(*k))
            .collect();
        assert_eq!(
            haptic,
            vec![EventKind::DownloadComplete, EventKind::TestDownloadComplete]
        );
    }
}
