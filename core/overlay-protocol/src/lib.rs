//! Event and overlay mutation vocabulary shared by the hook orchestrator,
//! its event producers, and the scenario runner.
//!
//! Keeping these types in one crate prevents drift between what producers
//! emit and what the router knows how to deliver.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of routed event kinds (five download, six preference).
pub const EVENT_KIND_COUNT: usize = 11;

/// Which external collaborator owns an event slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProducerGroup {
    Download,
    Preference,
}

/// Tag for each routed event slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ProgressChanged,
    DownloadComplete,
    DownloadCancelled,
    ActiveCountChanged,
    FilenameChanged,
    AppVisibilityChanged,
    TestProgressChanged,
    PreviewTriggered,
    GeometryPreviewTriggered,
    TestDownloadComplete,
    TestErrorChanged,
}

impl EventKind {
    pub const ALL: [EventKind; EVENT_KIND_COUNT] = [
        EventKind::ProgressChanged,
        EventKind::DownloadComplete,
        EventKind::DownloadCancelled,
        EventKind::ActiveCountChanged,
        EventKind::FilenameChanged,
        EventKind::AppVisibilityChanged,
        EventKind::TestProgressChanged,
        EventKind::PreviewTriggered,
        EventKind::GeometryPreviewTriggered,
        EventKind::TestDownloadComplete,
        EventKind::TestErrorChanged,
    ];

    /// Stable slot index in `0..EVENT_KIND_COUNT`.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn group(self) -> ProducerGroup {
        match self {
            EventKind::ProgressChanged
            | EventKind::DownloadComplete
            | EventKind::DownloadCancelled
            | EventKind::ActiveCountChanged
            | EventKind::FilenameChanged => ProducerGroup::Download,
            EventKind::AppVisibilityChanged
            | EventKind::TestProgressChanged
            | EventKind::PreviewTriggered
            | EventKind::GeometryPreviewTriggered
            | EventKind::TestDownloadComplete
            | EventKind::TestErrorChanged => ProducerGroup::Preference,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::ProgressChanged => "progress_changed",
            EventKind::DownloadComplete => "download_complete",
            EventKind::DownloadCancelled => "download_cancelled",
            EventKind::ActiveCountChanged => "active_count_changed",
            EventKind::FilenameChanged => "filename_changed",
            EventKind::AppVisibilityChanged => "app_visibility_changed",
            EventKind::TestProgressChanged => "test_progress_changed",
            EventKind::PreviewTriggered => "preview_triggered",
            EventKind::GeometryPreviewTriggered => "geometry_preview_triggered",
            EventKind::TestDownloadComplete => "test_download_complete",
            EventKind::TestErrorChanged => "test_error_changed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events emitted by the download/notification producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum DownloadEvent {
    ProgressChanged { progress: f32 },
    Complete,
    Cancelled,
    ActiveCountChanged { count: u32 },
    FilenameChanged { name: String },
}

/// Events emitted by the preference layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum PreferenceEvent {
    AppVisibilityChanged { visible: bool },
    TestProgressChanged { progress: f32 },
    PreviewTriggered,
    GeometryPreviewTriggered,
    DownloadComplete,
    TestErrorChanged { is_error: bool },
}

/// Any event delivered through an event slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "group", content = "event", rename_all = "snake_case")]
pub enum RoutedEvent {
    Download(DownloadEvent),
    Preference(PreferenceEvent),
}

impl RoutedEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            RoutedEvent::Download(event) => match event {
                DownloadEvent::ProgressChanged { .. } => EventKind::ProgressChanged,
                DownloadEvent::Complete => EventKind::DownloadComplete,
                DownloadEvent::Cancelled => EventKind::DownloadCancelled,
                DownloadEvent::ActiveCountChanged { .. } => EventKind::ActiveCountChanged,
                DownloadEvent::FilenameChanged { .. } => EventKind::FilenameChanged,
            },
            RoutedEvent::Preference(event) => match event {
                PreferenceEvent::AppVisibilityChanged { .. } => EventKind::AppVisibilityChanged,
                PreferenceEvent::TestProgressChanged { .. } => EventKind::TestProgressChanged,
                PreferenceEvent::PreviewTriggered => EventKind::PreviewTriggered,
                PreferenceEvent::GeometryPreviewTriggered => EventKind::GeometryPreviewTriggered,
                PreferenceEvent::DownloadComplete => EventKind::TestDownloadComplete,
                PreferenceEvent::TestErrorChanged { .. } => EventKind::TestErrorChanged,
            },
        }
    }

    /// Rejects payloads no producer should ever emit.
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        let progress = match self {
            RoutedEvent::Download(DownloadEvent::ProgressChanged { progress })
            | RoutedEvent::Preference(PreferenceEvent::TestProgressChanged { progress }) => {
                Some(*progress)
            }
            _ => None,
        };
        if let Some(progress) = progress {
            if !progress.is_finite() || !(0.0..=1.0).contains(&progress) {
                return Err(ErrorInfo::new(
                    "invalid_progress",
                    format!("progress must be within 0.0..=1.0, got {}", progress),
                ));
            }
        }
        Ok(())
    }
}

impl From<DownloadEvent> for RoutedEvent {
    fn from(event: DownloadEvent) -> Self {
        RoutedEvent::Download(event)
    }
}

impl From<PreferenceEvent> for RoutedEvent {
    fn from(event: PreferenceEvent) -> Self {
        RoutedEvent::Preference(event)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// One mutation applied to the overlay on its owning thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum OverlayMutation {
    SetProgress { progress: f32 },
    SetActiveCount { count: u32 },
    SetFilename { name: String },
    SetAppVisible { visible: bool },
    SetPowerSaveActive { active: bool },
    ShowError { visible: bool },
    CompletionPulse,
    StartPreview,
    ShowGeometryPreview,
}

/// Observable overlay state after applying mutations in order.
///
/// Renderers keep their own state; this is what the recording sink and the
/// scenario runner report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverlayState {
    pub progress: f32,
    pub active_count: u32,
    pub filename: Option<String>,
    pub app_visible: bool,
    pub power_save_active: bool,
    pub error_visible: bool,
    pub completion_pulses: u32,
    pub previews_started: u32,
    pub geometry_previews: u32,
}

impl OverlayState {
    pub fn apply(&mut self, mutation: &OverlayMutation) {
        match mutation {
            OverlayMutation::SetProgress { progress } => self.progress = *progress,
            OverlayMutation::SetActiveCount { count } => self.active_count = *count,
            OverlayMutation::SetFilename { name } => {
                self.filename = if name.is_empty() {
                    None
                } else {
                    Some(name.clone())
                }
            }
            OverlayMutation::SetAppVisible { visible } => self.app_visible = *visible,
            OverlayMutation::SetPowerSaveActive { active } => self.power_save_active = *active,
            OverlayMutation::ShowError { visible } => self.error_visible = *visible,
            OverlayMutation::CompletionPulse => self.completion_pulses += 1,
            OverlayMutation::StartPreview => self.previews_started += 1,
            OverlayMutation::ShowGeometryPreview => self.geometry_previews += 1,
        }
    }
}
