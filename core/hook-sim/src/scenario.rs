//! Scripted host scenarios.
//!
//! A scenario describes the simulated host (loaded types, the status-bar
//! context, vibrator, haptic preference) and a list of steps replayed in
//! order. Notification methods are fired with a single notification argument,
//! so a registry built from the configured targets declares them with arity 1
//! unless the target pins another arity.

use hook_core::sim::{
    download_notification, FieldDecoder, RecordingOverlayFactory, SimContext, SimInterceptor,
    SimObject, SimRegistry, SimVibrator, StaticPreference,
};
use hook_core::{
    AttachmentSnapshot, DownloadTracker, HookConfig, HookOrchestrator, HookReport,
    HostValue, TargetMethodSpec,
};
use overlay_protocol::{DownloadEvent, ErrorInfo, OverlayState, PreferenceEvent, RoutedEvent};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error("Failed to read scenario: {0}")]
    Read(#[from] std::io::Error),

    #[error("Invalid scenario: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Step {step}: {info}")]
    InvalidEvent { step: usize, info: ErrorInfo },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MethodDecl {
    pub name: String,
    pub arity: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TypeDecl {
    pub name: String,
    #[serde(default)]
    pub methods: Vec<MethodDecl>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ContextDecl {
    pub label: String,
    pub power_save: bool,
    pub power_service: bool,
    pub vibrator: bool,
    pub fail_power_registration: bool,
}

impl Default for ContextDecl {
    fn default() -> Self {
        Self {
            label: "systemui".to_string(),
            power_save: false,
            power_service: true,
            vibrator: true,
            fail_power_registration: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case", deny_unknown_fields)]
pub enum Step {
    /// Process-load signal: installs the interception points.
    Load,
    /// Host calls `start()` on the status-bar object.
    Start {
        /// Fire with a receiver that lacks the context field.
        #[serde(default)]
        without_context: bool,
    },
    PostNotification {
        key: String,
        #[serde(default)]
        title: String,
        #[serde(default)]
        progress: Option<f64>,
        #[serde(default)]
        finished: bool,
    },
    RetractNotification {
        key: String,
    },
    Download {
        event: DownloadEvent,
    },
    Preference {
        event: PreferenceEvent,
    },
    PowerSave {
        active: bool,
    },
    Detach,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    /// Loaded types. Defaults to the configured targets.
    #[serde(default)]
    pub registry: Option<Vec<TypeDecl>>,
    #[serde(default)]
    pub context: ContextDecl,
    #[serde(default = "default_haptics")]
    pub haptic_on_complete: bool,
    pub steps: Vec<Step>,
}

fn default_haptics() -> bool {
    true
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self, ScenarioError> {
        let content = fs_err::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn build_registry(&self, config: &HookConfig) -> SimRegistry {
        match &self.registry {
            Some(types) => types.iter().fold(SimRegistry::new(), |registry, ty| {
                ty.methods.iter().fold(registry.with_type(&ty.name), |r, m| {
                    r.with_method(&ty.name, &m.name, m.arity)
                })
            }),
            None => {
                let declare = |registry: SimRegistry, spec: &TargetMethodSpec, arity: usize| {
                    registry.with_method(&spec.type_name, &spec.method, spec.arity.unwrap_or(arity))
                };
                let registry = declare(SimRegistry::new(), &config.start, 0);
                let registry = declare(registry, &config.post_notification, 1);
                declare(registry, &config.retract_notification, 1)
            }
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RunSummary {
    /// One report per `load` step.
    pub hooks: Vec<HookReport>,
    pub attachment: AttachmentSnapshot,
    pub overlays_created: usize,
    /// State of the most recently created overlay.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overlay: Option<OverlayState>,
    pub vibrations: usize,
    pub active_downloads: u32,
}

/// Replays `scenario` against a fresh simulated host.
pub fn run(scenario: &Scenario, config: HookConfig) -> Result<RunSummary, ScenarioError> {
    let registry = scenario.build_registry(&config);
    let interceptor = SimInterceptor::new();
    let factory = Arc::new(RecordingOverlayFactory::new());
    let preference = Arc::new(StaticPreference::new(scenario.haptic_on_complete));

    let vibrator = Arc::new(SimVibrator::new(scenario.context.vibrator));
    let mut context = SimContext::new(&scenario.context.label)
        .with_power_save(scenario.context.power_save)
        .with_vibrator(vibrator.clone());
    if !scenario.context.power_service {
        context = context.without_power_service();
    }
    context.fail_register(scenario.context.fail_power_registration);
    let context = Arc::new(context);

    let start = config.start.clone();
    let post = config.post_notification.clone();
    let retract = config.retract_notification.clone();

    let orchestrator = HookOrchestrator::new(config, factory.clone(), preference);
    let tracker = Arc::new(DownloadTracker::new(
        Box::new(FieldDecoder),
        orchestrator.download_events(),
    ));
    orchestrator.set_notification_observer(tracker.clone());

    let mut hooks = Vec::new();
    for (index, step) in scenario.steps.iter().enumerate() {
        tracing::debug!(step = index, ?step, "Replaying step");
        match step {
            Step::Load => {
                // A reload replaces every earlier interception, as a process restart would.
                interceptor.reset();
                hooks.push(orchestrator.hook(&registry, &interceptor));
            }
            Step::Start { without_context } => {
                let mut receiver = SimObject::new(&start.type_name);
                if !without_context {
                    receiver = receiver.with_private_field(
                        &orchestrator.config().context_field,
                        HostValue::Context(context.clone()),
                    );
                }
                let fired =
                    interceptor.fire_after(&start.type_name, &start.method, Some(&receiver), &[]);
                if fired == 0 {
                    tracing::info!(step = index, target = %start, "start() not intercepted");
                }
            }
            Step::PostNotification {
                key,
                title,
                progress,
                finished,
            } => {
                let note = download_notification(key, title, *progress, *finished);
                interceptor.fire_after(&post.type_name, &post.method, None, &[note]);
            }
            Step::RetractNotification { key } => {
                let note = download_notification(key, "", None, false);
                interceptor.fire_after(&retract.type_name, &retract.method, None, &[note]);
            }
            Step::Download { event } => {
                validate(index, event.clone().into())?;
                orchestrator.download_events().emit(event.clone());
            }
            Step::Preference { event } => {
                validate(index, event.clone().into())?;
                orchestrator.preference_events().emit(event.clone());
            }
            Step::PowerSave { active } => context.set_power_save(*active),
            Step::Detach => orchestrator.detach(),
        }
    }

    if !factory.flush() {
        tracing::warn!("Overlay thread did not drain before the summary");
    }

    Ok(RunSummary {
        hooks,
        attachment: orchestrator.snapshot(),
        overlays_created: factory.created_count(),
        overlay: factory.last_sink().map(|sink| sink.state()),
        vibrations: vibrator.pulses().len(),
        active_downloads: tracker.active_count(),
    })
}

fn validate(step: usize, event: RoutedEvent) -> Result<(), ScenarioError> {
    event
        .validate()
        .map_err(|info| ScenarioError::InvalidEvent { step, info })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Scenario {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_full_session() {
        let scenario = parse(
            r#"{
                "steps": [
                    {"step": "load"},
                    {"step": "start"},
                    {"step": "post_notification", "key": "a", "title": "a.zip", "progress": 0.5},
                    {"step": "post_notification", "key": "a", "title": "a.zip", "finished": true},
                    {"step": "preference", "event": {"type": "app_visibility_changed", "visible": true}},
                    {"step": "power_save", "active": true}
                ]
            }"#,
        );
        let summary = run(&scenario, HookConfig::default()).unwrap();

        assert_eq!(summary.hooks.len(), 1);
        assert!(summary.hooks[0].all_installed());
        assert_eq!(summary.overlays_created, 1);
        assert_eq!(summary.vibrations, 1);
        assert_eq!(summary.active_downloads, 0);
        let overlay = summary.overlay.unwrap();
        assert_eq!(overlay.completion_pulses, 1);
        assert!(overlay.app_visible);
        assert!(overlay.power_save_active);
    }

    #[test]
    fn test_missing_start_type_never_attaches() {
        let scenario = parse(
            r#"{
                "registry": [
                    {"name": "com.android.systemui.statusbar.notification.collection.NotifCollection",
                     "methods": [{"name": "postNotification", "arity": 1}]}
                ],
                "steps": [{"step": "load"}, {"step": "start"}]
            }"#,
        );
        let summary = run(&scenario, HookConfig::default()).unwrap();

        assert_eq!(summary.hooks[0].installed_points(), 1);
        assert_eq!(summary.overlays_created, 0);
        assert!(summary.overlay.is_none());
    }

    #[test]
    fn test_receiver_without_context_then_valid() {
        let scenario = parse(
            r#"{"steps": [
                {"step": "load"},
                {"step": "start", "without_context": true},
                {"step": "start"}
            ]}"#,
        );
        let summary = run(&scenario, HookConfig::default()).unwrap();
        assert_eq!(summary.overlays_created, 1);
        assert_eq!(summary.attachment.attach_count, 1);
    }

    #[test]
    fn test_disabled_haptics_skip_vibrator() {
        let scenario = parse(
            r#"{
                "haptic_on_complete": false,
                "steps": [
                    {"step": "load"},
                    {"step": "start"},
                    {"step": "download", "event": {"type": "complete"}}
                ]
            }"#,
        );
        let summary = run(&scenario, HookConfig::default()).unwrap();
        assert_eq!(summary.vibrations, 0);
        assert_eq!(summary.overlay.unwrap().completion_pulses, 1);
    }

    #[test]
    fn test_invalid_progress_is_rejected() {
        let scenario = parse(
            r#"{"steps": [
                {"step": "load"},
                {"step": "download", "event": {"type": "progress_changed", "progress": 4.0}}
            ]}"#,
        );
        let err = run(&scenario, HookConfig::default()).unwrap_err();
        assert!(matches!(err, ScenarioError::InvalidEvent { step: 1, .. }));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scenario.json");
        fs_err::write(&path, r#"{"steps": [{"step": "load"}, {"step": "detach"}]}"#).unwrap();

        let scenario = Scenario::load(&path).unwrap();
        assert_eq!(scenario.steps.len(), 2);
        assert!(scenario.haptic_on_complete);

        let missing = Scenario::load(&dir.path().join("missing.json"));
        assert!(matches!(missing, Err(ScenarioError::Read(_))));
    }

    #[test]
    fn test_unknown_step_fails_to_parse() {
        let result: Result<Scenario, _> = serde_json::from_str(r#"{"steps": [{"step": "reboot"}]}"#);
        assert!(result.is_err());
    }
}
