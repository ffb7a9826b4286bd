//! Hook attachment and teardown.
//!
//! One [`HookOrchestrator`] exists per host process. On each process-load
//! signal the host calls [`HookOrchestrator::hook`], which installs three
//! interception points. The first successful `start()` interception extracts
//! the host context and attaches the overlay; later firings are no-ops until
//! [`HookOrchestrator::detach`] returns the state machine to `Unattached`.
//!
//! Nothing here may take the host down: callbacks catch panics and every
//! failure is logged and degrades to "overlay not active".

use chrono::Utc;
use overlay_protocol::OverlayMutation;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock, Weak};
use ulid::Ulid;

use crate::attachment::{AttachedOverlay, AttachmentSnapshot, AttachmentState, PowerSubscription};
use crate::config::HookConfig;
use crate::error::{HookError, Result};
use crate::extractor::extract_context;
use crate::haptics::HapticFeedback;
use crate::host::{
    AfterHook, CallFrame, CodeRegistry, HapticPreference, HostObject, Interceptor,
    NotificationObserver, PowerSaveListener,
};
use crate::installer::{HookInstaller, HookPoint, HookReport};
use crate::overlay::OverlayFactory;
use crate::router::{DownloadEvents, EventRouter, PreferenceEvents};
use crate::slots::EventSlots;

/// Result of one `start()` interception.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    Attached { cycle: Ulid },
    AlreadyAttached,
    /// Another thread is attaching right now.
    InProgress,
    /// A teardown ran while this attach was in flight; the new overlay was discarded.
    Superseded,
}

struct Inner {
    config: HookConfig,
    state: Arc<AttachmentState>,
    slots: Arc<EventSlots>,
    router: EventRouter,
    overlay_factory: Arc<dyn OverlayFactory>,
    notifications: RwLock<Option<Arc<dyn NotificationObserver>>>,
}

#[derive(Clone)]
pub struct HookOrchestrator {
    inner: Arc<Inner>,
}

impl HookOrchestrator {
    pub fn new(
        config: HookConfig,
        overlay_factory: Arc<dyn OverlayFactory>,
        haptic_preference: Arc<dyn HapticPreference>,
    ) -> Self {
        let state = Arc::new(AttachmentState::new());
        let slots = Arc::new(EventSlots::new());
        let router = EventRouter::new(
            Arc::clone(&state),
            Arc::clone(&slots),
            HapticFeedback::new(haptic_preference),
        );
        Self {
            inner: Arc::new(Inner {
                config,
                state,
                slots,
                router,
                overlay_factory,
                notifications: RwLock::new(None),
            }),
        }
    }

    pub fn config(&self) -> &HookConfig {
        &self.inner.config
    }

    /// Handle for the download producer.
    pub fn download_events(&self) -> DownloadEvents {
        DownloadEvents::new(Arc::clone(&self.inner.slots))
    }

    /// Handle for the preference layer.
    pub fn preference_events(&self) -> PreferenceEvents {
        PreferenceEvents::new(Arc::clone(&self.inner.slots))
    }

    /// Sets the consumer of the notification interceptions.
    pub fn set_notification_observer(&self, observer: Arc<dyn NotificationObserver>) {
        let mut slot = self
            .inner
            .notifications
            .write()
            .unwrap_or_else(|p| p.into_inner());
        *slot = Some(observer);
    }

    pub fn slots(&self) -> &EventSlots {
        &self.inner.slots
    }

    pub fn is_attached(&self) -> bool {
        self.inner.state.is_attached()
    }

    pub fn snapshot(&self) -> AttachmentSnapshot {
        self.inner.state.snapshot()
    }

    /// Installs the three interception points. Called once per process-load signal.
    pub fn hook(&self, registry: &dyn CodeRegistry, interceptor: &dyn Interceptor) -> HookReport {
        let config = &self.inner.config;
        let mut installer = HookInstaller::new(registry, interceptor);

        installer.attempt(
            HookPoint::Start,
            &config.start,
            self.callback("start", |orchestrator, frame| orchestrator.on_start(frame)),
        );
        installer.attempt(
            HookPoint::PostNotification,
            &config.post_notification,
            self.callback("post_notification", |orchestrator, frame| {
                if let Some(observer) = orchestrator.notification_observer() {
                    observer.on_posted(frame);
                }
            }),
        );
        installer.attempt(
            HookPoint::RetractNotification,
            &config.retract_notification,
            self.callback("retract_notification", |orchestrator, frame| {
                if let Some(observer) = orchestrator.notification_observer() {
                    observer.on_retracted(frame);
                }
            }),
        );

        let report = installer.finish();
        tracing::info!(
            installed = report.installed_points(),
            total = report.registrations.len(),
            "Hook pass finished"
        );
        report
    }

    // Installed callbacks hold a weak reference and swallow panics.
    fn callback<F>(&self, name: &'static str, f: F) -> AfterHook
    where
        F: Fn(&HookOrchestrator, &CallFrame<'_>) + Send + Sync + 'static,
    {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        Arc::new(move |frame: &CallFrame<'_>| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let orchestrator = HookOrchestrator { inner };
            if catch_unwind(AssertUnwindSafe(|| f(&orchestrator, frame))).is_err() {
                tracing::error!(hook = name, method = %frame.method, "Hook callback panicked");
            }
        })
    }

    fn notification_observer(&self) -> Option<Arc<dyn NotificationObserver>> {
        self.inner
            .notifications
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// After-callback for `start()`.
    pub fn on_start(&self, frame: &CallFrame<'_>) {
        if self.is_attached() {
            return;
        }
        let Some(receiver) = frame.receiver else {
            tracing::warn!(method = %frame.method, "start() intercepted without a receiver");
            return;
        };
        match self.try_attach(receiver) {
            Ok(AttachOutcome::InProgress) => {
                tracing::warn!("Concurrent start() while attaching; ignoring redundant firing");
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(error = %err, kind = ?err.kind(), "Attach deferred until next start()");
            }
        }
    }

    /// Runs the attach sequence against an intercepted `start()` receiver.
    pub fn try_attach(&self, receiver: &dyn HostObject) -> Result<AttachOutcome> {
        let inner = &self.inner;
        if inner.state.is_attached() {
            return Ok(AttachOutcome::AlreadyAttached);
        }

        let context = extract_context(receiver, &inner.config.context_field)?;

        let Some(claim) = inner.state.begin_attach() else {
            return Ok(if inner.state.is_attached() {
                AttachOutcome::AlreadyAttached
            } else {
                AttachOutcome::InProgress
            });
        };

        let created = catch_unwind(AssertUnwindSafe(|| inner.overlay_factory.create(&context)));
        let overlay = match created {
            Ok(Ok(overlay)) => overlay,
            Ok(Err(details)) => {
                inner.state.abandon_attach(claim);
                return Err(HookError::AttachFailed(details));
            }
            Err(_) => {
                inner.state.abandon_attach(claim);
                return Err(HookError::AttachFailed("overlay factory panicked".to_string()));
            }
        };

        let cycle = Ulid::new();
        let published = inner.state.publish(
            claim,
            AttachedOverlay {
                cycle,
                generation: claim.generation(),
                attached_at: Utc::now(),
                context: Arc::clone(&context),
                overlay,
            },
        );
        let Some(attached) = published else {
            tracing::warn!(cycle = %cycle, "Newer attach already published; discarding overlay");
            return Ok(AttachOutcome::Superseded);
        };

        if !inner.state.commit(claim) {
            tracing::warn!(cycle = %cycle, "Teardown raced attach; discarding new overlay");
            inner.state.take_overlay_if(cycle);
            return Ok(AttachOutcome::Superseded);
        }

        inner.router.wire_callbacks();
        tracing::info!(cycle = %cycle, context = %context.label(), "Overlay attached");
        self.subscribe_power_save(&attached);
        if let Some(observer) = self.notification_observer() {
            observer.on_overlay_attached();
        }
        Ok(AttachOutcome::Attached { cycle })
    }

    fn subscribe_power_save(&self, attached: &AttachedOverlay) {
        let cycle = attached.cycle;
        let state: Weak<AttachmentState> = Arc::downgrade(&self.inner.state);
        let listener: PowerSaveListener = Arc::new(move |active: bool| {
            let Some(state) = state.upgrade() else {
                return;
            };
            match state.current() {
                Some(current) if current.cycle == cycle => {
                    current
                        .overlay
                        .post(OverlayMutation::SetPowerSaveActive { active });
                }
                _ => tracing::trace!(cycle = %cycle, "Power-save change for stale overlay dropped"),
            }
        });

        match attached.context.register_power_save_listener(listener) {
            Ok(id) => {
                let subscription = PowerSubscription {
                    cycle,
                    id,
                    context: Arc::clone(&attached.context),
                };
                if let Err(orphan) = self.inner.state.set_subscription(subscription) {
                    revoke(&orphan);
                }
            }
            Err(details) => {
                let err = HookError::SubscriptionFailed(details);
                tracing::warn!(error = %err, cycle = %cycle, "Power-save changes will not reach the overlay");
            }
        }

        match attached.context.is_power_save_mode() {
            Some(active) => {
                self.inner.router.route_power_save(active);
            }
            None => tracing::debug!("Power service unavailable; initial power-save state unknown"),
        }
    }

    /// Tears everything down. Safe to call repeatedly and from any thread.
    pub fn detach(&self) {
        let inner = &self.inner;
        if let Some(subscription) = inner.state.take_subscription() {
            revoke(&subscription);
        }
        let overlay = inner.state.take_overlay();
        inner.slots.clear_all();
        inner.state.reset();

        match overlay {
            Some(overlay) => tracing::info!(cycle = %overlay.cycle, "Overlay detached"),
            None => tracing::debug!("Detach requested while unattached"),
        }
    }
}

// The handle is dropped whether or not the host accepts the unregistration.
fn revoke(subscription: &PowerSubscription) {
    if let Err(details) = subscription
        .context
        .unregister_power_save_listener(subscription.id)
    {
        let err = HookError::SubscriptionFailed(details);
        tracing::warn!(error = %err, cycle = %subscription.cycle, "Power-save unregistration failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostValue;
    use crate::sim::{RecordingOverlayFactory, SimContext, SimObject, StaticPreference};

    fn orchestrator() -> (HookOrchestrator, Arc<RecordingOverlayFactory>) {
        let factory = Arc::new(RecordingOverlayFactory::new());
        let orchestrator = HookOrchestrator::new(
            HookConfig::default(),
            factory.clone(),
            Arc::new(StaticPreference::new(false)),
        );
        (orchestrator, factory)
    }

    fn receiver(context: &Arc<SimContext>) -> SimObject {
        SimObject::new("CentralSurfacesImpl")
            .with_private_field("mContext", HostValue::Context(context.clone()))
    }

    #[test]
    fn test_attach_then_already_attached() {
        let (orchestrator, factory) = orchestrator();
        let context = Arc::new(SimContext::new("systemui"));
        let receiver = receiver(&context);

        let outcome = orchestrator.try_attach(&receiver).unwrap();
        assert!(matches!(outcome, AttachOutcome::Attached { .. }));
        assert_eq!(
            orchestrator.try_attach(&receiver).unwrap(),
            AttachOutcome::AlreadyAttached
        );
        assert_eq!(factory.created_count(), 1);
        assert!(orchestrator.slots().all_bound());
    }

    #[test]
    fn test_factory_failure_leaves_unattached() {
        let (orchestrator, factory) = orchestrator();
        factory.fail_next(1);
        let context = Arc::new(SimContext::new("systemui"));
        let receiver = receiver(&context);

        let err = orchestrator.try_attach(&receiver).unwrap_err();
        assert!(matches!(err, HookError::AttachFailed(_)));
        assert!(!orchestrator.is_attached());
        assert!(orchestrator.slots().all_clear());
        assert_eq!(context.registration_count(), 0);

        assert!(matches!(
            orchestrator.try_attach(&receiver).unwrap(),
            AttachOutcome::Attached { .. }
        ));
    }

    #[test]
    fn test_factory_panic_is_contained() {
        let (orchestrator, factory) = orchestrator();
        factory.panic_next();
        let context = Arc::new(SimContext::new("systemui"));
        let receiver = receiver(&context);

        assert!(orchestrator.try_attach(&receiver).is_err());
        assert!(!orchestrator.is_attached());
        assert!(orchestrator.try_attach(&receiver).is_ok());
        assert!(orchestrator.is_attached());
    }

    #[test]
    fn test_subscription_failure_still_attaches() {
        let (orchestrator, _factory) = orchestrator();
        let context = Arc::new(SimContext::new("systemui"));
        context.fail_register(true);

        orchestrator.try_attach(&receiver(&context)).unwrap();
        assert!(orchestrator.is_attached());
        assert!(!orchestrator.snapshot().power_subscribed);
    }

    #[test]
    fn test_detach_discards_handle_even_when_unregister_fails() {
        let (orchestrator, _factory) = orchestrator();
        let context = Arc::new(SimContext::new("systemui"));
        orchestrator.try_attach(&receiver(&context)).unwrap();
        context.fail_unregister(true);

        orchestrator.detach();
        assert!(!orchestrator.snapshot().power_subscribed);

        context.fail_unregister(false);
        orchestrator.detach();
        assert_eq!(context.unregistration_count(), 0);
    }

    #[test]
    fn test_detach_during_attach_supersedes_it() {
        let (orchestrator, factory) = orchestrator();
        let context = Arc::new(SimContext::new("systemui"));
        let teardown = orchestrator.clone();
        factory.before_next_create(move || teardown.detach());

        let outcome = orchestrator.try_attach(&receiver(&context)).unwrap();

        assert_eq!(outcome, AttachOutcome::Superseded);
        assert!(!orchestrator.is_attached());
        assert!(orchestrator.snapshot().cycle.is_none());
        assert!(orchestrator.slots().all_clear());
        assert_eq!(context.listener_count(), 0);

        assert!(matches!(
            orchestrator.try_attach(&receiver(&context)).unwrap(),
            AttachOutcome::Attached { .. }
        ));
        assert_eq!(factory.created_count(), 2);
    }

    #[test]
    fn test_newer_attach_wins_over_stale_attempt() {
        let (orchestrator, factory) = orchestrator();
        let context = Arc::new(SimContext::new("systemui"));
        let newer = Arc::new(std::sync::Mutex::new(None));

        let racer = orchestrator.clone();
        let racer_context = context.clone();
        let newer_slot = newer.clone();
        factory.before_next_create(move || {
            racer.detach();
            let outcome = racer.try_attach(&receiver(&racer_context)).ok();
            *newer_slot.lock().unwrap() = outcome;
        });

        let stale = orchestrator.try_attach(&receiver(&context)).unwrap();
        assert_eq!(stale, AttachOutcome::Superseded);

        let Some(AttachOutcome::Attached { cycle }) = *newer.lock().unwrap() else {
            panic!("newer attach did not complete");
        };
        let snapshot = orchestrator.snapshot();
        assert_eq!(snapshot.phase, crate::attachment::AttachPhase::Attached);
        assert_eq!(snapshot.cycle, Some(cycle.to_string()));
        assert!(snapshot.power_subscribed);
        assert!(orchestrator.slots().all_bound());
        assert_eq!(factory.created_count(), 2);
        assert_eq!(context.listener_count(), 1);
    }
}
