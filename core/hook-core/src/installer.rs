//! Installs after-callbacks on located host methods.
//!
//! Each interception point is attempted independently: a missing type or a
//! rejected registration on one point never prevents attempting the others.
//! Duplicate registrations are the host's business; we log and move on.

use serde::Serialize;

use crate::config::TargetMethodSpec;
use crate::error::{FailureKind, HookError, Result};
use crate::host::{AfterHook, CodeRegistry, InterceptError, Interceptor, MethodHandle};
use crate::locator::MethodLocator;

/// The three interception points the orchestrator needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HookPoint {
    Start,
    PostNotification,
    RetractNotification,
}

/// Outcome of installing one interception point during one process load.
#[derive(Debug, Clone, Serialize)]
pub struct HookRegistration {
    pub point: HookPoint,
    pub spec: TargetMethodSpec,
    pub installed: bool,
    /// Overloads actually intercepted (0 when not installed).
    pub installed_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
}

impl HookRegistration {
    fn failed(point: HookPoint, spec: &TargetMethodSpec, err: &HookError) -> Self {
        Self {
            point,
            spec: spec.clone(),
            installed: false,
            installed_count: 0,
            failure: Some(err.to_string()),
            failure_kind: Some(err.kind()),
        }
    }
}

/// All registrations from a single `hook()` pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HookReport {
    pub registrations: Vec<HookRegistration>,
}

impl HookReport {
    pub fn get(&self, point: HookPoint) -> Option<&HookRegistration> {
        self.registrations.iter().find(|r| r.point == point)
    }

    pub fn installed_points(&self) -> usize {
        self.registrations.iter().filter(|r| r.installed).count()
    }

    pub fn all_installed(&self) -> bool {
        !self.registrations.is_empty() && self.registrations.iter().all(|r| r.installed)
    }
}

/// Registers `callback` after `method`. A duplicate registration is not an error.
pub fn install(interceptor: &dyn Interceptor, method: &MethodHandle, callback: AfterHook) -> Result<()> {
    match interceptor.hook_after(method, callback) {
        Ok(()) => {
            tracing::debug!(method = %method, "Interception installed");
            Ok(())
        }
        Err(InterceptError::AlreadyHooked) => {
            tracing::info!(method = %method, "Interception already present; host coalesced it");
            Ok(())
        }
        Err(InterceptError::Rejected(details)) => {
            tracing::warn!(method = %method, details = %details, "Interception rejected");
            Err(HookError::InstallFailed {
                target: method.to_string(),
                details,
            })
        }
    }
}

pub struct HookInstaller<'a> {
    locator: MethodLocator<'a>,
    interceptor: &'a dyn Interceptor,
    registrations: Vec<HookRegistration>,
}

impl<'a> HookInstaller<'a> {
    pub fn new(registry: &'a dyn CodeRegistry, interceptor: &'a dyn Interceptor) -> Self {
        Self {
            locator: MethodLocator::new(registry),
            interceptor,
            registrations: Vec::new(),
        }
    }

    /// Installs `callback` on every method matching `spec` and records the outcome.
    pub fn attempt(&mut self, point: HookPoint, spec: &TargetMethodSpec, callback: AfterHook) -> &HookRegistration {
        let registration = match self.locator.resolve(spec) {
            Ok(methods) => self.install_overloads(point, spec, &methods, callback),
            Err(err) => HookRegistration::failed(point, spec, &err),
        };
        self.registrations.push(registration);
        &self.registrations[self.registrations.len() - 1]
    }

    fn install_overloads(
        &self,
        point: HookPoint,
        spec: &TargetMethodSpec,
        methods: &[MethodHandle],
        callback: AfterHook,
    ) -> HookRegistration {
        let mut installed_count = 0;
        let mut last_error = None;
        for method in methods {
            match install(self.interceptor, method, callback.clone()) {
                Ok(()) => installed_count += 1,
                Err(err) => last_error = Some(err),
            }
        }

        if installed_count == 0 {
            if let Some(err) = last_error {
                return HookRegistration::failed(point, spec, &err);
            }
        }

        tracing::info!(
            point = ?point,
            target = %spec,
            overloads = installed_count,
            "Hook installed"
        );
        HookRegistration {
            point,
            spec: spec.clone(),
            installed: true,
            installed_count,
            failure: last_error.as_ref().map(|e| e.to_string()),
            failure_kind: last_error.as_ref().map(|e| e.kind()),
        }
    }

    pub fn finish(self) -> HookReport {
        HookReport {
            registrations: self.registrations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::CallFrame;
    use crate::sim::{SimInterceptor, SimRegistry};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_hook(counter: &Arc<AtomicUsize>) -> AfterHook {
        let counter = counter.clone();
        Arc::new(move |_frame: &CallFrame<'_>| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_missing_type_does_not_stop_other_points() {
        let registry = SimRegistry::new().with_method("a.Collection", "post", 2);
        let interceptor = SimInterceptor::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let mut installer = HookInstaller::new(&registry, &interceptor);
        installer.attempt(
            HookPoint::Start,
            &TargetMethodSpec::new("a.Missing", "start", Some(0)),
            counting_hook(&counter),
        );
        installer.attempt(
            HookPoint::PostNotification,
            &TargetMethodSpec::new("a.Collection", "post", None),
            counting_hook(&counter),
        );
        let report = installer.finish();

        let start = report.get(HookPoint::Start).unwrap();
        assert!(!start.installed);
        assert_eq!(start.failure_kind, Some(FailureKind::Lookup));
        assert!(report.get(HookPoint::PostNotification).unwrap().installed);
        assert_eq!(interceptor.hook_count(), 1);
    }

    #[test]
    fn test_every_overload_is_intercepted() {
        let registry = SimRegistry::new()
            .with_method("a.Collection", "post", 1)
            .with_method("a.Collection", "post", 2);
        let interceptor = SimInterceptor::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let mut installer = HookInstaller::new(&registry, &interceptor);
        let registration = installer.attempt(
            HookPoint::PostNotification,
            &TargetMethodSpec::new("a.Collection", "post", None),
            counting_hook(&counter),
        );
        assert_eq!(registration.installed_count, 2);
    }

    #[test]
    fn test_rejected_registration_is_recorded() {
        let registry = SimRegistry::new().with_method("a.Surfaces", "start", 0);
        let interceptor = SimInterceptor::new().rejecting("a.Surfaces", "start");
        let counter = Arc::new(AtomicUsize::new(0));

        let mut installer = HookInstaller::new(&registry, &interceptor);
        let registration = installer.attempt(
            HookPoint::Start,
            &TargetMethodSpec::new("a.Surfaces", "start", Some(0)),
            counting_hook(&counter),
        );
        assert!(!registration.installed);
        assert_eq!(registration.failure_kind, Some(FailureKind::Install));
    }

    #[test]
    fn test_duplicate_install_is_not_fatal() {
        let registry = SimRegistry::new().with_method("a.Surfaces", "start", 0);
        let interceptor = SimInterceptor::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let spec = TargetMethodSpec::new("a.Surfaces", "start", Some(0));

        let mut installer = HookInstaller::new(&registry, &interceptor);
        installer.attempt(HookPoint::Start, &spec, counting_hook(&counter));
        let second = installer.attempt(HookPoint::Start, &spec, counting_hook(&counter));
        assert!(second.installed);

        // The sim host coalesces duplicates, so one firing runs one callback.
        interceptor.fire_after("a.Surfaces", "start", None, &[]);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
