//! In-memory host for dry runs and tests.
//!
//! Implements every host seam with plain Rust state so the orchestrator can be
//! driven end to end without a live host process. The `hook-sim` CLI builds its
//! scenarios from these types.

use overlay_protocol::{OverlayMutation, OverlayState};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use crate::dispatch::OverlayThread;
use crate::download::{DownloadNotification, NotificationDecoder};
use crate::host::{
    AfterHook, CallFrame, CodeRegistry, FieldAccess, HapticPreference, HostContext, HostObject,
    HostValue, InterceptError, Interceptor, MethodHandle, PowerSaveListener, SubscriptionId,
    TypeHandle, VibrationPulse, Vibrator,
};
use crate::overlay::{OverlayFactory, OverlayHandle, OverlaySink};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}

// ═══════════════════════════════════════════════════════════════════════════════
// Code registry and interception
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default, Clone)]
pub struct SimRegistry {
    types: BTreeMap<String, Vec<MethodHandle>>,
}

impl SimRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type(mut self, type_name: &str) -> Self {
        self.types.entry(type_name.to_string()).or_default();
        self
    }

    pub fn with_method(mut self, type_name: &str, method: &str, arity: usize) -> Self {
        self.types
            .entry(type_name.to_string())
            .or_default()
            .push(MethodHandle {
                declaring_type: type_name.to_string(),
                name: method.to_string(),
                arity,
            });
        self
    }
}

impl CodeRegistry for SimRegistry {
    fn find_type(&self, type_name: &str) -> Option<TypeHandle> {
        self.types.contains_key(type_name).then(|| TypeHandle {
            name: type_name.to_string(),
        })
    }

    fn declared_methods(&self, ty: &TypeHandle) -> Vec<MethodHandle> {
        self.types.get(&ty.name).cloned().unwrap_or_default()
    }
}

/// Interception subsystem that coalesces duplicate registrations.
#[derive(Default)]
pub struct SimInterceptor {
    hooks: Mutex<Vec<(MethodHandle, AfterHook)>>,
    rejected: HashSet<(String, String)>,
}

impl SimInterceptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects every registration on `type_name#method`.
    pub fn rejecting(mut self, type_name: &str, method: &str) -> Self {
        self.rejected
            .insert((type_name.to_string(), method.to_string()));
        self
    }

    pub fn hook_count(&self) -> usize {
        lock(&self.hooks).len()
    }

    /// Forgets every interception, as a freshly spawned host process would.
    pub fn reset(&self) {
        lock(&self.hooks).clear();
    }

    /// Runs the after-callbacks of the overload of `type_name#method` whose
    /// arity matches `args`. Returns how many callbacks ran.
    pub fn fire_after(
        &self,
        type_name: &str,
        method: &str,
        receiver: Option<&dyn HostObject>,
        args: &[HostValue],
    ) -> usize {
        let matching: Vec<(MethodHandle, AfterHook)> = lock(&self.hooks)
            .iter()
            .filter(|(m, _)| {
                m.declaring_type == type_name && m.name == method && m.arity == args.len()
            })
            .cloned()
            .collect();

        for (handle, callback) in &matching {
            let frame = CallFrame {
                method: handle,
                receiver,
                args,
            };
            callback(&frame);
        }
        matching.len()
    }
}

impl Interceptor for SimInterceptor {
    fn hook_after(&self, method: &MethodHandle, callback: AfterHook) -> Result<(), InterceptError> {
        if self
            .rejected
            .contains(&(method.declaring_type.clone(), method.name.clone()))
        {
            return Err(InterceptError::Rejected("rejected by sim host".to_string()));
        }
        let mut hooks = lock(&self.hooks);
        if hooks.iter().any(|(m, _)| m == method) {
            return Err(InterceptError::AlreadyHooked);
        }
        hooks.push((method.clone(), callback));
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Objects and contexts
// ═══════════════════════════════════════════════════════════════════════════════

pub struct SimObject {
    runtime_type: String,
    fields: HashMap<String, (HostValue, bool)>,
}

impl SimObject {
    pub fn new(runtime_type: &str) -> Self {
        Self {
            runtime_type: runtime_type.to_string(),
            fields: HashMap::new(),
        }
    }

    pub fn with_field(mut self, name: &str, value: HostValue) -> Self {
        self.fields.insert(name.to_string(), (value, false));
        self
    }

    pub fn with_private_field(mut self, name: &str, value: HostValue) -> Self {
        self.fields.insert(name.to_string(), (value, true));
        self
    }
}

impl HostObject for SimObject {
    fn runtime_type(&self) -> &str {
        &self.runtime_type
    }

    fn read_field(&self, name: &str, access: FieldAccess) -> Option<HostValue> {
        let (value, private) = self.fields.get(name)?;
        if *private && access == FieldAccess::Public {
            return None;
        }
        Some(value.clone())
    }
}

pub struct SimVibrator {
    capable: bool,
    failing: bool,
    capability_checks: AtomicUsize,
    pulses: Mutex<Vec<VibrationPulse>>,
}

impl SimVibrator {
    pub fn new(capable: bool) -> Self {
        Self {
            capable,
            failing: false,
            capability_checks: AtomicUsize::new(0),
            pulses: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    pub fn capability_checks(&self) -> usize {
        self.capability_checks.load(Ordering::SeqCst)
    }

    pub fn pulses(&self) -> Vec<VibrationPulse> {
        lock(&self.pulses).clone()
    }
}

impl Vibrator for SimVibrator {
    fn has_vibrator(&self) -> bool {
        self.capability_checks.fetch_add(1, Ordering::SeqCst);
        self.capable
    }

    fn vibrate(&self, pulse: VibrationPulse) -> Result<(), String> {
        if self.failing {
            return Err("vibrator service died".to_string());
        }
        lock(&self.pulses).push(pulse);
        Ok(())
    }
}

pub struct SimContext {
    label: String,
    power_save: AtomicBool,
    power_service: bool,
    fail_register: AtomicBool,
    fail_unregister: AtomicBool,
    listeners: Mutex<HashMap<u64, PowerSaveListener>>,
    next_id: AtomicU64,
    registrations: AtomicUsize,
    unregistrations: AtomicUsize,
    vibrator: Option<Arc<SimVibrator>>,
}

impl SimContext {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            power_save: AtomicBool::new(false),
            power_service: true,
            fail_register: AtomicBool::new(false),
            fail_unregister: AtomicBool::new(false),
            listeners: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            registrations: AtomicUsize::new(0),
            unregistrations: AtomicUsize::new(0),
            vibrator: None,
        }
    }

    pub fn with_vibrator(mut self, vibrator: Arc<SimVibrator>) -> Self {
        self.vibrator = Some(vibrator);
        self
    }

    pub fn with_power_save(self, active: bool) -> Self {
        self.power_save.store(active, Ordering::SeqCst);
        self
    }

    pub fn without_power_service(mut self) -> Self {
        self.power_service = false;
        self
    }

    pub fn fail_register(&self, fail: bool) {
        self.fail_register.store(fail, Ordering::SeqCst);
    }

    pub fn fail_unregister(&self, fail: bool) {
        self.fail_unregister.store(fail, Ordering::SeqCst);
    }

    /// Changes the OS power-save state and broadcasts it to every listener.
    pub fn set_power_save(&self, active: bool) {
        self.power_save.store(active, Ordering::SeqCst);
        let listeners: Vec<PowerSaveListener> = lock(&self.listeners).values().cloned().collect();
        for listener in listeners {
            listener(active);
        }
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }

    pub fn registration_count(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }

    pub fn unregistration_count(&self) -> usize {
        self.unregistrations.load(Ordering::SeqCst)
    }
}

impl HostContext for SimContext {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn is_power_save_mode(&self) -> Option<bool> {
        self.power_service
            .then(|| self.power_save.load(Ordering::SeqCst))
    }

    fn register_power_save_listener(
        &self,
        listener: PowerSaveListener,
    ) -> Result<SubscriptionId, String> {
        if self.fail_register.load(Ordering::SeqCst) {
            return Err("receiver registration denied".to_string());
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        lock(&self.listeners).insert(id, listener);
        self.registrations.fetch_add(1, Ordering::SeqCst);
        Ok(SubscriptionId(id))
    }

    fn unregister_power_save_listener(&self, id: SubscriptionId) -> Result<(), String> {
        if self.fail_unregister.load(Ordering::SeqCst) {
            return Err("receiver not registered".to_string());
        }
        if lock(&self.listeners).remove(&id.0).is_none() {
            return Err(format!("unknown receiver {}", id.0));
        }
        self.unregistrations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn vibrator(&self) -> Option<Arc<dyn Vibrator>> {
        self.vibrator
            .as_ref()
            .map(|v| Arc::clone(v) as Arc<dyn Vibrator>)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Overlay, preferences, notifications
// ═══════════════════════════════════════════════════════════════════════════════

/// Sink that records every mutation and the thread it arrived on.
#[derive(Default)]
pub struct RecordingSink {
    state: Mutex<OverlayState>,
    log: Mutex<Vec<(OverlayMutation, ThreadId)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> OverlayState {
        lock(&self.state).clone()
    }

    pub fn mutations(&self) -> Vec<OverlayMutation> {
        lock(&self.log).iter().map(|(m, _)| m.clone()).collect()
    }

    pub fn threads(&self) -> Vec<ThreadId> {
        lock(&self.log).iter().map(|(_, t)| *t).collect()
    }
}

impl OverlaySink for RecordingSink {
    fn apply(&self, mutation: OverlayMutation) {
        lock(&self.state).apply(&mutation);
        lock(&self.log).push((mutation, thread::current().id()));
    }
}

type CreateAction = Box<dyn FnOnce() + Send>;

/// Creates a [`RecordingSink`] on its own [`OverlayThread`] per attach.
#[derive(Default)]
pub struct RecordingOverlayFactory {
    created: Mutex<Vec<(Arc<RecordingSink>, Arc<OverlayThread>)>>,
    failures_remaining: AtomicUsize,
    panic_next: AtomicBool,
    before_next_create: Mutex<Option<CreateAction>>,
}

impl RecordingOverlayFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `count` creations fail.
    pub fn fail_next(&self, count: usize) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// The next creation panics.
    pub fn panic_next(&self) {
        self.panic_next.store(true, Ordering::SeqCst);
    }

    /// Runs `action` at the start of the next creation, while the attach is in flight.
    pub fn before_next_create(&self, action: impl FnOnce() + Send + 'static) {
        *lock(&self.before_next_create) = Some(Box::new(action));
    }

    pub fn created_count(&self) -> usize {
        lock(&self.created).len()
    }

    pub fn sink(&self, index: usize) -> Option<Arc<RecordingSink>> {
        lock(&self.created).get(index).map(|(s, _)| Arc::clone(s))
    }

    pub fn last_sink(&self) -> Option<Arc<RecordingSink>> {
        lock(&self.created).last().map(|(s, _)| Arc::clone(s))
    }

    pub fn last_thread_id(&self) -> Option<ThreadId> {
        lock(&self.created).last().map(|(_, t)| t.thread_id())
    }

    /// Waits for every overlay thread to drain its queue.
    pub fn flush(&self) -> bool {
        let threads: Vec<Arc<OverlayThread>> = lock(&self.created)
            .iter()
            .map(|(_, t)| Arc::clone(t))
            .collect();
        threads.iter().all(|t| t.flush())
    }
}

impl OverlayFactory for RecordingOverlayFactory {
    fn create(&self, context: &Arc<dyn HostContext>) -> Result<OverlayHandle, String> {
        let action = lock(&self.before_next_create).take();
        if let Some(action) = action {
            action();
        }
        if self.panic_next.swap(false, Ordering::SeqCst) {
            panic!("overlay inflation crashed");
        }
        let failing = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(format!("cannot add overlay window for {}", context.label()));
        }

        let sink = Arc::new(RecordingSink::new());
        let thread = Arc::new(
            OverlayThread::spawn("overlay-ui").map_err(|e| format!("overlay thread: {}", e))?,
        );
        lock(&self.created).push((Arc::clone(&sink), Arc::clone(&thread)));
        Ok(OverlayHandle::new(sink, thread))
    }
}

pub struct StaticPreference {
    enabled: AtomicBool,
}

impl StaticPreference {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
        }
    }

    pub fn set(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }
}

impl HapticPreference for StaticPreference {
    fn haptic_on_complete(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}

/// Decodes the first object argument's `key`, `title`, `progress` and `finished` fields.
pub struct FieldDecoder;

impl NotificationDecoder for FieldDecoder {
    fn decode(&self, frame: &CallFrame<'_>) -> Option<DownloadNotification> {
        let entry = frame.args.iter().find_map(|arg| match arg {
            HostValue::Object(obj) => Some(obj),
            _ => None,
        })?;
        let key = match entry.read_field("key", FieldAccess::Public)? {
            HostValue::Str(key) => key,
            _ => return None,
        };
        let filename = match entry.read_field("title", FieldAccess::Public) {
            Some(HostValue::Str(title)) => title,
            _ => String::new(),
        };
        let progress = match entry.read_field("progress", FieldAccess::Public) {
            Some(HostValue::Float(p)) => Some(p as f32),
            _ => None,
        };
        let finished = matches!(
            entry.read_field("finished", FieldAccess::Public),
            Some(HostValue::Bool(true))
        );
        Some(DownloadNotification {
            key,
            filename,
            progress,
            finished,
        })
    }
}

/// Builds a notification argument understood by [`FieldDecoder`].
pub fn download_notification(
    key: &str,
    title: &str,
    progress: Option<f64>,
    finished: bool,
) -> HostValue {
    let mut entry = SimObject::new("NotificationEntry")
        .with_field("key", HostValue::Str(key.to_string()))
        .with_field("title", HostValue::Str(title.to_string()))
        .with_field("finished", HostValue::Bool(finished));
    if let Some(progress) = progress {
        entry = entry.with_field("progress", HostValue::Float(progress));
    }
    HostValue::Object(Arc::new(entry))
}
