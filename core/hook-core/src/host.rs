//! Seams into the host process.
//!
//! The orchestrator never touches the host directly. Everything it needs
//! (type lookup, method interception, field reads on intercepted receivers,
//! OS services scoped to an execution context) goes through these traits.
//!
//! Implementors should:
//! - Never panic; report absence with `None` and failures with `Err`
//! - Be callable from any thread (interception callbacks arrive on host threads)

use std::fmt;
use std::sync::Arc;

/// A type resolved from the host's code registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeHandle {
    pub name: String,
}

/// A declared method on a resolved type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodHandle {
    pub declaring_type: String,
    pub name: String,
    pub arity: usize,
}

impl fmt::Display for MethodHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}/{}", self.declaring_type, self.name, self.arity)
    }
}

/// The host's live code registry (a class loader, in practice).
pub trait CodeRegistry: Send + Sync {
    fn find_type(&self, type_name: &str) -> Option<TypeHandle>;

    /// Methods declared directly on `ty`, in declaration order.
    fn declared_methods(&self, ty: &TypeHandle) -> Vec<MethodHandle>;
}

/// Callback run after an intercepted method returns.
pub type AfterHook = Arc<dyn Fn(&CallFrame<'_>) + Send + Sync>;

/// What the host's interception subsystem may report on registration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InterceptError {
    #[error("method is already intercepted")]
    AlreadyHooked,
    #[error("{0}")]
    Rejected(String),
}

pub trait Interceptor: Send + Sync {
    fn hook_after(&self, method: &MethodHandle, callback: AfterHook) -> Result<(), InterceptError>;
}

/// The intercepted call as seen by an after-callback.
pub struct CallFrame<'a> {
    pub method: &'a MethodHandle,
    pub receiver: Option<&'a dyn HostObject>,
    pub args: &'a [HostValue],
}

/// How a field read treats declared visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldAccess {
    Public,
    OverrideVisibility,
}

/// A live object inside the host.
pub trait HostObject: Send + Sync {
    fn runtime_type(&self) -> &str;

    /// Returns `None` when the runtime type (or its ancestors) declares no
    /// such field, or when the field is private and `access` is `Public`.
    fn read_field(&self, name: &str, access: FieldAccess) -> Option<HostValue>;
}

/// Values crossing the host boundary.
#[derive(Clone)]
pub enum HostValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Context(Arc<dyn HostContext>),
    Object(Arc<dyn HostObject>),
}

impl HostValue {
    pub fn type_label(&self) -> String {
        match self {
            HostValue::Null => "null".to_string(),
            HostValue::Bool(_) => "bool".to_string(),
            HostValue::Int(_) => "int".to_string(),
            HostValue::Float(_) => "float".to_string(),
            HostValue::Str(_) => "string".to_string(),
            HostValue::Context(_) => "context".to_string(),
            HostValue::Object(obj) => obj.runtime_type().to_string(),
        }
    }
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::Null => f.write_str("Null"),
            HostValue::Bool(v) => write!(f, "Bool({})", v),
            HostValue::Int(v) => write!(f, "Int({})", v),
            HostValue::Float(v) => write!(f, "Float({})", v),
            HostValue::Str(v) => write!(f, "Str({:?})", v),
            HostValue::Context(ctx) => write!(f, "Context({})", ctx.label()),
            HostValue::Object(obj) => write!(f, "Object({})", obj.runtime_type()),
        }
    }
}

/// Called with the new power-save state whenever the OS broadcasts a change.
pub type PowerSaveListener = Arc<dyn Fn(bool) + Send + Sync>;

/// Opaque registration handle returned by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// One fixed-shape vibration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VibrationPulse {
    pub duration_ms: u64,
    pub amplitude: u8,
}

pub trait Vibrator: Send + Sync {
    fn has_vibrator(&self) -> bool;
    fn vibrate(&self, pulse: VibrationPulse) -> Result<(), String>;
}

/// The host process execution context extracted from an intercepted receiver.
pub trait HostContext: Send + Sync {
    /// Short label for logs.
    fn label(&self) -> String;

    /// Current power-save state, `None` if the power service is unavailable.
    fn is_power_save_mode(&self) -> Option<bool>;

    fn register_power_save_listener(
        &self,
        listener: PowerSaveListener,
    ) -> Result<SubscriptionId, String>;

    fn unregister_power_save_listener(&self, id: SubscriptionId) -> Result<(), String>;

    /// Device vibration service, `None` if the lookup fails.
    fn vibrator(&self) -> Option<Arc<dyn Vibrator>>;
}

/// Consumer of the notification-collection interceptions.
///
/// The download producer implements this; the orchestrator only forwards frames.
pub trait NotificationObserver: Send + Sync {
    fn on_posted(&self, frame: &CallFrame<'_>);
    fn on_retracted(&self, frame: &CallFrame<'_>);

    /// Called once a new overlay is attached and its slots are wired.
    /// Implementors should re-send whatever state the fresh overlay is missing.
    fn on_overlay_attached(&self) {}
}

/// Preference gate for completion haptics.
pub trait HapticPreference: Send + Sync {
    fn haptic_on_complete(&self) -> bool;
}
