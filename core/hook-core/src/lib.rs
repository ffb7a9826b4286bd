//! # hook-core
//!
//! Attaches the download progress overlay to a host process by intercepting
//! its status-bar startup, and routes download and preference events to the
//! overlay's owning thread.
//!
//! ## Design Principles
//!
//! - **Host behind traits**: method lookup, interception, field reads, power
//!   service and vibrator are all seams in [`host`]. The [`sim`] module
//!   implements them in memory.
//! - **Never crash the host**: every failure is logged and degrades to
//!   "overlay not active". Hook callbacks catch panics.
//! - **Lock-free attachment**: an atomic phase plus atomically swapped overlay
//!   and subscription records. Readers null-check right before use.
//! - **One mutation per event**: routing posts exactly one overlay mutation to
//!   the overlay thread; completions also request a haptic pulse.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use hook_core::{load_hook_config, HookOrchestrator};
//!
//! let orchestrator = HookOrchestrator::new(load_hook_config(), factory, preference);
//! let report = orchestrator.hook(&registry, &interceptor);
//! ```

pub mod attachment;
pub mod config;
pub mod dispatch;
pub mod download;
pub mod error;
pub mod extractor;
pub mod haptics;
pub mod host;
pub mod installer;
pub mod locator;
pub mod orchestrator;
pub mod overlay;
pub mod router;
pub mod sim;
pub mod slots;

pub use attachment::{AttachClaim, AttachPhase, AttachmentSnapshot, AttachmentState};
pub use config::*;
pub use dispatch::{Dispatcher, OverlayThread};
pub use download::{DownloadNotification, DownloadTracker, NotificationDecoder};
pub use error::{FailureKind, HookError, Result};
pub use haptics::{HapticFeedback, HAPTIC_AMPLITUDE, HAPTIC_PULSE_MS};
pub use host::*;
pub use installer::{HookPoint, HookRegistration, HookReport};
pub use orchestrator::{AttachOutcome, HookOrchestrator};
pub use overlay::{OverlayFactory, OverlayHandle, OverlaySink};
pub use router::{DownloadEvents, EventRouter, PreferenceEvents};
pub use slots::{EventHandler, EventSlots};
