//! Best-effort completion haptics. Never a correctness path: every failure is swallowed.

use std::sync::Arc;

use crate::host::{HapticPreference, HostContext, VibrationPulse};

pub const HAPTIC_PULSE_MS: u64 = 50;
pub const HAPTIC_AMPLITUDE: u8 = 128;

pub const COMPLETION_PULSE: VibrationPulse = VibrationPulse {
    duration_ms: HAPTIC_PULSE_MS,
    amplitude: HAPTIC_AMPLITUDE,
};

#[derive(Clone)]
pub struct HapticFeedback {
    preference: Arc<dyn HapticPreference>,
}

impl HapticFeedback {
    pub fn new(preference: Arc<dyn HapticPreference>) -> Self {
        Self { preference }
    }

    /// Vibrates once if the preference allows it and the device can.
    /// Returns true only when a vibration was actually requested and accepted.
    pub fn trigger(&self, context: &dyn HostContext) -> bool {
        if !self.preference.haptic_on_complete() {
            return false;
        }
        let Some(vibrator) = context.vibrator() else {
            tracing::debug!(context = %context.label(), "Vibrator service unavailable");
            return false;
        };
        if !vibrator.has_vibrator() {
            return false;
        }
        match vibrator.vibrate(COMPLETION_PULSE) {
            Ok(()) => true,
            Err(err) => {
                tracing::debug!(error = %err, "Haptic feedback failed");
                false
            }
        }
    }
}
