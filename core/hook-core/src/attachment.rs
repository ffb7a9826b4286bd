//! The single authoritative attachment state.
//!
//! ```text
//! Unattached ──begin_attach──► Attaching ──commit──► Attached
//!      ▲                          │                    │
//!      └────────abandon───────────┘◄───────reset───────┘
//! ```
//!
//! No mutex: the phase is an atomic word, the overlay record and power-save
//! subscription are atomically swapped nullable references. Readers must
//! null-check right before use because teardown can race with them.
//! Invariants outside the transient `Attaching` window: overlay present iff
//! `Attached`; subscription present implies overlay present.
//!
//! The phase word also carries a generation that every `reset` bumps. An
//! attach attempt holds an [`AttachClaim`] for the generation it started in,
//! so an attempt that outlived a teardown can neither commit nor replace the
//! overlay of a newer attempt.

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use ulid::Ulid;

use crate::host::{HostContext, SubscriptionId};
use crate::overlay::OverlayHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum AttachPhase {
    Unattached = 0,
    Attaching = 1,
    Attached = 2,
}

impl AttachPhase {
    fn from_bits(value: u64) -> Self {
        match value & PHASE_MASK {
            1 => AttachPhase::Attaching,
            2 => AttachPhase::Attached,
            _ => AttachPhase::Unattached,
        }
    }
}

const PHASE_BITS: u32 = 2;
const PHASE_MASK: u64 = (1 << PHASE_BITS) - 1;

fn word(generation: u64, phase: AttachPhase) -> u64 {
    (generation << PHASE_BITS) | phase as u64
}

fn generation_of(word: u64) -> u64 {
    word >> PHASE_BITS
}

/// Proof that the caller owns the `Attaching` phase of one generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachClaim {
    generation: u64,
}

impl AttachClaim {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// The live overlay for one attach cycle.
pub struct AttachedOverlay {
    pub cycle: Ulid,
    /// Generation of the claim that created it.
    pub generation: u64,
    pub attached_at: DateTime<Utc>,
    pub context: Arc<dyn HostContext>,
    pub overlay: OverlayHandle,
}

/// OS power-save registration scoped to the context it was registered on.
pub struct PowerSubscription {
    pub cycle: Ulid,
    pub id: SubscriptionId,
    pub context: Arc<dyn HostContext>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttachmentSnapshot {
    pub phase: AttachPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cycle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attached_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub power_subscribed: bool,
    pub attach_count: u64,
    pub generation: u64,
}

pub struct AttachmentState {
    phase: AtomicU64,
    overlay: ArcSwapOption<AttachedOverlay>,
    subscription: ArcSwapOption<PowerSubscription>,
    attach_count: AtomicU64,
}

impl Default for AttachmentState {
    fn default() -> Self {
        Self::new()
    }
}

impl AttachmentState {
    pub fn new() -> Self {
        Self {
            phase: AtomicU64::new(word(0, AttachPhase::Unattached)),
            overlay: ArcSwapOption::empty(),
            subscription: ArcSwapOption::empty(),
            attach_count: AtomicU64::new(0),
        }
    }

    pub fn phase(&self) -> AttachPhase {
        AttachPhase::from_bits(self.phase.load(Ordering::Acquire))
    }

    pub fn generation(&self) -> u64 {
        generation_of(self.phase.load(Ordering::Acquire))
    }

    pub fn is_attached(&self) -> bool {
        self.phase() == AttachPhase::Attached
    }

    /// Current overlay record, if any.
    pub fn current(&self) -> Option<Arc<AttachedOverlay>> {
        self.overlay.load_full()
    }

    /// Claims the right to attach. `None` if another caller is attaching or attached.
    pub fn begin_attach(&self) -> Option<AttachClaim> {
        let current = self.phase.load(Ordering::Acquire);
        if AttachPhase::from_bits(current) != AttachPhase::Unattached {
            return None;
        }
        let generation = generation_of(current);
        self.transition(generation, AttachPhase::Unattached, AttachPhase::Attaching)
            .then_some(AttachClaim { generation })
    }

    /// Gives up an attach attempt. No-op if a teardown already reset the phase.
    pub fn abandon_attach(&self, claim: AttachClaim) {
        self.transition(claim.generation, AttachPhase::Attaching, AttachPhase::Unattached);
    }

    /// Stores the overlay unless a newer generation already published one.
    /// Returns `None` when the claim is stale.
    pub fn publish(
        &self,
        claim: AttachClaim,
        overlay: AttachedOverlay,
    ) -> Option<Arc<AttachedOverlay>> {
        let overlay = Arc::new(overlay);
        let mut stored = false;
        self.overlay.rcu(|current| match current {
            Some(existing) if existing.generation > claim.generation => {
                stored = false;
                Some(Arc::clone(existing))
            }
            _ => {
                stored = true;
                Some(Arc::clone(&overlay))
            }
        });
        stored.then_some(overlay)
    }

    /// Completes the attach. False if a teardown reset the phase meanwhile.
    pub fn commit(&self, claim: AttachClaim) -> bool {
        let committed =
            self.transition(claim.generation, AttachPhase::Attaching, AttachPhase::Attached);
        if committed {
            self.attach_count.fetch_add(1, Ordering::Relaxed);
        }
        committed
    }

    /// Stores the subscription only while its cycle's overlay is still current.
    /// Hands it back otherwise so the caller can revoke it.
    pub fn set_subscription(
        &self,
        subscription: PowerSubscription,
    ) -> Result<(), PowerSubscription> {
        let current_cycle = self.overlay.load_full().map(|o| o.cycle);
        if current_cycle != Some(subscription.cycle) {
            return Err(subscription);
        }
        self.subscription.store(Some(Arc::new(subscription)));
        Ok(())
    }

    pub fn take_subscription(&self) -> Option<Arc<PowerSubscription>> {
        self.subscription.swap(None)
    }

    pub fn take_overlay(&self) -> Option<Arc<AttachedOverlay>> {
        self.overlay.swap(None)
    }

    /// Removes the overlay only if it still belongs to `cycle`.
    pub fn take_overlay_if(&self, cycle: Ulid) -> Option<Arc<AttachedOverlay>> {
        let previous = self.overlay.rcu(|current| match current {
            Some(overlay) if overlay.cycle == cycle => None,
            other => other.clone(),
        });
        previous.filter(|overlay| overlay.cycle == cycle)
    }

    /// Returns to `Unattached` and starts a new generation.
    pub fn reset(&self) {
        let _ = self
            .phase
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(word(generation_of(current) + 1, AttachPhase::Unattached))
            });
    }

    pub fn snapshot(&self) -> AttachmentSnapshot {
        let overlay = self.overlay.load_full();
        AttachmentSnapshot {
            phase: self.phase(),
            cycle: overlay.as_ref().map(|o| o.cycle.to_string()),
            attached_at: overlay.as_ref().map(|o| o.attached_at),
            context: overlay.as_ref().map(|o| o.context.label()),
            power_subscribed: self.subscription.load().is_some(),
            attach_count: self.attach_count.load(Ordering::Relaxed),
            generation: self.generation(),
        }
    }

    fn transition(&self, generation: u64, from: AttachPhase, to: AttachPhase) -> bool {
        self.phase
            .compare_exchange(
                word(generation, from),
                word(generation, to),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::OverlayThread;
    use crate::sim::{RecordingSink, SimContext};

    fn overlay_record(cycle: Ulid, generation: u64) -> AttachedOverlay {
        let context: Arc<dyn HostContext> = Arc::new(SimContext::new("ctx"));
        let thread = Arc::new(OverlayThread::spawn("overlay-test").unwrap());
        AttachedOverlay {
            cycle,
            generation,
            attached_at: Utc::now(),
            context,
            overlay: OverlayHandle::new(Arc::new(RecordingSink::new()), thread),
        }
    }

    fn attach(state: &AttachmentState) -> (AttachClaim, Ulid) {
        let claim = state.begin_attach().unwrap();
        let cycle = Ulid::new();
        state
            .publish(claim, overlay_record(cycle, claim.generation()))
            .unwrap();
        (claim, cycle)
    }

    #[test]
    fn test_only_one_caller_can_begin_attach() {
        let state = AttachmentState::new();
        let claim = state.begin_attach().unwrap();
        assert!(state.begin_attach().is_none());
        assert_eq!(state.phase(), AttachPhase::Attaching);

        state.abandon_attach(claim);
        assert_eq!(state.phase(), AttachPhase::Unattached);
        assert!(state.begin_attach().is_some());
    }

    #[test]
    fn test_commit_fails_after_reset() {
        let state = AttachmentState::new();
        let claim = state.begin_attach().unwrap();
        state.reset();
        assert!(!state.commit(claim));
        assert_eq!(state.phase(), AttachPhase::Unattached);
        assert_eq!(state.snapshot().attach_count, 0);
        assert_eq!(state.generation(), claim.generation() + 1);
    }

    #[test]
    fn test_stale_claim_cannot_commit_newer_attempt() {
        let state = AttachmentState::new();
        let (stale, stale_cycle) = attach(&state);

        // Teardown between the stale attempt's publish and commit.
        state.take_overlay();
        state.reset();

        let (fresh, fresh_cycle) = attach(&state);
        assert!(!state.commit(stale));
        assert!(state.take_overlay_if(stale_cycle).is_none());
        assert!(state.commit(fresh));

        assert_eq!(state.phase(), AttachPhase::Attached);
        assert_eq!(state.current().map(|o| o.cycle), Some(fresh_cycle));
    }

    #[test]
    fn test_stale_claim_cannot_replace_newer_overlay() {
        let state = AttachmentState::new();
        let stale = state.begin_attach().unwrap();
        state.reset();
        let (fresh, fresh_cycle) = attach(&state);

        let rejected = state.publish(stale, overlay_record(Ulid::new(), stale.generation()));
        assert!(rejected.is_none());
        assert_eq!(state.current().map(|o| o.cycle), Some(fresh_cycle));

        state.abandon_attach(stale);
        assert_eq!(state.phase(), AttachPhase::Attaching);
        assert!(state.commit(fresh));
    }

    #[test]
    fn test_subscription_requires_matching_overlay() {
        let state = AttachmentState::new();
        let context: Arc<dyn HostContext> = Arc::new(SimContext::new("ctx"));

        let orphan = PowerSubscription {
            cycle: Ulid::new(),
            id: SubscriptionId(1),
            context: context.clone(),
        };
        assert!(state.set_subscription(orphan).is_err());

        let (_claim, cycle) = attach(&state);
        let sub = PowerSubscription {
            cycle,
            id: SubscriptionId(2),
            context,
        };
        assert!(state.set_subscription(sub).is_ok());
        assert!(state.snapshot().power_subscribed);
        assert_eq!(state.take_subscription().map(|s| s.id), Some(SubscriptionId(2)));
        assert!(state.take_subscription().is_none());
    }

    #[test]
    fn test_take_overlay_if_ignores_other_cycles() {
        let state = AttachmentState::new();
        let (_claim, cycle) = attach(&state);

        assert!(state.take_overlay_if(Ulid::new()).is_none());
        assert!(state.current().is_some());
        assert!(state.take_overlay_if(cycle).is_some());
        assert!(state.current().is_none());
    }
}
