//! The overlay as seen by the orchestrator: an opaque sink plus the
//! dispatcher for the thread that owns it.

use overlay_protocol::OverlayMutation;
use std::sync::Arc;

use crate::dispatch::Dispatcher;
use crate::host::HostContext;

/// Receives mutations. Always called on the owning thread of its dispatcher.
pub trait OverlaySink: Send + Sync {
    fn apply(&self, mutation: OverlayMutation);
}

/// Creates the overlay and attaches it to the host's window hierarchy.
pub trait OverlayFactory: Send + Sync {
    fn create(&self, context: &Arc<dyn HostContext>) -> Result<OverlayHandle, String>;
}

#[derive(Clone)]
pub struct OverlayHandle {
    pub sink: Arc<dyn OverlaySink>,
    pub dispatcher: Arc<dyn Dispatcher>,
}

impl OverlayHandle {
    pub fn new(sink: Arc<dyn OverlaySink>, dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self { sink, dispatcher }
    }

    /// Posts one mutation to the owning thread.
    pub fn post(&self, mutation: OverlayMutation) -> bool {
        let sink = Arc::clone(&self.sink);
        self.dispatcher.post(Box::new(move || sink.apply(mutation)))
    }
}
