use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::time::Instant;

use tracing::debug;

use super::{TickEvent, TickSource};
use crate::frame::{ContextId, TimeOrigin};

/// Tick source for document contexts, driven by the host's display refresh.
///
/// The scheduler records which documents want a frame; the host asks
/// [`wants_frame`](Self::wants_frame) before presenting and calls
/// [`begin_frame`](Self::begin_frame) with the vsync instant.
pub struct CompositorTickSource {
    default_origin: TimeOrigin,
    origins: RefCell<HashMap<ContextId, TimeOrigin>>,
    pending: RefCell<BTreeSet<ContextId>>,
}

impl Default for CompositorTickSource {
    fn default() -> Self {
        Self::new(TimeOrigin::now_origin())
    }
}

impl CompositorTickSource {
    pub fn new(default_origin: TimeOrigin) -> Self {
        Self {
            default_origin,
            origins: RefCell::new(HashMap::new()),
            pending: RefCell::new(BTreeSet::new()),
        }
    }

    /// Stamp this context's ticks relative to `origin`.
    pub fn attach(&self, context: ContextId, origin: TimeOrigin) {
        self.origins.borrow_mut().insert(context, origin);
    }

    pub fn wants_frame(&self) -> bool {
        !self.pending.borrow().is_empty()
    }

    pub fn is_pending(&self, context: ContextId) -> bool {
        self.pending.borrow().contains(&context)
    }

    /// Take every context waiting for a frame, stamped with `vsync`.
    pub fn begin_frame(&self, vsync: Instant) -> Vec<TickEvent> {
        let pending = std::mem::take(&mut *self.pending.borrow_mut());
        let origins = self.origins.borrow();
        let events: Vec<TickEvent> = pending
            .into_iter()
            .map(|context| {
                let origin = origins.get(&context).unwrap_or(&self.default_origin);
                TickEvent {
                    context,
                    timestamp: origin.timestamp_at(vsync),
                }
            })
            .collect();
        if !events.is_empty() {
            debug!(target: "frames", contexts = events.len(), "compositor frame");
        }
        events
    }
}

impl TickSource for CompositorTickSource {
    fn request_tick(&self, context: ContextId) {
        self.pending.borrow_mut().insert(context);
    }

    fn cancel_tick(&self, context: ContextId) {
        self.pending.borrow_mut().remove(&context);
        self.origins.borrow_mut().remove(&context);
    }
}
