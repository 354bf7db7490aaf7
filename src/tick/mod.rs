//! Sources of "tick now" events for the frame scheduler.

pub mod compositor;
pub mod interval;

pub use compositor::CompositorTickSource;
pub use interval::IntervalTickSource;

use crate::frame::{ContextId, DomHighResTimeStamp, FrameCallback, FrameScheduler, TickReport};

/// Receives tick requests from the scheduler and eventually delivers the tick.
///
/// Both calls are made with no scheduler borrow outstanding, and must not block.
pub trait TickSource {
    /// The context has callbacks waiting; deliver one tick when due.
    fn request_tick(&self, context: ContextId);
    /// The context was torn down; forget any tick owed to it and anything else
    /// recorded for it.
    fn cancel_tick(&self, context: ContextId);
}

/// A tick ready to be delivered to a context.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickEvent {
    pub context: ContextId,
    pub timestamp: DomHighResTimeStamp,
}

/// Feed a batch of tick events into the scheduler in order.
pub fn drive<C, I>(scheduler: &FrameScheduler<C>, events: I) -> Vec<TickReport>
where
    C: FrameCallback,
    I: IntoIterator<Item = TickEvent>,
{
    events
        .into_iter()
        .filter_map(|event| scheduler.on_tick(event.context, event.timestamp))
        .collect()
}
