use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

use thiserror::Error;
use tracing::{debug, error, warn};

use super::callback::{panic_message, CallbackError, FrameCallback};
use super::handle::{FrameHandle, HandleAllocator};
use super::registry::CallbackRegistry;
use super::time::DomHighResTimeStamp;
use crate::tick::TickSource;

/// Identifies one document or worker global inside a [`FrameScheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContextId(u64);

impl ContextId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    /// Ticks follow compositor refresh.
    Document,
    /// Ticks follow a synthetic timer; there is no visual output.
    DedicatedWorker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleState {
    Idle,
    TickRequested,
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("animation frame context {0} has been torn down")]
    UnknownContext(ContextId),
}

/// Outcome of delivering one tick to a context.
#[derive(Debug)]
pub struct TickReport {
    pub context: ContextId,
    /// The value every callback in this tick received.
    pub timestamp: DomHighResTimeStamp,
    /// Handles invoked, in firing order. Includes the ones that failed.
    pub fired: Vec<FrameHandle>,
    pub failures: Vec<(FrameHandle, CallbackError)>,
    /// Captured callbacks dropped because the context was torn down mid-tick.
    pub abandoned: usize,
    /// Whether registrations made during the tick requested a follow-up tick.
    pub rescheduled: bool,
}

struct ContextSchedule<C> {
    kind: ContextKind,
    allocator: HandleAllocator,
    registry: CallbackRegistry<C>,
    state: ScheduleState,
    firing: bool,
    last_timestamp: Option<DomHighResTimeStamp>,
    tick_source: Rc<dyn TickSource>,
}

/// Per-context animation frame queues and the tick algorithm that fires them.
///
/// Every method takes `&self` so callbacks may call back into the scheduler while a
/// tick is being delivered; no internal borrow is held across a callback.
pub struct FrameScheduler<C> {
    contexts: RefCell<HashMap<ContextId, ContextSchedule<C>>>,
    next_context: Cell<u64>,
}

impl<C> Default for FrameScheduler<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> FrameScheduler<C> {
    pub fn new() -> Self {
        Self {
            contexts: RefCell::new(HashMap::new()),
            next_context: Cell::new(1),
        }
    }

    pub fn create_context(&self, kind: ContextKind, tick_source: Rc<dyn TickSource>) -> ContextId {
        let id = ContextId(self.next_context.get());
        self.next_context.set(id.0 + 1);
        self.contexts.borrow_mut().insert(
            id,
            ContextSchedule {
                kind,
                allocator: HandleAllocator::new(),
                registry: CallbackRegistry::new(),
                state: ScheduleState::Idle,
                firing: false,
                last_timestamp: None,
                tick_source,
            },
        );
        debug!(target: "frames", context = %id, ?kind, "created animation frame context");
        id
    }

    /// Queue `callback` for the next tick of `context`.
    pub fn register(&self, context: ContextId, callback: C) -> Result<FrameHandle, SchedulerError> {
        let (handle, request) = {
            let mut contexts = self.contexts.borrow_mut();
            let schedule = contexts
                .get_mut(&context)
                .ok_or(SchedulerError::UnknownContext(context))?;
            let handle = schedule.allocator.next();
            schedule.registry.insert(handle, callback);

            // Mid-tick registrations are picked up once the drain finishes.
            let request = if schedule.state == ScheduleState::Idle && !schedule.firing {
                schedule.state = ScheduleState::TickRequested;
                Some(Rc::clone(&schedule.tick_source))
            } else {
                None
            };
            (handle, request)
        };

        if let Some(source) = request {
            debug!(target: "frames", context = %context, "requesting tick");
            source.request_tick(context);
        }
        Ok(handle)
    }

    /// Withdraw a pending callback. Unknown, fired and cancelled handles are ignored.
    ///
    /// An outstanding tick request is left in place even if the queue becomes empty.
    pub fn cancel(&self, context: ContextId, handle: FrameHandle) -> bool {
        let mut contexts = self.contexts.borrow_mut();
        match contexts.get_mut(&context) {
            Some(schedule) => schedule.registry.remove(handle),
            None => false,
        }
    }

    /// Deliver a tick, invoking each captured callback through `fire`.
    ///
    /// Returns `None` when the context no longer exists.
    pub fn on_tick_with<F>(
        &self,
        context: ContextId,
        timestamp: DomHighResTimeStamp,
        mut fire: F,
    ) -> Option<TickReport>
    where
        F: FnMut(FrameHandle, C, DomHighResTimeStamp) -> Result<(), CallbackError>,
    {
        let (batch, timestamp) = {
            let mut contexts = self.contexts.borrow_mut();
            let Some(schedule) = contexts.get_mut(&context) else {
                debug!(target: "frames", context = %context, "dropping tick for closed context");
                return None;
            };
            schedule.state = ScheduleState::Idle;
            let timestamp = monotonic_timestamp(context, schedule.last_timestamp, timestamp);
            schedule.last_timestamp = Some(timestamp);
            schedule.firing = true;
            (schedule.registry.drain(), timestamp)
        };

        debug!(
            target: "frames",
            context = %context,
            timestamp,
            callbacks = batch.len(),
            "running animation frame callbacks"
        );

        let mut report = TickReport {
            context,
            timestamp,
            fired: Vec::with_capacity(batch.len()),
            failures: Vec::new(),
            abandoned: 0,
            rescheduled: false,
        };

        let mut batch = batch;
        while let Some((handle, callback)) = batch.next() {
            if !self.is_alive(context) {
                report.abandoned = 1 + batch.len();
                break;
            }

            report.fired.push(handle);
            let outcome = catch_unwind(AssertUnwindSafe(|| fire(handle, callback, timestamp)))
                .unwrap_or_else(|payload| {
                    Err(CallbackError::Panicked {
                        message: panic_message(payload.as_ref()),
                    })
                });

            if let Err(err) = outcome {
                error!(
                    target: "frames",
                    context = %context,
                    handle = handle.get(),
                    error = %err,
                    "uncaught error in animation frame callback"
                );
                report.failures.push((handle, err));
            }
        }

        let request = {
            let mut contexts = self.contexts.borrow_mut();
            contexts.get_mut(&context).and_then(|schedule| {
                schedule.firing = false;
                if schedule.state == ScheduleState::Idle && !schedule.registry.is_empty() {
                    schedule.state = ScheduleState::TickRequested;
                    Some(Rc::clone(&schedule.tick_source))
                } else {
                    None
                }
            })
        };

        if let Some(source) = request {
            debug!(target: "frames", context = %context, "requesting follow-up tick");
            source.request_tick(context);
            report.rescheduled = true;
        }

        Some(report)
    }

    /// Discard the context's queue and withdraw any outstanding tick request.
    pub fn teardown(&self, context: ContextId) -> bool {
        let removed = self.contexts.borrow_mut().remove(&context);
        match removed {
            Some(schedule) => {
                debug!(
                    target: "frames",
                    context = %context,
                    discarded = schedule.registry.len(),
                    "tearing down animation frame context"
                );
                schedule.tick_source.cancel_tick(context);
                true
            }
            None => false,
        }
    }

    /// Whether the tick source owes this context a tick.
    pub fn needs_tick(&self, context: ContextId) -> bool {
        self.state(context) == Some(ScheduleState::TickRequested)
    }

    pub fn state(&self, context: ContextId) -> Option<ScheduleState> {
        self.contexts.borrow().get(&context).map(|s| s.state)
    }

    pub fn kind(&self, context: ContextId) -> Option<ContextKind> {
        self.contexts.borrow().get(&context).map(|s| s.kind)
    }

    pub fn pending_callbacks(&self, context: ContextId) -> usize {
        self.contexts
            .borrow()
            .get(&context)
            .map(|s| s.registry.len())
            .unwrap_or(0)
    }

    pub fn last_timestamp(&self, context: ContextId) -> Option<DomHighResTimeStamp> {
        self.contexts.borrow().get(&context).and_then(|s| s.last_timestamp)
    }

    pub fn is_alive(&self, context: ContextId) -> bool {
        self.contexts.borrow().contains_key(&context)
    }

    pub fn context_count(&self) -> usize {
        self.contexts.borrow().len()
    }
}

impl<C: FrameCallback> FrameScheduler<C> {
    /// Deliver a tick, invoking each callback directly.
    pub fn on_tick(&self, context: ContextId, timestamp: DomHighResTimeStamp) -> Option<TickReport> {
        self.on_tick_with(context, timestamp, |_, callback, timestamp| {
            callback.invoke(timestamp)
        })
    }
}

fn monotonic_timestamp(
    context: ContextId,
    last: Option<DomHighResTimeStamp>,
    timestamp: DomHighResTimeStamp,
) -> DomHighResTimeStamp {
    let floor = last.unwrap_or(0.0);
    if !timestamp.is_finite() {
        warn!(target: "frames", context = %context, timestamp, "non-finite tick timestamp");
        return floor;
    }
    if timestamp < floor {
        warn!(
            target: "frames",
            context = %context,
            timestamp,
            previous = floor,
            "tick timestamp went backwards; clamping"
        );
        return floor;
    }
    timestamp
}

/// The `requestAnimationFrame` / `cancelAnimationFrame` pair any global can expose.
pub trait AnimationFrameProvider<C> {
    fn request_animation_frame(&self, callback: C) -> Result<FrameHandle, SchedulerError>;
    fn cancel_animation_frame(&self, handle: FrameHandle);
}

/// A context's share of a [`FrameScheduler`]. Tears the context down when dropped.
pub struct ContextFrames<C> {
    scheduler: Rc<FrameScheduler<C>>,
    context: ContextId,
}

impl<C> ContextFrames<C> {
    pub fn new(
        scheduler: Rc<FrameScheduler<C>>,
        kind: ContextKind,
        tick_source: Rc<dyn TickSource>,
    ) -> Self {
        let context = scheduler.create_context(kind, tick_source);
        Self { scheduler, context }
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    pub fn scheduler(&self) -> &Rc<FrameScheduler<C>> {
        &self.scheduler
    }

    pub fn close(&self) -> bool {
        self.scheduler.teardown(self.context)
    }
}

impl<C: FrameCallback> ContextFrames<C> {
    pub fn run_tick(&self, timestamp: DomHighResTimeStamp) -> Option<TickReport> {
        self.scheduler.on_tick(self.context, timestamp)
    }
}

impl<C> AnimationFrameProvider<C> for ContextFrames<C> {
    fn request_animation_frame(&self, callback: C) -> Result<FrameHandle, SchedulerError> {
        self.scheduler.register(self.context, callback)
    }

    fn cancel_animation_frame(&self, handle: FrameHandle) {
        self.scheduler.cancel(self.context, handle);
    }
}

impl<C> Drop for ContextFrames<C> {
    fn drop(&mut self) {
        self.scheduler.teardown(self.context);
    }
}
