use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::sync::Arc;
use std::task::{Poll, Waker};
use std::time::{Duration, Instant};

use futures_util::future::poll_fn;
use futures_util::task::AtomicWaker;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::sleep_until;
use tracing::debug;

use super::{TickEvent, TickSource};
use crate::frame::{ContextId, TimeOrigin};

struct FiredTick {
    context: ContextId,
    generation: u64,
    deadline: Instant,
}

struct PendingTick {
    generation: u64,
    task: JoinHandle<()>,
}

/// Tick source for worker contexts: a synthetic frame clock on a tokio runtime.
///
/// Each requested tick lands on the next multiple of `interval` past the source's
/// epoch, so independent workers share a cadence.
pub struct IntervalTickSource {
    handle: Handle,
    interval: Duration,
    epoch: Instant,
    next_generation: Cell<u64>,
    origins: RefCell<HashMap<ContextId, TimeOrigin>>,
    pending: RefCell<HashMap<ContextId, PendingTick>>,
    fired_rx: RefCell<UnboundedReceiver<FiredTick>>,
    fired_tx: UnboundedSender<FiredTick>,
    waker: Arc<AtomicWaker>,
}

impl IntervalTickSource {
    pub fn new(handle: Handle, interval: Duration) -> Self {
        let (fired_tx, fired_rx) = unbounded_channel();
        Self {
            handle,
            interval: interval.max(Duration::from_millis(1)),
            epoch: Instant::now(),
            next_generation: Cell::new(1),
            origins: RefCell::new(HashMap::new()),
            pending: RefCell::new(HashMap::new()),
            fired_rx: RefCell::new(fired_rx),
            fired_tx,
            waker: Arc::new(AtomicWaker::new()),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn attach(&self, context: ContextId, origin: TimeOrigin) {
        self.origins.borrow_mut().insert(context, origin);
    }

    pub fn register_waker(&self, waker: &Waker) {
        self.waker.register(waker);
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.borrow().is_empty()
    }

    fn next_deadline(&self, now: Instant) -> Instant {
        let interval = self.interval.as_nanos();
        let elapsed = now.saturating_duration_since(self.epoch).as_nanos();
        let frames = elapsed / interval + 1;
        let offset = interval * frames;
        let offset = Duration::new(
            (offset / 1_000_000_000) as u64,
            (offset % 1_000_000_000) as u32,
        );
        self.epoch + offset
    }

    /// Collect every tick that has come due, without waiting.
    pub fn poll_due(&self) -> Vec<TickEvent> {
        let mut fired = Vec::new();
        {
            let mut rx = self.fired_rx.borrow_mut();
            while let Ok(tick) = rx.try_recv() {
                fired.push(tick);
            }
        }

        let mut pending = self.pending.borrow_mut();
        let origins = self.origins.borrow();
        let mut events = Vec::with_capacity(fired.len());
        for tick in fired {
            let current = pending
                .get(&tick.context)
                .map(|entry| entry.generation == tick.generation)
                .unwrap_or(false);
            if !current {
                // Cancelled or superseded after the task had already fired.
                continue;
            }
            pending.remove(&tick.context);
            let origin = origins
                .get(&tick.context)
                .copied()
                .unwrap_or_else(|| TimeOrigin::from_instant(self.epoch));
            events.push(TickEvent {
                context: tick.context,
                timestamp: origin.timestamp_at(tick.deadline),
            });
        }
        events
    }

    /// Wait until at least one tick is due. Returns immediately with nothing when no
    /// tick is outstanding.
    pub async fn next_ticks(&self) -> Vec<TickEvent> {
        poll_fn(|cx| {
            self.waker.register(cx.waker());
            let events = self.poll_due();
            if !events.is_empty() || !self.has_pending() {
                Poll::Ready(events)
            } else {
                Poll::Pending
            }
        })
        .await
    }
}

impl TickSource for IntervalTickSource {
    fn request_tick(&self, context: ContextId) {
        let mut pending = self.pending.borrow_mut();
        if pending.contains_key(&context) {
            return;
        }

        let generation = self.next_generation.get();
        self.next_generation.set(generation + 1);
        let deadline = self.next_deadline(Instant::now());
        let tx = self.fired_tx.clone();
        let waker = Arc::clone(&self.waker);
        let task = self.handle.spawn(async move {
            sleep_until(tokio::time::Instant::from_std(deadline)).await;
            let tick = FiredTick {
                context,
                generation,
                deadline,
            };
            if tx.send(tick).is_ok() {
                waker.wake();
            }
        });

        debug!(target: "frames", context = %context, generation, "scheduled worker tick");
        pending.insert(context, PendingTick { generation, task });
    }

    fn cancel_tick(&self, context: ContextId) {
        if let Some(entry) = self.pending.borrow_mut().remove(&context) {
            entry.task.abort();
        }
        self.origins.borrow_mut().remove(&context);
        self.waker.wake();
    }
}

impl Drop for IntervalTickSource {
    fn drop(&mut self) {
        for (_, entry) in self.pending.borrow_mut().drain() {
            entry.task.abort();
        }
    }
}
