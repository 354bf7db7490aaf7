use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::time::Instant;

use anyhow::{Context as AnyhowContext, Result};
use rquickjs::{Ctx, Function, IntoJs, Object, Persistent, Value};
use tokio::runtime::Handle;
use tracing::{debug, error};

use super::runtime::{capture_exception_message, QuickJsEngine};
use crate::config::FrameConfig;
use crate::frame::{
    CallbackError, ContextFrames, ContextId, ContextKind, DomHighResTimeStamp, FrameHandle,
    FrameScheduler, TickReport, TimeOrigin,
};
use crate::tick::{CompositorTickSource, IntervalTickSource, TickEvent, TickSource};

/// Scheduler entry for a script callback. The function itself is kept in the global's
/// JS-side frame map under the same handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptFrame;

/// A document or dedicated-worker global exposing `requestAnimationFrame`.
pub struct ScriptGlobal {
    // Released before the engine that owns the runtime.
    invoke: Persistent<Function<'static>>,
    engine: QuickJsEngine,
    frames: ContextFrames<ScriptFrame>,
    origin: TimeOrigin,
    kind: ContextKind,
}

impl ScriptGlobal {
    pub fn new(
        scheduler: Rc<FrameScheduler<ScriptFrame>>,
        kind: ContextKind,
        tick_source: Rc<dyn TickSource>,
        origin: TimeOrigin,
        config: &FrameConfig,
    ) -> Result<Self> {
        let engine = QuickJsEngine::with_job_limit(config.max_pending_jobs)?;
        let frames = ContextFrames::new(scheduler, kind, tick_source);
        let invoke = install_frame_bindings(&engine, &frames, kind, origin)
            .context("failed to install animation frame bindings")?;
        Ok(Self {
            invoke,
            engine,
            frames,
            origin,
            kind,
        })
    }

    pub fn context(&self) -> ContextId {
        self.frames.context()
    }

    pub fn kind(&self) -> ContextKind {
        self.kind
    }

    pub fn origin(&self) -> TimeOrigin {
        self.origin
    }

    pub fn eval(&self, source: &str, filename: &str) -> Result<()> {
        self.engine.eval(source, filename)
    }

    pub fn eval_with<V>(&self, source: &str, filename: &str) -> Result<V>
    where
        V: for<'js> rquickjs::FromJs<'js>,
    {
        self.engine.eval_with(source, filename)
    }

    pub fn pending_animation_frames(&self) -> usize {
        self.frames
            .scheduler()
            .pending_callbacks(self.frames.context())
    }

    pub fn needs_tick(&self) -> bool {
        self.frames.scheduler().needs_tick(self.frames.context())
    }

    pub fn is_closed(&self) -> bool {
        !self.frames.scheduler().is_alive(self.frames.context())
    }

    /// Tear the global's schedule down. Pending callbacks never fire.
    pub fn close(&self) -> bool {
        self.frames.close()
    }

    /// Fire this global's animation frame callbacks for one tick.
    ///
    /// Script exceptions are isolated per callback and reported in the returned
    /// [`TickReport`]. Returns `None` once the global is closed.
    pub fn run_animation_frame(
        &self,
        timestamp: DomHighResTimeStamp,
    ) -> Result<Option<TickReport>> {
        let scheduler = Rc::clone(self.frames.scheduler());
        let context = self.frames.context();
        let invoke = self.invoke.clone();

        let report = self.engine.with_context(|ctx| {
            let invoke = invoke.restore(&ctx)?;
            Ok(
                scheduler.on_tick_with(context, timestamp, |handle, _frame, timestamp| {
                    invoke
                        .call::<_, Value<'_>>((handle.get(), timestamp))
                        .map(|_| ())
                        .map_err(|err| script_failure(&ctx, err))
                }),
            )
        })?;

        self.engine.drain_jobs()?;
        Ok(report)
    }
}

fn script_failure(ctx: &Ctx<'_>, err: rquickjs::Error) -> CallbackError {
    match err {
        rquickjs::Error::Exception => CallbackError::threw(capture_exception_message(ctx)),
        other => CallbackError::Host(anyhow::Error::from(other)),
    }
}

/// Install the frame API on the engine's global object and return the invoke hook.
///
/// The natives are handed to the bootstrap as arguments and the hook comes back as
/// its result, so nothing the page can reassign sits between a tick and its callbacks.
fn install_frame_bindings(
    engine: &QuickJsEngine,
    frames: &ContextFrames<ScriptFrame>,
    kind: ContextKind,
    origin: TimeOrigin,
) -> Result<Persistent<Function<'static>>> {
    let scheduler = Rc::clone(frames.scheduler());
    let context = frames.context();

    engine.with_context(|ctx| {
        let natives = Object::new(ctx.clone())?;
        natives.set("isWorker", kind == ContextKind::DedicatedWorker)?;

        {
            let scheduler_ref = Rc::clone(&scheduler);
            let func = Function::new(
                ctx.clone(),
                move |ctx: Ctx<'_>| -> rquickjs::Result<u32> {
                    match scheduler_ref.register(context, ScriptFrame) {
                        Ok(handle) => Ok(handle.get()),
                        Err(err) => {
                            let value = err.to_string().into_js(&ctx)?;
                            Err(ctx.throw(value))
                        }
                    }
                },
            )?
            .with_name("__frontier_request_animation_frame")?;
            natives.set("request", func)?;
        }

        {
            // Reports whether the handle was still queued; entries already captured
            // by a running tick are out of reach and keep their function.
            let scheduler_ref = Rc::clone(&scheduler);
            let func = Function::new(
                ctx.clone(),
                move |_ctx: Ctx<'_>, id: Value<'_>| -> rquickjs::Result<bool> {
                    let raw = id.as_int().map(f64::from).or_else(|| id.as_float());
                    Ok(raw
                        .and_then(FrameHandle::from_script_value)
                        .map(|handle| scheduler_ref.cancel(context, handle))
                        .unwrap_or(false))
                },
            )?
            .with_name("__frontier_cancel_animation_frame")?;
            natives.set("cancel", func)?;
        }

        {
            let func = Function::new(ctx.clone(), move || -> rquickjs::Result<f64> {
                Ok(origin.now())
            })?
            .with_name("now")?;
            natives.set("now", func)?;
        }

        if kind == ContextKind::DedicatedWorker {
            let scheduler_ref = Rc::clone(&scheduler);
            let func = Function::new(ctx.clone(), move || -> rquickjs::Result<()> {
                scheduler_ref.teardown(context);
                Ok(())
            })?
            .with_name("__frontier_close_global")?;
            natives.set("close", func)?;
        }

        let installed = ctx
            .eval::<Function<'_>, _>(FRAME_BOOTSTRAP.as_bytes())
            .and_then(|install| install.call::<_, Function<'_>>((natives,)));
        match installed {
            Ok(invoke) => Ok(Persistent::save(&ctx, invoke)),
            Err(err) => {
                if let rquickjs::Error::Exception = err {
                    let value: Value<'_> = ctx.catch();
                    tracing::error!(target: "quickjs", "frame bootstrap failed: {:?}", value);
                }
                Err(err)
            }
        }
    })
}

/// Owns the frame scheduler and both tick sources for a set of script globals.
///
/// Documents tick when the host presents a frame; workers tick on the synthetic
/// frame clock and are delivered by [`pump_workers`](Self::pump_workers) or
/// [`next_worker_frame`](Self::next_worker_frame).
pub struct ScriptHost {
    config: FrameConfig,
    scheduler: Rc<FrameScheduler<ScriptFrame>>,
    compositor: Rc<CompositorTickSource>,
    worker_clock: Rc<IntervalTickSource>,
    globals: RefCell<HashMap<ContextId, Weak<ScriptGlobal>>>,
}

impl ScriptHost {
    /// Must be called from inside a tokio runtime; the worker clock spawns onto it.
    pub fn new(config: FrameConfig) -> Result<Self> {
        let handle =
            Handle::try_current().context("the worker frame clock needs a tokio runtime")?;
        let worker_clock = IntervalTickSource::new(handle, config.worker_frame_interval());
        Ok(Self {
            config,
            scheduler: Rc::new(FrameScheduler::new()),
            compositor: Rc::new(CompositorTickSource::default()),
            worker_clock: Rc::new(worker_clock),
            globals: RefCell::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &Rc<FrameScheduler<ScriptFrame>> {
        &self.scheduler
    }

    pub fn create_document(&self) -> Result<Rc<ScriptGlobal>> {
        let origin = TimeOrigin::now_origin();
        let global = ScriptGlobal::new(
            Rc::clone(&self.scheduler),
            ContextKind::Document,
            self.compositor.clone(),
            origin,
            &self.config,
        )?;
        self.compositor.attach(global.context(), origin);
        Ok(self.track(global))
    }

    pub fn create_worker(&self) -> Result<Rc<ScriptGlobal>> {
        let origin = TimeOrigin::now_origin();
        let global = ScriptGlobal::new(
            Rc::clone(&self.scheduler),
            ContextKind::DedicatedWorker,
            self.worker_clock.clone(),
            origin,
            &self.config,
        )?;
        self.worker_clock.attach(global.context(), origin);
        Ok(self.track(global))
    }

    fn track(&self, global: ScriptGlobal) -> Rc<ScriptGlobal> {
        let global = Rc::new(global);
        self.globals
            .borrow_mut()
            .insert(global.context(), Rc::downgrade(&global));
        global
    }

    /// Whether any document wants the next display frame.
    pub fn wants_frame(&self) -> bool {
        self.compositor.wants_frame()
    }

    pub fn has_pending_frames(&self) -> bool {
        self.compositor.wants_frame() || self.worker_clock.has_pending()
    }

    /// Deliver a display refresh at `vsync` to every document that asked for one.
    pub fn present_frame(&self, vsync: Instant) -> Vec<TickReport> {
        let events = self.compositor.begin_frame(vsync);
        self.deliver(events)
    }

    /// Deliver worker ticks that are already due.
    pub fn pump_workers(&self) -> Vec<TickReport> {
        let events = self.worker_clock.poll_due();
        self.deliver(events)
    }

    /// Wait for the worker frame clock, then deliver whatever came due.
    pub async fn next_worker_frame(&self) -> Vec<TickReport> {
        let events = self.worker_clock.next_ticks().await;
        self.deliver(events)
    }

    /// Run each event's global in turn. A global that fails is logged and skipped;
    /// the others still get their frame.
    fn deliver(&self, events: Vec<TickEvent>) -> Vec<TickReport> {
        let mut reports = Vec::with_capacity(events.len());
        for event in events {
            let global = self
                .globals
                .borrow()
                .get(&event.context)
                .and_then(Weak::upgrade);
            let Some(global) = global else {
                debug!(target: "frames", context = %event.context, "tick for dropped global");
                continue;
            };
            match global.run_animation_frame(event.timestamp) {
                Ok(Some(report)) => reports.push(report),
                Ok(None) => {}
                Err(err) => error!(
                    target: "frames",
                    context = %event.context,
                    error = %format!("{err:#}"),
                    "failed to run animation frame"
                ),
            }
        }
        self.globals
            .borrow_mut()
            .retain(|_, global| global.strong_count() > 0);
        reports
    }
}

const FRAME_BOOTSTRAP: &str = r#"
(function installAnimationFrames(natives) {
    const global = globalThis;
    const FRAME_CALLBACKS = new Map();
    const requestNative = natives.request;
    const cancelNative = natives.cancel;

    if (typeof global.self === 'undefined') {
        global.self = global;
    }
    if (!natives.isWorker && typeof global.window === 'undefined') {
        global.window = global;
    }

    global.requestAnimationFrame = function requestAnimationFrame(callback) {
        if (typeof callback !== 'function') {
            throw new TypeError(
                "Failed to execute 'requestAnimationFrame': parameter 1 is not of type 'FrameRequestCallback'."
            );
        }
        const handle = requestNative();
        FRAME_CALLBACKS.set(handle, callback);
        return handle;
    };

    global.cancelAnimationFrame = function cancelAnimationFrame(handle) {
        const id = Number(handle);
        if (!Number.isInteger(id) || id <= 0) {
            return;
        }
        if (cancelNative(id)) {
            FRAME_CALLBACKS.delete(id);
        }
    };

    // The built-in performance.now is read-only, so swap in a whole object.
    global.performance = { now: natives.now };

    if (natives.isWorker) {
        const closeNative = natives.close;
        global.close = function close() {
            FRAME_CALLBACKS.clear();
            closeNative();
        };
    }

    return function __frontierInvokeAnimationFrame(handle, timestamp) {
        const callback = FRAME_CALLBACKS.get(handle);
        if (callback === undefined) {
            return;
        }
        FRAME_CALLBACKS.delete(handle);
        callback.call(global, timestamp);
    };
})
"#;
