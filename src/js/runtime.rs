use anyhow::{Context as AnyhowContext, Result};
use rquickjs::{Context, Ctx, Error as JsError, Function, Runtime, Value};

/// Default cap on jobs drained per script entry point.
pub const DEFAULT_MAX_JOBS: usize = 1_000;

/// JavaScript runtime backed by QuickJS.
///
/// One engine backs one script global. It installs a minimal `console` that forwards
/// to `tracing`, and drains the promise job queue after every entry point so
/// microtasks queued by a frame callback run before the next frame.
pub struct QuickJsEngine {
    runtime: Runtime,
    context: Context,
    max_jobs: usize,
}

impl QuickJsEngine {
    pub fn new() -> Result<Self> {
        Self::with_job_limit(DEFAULT_MAX_JOBS)
    }

    pub fn with_job_limit(max_jobs: usize) -> Result<Self> {
        let runtime = Runtime::new().context("failed to create QuickJS runtime")?;
        let context = Context::full(&runtime).context("failed to create QuickJS context")?;
        let engine = Self {
            runtime,
            context,
            max_jobs: max_jobs.max(1),
        };
        engine.init_console()?;
        Ok(engine)
    }

    /// Evaluate a script and discard the result.
    pub fn eval(&self, source: &str, filename: &str) -> Result<()> {
        self.eval_with::<()>(source, filename)
    }

    /// Evaluate a script and convert the completion value into `V`.
    pub fn eval_with<V>(&self, source: &str, filename: &str) -> Result<V>
    where
        V: for<'js> rquickjs::FromJs<'js>,
    {
        let script = Self::with_source_url(source, filename);
        let eval_result = self.context.with(|ctx| match ctx.eval::<V, _>(script) {
            Ok(value) => Ok(value),
            Err(JsError::Exception) => Err(anyhow::anyhow!(capture_exception_message(&ctx))),
            Err(err) => Err(anyhow::Error::from(err)),
        });
        let value = eval_result.with_context(|| format!("script {filename} failed"))?;

        self.drain_jobs()?;
        Ok(value)
    }

    /// Run queued promise jobs until the queue is empty or the job limit is hit.
    ///
    /// Returns whether any job ran. A throwing job is logged and ends the drain.
    pub fn drain_jobs(&self) -> Result<bool> {
        let mut job_count = 0;

        while self.runtime.is_job_pending() {
            match self.runtime.execute_pending_job() {
                Ok(true) => {
                    job_count += 1;
                    if job_count >= self.max_jobs {
                        tracing::warn!(
                            target: "quickjs",
                            "Stopped processing jobs after {} iterations (possible infinite loop)",
                            self.max_jobs
                        );
                        break;
                    }
                }
                Ok(false) => break,
                Err(job_exception) => {
                    tracing::error!(
                        target: "quickjs",
                        "Job execution error: {:?}",
                        job_exception
                    );
                    break;
                }
            }
        }

        if job_count > 0 {
            tracing::debug!(target: "quickjs", "Executed {} pending jobs", job_count);
        }

        Ok(job_count > 0)
    }

    /// Provide access to the underlying QuickJS context for bindings.
    pub fn with_context<T, F>(&self, f: F) -> Result<T>
    where
        F: for<'js> FnOnce(Ctx<'js>) -> rquickjs::Result<T>,
    {
        self.context.with(f).map_err(anyhow::Error::from)
    }

    fn init_console(&self) -> Result<()> {
        self.context
            .with(|ctx| {
                let global = ctx.globals();
                let log_fn =
                    Function::new(ctx.clone(), log_from_js)?.with_name("__frontier_log")?;
                global.set("__frontier_log", log_fn)?;
                ctx.eval::<(), _>(CONSOLE_BOOTSTRAP.as_bytes())
            })
            .map_err(anyhow::Error::from)
    }

    fn with_source_url(source: &str, filename: &str) -> Vec<u8> {
        let mut script = String::with_capacity(source.len() + filename.len() + 32);
        script.push_str(source);
        if !source.ends_with('\n') {
            script.push('\n');
        }
        script.push_str("//# sourceURL=");
        script.push_str(filename);
        script.push('\n');
        script.into_bytes()
    }
}

fn log_from_js(level: String, message: String) -> rquickjs::Result<()> {
    match level.as_str() {
        "error" => tracing::error!(target: "quickjs", message = %message),
        "warn" => tracing::warn!(target: "quickjs", message = %message),
        "debug" => tracing::debug!(target: "quickjs", message = %message),
        _ => tracing::info!(target: "quickjs", message = %message),
    }
    Ok(())
}

/// Take the pending exception off `ctx` and render it with its stack when available.
pub(crate) fn capture_exception_message(ctx: &Ctx<'_>) -> String {
    let exception: Value = ctx.catch();

    if let Some(obj) = exception.as_object() {
        if let Ok(message) = obj.get::<_, String>("message") {
            if let Ok(stack) = obj.get::<_, String>("stack") {
                if !stack.is_empty() {
                    return format!("Error: {}\nStack: {}", message, stack);
                }
            }
            return format!("Error: {}", message);
        }
    }

    ctx.globals()
        .get::<_, Function>("String")
        .ok()
        .and_then(|string_fn| string_fn.call::<_, String>((exception.clone(),)).ok())
        .unwrap_or_else(|| format!("{:?}", exception))
}

const CONSOLE_BOOTSTRAP: &str = r#"
(() => {
    const global = globalThis;
    const stringify = (value) => {
        try {
            if (typeof value === 'string') {
                return value;
            }
            if (value === undefined) {
                return 'undefined';
            }
            if (value === null) {
                return 'null';
            }
            return String(value);
        } catch (err) {
            return '[unprintable]';
        }
    };

    const logAt = (level) => (...args) => {
        try {
            global.__frontier_log(level, args.map(stringify).join(' '));
        } catch (err) {
            // console must never throw
        }
    };

    if (typeof global.console !== 'object' || global.console === null) {
        global.console = {};
    }

    global.console.log = logAt('info');
    global.console.info = logAt('info');
    global.console.error = logAt('error');
    global.console.warn = logAt('warn');
    global.console.debug = logAt('debug');
})();
"#;
