// Library exports for the binary and integration tests

pub mod config;
pub mod frame;
pub mod js;
pub mod tick;

// Re-export commonly used types for tests
pub use config::{ConfigError, FrameConfig};
pub use frame::{
    AnimationFrameProvider, BoxedFrameCallback, CallbackError, ContextFrames, ContextId,
    ContextKind, DomHighResTimeStamp, FrameCallback, FrameHandle, FrameScheduler, ScheduleState,
    SchedulerError, TickReport, TimeOrigin,
};
pub use js::{ScriptGlobal, ScriptHost};
pub use tick::{CompositorTickSource, IntervalTickSource, TickEvent, TickSource};
