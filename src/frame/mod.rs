//! The animation frame scheduler: handles, per-context queues and the tick algorithm.

pub mod callback;
pub mod handle;
pub mod registry;
pub mod scheduler;
pub mod time;

pub use callback::{BoxedFrameCallback, CallbackError, FrameCallback};
pub use handle::{FrameHandle, HandleAllocator};
pub use registry::{CallbackRegistry, FrameBatch};
pub use scheduler::{
    AnimationFrameProvider, ContextFrames, ContextId, ContextKind, FrameScheduler,
    ScheduleState, SchedulerError, TickReport,
};
pub use time::{DomHighResTimeStamp, TimeOrigin};
