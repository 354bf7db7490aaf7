use thiserror::Error;

use super::time::DomHighResTimeStamp;

/// Failure raised by a single frame callback. Never aborts the rest of a tick.
#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("callback threw: {message}")]
    Threw { message: String },
    #[error("callback panicked: {message}")]
    Panicked { message: String },
    #[error("host error: {0}")]
    Host(#[from] anyhow::Error),
}

impl CallbackError {
    pub fn threw(message: impl Into<String>) -> Self {
        Self::Threw {
            message: message.into(),
        }
    }
}

/// Something that can be fired once with a frame timestamp.
pub trait FrameCallback {
    fn invoke(self, timestamp: DomHighResTimeStamp) -> Result<(), CallbackError>;
}

impl<F> FrameCallback for F
where
    F: FnOnce(DomHighResTimeStamp) -> Result<(), CallbackError>,
{
    fn invoke(self, timestamp: DomHighResTimeStamp) -> Result<(), CallbackError> {
        self(timestamp)
    }
}

/// Type-erased callback for native consumers.
pub struct BoxedFrameCallback(Box<dyn FnOnce(DomHighResTimeStamp) -> Result<(), CallbackError>>);

impl BoxedFrameCallback {
    pub fn new<F>(callback: F) -> Self
    where
        F: FnOnce(DomHighResTimeStamp) -> Result<(), CallbackError> + 'static,
    {
        Self(Box::new(callback))
    }
}

impl FrameCallback for BoxedFrameCallback {
    fn invoke(self, timestamp: DomHighResTimeStamp) -> Result<(), CallbackError> {
        (self.0)(timestamp)
    }
}

impl std::fmt::Debug for BoxedFrameCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BoxedFrameCallback")
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}
