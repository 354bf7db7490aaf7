use std::fmt;
use std::num::NonZeroU32;

/// Identifier returned by `requestAnimationFrame`.
///
/// Handles are positive and unique for the lifetime of the context that issued them.
/// Zero is never a valid handle; bindings use it to mean "none".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameHandle(NonZeroU32);

impl FrameHandle {
    pub fn get(self) -> u32 {
        self.0.get()
    }

    /// Interpret a script-supplied number as a handle.
    ///
    /// Returns `None` for anything that can't have been issued (zero, negative,
    /// fractional, non-finite or out of range); callers treat that as a no-op.
    pub fn from_script_value(value: f64) -> Option<Self> {
        if !value.is_finite() || value.fract() != 0.0 {
            return None;
        }
        if value < 1.0 || value > u32::MAX as f64 {
            return None;
        }
        NonZeroU32::new(value as u32).map(Self)
    }
}

impl TryFrom<u32> for FrameHandle {
    type Error = ZeroHandle;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        NonZeroU32::new(value).map(Self).ok_or(ZeroHandle)
    }
}

impl From<FrameHandle> for u32 {
    fn from(handle: FrameHandle) -> Self {
        handle.get()
    }
}

impl fmt::Display for FrameHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("zero is not a valid animation frame handle")]
pub struct ZeroHandle;

/// Issues strictly increasing handles for a single context.
#[derive(Debug, Default)]
pub struct HandleAllocator {
    last: u32,
}

impl HandleAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Panics once the counter is exhausted; wrapping would hand out duplicates.
    pub fn next(&mut self) -> FrameHandle {
        let next = self
            .last
            .checked_add(1)
            .and_then(NonZeroU32::new)
            .unwrap_or_else(|| panic!("animation frame handle space exhausted"));
        self.last = next.get();
        FrameHandle(next)
    }

    pub fn last_issued(&self) -> Option<FrameHandle> {
        NonZeroU32::new(self.last).map(FrameHandle)
    }
}
