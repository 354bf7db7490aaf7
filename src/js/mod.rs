//! QuickJS bindings that expose the frame scheduler to scripts.

pub mod environment;
pub mod runtime;

pub use environment::{ScriptFrame, ScriptGlobal, ScriptHost};
pub use runtime::QuickJsEngine;
