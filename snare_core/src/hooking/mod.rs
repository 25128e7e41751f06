//! Function hooking: a registry of Before/Replace/After hooks, the dispatcher
//! invoked by instrumented call sites, and an interception table for built-in
//! functions that cannot be reached by rewriting source.

mod builtin;
mod call_site;
mod dispatch;
mod hook;
mod registry;
mod tracker;

pub use builtin::{BuiltinModule, InterceptionTable, NativeFn};
pub use call_site::CallSiteId;
pub use dispatch::{Dispatcher, HookInput};
pub use hook::{
    AfterFn, AsyncAfterFn, AsyncReplaceFn, BeforeFn, Hook, HookFn, HookKind, OriginalFn,
    OriginalFuture, ReplaceFn, Value,
};
pub use registry::{HookHandle, HookRegistry, MatchedHookSet};
pub use tracker::HookTracker;

use thiserror::Error;

/// Errors raised while matching or dispatching hooks.
///
/// The three configuration errors are detected when the hooks of a target are
/// matched, before any call executes. Callback failures are always propagated.
#[derive(Error, Debug)]
pub enum HookError {
    #[error("For a given target function, one REPLACE hook can be configured. Found: {found}")]
    MultipleReplace { found: usize },

    #[error(
        "For a given target function, REPLACE hooks cannot be mixed up with BEFORE/AFTER hooks. Found {replace} REPLACE hooks and {other} BEFORE/AFTER hooks"
    )]
    ReplaceMixed { replace: usize, other: usize },

    #[error("For a given target function, AFTER hooks have to be either all sync or all async.")]
    MixedAfterSync,

    #[error("No hook registered under handle {0}")]
    UnknownHandle(HookHandle),

    #[error("Hook {0} is not installed in the interception table")]
    NotIntercepted(HookHandle),

    #[error("No hooks installed for built-in {module}.{function}")]
    NoInterception { module: String, function: String },

    #[error("Hook {handle} is a {kind} hook and cannot be called with {input}")]
    InputMismatch {
        handle: HookHandle,
        kind: HookKind,
        input: &'static str,
    },

    #[error("Hook {handle} for '{target}' failed: {cause:#}")]
    Callback {
        handle: HookHandle,
        target: String,
        cause: anyhow::Error,
    },

    #[error("Original function '{target}' failed: {cause:#}")]
    Original { target: String, cause: anyhow::Error },
}
