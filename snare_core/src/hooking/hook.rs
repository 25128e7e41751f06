use super::CallSiteId;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Dynamic value passed through hooks: receivers, arguments and results.
pub type Value = serde_json::Value;

/// The wrapped function as seen by a Replace hook.
pub type OriginalFn<'a> = &'a dyn Fn(Option<&Value>, &[Value]) -> anyhow::Result<Value>;

pub type BeforeFn = dyn Fn(Option<&Value>, &[Value], CallSiteId) -> anyhow::Result<()> + Send + Sync;

pub type ReplaceFn = dyn Fn(Option<&Value>, &[Value], CallSiteId, OriginalFn<'_>) -> anyhow::Result<Value>
    + Send
    + Sync;

pub type AfterFn =
    dyn Fn(Option<&Value>, &[Value], CallSiteId, &Value) -> anyhow::Result<()> + Send + Sync;

/// After hook for asynchronous targets. Arguments are owned so the returned
/// future can outlive the call site.
pub type AsyncAfterFn = dyn Fn(Option<Value>, Vec<Value>, CallSiteId, Value) -> BoxFuture<'static, anyhow::Result<()>>
    + Send
    + Sync;

/// The pending result of an asynchronous target, as seen by an async Replace
/// hook. Dropping it without awaiting skips the original call.
pub type OriginalFuture<'a> = BoxFuture<'a, anyhow::Result<Value>>;

/// Replace hook for asynchronous targets.
pub type AsyncReplaceFn = dyn for<'a> Fn(Option<Value>, Vec<Value>, CallSiteId, OriginalFuture<'a>) -> OriginalFuture<'a>
    + Send
    + Sync;

/// When a hook runs relative to the function it is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    Before,
    After,
    Replace,
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HookKind::Before => "BEFORE",
            HookKind::After => "AFTER",
            HookKind::Replace => "REPLACE",
        };
        f.write_str(name)
    }
}

/// The callback of a hook. The variant determines both the kind of the hook
/// and whether it is asynchronous.
#[derive(Clone)]
pub enum HookFn {
    Before(Arc<BeforeFn>),
    Replace(Arc<ReplaceFn>),
    After(Arc<AfterFn>),
    AsyncAfter(Arc<AsyncAfterFn>),
    AsyncReplace(Arc<AsyncReplaceFn>),
}

impl HookFn {
    pub fn before<F>(f: F) -> Self
    where
        F: Fn(Option<&Value>, &[Value], CallSiteId) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        HookFn::Before(Arc::new(f))
    }

    pub fn replace<F>(f: F) -> Self
    where
        F: Fn(Option<&Value>, &[Value], CallSiteId, OriginalFn<'_>) -> anyhow::Result<Value>
            + Send
            + Sync
            + 'static,
    {
        HookFn::Replace(Arc::new(f))
    }

    pub fn after<F>(f: F) -> Self
    where
        F: Fn(Option<&Value>, &[Value], CallSiteId, &Value) -> anyhow::Result<()>
            + Send
            + Sync
            + 'static,
    {
        HookFn::After(Arc::new(f))
    }

    pub fn async_after<F, Fut>(f: F) -> Self
    where
        F: Fn(Option<Value>, Vec<Value>, CallSiteId, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        HookFn::AsyncAfter(Arc::new(move |receiver, args, id, result| {
            f(receiver, args, id, result).boxed()
        }))
    }

    /// The returned future usually awaits `original`; it must be boxed so
    /// it can borrow from it:
    /// `|_, _, _, original| async move { original.await }.boxed()`.
    pub fn async_replace<F>(f: F) -> Self
    where
        F: for<'a> Fn(Option<Value>, Vec<Value>, CallSiteId, OriginalFuture<'a>) -> OriginalFuture<'a>
            + Send
            + Sync
            + 'static,
    {
        HookFn::AsyncReplace(Arc::new(f))
    }

    pub fn kind(&self) -> HookKind {
        match self {
            HookFn::Before(_) => HookKind::Before,
            HookFn::Replace(_) | HookFn::AsyncReplace(_) => HookKind::Replace,
            HookFn::After(_) | HookFn::AsyncAfter(_) => HookKind::After,
        }
    }

    pub fn is_async(&self) -> bool {
        matches!(self, HookFn::AsyncAfter(_) | HookFn::AsyncReplace(_))
    }
}

impl fmt::Debug for HookFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HookFn::Before(_) => "Before",
            HookFn::Replace(_) => "Replace",
            HookFn::After(_) => "After",
            HookFn::AsyncAfter(_) => "AsyncAfter",
            HookFn::AsyncReplace(_) => "AsyncReplace",
        };
        write!(f, "HookFn::{name}(..)")
    }
}

/// A user-supplied interception rule for one target function.
///
/// `package` is matched as a substring of the file path (or module name) the
/// call site lives in; `target` must match the function name exactly.
#[derive(Debug, Clone)]
pub struct Hook {
    target: String,
    package: String,
    callback: HookFn,
}

impl Hook {
    pub fn new(target: impl Into<String>, package: impl Into<String>, callback: HookFn) -> Self {
        Self {
            target: target.into(),
            package: package.into(),
            callback,
        }
    }

    pub fn kind(&self) -> HookKind {
        self.callback.kind()
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn is_async(&self) -> bool {
        self.callback.is_async()
    }

    pub fn callback(&self) -> &HookFn {
        &self.callback
    }

    pub fn matches(&self, file_path: &str, target: &str) -> bool {
        file_path.contains(&self.package) && self.target == target
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn before_noop() -> HookFn {
        HookFn::before(|_, _, _| Ok(()))
    }

    #[test]
    fn kind_and_async_follow_the_callback_variant() {
        let before = Hook::new("exec", "child_process", before_noop());
        assert_eq!(before.kind(), HookKind::Before);
        assert!(!before.is_async());

        let after = Hook::new(
            "fetch",
            "http",
            HookFn::async_after(|_, _, _, _| async { anyhow::Ok(()) }),
        );
        assert_eq!(after.kind(), HookKind::After);
        assert!(after.is_async());

        let replace = Hook::new(
            "fetch",
            "http",
            HookFn::async_replace(|_, _, _, original| async move { original.await }.boxed()),
        );
        assert_eq!(replace.kind(), HookKind::Replace);
        assert!(replace.is_async());
    }

    #[test]
    fn matches_package_substring_and_exact_target() {
        let hook = Hook::new("exec", "child_process", before_noop());
        assert!(hook.matches("node_modules/child_process/index.js", "exec"));
        assert!(hook.matches("child_process", "exec"));
        assert!(!hook.matches("node_modules/child_process/index.js", "execSync"));
        assert!(!hook.matches("lib/fs.js", "exec"));
    }

    #[test]
    fn kind_display_uses_upper_case_names() {
        assert_eq!(HookKind::Replace.to_string(), "REPLACE");
        assert_eq!(HookKind::Before.to_string(), "BEFORE");
        assert_eq!(format!("{:?}", before_noop()), "HookFn::Before(..)");
    }
}
