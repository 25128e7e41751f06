use super::{CallSiteId, Hook, HookError, HookFn, HookKind, OriginalFn, OriginalFuture, Value};
use std::fmt;
use std::future::Future;

/// Stable index of a hook in its [`HookRegistry`].
///
/// Instrumented call sites embed the handle so the dispatcher can find the
/// hook again without another lookup by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HookHandle(usize);

impl HookHandle {
    pub fn new(index: usize) -> Self {
        HookHandle(index)
    }

    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for HookHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The hooks matching one call site, grouped by kind in registration order.
///
/// A set returned by [`HookRegistry::matching_hooks`] has already been
/// validated: at most one Replace hook, never mixed with Before/After hooks,
/// and After hooks that are either all synchronous or all asynchronous.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchedHookSet {
    target: String,
    before: Vec<HookHandle>,
    replace: Vec<HookHandle>,
    after: Vec<HookHandle>,
    async_after: bool,
}

impl MatchedHookSet {
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn before(&self) -> &[HookHandle] {
        &self.before
    }

    pub fn replace(&self) -> Option<HookHandle> {
        self.replace.first().copied()
    }

    pub fn after(&self) -> &[HookHandle] {
        &self.after
    }

    /// True when the After hooks of this set are asynchronous.
    pub fn has_async_after(&self) -> bool {
        self.async_after
    }

    pub fn has_hooks(&self) -> bool {
        !(self.before.is_empty() && self.replace.is_empty() && self.after.is_empty())
    }

    /// All handles: before hooks, then after hooks, then the replace hook.
    pub fn hooks(&self) -> Vec<HookHandle> {
        self.before
            .iter()
            .chain(&self.after)
            .chain(&self.replace)
            .copied()
            .collect()
    }

    fn verify(&self, registry: &HookRegistry) -> Result<(), HookError> {
        if self.replace.len() > 1 {
            return Err(HookError::MultipleReplace {
                found: self.replace.len(),
            });
        }
        if !self.replace.is_empty() && !(self.before.is_empty() && self.after.is_empty()) {
            return Err(HookError::ReplaceMixed {
                replace: self.replace.len(),
                other: self.before.len() + self.after.len(),
            });
        }
        let async_count = self
            .after
            .iter()
            .filter_map(|handle| registry.get(*handle))
            .filter(|hook| hook.is_async())
            .count();
        if async_count != 0 && async_count != self.after.len() {
            return Err(HookError::MixedAfterSync);
        }
        Ok(())
    }
}

/// Append-only store of every hook registered during a session.
#[derive(Debug, Default)]
pub struct HookRegistry {
    hooks: Vec<Hook>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, hook: Hook) -> HookHandle {
        let handle = HookHandle(self.hooks.len());
        log::debug!(
            "[Hook] registered {} hook {} for '{}' in '{}'",
            hook.kind(),
            handle,
            hook.target(),
            hook.package()
        );
        self.hooks.push(hook);
        handle
    }

    pub fn register_before<F>(&mut self, target: &str, package: &str, f: F) -> HookHandle
    where
        F: Fn(Option<&Value>, &[Value], CallSiteId) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(Hook::new(target, package, HookFn::before(f)))
    }

    pub fn register_replace<F>(&mut self, target: &str, package: &str, f: F) -> HookHandle
    where
        F: Fn(Option<&Value>, &[Value], CallSiteId, OriginalFn<'_>) -> anyhow::Result<Value>
            + Send
            + Sync
            + 'static,
    {
        self.register(Hook::new(target, package, HookFn::replace(f)))
    }

    pub fn register_after<F>(&mut self, target: &str, package: &str, f: F) -> HookHandle
    where
        F: Fn(Option<&Value>, &[Value], CallSiteId, &Value) -> anyhow::Result<()>
            + Send
            + Sync
            + 'static,
    {
        self.register(Hook::new(target, package, HookFn::after(f)))
    }

    pub fn register_async_after<F, Fut>(&mut self, target: &str, package: &str, f: F) -> HookHandle
    where
        F: Fn(Option<Value>, Vec<Value>, CallSiteId, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register(Hook::new(target, package, HookFn::async_after(f)))
    }

    pub fn register_async_replace<F>(&mut self, target: &str, package: &str, f: F) -> HookHandle
    where
        F: for<'a> Fn(Option<Value>, Vec<Value>, CallSiteId, OriginalFuture<'a>) -> OriginalFuture<'a>
            + Send
            + Sync
            + 'static,
    {
        self.register(Hook::new(target, package, HookFn::async_replace(f)))
    }

    pub fn hooks(&self) -> &[Hook] {
        &self.hooks
    }

    pub fn get(&self, handle: HookHandle) -> Option<&Hook> {
        self.hooks.get(handle.0)
    }

    /// Iterates over every hook together with its handle.
    pub fn iter(&self) -> impl Iterator<Item = (HookHandle, &Hook)> {
        self.hooks
            .iter()
            .enumerate()
            .map(|(index, hook)| (HookHandle(index), hook))
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Drops every hook. Handles issued before are invalid afterwards.
    pub fn clear(&mut self) {
        self.hooks.clear();
    }

    /// Collects and validates the hooks for `target` in `file_path`.
    pub fn matching_hooks(
        &self,
        target: &str,
        file_path: &str,
    ) -> Result<MatchedHookSet, HookError> {
        let mut matched = MatchedHookSet {
            target: target.to_string(),
            ..MatchedHookSet::default()
        };
        for (handle, hook) in self.iter().filter(|(_, h)| h.matches(file_path, target)) {
            match hook.kind() {
                HookKind::Before => matched.before.push(handle),
                HookKind::Replace => matched.replace.push(handle),
                HookKind::After => {
                    matched.async_after |= hook.is_async();
                    matched.after.push(handle);
                }
            }
        }
        matched.verify(self)?;
        Ok(matched)
    }

    /// True if any hook targets functions defined in `file_path`.
    pub fn has_functions_to_hook(&self, file_path: &str) -> bool {
        self.hooks.iter().any(|hook| file_path.contains(hook.package()))
    }

    pub fn hooks_for_file(&self, file_path: &str) -> Vec<HookHandle> {
        self.iter()
            .filter(|(_, hook)| file_path.contains(hook.package()))
            .map(|(handle, _)| handle)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with(kinds: &[(&str, HookKind, bool)]) -> HookRegistry {
        let mut registry = HookRegistry::new();
        for (target, kind, is_async) in kinds {
            match (kind, is_async) {
                (HookKind::Before, _) => {
                    registry.register_before(target, "pkg", |_, _, _| Ok(()));
                }
                (HookKind::Replace, _) => {
                    registry.register_replace(target, "pkg", |_, _, _, _| Ok(Value::Null));
                }
                (HookKind::After, false) => {
                    registry.register_after(target, "pkg", |_, _, _, _| Ok(()));
                }
                (HookKind::After, true) => {
                    registry.register_async_after(target, "pkg", |_, _, _, _| async { anyhow::Ok(()) });
                }
            }
        }
        registry
    }

    #[test]
    fn handles_are_registration_indices() {
        let registry = registry_with(&[
            ("a", HookKind::Before, false),
            ("b", HookKind::After, false),
        ]);
        assert_eq!(registry.len(), 2);
        let handles: Vec<_> = registry.iter().map(|(h, _)| h.index()).collect();
        assert_eq!(handles, vec![0, 1]);
        assert_eq!(registry.get(HookHandle::new(1)).map(Hook::target), Some("b"));
        assert!(registry.get(HookHandle::new(2)).is_none());
    }

    #[test]
    fn matching_hooks_partitions_in_registration_order() {
        let registry = registry_with(&[
            ("t", HookKind::After, false),
            ("t", HookKind::Before, false),
            ("other", HookKind::Before, false),
            ("t", HookKind::Before, false),
        ]);
        let matched = registry.matching_hooks("t", "node_modules/pkg/lib.js").unwrap();
        assert_eq!(matched.target(), "t");
        assert_eq!(matched.before(), &[HookHandle::new(1), HookHandle::new(3)]);
        assert_eq!(matched.after(), &[HookHandle::new(0)]);
        assert_eq!(matched.replace(), None);
        assert!(!matched.has_async_after());
        assert_eq!(
            matched.hooks(),
            vec![HookHandle::new(1), HookHandle::new(3), HookHandle::new(0)]
        );
    }

    #[test]
    fn no_match_for_foreign_files() {
        let registry = registry_with(&[("t", HookKind::Before, false)]);
        let matched = registry.matching_hooks("t", "src/app.js").unwrap();
        assert!(!matched.has_hooks());
    }

    #[test]
    fn two_replace_hooks_are_rejected() {
        let registry = registry_with(&[
            ("t", HookKind::Replace, false),
            ("t", HookKind::Replace, false),
        ]);
        let err = registry.matching_hooks("t", "pkg").unwrap_err();
        assert!(matches!(err, HookError::MultipleReplace { found: 2 }));
        assert!(err.to_string().contains("Found: 2"), "message: {err}");
    }

    #[test]
    fn replace_cannot_mix_with_before_or_after() {
        let registry = registry_with(&[
            ("t", HookKind::Replace, false),
            ("t", HookKind::Before, false),
            ("t", HookKind::After, false),
        ]);
        let err = registry.matching_hooks("t", "pkg").unwrap_err();
        assert!(matches!(err, HookError::ReplaceMixed { replace: 1, other: 2 }));
        let message = err.to_string();
        assert!(message.contains("REPLACE"), "message: {message}");
        assert!(message.contains("BEFORE/AFTER"), "message: {message}");
    }

    #[test]
    fn after_hooks_must_agree_on_async() {
        let registry = registry_with(&[
            ("t", HookKind::After, false),
            ("t", HookKind::After, true),
        ]);
        let err = registry.matching_hooks("t", "pkg").unwrap_err();
        assert!(matches!(err, HookError::MixedAfterSync));

        let registry = registry_with(&[
            ("t", HookKind::After, true),
            ("t", HookKind::After, true),
        ]);
        let matched = registry.matching_hooks("t", "pkg").unwrap();
        assert!(matched.has_async_after());
        assert_eq!(matched.after().len(), 2);
    }

    #[test]
    fn single_replace_is_valid() {
        let registry = registry_with(&[("t", HookKind::Replace, false)]);
        let matched = registry.matching_hooks("t", "pkg").unwrap();
        assert_eq!(matched.replace(), Some(HookHandle::new(0)));
    }

    #[test]
    fn file_queries_use_package_substrings() {
        let mut registry = HookRegistry::new();
        registry.register_before("exec", "child_process", |_, _, _| Ok(()));
        registry.register_before("readFile", "fs", |_, _, _| Ok(()));
        assert!(registry.has_functions_to_hook("node:child_process"));
        assert!(!registry.has_functions_to_hook("src/index.js"));
        assert_eq!(registry.hooks_for_file("lib/fs/promises"), vec![HookHandle::new(1)]);

        registry.clear();
        assert!(registry.is_empty());
        assert!(!registry.has_functions_to_hook("node:child_process"));
    }
}
