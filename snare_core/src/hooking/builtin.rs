use super::{CallSiteId, HookError, HookFn, HookHandle, HookRegistry, HookTracker, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A built-in function: no receiver, positional arguments only.
pub type NativeFn = Arc<dyn Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync>;

/// A named table of built-in functions, e.g. a runtime module such as `fs`.
#[derive(Clone, Default)]
pub struct BuiltinModule {
    name: String,
    functions: HashMap<String, NativeFn>,
}

impl BuiltinModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            functions: HashMap::new(),
        }
    }

    pub fn with_function<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.functions.insert(name.to_string(), Arc::new(f));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, function: &str) -> Option<&NativeFn> {
        self.functions.get(function)
    }
}

impl fmt::Debug for BuiltinModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.functions.keys().collect();
        names.sort();
        f.debug_struct("BuiltinModule")
            .field("name", &self.name)
            .field("functions", &names)
            .finish()
    }
}

struct Interception {
    module: String,
    target: String,
    original: NativeFn,
}

type Below<'a> = &'a dyn Fn(&[Value]) -> Result<Value, HookError>;

/// Interceptions of built-in functions, keyed by hook handle.
///
/// Installing a hook resolves its target once and captures the original
/// function; modules themselves are never modified. Callers route built-in
/// calls through [`InterceptionTable::call_function`], which layers every
/// installed hook of the function around the captured original.
#[derive(Default)]
pub struct InterceptionTable {
    entries: HashMap<HookHandle, Interception>,
    order: Vec<HookHandle>,
}

impl InterceptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the hook behind `handle` for its target in `module`.
    ///
    /// Returns `Ok(false)` without failing when the hook is already installed,
    /// belongs to another module, or its target does not exist. Fails when the
    /// hooks registered for the target cannot be combined, e.g. two Replace
    /// hooks, before anything is installed.
    pub fn install(
        &mut self,
        registry: &HookRegistry,
        handle: HookHandle,
        module: &BuiltinModule,
        tracker: &mut HookTracker,
    ) -> Result<bool, HookError> {
        let hook = registry
            .get(handle)
            .ok_or(HookError::UnknownHandle(handle))?;
        if self.entries.contains_key(&handle) {
            return Ok(false);
        }
        if hook.package() != module.name() {
            log::debug!(
                "[Hook] {} targets module '{}', not '{}'",
                handle,
                hook.package(),
                module.name()
            );
            return Ok(false);
        }
        let Some(original) = module.get(hook.target()) else {
            log::warn!(
                "[Hook] built-in function '{}' not found in '{}', skipping",
                hook.target(),
                module.name()
            );
            return Ok(false);
        };
        registry.matching_hooks(hook.target(), module.name())?;
        self.entries.insert(
            handle,
            Interception {
                module: module.name().to_string(),
                target: hook.target().to_string(),
                original: Arc::clone(original),
            },
        );
        self.order.push(handle);
        log::debug!(
            "[Hook] installed {} hook {} for built-in {}.{}",
            hook.kind(),
            handle,
            module.name(),
            hook.target()
        );
        tracker.add_applied(hook.package(), hook.target());
        Ok(true)
    }

    pub fn is_installed(&self, handle: HookHandle) -> bool {
        self.entries.contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Calls the intercepted built-in behind `handle` with only that hook applied.
    ///
    /// Hooks receive no receiver and the hook index as call-site id. After
    /// hooks observe the result, which is returned unchanged.
    pub fn call(
        &self,
        registry: &HookRegistry,
        handle: HookHandle,
        args: &[Value],
    ) -> Result<Value, HookError> {
        let entry = self
            .entries
            .get(&handle)
            .ok_or(HookError::NotIntercepted(handle))?;
        let native = |args: &[Value]| call_native(entry, args);
        self.apply(registry, handle, &native, args)
    }

    /// Calls `module.function` through every hook installed for it.
    ///
    /// Hooks are layered in installation order: the last installed hook is
    /// the outermost one and each hook wraps the layers installed before it.
    pub fn call_function(
        &self,
        registry: &HookRegistry,
        module: &str,
        function: &str,
        args: &[Value],
    ) -> Result<Value, HookError> {
        let layers: Vec<(HookHandle, &Interception)> = self
            .order
            .iter()
            .filter_map(|handle| self.entries.get(handle).map(|entry| (*handle, entry)))
            .filter(|(_, entry)| entry.module == module && entry.target == function)
            .collect();
        if layers.is_empty() {
            return Err(HookError::NoInterception {
                module: module.to_string(),
                function: function.to_string(),
            });
        }
        self.call_layers(registry, &layers, args)
    }

    fn call_layers(
        &self,
        registry: &HookRegistry,
        layers: &[(HookHandle, &Interception)],
        args: &[Value],
    ) -> Result<Value, HookError> {
        match layers.split_last() {
            Some(((handle, _), inner)) if !inner.is_empty() => {
                let below = |args: &[Value]| self.call_layers(registry, inner, args);
                self.apply(registry, *handle, &below, args)
            }
            Some(((handle, entry), _)) => {
                let native = |args: &[Value]| call_native(entry, args);
                self.apply(registry, *handle, &native, args)
            }
            None => Ok(Value::Null),
        }
    }

    fn apply(
        &self,
        registry: &HookRegistry,
        handle: HookHandle,
        below: Below<'_>,
        args: &[Value],
    ) -> Result<Value, HookError> {
        let hook = registry
            .get(handle)
            .ok_or(HookError::UnknownHandle(handle))?;
        let id = CallSiteId::from(handle);
        let failed = |cause: anyhow::Error| HookError::Callback {
            handle,
            target: hook.target().to_string(),
            cause,
        };
        match hook.callback() {
            HookFn::Before(f) => {
                f(None, args, id).map_err(failed)?;
                below(args)
            }
            HookFn::Replace(f) => {
                let original = |_: Option<&Value>, args: &[Value]| -> anyhow::Result<Value> {
                    Ok(below(args)?)
                };
                f(None, args, id, &original).map_err(failed)
            }
            HookFn::After(f) => {
                let result = below(args)?;
                f(None, args, id, &result).map_err(failed)?;
                Ok(result)
            }
            HookFn::AsyncAfter(_) | HookFn::AsyncReplace(_) => Err(HookError::InputMismatch {
                handle,
                kind: hook.kind(),
                input: "a built-in call",
            }),
        }
    }
}

fn call_native(entry: &Interception, args: &[Value]) -> Result<Value, HookError> {
    (entry.original)(args).map_err(|cause| HookError::Original {
        target: format!("{}.{}", entry.module, entry.target),
        cause,
    })
}

impl fmt::Debug for InterceptionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut handles: Vec<&HookHandle> = self.entries.keys().collect();
        handles.sort();
        f.debug_struct("InterceptionTable")
            .field("handles", &handles)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    fn fs_module() -> BuiltinModule {
        BuiltinModule::new("fs").with_function("readFile", |args| {
            Ok(json!(format!("contents of {}", args[0].as_str().unwrap_or("?"))))
        })
    }

    #[test]
    fn before_hook_sees_arguments_and_original_still_runs() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HookRegistry::new();
        let s = seen.clone();
        let handle = registry.register_before("readFile", "fs", move |receiver, args, id| {
            assert!(receiver.is_none());
            s.lock().unwrap().push((args[0].clone(), id));
            Ok(())
        });
        let mut table = InterceptionTable::new();
        let mut tracker = HookTracker::new();
        assert!(table.install(&registry, handle, &fs_module(), &mut tracker).unwrap());

        let result = table.call(&registry, handle, &[json!("/etc/passwd")]).unwrap();
        assert_eq!(result, json!("contents of /etc/passwd"));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![(json!("/etc/passwd"), CallSiteId(0))]
        );
        assert_eq!(tracker.applied().collect::<Vec<_>>(), vec!["fs:readFile"]);
    }

    #[test]
    fn replace_and_after_wrap_the_captured_original() {
        let mut registry = HookRegistry::new();
        let replace = registry.register_replace("readFile", "fs", |_, args, _, original| {
            let inner = original(None, args)?;
            Ok(json!(format!("[{}]", inner.as_str().unwrap_or_default())))
        });
        let observed = Arc::new(Mutex::new(None));
        let o = observed.clone();
        let after = registry.register_after("readdir", "fs", move |_, _, _, result| {
            *o.lock().unwrap() = Some(result.clone());
            Ok(())
        });

        let module = fs_module().with_function("readdir", |_| Ok(json!(["a", "b"])));
        let mut table = InterceptionTable::new();
        let mut tracker = HookTracker::new();
        table.install(&registry, replace, &module, &mut tracker).unwrap();
        table.install(&registry, after, &module, &mut tracker).unwrap();
        assert_eq!(table.len(), 2);

        assert_eq!(
            table.call(&registry, replace, &[json!("a")]).unwrap(),
            json!("[contents of a]")
        );
        assert_eq!(
            table.call(&registry, after, &[json!("/")]).unwrap(),
            json!(["a", "b"])
        );
        assert_eq!(*observed.lock().unwrap(), Some(json!(["a", "b"])));
    }

    #[test]
    fn conflicting_hooks_on_one_builtin_are_rejected_at_install() {
        let mut registry = HookRegistry::new();
        let first = registry.register_replace("readFile", "fs", |_, _, _, _| Ok(Value::Null));
        registry.register_replace("readFile", "fs", |_, _, _, _| Ok(Value::Null));
        let mut table = InterceptionTable::new();
        let mut tracker = HookTracker::new();
        assert!(matches!(
            table.install(&registry, first, &fs_module(), &mut tracker),
            Err(HookError::MultipleReplace { found: 2 })
        ));
        assert!(table.is_empty());

        let mut registry = HookRegistry::new();
        let before = registry.register_before("readFile", "fs", |_, _, _| Ok(()));
        registry.register_replace("readFile", "fs", |_, _, _, _| Ok(Value::Null));
        assert!(matches!(
            table.install(&registry, before, &fs_module(), &mut tracker),
            Err(HookError::ReplaceMixed { replace: 1, other: 1 })
        ));
        assert!(tracker.applied().next().is_none());
    }

    #[test]
    fn hooks_on_one_builtin_are_layered_in_install_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HookRegistry::new();
        let l = log.clone();
        let before = registry.register_before("readFile", "fs", move |_, _, _| {
            l.lock().unwrap().push("before".to_string());
            Ok(())
        });
        let l = log.clone();
        let after = registry.register_after("readFile", "fs", move |_, _, _, result| {
            l.lock().unwrap().push(format!("after {result}"));
            Ok(())
        });
        let module = fs_module();
        let mut table = InterceptionTable::new();
        let mut tracker = HookTracker::new();
        table.install(&registry, before, &module, &mut tracker).unwrap();
        table.install(&registry, after, &module, &mut tracker).unwrap();

        let result = table
            .call_function(&registry, "fs", "readFile", &[json!("x")])
            .unwrap();
        assert_eq!(result, json!("contents of x"));
        assert_eq!(
            *log.lock().unwrap(),
            vec!["before".to_string(), "after \"contents of x\"".to_string()]
        );
        assert!(matches!(
            table.call_function(&registry, "fs", "unlink", &[]),
            Err(HookError::NoInterception { .. })
        ));
    }

    #[test]
    fn install_is_idempotent() {
        let mut registry = HookRegistry::new();
        let handle = registry.register_before("readFile", "fs", |_, _, _| Ok(()));
        let mut table = InterceptionTable::new();
        let mut tracker = HookTracker::new();
        let module = fs_module();
        assert!(table.install(&registry, handle, &module, &mut tracker).unwrap());
        assert!(!table.install(&registry, handle, &module, &mut tracker).unwrap());
        assert_eq!(table.len(), 1);
        assert!(table.is_installed(handle));
    }

    #[test]
    fn missing_targets_are_skipped() {
        let mut registry = HookRegistry::new();
        let missing = registry.register_before("unlink", "fs", |_, _, _| Ok(()));
        let foreign = registry.register_before("readFile", "net", |_, _, _| Ok(()));
        let mut table = InterceptionTable::new();
        let mut tracker = HookTracker::new();
        assert!(!table.install(&registry, missing, &fs_module(), &mut tracker).unwrap());
        assert!(!table.install(&registry, foreign, &fs_module(), &mut tracker).unwrap());
        assert!(table.is_empty());
        let err = table.call(&registry, missing, &[]).unwrap_err();
        assert!(matches!(err, HookError::NotIntercepted(_)));
        assert_eq!(
            err.to_string(),
            "Hook #0 is not installed in the interception table"
        );
        assert!(matches!(
            table.install(&registry, HookHandle::new(5), &fs_module(), &mut tracker),
            Err(HookError::UnknownHandle(_))
        ));
    }

    #[test]
    fn hook_failures_propagate_through_the_shim() {
        let mut registry = HookRegistry::new();
        let handle = registry.register_before("readFile", "fs", |_, args, _| {
            if args[0] == json!("../../etc/passwd") {
                anyhow::bail!("path traversal");
            }
            Ok(())
        });
        let mut table = InterceptionTable::new();
        table
            .install(&registry, handle, &fs_module(), &mut HookTracker::new())
            .unwrap();
        assert!(table.call(&registry, handle, &[json!("ok.txt")]).is_ok());
        let err = table
            .call(&registry, handle, &[json!("../../etc/passwd")])
            .unwrap_err();
        assert!(err.to_string().contains("path traversal"), "message: {err}");
    }
}
