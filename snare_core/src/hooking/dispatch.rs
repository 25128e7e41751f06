use super::{
    CallSiteId, HookError, HookFn, HookHandle, HookRegistry, MatchedHookSet, OriginalFn,
    OriginalFuture, Value,
};
use futures::FutureExt;
use std::future::Future;

/// The extra argument a hook receives on top of receiver and arguments.
#[derive(Clone, Copy)]
pub enum HookInput<'a> {
    /// Before hooks get nothing extra.
    None,
    /// Replace hooks get the function they replace.
    Original(OriginalFn<'a>),
    /// After hooks get the result of the call.
    Result(&'a Value),
}

impl HookInput<'_> {
    fn describe(&self) -> &'static str {
        match self {
            HookInput::None => "no extra input",
            HookInput::Original(_) => "an original function",
            HookInput::Result(_) => "a call result",
        }
    }
}

/// Entry point used by instrumented call sites.
///
/// The dispatcher only reads the registry; hooks are looked up by the handle
/// the call site was instrumented with.
#[derive(Debug, Clone, Copy)]
pub struct Dispatcher<'r> {
    registry: &'r HookRegistry,
}

impl<'r> Dispatcher<'r> {
    pub fn new(registry: &'r HookRegistry) -> Self {
        Self { registry }
    }

    /// Invokes a single synchronous hook.
    ///
    /// Returns the replacement result for Replace hooks and `None` otherwise.
    pub fn call_hook(
        &self,
        handle: HookHandle,
        receiver: Option<&Value>,
        args: &[Value],
        input: HookInput<'_>,
    ) -> Result<Option<Value>, HookError> {
        let hook = self
            .registry
            .get(handle)
            .ok_or(HookError::UnknownHandle(handle))?;
        let call_site = CallSiteId::capture(handle, hook.target());
        let failed = |cause: anyhow::Error| HookError::Callback {
            handle,
            target: hook.target().to_string(),
            cause,
        };
        match (hook.callback(), input) {
            (HookFn::Before(f), HookInput::None) => {
                f(receiver, args, call_site).map_err(failed)?;
                Ok(None)
            }
            (HookFn::Replace(f), HookInput::Original(original)) => {
                let result = f(receiver, args, call_site, original).map_err(failed)?;
                Ok(Some(result))
            }
            (HookFn::After(f), HookInput::Result(result)) => {
                f(receiver, args, call_site, result).map_err(failed)?;
                Ok(None)
            }
            (callback, input) => Err(HookError::InputMismatch {
                handle,
                kind: callback.kind(),
                input: if callback.is_async() {
                    "a synchronous call"
                } else {
                    input.describe()
                },
            }),
        }
    }

    /// Invokes a single asynchronous After hook and waits for it to settle.
    pub async fn call_hook_async(
        &self,
        handle: HookHandle,
        receiver: Option<Value>,
        args: Vec<Value>,
        result: Value,
    ) -> Result<(), HookError> {
        let hook = self
            .registry
            .get(handle)
            .ok_or(HookError::UnknownHandle(handle))?;
        let HookFn::AsyncAfter(f) = hook.callback() else {
            return Err(HookError::InputMismatch {
                handle,
                kind: hook.kind(),
                input: "an asynchronous result",
            });
        };
        let call_site = CallSiteId::capture(handle, hook.target());
        f(receiver, args, call_site, result)
            .await
            .map_err(|cause| HookError::Callback {
                handle,
                target: hook.target().to_string(),
                cause,
            })
    }

    /// Invokes an asynchronous Replace hook with the pending original call.
    pub async fn call_replace_async(
        &self,
        handle: HookHandle,
        receiver: Option<Value>,
        args: Vec<Value>,
        original: OriginalFuture<'_>,
    ) -> Result<Value, HookError> {
        let hook = self
            .registry
            .get(handle)
            .ok_or(HookError::UnknownHandle(handle))?;
        let HookFn::AsyncReplace(f) = hook.callback() else {
            return Err(HookError::InputMismatch {
                handle,
                kind: hook.kind(),
                input: "an asynchronous call",
            });
        };
        let call_site = CallSiteId::capture(handle, hook.target());
        f(receiver, args, call_site, original)
            .await
            .map_err(|cause| HookError::Callback {
                handle,
                target: hook.target().to_string(),
                cause,
            })
    }

    /// Runs a synchronous call through its hooks.
    ///
    /// Before hooks run in order, then the Replace hook (or `original`), then
    /// the After hooks in order. The result of the call is returned unchanged
    /// by After hooks.
    pub fn dispatch(
        &self,
        matched: &MatchedHookSet,
        receiver: Option<&Value>,
        args: &[Value],
        original: OriginalFn<'_>,
    ) -> Result<Value, HookError> {
        for handle in matched.before() {
            self.call_hook(*handle, receiver, args, HookInput::None)?;
        }
        let result = match matched.replace() {
            Some(handle) => self
                .call_hook(handle, receiver, args, HookInput::Original(original))?
                .unwrap_or(Value::Null),
            None => original(receiver, args).map_err(|cause| HookError::Original {
                target: matched.target().to_string(),
                cause,
            })?,
        };
        for handle in matched.after() {
            self.call_hook(*handle, receiver, args, HookInput::Result(&result))?;
        }
        Ok(result)
    }

    /// Runs an asynchronous call through its hooks.
    ///
    /// Before hooks run synchronously, then `original` is awaited, or handed to
    /// the async Replace hook. After hooks are chained: each one starts only
    /// once the previous one has settled and the first failure skips the rest.
    pub async fn dispatch_async<F>(
        &self,
        matched: &MatchedHookSet,
        receiver: Option<Value>,
        args: Vec<Value>,
        original: F,
    ) -> Result<Value, HookError>
    where
        F: Future<Output = anyhow::Result<Value>> + Send,
    {
        for handle in matched.before() {
            self.call_hook(*handle, receiver.as_ref(), &args, HookInput::None)?;
        }
        let result = match matched.replace() {
            Some(handle) => {
                self.call_replace_async(handle, receiver.clone(), args.clone(), original.boxed())
                    .await?
            }
            None => original.await.map_err(|cause| HookError::Original {
                target: matched.target().to_string(),
                cause,
            })?,
        };
        for handle in matched.after() {
            if matched.has_async_after() {
                self.call_hook_async(*handle, receiver.clone(), args.clone(), result.clone())
                    .await?;
            } else {
                self.call_hook(*handle, receiver.as_ref(), &args, HookInput::Result(&result))?;
            }
        }
        Ok(result)
    }
}
