use crate::finding::Finding;
use crate::provider::FuzzedDataProvider;
use crate::session::FuzzSession;
use std::panic::{AssertUnwindSafe, catch_unwind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStatus {
    Ok,
    Finding(String),
    Crash(String),
    Error(String),
}

impl ExecutionStatus {
    pub fn is_failure(&self) -> bool {
        !matches!(self, ExecutionStatus::Ok)
    }
}

/// Runs a fuzz target in the current process, one input at a time.
///
/// Every input gets a fresh [`FuzzedDataProvider`]. A finding reported
/// through the session wins over whatever the target itself returned, since
/// targets commonly surface it as a wrapped error or not at all.
pub struct InProcessExecutor<F>
where
    F: Fn(&mut FuzzedDataProvider<'_>, &FuzzSession) -> anyhow::Result<()>,
{
    target_fn: F,
}

impl<F> InProcessExecutor<F>
where
    F: Fn(&mut FuzzedDataProvider<'_>, &FuzzSession) -> anyhow::Result<()>,
{
    pub fn new(target_fn: F) -> Self {
        Self { target_fn }
    }

    pub fn execute(&self, session: &FuzzSession, data: &[u8]) -> ExecutionStatus {
        let result = catch_unwind(AssertUnwindSafe(|| {
            let mut provider = FuzzedDataProvider::new(data);
            (self.target_fn)(&mut provider, session)
        }));

        let finding = session.findings().take();
        if let Some(finding) = finding {
            return ExecutionStatus::Finding(finding.message);
        }

        match result {
            Ok(Ok(())) => ExecutionStatus::Ok,
            Ok(Err(e)) => match e.downcast_ref::<Finding>() {
                Some(finding) => ExecutionStatus::Finding(finding.message.clone()),
                None => ExecutionStatus::Error(format!("{e:#}")),
            },
            Err(panic_payload) => {
                let msg = if let Some(s) = panic_payload.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic_payload.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "Unknown panic type".to_string()
                };
                ExecutionStatus::Crash(msg)
            }
        }
    }
}
