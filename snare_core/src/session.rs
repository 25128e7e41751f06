//! The state of one fuzzing session, passed explicitly to everything that
//! registers hooks, dispatches calls, reports findings or draws edge ids.

use crate::config::{CoverageSettings, SnareConfig};
use crate::coverage::{CounterRegistrar, CoverageCounters, CoverageError, SharedCounters};
use crate::dictionary::Dictionaries;
use crate::edge_id::{EdgeIdStrategy, FileSyncIdStrategy, MemorySyncIdStrategy};
use crate::finding::{Finding, FindingSlot};
use crate::hooking::{
    BuiltinModule, CallSiteId, Dispatcher, HookError, HookHandle, HookRegistry, HookTracker,
    InterceptionTable, MatchedHookSet, OriginalFn, OriginalFuture, Value,
};
use std::future::Future;
use std::io;
use std::sync::Arc;
use tempfile::TempPath;

pub struct FuzzSession {
    hooks: HookRegistry,
    interceptions: InterceptionTable,
    tracker: HookTracker,
    dictionaries: Dictionaries,
    findings: Arc<FindingSlot>,
    counters: SharedCounters,
    coverage: CoverageSettings,
    hook_debug: bool,
    finished: bool,
}

impl FuzzSession {
    /// Creates a session around existing counters, using in-memory edge ids.
    pub fn new(counters: SharedCounters) -> Self {
        Self {
            hooks: HookRegistry::new(),
            interceptions: InterceptionTable::new(),
            tracker: HookTracker::new(),
            dictionaries: Dictionaries::new(),
            findings: Arc::new(FindingSlot::new()),
            counters,
            coverage: CoverageSettings::default(),
            hook_debug: false,
            finished: false,
        }
    }

    /// Creates a session with counters laid out as `config` asks, reporting
    /// counter growth to `registrar`.
    pub fn from_config(
        config: &SnareConfig,
        registrar: Box<dyn CounterRegistrar>,
    ) -> Result<Self, CoverageError> {
        let counters = CoverageCounters::new(
            config.coverage.initial_counters,
            config.coverage.max_counters,
            registrar,
        )?
        .into_shared();
        let mut session = Self::new(counters);
        session.coverage = config.coverage.clone();
        session.hook_debug = config.hooks.debug;
        Ok(session)
    }

    pub fn set_hook_debug(&mut self, debug: bool) {
        self.hook_debug = debug;
    }

    pub fn register_before_hook<F>(&mut self, target: &str, package: &str, f: F) -> HookHandle
    where
        F: Fn(Option<&Value>, &[Value], CallSiteId) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.hooks.register_before(target, package, f)
    }

    pub fn register_replace_hook<F>(&mut self, target: &str, package: &str, f: F) -> HookHandle
    where
        F: Fn(Option<&Value>, &[Value], CallSiteId, OriginalFn<'_>) -> anyhow::Result<Value>
            + Send
            + Sync
            + 'static,
    {
        self.hooks.register_replace(target, package, f)
    }

    pub fn register_after_hook<F>(&mut self, target: &str, package: &str, f: F) -> HookHandle
    where
        F: Fn(Option<&Value>, &[Value], CallSiteId, &Value) -> anyhow::Result<()>
            + Send
            + Sync
            + 'static,
    {
        self.hooks.register_after(target, package, f)
    }

    pub fn register_async_after_hook<F, Fut>(
        &mut self,
        target: &str,
        package: &str,
        f: F,
    ) -> HookHandle
    where
        F: Fn(Option<Value>, Vec<Value>, CallSiteId, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.hooks.register_async_after(target, package, f)
    }

    pub fn register_async_replace_hook<F>(&mut self, target: &str, package: &str, f: F) -> HookHandle
    where
        F: for<'a> Fn(Option<Value>, Vec<Value>, CallSiteId, OriginalFuture<'a>) -> OriginalFuture<'a>
            + Send
            + Sync
            + 'static,
    {
        self.hooks.register_async_replace(target, package, f)
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    pub fn tracker(&self) -> &HookTracker {
        &self.tracker
    }

    pub fn dispatcher(&self) -> Dispatcher<'_> {
        Dispatcher::new(&self.hooks)
    }

    /// Resolves the hooks for `target` defined in `file_path`, the way the
    /// instrumentation does once per function, and records the outcome in
    /// the hook tracker.
    pub fn hook_function(
        &mut self,
        file_path: &str,
        target: &str,
    ) -> Result<MatchedHookSet, HookError> {
        let matched = self.hooks.matching_hooks(target, file_path)?;
        if matched.has_hooks() {
            for handle in matched.hooks() {
                if let Some(hook) = self.hooks.get(handle) {
                    self.tracker.add_applied(hook.package(), hook.target());
                }
            }
        } else {
            self.tracker.add_available(file_path, target);
        }
        Ok(matched)
    }

    /// Runs a call to a hooked function through the dispatcher.
    pub fn call(
        &self,
        matched: &MatchedHookSet,
        receiver: Option<&Value>,
        args: &[Value],
        original: OriginalFn<'_>,
    ) -> Result<Value, HookError> {
        self.dispatcher().dispatch(matched, receiver, args, original)
    }

    /// Installs every registered hook that targets `module`.
    ///
    /// Returns the number of newly installed hooks.
    pub fn install_builtin(&mut self, module: &BuiltinModule) -> Result<usize, HookError> {
        let handles: Vec<HookHandle> = self
            .hooks
            .iter()
            .filter(|(_, hook)| hook.package() == module.name())
            .map(|(handle, _)| handle)
            .collect();
        let mut installed = 0;
        for handle in handles {
            if self
                .interceptions
                .install(&self.hooks, handle, module, &mut self.tracker)?
            {
                installed += 1;
            }
        }
        Ok(installed)
    }

    /// Calls `module.function` through the hooks installed for it.
    pub fn call_builtin(
        &self,
        module: &str,
        function: &str,
        args: &[Value],
    ) -> Result<Value, HookError> {
        self.interceptions
            .call_function(&self.hooks, module, function, args)
    }

    pub fn findings(&self) -> &Arc<FindingSlot> {
        &self.findings
    }

    /// Reports a finding for the current input. See [`FindingSlot::report`].
    pub fn report_finding(&self, message: impl Into<String>) -> Result<(), Finding> {
        self.findings.report(message)
    }

    pub fn counters(&self) -> &SharedCounters {
        &self.counters
    }

    /// Builds the edge id allocator for this session: file synchronised when
    /// an ID sync file is configured, in-memory otherwise.
    pub fn edge_id_strategy(&self) -> Box<dyn EdgeIdStrategy> {
        match &self.coverage.id_sync_file {
            Some(path) => {
                log::debug!("Using ID sync file {path:?}");
                Box::new(FileSyncIdStrategy::new(
                    path.clone(),
                    self.counters.clone(),
                    self.coverage.lock_policy(),
                ))
            }
            None => Box::new(MemorySyncIdStrategy::new(self.counters.clone())),
        }
    }

    pub fn dictionaries(&self) -> &Dictionaries {
        &self.dictionaries
    }

    pub fn add_dictionary<S: AsRef<str>>(&mut self, lines: &[S]) {
        self.dictionaries.add(lines);
    }

    /// Engine arguments with every dictionary merged into one `-dict=` file.
    pub fn engine_args(&self, args: &[String]) -> io::Result<(Vec<String>, Option<TempPath>)> {
        self.dictionaries.apply_to_engine_args(args)
    }

    /// Ends the session. Logs the hook summary when hook debugging is on.
    ///
    /// Calling it more than once has no further effect.
    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.tracker.categorize_unknown(self.hooks.hooks());
        if self.hook_debug {
            self.tracker.log_summary();
        }
    }
}

impl Drop for FuzzSession {
    fn drop(&mut self) {
        self.finish();
    }
}

impl std::fmt::Debug for FuzzSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FuzzSession")
            .field("hooks", &self.hooks.len())
            .field("interceptions", &self.interceptions.len())
            .field("hook_debug", &self.hook_debug)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::NoOpRegistrar;
    use serde_json::json;
    use std::sync::Mutex;

    fn session() -> FuzzSession {
        FuzzSession::new(CoverageCounters::with_defaults().into_shared())
    }

    #[test]
    fn hooked_function_reports_findings_through_the_session() {
        let mut session = session();
        let findings = session.findings().clone();
        session.register_before_hook("exec", "child_process", move |_, args, _| {
            if args.first().and_then(Value::as_str) == Some("jaz_zer") {
                findings.report("Command Injection in exec(): called with 'jaz_zer'")?;
            }
            Ok(())
        });
        let matched = session
            .hook_function("node_modules/child_process/index.js", "exec")
            .unwrap();
        let original = |_: Option<&Value>, _: &[Value]| -> anyhow::Result<Value> { Ok(json!(0)) };

        assert_eq!(session.call(&matched, None, &[json!("ls")], &original).unwrap(), json!(0));
        let err = session
            .call(&matched, None, &[json!("jaz_zer")], &original)
            .unwrap_err();
        assert!(err.to_string().contains("Command Injection"), "got {err}");
        assert_eq!(
            session.findings().take().map(|f| f.message),
            Some("Command Injection in exec(): called with 'jaz_zer'".to_string())
        );
    }

    #[test]
    fn tracker_records_applied_available_and_unknown_hooks() {
        let mut session = session();
        session.register_after_hook("parse", "qs", |_, _, _, _| Ok(()));
        session.register_before_hook("missing", "nowhere", |_, _, _| Ok(()));
        session.hook_function("node_modules/qs/lib/parse.js", "parse").unwrap();
        session.hook_function("src/app.js", "handler").unwrap();
        session.finish();

        let tracker = session.tracker();
        assert_eq!(tracker.applied().collect::<Vec<_>>(), vec!["qs:parse"]);
        assert_eq!(tracker.available().collect::<Vec<_>>(), vec!["src/app.js:handler"]);
        assert_eq!(tracker.not_applied().collect::<Vec<_>>(), vec!["nowhere:missing"]);
    }

    #[test]
    fn builtin_hooks_are_installed_and_called_through_the_session() {
        let mut session = session();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        session.register_before_hook("readFileSync", "fs", move |_, args, id| {
            s.lock().unwrap().push((args[0].clone(), id));
            Ok(())
        });
        session.register_before_hook("spawn", "child_process", |_, _, _| Ok(()));
        let fs = BuiltinModule::new("fs")
            .with_function("readFileSync", |args| Ok(json!(format!("read {}", args[0]))));

        assert_eq!(session.install_builtin(&fs).unwrap(), 1);
        assert_eq!(session.install_builtin(&fs).unwrap(), 0);
        let result = session
            .call_builtin("fs", "readFileSync", &[json!("/etc/passwd")])
            .unwrap();
        assert_eq!(result, json!("read \"/etc/passwd\""));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![(json!("/etc/passwd"), CallSiteId(0))]
        );
    }

    #[test]
    fn edge_id_strategy_follows_the_coverage_settings() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SnareConfig::default();
        config.coverage.initial_counters = 4;
        config.coverage.max_counters = 64;

        let memory = FuzzSession::from_config(&config, Box::new(NoOpRegistrar)).unwrap();
        let mut ids = memory.edge_id_strategy();
        ids.start_for_source_file("a.js").unwrap();
        assert_eq!(ids.next_edge_id().unwrap(), 0);
        ids.commit_id_count("a.js").unwrap();

        config.coverage.id_sync_file = Some(dir.path().join("ids.txt"));
        let synced = FuzzSession::from_config(&config, Box::new(NoOpRegistrar)).unwrap();
        let mut ids = synced.edge_id_strategy();
        ids.start_for_source_file("a.js").unwrap();
        for expected in 0..5 {
            assert_eq!(ids.next_edge_id().unwrap(), expected);
        }
        ids.commit_id_count("a.js").unwrap();
        let contents = std::fs::read_to_string(dir.path().join("ids.txt")).unwrap();
        assert_eq!(contents.trim_end(), "a.js,0,5");
        assert_eq!(crate::coverage::lock_counters(synced.counters()).registered(), 8);
    }

    #[test]
    fn invalid_counter_layout_is_rejected() {
        let mut config = SnareConfig::default();
        config.coverage.initial_counters = 0;
        assert!(FuzzSession::from_config(&config, Box::new(NoOpRegistrar)).is_err());
    }

    #[test]
    fn programmatic_dictionaries_reach_the_engine_args() {
        let mut session = session();
        session.add_dictionary(&["\"SELECT\"", "\"UNION\""]);
        let (args, temp) = session.engine_args(&["-runs=0".to_string()]).unwrap();
        assert_eq!(args.len(), 2);
        let merged = std::fs::read_to_string(temp.unwrap()).unwrap();
        assert_eq!(merged, "\"SELECT\"\n\"UNION\"\n");
    }
}
