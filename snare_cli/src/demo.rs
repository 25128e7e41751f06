//! The built-in demo target: a query-string parser guarded by detector hooks.

use snare_core::hooking::{BuiltinModule, MatchedHookSet, Value};
use snare_core::provider::{FuzzedDataProvider, TextEncoding};
use snare_core::session::FuzzSession;
use serde_json::{Map, json};

const PACKAGE: &str = "querystring-lite";
const PACKAGE_FILE: &str = "node_modules/querystring-lite/index.js";

/// Dictionary entries that help the engine reach the detectors.
pub const DICTIONARY: &[&str] = &["\"__proto__\"", "\"jaz_zer\"", "\"../\"", "\"cmd=\"", "\"file=\""];

/// Call sites of the demo target, resolved once per session.
pub struct DemoTarget {
    parse: MatchedHookSet,
    exec: MatchedHookSet,
}

impl DemoTarget {
    /// Registers the detector hooks, installs the `fs` interception and
    /// resolves the hooked functions of the demo package.
    pub fn install(session: &mut FuzzSession) -> anyhow::Result<Self> {
        let findings = session.findings().clone();
        session.register_after_hook("parse", PACKAGE, move |_, _, _, result| {
            if result.get("__proto__").is_some() {
                findings.report("Prototype Pollution: parse() produced a '__proto__' key")?;
            }
            Ok(())
        });

        let findings = session.findings().clone();
        session.register_before_hook("exec", PACKAGE, move |_, args, _| {
            let command = args.first().and_then(Value::as_str).unwrap_or_default();
            if command.contains("jaz_zer") {
                findings.report(format!(
                    "Command Injection in exec(): called with '{command}'"
                ))?;
            }
            Ok(())
        });

        let findings = session.findings().clone();
        session.register_before_hook("readFileSync", "fs", move |_, args, _| {
            let path = args.first().and_then(Value::as_str).unwrap_or_default();
            if path.contains("../") {
                findings.report(format!("Path Traversal in readFileSync(): '{path}'"))?;
            }
            Ok(())
        });

        session.install_builtin(&fs_module())?;
        session.add_dictionary(DICTIONARY);

        Ok(Self {
            parse: session.hook_function(PACKAGE_FILE, "parse")?,
            exec: session.hook_function(PACKAGE_FILE, "exec")?,
        })
    }

    pub fn run(&self, data: &mut FuzzedDataProvider<'_>, session: &FuzzSession) -> anyhow::Result<()> {
        let max_pairs = data.consume_integral_in_range(1, 8)?;
        let query = data.consume_remaining_as_string(TextEncoding::Ascii, true);
        let parsed = session.call(&self.parse, None, &[json!(query)], &parse_original)?;

        let pairs = parsed.as_object().map(Map::len).unwrap_or_default();
        anyhow::ensure!(
            (pairs as i64) <= max_pairs,
            "query has {pairs} pairs, at most {max_pairs} allowed"
        );

        if let Some(command) = parsed.get("cmd") {
            session.call(&self.exec, None, &[command.clone()], &exec_original)?;
        }
        if let Some(file) = parsed.get("file") {
            session.call_builtin("fs", "readFileSync", &[file.clone()])?;
        }
        Ok(())
    }
}

fn parse_original(_: Option<&Value>, args: &[Value]) -> anyhow::Result<Value> {
    let query = args
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow::anyhow!("parse() expects a string"))?;
    let mut object = Map::new();
    for pair in query.split('&').filter(|pair| !pair.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        object.insert(key.to_string(), json!(value));
    }
    Ok(Value::Object(object))
}

fn exec_original(_: Option<&Value>, _: &[Value]) -> anyhow::Result<Value> {
    Ok(json!(0))
}

fn fs_module() -> BuiltinModule {
    BuiltinModule::new("fs").with_function("readFileSync", |args| {
        let path = args.first().and_then(Value::as_str).unwrap_or_default();
        Ok(json!(format!("<contents of {path}>")))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use snare_core::coverage::CoverageCounters;
    use snare_core::executor::{ExecutionStatus, InProcessExecutor};

    fn run(input: &[u8]) -> ExecutionStatus {
        let mut session = FuzzSession::new(CoverageCounters::with_defaults().into_shared());
        let target = DemoTarget::install(&mut session).unwrap();
        let executor = InProcessExecutor::new(|data: &mut FuzzedDataProvider<'_>, session: &FuzzSession| {
            target.run(data, session)
        });
        executor.execute(&session, input)
    }

    /// Input whose last byte selects the pair limit and whose front is the query.
    fn input(query: &str, limit: u8) -> Vec<u8> {
        let mut bytes: Vec<u8> = query.bytes().map(|b| b - 32).collect();
        bytes.push(limit);
        bytes
    }

    #[test]
    fn benign_queries_pass() {
        assert_eq!(run(&input("a=1&b=2", 7)), ExecutionStatus::Ok);
    }

    #[test]
    fn detectors_report_findings() {
        assert_eq!(
            run(&input("cmd=jaz_zer", 0)),
            ExecutionStatus::Finding("Command Injection in exec(): called with 'jaz_zer'".to_string())
        );
        assert_eq!(
            run(&input("__proto__=x", 0)),
            ExecutionStatus::Finding(
                "Prototype Pollution: parse() produced a '__proto__' key".to_string()
            )
        );
        assert_eq!(
            run(&input("file=../etc", 0)),
            ExecutionStatus::Finding("Path Traversal in readFileSync(): '../etc'".to_string())
        );
    }

    #[test]
    fn too_many_pairs_is_an_error() {
        assert_eq!(
            run(&input("a&b&c", 1)),
            ExecutionStatus::Error("query has 3 pairs, at most 2 allowed".to_string())
        );
    }
}
