use crate::coverage::{DEFAULT_INITIAL_COUNTERS, DEFAULT_MAX_COUNTERS};
use crate::edge_id::LockPolicy;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("fuzzer.timeout-ms must be greater than 0")]
    ZeroTimeout,

    #[error("coverage.initial-counters must be greater than 0")]
    ZeroInitialCounters,

    #[error("coverage.initial-counters ({initial}) exceeds coverage.max-counters ({max})")]
    InitialCountersAboveMax { initial: usize, max: usize },

    #[error(
        "coverage.lock-initial-backoff-ms ({initial}) exceeds coverage.lock-max-backoff-ms ({max})"
    )]
    BackoffRange { initial: u64, max: u64 },
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FuzzingMode {
    Fuzzing,
    #[default]
    Regression,
}

impl FuzzingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FuzzingMode::Fuzzing => "fuzzing",
            FuzzingMode::Regression => "regression",
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct FuzzerSettings {
    #[serde(default)]
    pub mode: FuzzingMode,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_input_len")]
    pub max_input_len: usize,
    #[serde(default)]
    pub dictionaries: Vec<PathBuf>,
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_max_input_len() -> usize {
    4096
}

impl Default for FuzzerSettings {
    fn default() -> Self {
        Self {
            mode: FuzzingMode::default(),
            timeout_ms: default_timeout_ms(),
            max_input_len: default_max_input_len(),
            dictionaries: Vec::new(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct CoverageSettings {
    pub id_sync_file: Option<PathBuf>,
    #[serde(default = "default_initial_counters")]
    pub initial_counters: usize,
    #[serde(default = "default_max_counters")]
    pub max_counters: usize,
    #[serde(default = "default_lock_max_wait_ms")]
    pub lock_max_wait_ms: u64,
    #[serde(default = "default_lock_initial_backoff_ms")]
    pub lock_initial_backoff_ms: u64,
    #[serde(default = "default_lock_max_backoff_ms")]
    pub lock_max_backoff_ms: u64,
}

fn default_initial_counters() -> usize {
    DEFAULT_INITIAL_COUNTERS
}

fn default_max_counters() -> usize {
    DEFAULT_MAX_COUNTERS
}

fn default_lock_max_wait_ms() -> u64 {
    60_000
}

fn default_lock_initial_backoff_ms() -> u64 {
    1
}

fn default_lock_max_backoff_ms() -> u64 {
    100
}

impl CoverageSettings {
    pub fn lock_policy(&self) -> LockPolicy {
        LockPolicy {
            max_wait: Duration::from_millis(self.lock_max_wait_ms),
            initial_backoff: Duration::from_millis(self.lock_initial_backoff_ms),
            max_backoff: Duration::from_millis(self.lock_max_backoff_ms),
        }
    }
}

impl Default for CoverageSettings {
    fn default() -> Self {
        Self {
            id_sync_file: None,
            initial_counters: default_initial_counters(),
            max_counters: default_max_counters(),
            lock_max_wait_ms: default_lock_max_wait_ms(),
            lock_initial_backoff_ms: default_lock_initial_backoff_ms(),
            lock_max_backoff_ms: default_lock_max_backoff_ms(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct CorpusConfig {
    #[serde(default)]
    pub seed_paths: Vec<PathBuf>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct HookSettings {
    #[serde(default)]
    pub debug: bool,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct SnareConfig {
    #[serde(default)]
    pub fuzzer: FuzzerSettings,
    #[serde(default)]
    pub coverage: CoverageSettings,
    #[serde(default)]
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub hooks: HookSettings,
}

impl SnareConfig {
    pub fn load_from_file(path: &PathBuf) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;

        let config: SnareConfig = toml::from_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from config file {:?}: {}", path, e)
        })?;

        config
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid config file {:?}: {}", path, e))?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fuzzer.timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        let coverage = &self.coverage;
        if coverage.initial_counters == 0 {
            return Err(ConfigError::ZeroInitialCounters);
        }
        if coverage.initial_counters > coverage.max_counters {
            return Err(ConfigError::InitialCountersAboveMax {
                initial: coverage.initial_counters,
                max: coverage.max_counters,
            });
        }
        if coverage.lock_initial_backoff_ms > coverage.lock_max_backoff_ms {
            return Err(ConfigError::BackoffRange {
                initial: coverage.lock_initial_backoff_ms,
                max: coverage.lock_max_backoff_ms,
            });
        }
        Ok(())
    }

    /// libFuzzer arguments implied by the fuzzer settings.
    ///
    /// Regression runs execute the seeds once (`-runs=0`); the timeout is
    /// given to the engine in whole seconds, rounded up.
    pub fn engine_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.fuzzer.mode == FuzzingMode::Regression {
            args.push("-runs=0".to_string());
        }
        args.push(format!("-timeout={}", self.fuzzer.timeout_ms.div_ceil(1000)));
        args.push(format!("-max_len={}", self.fuzzer.max_input_len));
        args.extend(
            self.fuzzer
                .dictionaries
                .iter()
                .map(|dict| format!("-dict={}", dict.display())),
        );
        args
    }
}
