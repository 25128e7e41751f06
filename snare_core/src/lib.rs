pub mod config;
pub mod corpus;
pub mod coverage;
pub mod dictionary;
pub mod edge_id;
pub mod executor;
pub mod finding;
pub mod hooking;
pub mod provider;
pub mod session;

pub use config::{ConfigError, SnareConfig};
pub use corpus::{CorpusError, CrashArtifact, SeedCorpus};
pub use coverage::{CoverageCounters, CoverageError, SharedCounters};
pub use dictionary::Dictionaries;
pub use edge_id::{EdgeIdError, EdgeIdRecord, EdgeIdStrategy, FileSyncIdStrategy, MemorySyncIdStrategy};
pub use executor::{ExecutionStatus, InProcessExecutor};
pub use finding::{Finding, FindingSlot};
pub use hooking::{CallSiteId, HookError, HookHandle, HookKind, HookRegistry, Value};
pub use provider::{FuzzedDataProvider, ProviderError, TextEncoding};
pub use session::FuzzSession;
