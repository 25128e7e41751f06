mod demo;

use anyhow::Context;
use clap::{Parser, Subcommand};
use demo::DemoTarget;
use snare_core::config::{FuzzingMode, SnareConfig};
use snare_core::corpus::{CrashArtifact, SeedCorpus};
use snare_core::coverage::{CoverageCounters, NoOpRegistrar};
use snare_core::edge_id::{
    EdgeIdStrategy, FileSyncIdStrategy, LockPolicy, check_contiguous, read_records,
};
use snare_core::executor::{ExecutionStatus, InProcessExecutor};
use snare_core::provider::FuzzedDataProvider;
use snare_core::session::FuzzSession;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Inspect or update an ID sync file
    Ids {
        #[clap(subcommand)]
        command: IdsCommand,
    },
    /// Replay seed inputs through the built-in demo target
    Run {
        #[clap(short, long, value_parser)]
        config: Option<PathBuf>,
        /// Directory receiving crash-<md5> files for failing inputs
        #[clap(long, default_value = ".")]
        artifact_dir: PathBuf,
        /// Seed files or directories; overrides corpus.seed-paths
        seeds: Vec<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum IdsCommand {
    /// List the records of a sync file and check that they are contiguous
    Show {
        #[clap(long)]
        sync_file: PathBuf,
        #[clap(long)]
        json: bool,
    },
    /// Reserve (or look up) the ids of one source file
    Reserve {
        #[clap(long)]
        sync_file: PathBuf,
        #[clap(long)]
        source: String,
        #[clap(long)]
        count: usize,
    },
}

fn main() -> Result<(), anyhow::Error> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_env(
            env_logger::Env::default()
                .filter("SNARE_LOG")
                .write_style("SNARE_LOG_STYLE"),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Ids {
            command: IdsCommand::Show { sync_file, json },
        } => show_ids(&sync_file, json),
        Command::Ids {
            command:
                IdsCommand::Reserve {
                    sync_file,
                    source,
                    count,
                },
        } => reserve_ids(sync_file, &source, count),
        Command::Run {
            config,
            artifact_dir,
            seeds,
        } => run(config, artifact_dir, seeds),
    }
}

fn show_ids(sync_file: &Path, json: bool) -> Result<(), anyhow::Error> {
    let records = read_records(sync_file)
        .with_context(|| format!("Failed to read ID sync file {sync_file:?}"))?;
    if json {
        let entries: Vec<serde_json::Value> = records
            .iter()
            .map(|r| {
                serde_json::json!({
                    "source_file": r.source_file,
                    "first_id": r.first_id,
                    "id_count": r.id_count,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        for record in &records {
            println!("{record}");
        }
    }
    match check_contiguous(&records) {
        Ok(total) => {
            log::info!("{} source files, {} edge ids", records.len(), total);
            Ok(())
        }
        Err(record) => anyhow::bail!(
            "ID sync file {:?} is not contiguous at record '{}'",
            sync_file,
            record
        ),
    }
}

fn reserve_ids(sync_file: PathBuf, source: &str, count: usize) -> Result<(), anyhow::Error> {
    let counters = CoverageCounters::with_defaults().into_shared();
    let mut ids = FileSyncIdStrategy::new(&sync_file, counters, LockPolicy::default());
    ids.start_for_source_file(source)?;
    for _ in 0..count {
        ids.next_edge_id()?;
    }
    ids.commit_id_count(source)?;
    let record = read_records(&sync_file)?
        .into_iter()
        .find(|r| r.source_file == source)
        .ok_or_else(|| anyhow::anyhow!("{source} missing from {sync_file:?} after commit"))?;
    println!("{record}");
    Ok(())
}

fn run(
    config_path: Option<PathBuf>,
    artifact_dir: PathBuf,
    seeds: Vec<PathBuf>,
) -> Result<(), anyhow::Error> {
    let mut config = match config_path {
        Some(config_path) => {
            log::info!("Loading configuration from specified path: {config_path:?}");
            SnareConfig::load_from_file(&config_path)?
        }
        None => {
            let default_config_path = PathBuf::from("snare.toml");
            if default_config_path.exists() {
                log::info!("Loading default configuration: {default_config_path:?}");
                SnareConfig::load_from_file(&default_config_path)?
            } else {
                SnareConfig::default()
            }
        }
    };
    if !seeds.is_empty() {
        config.corpus.seed_paths = seeds;
    }
    if config.fuzzer.mode == FuzzingMode::Fuzzing {
        log::warn!("Fuzzing mode needs the native engine, only replaying seeds");
    }
    log::debug!("Effective configuration: {config:#?}");

    let mut session = FuzzSession::from_config(&config, Box::new(NoOpRegistrar))?;
    let target = DemoTarget::install(&mut session)?;
    let (engine_args, _dictionary) = session
        .engine_args(&config.engine_args())
        .context("Failed to merge dictionaries")?;
    log::info!("Engine arguments: {}", engine_args.join(" "));

    let corpus = SeedCorpus::load(&config.corpus.seed_paths)?;
    if corpus.is_empty() {
        log::warn!("No seed inputs given, nothing to replay");
    }

    let executor =
        InProcessExecutor::new(|data: &mut FuzzedDataProvider<'_>, session: &FuzzSession| {
            target.run(data, session)
        });
    let pid = std::process::id();
    let mut failures = 0;
    for seed in corpus.seeds() {
        let input = truncate(&seed.data, config.fuzzer.max_input_len);
        let status = executor.execute(&session, input);
        let message = match &status {
            ExecutionStatus::Ok => {
                log::debug!("{:?}: ok", seed.path);
                continue;
            }
            ExecutionStatus::Finding(msg) => format!("=={pid}== {msg}"),
            ExecutionStatus::Crash(msg) => format!("=={pid}== Crash: {msg}"),
            ExecutionStatus::Error(msg) => format!("=={pid}== Uncaught error: {msg}"),
        };
        failures += 1;
        eprintln!("{message}");
        let artifact = CrashArtifact::new(input);
        let path = artifact.write_to(&artifact_dir)?;
        eprintln!("Test unit written to {}", path.display());
    }
    session.finish();

    log::info!("Replayed {} inputs, {} failed", corpus.len(), failures);
    if failures > 0 {
        anyhow::bail!("{failures} of {} inputs failed", corpus.len());
    }
    Ok(())
}

fn truncate(data: &[u8], max_len: usize) -> &[u8] {
    &data[..data.len().min(max_len)]
}
