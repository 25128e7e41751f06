use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while reading seeds or writing crash artifacts.
#[derive(Error, Debug)]
pub enum CorpusError {
    /// A seed path names neither a file nor a directory.
    #[error("Seed path {0:?} does not exist")]
    MissingSeedPath(PathBuf),

    /// An I/O error occurred while reading seeds or writing artifacts.
    /// Contains a string describing the underlying I/O error.
    #[error("Corpus I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for CorpusError {
    fn from(err: std::io::Error) -> Self {
        CorpusError::Io(err.to_string())
    }
}

/// A seed input together with the file it was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seed {
    pub path: PathBuf,
    pub data: Vec<u8>,
}

/// Inputs replayed by regression runs.
///
/// Seeds are loaded from files and from the files directly inside seed
/// directories; subdirectories and hidden files are skipped. Directory
/// entries are read in name order so runs are reproducible.
#[derive(Debug, Default)]
pub struct SeedCorpus {
    seeds: Vec<Seed>,
}

impl SeedCorpus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(seed_paths: &[PathBuf]) -> Result<Self, CorpusError> {
        let mut corpus = Self::new();
        for path in seed_paths {
            corpus.load_path(path)?;
        }
        log::info!("Loaded {} seed inputs", corpus.len());
        Ok(corpus)
    }

    fn load_path(&mut self, path: &Path) -> Result<(), CorpusError> {
        if path.is_file() {
            return self.load_file(path);
        }
        if !path.is_dir() {
            return Err(CorpusError::MissingSeedPath(path.to_path_buf()));
        }
        let mut files = Vec::new();
        for entry_result in fs::read_dir(path).map_err(|e| {
            CorpusError::Io(format!("Failed to read seed directory {path:?}: {e}"))
        })? {
            let entry = entry_result
                .map_err(|e| CorpusError::Io(format!("Error reading entry in {path:?}: {e}")))?;
            let file_path = entry.path();
            let hidden = entry.file_name().to_string_lossy().starts_with('.');
            if file_path.is_file() && !hidden {
                files.push(file_path);
            }
        }
        files.sort();
        for file in files {
            self.load_file(&file)?;
        }
        Ok(())
    }

    fn load_file(&mut self, path: &Path) -> Result<(), CorpusError> {
        let data = fs::read(path)
            .map_err(|e| CorpusError::Io(format!("Failed to read seed file {path:?}: {e}")))?;
        log::debug!("Loaded seed {:?} ({} bytes)", path, data.len());
        self.seeds.push(Seed {
            path: path.to_path_buf(),
            data,
        });
        Ok(())
    }

    pub fn add(&mut self, path: impl Into<PathBuf>, data: Vec<u8>) {
        self.seeds.push(Seed {
            path: path.into(),
            data,
        });
    }

    pub fn seeds(&self) -> &[Seed] {
        &self.seeds
    }

    pub fn len(&self) -> usize {
        self.seeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seeds.is_empty()
    }
}

/// An input that made the target fail, named after its MD5 digest the way
/// libFuzzer names its artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrashArtifact {
    name: String,
    data: Vec<u8>,
}

impl CrashArtifact {
    pub fn new(data: &[u8]) -> Self {
        Self {
            name: format!("crash-{:x}", md5::compute(data)),
            data: data.to_vec(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Writes the artifact into `dir`, creating it if needed.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf, CorpusError> {
        fs::create_dir_all(dir)
            .map_err(|e| CorpusError::Io(format!("Failed to create artifact dir {dir:?}: {e}")))?;
        let path = dir.join(&self.name);
        fs::write(&path, &self.data)
            .map_err(|e| CorpusError::Io(format!("Failed to write artifact {path:?}: {e}")))?;
        Ok(path)
    }
}
