use std::fs;
use std::io::{self, Write};
use std::path::Path;
use tempfile::{NamedTempFile, TempPath};

const DICT_FLAG: &str = "-dict=";

/// Mutation hints for the fuzzing engine in libFuzzer dictionary format.
///
/// Each added group is kept as one block of lines; blocks are merged with any
/// `-dict=` files from the engine arguments into a single dictionary, since
/// libFuzzer only honours one `-dict` flag.
#[derive(Debug, Default, Clone)]
pub struct Dictionaries {
    entries: Vec<String>,
}

impl Dictionaries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds lines that are already in dictionary format, e.g. `kw="select"`.
    pub fn add<S: AsRef<str>>(&mut self, lines: &[S]) {
        let block: Vec<&str> = lines.iter().map(AsRef::as_ref).collect();
        self.entries.push(block.join("\n"));
    }

    /// Adds raw byte strings, quoting and escaping each one.
    pub fn add_words<B: AsRef<[u8]>>(&mut self, words: &[B]) {
        let block: Vec<String> = words.iter().map(|w| quote_entry(w.as_ref())).collect();
        self.entries.push(block.join("\n"));
    }

    pub fn load_file(&mut self, path: &Path) -> io::Result<()> {
        self.entries.push(fs::read_to_string(path)?);
        Ok(())
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries as the contents of one dictionary file.
    pub fn to_libfuzzer_format(&self) -> String {
        let mut out = self.entries.join("\n");
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        out
    }

    pub fn write_to(&self, path: &Path) -> io::Result<()> {
        fs::write(path, self.to_libfuzzer_format())
    }

    /// Folds every `-dict=` argument and the added blocks into one temporary
    /// dictionary and returns the arguments pointing at it.
    ///
    /// The file is deleted when the returned [`TempPath`] is dropped.
    pub fn apply_to_engine_args(
        &self,
        args: &[String],
    ) -> io::Result<(Vec<String>, Option<TempPath>)> {
        let mut combined = self.clone();
        let mut kept = Vec::with_capacity(args.len() + 1);
        for arg in args {
            match arg.strip_prefix(DICT_FLAG) {
                Some(path) => combined.load_file(Path::new(path))?,
                None => kept.push(arg.clone()),
            }
        }
        if combined.is_empty() {
            return Ok((kept, None));
        }
        let mut file = NamedTempFile::new()?;
        file.write_all(combined.to_libfuzzer_format().as_bytes())?;
        file.flush()?;
        let path = file.into_temp_path();
        kept.push(format!("{DICT_FLAG}{}", path.display()));
        Ok((kept, Some(path)))
    }
}

/// Renders one dictionary entry: `"` and `\\` are escaped, bytes outside
/// printable ASCII become `\xNN`.
fn quote_entry(word: &[u8]) -> String {
    let mut out = String::with_capacity(word.len() + 2);
    out.push('"');
    for &b in word {
        match b {
            b'"' | b'\\' => {
                out.push('\\');
                out.push(char::from(b));
            }
            0x20..=0x7e => out.push(char::from(b)),
            _ => out.push_str(&format!("\\x{b:02X}")),
        }
    }
    out.push('"');
    out
}
