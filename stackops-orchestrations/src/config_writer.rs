//! `KEY=VALUE` application config file: backup, in-place update, atomic replace

use chrono::Utc;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

#[derive(Debug, thiserror::Error)]
pub enum ConfigWriteError {
    #[error("invalid config key '{0}'")]
    InvalidKey(String),

    #[error("value for '{0}' must be a single line")]
    InvalidValue(String),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to back up {path}: {source}")]
    Backup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Ordered set of key/value updates and key removals. Touching a key twice
/// keeps the first position and the last change. `Debug` never shows values.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ConfigUpdates {
    /// `None` removes the key
    entries: Vec<(String, Option<String>)>,
}

impl ConfigUpdates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.put(key.into(), Some(value.into()))
    }

    /// Drop every occurrence of `key` from the file
    pub fn remove(&mut self, key: impl Into<String>) -> &mut Self {
        self.put(key.into(), None)
    }

    fn put(&mut self, key: String, value: Option<String>) -> &mut Self {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .and_then(|(_, v)| v.as_deref())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Keys being set, with their values
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .filter_map(|(k, v)| v.as_deref().map(|v| (k.as_str(), v)))
    }

    fn changes(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_deref()))
    }

    pub fn extend(&mut self, other: ConfigUpdates) {
        for (k, v) in other.entries {
            self.put(k, v);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for ConfigUpdates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.keys()).finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    Entry {
        /// Leading whitespace and an optional `export `
        prefix: String,
        key: String,
        /// Raw text after `=`
        value: String,
    },
    /// Comments, blank lines and anything unparseable; kept verbatim
    Other(String),
}

/// One physical line and the terminator it was read with (`""` on an
/// unterminated last line)
#[derive(Debug, Clone, PartialEq, Eq)]
struct RawLine {
    line: Line,
    eol: String,
}

/// Parsed config file that round-trips untouched content byte for byte,
/// line endings included
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConfigDocument {
    lines: Vec<RawLine>,
}

impl ConfigDocument {
    pub fn parse(text: &str) -> Self {
        let lines = text
            .split_inclusive('\n')
            .map(|raw| {
                let (content, eol) = match raw.strip_suffix("\r\n") {
                    Some(content) => (content, "\r\n"),
                    None => match raw.strip_suffix('\n') {
                        Some(content) => (content, "\n"),
                        None => (raw, ""),
                    },
                };
                RawLine {
                    line: parse_line(content),
                    eol: eol.to_string(),
                }
            })
            .collect();
        Self { lines }
    }

    pub fn read(path: &Path) -> Result<Self, ConfigWriteError> {
        match fs::read_to_string(path) {
            Ok(text) => Ok(Self::parse(&text)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigWriteError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Value of the first occurrence of `key`, with surrounding quotes removed
    pub fn get(&self, key: &str) -> Option<&str> {
        self.lines.iter().find_map(|raw| match &raw.line {
            Line::Entry { key: k, value, .. } if k == key => Some(unquote(value.trim())),
            _ => None,
        })
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Replace the first occurrence in place (dropping later duplicates) or
    /// append. Returns whether the rendered document changed.
    pub fn set(&mut self, key: &str, value: &str) -> Result<bool, ConfigWriteError> {
        if !is_valid_key(key) {
            return Err(ConfigWriteError::InvalidKey(key.to_string()));
        }
        if value.contains('\n') || value.contains('\r') {
            return Err(ConfigWriteError::InvalidValue(key.to_string()));
        }

        let mut changed = false;
        let mut found = false;
        let mut kept = Vec::with_capacity(self.lines.len());

        for raw in self.lines.drain(..) {
            match raw.line {
                Line::Entry { prefix, key: k, value: v } if k == key => {
                    if found {
                        changed = true;
                        continue;
                    }
                    found = true;
                    if v != value {
                        changed = true;
                    }
                    kept.push(RawLine {
                        line: Line::Entry {
                            prefix,
                            key: k,
                            value: value.to_string(),
                        },
                        eol: raw.eol,
                    });
                }
                line => kept.push(RawLine { line, eol: raw.eol }),
            }
        }
        self.lines = kept;

        if !found {
            let eol = self.newline().to_string();
            if let Some(last) = self.lines.last_mut() {
                if last.eol.is_empty() {
                    last.eol = eol.clone();
                }
            }
            self.lines.push(RawLine {
                line: Line::Entry {
                    prefix: String::new(),
                    key: key.to_string(),
                    value: value.to_string(),
                },
                eol,
            });
            changed = true;
        }

        Ok(changed)
    }

    /// Drop every occurrence of `key`. Returns whether anything was removed.
    pub fn remove(&mut self, key: &str) -> bool {
        let before = self.lines.len();
        self.lines
            .retain(|raw| !matches!(&raw.line, Line::Entry { key: k, .. } if k == key));
        self.lines.len() != before
    }

    /// Terminator for appended lines: CRLF if the file already uses it
    fn newline(&self) -> &'static str {
        if self.lines.iter().any(|raw| raw.eol == "\r\n") {
            "\r\n"
        } else {
            "\n"
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for raw in &self.lines {
            match &raw.line {
                Line::Entry { prefix, key, value } => {
                    out.push_str(prefix);
                    out.push_str(key);
                    out.push('=');
                    out.push_str(value);
                }
                Line::Other(text) => out.push_str(text),
            }
            out.push_str(&raw.eol);
        }
        out
    }
}

fn parse_line(raw: &str) -> Line {
    let trimmed = raw.trim_start();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Line::Other(raw.to_string());
    }

    let indent = &raw[..raw.len() - trimmed.len()];
    let (export, rest) = match trimmed.strip_prefix("export ") {
        Some(rest) => ("export ", rest.trim_start()),
        None => ("", trimmed),
    };

    match rest.split_once('=') {
        Some((key, value)) if is_valid_key(key) => Line::Entry {
            prefix: format!("{}{}", indent, export),
            key: key.to_string(),
            value: value.to_string(),
        },
        _ => Line::Other(raw.to_string()),
    }
}

fn is_valid_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Result of a successful `apply`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    pub path: PathBuf,
    /// `None` when the file did not exist before
    pub backup: Option<PathBuf>,
    /// Keys whose rendered value changed
    pub changed: Vec<String>,
}

/// Back up `path`, apply `updates`, and atomically replace the file.
///
/// Re-applying the same updates produces byte-identical content (plus one
/// more backup file). Untouched lines keep their order and text.
pub fn apply(path: &Path, updates: &ConfigUpdates) -> Result<ApplyReport, ConfigWriteError> {
    let backup = if path.exists() { Some(backup(path)?) } else { None };

    let mut document = ConfigDocument::read(path)?;
    let mut changed = Vec::new();
    for (key, value) in updates.changes() {
        let touched = match value {
            Some(value) => document.set(key, value)?,
            None => document.remove(key),
        };
        if touched {
            changed.push(key.to_string());
        }
    }

    stage(path, document.render().as_bytes())?.commit()?;

    tracing::info!(
        path = %path.display(),
        backup = ?backup.as_ref().map(|b| b.display().to_string()),
        keys = ?updates,
        changed = changed.len(),
        "Config file updated"
    );

    Ok(ApplyReport {
        path: path.to_path_buf(),
        backup,
        changed,
    })
}

/// `apply` for callers that must not abort on a write failure: nothing is
/// written for empty `updates`, and an error comes back as its message so the
/// rest of a run's results stay reportable.
pub fn apply_reported(path: &Path, updates: &ConfigUpdates) -> (Option<ApplyReport>, Option<String>) {
    if updates.is_empty() {
        return (None, None);
    }
    match apply(path, updates) {
        Ok(report) => (Some(report), None),
        Err(e) => {
            tracing::error!(path = %path.display(), keys = ?updates, error = %e, "Failed to write config; file left unchanged");
            (None, Some(e.to_string()))
        }
    }
}

/// Backups taken within the same second get a `.N` suffix up to this count
const MAX_BACKUPS_PER_STAMP: u32 = 1000;

/// Copy `path` to `path.backup.<timestamp>`, never overwriting an earlier backup
pub fn backup(path: &Path) -> Result<PathBuf, ConfigWriteError> {
    backup_with_stamp(path, &Utc::now().format("%Y%m%d%H%M%S").to_string())
}

fn backup_with_stamp(path: &Path, stamp: &str) -> Result<PathBuf, ConfigWriteError> {
    let base = format!("{}.backup.{}", path.display(), stamp);
    let backup_err = |source| ConfigWriteError::Backup {
        path: path.to_path_buf(),
        source,
    };

    let mut source = fs::File::open(path).map_err(backup_err)?;
    for n in 0..MAX_BACKUPS_PER_STAMP {
        let candidate = if n == 0 {
            PathBuf::from(&base)
        } else {
            PathBuf::from(format!("{}.{}", base, n))
        };
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(mut target) => {
                io::copy(&mut source, &mut target).map_err(backup_err)?;
                target.sync_all().map_err(backup_err)?;
                if let Ok(meta) = fs::metadata(path) {
                    let _ = fs::set_permissions(&candidate, meta.permissions());
                }
                return Ok(candidate);
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(backup_err(e)),
        }
    }
    Err(backup_err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("{} backups named {}.* already exist", MAX_BACKUPS_PER_STAMP, base),
    )))
}

/// Content written to a temporary file next to its target, not yet visible
/// at the target path. Dropping it without `commit` removes the temp file.
pub struct StagedWrite {
    tmp: NamedTempFile,
    target: PathBuf,
}

impl StagedWrite {
    pub fn temp_path(&self) -> &Path {
        self.tmp.path()
    }

    /// Atomically rename over the target
    pub fn commit(self) -> Result<(), ConfigWriteError> {
        let target = self.target;
        self.tmp.persist(&target).map_err(|e| ConfigWriteError::Write {
            path: target.clone(),
            source: e.error,
        })?;
        Ok(())
    }
}

pub fn stage(path: &Path, data: &[u8]) -> Result<StagedWrite, ConfigWriteError> {
    let write_err = |source| ConfigWriteError::Write {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(write_err)?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(write_err)?;
    tmp.write_all(data).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;
    // Keep the original's mode; the file holds secrets the app user must read.
    if let Ok(meta) = fs::metadata(path) {
        fs::set_permissions(tmp.path(), meta.permissions()).map_err(write_err)?;
    }

    Ok(StagedWrite {
        tmp,
        target: path.to_path_buf(),
    })
}
