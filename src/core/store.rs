use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::core::record::CardReadRecord;

/// On-disk layout of the record log
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// One pretty-printed JSON array, rewritten atomically on every append.
    #[default]
    Array,
    /// Newline-delimited JSON, appended and fsynced per record.
    Lines,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "array" | "json" => Ok(LogFormat::Array),
            "lines" | "jsonl" | "ndjson" => Ok(LogFormat::Lines),
            _ => Err(format!("Invalid log format: {s}")),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("{path} is not a valid record log: {source}")]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to serialize records: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
}

/// Append-only card record log backed by a single file.
///
/// At most one process should write a given log; concurrent writers
/// never corrupt it but can drop each other's records.
#[derive(Debug, Clone)]
pub struct RecordStore {
    path: PathBuf,
    format: LogFormat,
}

impl RecordStore {
    pub fn new(path: impl Into<PathBuf>, format: LogFormat) -> Self {
        Self {
            path: path.into(),
            format,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Durably append one record.
    ///
    /// Once this returns `Ok`, the record is on stable storage. On error the
    /// previous log contents are left as they were.
    pub fn append(&self, record: &CardReadRecord) -> Result<(), StoreError> {
        match self.format {
            LogFormat::Array => self.append_rewrite(record),
            LogFormat::Lines => self.append_line(record),
        }
    }

    /// Load every record, failing on a missing or malformed file
    pub fn load(&self) -> Result<Vec<CardReadRecord>, StoreError> {
        let contents = fs::read_to_string(&self.path).map_err(|source| StoreError::Read {
            path: self.path.clone(),
            source,
        })?;

        match self.format {
            LogFormat::Array => serde_json::from_str(&contents).map_err(|source| StoreError::Malformed {
                path: self.path.clone(),
                source,
            }),
            LogFormat::Lines => contents
                .lines()
                .filter(|line| !line.trim().is_empty())
                .map(|line| {
                    serde_json::from_str(line).map_err(|source| StoreError::Malformed {
                        path: self.path.clone(),
                        source,
                    })
                })
                .collect(),
        }
    }

    /// Load what can be loaded; anything unreadable counts as empty.
    pub fn load_lenient(&self) -> Vec<CardReadRecord> {
        match self.format {
            LogFormat::Array => self
                .load_entries()
                .into_iter()
                .enumerate()
                .filter_map(|(index, entry)| match serde_json::from_value::<CardReadRecord>(entry) {
                    Ok(record) => Some(record),
                    Err(e) => {
                        log::warn!(
                            "Skipping entry {} of {}: {e}",
                            index + 1,
                            self.path.display()
                        );
                        None
                    }
                })
                .collect(),
            LogFormat::Lines => self.load_lines_lenient(),
        }
    }

    fn load_lines_lenient(&self) -> Vec<CardReadRecord> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                log::warn!("Could not read {}: {e}", self.path.display());
                return Vec::new();
            }
        };

        contents
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .filter_map(|(index, line)| match serde_json::from_str(line) {
                Ok(record) => Some(record),
                Err(e) => {
                    log::warn!(
                        "Skipping malformed line {} of {}: {e}",
                        index + 1,
                        self.path.display()
                    );
                    None
                }
            })
            .collect()
    }

    fn append_rewrite(&self, record: &CardReadRecord) -> Result<(), StoreError> {
        let mut entries = self.load_entries();
        entries.push(serde_json::to_value(record)?);

        let staged = self.write_staged(&entries)?;
        self.commit(staged)
    }

    /// Existing array elements, kept verbatim whatever their shape.
    ///
    /// Only a missing or unreadable file, or one whose top level is not a
    /// JSON array, counts as empty.
    fn load_entries(&self) -> Vec<Value> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                log::warn!(
                    "Treating {} as empty, read failed: {e}",
                    self.path.display()
                );
                return Vec::new();
            }
        };

        match serde_json::from_str(&contents) {
            Ok(Value::Array(entries)) => entries,
            Ok(_) => {
                log::warn!(
                    "Treating {} as empty, not a JSON array",
                    self.path.display()
                );
                Vec::new()
            }
            Err(e) => {
                log::warn!(
                    "Treating {} as empty, malformed JSON: {e}",
                    self.path.display()
                );
                Vec::new()
            }
        }
    }

    fn directory(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }

    fn write_error(&self, source: io::Error) -> StoreError {
        StoreError::Write {
            path: self.path.clone(),
            source,
        }
    }

    /// Serialize `entries` into a synced temp file beside the target.
    ///
    /// The temp file must live in the target's directory so the rename in
    /// [`Self::commit`] stays on one filesystem. Dropping the returned file
    /// without committing deletes it and leaves the target untouched.
    pub(crate) fn write_staged<T: Serialize>(&self, entries: &[T]) -> Result<NamedTempFile, StoreError> {
        let staged = NamedTempFile::new_in(self.directory()).map_err(|e| self.write_error(e))?;

        {
            let mut writer = BufWriter::new(staged.as_file());
            serde_json::to_writer_pretty(&mut writer, entries)?;
            writer.write_all(b"\n").map_err(|e| self.write_error(e))?;
            writer.flush().map_err(|e| self.write_error(e))?;
        }
        staged.as_file().sync_all().map_err(|e| self.write_error(e))?;

        Ok(staged)
    }

    /// Atomically rename a staged file over the target
    pub(crate) fn commit(&self, staged: NamedTempFile) -> Result<(), StoreError> {
        // On failure the returned PersistError owns the temp file and removes it on drop
        staged
            .persist(&self.path)
            .map_err(|e| self.write_error(e.error))?;

        log::debug!("Rewrote record log {}", self.path.display());
        Ok(())
    }

    fn append_line(&self, record: &CardReadRecord) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .read(true)
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.write_error(e))?;

        // Terminate a line torn by an earlier crash so it can't swallow this record
        if !ends_with_newline(&mut file).map_err(|e| self.write_error(e))? {
            line.insert(0, b'\n');
        }

        file.write_all(&line).map_err(|e| self.write_error(e))?;
        file.sync_all().map_err(|e| self.write_error(e))?;

        log::debug!("Appended record to {}", self.path.display());
        Ok(())
    }
}

/// True for an empty file or one whose last byte is `\n`
fn ends_with_newline(file: &mut File) -> io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(true);
    }

    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}
