//! Append-only journal for the record store
//!
//! Every mutation is written as one JSON line before it is applied, so the
//! store can be rebuilt by replaying the file on startup.

use crate::error::{Result, VaultError};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// A state change recorded in the journal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Mutation {
    Create { id: u64, payload: Vec<u8> },
    Update { id: u64, payload: Vec<u8> },
    Delete { id: u64 },
}

/// One journal line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub timestamp: u64,
    pub mutation: Mutation,
}

impl JournalEntry {
    pub fn new(mutation: Mutation) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self { timestamp, mutation }
    }
}

pub struct Journal {
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl Journal {
    /// Open (or create) a journal file for appending
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;

        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
            path: path.as_ref().to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a mutation and flush it to the file
    pub fn append(&self, mutation: Mutation) -> Result<()> {
        let entry = JournalEntry::new(mutation);
        let json = serde_json::to_string(&entry)?;

        let mut writer = self
            .writer
            .lock()
            .map_err(|_| VaultError::Journal("journal writer lock poisoned".to_string()))?;
        writeln!(writer, "{}", json)?;
        writer.flush()?;
        Ok(())
    }

    /// Feed every recorded mutation, oldest first, to `apply_fn`.
    ///
    /// Returns the number of entries replayed.
    pub fn replay<F>(&self, mut apply_fn: F) -> Result<usize>
    where
        F: FnMut(Mutation) -> Result<()>,
    {
        if !self.path.exists() {
            return Ok(0);
        }

        let reader = BufReader::new(File::open(&self.path)?);
        let mut replayed = 0;

        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            let entry: JournalEntry = serde_json::from_str(&line).map_err(|e| {
                VaultError::Journal(format!("bad entry on line {}: {}", line_no + 1, e))
            })?;

            apply_fn(entry.mutation)?;
            replayed += 1;
        }

        Ok(replayed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_journal_append_and_replay() {
        let temp_file = NamedTempFile::new().unwrap();
        let journal = Journal::open(temp_file.path()).unwrap();

        let first = Mutation::Create {
            id: 1,
            payload: b"hello".to_vec(),
        };
        let second = Mutation::Delete { id: 1 };

        journal.append(first.clone()).unwrap();
        journal.append(second.clone()).unwrap();

        let mut replayed = Vec::new();
        let count = journal
            .replay(|mutation| {
                replayed.push(mutation);
                Ok(())
            })
            .unwrap();

        assert_eq!(count, 2);
        assert_eq!(replayed, vec![first, second]);
    }

    #[test]
    fn test_journal_reports_its_path() {
        let temp_file = NamedTempFile::new().unwrap();
        let journal = Journal::open(temp_file.path()).unwrap();
        assert_eq!(journal.path(), temp_file.path());
    }

    #[test]
    fn test_journal_rejects_corrupt_line() {
        let temp_file = NamedTempFile::new().unwrap();
        std::fs::write(temp_file.path(), "not json\n").unwrap();

        let journal = Journal::open(temp_file.path()).unwrap();
        let result = journal.replay(|_| Ok(()));
        assert!(matches!(result, Err(VaultError::Journal(_))));
    }
}
