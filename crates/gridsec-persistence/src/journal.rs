//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Append-only JSON-lines journal files."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::Result;

/// Journal format version written into the header line.
pub const JOURNAL_VERSION: u16 = 1;

/// First line of every journal file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct JournalHeader {
    version: u16,
    kind: String,
    created_at: DateTime<Utc>,
}

/// One line of a journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry<T> {
    /// Sequential identifier assigned when appending, starting at 1.
    pub sequence: u64,
    /// Stored record.
    pub payload: T,
}

/// Append-only writer for a journal.
pub struct JournalWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    next_sequence: u64,
}

impl JournalWriter {
    /// Open a journal for appending, writing a header if the file is new.
    pub fn open(path: &Path, kind: &str) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let exists = path.exists();
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = BufWriter::new(file);

        if !exists || is_empty(path)? {
            let header = JournalHeader {
                version: JOURNAL_VERSION,
                kind: kind.to_owned(),
                created_at: Utc::now(),
            };
            writer.write_all(serde_json::to_string(&header)?.as_bytes())?;
            writer.write_all(b"\n")?;
            writer.flush()?;
            return Ok(Self {
                path: path.to_path_buf(),
                writer,
                next_sequence: 0,
            });
        }

        if !ends_with_newline(path)? {
            // Close a line torn by a crash so the next record starts cleanly.
            writer.write_all(b"\n")?;
            writer.flush()?;
        }
        let next_sequence = last_sequence(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer,
            next_sequence,
        })
    }

    /// Append a record and return the assigned sequence number and byte count.
    pub fn append<T: Serialize>(&mut self, payload: &T) -> Result<(u64, usize)> {
        let sequence = self.next_sequence + 1;
        let mut line = serde_json::to_vec(&JournalEntry { sequence, payload })?;
        line.push(b'\n');
        self.writer.write_all(&line)?;
        self.writer.flush()?;
        self.next_sequence = sequence;
        Ok((sequence, line.len()))
    }

    /// Sequence number of the last appended record (0 when empty).
    pub fn last_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Location of the journal on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn is_empty(path: &Path) -> Result<bool> {
    Ok(fs::metadata(path)?.len() == 0)
}

fn ends_with_newline(path: &Path) -> Result<bool> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

fn last_sequence(path: &Path) -> Result<u64> {
    let reader = BufReader::new(File::open(path)?);
    let mut last = 0u64;
    for line in reader.lines().skip(1) {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        if let Ok(entry) = serde_json::from_str::<JournalEntry<serde_json::Value>>(&line) {
            last = entry.sequence;
        }
    }
    Ok(last)
}

/// Sequential reader over the entries of a journal.
///
/// Lines that do not decode (a torn tail, a foreign write) are skipped with a
/// warning; only IO failures end the iteration with an error.
pub struct JournalReader<T> {
    path: PathBuf,
    lines: std::io::Lines<BufReader<File>>,
    line_number: usize,
    _record: std::marker::PhantomData<T>,
}

impl<T: DeserializeOwned> JournalReader<T> {
    /// Open the journal for sequential reading, skipping the header.
    pub fn open(path: &Path) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        let mut header = String::new();
        reader.read_line(&mut header)?;
        Ok(Self {
            path: path.to_path_buf(),
            lines: reader.lines(),
            line_number: 1,
            _record: std::marker::PhantomData,
        })
    }
}

impl<T: DeserializeOwned> Iterator for JournalReader<T> {
    type Item = Result<JournalEntry<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.line_number += 1;
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(err) => return Some(Err(err.into())),
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(entry) => return Some(Ok(entry)),
                Err(err) => warn!(
                    path = %self.path.display(),
                    line = self.line_number,
                    error = %err,
                    "skipping undecodable journal line"
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tempfile::tempdir;

    #[test]
    fn append_and_read_back_in_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let mut writer = JournalWriter::open(&path, "audit").unwrap();

        let (first, bytes) = writer.append(&json!({"action": "LOGIN"})).unwrap();
        let (second, _) = writer.append(&json!({"action": "LOGOUT"})).unwrap();
        assert_eq!((first, second), (1, 2));
        assert!(bytes > 0);

        let entries: Vec<JournalEntry<Value>> = JournalReader::open(&path)
            .unwrap()
            .map(|entry| entry.unwrap())
            .collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].payload["action"], "LOGIN");
        assert_eq!(entries[1].sequence, 2);
    }

    #[test]
    fn reopening_continues_sequence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("threats.jsonl");
        {
            let mut writer = JournalWriter::open(&path, "threats").unwrap();
            writer.append(&json!({"n": 1})).unwrap();
            writer.append(&json!({"n": 2})).unwrap();
        }
        let mut writer = JournalWriter::open(&path, "threats").unwrap();
        assert_eq!(writer.last_sequence(), 2);
        let (sequence, _) = writer.append(&json!({"n": 3})).unwrap();
        assert_eq!(sequence, 3);
    }

    #[test]
    fn torn_tail_is_closed_and_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        {
            let mut writer = JournalWriter::open(&path, "audit").unwrap();
            writer.append(&json!({"action": "LOGIN"})).unwrap();
        }
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(br#"{"sequence":2,"payload":{"timest"#).unwrap();
        drop(file);

        let mut writer = JournalWriter::open(&path, "audit").unwrap();
        assert_eq!(writer.last_sequence(), 1);
        writer.append(&json!({"action": "LOGOUT"})).unwrap();

        let entries: Vec<JournalEntry<Value>> = JournalReader::open(&path)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        let actions: Vec<&str> = entries
            .iter()
            .map(|e| e.payload["action"].as_str().unwrap())
            .collect();
        assert_eq!(actions, vec!["LOGIN", "LOGOUT"]);
        assert_eq!(entries[1].sequence, 2);
    }
}
