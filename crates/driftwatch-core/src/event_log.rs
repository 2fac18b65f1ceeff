use crate::change::{serialize_path_lossy, Change, ChangeKind};
use crate::sink::ChangeSink;
use crate::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

const MAX_ROTATIONS: usize = 5;

/// File name of the active change log inside the log directory.
pub const CHANGE_LOG_FILE: &str = "changes.log";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEntry {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: ChangeKind,
    #[serde(serialize_with = "serialize_path_lossy")]
    pub path: PathBuf,
}

/// Append-only JSON-lines log of detected changes, rotated by size.
pub struct ChangeLog {
    path: PathBuf,
    inner: Mutex<LogState>,
    max_bytes: u64,
}

#[derive(Debug)]
struct LogState {
    last_seq: u64,
}

impl ChangeLog {
    pub fn new<P: AsRef<Path>>(path: P, max_bytes: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let last_seq = Self::load_state(&path)?;
        Ok(Self {
            path,
            inner: Mutex::new(LogState { last_seq }),
            max_bytes,
        })
    }

    /// Open `<dir>/changes.log`.
    pub fn in_dir<P: AsRef<Path>>(dir: P, max_bytes: u64) -> Result<Self> {
        Self::new(dir.as_ref().join(CHANGE_LOG_FILE), max_bytes)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // Sequence numbers continue across restarts. After a rotation the newest
    // entry lives in `<file>.1`.
    fn load_state(path: &Path) -> Result<u64> {
        let mut last_seq = 0;
        for candidate in [path.to_path_buf(), suffixed(path, 1)] {
            last_seq = read_entries(&candidate)?
                .iter()
                .map(|entry| entry.seq)
                .fold(last_seq, u64::max);
            if last_seq > 0 {
                break;
            }
        }
        Ok(last_seq)
    }

    pub fn append(&self, change: &Change) -> Result<ChangeEntry> {
        let mut state = self.inner.lock();
        self.rotate_if_needed()?;
        let entry = ChangeEntry {
            seq: state.last_seq + 1,
            timestamp: change.observed_at,
            kind: change.kind,
            path: change.path.clone(),
        };
        self.write_entry(&entry)?;
        state.last_seq = entry.seq;
        Ok(entry)
    }

    fn write_entry(&self, entry: &ChangeEntry) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(entry)?;
        writeln!(file, "{}", line)?;
        file.flush()?;
        Ok(())
    }

    // Caller holds the state lock.
    fn rotate_if_needed(&self) -> Result<()> {
        match fs::metadata(&self.path) {
            Ok(metadata) if metadata.len() >= self.max_bytes => {}
            _ => return Ok(()),
        }
        for i in (1..=MAX_ROTATIONS).rev() {
            let rotated = suffixed(&self.path, i);
            if rotated.exists() {
                if i == MAX_ROTATIONS {
                    fs::remove_file(&rotated)?;
                } else {
                    fs::rename(&rotated, suffixed(&self.path, i + 1))?;
                }
            }
        }
        fs::rename(&self.path, suffixed(&self.path, 1))?;
        Ok(())
    }

    /// Read recent entries, newest first. Falls back to rotated files,
    /// newest rotation first, until `limit` entries are collected.
    pub fn read_recent(
        &self,
        since: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<Vec<ChangeEntry>> {
        let limit = limit.unwrap_or(usize::MAX);
        let files = std::iter::once(self.path.clone())
            .chain((1..=MAX_ROTATIONS).map(|i| suffixed(&self.path, i)));

        let mut recent = Vec::new();
        for file in files {
            if recent.len() >= limit {
                break;
            }
            let newest_first = read_entries(&file)?
                .into_iter()
                .rev()
                .filter(|entry| since.map_or(true, |ts| entry.timestamp >= ts));
            recent.extend(newest_first.take(limit - recent.len()));
        }
        Ok(recent)
    }
}

/// Every parseable entry in `path`, oldest first. A missing file is empty;
/// unparseable lines are skipped.
fn read_entries(path: &Path) -> Result<Vec<ChangeEntry>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => return Err(e.into()),
    };
    let mut entries = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ChangeEntry>(&line) {
            Ok(entry) => entries.push(entry),
            Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable log line"),
        }
    }
    Ok(entries)
}

impl ChangeSink for ChangeLog {
    fn record(&self, change: &Change) -> Result<()> {
        self.append(change)?;
        Ok(())
    }
}

fn suffixed(path: &Path, index: usize) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{index}"));
    path.with_file_name(name)
}
