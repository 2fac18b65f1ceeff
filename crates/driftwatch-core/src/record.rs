//! Integrity records and the baseline collection.

use crate::change::{Change, ChangeKind};
use crate::hasher::{ContentHash, Hasher};
use crate::{DriftError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File, Metadata};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Low nine POSIX permission bits (`rwxrwxrwx`).
///
/// Persisted as a three-digit octal string such as `"644"`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Permissions(u16);

impl Permissions {
    pub fn from_mode(mode: u32) -> Self {
        Self((mode & 0o777) as u16)
    }

    pub fn mode(&self) -> u32 {
        u32::from(self.0)
    }

    pub fn from_metadata(metadata: &Metadata) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            Self::from_mode(metadata.permissions().mode())
        }
        #[cfg(not(unix))]
        {
            if metadata.permissions().readonly() {
                Self(0o444)
            } else {
                Self(0o644)
            }
        }
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03o}", self.0)
    }
}

impl fmt::Debug for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Permissions({:03o})", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("permissions must be three octal digits, got {0:?}")]
pub struct ParsePermissionsError(String);

impl FromStr for Permissions {
    type Err = ParsePermissionsError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.len() != 3 || !s.bytes().all(|b| (b'0'..=b'7').contains(&b)) {
            return Err(ParsePermissionsError(s.to_string()));
        }
        u16::from_str_radix(s, 8)
            .map(Self)
            .map_err(|_| ParsePermissionsError(s.to_string()))
    }
}

impl Serialize for Permissions {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Permissions {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Tracked attributes of one regular file
///
/// `path` is kept as raw OS bytes so names that are not valid UTF-8 stay
/// distinct in memory and on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "StoredRecord", try_from = "StoredRecord")]
pub struct FileRecord {
    pub path: PathBuf,
    pub hash: ContentHash,
    pub size: u64,
    pub permissions: Permissions,
}

impl FileRecord {
    /// Read the file at `path` and build a fresh record.
    ///
    /// Symlinks and other non-regular files are rejected with
    /// [`DriftError::NotRegularFile`]. `size` is the number of bytes hashed.
    pub fn observe(path: &Path, hasher: &Hasher) -> Result<Self> {
        let link_meta = fs::symlink_metadata(path)?;
        if !link_meta.file_type().is_file() {
            return Err(DriftError::NotRegularFile(path.display().to_string()));
        }

        let file = File::open(path)?;
        let metadata = file.metadata()?;
        if !metadata.is_file() {
            return Err(DriftError::NotRegularFile(path.display().to_string()));
        }
        let permissions = Permissions::from_metadata(&metadata);
        let (hash, size) = hasher.hash_reader(file)?;

        Ok(Self {
            path: path.to_path_buf(),
            hash,
            size,
            permissions,
        })
    }

    /// How `current` differs from `self`, content first. `None` when every
    /// tracked attribute matches. Size alone never counts as drift.
    pub fn drift_to(&self, current: &FileRecord) -> Option<ChangeKind> {
        if self.hash != current.hash {
            Some(ChangeKind::ContentChanged)
        } else if self.permissions != current.permissions {
            Some(ChangeKind::PermissionsChanged)
        } else {
            None
        }
    }
}

/// On-disk shape of a [`FileRecord`]. `path` is always readable text; a name
/// that is not valid UTF-8 also carries its raw bytes, hex encoded, in
/// `path_bytes`, which wins on load.
#[derive(Serialize, Deserialize)]
struct StoredRecord {
    path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    path_bytes: Option<String>,
    hash: ContentHash,
    size: u64,
    permissions: Permissions,
}

#[derive(Debug, thiserror::Error)]
#[error("invalid path_bytes for {0:?}")]
pub struct InvalidPathBytes(String);

impl From<FileRecord> for StoredRecord {
    fn from(record: FileRecord) -> Self {
        let (path, path_bytes) = match record.path.to_str() {
            Some(text) => (text.to_string(), None),
            None => (
                record.path.to_string_lossy().into_owned(),
                raw_path_bytes(&record.path).map(hex::encode),
            ),
        };
        Self {
            path,
            path_bytes,
            hash: record.hash,
            size: record.size,
            permissions: record.permissions,
        }
    }
}

impl TryFrom<StoredRecord> for FileRecord {
    type Error = InvalidPathBytes;

    fn try_from(stored: StoredRecord) -> std::result::Result<Self, Self::Error> {
        let path = match stored.path_bytes {
            None => PathBuf::from(stored.path),
            Some(encoded) => hex::decode(&encoded)
                .ok()
                .and_then(path_from_raw_bytes)
                .ok_or(InvalidPathBytes(stored.path))?,
        };
        Ok(Self {
            path,
            hash: stored.hash,
            size: stored.size,
            permissions: stored.permissions,
        })
    }
}

#[cfg(unix)]
fn raw_path_bytes(path: &Path) -> Option<Vec<u8>> {
    use std::os::unix::ffi::OsStrExt;
    Some(path.as_os_str().as_bytes().to_vec())
}

#[cfg(not(unix))]
fn raw_path_bytes(_path: &Path) -> Option<Vec<u8>> {
    None
}

#[cfg(unix)]
fn path_from_raw_bytes(bytes: Vec<u8>) -> Option<PathBuf> {
    use std::os::unix::ffi::OsStringExt;
    Some(PathBuf::from(std::ffi::OsString::from_vec(bytes)))
}

#[cfg(not(unix))]
fn path_from_raw_bytes(bytes: Vec<u8>) -> Option<PathBuf> {
    String::from_utf8(bytes).ok().map(PathBuf::from)
}

/// Mutation the dispatcher applies to its baseline after a classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BaselineMutation {
    None,
    Upsert(FileRecord),
    Remove(PathBuf),
}

#[derive(Debug, thiserror::Error)]
#[error("duplicate baseline path: {0}")]
pub struct DuplicatePath(String);

/// Last-known-good state of every tracked file, keyed by path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "Vec<FileRecord>", try_from = "Vec<FileRecord>")]
pub struct Baseline {
    records: BTreeMap<PathBuf, FileRecord>,
}

impl Baseline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, path: impl AsRef<Path>) -> Option<&FileRecord> {
        self.records.get(path.as_ref())
    }

    pub fn contains(&self, path: impl AsRef<Path>) -> bool {
        self.records.contains_key(path.as_ref())
    }

    /// Records in path order.
    pub fn iter(&self) -> impl Iterator<Item = &FileRecord> {
        self.records.values()
    }

    /// Insert or replace the record for `record.path`.
    pub fn upsert(&mut self, record: FileRecord) -> Option<FileRecord> {
        self.records.insert(record.path.clone(), record)
    }

    pub fn remove(&mut self, path: impl AsRef<Path>) -> Option<FileRecord> {
        self.records.remove(path.as_ref())
    }

    /// Tracked paths strictly beneath the directory `dir`.
    ///
    /// Paths order component-wise, so descendants of `dir` sit in one
    /// contiguous run right after it.
    pub fn paths_under(&self, dir: impl AsRef<Path>) -> Vec<PathBuf> {
        let dir = dir.as_ref();
        self.records
            .range::<Path, _>((Bound::Excluded(dir), Bound::Unbounded))
            .take_while(|(path, _)| path.starts_with(dir))
            .map(|(path, _)| path.clone())
            .collect()
    }

    /// Apply a classifier mutation. Returns true if the baseline changed.
    pub fn apply(&mut self, mutation: BaselineMutation) -> bool {
        match mutation {
            BaselineMutation::None => false,
            BaselineMutation::Upsert(record) => {
                let changed = self.records.get(&record.path) != Some(&record);
                self.upsert(record);
                changed
            }
            BaselineMutation::Remove(path) => self.remove(&path).is_some(),
        }
    }

    /// Compare this baseline against a fresh scan. Yields at most one change
    /// per path, using the same precedence as live classification.
    pub fn diff(&self, current: &Baseline, observed_at: DateTime<Utc>) -> Vec<Change> {
        let mut changes = Vec::new();

        for (path, expected) in &self.records {
            match current.records.get(path) {
                Some(actual) => {
                    if let Some(kind) = expected.drift_to(actual) {
                        changes.push(Change::observed(path, kind, observed_at));
                    }
                }
                None => changes.push(Change::observed(path, ChangeKind::Deleted, observed_at)),
            }
        }

        for path in current.records.keys() {
            if !self.records.contains_key(path) {
                changes.push(Change::observed(path, ChangeKind::Created, observed_at));
            }
        }

        changes
    }
}

impl From<Baseline> for Vec<FileRecord> {
    fn from(baseline: Baseline) -> Self {
        baseline.records.into_values().collect()
    }
}

impl TryFrom<Vec<FileRecord>> for Baseline {
    type Error = DuplicatePath;

    fn try_from(records: Vec<FileRecord>) -> std::result::Result<Self, Self::Error> {
        let mut map = BTreeMap::new();
        for record in records {
            if map.contains_key(&record.path) {
                return Err(DuplicatePath(record.path.display().to_string()));
            }
            map.insert(record.path.clone(), record);
        }
        Ok(Self { records: map })
    }
}

impl FromIterator<FileRecord> for Baseline {
    fn from_iter<I: IntoIterator<Item = FileRecord>>(iter: I) -> Self {
        let mut baseline = Baseline::new();
        for record in iter {
            baseline.upsert(record);
        }
        baseline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn record(path: &str, content: &[u8], mode: u32) -> FileRecord {
        FileRecord {
            path: PathBuf::from(path),
            hash: ContentHash::of(content),
            size: content.len() as u64,
            permissions: Permissions::from_mode(mode),
        }
    }

    #[test]
    fn test_permissions_format() {
        assert_eq!(Permissions::from_mode(0o100644).to_string(), "644");
        assert_eq!(Permissions::from_mode(0o7).to_string(), "007");
        assert_eq!("600".parse::<Permissions>().unwrap().mode(), 0o600);
        assert!("6440".parse::<Permissions>().is_err());
        assert!("68a".parse::<Permissions>().is_err());
        assert!("".parse::<Permissions>().is_err());
    }

    #[test]
    fn test_observe_regular_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.txt");
        fs::write(&path, b"hi").unwrap();

        let rec = FileRecord::observe(&path, &Hasher::new()).unwrap();
        assert_eq!(rec.path, path);
        assert_eq!(rec.hash, ContentHash::of(b"hi"));
        assert_eq!(rec.size, 2);
    }

    #[test]
    fn test_observe_rejects_directory() {
        let dir = tempdir().unwrap();
        let err = FileRecord::observe(dir.path(), &Hasher::new()).unwrap_err();
        assert!(matches!(err, DriftError::NotRegularFile(_)));
    }

    #[test]
    fn test_drift_prefers_content() {
        let old = record("/r/a", b"one", 0o644);
        assert_eq!(old.drift_to(&old.clone()), None);
        assert_eq!(
            old.drift_to(&record("/r/a", b"two", 0o644)),
            Some(ChangeKind::ContentChanged)
        );
        assert_eq!(
            old.drift_to(&record("/r/a", b"one", 0o600)),
            Some(ChangeKind::PermissionsChanged)
        );
        assert_eq!(
            old.drift_to(&record("/r/a", b"two", 0o600)),
            Some(ChangeKind::ContentChanged)
        );

        let mut resized = old.clone();
        resized.size = 99;
        assert_eq!(old.drift_to(&resized), None);
    }

    #[test]
    fn test_apply_mutations() {
        let mut baseline = Baseline::new();
        assert!(baseline.apply(BaselineMutation::Upsert(record("/r/a", b"1", 0o644))));
        assert!(!baseline.apply(BaselineMutation::Upsert(record("/r/a", b"1", 0o644))));
        assert!(!baseline.apply(BaselineMutation::None));
        assert!(baseline.apply(BaselineMutation::Remove("/r/a".into())));
        assert!(!baseline.apply(BaselineMutation::Remove("/r/a".into())));
        assert!(baseline.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_paths_under_directory() {
        let baseline: Baseline = vec![
            record("/r/dir/a", b"a", 0o644),
            record("/r/dir/sub/b", b"b", 0o644),
            record("/r/dir2/c", b"c", 0o644),
            record("/r/dir", b"d", 0o644),
        ]
        .into_iter()
        .collect();
        let expected = vec![PathBuf::from("/r/dir/a"), PathBuf::from("/r/dir/sub/b")];
        assert_eq!(baseline.paths_under("/r/dir"), expected);
        assert_eq!(baseline.paths_under("/r/dir/"), expected);
        assert!(baseline.paths_under("/r/none").is_empty());
    }

    #[test]
    fn test_duplicate_paths_rejected() {
        let recs = vec![record("/r/a", b"1", 0o644), record("/r/a", b"2", 0o644)];
        assert!(Baseline::try_from(recs).is_err());
    }

    #[test]
    fn test_serialized_shape() {
        let baseline: Baseline = vec![record("/r/b", b"b", 0o600), record("/r/a", b"a", 0o644)]
            .into_iter()
            .collect();
        let value = serde_json::to_value(&baseline).unwrap();
        let arr = value.as_array().unwrap();
        assert_eq!(arr.len(), 2);
        assert_eq!(arr[0]["path"], "/r/a");
        assert_eq!(arr[0]["permissions"], "644");
        assert_eq!(arr[0]["size"], 1);
        assert_eq!(arr[0]["hash"].as_str().unwrap().len(), 64);
        assert_eq!(arr[1]["permissions"], "600");
    }

    #[test]
    fn test_diff_reports_each_kind_once() {
        let old: Baseline = vec![
            record("/r/same", b"s", 0o644),
            record("/r/content", b"c1", 0o644),
            record("/r/perms", b"p", 0o644),
            record("/r/gone", b"g", 0o644),
        ]
        .into_iter()
        .collect();
        let new: Baseline = vec![
            record("/r/same", b"s", 0o644),
            record("/r/content", b"c2", 0o600),
            record("/r/perms", b"p", 0o600),
            record("/r/new", b"n", 0o644),
        ]
        .into_iter()
        .collect();

        let now = Utc::now();
        let mut changes: Vec<(String, ChangeKind)> = old
            .diff(&new, now)
            .into_iter()
            .map(|c| (c.path.display().to_string(), c.kind))
            .collect();
        changes.sort();

        assert_eq!(
            changes,
            vec![
                ("/r/content".to_string(), ChangeKind::ContentChanged),
                ("/r/gone".to_string(), ChangeKind::Deleted),
                ("/r/new".to_string(), ChangeKind::Created),
                ("/r/perms".to_string(), ChangeKind::PermissionsChanged),
            ]
        );
        assert!(new.diff(&new, now).is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_paths_persist_losslessly() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = Path::new("/r");
        let baseline: Baseline = vec![
            record("/r/plain", b"p", 0o644),
            FileRecord {
                path: dir.join(OsStr::from_bytes(b"a\xff")),
                ..record("/r/x", b"1", 0o644)
            },
            FileRecord {
                path: dir.join(OsStr::from_bytes(b"a\xfe")),
                ..record("/r/x", b"2", 0o644)
            },
        ]
        .into_iter()
        .collect();
        assert_eq!(baseline.len(), 3);

        let value = serde_json::to_value(&baseline).unwrap();
        let with_bytes: Vec<_> = value
            .as_array()
            .unwrap()
            .iter()
            .filter(|r| r.get("path_bytes").is_some())
            .collect();
        assert_eq!(with_bytes.len(), 2);
        assert_eq!(with_bytes[0]["path_bytes"], hex::encode(b"/r/a\xfe"));

        let restored: Baseline = serde_json::from_value(value).unwrap();
        assert_eq!(restored, baseline);
    }

    #[test]
    fn test_bad_path_bytes_rejected() {
        let json = format!(
            r#"[{{"path":"/r/a","path_bytes":"zz","hash":"{}","size":1,"permissions":"644"}}]"#,
            ContentHash::of(b"a")
        );
        assert!(serde_json::from_str::<Baseline>(&json).is_err());
    }
}
