//! Secondary indexes: label → value → oids, one file per distinct value.
//!
//! An index directory `INDICES/INDEX<label>` holds one file per indexed
//! value listing the oids that carry that value, one per line. The file is
//! named by the escaped value; a value too long for a file name gets a
//! hashed name instead, and its file starts with a `=`-prefixed JSON line
//! holding the value. The in-memory map is loaded on first use and then
//! kept in step with every append and removal.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lxp_types::{Oid, Tuple};
use parking_lot::Mutex;
use tracing::debug;

use crate::bucket::{Bucket, Records};
use crate::error::{StoreError, StoreResult};
use crate::layout::{index_file_name, is_hashed_index_name, unescape_index_value, INDEX_PREFIX};

const VALUE_LINE_PREFIX: char = '=';

/// Shared state of one index; owned by its bucket.
pub(crate) struct IndexState {
    label: String,
    dir: PathBuf,
    sync_writes: bool,
    values: Mutex<Option<HashMap<String, Vec<Oid>>>>,
}

impl IndexState {
    pub(crate) fn new(label: &str, indices_dir: &Path, sync_writes: bool) -> Self {
        Self {
            label: label.to_string(),
            dir: indices_dir.join(format!("{INDEX_PREFIX}{label}")),
            sync_writes,
            values: Mutex::new(None),
        }
    }

    pub(crate) fn label(&self) -> &str {
        &self.label
    }

    pub(crate) fn dir(&self) -> &Path {
        &self.dir
    }

    /// Run `f` over the loaded map, loading it from disk first if needed.
    fn with_values<T>(
        &self,
        f: impl FnOnce(&mut HashMap<String, Vec<Oid>>) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut guard = self.values.lock();
        if guard.is_none() {
            *guard = Some(self.load()?);
        }
        f(guard.get_or_insert_with(HashMap::new))
    }

    fn load(&self) -> StoreResult<HashMap<String, Vec<Oid>>> {
        let mut values = HashMap::new();
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(values),
            Err(e) => return Err(StoreError::env("read index", &self.dir, e)),
        };
        for entry in entries {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            // Scratch files from an interrupted rewrite.
            if name.starts_with('.') {
                continue;
            }
            let hashed = is_hashed_index_name(name);
            let named = if hashed { None } else { unescape_index_value(name) };
            if !hashed && named.is_none() {
                continue;
            }
            let text = fs::read_to_string(&path).map_err(|e| StoreError::env("read index", &path, e))?;
            let (value, oids) = parse_value_file(&path, &text, named)?;
            values.insert(value, oids);
        }
        debug!(label = %self.label, values = values.len(), "index loaded");
        Ok(values)
    }

    /// File `tuple` under its value for this label. Tuples without the label,
    /// or whose value has no index key (lists), are skipped.
    pub(crate) fn add(&self, tuple: &Tuple) -> StoreResult<bool> {
        let Some(key) = tuple.get(&self.label).ok().and_then(|v| v.index_key()) else {
            return Ok(false);
        };
        let oid = tuple.oid();
        self.with_values(|values| {
            let name = index_file_name(&key);
            let path = self.dir.join(&name);
            let mut entry = String::new();
            if is_hashed_index_name(&name) && !values.contains_key(&key) {
                entry.push_str(&value_line(&key));
            }
            entry.push_str(&format!("{oid}\n"));

            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|e| StoreError::env("open index", &path, e))?;
            file.write_all(entry.as_bytes())
                .map_err(|e| StoreError::env("append index", &path, e))?;
            if self.sync_writes {
                file.sync_all()
                    .map_err(|e| StoreError::env("sync index", &path, e))?;
            }
            values.entry(key).or_default().push(oid);
            Ok(true)
        })
    }

    /// Take `oid` out of every value it is filed under, rewriting the
    /// affected files. Returns how many values changed.
    pub(crate) fn remove(&self, oid: Oid) -> StoreResult<usize> {
        self.with_values(|values| {
            let keys: Vec<String> = values
                .iter()
                .filter(|(_, oids)| oids.contains(&oid))
                .map(|(key, _)| key.clone())
                .collect();
            for key in &keys {
                let mut remaining = values.get(key).cloned().unwrap_or_default();
                remaining.retain(|o| *o != oid);
                self.rewrite(key, &remaining)?;
                if remaining.is_empty() {
                    values.remove(key);
                } else {
                    values.insert(key.clone(), remaining);
                }
            }
            if !keys.is_empty() {
                debug!(label = %self.label, %oid, values = keys.len(), "unindexed");
            }
            Ok(keys.len())
        })
    }

    /// Replace the file for `key` with `oids`, or delete it when empty.
    fn rewrite(&self, key: &str, oids: &[Oid]) -> StoreResult<()> {
        let name = index_file_name(key);
        let path = self.dir.join(&name);
        if oids.is_empty() {
            return match fs::remove_file(&path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(StoreError::env("remove index", &path, e)),
            };
        }
        let mut content = String::new();
        if is_hashed_index_name(&name) {
            content.push_str(&value_line(key));
        }
        for oid in oids {
            content.push_str(&format!("{oid}\n"));
        }
        let mut temp = tempfile::NamedTempFile::new_in(&self.dir)
            .map_err(|e| StoreError::env("rewrite index", &self.dir, e))?;
        temp.write_all(content.as_bytes())
            .map_err(|e| StoreError::env("rewrite index", temp.path(), e))?;
        if self.sync_writes {
            temp.as_file()
                .sync_all()
                .map_err(|e| StoreError::env("sync index", temp.path(), e))?;
        }
        temp.persist(&path)
            .map_err(|e| StoreError::env("rewrite index", &path, e.error))?;
        Ok(())
    }

    pub(crate) fn oids(&self, value: &str) -> StoreResult<Vec<Oid>> {
        self.with_values(|values| Ok(values.get(value).cloned().unwrap_or_default()))
    }

    pub(crate) fn counts(&self) -> StoreResult<BTreeMap<String, usize>> {
        self.with_values(|values| Ok(values.iter().map(|(k, v)| (k.clone(), v.len())).collect()))
    }
}

fn value_line(value: &str) -> String {
    let json = serde_json::Value::String(value.to_string());
    format!("{VALUE_LINE_PREFIX}{json}\n")
}

/// Parse one value file. `named` is the value decoded from the file name,
/// if the name carries it; otherwise the file's value line must.
fn parse_value_file(path: &Path, text: &str, named: Option<String>) -> StoreResult<(String, Vec<Oid>)> {
    let malformed = |reason: String| StoreError::Malformed {
        path: path.to_path_buf(),
        reason,
    };
    let mut value = named;
    let mut oids = Vec::new();
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some(json) = line.strip_prefix(VALUE_LINE_PREFIX) {
            let stored: String = serde_json::from_str(json).map_err(|e| malformed(e.to_string()))?;
            value.get_or_insert(stored);
            continue;
        }
        oids.push(line.parse::<Oid>().map_err(|e| malformed(e.to_string()))?);
    }
    let value = value.ok_or_else(|| malformed("hashed index file has no value line".into()))?;
    Ok((value, oids))
}

/// A handle on one secondary index of a bucket.
#[derive(Clone)]
pub struct BucketIndex {
    state: Arc<IndexState>,
    bucket: Bucket,
}

impl BucketIndex {
    pub(crate) fn new(state: Arc<IndexState>, bucket: Bucket) -> Self {
        Self { state, bucket }
    }

    /// The indexed label.
    pub fn label(&self) -> &str {
        self.state.label()
    }

    /// Offer a tuple to the index. Returns whether it was filed.
    pub fn add(&self, tuple: &Tuple) -> StoreResult<bool> {
        self.state.add(tuple)
    }

    /// Oids filed under `value`, in insertion order.
    pub fn oids(&self, value: &str) -> StoreResult<Vec<Oid>> {
        self.state.oids(value)
    }

    /// Number of tuples filed under `value`.
    pub fn value_count(&self, value: &str) -> StoreResult<usize> {
        Ok(self.state.oids(value)?.len())
    }

    /// Every distinct value with its tuple count, sorted by value.
    pub fn values(&self) -> StoreResult<BTreeMap<String, usize>> {
        self.state.counts()
    }

    /// Lazily resolve the tuples filed under `value` through the bucket.
    pub fn records(&self, value: &str) -> StoreResult<Records> {
        Ok(Records::new(self.bucket.clone(), self.state.oids(value)?))
    }
}

impl std::fmt::Debug for BucketIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketIndex")
            .field("bucket", &self.bucket.name())
            .field("label", &self.state.label())
            .finish()
    }
}
