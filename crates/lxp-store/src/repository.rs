//! Repositories: named directories of buckets.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::bucket::Bucket;
use crate::error::{StoreError, StoreResult};
use crate::keymap::KeyMap;
use crate::kind::BucketKind;
use crate::layout::{validate_name, META_DIR};
use crate::store::StoreContext;

struct RepositoryShared {
    name: String,
    dir: PathBuf,
    buckets: Mutex<HashMap<String, Bucket>>,
    ctx: Arc<StoreContext>,
}

/// Handle on a repository. Bucket handles are opened once and shared.
#[derive(Clone)]
pub struct Repository {
    shared: Arc<RepositoryShared>,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("name", &self.shared.name)
            .finish()
    }
}

impl Repository {
    pub(crate) fn new(ctx: Arc<StoreContext>, name: &str, dir: PathBuf) -> Self {
        Self {
            shared: Arc::new(RepositoryShared {
                name: name.to_string(),
                dir,
                buckets: Mutex::new(HashMap::new()),
                ctx,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn dir(&self) -> &Path {
        &self.shared.dir
    }

    pub fn create_bucket(&self, name: &str, kind: BucketKind) -> StoreResult<Bucket> {
        let mut buckets = self.shared.buckets.lock();
        let bucket = Bucket::create(
            self.shared.ctx.clone(),
            &self.shared.name,
            &self.shared.dir,
            name,
            kind,
        )?;
        buckets.insert(name.to_string(), bucket.clone());
        Ok(bucket)
    }

    pub fn get_bucket(&self, name: &str) -> StoreResult<Bucket> {
        let mut buckets = self.shared.buckets.lock();
        if let Some(bucket) = buckets.get(name) {
            if bucket.dir().is_dir() {
                return Ok(bucket.clone());
            }
            // Removed behind our back.
            bucket.detach();
            buckets.remove(name);
        }
        let bucket = Bucket::open(
            self.shared.ctx.clone(),
            &self.shared.name,
            &self.shared.dir,
            name,
            None,
        )?;
        buckets.insert(name.to_string(), bucket.clone());
        Ok(bucket)
    }

    /// Like [`get_bucket`](Self::get_bucket), but the bucket must be of `kind`.
    pub fn get_bucket_as(&self, name: &str, kind: BucketKind) -> StoreResult<Bucket> {
        let bucket = self.get_bucket(name)?;
        if bucket.kind() != kind {
            return Err(StoreError::KindMismatch {
                bucket: name.to_string(),
                expected: kind,
                actual: bucket.kind(),
            });
        }
        Ok(bucket)
    }

    pub fn get_or_create_bucket(&self, name: &str, kind: BucketKind) -> StoreResult<Bucket> {
        match self.get_bucket_as(name, kind) {
            Err(StoreError::BucketNotFound { .. }) => match self.create_bucket(name, kind) {
                // Lost a creation race to another process.
                Err(StoreError::BucketExists { .. }) => self.get_bucket_as(name, kind),
                other => other,
            },
            other => other,
        }
    }

    pub fn bucket_exists(&self, name: &str) -> bool {
        validate_name(name).is_ok() && self.shared.dir.join(name).join(META_DIR).is_dir()
    }

    /// Delete a bucket and everything in it.
    pub fn delete_bucket(&self, name: &str) -> StoreResult<()> {
        validate_name(name)?;
        let mut buckets = self.shared.buckets.lock();
        if let Some(bucket) = buckets.remove(name) {
            bucket.detach();
        }
        let dir = self.shared.dir.join(name);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                info!(repository = %self.shared.name, bucket = name, "bucket deleted");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StoreError::BucketNotFound {
                repository: self.shared.name.clone(),
                bucket: name.to_string(),
            }),
            Err(e) => Err(StoreError::env("delete bucket", &dir, e)),
        }
    }

    /// Names of all buckets in this repository, sorted.
    pub fn bucket_names(&self) -> StoreResult<Vec<String>> {
        let dir = &self.shared.dir;
        let mut names = Vec::new();
        for entry in fs::read_dir(dir).map_err(|e| StoreError::env("list repository", dir, e))? {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if self.bucket_exists(&name) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Key-addressed view of an `IDMAP` or `STRINGMAP` bucket.
    pub fn key_map(&self, name: &str) -> StoreResult<KeyMap> {
        KeyMap::new(self.get_bucket(name)?)
    }

    /// Stop watching every open bucket.
    pub(crate) fn detach(&self) {
        for bucket in self.shared.buckets.lock().drain().map(|(_, b)| b) {
            bucket.detach();
        }
    }
}
