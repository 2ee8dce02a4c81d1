//! The store: root of the on-disk hierarchy and owner of process-wide state.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use lxp_meta::{TypeDescriptor, TypeRegistry};
use lxp_types::{
    OidGenerator, Oid, RandomOidGenerator, StaticSchema, StoreReference, Tuple, TupleResolver,
    ValueKind,
};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::bucket::Bucket;
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::kind::BucketKind;
use crate::layout::{validate_name, REPOS_DIR};
use crate::repository::Repository;
use crate::transaction::{Transaction, TransactionId};
use crate::watcher::Watcher;

/// Bucket of the system repository holding type descriptor tuples.
pub const TYPES_BUCKET: &str = "TYPES";

/// State every repository and bucket handle needs.
pub(crate) struct StoreContext {
    pub(crate) config: StoreConfig,
    pub(crate) types: TypeRegistry,
    pub(crate) ids: Arc<dyn OidGenerator>,
    pub(crate) watcher: Option<Watcher>,
    pub(crate) store: Weak<StoreInner>,
    next_transaction: AtomicU64,
    registering: Mutex<()>,
}

pub(crate) struct StoreInner {
    ctx: Arc<StoreContext>,
    root: PathBuf,
    repos: Mutex<HashMap<String, Repository>>,
}

/// Handle on an open store. Clones share all state.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").field("root", &self.inner.root).finish()
    }
}

impl Store {
    /// Open (creating if needed) the store described by `config`, with
    /// random oids.
    pub fn open(config: StoreConfig) -> StoreResult<Self> {
        Self::open_with_generator(config, Arc::new(RandomOidGenerator::new()))
    }

    /// Open with a caller-supplied oid source.
    pub fn open_with_generator(config: StoreConfig, ids: Arc<dyn OidGenerator>) -> StoreResult<Self> {
        config.validate()?;
        let repos_dir = config.root.join(REPOS_DIR);
        fs::create_dir_all(&repos_dir).map_err(|e| StoreError::env("create store", &repos_dir, e))?;
        let root = config
            .root
            .canonicalize()
            .map_err(|e| StoreError::env("resolve store root", &config.root, e))?;
        let watcher = if config.watch {
            Some(Watcher::start()?)
        } else {
            None
        };

        let inner = Arc::new_cyclic(|weak| StoreInner {
            ctx: Arc::new(StoreContext {
                config,
                types: TypeRegistry::new(),
                ids,
                watcher,
                store: weak.clone(),
                next_transaction: AtomicU64::new(1),
                registering: Mutex::new(()),
            }),
            root,
            repos: Mutex::new(HashMap::new()),
        });
        let store = Self { inner };
        let loaded = store.load_types()?;
        info!(
            root = %store.inner.root.display(),
            types = loaded,
            watch = store.inner.ctx.watcher.is_some(),
            "store opened"
        );
        Ok(store)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.ctx.config
    }

    /// Canonical store root.
    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    fn repos_dir(&self) -> PathBuf {
        self.inner.root.join(REPOS_DIR)
    }

    /// A fresh, empty tuple with a generated oid.
    pub fn new_tuple(&self) -> Tuple {
        Tuple::generate(self.inner.ctx.ids.as_ref())
    }

    // ---------------------------------------------------------------
    // Repositories
    // ---------------------------------------------------------------

    pub fn create_repository(&self, name: &str) -> StoreResult<Repository> {
        validate_name(name)?;
        let mut repos = self.inner.repos.lock();
        let dir = self.repos_dir().join(name);
        match fs::create_dir(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(StoreError::RepositoryExists(name.to_string()))
            }
            Err(e) => return Err(StoreError::env("create repository", &dir, e)),
        }
        let repo = Repository::new(self.inner.ctx.clone(), name, dir);
        repos.insert(name.to_string(), repo.clone());
        info!(repository = name, "repository created");
        Ok(repo)
    }

    pub fn get_repository(&self, name: &str) -> StoreResult<Repository> {
        validate_name(name)?;
        let mut repos = self.inner.repos.lock();
        let dir = self.repos_dir().join(name);
        if !dir.is_dir() {
            if let Some(stale) = repos.remove(name) {
                stale.detach();
            }
            return Err(StoreError::RepositoryNotFound(name.to_string()));
        }
        let repo = repos
            .entry(name.to_string())
            .or_insert_with(|| Repository::new(self.inner.ctx.clone(), name, dir));
        Ok(repo.clone())
    }

    pub fn get_or_create_repository(&self, name: &str) -> StoreResult<Repository> {
        match self.get_repository(name) {
            Err(StoreError::RepositoryNotFound(_)) => match self.create_repository(name) {
                Err(StoreError::RepositoryExists(_)) => self.get_repository(name),
                other => other,
            },
            other => other,
        }
    }

    pub fn repository_exists(&self, name: &str) -> bool {
        validate_name(name).is_ok() && self.repos_dir().join(name).is_dir()
    }

    /// Delete a repository and all of its buckets. The system repository
    /// cannot be deleted.
    pub fn delete_repository(&self, name: &str) -> StoreResult<()> {
        validate_name(name)?;
        if name == self.config().system_repository {
            return Err(StoreError::IllegalName {
                name: name.to_string(),
                reason: "the system repository cannot be deleted".into(),
            });
        }
        let mut repos = self.inner.repos.lock();
        if let Some(repo) = repos.remove(name) {
            repo.detach();
        }
        let dir = self.repos_dir().join(name);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                info!(repository = name, "repository deleted");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StoreError::RepositoryNotFound(name.to_string()))
            }
            Err(e) => Err(StoreError::env("delete repository", &dir, e)),
        }
    }

    /// Names of user repositories, sorted. The system repository is omitted.
    pub fn repository_names(&self) -> StoreResult<Vec<String>> {
        let dir = self.repos_dir();
        let mut names = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|e| StoreError::env("list repositories", &dir, e))? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name != self.config().system_repository && validate_name(&name).is_ok() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Follow a reference to its tuple.
    pub fn resolve(&self, reference: &StoreReference) -> StoreResult<Arc<Tuple>> {
        reference.resolve(self)
    }

    // ---------------------------------------------------------------
    // Types
    // ---------------------------------------------------------------

    fn types_bucket(&self) -> StoreResult<Bucket> {
        self.get_or_create_repository(&self.config().system_repository)?
            .get_or_create_bucket(TYPES_BUCKET, BucketKind::Plain)
    }

    fn load_types(&self) -> StoreResult<usize> {
        let bucket = self.types_bucket()?;
        let mut loaded = 0;
        for tuple in bucket.stream()? {
            let descriptor = TypeDescriptor::from_tuple(&*tuple?)?;
            self.inner.ctx.types.insert(descriptor)?;
            loaded += 1;
        }
        Ok(loaded)
    }

    /// Register (or look up) a named type.
    ///
    /// Registering a name again with the same fields returns the existing
    /// descriptor; different fields are a [`lxp_meta::MetaError::DuplicateType`].
    pub fn register_type<I, S>(&self, name: &str, fields: I) -> StoreResult<Arc<TypeDescriptor>>
    where
        I: IntoIterator<Item = (S, ValueKind)>,
        S: Into<String>,
    {
        let _registering = self.inner.ctx.registering.lock();
        if let Some(existing) = self.inner.ctx.types.by_name(name) {
            let probe = TypeDescriptor::new(name, existing.type_id(), fields);
            return Ok(self.inner.ctx.types.insert(probe)?);
        }
        let descriptor = TypeDescriptor::new(name, self.inner.ctx.ids.next_oid(), fields);
        let mut tuple = descriptor.to_tuple()?;
        self.types_bucket()?.make_persistent(&mut tuple)?;
        let registered = self.inner.ctx.types.insert(descriptor)?;
        info!(name, type_id = %registered.type_id(), "type registered");
        Ok(registered)
    }

    /// Register the type described by a static schema.
    pub fn register_schema(&self, schema: &StaticSchema) -> StoreResult<Arc<TypeDescriptor>> {
        self.register_type(
            schema.name(),
            schema.fields().iter().map(|f| (f.label.clone(), f.kind)),
        )
    }

    pub fn type_by_name(&self, name: &str) -> Option<Arc<TypeDescriptor>> {
        self.inner.ctx.types.by_name(name)
    }

    pub fn type_by_id(&self, type_id: Oid) -> Option<Arc<TypeDescriptor>> {
        self.inner.ctx.types.by_id(type_id)
    }

    pub fn type_names(&self) -> Vec<String> {
        self.inner.ctx.types.names()
    }

    // ---------------------------------------------------------------
    // Transactions
    // ---------------------------------------------------------------

    pub fn begin_transaction(&self) -> Transaction {
        let id = self.inner.ctx.next_transaction.fetch_add(1, Ordering::Relaxed);
        Transaction::begin(TransactionId::new(id))
    }

    /// Invalidations delivered by the filesystem watcher, if running.
    pub fn watch_events(&self) -> Option<u64> {
        self.inner.ctx.watcher.as_ref().map(Watcher::dispatched)
    }
}

impl StoreInner {
    pub(crate) fn resolve_reference(self: &Arc<Self>, reference: &StoreReference) -> StoreResult<Arc<Tuple>> {
        Store { inner: self.clone() }.resolve(reference)
    }
}

impl TupleResolver for Store {
    type Error = StoreError;

    fn resolve(&self, reference: &StoreReference) -> StoreResult<Arc<Tuple>> {
        debug!(%reference, "resolving reference");
        self.get_repository(reference.repository())?
            .get_bucket(reference.bucket())?
            .get_object_by_id(reference.oid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::TRANSACTIONS_DIR;
    use crate::test_support::{open_store, tuple};
    use lxp_meta::MetaError;
    use lxp_types::{static_schema, SequentialOidGenerator};
    use std::time::{Duration, Instant};

    static_schema!(MARRIAGE = "Marriage" {
        "groom" => String,
        "bride" => String,
        "year" => Long,
    });

    fn oid(n: u64) -> Oid {
        Oid::new(n).unwrap()
    }

    #[test]
    fn repositories_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        assert!(store.repository_names().unwrap().is_empty());
        store.create_repository("b").unwrap();
        store.create_repository("a").unwrap();
        assert_eq!(store.repository_names().unwrap(), vec!["a", "b"]);
        assert!(matches!(
            store.create_repository("a"),
            Err(StoreError::RepositoryExists(_))
        ));
        assert!(store.repository_exists("a"));

        store.delete_repository("a").unwrap();
        assert!(!store.repository_exists("a"));
        assert!(matches!(
            store.get_repository("a"),
            Err(StoreError::RepositoryNotFound(_))
        ));
        assert!(store.delete_repository("__SYSTEM").is_err());
        assert!(store.get_or_create_repository("c").is_ok());
        assert!(store.get_or_create_repository("c").is_ok());
    }

    #[test]
    fn system_repository_holds_types() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        assert!(dir.path().join("REPOS/__SYSTEM/TYPES/META/DIRECTORYBACKED").is_file());
        let ty = store.register_type("P", [("x", ValueKind::Long)]).unwrap();
        assert!(dir
            .path()
            .join("REPOS/__SYSTEM/TYPES")
            .join(ty.type_id().to_string())
            .is_file());
    }

    #[test]
    fn type_registry_persists() {
        let dir = tempfile::tempdir().unwrap();
        let type_id = {
            let store = open_store(dir.path());
            store.register_schema(&MARRIAGE).unwrap().type_id()
        };
        let store = open_store(dir.path());
        let found = store.type_by_name("Marriage").unwrap();
        assert_eq!(found.type_id(), type_id);
        assert_eq!(found.kind_of("year"), Some(ValueKind::Long));
        assert_eq!(store.type_by_id(type_id).unwrap().name(), "Marriage");
        assert_eq!(store.type_names(), vec!["Marriage".to_string()]);
    }

    #[test]
    fn reregistration() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let first = store.register_type("T", [("a", ValueKind::String)]).unwrap();
        let again = store.register_type("T", [("a", ValueKind::String)]).unwrap();
        assert_eq!(first.type_id(), again.type_id());
        let err = store
            .register_type("T", [("a", ValueKind::Long)])
            .unwrap_err();
        assert!(matches!(err, StoreError::Meta(MetaError::DuplicateType(_))));
        let types = store
            .get_repository("__SYSTEM")
            .unwrap()
            .get_bucket(TYPES_BUCKET)
            .unwrap();
        assert_eq!(types.size().unwrap(), 1);
    }

    #[test]
    fn crash_recovery_discards_shadows() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = open_store(dir.path());
            let bucket = store
                .create_repository("r")
                .unwrap()
                .create_bucket("b", BucketKind::Plain)
                .unwrap();
            let mut t = tuple(1);
            t.put("v", 1i64).unwrap();
            bucket.make_persistent(&mut t).unwrap();

            let mut txn = store.begin_transaction();
            let mut next = tuple(1);
            next.put("v", 2i64).unwrap();
            bucket.update(&mut txn, &next).unwrap();
            // Simulate the process dying before commit or rollback.
            std::mem::forget(txn);
            assert!(bucket.dir().join(TRANSACTIONS_DIR).join("1").is_file());
        }

        let store = open_store(dir.path());
        let bucket = store.get_repository("r").unwrap().get_bucket("b").unwrap();
        assert!(!bucket.dir().join(TRANSACTIONS_DIR).join("1").exists());
        assert_eq!(bucket.get_object_by_id(oid(1)).unwrap().get_long("v").unwrap(), 1);

        let mut txn = store.begin_transaction();
        let mut next = tuple(1);
        next.put("v", 3i64).unwrap();
        bucket.update(&mut txn, &next).unwrap();
        txn.commit().unwrap();
        assert_eq!(bucket.get_object_by_id(oid(1)).unwrap().get_long("v").unwrap(), 3);
    }

    #[test]
    fn references_resolve_through_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let bucket = store
            .create_repository("r")
            .unwrap()
            .create_bucket("people", BucketKind::Plain)
            .unwrap();
        let mut target = tuple(4);
        target.put("name", "ann").unwrap();
        bucket.make_persistent(&mut target).unwrap();

        let mut holder = tuple(5);
        holder.put("mother", "r/people/4").unwrap();
        let reference = holder.get_reference("mother").unwrap();
        let first = reference.resolve(&store).unwrap();
        assert_eq!(first.get_string("name").unwrap(), "ann");
        assert!(reference.is_resolved());
        let second = store.resolve(&reference).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let dangling = StoreReference::parse("r/people/99").unwrap();
        assert!(store.resolve(&dangling).unwrap_err().is_not_found());
    }

    #[test]
    fn generated_tuples_use_injected_ids() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::new(dir.path()).without_watcher();
        let store =
            Store::open_with_generator(config, Arc::new(SequentialOidGenerator::starting_at(500)))
                .unwrap();
        assert_eq!(store.new_tuple().oid(), oid(500));
        assert_eq!(store.new_tuple().oid(), oid(501));
    }

    #[test]
    fn transaction_ids_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let a = store.begin_transaction();
        let b = store.begin_transaction();
        assert!(a.id() < b.id());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = StoreConfig::new(dir.path()).without_watcher();
        config.cache_capacity = 0;
        assert!(matches!(Store::open(config), Err(StoreError::Config(_))));
    }

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        cond()
    }

    #[test]
    fn watcher_invalidates_on_external_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open_with_generator(
            StoreConfig::new(dir.path()),
            Arc::new(SequentialOidGenerator::starting_at(1_000_000)),
        )
        .unwrap();
        let bucket = store
            .create_repository("r")
            .unwrap()
            .create_bucket("b", BucketKind::Plain)
            .unwrap();
        let mut t = tuple(1);
        t.put("v", 1i64).unwrap();
        bucket.make_persistent(&mut t).unwrap();
        assert_eq!(bucket.get_object_by_id(oid(1)).unwrap().get_long("v").unwrap(), 1);

        // Another process rewrites the record and adds a new one.
        std::fs::write(bucket.dir().join("1"), r#"{"v":2}"#).unwrap();
        std::fs::write(bucket.dir().join("2"), r#"{"v":7}"#).unwrap();

        assert!(wait_for(|| {
            bucket
                .get_object_by_id(oid(1))
                .map(|t| t.get_long("v").ok() == Some(2))
                .unwrap_or(false)
                && bucket.size().map(|n| n == 2).unwrap_or(false)
        }));
        assert!(store.watch_events().unwrap() > 0);
    }
}
