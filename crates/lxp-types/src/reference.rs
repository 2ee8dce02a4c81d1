//! Lazily-resolved references between stored tuples.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::{TupleError, TupleResult};
use crate::oid::Oid;
use crate::tuple::Tuple;

/// Anything that can turn a [`StoreReference`] into a live tuple.
///
/// The store implements this; tests can supply a map-backed stand-in.
pub trait TupleResolver {
    type Error;

    fn resolve(&self, reference: &StoreReference) -> Result<Arc<Tuple>, Self::Error>;
}

/// A `(repository, bucket, oid)` triple naming a tuple somewhere in a store.
///
/// The reference keeps a weak handle to the last tuple it resolved to, so
/// repeated dereferences avoid a decode while somebody else holds the tuple.
/// Once that handle dies the next [`resolve`](Self::resolve) goes back to
/// the resolver.
pub struct StoreReference {
    repository: String,
    bucket: String,
    oid: Oid,
    resolved: Mutex<Weak<Tuple>>,
}

impl StoreReference {
    pub fn new(repository: impl Into<String>, bucket: impl Into<String>, oid: Oid) -> Self {
        Self {
            repository: repository.into(),
            bucket: bucket.into(),
            oid,
            resolved: Mutex::new(Weak::new()),
        }
    }

    /// Parse the `repository/bucket/oid` form.
    pub fn parse(s: &str) -> TupleResult<Self> {
        let mut parts = s.split('/');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(repo), Some(bucket), Some(oid), None)
                if !repo.is_empty() && !bucket.is_empty() =>
            {
                let oid = oid
                    .parse::<Oid>()
                    .map_err(|_| TupleError::InvalidReference(s.to_string()))?;
                Ok(Self::new(repo, bucket, oid))
            }
            _ => Err(TupleError::InvalidReference(s.to_string())),
        }
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn oid(&self) -> Oid {
        self.oid
    }

    /// Resolve to the referenced tuple, reusing the cached handle if alive.
    pub fn resolve<R: TupleResolver + ?Sized>(&self, resolver: &R) -> Result<Arc<Tuple>, R::Error> {
        if let Some(tuple) = self.resolved.lock().upgrade() {
            return Ok(tuple);
        }
        let tuple = resolver.resolve(self)?;
        *self.resolved.lock() = Arc::downgrade(&tuple);
        Ok(tuple)
    }

    /// Whether a resolved tuple is still reachable through the cached handle.
    pub fn is_resolved(&self) -> bool {
        self.resolved.lock().strong_count() > 0
    }
}

impl Clone for StoreReference {
    fn clone(&self) -> Self {
        Self {
            repository: self.repository.clone(),
            bucket: self.bucket.clone(),
            oid: self.oid,
            resolved: Mutex::new(self.resolved.lock().clone()),
        }
    }
}

impl PartialEq for StoreReference {
    fn eq(&self, other: &Self) -> bool {
        self.oid == other.oid && self.bucket == other.bucket && self.repository == other.repository
    }
}

impl Eq for StoreReference {}

impl std::hash::Hash for StoreReference {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.repository.hash(state);
        self.bucket.hash(state);
        self.oid.hash(state);
    }
}

impl fmt::Debug for StoreReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StoreReference({self})")
    }
}

impl fmt::Display for StoreReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.repository, self.bucket, self.oid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct CountingResolver {
        calls: Cell<usize>,
    }

    impl TupleResolver for CountingResolver {
        type Error = TupleError;

        fn resolve(&self, reference: &StoreReference) -> Result<Arc<Tuple>, TupleError> {
            self.calls.set(self.calls.get() + 1);
            Ok(Arc::new(Tuple::new(reference.oid())))
        }
    }

    #[test]
    fn parse_and_display() {
        let r = StoreReference::parse("repo/bucket/77").unwrap();
        assert_eq!(r.repository(), "repo");
        assert_eq!(r.bucket(), "bucket");
        assert_eq!(r.oid().get(), 77);
        assert_eq!(r.to_string(), "repo/bucket/77");
    }

    #[test]
    fn parse_rejects_bad_forms() {
        for bad in ["", "a/b", "a/b/c", "a/b/1/2", "/b/1", "a//1", "a/b/0"] {
            assert!(StoreReference::parse(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn resolve_reuses_live_handle() {
        let resolver = CountingResolver { calls: Cell::new(0) };
        let r = StoreReference::new("r", "b", Oid::new(1).unwrap());

        let first = r.resolve(&resolver).unwrap();
        let second = r.resolve(&resolver).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(resolver.calls.get(), 1);
    }

    #[test]
    fn resolve_again_after_handle_dropped() {
        let resolver = CountingResolver { calls: Cell::new(0) };
        let r = StoreReference::new("r", "b", Oid::new(1).unwrap());

        drop(r.resolve(&resolver).unwrap());
        assert!(!r.is_resolved());
        let _again = r.resolve(&resolver).unwrap();
        assert_eq!(resolver.calls.get(), 2);
    }

    #[test]
    fn equality_ignores_resolution_state() {
        let resolver = CountingResolver { calls: Cell::new(0) };
        let a = StoreReference::new("r", "b", Oid::new(3).unwrap());
        let b = a.clone();
        let _held = a.resolve(&resolver).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, StoreReference::new("r", "other", Oid::new(3).unwrap()));
    }
}
