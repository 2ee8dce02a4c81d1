//! Shadow-file transactions.
//!
//! An update writes the new record to `TRANSACTIONS/<oid>` inside its bucket
//! without touching the primary. Creating the shadow is exclusive, so at most
//! one transaction at a time may have an update pending on a given record;
//! the loser gets [`StoreError::Conflict`] and is rolled back. Commit swaps
//! each shadow into place, rollback deletes them, and a crash leaves shadows
//! that the next open of the bucket discards.

use std::fmt;

use lxp_types::{Oid, Tuple};
use tracing::{debug, info, warn};

use crate::bucket::Bucket;
use crate::error::{StoreError, StoreResult};

/// Process-unique transaction identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(u64);

impl TransactionId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn-{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    RolledBack,
}

/// A set of pending updates, applied together by [`commit`](Self::commit).
///
/// Dropping an active transaction rolls it back.
pub struct Transaction {
    id: TransactionId,
    writes: Vec<(Bucket, Oid)>,
    state: TransactionState,
}

impl Transaction {
    pub(crate) fn begin(id: TransactionId) -> Self {
        debug!(txn = %id, "transaction started");
        Self {
            id,
            writes: Vec::new(),
            state: TransactionState::Active,
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Number of updates waiting for commit.
    pub fn pending(&self) -> usize {
        self.writes.len()
    }

    fn ensure_active(&self) -> StoreResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(StoreError::NoActiveTransaction)
        }
    }

    /// Stage `tuple` as the new content of its existing record in `bucket`.
    ///
    /// A record may have only one pending shadow, whichever transaction
    /// wrote it. A conflict rolls this whole transaction back; any later
    /// call returns [`StoreError::NoActiveTransaction`].
    pub fn update(&mut self, bucket: &Bucket, tuple: &Tuple) -> StoreResult<()> {
        self.ensure_active()?;
        let oid = tuple.oid();
        match bucket.write_shadow(tuple) {
            Ok(()) => {
                self.writes.push((bucket.clone(), oid));
                debug!(txn = %self.id, bucket = %bucket.name(), %oid, "update staged");
                Ok(())
            }
            Err(e @ StoreError::Conflict { .. }) => {
                warn!(txn = %self.id, bucket = %bucket.name(), %oid, "write conflict, rolling back");
                if let Err(cleanup) = self.abort() {
                    warn!(txn = %self.id, error = %cleanup, "rollback after conflict incomplete");
                }
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Swap every staged update into place.
    ///
    /// If a swap fails, the shadows not yet swapped are discarded and the
    /// error is returned; updates already swapped stay applied.
    pub fn commit(mut self) -> StoreResult<()> {
        self.ensure_active()?;
        self.state = TransactionState::Committed;
        let writes = std::mem::take(&mut self.writes);

        let mut failure = None;
        for (i, (bucket, oid)) in writes.iter().enumerate() {
            if let Err(e) = bucket.swizzle(*oid) {
                warn!(txn = %self.id, bucket = %bucket.name(), %oid, error = %e, "commit failed");
                for (bucket, oid) in &writes[i + 1..] {
                    if let Err(e) = bucket.discard_shadow(*oid) {
                        warn!(txn = %self.id, %oid, error = %e, "could not discard shadow");
                    }
                }
                failure = Some(e);
                break;
            }
        }

        let mut touched: Vec<&Bucket> = Vec::new();
        for (bucket, _) in &writes {
            if !touched.iter().any(|b| b.dir() == bucket.dir()) {
                touched.push(bucket);
            }
        }
        for bucket in touched {
            bucket.invalidate_cache();
        }

        match failure {
            Some(e) => Err(e),
            None => {
                info!(txn = %self.id, updates = writes.len(), "transaction committed");
                Ok(())
            }
        }
    }

    /// Discard every staged update.
    pub fn rollback(mut self) -> StoreResult<()> {
        self.ensure_active()?;
        self.abort()
    }

    fn abort(&mut self) -> StoreResult<()> {
        self.state = TransactionState::RolledBack;
        let mut first_error = None;
        for (bucket, oid) in self.writes.drain(..) {
            if let Err(e) = bucket.discard_shadow(oid) {
                warn!(txn = %self.id, %oid, error = %e, "could not discard shadow");
                first_error.get_or_insert(e);
            }
        }
        debug!(txn = %self.id, "transaction rolled back");
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.is_active() {
            debug!(txn = %self.id, pending = self.writes.len(), "dropping active transaction");
            let _ = self.abort();
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("pending", &self.writes.len())
            .finish()
    }
}
