use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::TupleError;

/// Largest value an [`Oid`] may take (63-bit positive range).
pub const MAX_OID: u64 = i64::MAX as u64;

/// Identifier of a stored tuple.
///
/// An `Oid` is a positive integer in `1..=MAX_OID`. It names exactly one
/// record file (its decimal form is the file name) and is never reused.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct Oid(u64);

impl Oid {
    /// Wrap a raw integer, rejecting zero and values above [`MAX_OID`].
    pub fn new(raw: u64) -> Result<Self, TupleError> {
        if raw == 0 || raw > MAX_OID {
            return Err(TupleError::InvalidOid(raw.to_string()));
        }
        Ok(Self(raw))
    }

    /// The raw integer value.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Oid({})", self.0)
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Oid {
    type Err = TupleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s
            .parse::<u64>()
            .map_err(|_| TupleError::InvalidOid(s.to_string()))?;
        Self::new(raw)
    }
}

impl TryFrom<u64> for Oid {
    type Error = TupleError;

    fn try_from(raw: u64) -> Result<Self, Self::Error> {
        Self::new(raw)
    }
}

impl TryFrom<i64> for Oid {
    type Error = TupleError;

    fn try_from(raw: i64) -> Result<Self, Self::Error> {
        if raw <= 0 {
            return Err(TupleError::InvalidOid(raw.to_string()));
        }
        Self::new(raw as u64)
    }
}

impl From<Oid> for u64 {
    fn from(oid: Oid) -> Self {
        oid.0
    }
}

/// Source of fresh object ids.
///
/// Implementations must be safe to share between threads. Ids are only
/// approximately unique: a collision surfaces as an "already exists" error
/// when the record is first written.
pub trait OidGenerator: Send + Sync {
    /// Produce the next id.
    fn next_oid(&self) -> Oid;
}

/// Random id generator seeded from the operating system's entropy source.
pub struct RandomOidGenerator {
    rng: Mutex<StdRng>,
}

impl RandomOidGenerator {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }
}

impl Default for RandomOidGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl OidGenerator for RandomOidGenerator {
    fn next_oid(&self) -> Oid {
        Oid(self.rng.lock().gen_range(1..=MAX_OID))
    }
}

/// Deterministic generator handing out consecutive ids.
///
/// Useful in tests where stable file names matter.
#[derive(Debug)]
pub struct SequentialOidGenerator {
    next: AtomicU64,
}

impl SequentialOidGenerator {
    /// Start counting at `first` (clamped to 1).
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first.max(1)),
        }
    }
}

impl Default for SequentialOidGenerator {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

impl OidGenerator for SequentialOidGenerator {
    fn next_oid(&self) -> Oid {
        let raw = self.next.fetch_add(1, Ordering::Relaxed);
        // Wrap back into range rather than producing an invalid id.
        Oid(((raw - 1) % MAX_OID) + 1)
    }
}
