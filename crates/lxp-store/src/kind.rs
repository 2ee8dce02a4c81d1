use std::fmt;

use serde::{Deserialize, Serialize};

/// The variant behaviour of a bucket, recorded on disk as an empty marker
/// file in the bucket's `META` directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BucketKind {
    /// One record file per tuple, written once.
    Plain,
    /// Record files hold a reference to a tuple stored elsewhere.
    Indirect,
    /// Plain storage plus secondary indexes fed on every write.
    Indexed,
    /// Indexed bucket keyed by an integer stored under `KEY`.
    IdMap,
    /// Indexed bucket keyed by a string stored under `KEY`.
    StringMap,
}

impl BucketKind {
    pub const ALL: [BucketKind; 5] = [
        Self::Plain,
        Self::Indirect,
        Self::Indexed,
        Self::IdMap,
        Self::StringMap,
    ];

    /// Name of the marker file in `META`.
    pub fn marker(&self) -> &'static str {
        match self {
            Self::Plain => "DIRECTORYBACKED",
            Self::Indirect => "INDIRECT",
            Self::Indexed => "INDEXED",
            Self::IdMap => "IDMAP",
            Self::StringMap => "STRINGMAP",
        }
    }

    pub fn from_marker(marker: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.marker() == marker)
    }

    /// Whether writes feed secondary indexes.
    pub fn is_indexed(&self) -> bool {
        matches!(self, Self::Indexed | Self::IdMap | Self::StringMap)
    }

    pub fn is_key_map(&self) -> bool {
        matches!(self, Self::IdMap | Self::StringMap)
    }
}

impl fmt::Display for BucketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.marker())
    }
}
