use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The transformation programs a pipeline may be built from.
///
/// Each variant corresponds to an executable of the same name inside the
/// filter directory handed to `sdstored` at startup. Filters read bytes
/// from stdin and write bytes to stdout; the daemon never interprets the
/// data flowing through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterKind {
    Nop,
    Bcompress,
    Bdecompress,
    Gcompress,
    Gdecompress,
    Encrypt,
    Decrypt,
}

impl FilterKind {
    /// Every kind, in catalogue order. Status output lists kinds in this
    /// order, and it is the canonical index space for per-kind tables.
    pub const ALL: [FilterKind; 7] = [
        FilterKind::Nop,
        FilterKind::Bcompress,
        FilterKind::Bdecompress,
        FilterKind::Gcompress,
        FilterKind::Gdecompress,
        FilterKind::Encrypt,
        FilterKind::Decrypt,
    ];

    pub const COUNT: usize = Self::ALL.len();

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            FilterKind::Nop => "nop",
            FilterKind::Bcompress => "bcompress",
            FilterKind::Bdecompress => "bdecompress",
            FilterKind::Gcompress => "gcompress",
            FilterKind::Gdecompress => "gdecompress",
            FilterKind::Encrypt => "encrypt",
            FilterKind::Decrypt => "decrypt",
        }
    }
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error for a filter name that is not one of the seven known kinds.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown filter `{0}`")]
pub struct UnknownFilter(pub String);

impl FromStr for FilterKind {
    type Err = UnknownFilter;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "nop" => Ok(FilterKind::Nop),
            "bcompress" => Ok(FilterKind::Bcompress),
            "bdecompress" => Ok(FilterKind::Bdecompress),
            "gcompress" => Ok(FilterKind::Gcompress),
            "gdecompress" => Ok(FilterKind::Gdecompress),
            "encrypt" => Ok(FilterKind::Encrypt),
            "decrypt" => Ok(FilterKind::Decrypt),
            other => Err(UnknownFilter(other.to_string())),
        }
    }
}

/// Per-kind occurrence counts of a pipeline: the concurrency cost of
/// admitting it. A job's demand is reserved from the ledger in full or not
/// at all.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotDemand([u32; FilterKind::COUNT]);

impl SlotDemand {
    pub fn from_pipeline(pipeline: &[FilterKind]) -> Self {
        let mut counts = [0u32; FilterKind::COUNT];
        for kind in pipeline {
            counts[kind.index()] += 1;
        }
        Self(counts)
    }

    pub fn count(&self, kind: FilterKind) -> u32 {
        self.0[kind.index()]
    }

    /// Kinds this demand occupies at least one slot of.
    pub fn kinds(&self) -> impl Iterator<Item = FilterKind> + '_ {
        FilterKind::ALL.into_iter().filter(|kind| self.count(*kind) > 0)
    }

    pub fn is_disjoint(&self, blocked: &HashSet<FilterKind>) -> bool {
        self.kinds().all(|kind| !blocked.contains(&kind))
    }
}
