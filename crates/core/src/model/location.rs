use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::ModuleId;

/// A cheap resume pointer: where the user last was, and when.
///
/// Each backend owns its own pointer; recency is decided by `ts` alone, so
/// two pointers for the same user can disagree and the newer one wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastLocation {
    pub module: ModuleId,
    pub question: u32,
    pub ts: DateTime<Utc>,
}

impl LastLocation {
    #[must_use]
    pub fn new(module: ModuleId, question: u32, ts: DateTime<Utc>) -> Self {
        Self {
            module,
            question,
            ts,
        }
    }

    /// Returns true if this pointer is strictly more recent than `other`.
    #[must_use]
    pub fn is_newer_than(&self, other: &LastLocation) -> bool {
        self.ts > other.ts
    }
}
