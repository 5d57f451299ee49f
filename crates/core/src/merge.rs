use chrono::{DateTime, Utc};

use crate::access::AccessPolicy;
use crate::model::ProgressSnapshot;

/// How to resolve the case where both a guest and a remote snapshot exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergePolicy {
    /// The account's server-side state wins; device progress is discarded.
    RemoteWins,
    /// Adopt whichever snapshot shows more play: more completed modules,
    /// then higher score, then the newer `last_updated`. Ties go remote.
    #[default]
    Richer,
}

/// Which side a reconciliation kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeSource {
    Guest,
    Remote,
}

/// What the merge decided, for callers that surface it to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Neither side had progress; a fresh snapshot was adopted.
    Fresh,
    /// Only device progress existed and was carried into the account.
    Migrated,
    /// Only the account had progress.
    LoadedExisting,
    /// Both sides had progress and `kept` was adopted.
    Reconciled { kept: MergeSource },
}

/// A merge decision: the snapshot to adopt and how it was arrived at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeResolution {
    pub adopted: ProgressSnapshot,
    pub outcome: MergeOutcome,
}

/// Reconcile device-local guest progress with account progress.
///
/// Pure: no I/O, no logging. The caller owns loading both sides, persisting
/// the adopted snapshot, and clearing consumed guest state. Whatever is
/// adopted has its unlocked set widened to the authenticated baseline, so
/// the result is always valid for an account holder.
#[must_use]
pub fn merge(
    guest: Option<&ProgressSnapshot>,
    remote: Option<&ProgressSnapshot>,
    policy: MergePolicy,
    access: &AccessPolicy,
    now: DateTime<Utc>,
) -> MergeResolution {
    let (mut adopted, outcome) = match (guest, remote) {
        (Some(guest), None) => (guest.clone(), MergeOutcome::Migrated),
        (None, Some(remote)) => (remote.clone(), MergeOutcome::LoadedExisting),
        (Some(guest), Some(remote)) => {
            let kept = match policy {
                MergePolicy::RemoteWins => MergeSource::Remote,
                MergePolicy::Richer => richer_of(guest, remote),
            };
            let snapshot = match kept {
                MergeSource::Guest => guest.clone(),
                MergeSource::Remote => remote.clone(),
            };
            (snapshot, MergeOutcome::Reconciled { kept })
        }
        (None, None) => (ProgressSnapshot::fresh(now), MergeOutcome::Fresh),
    };

    for module in access.authenticated_min() {
        adopted.unlock(*module, now);
    }

    MergeResolution { adopted, outcome }
}

fn richer_of(guest: &ProgressSnapshot, remote: &ProgressSnapshot) -> MergeSource {
    let guest_rank = (
        guest.completed_modules().len(),
        guest.score(),
        guest.last_updated(),
    );
    let remote_rank = (
        remote.completed_modules().len(),
        remote.score(),
        remote.last_updated(),
    );
    if guest_rank > remote_rank {
        MergeSource::Guest
    } else {
        MergeSource::Remote
    }
}
