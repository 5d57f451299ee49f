//! Bookkeeping for remote persistence: one funnel, no overlapping writes.

use serde::Serialize;

/// Health of the remote save path, for a passive shell indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncHealth {
    /// Guest session, or sync not configured: nothing is pushed anywhere.
    LocalOnly,
    /// Everything recorded so far has landed remotely.
    Synced,
    /// Progress is waiting for the next push.
    Pending,
    /// The last push failed; progress is held on the device until a retry.
    Degraded,
}

/// Claim on one remote write.
///
/// A ticket carries the generation it was issued under; completing a ticket
/// whose generation has moved on (reset, identity change) is a no-op, so a
/// stale write can never clear state it no longer describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SaveTicket {
    generation: u64,
}

/// Dirty/in-flight state for the remote save path.
///
/// Event-driven saves and autosave ticks both mark the pipeline dirty;
/// `begin` hands out at most one claim at a time and `complete` settles it,
/// re-arming the dirty flag on failure so the next tick retries.
#[derive(Debug, Default)]
pub(crate) struct SavePipeline {
    dirty: bool,
    in_flight: bool,
    generation: u64,
    degraded: bool,
    local_only: bool,
}

impl SavePipeline {
    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub(crate) fn is_local_only(&self) -> bool {
        self.local_only
    }

    /// Claim the pending write, if there is one and none is in flight.
    pub(crate) fn begin(&mut self) -> Option<SaveTicket> {
        if !self.dirty || self.in_flight || self.local_only {
            return None;
        }
        self.dirty = false;
        self.in_flight = true;
        Some(SaveTicket {
            generation: self.generation,
        })
    }

    /// Settle a claimed write. Stale tickets change nothing.
    pub(crate) fn complete(&mut self, ticket: SaveTicket, delivered: bool) {
        if ticket.generation != self.generation {
            return;
        }
        self.in_flight = false;
        self.degraded = !delivered;
        if !delivered {
            self.dirty = true;
        }
    }

    /// Record a failure that happened outside a claimed write, such as a
    /// remote load at boot.
    pub(crate) fn note_failure(&mut self) {
        if !self.local_only {
            self.degraded = true;
        }
    }

    /// Stop pushing entirely; the device copy is the system of record.
    pub(crate) fn go_local_only(&mut self) {
        self.local_only = true;
        self.dirty = false;
        self.degraded = false;
    }

    /// Invalidate outstanding claims and start a clean cycle.
    ///
    /// Whether sync is configured at all does not change between cycles, so
    /// `local_only` survives the restart.
    pub(crate) fn restart(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.dirty = false;
        self.in_flight = false;
        self.degraded = false;
    }

    pub(crate) fn health(&self) -> SyncHealth {
        if self.local_only {
            SyncHealth::LocalOnly
        } else if self.degraded {
            SyncHealth::Degraded
        } else if self.dirty || self.in_flight {
            SyncHealth::Pending
        } else {
            SyncHealth::Synced
        }
    }
}
