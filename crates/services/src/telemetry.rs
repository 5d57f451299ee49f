//! Fire-and-forget gameplay analytics.
//!
//! The orchestrator reports lifecycle milestones through this seam. Sinks
//! must never block and never fail the caller; losing an event is always
//! preferable to stalling play.

use serde_json::Value;

// ─── EVENT NAMES ───────────────────────────────────────────────────────────────

pub const SESSION_STARTED: &str = "session_started";
pub const MODULE_STARTED: &str = "module_started";
pub const MODULE_COMPLETED: &str = "module_completed";
pub const PROGRESS_MERGED: &str = "progress_merged";
pub const MIGRATION_FAILED: &str = "migration_failed";
pub const ACCESS_DENIED: &str = "access_denied";
pub const RESUME_APPLIED: &str = "resume_applied";
pub const RESUME_MISSING: &str = "resume_missing";
pub const PROGRESS_RESET: &str = "progress_reset";

/// Sink for gameplay events.
pub trait Telemetry: Send + Sync {
    /// Report one event with its payload.
    fn track(&self, event: &str, payload: Value);
}

/// Emits every event through `tracing` at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTelemetry;

impl Telemetry for LogTelemetry {
    fn track(&self, event: &str, payload: Value) {
        tracing::debug!(target: "telemetry", event, %payload);
    }
}

/// Swallows every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTelemetry;

impl Telemetry for NullTelemetry {
    fn track(&self, _event: &str, _payload: Value) {}
}
