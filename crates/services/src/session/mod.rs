mod saves;
mod service;
mod shuffle;

// Public API of the session subsystem.
pub use crate::error::SessionError;
pub use saves::SyncHealth;
pub use service::{AnswerOutcome, SessionOverview, SessionPhase, SessionService};
