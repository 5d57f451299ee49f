//! Shared error types for the services crate.

use thiserror::Error;

use quiz_core::model::{ModuleId, PowerUpKind};
use storage::RemoteError;

/// Errors emitted by `SessionService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error("session is still {phase}, not ready for play")]
    NotReady { phase: &'static str },
    #[error("module {module} is not in the catalog")]
    UnknownModule { module: ModuleId },
    #[error("question {question} does not exist in module {module}")]
    UnknownQuestion { module: ModuleId, question: u32 },
    #[error("module {module} is locked for this identity")]
    ModuleLocked { module: ModuleId },
    #[error("no {kind} charges left")]
    PowerUpExhausted { kind: PowerUpKind },
    #[error(transparent)]
    Remote(#[from] RemoteError),
}
