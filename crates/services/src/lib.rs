#![forbid(unsafe_code)]

pub mod error;
pub mod identity_service;
pub mod session;
pub mod telemetry;

pub use quiz_core::Clock;

pub use error::SessionError;
pub use identity_service::IdentityService;
pub use telemetry::{LogTelemetry, NullTelemetry, Telemetry};

pub use session::{AnswerOutcome, SessionOverview, SessionPhase, SessionService, SyncHealth};
