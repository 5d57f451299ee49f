mod identity;
mod ids;
mod location;
mod progress;

pub use ids::{AchievementId, ModuleId, ParseKeyError, QuestionKey, UserId};

pub use identity::{Gender, Identity, IdentityDraft, IdentityError, IdentityKind};
pub use location::LastLocation;
pub use progress::{
    AnswerRecord, ModuleCompletion, PowerUpKind, PowerUps, ProgressDraft, ProgressSnapshot,
    SnapshotError,
};
