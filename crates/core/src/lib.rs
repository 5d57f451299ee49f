#![forbid(unsafe_code)]

pub mod access;
pub mod catalog;
pub mod merge;
pub mod model;
pub mod resume;
pub mod scoring;
pub mod time;

pub use time::Clock;

pub use access::{AccessError, AccessPolicy};
pub use catalog::{CatalogError, ModuleCatalog, ModuleInfo};
pub use merge::{MergeOutcome, MergePolicy, MergeResolution, MergeSource, merge};
pub use resume::{ResumePlan, ResumeSource, locate};
pub use scoring::{CorrectAward, ScoringRules};
