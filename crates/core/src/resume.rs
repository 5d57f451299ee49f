use std::collections::BTreeSet;

use crate::catalog::ModuleCatalog;
use crate::model::{IdentityKind, LastLocation, ModuleId, ProgressSnapshot};

/// Where a resume target came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeSource {
    /// The account's server-side location pointer.
    Remote,
    /// The device-local location pointer.
    Local,
    /// No pointer existed; the snapshot's own position was used.
    Snapshot,
    /// Nothing to resume from; the session starts at the beginning.
    Default,
}

/// A computed resume target. Applying it is the caller's job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumePlan {
    pub module: ModuleId,
    pub question: u32,
    /// For authenticated users whose pointer lands on a locked module: the
    /// pointer is trusted, and every module up to this one should unlock.
    pub unlock_through: Option<ModuleId>,
    pub source: ResumeSource,
}

impl ResumePlan {
    /// The degenerate plan: module 0, question 0, nothing to widen.
    #[must_use]
    pub fn start_of_catalog() -> Self {
        Self {
            module: ModuleId::new(0),
            question: 0,
            unlock_through: None,
            source: ResumeSource::Default,
        }
    }
}

/// Decide where a session should resume.
///
/// Candidates in order: the newer of the remote and local location pointers
/// (guests only consult local; a timestamp tie goes remote), then the
/// snapshot's own position, then the start of the catalog. The winning
/// pointer is clamped into catalog bounds. A pointer into locked territory
/// is trusted for authenticated users (the plan asks for unlocks to widen)
/// but dropped for guests, who fall back to their highest unlocked module.
///
/// Total: any combination of inputs, including an empty catalog and
/// arbitrarily corrupt pointers, produces a plan without panicking.
#[must_use]
pub fn locate(
    kind: IdentityKind,
    snapshot: Option<&ProgressSnapshot>,
    local: Option<&LastLocation>,
    remote: Option<&LastLocation>,
    catalog: &ModuleCatalog,
) -> ResumePlan {
    let Some(last_module) = catalog.last_module() else {
        return ResumePlan::start_of_catalog();
    };

    let pointer = match kind {
        IdentityKind::Guest => local.map(|loc| (loc, ResumeSource::Local)),
        IdentityKind::Authenticated => newest_pointer(local, remote),
    };

    let (module, question, source) = match pointer {
        Some((loc, source)) => (loc.module, loc.question, source),
        None => match snapshot {
            Some(snapshot) => (
                snapshot.current_module(),
                snapshot.current_question(),
                ResumeSource::Snapshot,
            ),
            None => return ResumePlan::start_of_catalog(),
        },
    };

    let module = ModuleId::new(module.value().min(last_module.value()));

    let default_unlocked = BTreeSet::from([ModuleId::new(0)]);
    let unlocked = snapshot.map_or(&default_unlocked, ProgressSnapshot::unlocked_modules);

    let (module, question, unlock_through) = if unlocked.contains(&module) {
        (module, question, None)
    } else {
        match kind {
            IdentityKind::Authenticated => (module, question, Some(module)),
            IdentityKind::Guest => {
                // pointer into locked territory: land on the best module the
                // guest actually has, at its first question
                let fallback = unlocked
                    .iter()
                    .rev()
                    .copied()
                    .find(|module| catalog.contains(*module))
                    .unwrap_or(ModuleId::new(0));
                (fallback, 0, None)
            }
        }
    };

    let question = match catalog.question_count(module) {
        Some(count) if count > 0 => question.min(count - 1),
        _ => 0,
    };

    ResumePlan {
        module,
        question,
        unlock_through,
        source,
    }
}

fn newest_pointer<'a>(
    local: Option<&'a LastLocation>,
    remote: Option<&'a LastLocation>,
) -> Option<(&'a LastLocation, ResumeSource)> {
    match (local, remote) {
        (Some(local), Some(remote)) => {
            if local.is_newer_than(remote) {
                Some((local, ResumeSource::Local))
            } else {
                Some((remote, ResumeSource::Remote))
            }
        }
        (Some(local), None) => Some((local, ResumeSource::Local)),
        (None, Some(remote)) => Some((remote, ResumeSource::Remote)),
        (None, None) => None,
    }
}
