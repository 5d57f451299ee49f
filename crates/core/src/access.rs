use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{IdentityKind, ModuleId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AccessError {
    #[error("guest module set must not be empty")]
    EmptyGuestSet,

    #[error("authenticated baseline must not be empty")]
    EmptyAuthenticatedSet,

    #[error("guest module {module} is missing from the authenticated baseline")]
    GuestOutsideBaseline { module: ModuleId },
}

/// Which modules each identity kind can reach before earning unlocks.
///
/// Guests are restricted to a fixed trial set; signing in guarantees at
/// least the authenticated baseline. Unlocks earned through play extend
/// these sets for authenticated users but never for guests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPolicy {
    guest_modules: BTreeSet<ModuleId>,
    authenticated_min: BTreeSet<ModuleId>,
}

impl Default for AccessPolicy {
    /// Guests get module 0; an account starts with modules 0 and 1.
    fn default() -> Self {
        Self {
            guest_modules: BTreeSet::from([ModuleId::new(0)]),
            authenticated_min: BTreeSet::from([ModuleId::new(0), ModuleId::new(1)]),
        }
    }
}

impl AccessPolicy {
    /// Build a policy from explicit module sets.
    ///
    /// # Errors
    ///
    /// Returns `AccessError` if either set is empty or the guest set is not
    /// contained in the authenticated baseline.
    pub fn new(
        guest_modules: BTreeSet<ModuleId>,
        authenticated_min: BTreeSet<ModuleId>,
    ) -> Result<Self, AccessError> {
        if guest_modules.is_empty() {
            return Err(AccessError::EmptyGuestSet);
        }
        if authenticated_min.is_empty() {
            return Err(AccessError::EmptyAuthenticatedSet);
        }
        if let Some(module) = guest_modules.difference(&authenticated_min).next() {
            return Err(AccessError::GuestOutsideBaseline { module: *module });
        }
        Ok(Self {
            guest_modules,
            authenticated_min,
        })
    }

    #[must_use]
    pub fn guest_modules(&self) -> &BTreeSet<ModuleId> {
        &self.guest_modules
    }

    #[must_use]
    pub fn authenticated_min(&self) -> &BTreeSet<ModuleId> {
        &self.authenticated_min
    }

    /// Returns true if a guest may enter the module at all.
    #[must_use]
    pub fn allows_guest(&self, module: ModuleId) -> bool {
        self.guest_modules.contains(&module)
    }

    /// The unlock floor for the given identity kind.
    #[must_use]
    pub fn baseline(&self, kind: IdentityKind) -> &BTreeSet<ModuleId> {
        match kind {
            IdentityKind::Guest => &self.guest_modules,
            IdentityKind::Authenticated => &self.authenticated_min,
        }
    }
}
