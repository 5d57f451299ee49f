//! Decides which identity a session runs under.

use std::sync::Arc;

use tracing::warn;

use quiz_core::Clock;
use quiz_core::model::{Identity, UserId};
use storage::IdentityStore;

/// Loads or mints the identity a session runs under.
///
/// An authenticated identity handed in by the auth collaborator is stored
/// for the next launch and wins outright. Without one, the newest stored
/// guest is reused so anonymous progress survives restarts; only if none
/// exists is a fresh guest created. Storage trouble degrades to an unsaved
/// guest: the session always proceeds, at worst without durability.
#[derive(Clone)]
pub struct IdentityService {
    clock: Clock,
    identities: Arc<dyn IdentityStore>,
}

impl IdentityService {
    #[must_use]
    pub fn new(clock: Clock, identities: Arc<dyn IdentityStore>) -> Self {
        Self { clock, identities }
    }

    /// Resolve the identity for a new session cycle.
    #[must_use]
    pub fn resolve(&self, external: Option<Identity>) -> Identity {
        if let Some(identity) = external {
            // An external identity still flagged guest carries no more
            // weight than no sign-in at all; the stored guest keeps
            // precedence so device progress stays attached to it.
            if identity.is_authenticated() {
                if !self.identities.save_identity(&identity) {
                    warn!(
                        user = identity.id().as_str(),
                        "identity not persisted; progress will not survive a reload"
                    );
                }
                return identity;
            }
        }

        if let Some(guest) = self.identities.guest_identity() {
            return guest;
        }

        let guest = Identity::new_guest(self.clock.now());
        if !self.identities.save_identity(&guest) {
            warn!(
                user = guest.id().as_str(),
                "guest identity not persisted; progress will not survive a reload"
            );
        }
        guest
    }

    /// The stored guest identity, if any.
    #[must_use]
    pub fn stored_guest(&self) -> Option<Identity> {
        self.identities.guest_identity()
    }

    /// Forget a guest identity once its progress has migrated into an
    /// account, so the same data is not migrated twice.
    pub fn clear_guest(&self, id: &UserId) -> bool {
        self.identities.clear_identity(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiz_core::model::{Gender, IdentityDraft, IdentityKind};
    use quiz_core::time::{fixed_clock, fixed_now};
    use storage::MemoryLocal;

    fn build_account(id: &str) -> Identity {
        IdentityDraft {
            id: UserId::new(id),
            kind: IdentityKind::Authenticated,
            display_name: "Amara".to_string(),
            organization: None,
            country: None,
            gender: Gender::Undisclosed,
            created_at: fixed_now(),
        }
        .validate()
        .expect("valid identity")
    }

    #[test]
    fn reuses_the_stored_guest_across_resolutions() {
        let store = Arc::new(MemoryLocal::new());
        let service = IdentityService::new(fixed_clock(), store);

        let first = service.resolve(None);
        let second = service.resolve(None);

        assert!(first.is_guest());
        assert_eq!(first.id(), second.id());
    }

    #[test]
    fn authenticated_external_identity_wins_and_is_persisted() {
        let store = Arc::new(MemoryLocal::new());
        let service = IdentityService::new(fixed_clock(), Arc::clone(&store) as _);

        let resolved = service.resolve(Some(build_account("acct-1")));

        assert!(resolved.is_authenticated());
        assert_eq!(
            store.load_identity(&UserId::new("acct-1")).map(|i| i.id().clone()),
            Some(UserId::new("acct-1"))
        );
    }

    #[test]
    fn storage_failure_still_yields_a_guest() {
        struct Broken;
        impl IdentityStore for Broken {
            fn save_identity(&self, _identity: &Identity) -> bool {
                false
            }
            fn load_identity(&self, _id: &UserId) -> Option<Identity> {
                None
            }
            fn guest_identity(&self) -> Option<Identity> {
                None
            }
            fn clear_identity(&self, _id: &UserId) -> bool {
                false
            }
        }

        let service = IdentityService::new(fixed_clock(), Arc::new(Broken));
        let resolved = service.resolve(None);
        assert!(resolved.is_guest());
    }
}
