use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use quiz_core::model::{
    AnswerRecord, Identity, LastLocation, ModuleCompletion, ModuleId, PowerUpKind, PowerUps,
    ProgressSnapshot, QuestionKey,
};
use quiz_core::{
    AccessPolicy, Clock, CorrectAward, MergeOutcome, MergePolicy, MergeSource, ModuleCatalog,
    ResumePlan, ResumeSource, ScoringRules, locate, merge,
};
use storage::{RemoteError, SyncEvent, SyncStores};

use crate::error::SessionError;
use crate::identity_service::IdentityService;
use crate::telemetry::{self, Telemetry};

use super::saves::{SavePipeline, SyncHealth};
use super::shuffle;

// ─── PHASE ─────────────────────────────────────────────────────────────────────

/// Where the session is in its lifecycle.
///
/// Play is only possible in `Ready`; every other phase belongs to a boot,
/// sign-in, or reset cycle in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Booting,
    ResolvingIdentity,
    LoadingProgress,
    Migrating,
    Resuming,
    Resetting,
    Ready,
}

impl SessionPhase {
    /// Stable lowercase name, used in errors and logs.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            SessionPhase::Booting => "booting",
            SessionPhase::ResolvingIdentity => "resolving-identity",
            SessionPhase::LoadingProgress => "loading-progress",
            SessionPhase::Migrating => "migrating",
            SessionPhase::Resuming => "resuming",
            SessionPhase::Resetting => "resetting",
            SessionPhase::Ready => "ready",
        }
    }
}

// ─── VIEWS ─────────────────────────────────────────────────────────────────────

/// What answering one question changed.
///
/// `module`/`question` give the position after the move, which is where the
/// shell should render next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnswerOutcome {
    pub correct: bool,
    pub award: Option<CorrectAward>,
    pub completion: Option<ModuleCompletion>,
    pub module: ModuleId,
    pub question: u32,
}

/// One-struct status view of the live session, for shells and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionOverview {
    pub user: String,
    pub guest: bool,
    pub phase: &'static str,
    pub module: u32,
    pub question: u32,
    pub score: u32,
    pub level: u32,
    pub xp: u32,
    pub streak: u32,
    pub combo: u32,
    pub completed_modules: usize,
    pub answered_in_module: usize,
    pub power_ups: PowerUps,
    pub sync: SyncHealth,
}

// ─── SERVICE ───────────────────────────────────────────────────────────────────

struct AccountBoot {
    snapshot: ProgressSnapshot,
    plan: ResumePlan,
    consumed_guest: Option<Identity>,
    remote_healthy: bool,
}

/// The session orchestrator: single owner of the live progress snapshot.
///
/// Coordinates identity resolution, snapshot loading and merging, resume
/// placement, and persistence. Local writes happen on every change and
/// never fail the caller; remote writes funnel through the save pipeline
/// and degrade to device-only operation when the backend is down.
pub struct SessionService {
    stores: SyncStores,
    resolver: IdentityService,
    catalog: ModuleCatalog,
    policy: AccessPolicy,
    rules: ScoringRules,
    merge_policy: MergePolicy,
    clock: Clock,
    telemetry: Arc<dyn Telemetry>,
    phase: SessionPhase,
    identity: Option<Identity>,
    snapshot: Option<ProgressSnapshot>,
    resume_target: Option<ResumePlan>,
    resume_attempted: bool,
    last_merge: Option<MergeOutcome>,
    saves: SavePipeline,
}

impl fmt::Debug for SessionService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionService")
            .field("phase", &self.phase)
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

impl SessionService {
    #[must_use]
    pub fn new(
        stores: SyncStores,
        catalog: ModuleCatalog,
        clock: Clock,
        telemetry: Arc<dyn Telemetry>,
    ) -> Self {
        let resolver = IdentityService::new(clock, Arc::clone(&stores.identities));
        Self {
            stores,
            resolver,
            catalog,
            policy: AccessPolicy::default(),
            rules: ScoringRules::default(),
            merge_policy: MergePolicy::default(),
            clock,
            telemetry,
            phase: SessionPhase::Booting,
            identity: None,
            snapshot: None,
            resume_target: None,
            resume_attempted: false,
            last_merge: None,
            saves: SavePipeline::default(),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: AccessPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_rules(mut self, rules: ScoringRules) -> Self {
        self.rules = rules;
        self
    }

    #[must_use]
    pub fn with_merge_policy(mut self, merge_policy: MergePolicy) -> Self {
        self.merge_policy = merge_policy;
        self
    }

    // ─── READ-ONLY STATE ───────────────────────────────────────────────────────

    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// True until the current boot/sign-in/reset cycle reaches `Ready`.
    ///
    /// Shells suppress interactive content while this holds, so the player
    /// never acts on a position the resume step is about to move.
    #[must_use]
    pub fn is_booting(&self) -> bool {
        self.phase != SessionPhase::Ready
    }

    #[must_use]
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    #[must_use]
    pub fn progress(&self) -> Option<&ProgressSnapshot> {
        self.snapshot.as_ref()
    }

    /// Where the last cycle decided to resume.
    #[must_use]
    pub fn resume_target(&self) -> Option<ResumePlan> {
        self.resume_target
    }

    /// How the last authenticated cycle reconciled device and account data.
    #[must_use]
    pub fn last_merge_outcome(&self) -> Option<MergeOutcome> {
        self.last_merge
    }

    #[must_use]
    pub fn sync_health(&self) -> SyncHealth {
        if self.is_authenticated() {
            self.saves.health()
        } else {
            SyncHealth::LocalOnly
        }
    }

    /// Status view for shells; `None` before the first boot completes.
    #[must_use]
    pub fn overview(&self) -> Option<SessionOverview> {
        let identity = self.identity.as_ref()?;
        let snapshot = self.snapshot.as_ref()?;
        Some(SessionOverview {
            user: identity.id().as_str().to_string(),
            guest: identity.is_guest(),
            phase: self.phase.name(),
            module: snapshot.current_module().value(),
            question: snapshot.current_question(),
            score: snapshot.score(),
            level: snapshot.level(),
            xp: snapshot.xp(),
            streak: snapshot.streak(),
            combo: snapshot.combo(),
            completed_modules: snapshot.completed_modules().len(),
            answered_in_module: snapshot.answered_in(snapshot.current_module()),
            power_ups: *snapshot.power_ups(),
            sync: self.sync_health(),
        })
    }

    // ─── LIFECYCLE ─────────────────────────────────────────────────────────────

    /// Boot a session: resolve the identity, load and reconcile progress,
    /// and position the player.
    ///
    /// Infallible by design. Every failure path degrades instead of
    /// blocking play: a broken identity store yields an ephemeral guest, an
    /// unreachable remote leaves the session device-only, and corrupt
    /// snapshots fall back to a fresh one.
    pub async fn boot(&mut self, external: Option<Identity>) -> ResumePlan {
        self.run_cycle(external).await
    }

    /// Migrate the running session onto an authenticated identity.
    pub async fn sign_in(&mut self, identity: Identity) -> ResumePlan {
        self.flush().await;
        self.run_cycle(Some(identity)).await
    }

    /// Push anything still pending, then drop back to a guest session.
    pub async fn sign_out(&mut self) -> ResumePlan {
        self.flush().await;
        self.run_cycle(None).await
    }

    async fn run_cycle(&mut self, external: Option<Identity>) -> ResumePlan {
        self.saves.restart();
        self.resume_attempted = false;
        self.resume_target = None;
        self.last_merge = None;
        self.snapshot = None;

        self.phase = SessionPhase::ResolvingIdentity;
        let identity = self.resolver.resolve(external);
        self.identity = Some(identity.clone());
        let now = self.clock.now();

        let (snapshot, plan, consumed_guest, remote_healthy) = if identity.is_authenticated() {
            let boot = self.load_account(&identity, now).await;
            (
                boot.snapshot,
                boot.plan,
                boot.consumed_guest,
                boot.remote_healthy,
            )
        } else {
            let (snapshot, plan) = self.load_guest(&identity, now);
            (snapshot, plan, None, false)
        };

        self.snapshot = Some(snapshot);
        self.resume_target = Some(plan);
        self.phase = SessionPhase::Ready;

        // Account boots push the adopted state up; consumed guest data is
        // only cleared once that push lands, so an offline login leaves the
        // device copy intact for the next attempt.
        if remote_healthy {
            self.saves.mark_dirty();
            let delivered = self.flush().await;
            if let Some(guest) = consumed_guest {
                if delivered {
                    self.stores.progress.clear_snapshot(guest.id());
                    self.stores.progress.clear_last_location(guest.id());
                    self.resolver.clear_guest(guest.id());
                    self.audit(&identity, "migration", None, None, Some("completed".into()))
                        .await;
                } else {
                    warn!(
                        guest = guest.id().as_str(),
                        "guest progress kept on the device: the account push has not landed"
                    );
                    self.telemetry.track(
                        telemetry::MIGRATION_FAILED,
                        json!({
                            "user": identity.id().as_str(),
                            "guest": guest.id().as_str(),
                        }),
                    );
                }
            }
        } else if consumed_guest.is_some() {
            self.telemetry.track(
                telemetry::MIGRATION_FAILED,
                json!({ "user": identity.id().as_str() }),
            );
        }

        self.telemetry.track(
            telemetry::SESSION_STARTED,
            json!({
                "user": identity.id().as_str(),
                "kind": if identity.is_guest() { "guest" } else { "authenticated" },
            }),
        );
        self.track_resume(plan);
        self.audit(
            &identity,
            "resume",
            Some(plan.module.value()),
            Some(plan.question),
            Some(source_name(plan.source).into()),
        )
        .await;
        plan
    }

    async fn load_account(&mut self, identity: &Identity, now: DateTime<Utc>) -> AccountBoot {
        self.phase = SessionPhase::LoadingProgress;

        // Device progress under the account id wins; otherwise unmigrated
        // guest progress is picked up for migration.
        let mut consumed_guest = None;
        let local = match self.stores.progress.load_snapshot(identity.id()) {
            Some(snapshot) => Some(snapshot),
            None => {
                let guest_load = self.resolver.stored_guest().and_then(|guest| {
                    self.stores
                        .progress
                        .load_snapshot(guest.id())
                        .map(|snapshot| (guest, snapshot))
                });
                guest_load.map(|(guest, snapshot)| {
                    consumed_guest = Some(guest);
                    snapshot
                })
            }
        };

        let (remote, remote_healthy) = match self.stores.remote.load_snapshot(identity.id()).await {
            Ok(found) => (found, true),
            Err(RemoteError::Misconfigured) => {
                debug!("remote sync not configured; running device-only");
                self.saves.go_local_only();
                (None, false)
            }
            Err(err) => {
                warn!(
                    user = identity.id().as_str(),
                    %err,
                    "remote progress unavailable; continuing with device data"
                );
                self.saves.note_failure();
                (None, false)
            }
        };

        self.phase = SessionPhase::Migrating;
        let resolution = merge(
            local.as_ref(),
            remote.as_ref(),
            self.merge_policy,
            &self.policy,
            now,
        );
        if let MergeOutcome::Reconciled { kept } = resolution.outcome {
            info!(
                kept = kept_name(kept),
                device = %summarize(local.as_ref()),
                account = %summarize(remote.as_ref()),
                "both sides had progress; adopted one"
            );
        }
        self.last_merge = Some(resolution.outcome);
        self.telemetry.track(
            telemetry::PROGRESS_MERGED,
            json!({
                "user": identity.id().as_str(),
                "outcome": outcome_name(resolution.outcome),
            }),
        );
        self.audit(
            identity,
            "login",
            None,
            None,
            Some(outcome_name(resolution.outcome).into()),
        )
        .await;

        let mut snapshot = resolution.adopted;

        self.phase = SessionPhase::Resuming;
        let pointer_owner = consumed_guest.as_ref().map_or(identity.id(), Identity::id);
        let local_pointer = self.stores.progress.last_location(pointer_owner);
        let remote_pointer = if remote_healthy {
            match self.stores.remote.last_location(identity.id()).await {
                Ok(pointer) => pointer,
                Err(err) => {
                    debug!(
                        user = identity.id().as_str(),
                        %err,
                        "remote resume pointer unavailable"
                    );
                    None
                }
            }
        } else {
            None
        };

        let plan = locate(
            identity.kind(),
            Some(&snapshot),
            local_pointer.as_ref(),
            remote_pointer.as_ref(),
            &self.catalog,
        );
        self.apply_resume(identity, &mut snapshot, plan, now);

        AccountBoot {
            snapshot,
            plan,
            consumed_guest,
            remote_healthy,
        }
    }

    fn load_guest(
        &mut self,
        identity: &Identity,
        now: DateTime<Utc>,
    ) -> (ProgressSnapshot, ResumePlan) {
        self.phase = SessionPhase::LoadingProgress;
        let mut snapshot = self
            .stores
            .progress
            .load_snapshot(identity.id())
            .unwrap_or_else(|| ProgressSnapshot::fresh(now));
        snapshot.restrict_to_guest(&self.policy, now);

        self.phase = SessionPhase::Resuming;
        let local_pointer = self.stores.progress.last_location(identity.id());
        let plan = locate(
            identity.kind(),
            Some(&snapshot),
            local_pointer.as_ref(),
            None,
            &self.catalog,
        );
        self.apply_resume(identity, &mut snapshot, plan, now);
        (snapshot, plan)
    }

    /// Move the snapshot to the planned position, at most once per cycle.
    fn apply_resume(
        &mut self,
        identity: &Identity,
        snapshot: &mut ProgressSnapshot,
        plan: ResumePlan,
        now: DateTime<Utc>,
    ) {
        if self.resume_attempted {
            return;
        }
        self.resume_attempted = true;
        if identity.is_authenticated() {
            if let Some(through) = plan.unlock_through {
                snapshot.unlock_through(through, now);
            }
        }
        snapshot.set_position(plan.module, plan.question, now);
        self.persist_local(identity, snapshot);
    }

    /// Wipe progress everywhere and start the current identity fresh.
    ///
    /// The remote copy goes first: if that wipe fails the reset is
    /// abandoned with the session untouched, so state never diverges into
    /// cleared-here-but-alive-there.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Remote` when the account's remote wipe fails,
    /// and `SessionError::NotReady` outside the ready phase.
    pub async fn reset(&mut self) -> Result<(), SessionError> {
        self.guard_ready()?;
        let Some(identity) = self.identity.clone() else {
            return Err(SessionError::NotReady {
                phase: SessionPhase::Booting.name(),
            });
        };

        self.phase = SessionPhase::Resetting;
        if identity.is_authenticated() && !self.saves.is_local_only() {
            if let Err(err) = self.stores.remote.clear_snapshot(identity.id()).await {
                self.phase = SessionPhase::Ready;
                return Err(SessionError::Remote(err));
            }
        }

        self.stores.progress.clear_snapshot(identity.id());
        self.stores.progress.clear_last_location(identity.id());

        let now = self.clock.now();
        let mut snapshot = ProgressSnapshot::fresh(now);
        if identity.is_guest() {
            snapshot.restrict_to_guest(&self.policy, now);
        } else {
            for module in self.policy.authenticated_min() {
                snapshot.unlock(*module, now);
            }
        }

        // Stale in-flight saves must not resurrect the cleared data.
        self.saves.restart();
        self.persist_local(&identity, &snapshot);
        self.snapshot = Some(snapshot);
        self.resume_target = Some(ResumePlan::start_of_catalog());
        self.last_merge = None;
        self.phase = SessionPhase::Ready;

        self.telemetry.track(
            telemetry::PROGRESS_RESET,
            json!({ "user": identity.id().as_str() }),
        );
        self.audit(&identity, "reset", None, None, None).await;
        Ok(())
    }

    // ─── PLAY ──────────────────────────────────────────────────────────────────

    /// Begin a fresh attempt at a module: clears its previous answers,
    /// deals a new question order, and tops up power-up charges.
    ///
    /// # Errors
    ///
    /// `UnknownModule` for out-of-catalog modules and `ModuleLocked` when
    /// the module is outside this identity's reach; a guest denial is also
    /// reported to telemetry so the shell can raise its sign-in prompt.
    pub async fn start_module(&mut self, module: ModuleId) -> Result<(), SessionError> {
        self.guard_ready()?;
        let Some(question_count) = self.catalog.question_count(module) else {
            return Err(SessionError::UnknownModule { module });
        };
        let now = self.clock.now();
        if !self.is_authenticated() && !self.policy.allows_guest(module) {
            self.telemetry.track(
                telemetry::ACCESS_DENIED,
                json!({ "module": module.value() }),
            );
            return Err(SessionError::ModuleLocked { module });
        }
        {
            let Some(snapshot) = self.snapshot.as_mut() else {
                return Err(SessionError::NotReady {
                    phase: SessionPhase::Booting.name(),
                });
            };
            if !snapshot.is_unlocked(module) {
                return Err(SessionError::ModuleLocked { module });
            }
            let order = shuffle::deal_order(question_count);
            snapshot.begin_module_attempt(module, order, &PowerUps::default(), now);
        }

        self.telemetry.track(
            telemetry::MODULE_STARTED,
            json!({ "module": module.value() }),
        );
        if let (Some(identity), Some(snapshot)) = (self.identity.as_ref(), self.snapshot.as_ref())
        {
            self.persist_local(identity, snapshot);
        }
        self.schedule_save().await;
        Ok(())
    }

    /// Record the player's answer to a question and advance.
    ///
    /// `module`/`question` name the question actually shown; correctness is
    /// judged by the content layer, which owns the answer key. Re-answering
    /// a question already recorded in this attempt changes nothing but
    /// still advances, so a stale shell can never wedge the session.
    ///
    /// # Errors
    ///
    /// `NotReady` outside the ready phase, `UnknownModule`/`UnknownQuestion`
    /// for out-of-catalog coordinates, `ModuleLocked` when the module is
    /// not unlocked for this identity.
    pub async fn submit_answer(
        &mut self,
        module: ModuleId,
        question: u32,
        selected: u32,
        correct: bool,
    ) -> Result<AnswerOutcome, SessionError> {
        self.guard_ready()?;
        let record = if correct {
            AnswerRecord::correct(selected)
        } else {
            AnswerRecord::incorrect(selected)
        };
        let outcome = self.answer_at(module, question, record)?;
        self.schedule_save().await;
        Ok(outcome)
    }

    /// Spend a skip charge on the current question.
    ///
    /// The question is recorded as answered-but-skipped, which breaks the
    /// streak and rules out a perfect module, and the session advances.
    ///
    /// # Errors
    ///
    /// `PowerUpExhausted` when no skip charges remain; otherwise as
    /// `submit_answer`.
    pub async fn skip_question(&mut self) -> Result<AnswerOutcome, SessionError> {
        self.guard_ready()?;
        let now = self.clock.now();
        let (module, question) = {
            let Some(snapshot) = self.snapshot.as_mut() else {
                return Err(SessionError::NotReady {
                    phase: SessionPhase::Booting.name(),
                });
            };
            if !snapshot.use_power_up(PowerUpKind::Skip, now) {
                return Err(SessionError::PowerUpExhausted {
                    kind: PowerUpKind::Skip,
                });
            }
            (snapshot.current_module(), snapshot.current_question())
        };
        let outcome = self.answer_at(module, question, AnswerRecord::skipped())?;
        self.schedule_save().await;
        Ok(outcome)
    }

    /// Spend a hint charge; the content layer renders the hint itself.
    ///
    /// Returns the charges remaining.
    ///
    /// # Errors
    ///
    /// `PowerUpExhausted` when no hint charges remain.
    pub async fn use_hint(&mut self) -> Result<u32, SessionError> {
        self.spend_power_up(PowerUpKind::Hint).await
    }

    /// Spend an eliminate charge (the shell removes wrong options).
    ///
    /// Returns the charges remaining.
    ///
    /// # Errors
    ///
    /// `PowerUpExhausted` when no eliminate charges remain.
    pub async fn use_eliminate(&mut self) -> Result<u32, SessionError> {
        self.spend_power_up(PowerUpKind::Eliminate).await
    }

    // ─── PERSISTENCE ───────────────────────────────────────────────────────────

    /// Periodic safety net: pushes whatever the event-driven saves left
    /// behind. Only authenticated sessions with at least one recorded
    /// answer push; driving the interval belongs to the shell.
    pub async fn autosave_tick(&mut self) {
        if self.phase != SessionPhase::Ready || !self.is_authenticated() {
            return;
        }
        if !self
            .snapshot
            .as_ref()
            .is_some_and(ProgressSnapshot::has_answers)
        {
            return;
        }
        self.flush().await;
    }

    /// Push progress now, surfacing the failure to the caller.
    ///
    /// Guest sessions and unconfigured sync return `Ok` untouched.
    ///
    /// # Errors
    ///
    /// `SessionError::Remote` when the push fails.
    pub async fn sync_now(&mut self) -> Result<(), SessionError> {
        self.guard_ready()?;
        if !self.is_authenticated() || self.saves.is_local_only() {
            return Ok(());
        }
        self.saves.mark_dirty();
        let Some(ticket) = self.saves.begin() else {
            return Ok(());
        };
        match self.push_remote().await {
            Ok(()) => {
                self.saves.complete(ticket, true);
                Ok(())
            }
            Err(RemoteError::Misconfigured) => {
                self.saves.complete(ticket, true);
                self.saves.go_local_only();
                Ok(())
            }
            Err(err) => {
                self.saves.complete(ticket, false);
                Err(SessionError::Remote(err))
            }
        }
    }

    // ─── INTERNALS ─────────────────────────────────────────────────────────────

    fn guard_ready(&self) -> Result<(), SessionError> {
        if self.phase == SessionPhase::Ready {
            Ok(())
        } else {
            Err(SessionError::NotReady {
                phase: self.phase.name(),
            })
        }
    }

    fn is_authenticated(&self) -> bool {
        self.identity
            .as_ref()
            .is_some_and(Identity::is_authenticated)
    }

    fn answer_at(
        &mut self,
        module: ModuleId,
        question: u32,
        record: AnswerRecord,
    ) -> Result<AnswerOutcome, SessionError> {
        let Some(question_count) = self.catalog.question_count(module) else {
            return Err(SessionError::UnknownModule { module });
        };
        if question >= question_count {
            return Err(SessionError::UnknownQuestion { module, question });
        }
        let now = self.clock.now();
        let is_guest = !self.is_authenticated();
        let correct = record.was_correct;

        let mut denied_module = None;
        let (award, completion, target_module, target_question) = {
            let Some(snapshot) = self.snapshot.as_mut() else {
                return Err(SessionError::NotReady {
                    phase: SessionPhase::Booting.name(),
                });
            };
            if !snapshot.is_unlocked(module) {
                return Err(SessionError::ModuleLocked { module });
            }

            let first_attempt =
                snapshot.record_answer(QuestionKey::new(module, question), record, now);
            let award = if !first_attempt {
                None
            } else if correct {
                Some(snapshot.apply_correct(&self.rules, now))
            } else {
                snapshot.apply_incorrect(now);
                None
            };

            let completion = if snapshot.answered_in(module) == question_count as usize {
                let next_module = module.next();
                let next_unlock = if !self.catalog.contains(next_module) {
                    None
                } else if is_guest && !self.policy.allows_guest(next_module) {
                    denied_module = Some(next_module);
                    None
                } else {
                    Some(next_module)
                };
                Some(snapshot.complete_module(module, question_count, next_unlock, now))
            } else {
                None
            };

            let (target_module, target_question) = if completion.is_some() {
                let next_module = module.next();
                if self.catalog.contains(next_module) && snapshot.is_unlocked(next_module) {
                    (next_module, 0)
                } else {
                    (snapshot.highest_unlocked().unwrap_or(ModuleId::new(0)), 0)
                }
            } else {
                (module, question.saturating_add(1).min(question_count - 1))
            };
            snapshot.set_position(target_module, target_question, now);

            (award, completion, target_module, target_question)
        };

        if let Some(denied) = denied_module {
            self.telemetry.track(
                telemetry::ACCESS_DENIED,
                json!({ "module": denied.value() }),
            );
        }
        if let Some(done) = completion {
            self.telemetry.track(
                telemetry::MODULE_COMPLETED,
                json!({
                    "module": module.value(),
                    "perfect": done.perfect,
                    "unlocked": done.newly_unlocked.map(|m| m.value()),
                }),
            );
        }
        if let (Some(identity), Some(snapshot)) = (self.identity.as_ref(), self.snapshot.as_ref())
        {
            self.persist_local(identity, snapshot);
        }

        Ok(AnswerOutcome {
            correct,
            award,
            completion,
            module: target_module,
            question: target_question,
        })
    }

    async fn spend_power_up(&mut self, kind: PowerUpKind) -> Result<u32, SessionError> {
        self.guard_ready()?;
        let now = self.clock.now();
        let remaining = {
            let Some(snapshot) = self.snapshot.as_mut() else {
                return Err(SessionError::NotReady {
                    phase: SessionPhase::Booting.name(),
                });
            };
            if !snapshot.use_power_up(kind, now) {
                return Err(SessionError::PowerUpExhausted { kind });
            }
            snapshot.power_ups().count(kind)
        };
        if let (Some(identity), Some(snapshot)) = (self.identity.as_ref(), self.snapshot.as_ref())
        {
            self.persist_local(identity, snapshot);
        }
        if self.is_authenticated() {
            // Piggybacks on the next event save or autosave tick.
            self.saves.mark_dirty();
        }
        Ok(remaining)
    }

    /// Write the snapshot and its pointer to the device store. Best-effort:
    /// the adapters log their own failures.
    fn persist_local(&self, identity: &Identity, snapshot: &ProgressSnapshot) {
        self.stores.progress.save_snapshot(identity.id(), snapshot);
        let location = LastLocation::new(
            snapshot.current_module(),
            snapshot.current_question(),
            snapshot.last_updated(),
        );
        self.stores
            .progress
            .set_last_location(identity.id(), &location);
    }

    async fn schedule_save(&mut self) {
        if self.is_authenticated() {
            self.saves.mark_dirty();
            self.flush().await;
        }
    }

    /// The only remote writer. Returns true when a claimed push landed.
    async fn flush(&mut self) -> bool {
        let Some(ticket) = self.saves.begin() else {
            return false;
        };
        match self.push_remote().await {
            Ok(()) => {
                self.saves.complete(ticket, true);
                true
            }
            Err(RemoteError::Misconfigured) => {
                debug!("remote sync not configured; progress stays on this device");
                self.saves.complete(ticket, true);
                self.saves.go_local_only();
                false
            }
            Err(err) => {
                let user = self.identity.as_ref().map_or("", |i| i.id().as_str());
                warn!(user, %err, "progress push failed; will retry on the next save");
                self.saves.complete(ticket, false);
                false
            }
        }
    }

    async fn push_remote(&self) -> Result<(), RemoteError> {
        let (Some(identity), Some(snapshot)) = (self.identity.as_ref(), self.snapshot.as_ref())
        else {
            return Ok(());
        };
        self.stores
            .remote
            .save_snapshot(identity.id(), snapshot)
            .await?;
        let location = LastLocation::new(
            snapshot.current_module(),
            snapshot.current_question(),
            snapshot.last_updated(),
        );
        self.stores
            .remote
            .set_last_location(identity.id(), &location)
            .await
    }

    fn track_resume(&self, plan: ResumePlan) {
        let event = match plan.source {
            ResumeSource::Default => telemetry::RESUME_MISSING,
            _ => telemetry::RESUME_APPLIED,
        };
        self.telemetry.track(
            event,
            json!({
                "module": plan.module.value(),
                "question": plan.question,
                "source": source_name(plan.source),
            }),
        );
    }

    /// Append a milestone to the device audit log and, for accounts with
    /// working sync, mirror it remotely. Never fails the caller.
    async fn audit(
        &self,
        identity: &Identity,
        kind: &str,
        module: Option<u32>,
        question: Option<u32>,
        detail: Option<String>,
    ) {
        let event = SyncEvent {
            user_id: identity.id().clone(),
            kind: kind.to_string(),
            module,
            question,
            detail,
            at: self.clock.now(),
        };
        self.stores.events.append_event(&event);
        if identity.is_authenticated() && !self.saves.is_local_only() {
            if let Err(err) = self.stores.remote.append_event(&event).await {
                debug!(%err, "audit event not mirrored remotely");
            }
        }
    }
}

fn source_name(source: ResumeSource) -> &'static str {
    match source {
        ResumeSource::Remote => "remote",
        ResumeSource::Local => "local",
        ResumeSource::Snapshot => "snapshot",
        ResumeSource::Default => "default",
    }
}

fn outcome_name(outcome: MergeOutcome) -> &'static str {
    match outcome {
        MergeOutcome::Fresh => "fresh",
        MergeOutcome::Migrated => "migrated",
        MergeOutcome::LoadedExisting => "loaded-existing",
        MergeOutcome::Reconciled {
            kept: MergeSource::Guest,
        } => "reconciled-device",
        MergeOutcome::Reconciled {
            kept: MergeSource::Remote,
        } => "reconciled-account",
    }
}

fn kept_name(kept: MergeSource) -> &'static str {
    match kept {
        MergeSource::Guest => "device",
        MergeSource::Remote => "account",
    }
}

fn summarize(snapshot: Option<&ProgressSnapshot>) -> String {
    snapshot.map_or_else(
        || "none".to_string(),
        |s| {
            format!(
                "completed={} score={} updated={}",
                s.completed_modules().len(),
                s.score(),
                s.last_updated().to_rfc3339(),
            )
        },
    )
}

// ─── TESTS ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::NullTelemetry;
    use quiz_core::time::fixed_clock;

    fn build_service() -> SessionService {
        let catalog = ModuleCatalog::from_counts(&[5; 10]).unwrap();
        SessionService::new(
            SyncStores::in_memory(),
            catalog,
            fixed_clock(),
            Arc::new(NullTelemetry),
        )
    }

    #[tokio::test]
    async fn play_is_rejected_before_boot() {
        let mut service = build_service();

        assert!(service.overview().is_none());
        assert!(service.is_booting());
        assert!(matches!(
            service
                .submit_answer(ModuleId::new(0), 0, 1, true)
                .await,
            Err(SessionError::NotReady { phase: "booting" })
        ));
        assert!(matches!(
            service.start_module(ModuleId::new(0)).await,
            Err(SessionError::NotReady { .. })
        ));
        assert!(matches!(
            service.skip_question().await,
            Err(SessionError::NotReady { .. })
        ));
    }

    #[tokio::test]
    async fn boot_reaches_the_ready_phase() {
        let mut service = build_service();
        let plan = service.boot(None).await;

        assert_eq!(service.phase(), SessionPhase::Ready);
        assert!(!service.is_booting());
        assert_eq!(plan.module, ModuleId::new(0));
        assert_eq!(plan.question, 0);
        assert_eq!(service.resume_target(), Some(plan));
    }

    #[tokio::test]
    async fn out_of_catalog_coordinates_are_rejected() {
        let mut service = build_service();
        service.boot(None).await;

        assert!(matches!(
            service
                .submit_answer(ModuleId::new(42), 0, 0, true)
                .await,
            Err(SessionError::UnknownModule { .. })
        ));
        assert!(matches!(
            service.submit_answer(ModuleId::new(0), 99, 0, true).await,
            Err(SessionError::UnknownQuestion { .. })
        ));
    }
}
