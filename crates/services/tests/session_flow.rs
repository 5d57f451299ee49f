//! End-to-end session flows over in-memory stores: boot, migration,
//! reconciliation, outages, resume, and reset.

use std::sync::{Arc, Mutex};

use serde_json::Value;

use quiz_core::model::{
    AnswerRecord, Gender, Identity, IdentityDraft, IdentityKind, LastLocation, ModuleId,
    PowerUpKind, ProgressSnapshot, QuestionKey, UserId,
};
use quiz_core::time::{fixed_clock, fixed_now, fixed_now_plus};
use quiz_core::{MergeOutcome, MergeSource, ModuleCatalog, ResumeSource, ScoringRules};
use services::{
    NullTelemetry, SessionError, SessionPhase, SessionService, SyncHealth, Telemetry, telemetry,
};
use storage::{
    EventLog, IdentityStore, MemoryLocal, MemoryRemote, ProgressStore, RemoteStore, RestStore,
    SyncStores,
};

// ─── FIXTURES ──────────────────────────────────────────────────────────────────

fn stores_with(remote: Arc<MemoryRemote>) -> (SyncStores, Arc<MemoryLocal>) {
    let local = Arc::new(MemoryLocal::new());
    let stores = SyncStores {
        progress: local.clone(),
        identities: local.clone(),
        events: local.clone(),
        remote,
    };
    (stores, local)
}

fn catalog() -> ModuleCatalog {
    ModuleCatalog::from_counts(&[5; 10]).expect("catalog should build")
}

fn service_with(stores: SyncStores) -> SessionService {
    SessionService::new(stores, catalog(), fixed_clock(), Arc::new(NullTelemetry))
}

fn account(id: &str, name: &str) -> Identity {
    IdentityDraft {
        id: UserId::new(id),
        kind: IdentityKind::Authenticated,
        display_name: name.to_string(),
        organization: None,
        country: None,
        gender: Gender::Undisclosed,
        created_at: fixed_now(),
    }
    .validate()
    .expect("account draft should validate")
}

/// Answer whatever question the session currently points at.
async fn answer_current(service: &mut SessionService, correct: bool) {
    let progress = service.progress().expect("session should hold progress");
    let module = progress.current_module();
    let question = progress.current_question();
    service
        .submit_answer(module, question, 0, correct)
        .await
        .expect("answer should be accepted");
}

async fn complete_current_module(service: &mut SessionService) {
    for _ in 0..5 {
        answer_current(service, true).await;
    }
}

struct RecordingTelemetry {
    events: Mutex<Vec<(String, Value)>>,
}

impl RecordingTelemetry {
    fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    fn names(&self) -> Vec<String> {
        self.events
            .lock()
            .map(|guard| guard.iter().map(|(name, _)| name.clone()).collect())
            .unwrap_or_default()
    }
}

impl Telemetry for RecordingTelemetry {
    fn track(&self, event: &str, payload: Value) {
        if let Ok(mut guard) = self.events.lock() {
            guard.push((event.to_string(), payload));
        }
    }
}

// ─── GUEST FLOWS ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn fresh_guest_boots_at_the_origin() {
    let (stores, _) = stores_with(Arc::new(MemoryRemote::new()));
    let mut service = service_with(stores);

    let plan = service.boot(None).await;

    assert_eq!(service.phase(), SessionPhase::Ready);
    assert!(!service.is_booting());
    assert_eq!(plan.module, ModuleId::new(0));
    assert_eq!(plan.question, 0);
    assert_eq!(plan.source, ResumeSource::Snapshot);

    let identity = service.identity().expect("identity should be resolved");
    assert!(identity.is_guest());

    let progress = service.progress().expect("progress should be loaded");
    assert!(progress.is_unlocked(ModuleId::new(0)));
    assert!(!progress.is_unlocked(ModuleId::new(1)));
    assert_eq!(service.sync_health(), SyncHealth::LocalOnly);
}

#[tokio::test]
async fn guest_progress_survives_reboot() {
    let remote = Arc::new(MemoryRemote::new());
    let (stores, _) = stores_with(remote.clone());

    let mut service = service_with(stores.clone());
    service.boot(None).await;
    let guest_id = service.identity().unwrap().id().clone();
    service.start_module(ModuleId::new(0)).await.unwrap();
    answer_current(&mut service, true).await;
    answer_current(&mut service, false).await;
    drop(service);

    let mut rebooted = service_with(stores);
    let plan = rebooted.boot(None).await;

    assert_eq!(rebooted.identity().unwrap().id(), &guest_id);
    assert_eq!(plan.source, ResumeSource::Local);
    assert_eq!(plan.module, ModuleId::new(0));
    assert_eq!(plan.question, 2);

    let progress = rebooted.progress().unwrap();
    assert_eq!(progress.answered_in(ModuleId::new(0)), 2);
    // guests never touch the remote backend
    assert_eq!(remote.save_calls(), 0);
}

#[tokio::test]
async fn locked_module_is_rejected_for_guests() {
    let telemetry = Arc::new(RecordingTelemetry::new());
    let (stores, _) = stores_with(Arc::new(MemoryRemote::new()));
    let mut service = SessionService::new(stores, catalog(), fixed_clock(), telemetry.clone());
    service.boot(None).await;

    let err = service.start_module(ModuleId::new(1)).await.unwrap_err();

    assert!(matches!(
        err,
        SessionError::ModuleLocked { module } if module == ModuleId::new(1)
    ));
    assert_eq!(service.phase(), SessionPhase::Ready);
    assert!(
        telemetry
            .names()
            .iter()
            .any(|name| name == telemetry::ACCESS_DENIED)
    );
}

#[tokio::test]
async fn guest_completion_stops_at_the_guest_boundary() {
    let telemetry = Arc::new(RecordingTelemetry::new());
    let (stores, _) = stores_with(Arc::new(MemoryRemote::new()));
    let mut service = SessionService::new(stores, catalog(), fixed_clock(), telemetry.clone());
    service.boot(None).await;

    for _ in 0..4 {
        answer_current(&mut service, true).await;
    }
    let (module, question) = {
        let progress = service.progress().unwrap();
        (progress.current_module(), progress.current_question())
    };
    let outcome = service.submit_answer(module, question, 0, true).await.unwrap();

    let done = outcome.completion.expect("module should complete");
    assert!(done.newly_completed);
    assert!(done.perfect);
    assert_eq!(done.newly_unlocked, None);

    let progress = service.progress().unwrap();
    assert!(progress.is_completed(ModuleId::new(0)));
    assert!(!progress.is_unlocked(ModuleId::new(1)));
    assert_eq!(progress.perfect_modules(), 1);
    // nowhere further to go, so play stays on the completed module
    assert_eq!(outcome.module, ModuleId::new(0));
    assert_eq!(outcome.question, 0);
    assert!(
        telemetry
            .names()
            .iter()
            .any(|name| name == telemetry::ACCESS_DENIED)
    );
}

// ─── SIGN-IN AND MERGE ─────────────────────────────────────────────────────────

#[tokio::test]
async fn signing_in_migrates_guest_progress() {
    let remote = Arc::new(MemoryRemote::new());
    let (stores, local) = stores_with(remote.clone());
    let mut service = service_with(stores);

    service.boot(None).await;
    let guest_id = service.identity().unwrap().id().clone();
    complete_current_module(&mut service).await;

    service.sign_in(account("amara-1", "Amara")).await;

    assert_eq!(service.last_merge_outcome(), Some(MergeOutcome::Migrated));
    let progress = service.progress().unwrap();
    assert!(progress.is_completed(ModuleId::new(0)));
    assert!(progress.is_unlocked(ModuleId::new(1)));
    assert_eq!(progress.perfect_modules(), 1);

    // the push landed, so the guest copy has left the device
    let user = UserId::new("amara-1");
    let pushed = remote.load_snapshot(&user).await.unwrap();
    assert_eq!(pushed.as_ref(), service.progress());
    assert!(local.load_snapshot(&guest_id).is_none());
    assert!(local.guest_identity().is_none());
    assert_eq!(service.sync_health(), SyncHealth::Synced);
}

#[tokio::test]
async fn existing_account_progress_wins_reconciliation() {
    let remote = Arc::new(MemoryRemote::new());
    let user = UserId::new("amara-1");

    // account already has two completed modules and a newer pointer
    let mut rich = ProgressSnapshot::fresh(fixed_now());
    rich.unlock_through(ModuleId::new(2), fixed_now());
    for question in 0..5 {
        rich.record_answer(
            QuestionKey::new(ModuleId::new(0), question),
            AnswerRecord::correct(0),
            fixed_now(),
        );
        rich.apply_correct(&ScoringRules::default(), fixed_now());
    }
    rich.complete_module(ModuleId::new(0), 5, None, fixed_now());
    rich.complete_module(ModuleId::new(1), 5, None, fixed_now());
    rich.set_position(ModuleId::new(2), 1, fixed_now_plus(60));
    remote.save_snapshot(&user, &rich).await.unwrap();
    remote
        .set_last_location(
            &user,
            &LastLocation::new(ModuleId::new(2), 1, fixed_now_plus(60)),
        )
        .await
        .unwrap();

    let (stores, local) = stores_with(remote.clone());
    let mut service = service_with(stores);
    service.boot(None).await;
    let guest_id = service.identity().unwrap().id().clone();
    answer_current(&mut service, true).await;

    let plan = service.sign_in(account("amara-1", "Amara")).await;

    assert_eq!(
        service.last_merge_outcome(),
        Some(MergeOutcome::Reconciled {
            kept: MergeSource::Remote
        })
    );
    assert_eq!(plan.source, ResumeSource::Remote);
    assert_eq!(plan.module, ModuleId::new(2));
    assert_eq!(plan.question, 1);

    let progress = service.progress().unwrap();
    assert_eq!(progress.score(), rich.score());
    assert_eq!(progress.current_module(), ModuleId::new(2));
    assert_eq!(progress.current_question(), 1);
    // the losing guest copy is still consumed and cleaned up
    assert!(local.load_snapshot(&guest_id).is_none());
}

#[tokio::test]
async fn guest_beats_stale_remote_under_richer_policy() {
    let remote = Arc::new(MemoryRemote::new());
    let user = UserId::new("amara-1");

    let mut stale = ProgressSnapshot::fresh(fixed_now());
    stale.record_answer(
        QuestionKey::new(ModuleId::new(0), 0),
        AnswerRecord::correct(0),
        fixed_now(),
    );
    stale.apply_correct(&ScoringRules::default(), fixed_now());
    remote.save_snapshot(&user, &stale).await.unwrap();

    let (stores, _) = stores_with(remote.clone());
    let mut service = service_with(stores);
    service.boot(None).await;
    complete_current_module(&mut service).await;

    service.sign_in(account("amara-1", "Amara")).await;

    assert_eq!(
        service.last_merge_outcome(),
        Some(MergeOutcome::Reconciled {
            kept: MergeSource::Guest
        })
    );
    let progress = service.progress().unwrap();
    assert!(progress.is_completed(ModuleId::new(0)));

    // the adopted device progress overwrote the stale account copy
    let pushed = remote.load_snapshot(&user).await.unwrap().unwrap();
    assert_eq!(pushed.completed_modules().len(), 1);
}

#[tokio::test]
async fn remote_outage_never_blocks_login() {
    let remote = Arc::new(MemoryRemote::new());
    let (stores, local) = stores_with(remote.clone());
    let mut service = service_with(stores);

    service.boot(None).await;
    let guest_id = service.identity().unwrap().id().clone();
    answer_current(&mut service, true).await;

    remote.set_offline(true);
    service.sign_in(account("amara-1", "Amara")).await;

    assert_eq!(service.phase(), SessionPhase::Ready);
    assert!(service.identity().unwrap().is_authenticated());
    assert_eq!(service.last_merge_outcome(), Some(MergeOutcome::Migrated));
    assert_eq!(service.sync_health(), SyncHealth::Degraded);
    assert_eq!(remote.save_calls(), 0);
    // the device guest copy stays put until a push actually lands
    assert!(local.load_snapshot(&guest_id).is_some());

    remote.set_offline(false);
    answer_current(&mut service, true).await;

    assert_eq!(remote.save_calls(), 1);
    assert_eq!(service.sync_health(), SyncHealth::Synced);
    let user = UserId::new("amara-1");
    assert!(remote.load_snapshot(&user).await.unwrap().is_some());
}

// ─── SAVE PIPELINE ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn event_saves_coalesce_through_the_pipeline() {
    let remote = Arc::new(MemoryRemote::new());
    let (stores, _) = stores_with(remote.clone());
    let mut service = service_with(stores);

    service.boot(Some(account("amara-1", "Amara"))).await;
    assert_eq!(remote.save_calls(), 1);

    service.start_module(ModuleId::new(0)).await.unwrap();
    assert_eq!(remote.save_calls(), 2);

    answer_current(&mut service, true).await;
    assert_eq!(remote.save_calls(), 3);

    // power-ups only flag the state dirty; no immediate push
    service.use_hint().await.unwrap();
    service.use_eliminate().await.unwrap();
    assert_eq!(remote.save_calls(), 3);
    assert_eq!(service.sync_health(), SyncHealth::Pending);

    // the periodic tick picks the dirty state up in one write
    service.autosave_tick().await;
    assert_eq!(remote.save_calls(), 4);
    assert_eq!(service.sync_health(), SyncHealth::Synced);

    // and a clean tick pushes nothing
    service.autosave_tick().await;
    assert_eq!(remote.save_calls(), 4);
}

#[tokio::test]
async fn failed_saves_retry_on_the_next_event() {
    let remote = Arc::new(MemoryRemote::new());
    let (stores, _) = stores_with(remote.clone());
    let mut service = service_with(stores);

    service.boot(Some(account("amara-1", "Amara"))).await;
    assert_eq!(remote.save_calls(), 1);

    remote.set_offline(true);
    answer_current(&mut service, true).await;
    answer_current(&mut service, true).await;
    answer_current(&mut service, false).await;
    assert_eq!(remote.save_calls(), 1);
    assert_eq!(service.sync_health(), SyncHealth::Degraded);

    // connectivity returns; one tick carries all three answers
    remote.set_offline(false);
    service.autosave_tick().await;
    assert_eq!(remote.save_calls(), 2);
    assert_eq!(service.sync_health(), SyncHealth::Synced);

    let user = UserId::new("amara-1");
    let pushed = remote.load_snapshot(&user).await.unwrap().unwrap();
    assert_eq!(pushed.answered_in(ModuleId::new(0)), 3);
}

#[tokio::test]
async fn unconfigured_sync_runs_device_only() {
    let local = Arc::new(MemoryLocal::new());
    let stores = SyncStores {
        progress: local.clone(),
        identities: local.clone(),
        events: local,
        remote: Arc::new(RestStore::new(None)),
    };
    let mut service = service_with(stores);

    service.boot(Some(account("amara-1", "Amara"))).await;

    assert_eq!(service.phase(), SessionPhase::Ready);
    assert_eq!(service.sync_health(), SyncHealth::LocalOnly);

    answer_current(&mut service, true).await;
    service.sync_now().await.expect("local-only sync is a no-op");
    assert_eq!(service.sync_health(), SyncHealth::LocalOnly);
}

#[tokio::test]
async fn sync_now_surfaces_the_failure() {
    let remote = Arc::new(MemoryRemote::new());
    let (stores, _) = stores_with(remote.clone());
    let mut service = service_with(stores);

    service.boot(Some(account("amara-1", "Amara"))).await;
    remote.set_offline(true);

    let err = service.sync_now().await.unwrap_err();
    assert!(matches!(err, SessionError::Remote(_)));
    assert_eq!(service.sync_health(), SyncHealth::Degraded);
}

// ─── POWER-UPS AND SKIPS ───────────────────────────────────────────────────────

#[tokio::test]
async fn power_up_charges_run_out() {
    let (stores, _) = stores_with(Arc::new(MemoryRemote::new()));
    let mut service = service_with(stores);
    service.boot(None).await;

    assert_eq!(service.use_hint().await.unwrap(), 2);
    assert_eq!(service.use_hint().await.unwrap(), 1);
    assert_eq!(service.use_hint().await.unwrap(), 0);
    let err = service.use_hint().await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::PowerUpExhausted {
            kind: PowerUpKind::Hint
        }
    ));

    // each kind draws on its own pool
    assert_eq!(service.use_eliminate().await.unwrap(), 2);
}

#[tokio::test]
async fn skipping_spends_a_charge_and_advances() {
    let (stores, _) = stores_with(Arc::new(MemoryRemote::new()));
    let mut service = service_with(stores);
    service.boot(None).await;
    answer_current(&mut service, true).await;

    let outcome = service.skip_question().await.unwrap();

    assert!(!outcome.correct);
    assert!(outcome.award.is_none());
    assert_eq!(outcome.module, ModuleId::new(0));
    assert_eq!(outcome.question, 2);

    let progress = service.progress().unwrap();
    assert_eq!(progress.power_ups().count(PowerUpKind::Skip), 2);
    assert_eq!(progress.answered_in(ModuleId::new(0)), 2);
    // a skip breaks the streak and is recorded as a non-answer
    assert_eq!(progress.streak(), 0);
    let record = progress
        .answer(&QuestionKey::new(ModuleId::new(0), 1))
        .copied()
        .expect("skip should be recorded");
    assert!(record.answered);
    assert!(record.selected_answer.is_none());
    assert!(!record.was_correct);
}

// ─── PROGRESSION ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn authenticated_completion_rolls_into_the_next_module() {
    let (stores, _) = stores_with(Arc::new(MemoryRemote::new()));
    let mut service = service_with(stores);
    service.boot(Some(account("amara-1", "Amara"))).await;

    complete_current_module(&mut service).await;
    {
        let progress = service.progress().unwrap();
        assert!(progress.is_completed(ModuleId::new(0)));
        assert_eq!(progress.current_module(), ModuleId::new(1));
        assert_eq!(progress.current_question(), 0);
    }

    // completing the second module unlocks fresh territory
    for _ in 0..4 {
        answer_current(&mut service, true).await;
    }
    let (module, question) = {
        let progress = service.progress().unwrap();
        (progress.current_module(), progress.current_question())
    };
    let outcome = service.submit_answer(module, question, 0, true).await.unwrap();

    let done = outcome.completion.expect("module should complete");
    assert_eq!(done.newly_unlocked, Some(ModuleId::new(2)));
    assert_eq!(outcome.module, ModuleId::new(2));
    assert_eq!(outcome.question, 0);
}

// ─── RESET ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn reset_clears_both_stores() {
    let remote = Arc::new(MemoryRemote::new());
    let (stores, local) = stores_with(remote.clone());
    let mut service = service_with(stores);
    let user = UserId::new("amara-1");

    service.boot(Some(account("amara-1", "Amara"))).await;
    complete_current_module(&mut service).await;
    assert!(remote.load_snapshot(&user).await.unwrap().is_some());

    service.reset().await.unwrap();

    assert_eq!(service.phase(), SessionPhase::Ready);
    let progress = service.progress().unwrap();
    assert!(!progress.has_answers());
    assert_eq!(progress.score(), 0);
    assert!(progress.completed_modules().is_empty());
    assert!(progress.is_unlocked(ModuleId::new(1)));
    assert_eq!(progress.current_module(), ModuleId::new(0));
    assert_eq!(progress.current_question(), 0);

    assert!(remote.load_snapshot(&user).await.unwrap().is_none());
    assert!(remote.last_location(&user).await.unwrap().is_none());
    let device_copy = local.load_snapshot(&user).expect("fresh state re-persisted");
    assert!(!device_copy.has_answers());
    // the device audit trail survives the wipe
    assert!(!local.recent_events(10).is_empty());
}

#[tokio::test]
async fn reset_aborts_when_the_remote_wipe_fails() {
    let remote = Arc::new(MemoryRemote::new());
    let (stores, _) = stores_with(remote.clone());
    let mut service = service_with(stores);
    let user = UserId::new("amara-1");

    service.boot(Some(account("amara-1", "Amara"))).await;
    complete_current_module(&mut service).await;

    remote.set_offline(true);
    let err = service.reset().await.unwrap_err();

    assert!(matches!(err, SessionError::Remote(_)));
    assert_eq!(service.phase(), SessionPhase::Ready);
    // nothing was lost: the session still holds the played state
    let progress = service.progress().unwrap();
    assert!(progress.is_completed(ModuleId::new(0)));

    remote.set_offline(false);
    assert!(remote.load_snapshot(&user).await.unwrap().is_some());
}

// ─── SIGN-OUT ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn signing_out_returns_to_a_guest_session() {
    let remote = Arc::new(MemoryRemote::new());
    let (stores, _) = stores_with(remote.clone());
    let mut service = service_with(stores);

    service.boot(Some(account("amara-1", "Amara"))).await;
    complete_current_module(&mut service).await;

    service.sign_out().await;

    let identity = service.identity().unwrap();
    assert!(identity.is_guest());
    assert_eq!(service.sync_health(), SyncHealth::LocalOnly);
    // the guest starts from a clean slate, clamped to guest access
    let progress = service.progress().unwrap();
    assert!(!progress.is_completed(ModuleId::new(0)));
    assert!(!progress.is_unlocked(ModuleId::new(1)));

    // the account copy is safe on the backend for the next login
    let user = UserId::new("amara-1");
    let kept = remote.load_snapshot(&user).await.unwrap().unwrap();
    assert!(kept.is_completed(ModuleId::new(0)));
}
