use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::access::AccessPolicy;
use crate::catalog::ModuleCatalog;
use crate::model::{AchievementId, ModuleId, QuestionKey};
use crate::scoring::{CorrectAward, ScoringRules};

//
// ─── ANSWERS ───────────────────────────────────────────────────────────────────
//

/// Outcome of one question, immutable once recorded for the current attempt.
///
/// A skipped question records `selected_answer: None` with
/// `was_correct: false`, which is what costs the attempt its perfect rating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub answered: bool,
    pub selected_answer: Option<u32>,
    pub was_correct: bool,
}

impl AnswerRecord {
    #[must_use]
    pub fn correct(selected: u32) -> Self {
        Self {
            answered: true,
            selected_answer: Some(selected),
            was_correct: true,
        }
    }

    #[must_use]
    pub fn incorrect(selected: u32) -> Self {
        Self {
            answered: true,
            selected_answer: Some(selected),
            was_correct: false,
        }
    }

    #[must_use]
    pub fn skipped() -> Self {
        Self {
            answered: true,
            selected_answer: None,
            was_correct: false,
        }
    }
}

//
// ─── POWER-UPS ─────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerUpKind {
    Skip,
    Hint,
    Eliminate,
}

impl fmt::Display for PowerUpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PowerUpKind::Skip => "skip",
            PowerUpKind::Hint => "hint",
            PowerUpKind::Eliminate => "eliminate",
        };
        f.write_str(name)
    }
}

/// Remaining power-up charges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerUps {
    pub skip: u32,
    pub hint: u32,
    pub eliminate: u32,
}

impl Default for PowerUps {
    fn default() -> Self {
        Self {
            skip: 3,
            hint: 3,
            eliminate: 3,
        }
    }
}

impl PowerUps {
    #[must_use]
    pub fn count(&self, kind: PowerUpKind) -> u32 {
        match kind {
            PowerUpKind::Skip => self.skip,
            PowerUpKind::Hint => self.hint,
            PowerUpKind::Eliminate => self.eliminate,
        }
    }

    /// Spend one charge of the given kind. Returns false when none remain.
    pub fn consume(&mut self, kind: PowerUpKind) -> bool {
        let slot = match kind {
            PowerUpKind::Skip => &mut self.skip,
            PowerUpKind::Hint => &mut self.hint,
            PowerUpKind::Eliminate => &mut self.eliminate,
        };
        if *slot == 0 {
            return false;
        }
        *slot -= 1;
        true
    }

    /// Add one charge per kind, capped at the counts in `toward`.
    ///
    /// Returns true if any count changed. Applied when a module attempt
    /// starts, so a careful player slowly recovers spent charges.
    pub fn replenish(&mut self, toward: &PowerUps) -> bool {
        let mut changed = false;
        for (slot, cap) in [
            (&mut self.skip, toward.skip),
            (&mut self.hint, toward.hint),
            (&mut self.eliminate, toward.eliminate),
        ] {
            let next = (*slot + 1).min(cap);
            if next > *slot {
                *slot = next;
                changed = true;
            }
        }
        changed
    }
}

//
// ─── SNAPSHOT ──────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SnapshotError {
    #[error("level must be at least 1, got {level}")]
    InvalidLevel { level: u32 },

    #[error("module {module} is completed but not unlocked")]
    CompletedLocked { module: ModuleId },

    #[error("module {module} is outside the catalog")]
    ModuleOutOfBounds { module: ModuleId },

    #[error("question {question} is out of range for module {module}")]
    QuestionOutOfBounds { module: ModuleId, question: u32 },

    #[error("question order for module {module} has {actual} entries, expected {expected}")]
    OrderLengthMismatch {
        module: ModuleId,
        expected: u32,
        actual: usize,
    },

    #[error("question order for module {module} is not a permutation")]
    OrderNotPermutation { module: ModuleId },
}

/// Result of completing a module attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleCompletion {
    pub newly_completed: bool,
    pub newly_unlocked: Option<ModuleId>,
    pub perfect: bool,
}

/// The full progress state of one user, the unit of persistence and sync.
///
/// Two snapshots for the same user can diverge across backends; the merge
/// engine decides which one is adopted. All mutating methods stamp
/// `last_updated` only when they actually change something, so comparing
/// snapshots for equality is meaningful.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSnapshot {
    current_module: ModuleId,
    current_question: u32,
    score: u32,
    level: u32,
    xp: u32,
    streak: u32,
    combo: u32,
    perfect_modules: u32,
    completed_modules: BTreeSet<ModuleId>,
    unlocked_modules: BTreeSet<ModuleId>,
    answered: BTreeMap<QuestionKey, AnswerRecord>,
    achievements: BTreeSet<AchievementId>,
    power_ups: PowerUps,
    question_order: BTreeMap<ModuleId, Vec<u32>>,
    last_updated: DateTime<Utc>,
}

/// Unvalidated snapshot fields, as decoded from a persisted payload.
#[derive(Clone, Debug)]
pub struct ProgressDraft {
    pub current_module: ModuleId,
    pub current_question: u32,
    pub score: u32,
    pub level: u32,
    pub xp: u32,
    pub streak: u32,
    pub combo: u32,
    pub perfect_modules: u32,
    pub completed_modules: BTreeSet<ModuleId>,
    pub unlocked_modules: BTreeSet<ModuleId>,
    pub answered: BTreeMap<QuestionKey, AnswerRecord>,
    pub achievements: BTreeSet<AchievementId>,
    pub power_ups: PowerUps,
    pub question_order: BTreeMap<ModuleId, Vec<u32>>,
    pub last_updated: DateTime<Utc>,
}

impl ProgressDraft {
    /// Validate the draft into a snapshot.
    ///
    /// Structural checks only; bounds against a concrete catalog are the
    /// job of [`ProgressSnapshot::validate_against`]. A payload that fails
    /// here is treated as absent by the storage layer.
    ///
    /// # Errors
    ///
    /// Returns `SnapshotError::InvalidLevel` for a zero level and
    /// `SnapshotError::CompletedLocked` when a completed module is missing
    /// from the unlocked set.
    pub fn validate(self) -> Result<ProgressSnapshot, SnapshotError> {
        if self.level == 0 {
            return Err(SnapshotError::InvalidLevel { level: self.level });
        }
        for module in &self.completed_modules {
            if !self.unlocked_modules.contains(module) {
                return Err(SnapshotError::CompletedLocked { module: *module });
            }
        }

        Ok(ProgressSnapshot {
            current_module: self.current_module,
            current_question: self.current_question,
            score: self.score,
            level: self.level,
            xp: self.xp,
            streak: self.streak,
            combo: self.combo,
            perfect_modules: self.perfect_modules,
            completed_modules: self.completed_modules,
            unlocked_modules: self.unlocked_modules,
            answered: self.answered,
            achievements: self.achievements,
            power_ups: self.power_ups,
            question_order: self.question_order,
            last_updated: self.last_updated,
        })
    }
}

impl ProgressSnapshot {
    /// A brand-new snapshot: module 0, question 0, only module 0 unlocked.
    #[must_use]
    pub fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            current_module: ModuleId::new(0),
            current_question: 0,
            score: 0,
            level: 1,
            xp: 0,
            streak: 0,
            combo: 0,
            perfect_modules: 0,
            completed_modules: BTreeSet::new(),
            unlocked_modules: BTreeSet::from([ModuleId::new(0)]),
            answered: BTreeMap::new(),
            achievements: BTreeSet::new(),
            power_ups: PowerUps::default(),
            question_order: BTreeMap::new(),
            last_updated: now,
        }
    }

    // ─── Read access ───────────────────────────────────────────────────────────

    #[must_use]
    pub fn current_module(&self) -> ModuleId {
        self.current_module
    }

    #[must_use]
    pub fn current_question(&self) -> u32 {
        self.current_question
    }

    #[must_use]
    pub fn score(&self) -> u32 {
        self.score
    }

    #[must_use]
    pub fn level(&self) -> u32 {
        self.level
    }

    #[must_use]
    pub fn xp(&self) -> u32 {
        self.xp
    }

    #[must_use]
    pub fn streak(&self) -> u32 {
        self.streak
    }

    #[must_use]
    pub fn combo(&self) -> u32 {
        self.combo
    }

    #[must_use]
    pub fn perfect_modules(&self) -> u32 {
        self.perfect_modules
    }

    #[must_use]
    pub fn completed_modules(&self) -> &BTreeSet<ModuleId> {
        &self.completed_modules
    }

    #[must_use]
    pub fn unlocked_modules(&self) -> &BTreeSet<ModuleId> {
        &self.unlocked_modules
    }

    #[must_use]
    pub fn answered(&self) -> &BTreeMap<QuestionKey, AnswerRecord> {
        &self.answered
    }

    #[must_use]
    pub fn achievements(&self) -> &BTreeSet<AchievementId> {
        &self.achievements
    }

    #[must_use]
    pub fn power_ups(&self) -> &PowerUps {
        &self.power_ups
    }

    #[must_use]
    pub fn question_order(&self) -> &BTreeMap<ModuleId, Vec<u32>> {
        &self.question_order
    }

    #[must_use]
    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    #[must_use]
    pub fn is_unlocked(&self, module: ModuleId) -> bool {
        self.unlocked_modules.contains(&module)
    }

    #[must_use]
    pub fn is_completed(&self, module: ModuleId) -> bool {
        self.completed_modules.contains(&module)
    }

    #[must_use]
    pub fn highest_unlocked(&self) -> Option<ModuleId> {
        self.unlocked_modules.iter().next_back().copied()
    }

    #[must_use]
    pub fn answer(&self, key: &QuestionKey) -> Option<&AnswerRecord> {
        self.answered.get(key)
    }

    #[must_use]
    pub fn has_answers(&self) -> bool {
        !self.answered.is_empty()
    }

    /// Number of answered questions recorded for a module.
    #[must_use]
    pub fn answered_in(&self, module: ModuleId) -> usize {
        self.answered
            .keys()
            .filter(|key| key.module() == module)
            .count()
    }

    #[must_use]
    pub fn order_for(&self, module: ModuleId) -> Option<&[u32]> {
        self.question_order.get(&module).map(Vec::as_slice)
    }

    // ─── Mutation ──────────────────────────────────────────────────────────────

    /// Move the current position. No-op if already there.
    pub fn set_position(&mut self, module: ModuleId, question: u32, now: DateTime<Utc>) {
        if self.current_module == module && self.current_question == question {
            return;
        }
        self.current_module = module;
        self.current_question = question;
        self.last_updated = now;
    }

    /// Record the outcome of a question. Returns false (and changes nothing)
    /// if the question was already answered in this attempt.
    pub fn record_answer(
        &mut self,
        key: QuestionKey,
        record: AnswerRecord,
        now: DateTime<Utc>,
    ) -> bool {
        if self.answered.contains_key(&key) {
            return false;
        }
        self.answered.insert(key, record);
        self.last_updated = now;
        true
    }

    /// Apply the scoring consequences of a correct answer.
    pub fn apply_correct(&mut self, rules: &ScoringRules, now: DateTime<Utc>) -> CorrectAward {
        let award = rules.award_correct(self.combo, self.xp, self.level);
        self.score = self.score.saturating_add(award.points);
        self.streak = self.streak.saturating_add(1);
        self.combo = self.combo.saturating_add(1);
        self.xp = award.xp;
        self.level = award.level;
        self.last_updated = now;
        award
    }

    /// Apply the scoring consequences of a wrong answer: streak and combo
    /// reset, nothing else moves.
    pub fn apply_incorrect(&mut self, now: DateTime<Utc>) {
        if self.streak == 0 && self.combo == 0 {
            return;
        }
        self.streak = 0;
        self.combo = 0;
        self.last_updated = now;
    }

    /// Unlock a single module. Returns false if it was already unlocked.
    pub fn unlock(&mut self, module: ModuleId, now: DateTime<Utc>) -> bool {
        if self.unlocked_modules.insert(module) {
            self.last_updated = now;
            return true;
        }
        false
    }

    /// Unlock every module from 0 through `module` inclusive.
    ///
    /// Used when an authenticated resume pointer lands on a module this
    /// snapshot never unlocked; the pointer is trusted and the path to it
    /// widened. Returns true if anything new was unlocked.
    pub fn unlock_through(&mut self, module: ModuleId, now: DateTime<Utc>) -> bool {
        let mut changed = false;
        for index in 0..=module.value() {
            changed |= self.unlocked_modules.insert(ModuleId::new(index));
        }
        if changed {
            self.last_updated = now;
        }
        changed
    }

    /// Mark a module attempt as completed.
    ///
    /// Inserts into the completed set, optionally unlocks the follow-up
    /// module, and rates the attempt perfect when every question in the
    /// module was answered correctly. The perfect counter only moves on
    /// first completion.
    pub fn complete_module(
        &mut self,
        module: ModuleId,
        question_count: u32,
        next_unlock: Option<ModuleId>,
        now: DateTime<Utc>,
    ) -> ModuleCompletion {
        let newly_completed = self.completed_modules.insert(module);
        self.unlocked_modules.insert(module);

        let newly_unlocked = match next_unlock {
            Some(next) if self.unlocked_modules.insert(next) => Some(next),
            _ => None,
        };

        let module_answers: Vec<&AnswerRecord> = self
            .answered
            .iter()
            .filter(|(key, _)| key.module() == module)
            .map(|(_, record)| record)
            .collect();
        let perfect = module_answers.len() as u64 == u64::from(question_count)
            && module_answers.iter().all(|record| record.was_correct);
        if perfect && newly_completed {
            self.perfect_modules = self.perfect_modules.saturating_add(1);
        }

        self.last_updated = now;
        ModuleCompletion {
            newly_completed,
            newly_unlocked,
            perfect,
        }
    }

    /// Start a fresh attempt at a module.
    ///
    /// Clears that module's answered entries, installs the given question
    /// order, replenishes power-ups toward `replenish_toward`, and moves the
    /// position to the first question. This is the only path that removes
    /// answer records.
    pub fn begin_module_attempt(
        &mut self,
        module: ModuleId,
        order: Vec<u32>,
        replenish_toward: &PowerUps,
        now: DateTime<Utc>,
    ) {
        self.answered.retain(|key, _| key.module() != module);
        self.question_order.insert(module, order);
        self.power_ups.replenish(replenish_toward);
        self.current_module = module;
        self.current_question = 0;
        self.last_updated = now;
    }

    /// Spend one power-up charge. Returns false when none remain.
    pub fn use_power_up(&mut self, kind: PowerUpKind, now: DateTime<Utc>) -> bool {
        if self.power_ups.consume(kind) {
            self.last_updated = now;
            return true;
        }
        false
    }

    /// Grant an achievement. Returns false if already held.
    pub fn grant_achievement(&mut self, id: AchievementId, now: DateTime<Utc>) -> bool {
        if self.achievements.insert(id) {
            self.last_updated = now;
            return true;
        }
        false
    }

    /// Clamp this snapshot to what a guest may access.
    ///
    /// Unlocked and completed sets shrink to the guest-accessible modules,
    /// and the position falls back to the highest remaining module if it
    /// pointed somewhere no longer reachable. Score and achievements are
    /// untouched.
    pub fn restrict_to_guest(&mut self, policy: &AccessPolicy, now: DateTime<Utc>) {
        let allowed: BTreeSet<ModuleId> = self
            .unlocked_modules
            .intersection(policy.guest_modules())
            .copied()
            .collect();
        let mut unlocked = allowed;
        if unlocked.is_empty() {
            if let Some(first) = policy.guest_modules().iter().next() {
                unlocked.insert(*first);
            }
        }
        let completed: BTreeSet<ModuleId> = self
            .completed_modules
            .intersection(&unlocked)
            .copied()
            .collect();

        let mut changed = false;
        if unlocked != self.unlocked_modules {
            self.unlocked_modules = unlocked;
            changed = true;
        }
        if completed != self.completed_modules {
            self.completed_modules = completed;
            changed = true;
        }
        if !self.unlocked_modules.contains(&self.current_module) {
            self.current_module = self.highest_unlocked().unwrap_or(ModuleId::new(0));
            self.current_question = 0;
            changed = true;
        }
        if changed {
            self.last_updated = now;
        }
    }

    // ─── Validation ────────────────────────────────────────────────────────────

    /// Check this snapshot against a concrete module catalog.
    ///
    /// # Errors
    ///
    /// Returns the first bounds violation found: a module outside the
    /// catalog, an answered question past a module's question count, or a
    /// stored question order that is not a permutation of that module's
    /// indices.
    pub fn validate_against(&self, catalog: &ModuleCatalog) -> Result<(), SnapshotError> {
        for module in self
            .unlocked_modules
            .iter()
            .chain(self.completed_modules.iter())
            .chain(std::iter::once(&self.current_module))
        {
            if !catalog.contains(*module) {
                return Err(SnapshotError::ModuleOutOfBounds { module: *module });
            }
        }

        for key in self.answered.keys() {
            let count = catalog
                .question_count(key.module())
                .ok_or(SnapshotError::ModuleOutOfBounds {
                    module: key.module(),
                })?;
            if key.question() >= count {
                return Err(SnapshotError::QuestionOutOfBounds {
                    module: key.module(),
                    question: key.question(),
                });
            }
        }

        for (module, order) in &self.question_order {
            let count =
                catalog
                    .question_count(*module)
                    .ok_or(SnapshotError::ModuleOutOfBounds { module: *module })?;
            if order.len() != count as usize {
                return Err(SnapshotError::OrderLengthMismatch {
                    module: *module,
                    expected: count,
                    actual: order.len(),
                });
            }
            let mut sorted = order.clone();
            sorted.sort_unstable();
            if sorted.iter().copied().ne(0..count) {
                return Err(SnapshotError::OrderNotPermutation { module: *module });
            }
        }

        Ok(())
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::{fixed_now, fixed_now_plus};

    fn key(module: u32, question: u32) -> QuestionKey {
        QuestionKey::new(ModuleId::new(module), question)
    }

    #[test]
    fn fresh_snapshot_starts_at_module_zero() {
        let snapshot = ProgressSnapshot::fresh(fixed_now());

        assert_eq!(snapshot.current_module(), ModuleId::new(0));
        assert_eq!(snapshot.current_question(), 0);
        assert_eq!(snapshot.level(), 1);
        assert_eq!(snapshot.combo(), 0);
        assert_eq!(
            snapshot.unlocked_modules(),
            &BTreeSet::from([ModuleId::new(0)])
        );
        assert!(snapshot.completed_modules().is_empty());
    }

    #[test]
    fn record_answer_is_idempotent() {
        let mut snapshot = ProgressSnapshot::fresh(fixed_now());
        let first = snapshot.record_answer(key(0, 0), AnswerRecord::correct(2), fixed_now());
        let second =
            snapshot.record_answer(key(0, 0), AnswerRecord::incorrect(1), fixed_now_plus(5));

        assert!(first);
        assert!(!second);
        // the original record survives the duplicate
        assert_eq!(snapshot.answer(&key(0, 0)), Some(&AnswerRecord::correct(2)));
        assert_eq!(snapshot.last_updated(), fixed_now());
    }

    #[test]
    fn correct_answer_moves_score_and_combo() {
        let rules = ScoringRules::default();
        let mut snapshot = ProgressSnapshot::fresh(fixed_now());

        let award = snapshot.apply_correct(&rules, fixed_now());
        assert_eq!(award.points, 10);
        assert_eq!(snapshot.score(), 10);
        assert_eq!(snapshot.streak(), 1);
        assert_eq!(snapshot.combo(), 1);
        assert_eq!(snapshot.xp(), 25);

        let award = snapshot.apply_correct(&rules, fixed_now());
        assert_eq!(award.points, 20);
        assert_eq!(snapshot.score(), 30);
        assert_eq!(snapshot.combo(), 2);
    }

    #[test]
    fn wrong_answer_resets_streak_and_combo_only() {
        let rules = ScoringRules::default();
        let mut snapshot = ProgressSnapshot::fresh(fixed_now());
        snapshot.apply_correct(&rules, fixed_now());
        snapshot.apply_correct(&rules, fixed_now());

        snapshot.apply_incorrect(fixed_now_plus(1));

        assert_eq!(snapshot.streak(), 0);
        assert_eq!(snapshot.combo(), 0);
        assert_eq!(snapshot.score(), 30);
        assert_eq!(snapshot.xp(), 50);
    }

    #[test]
    fn level_up_rolls_xp_over() {
        let rules = ScoringRules::default();
        let mut snapshot = ProgressSnapshot::fresh(fixed_now());

        // 4 correct answers at 25 xp reach the level-1 threshold of 100.
        for _ in 0..3 {
            let award = snapshot.apply_correct(&rules, fixed_now());
            assert!(!award.leveled_up);
        }
        let award = snapshot.apply_correct(&rules, fixed_now());

        assert!(award.leveled_up);
        assert_eq!(snapshot.level(), 2);
        assert_eq!(snapshot.xp(), 0);
    }

    #[test]
    fn complete_module_unlocks_next_and_rates_perfect() {
        let mut snapshot = ProgressSnapshot::fresh(fixed_now());
        snapshot.record_answer(key(0, 0), AnswerRecord::correct(1), fixed_now());
        snapshot.record_answer(key(0, 1), AnswerRecord::correct(0), fixed_now());

        let completion =
            snapshot.complete_module(ModuleId::new(0), 2, Some(ModuleId::new(1)), fixed_now());

        assert!(completion.newly_completed);
        assert_eq!(completion.newly_unlocked, Some(ModuleId::new(1)));
        assert!(completion.perfect);
        assert!(snapshot.is_completed(ModuleId::new(0)));
        assert!(snapshot.is_unlocked(ModuleId::new(1)));
        assert_eq!(snapshot.perfect_modules(), 1);
    }

    #[test]
    fn skipped_question_costs_the_perfect_rating() {
        let mut snapshot = ProgressSnapshot::fresh(fixed_now());
        snapshot.record_answer(key(0, 0), AnswerRecord::correct(1), fixed_now());
        snapshot.record_answer(key(0, 1), AnswerRecord::skipped(), fixed_now());

        let completion = snapshot.complete_module(ModuleId::new(0), 2, None, fixed_now());

        assert!(!completion.perfect);
        assert_eq!(snapshot.perfect_modules(), 0);
    }

    #[test]
    fn recompleting_a_module_does_not_double_count_perfect() {
        let mut snapshot = ProgressSnapshot::fresh(fixed_now());
        snapshot.record_answer(key(0, 0), AnswerRecord::correct(1), fixed_now());
        snapshot.complete_module(ModuleId::new(0), 1, None, fixed_now());
        assert_eq!(snapshot.perfect_modules(), 1);

        snapshot.begin_module_attempt(
            ModuleId::new(0),
            vec![0],
            &PowerUps::default(),
            fixed_now(),
        );
        snapshot.record_answer(key(0, 0), AnswerRecord::correct(1), fixed_now());
        let completion = snapshot.complete_module(ModuleId::new(0), 1, None, fixed_now());

        assert!(!completion.newly_completed);
        assert!(completion.perfect);
        assert_eq!(snapshot.perfect_modules(), 1);
    }

    #[test]
    fn begin_module_attempt_clears_only_that_module() {
        let mut snapshot = ProgressSnapshot::fresh(fixed_now());
        snapshot.unlock(ModuleId::new(1), fixed_now());
        snapshot.record_answer(key(0, 0), AnswerRecord::correct(1), fixed_now());
        snapshot.record_answer(key(1, 0), AnswerRecord::correct(1), fixed_now());

        snapshot.begin_module_attempt(
            ModuleId::new(0),
            vec![1, 0, 2],
            &PowerUps::default(),
            fixed_now(),
        );

        assert_eq!(snapshot.answer(&key(0, 0)), None);
        assert!(snapshot.answer(&key(1, 0)).is_some());
        assert_eq!(snapshot.order_for(ModuleId::new(0)), Some(&[1, 0, 2][..]));
        assert_eq!(snapshot.current_module(), ModuleId::new(0));
        assert_eq!(snapshot.current_question(), 0);
    }

    #[test]
    fn power_ups_replenish_toward_cap() {
        let mut snapshot = ProgressSnapshot::fresh(fixed_now());
        assert!(snapshot.use_power_up(PowerUpKind::Skip, fixed_now()));
        assert!(snapshot.use_power_up(PowerUpKind::Skip, fixed_now()));
        assert_eq!(snapshot.power_ups().skip, 1);

        snapshot.begin_module_attempt(
            ModuleId::new(0),
            vec![0],
            &PowerUps::default(),
            fixed_now(),
        );

        assert_eq!(snapshot.power_ups().skip, 2);
        // hint was never spent, so it stays at the cap
        assert_eq!(snapshot.power_ups().hint, 3);
    }

    #[test]
    fn exhausted_power_up_cannot_be_used() {
        let mut snapshot = ProgressSnapshot::fresh(fixed_now());
        for _ in 0..3 {
            assert!(snapshot.use_power_up(PowerUpKind::Hint, fixed_now()));
        }
        assert!(!snapshot.use_power_up(PowerUpKind::Hint, fixed_now()));
    }

    #[test]
    fn unlock_through_widens_the_path() {
        let mut snapshot = ProgressSnapshot::fresh(fixed_now());
        let changed = snapshot.unlock_through(ModuleId::new(3), fixed_now());

        assert!(changed);
        assert_eq!(snapshot.unlocked_modules().len(), 4);
        assert!(snapshot.is_unlocked(ModuleId::new(3)));
        assert!(!snapshot.unlock_through(ModuleId::new(2), fixed_now()));
    }

    #[test]
    fn restrict_to_guest_clamps_unlocks_and_position() {
        let policy = AccessPolicy::default();
        let mut snapshot = ProgressSnapshot::fresh(fixed_now());
        snapshot.unlock_through(ModuleId::new(4), fixed_now());
        snapshot.set_position(ModuleId::new(4), 2, fixed_now());

        snapshot.restrict_to_guest(&policy, fixed_now_plus(1));

        assert_eq!(
            snapshot.unlocked_modules(),
            &BTreeSet::from([ModuleId::new(0)])
        );
        assert_eq!(snapshot.current_module(), ModuleId::new(0));
        assert_eq!(snapshot.current_question(), 0);
    }

    #[test]
    fn draft_rejects_completed_but_locked_module() {
        let mut draft = draft_from(ProgressSnapshot::fresh(fixed_now()));
        draft.completed_modules.insert(ModuleId::new(2));

        let err = draft.validate().unwrap_err();
        assert_eq!(
            err,
            SnapshotError::CompletedLocked {
                module: ModuleId::new(2)
            }
        );
    }

    #[test]
    fn draft_rejects_zero_level() {
        let mut draft = draft_from(ProgressSnapshot::fresh(fixed_now()));
        draft.level = 0;

        let err = draft.validate().unwrap_err();
        assert_eq!(err, SnapshotError::InvalidLevel { level: 0 });
    }

    #[test]
    fn validate_against_flags_out_of_bounds_position() {
        let catalog = crate::catalog::ModuleCatalog::from_counts(&[2, 2]).unwrap();
        let mut snapshot = ProgressSnapshot::fresh(fixed_now());
        snapshot.unlock_through(ModuleId::new(5), fixed_now());

        let err = snapshot.validate_against(&catalog).unwrap_err();
        assert!(matches!(err, SnapshotError::ModuleOutOfBounds { .. }));
    }

    #[test]
    fn validate_against_checks_question_order() {
        let catalog = crate::catalog::ModuleCatalog::from_counts(&[3]).unwrap();
        let mut snapshot = ProgressSnapshot::fresh(fixed_now());
        snapshot.begin_module_attempt(
            ModuleId::new(0),
            vec![2, 1, 0],
            &PowerUps::default(),
            fixed_now(),
        );
        assert!(snapshot.validate_against(&catalog).is_ok());

        snapshot.begin_module_attempt(
            ModuleId::new(0),
            vec![2, 2, 0],
            &PowerUps::default(),
            fixed_now(),
        );
        let err = snapshot.validate_against(&catalog).unwrap_err();
        assert!(matches!(err, SnapshotError::OrderNotPermutation { .. }));
    }

    fn draft_from(snapshot: ProgressSnapshot) -> ProgressDraft {
        ProgressDraft {
            current_module: snapshot.current_module(),
            current_question: snapshot.current_question(),
            score: snapshot.score(),
            level: snapshot.level(),
            xp: snapshot.xp(),
            streak: snapshot.streak(),
            combo: snapshot.combo(),
            perfect_modules: snapshot.perfect_modules(),
            completed_modules: snapshot.completed_modules().clone(),
            unlocked_modules: snapshot.unlocked_modules().clone(),
            answered: snapshot.answered().clone(),
            achievements: snapshot.achievements().clone(),
            power_ups: *snapshot.power_ups(),
            question_order: snapshot.question_order().clone(),
            last_updated: snapshot.last_updated(),
        }
    }
}
