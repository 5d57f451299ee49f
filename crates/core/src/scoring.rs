use serde::{Deserialize, Serialize};

/// Tunable scoring arithmetic for answer feedback.
///
/// Kept separate from the snapshot so the numbers can be adjusted without
/// touching state handling. All arithmetic saturates; a long-running
/// session degrades to pegged counters instead of wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoringRules {
    /// Points for a correct answer before the combo multiplier.
    pub points_base: u32,
    /// Experience granted per correct answer.
    pub xp_per_correct: u32,
    /// Experience required per level: level `n` completes at `n * level_step`.
    pub level_step: u32,
}

impl Default for ScoringRules {
    fn default() -> Self {
        Self {
            points_base: 10,
            xp_per_correct: 25,
            level_step: 100,
        }
    }
}

/// What one correct answer was worth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrectAward {
    /// Points granted, combo multiplier included.
    pub points: u32,
    /// Experience total after the answer, rolled over on level-up.
    pub xp: u32,
    /// Level after the answer.
    pub level: u32,
    pub leveled_up: bool,
}

impl ScoringRules {
    /// Score a correct answer given the state before it.
    ///
    /// Points scale linearly with the running combo. Experience past the
    /// current level's threshold rolls into the next level rather than
    /// being discarded.
    #[must_use]
    pub fn award_correct(&self, combo: u32, xp: u32, level: u32) -> CorrectAward {
        let points = self.points_base.saturating_mul(combo.saturating_add(1));
        let gained = xp.saturating_add(self.xp_per_correct);
        let threshold = level.saturating_mul(self.level_step);

        if gained >= threshold {
            CorrectAward {
                points,
                xp: gained - threshold,
                level: level.saturating_add(1),
                leveled_up: true,
            }
        } else {
            CorrectAward {
                points,
                xp: gained,
                level,
                leveled_up: false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn points_scale_with_combo() {
        let rules = ScoringRules::default();

        assert_eq!(rules.award_correct(0, 0, 1).points, 10);
        assert_eq!(rules.award_correct(1, 0, 1).points, 20);
        assert_eq!(rules.award_correct(4, 0, 1).points, 50);
    }

    #[test]
    fn xp_accumulates_below_threshold() {
        let rules = ScoringRules::default();
        let award = rules.award_correct(0, 50, 1);

        assert_eq!(award.xp, 75);
        assert_eq!(award.level, 1);
        assert!(!award.leveled_up);
    }

    #[test]
    fn level_up_rolls_surplus_xp_over() {
        let rules = ScoringRules::default();

        // exactly at the threshold
        let award = rules.award_correct(0, 75, 1);
        assert!(award.leveled_up);
        assert_eq!(award.level, 2);
        assert_eq!(award.xp, 0);

        // past the threshold, surplus carries
        let award = rules.award_correct(0, 90, 1);
        assert_eq!(award.xp, 15);
        assert_eq!(award.level, 2);
    }

    #[test]
    fn higher_levels_need_more_xp() {
        let rules = ScoringRules::default();

        // level 3 completes at 300, so 250 + 25 is not enough
        let award = rules.award_correct(0, 250, 3);
        assert!(!award.leveled_up);
        assert_eq!(award.xp, 275);

        let award = rules.award_correct(0, 275, 3);
        assert!(award.leveled_up);
        assert_eq!(award.level, 4);
    }

    #[test]
    fn arithmetic_saturates_at_extremes() {
        let rules = ScoringRules::default();
        let award = rules.award_correct(u32::MAX, u32::MAX, 1);

        assert_eq!(award.points, u32::MAX);
        assert!(award.leveled_up);
    }
}
