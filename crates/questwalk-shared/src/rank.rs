//! XP and rank progression.
//!
//! Ranks are derived from accumulated XP through a fixed table of five
//! contiguous bands. Nothing in here stores a rank; callers recompute it
//! from `total_xp` whenever they need it.

use serde::{Deserialize, Serialize};

use crate::constants::{QUIZ_PASS_SCORE_PERCENT, QUIZ_XP_PER_QUESTION};

/// One band of the rank table. `max_xp` is inclusive; `None` means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankThreshold {
    pub rank: u8,
    pub min_xp: u64,
    pub max_xp: Option<u64>,
    pub name: &'static str,
}

impl RankThreshold {
    pub fn contains(&self, xp: u64) -> bool {
        xp >= self.min_xp && self.max_xp.map_or(true, |max| xp <= max)
    }
}

/// Rank bands, sorted by rank.
pub static RANK_THRESHOLDS: [RankThreshold; 5] = [
    RankThreshold {
        rank: 1,
        min_xp: 0,
        max_xp: Some(199),
        name: "Explorer",
    },
    RankThreshold {
        rank: 2,
        min_xp: 200,
        max_xp: Some(499),
        name: "Pathfinder",
    },
    RankThreshold {
        rank: 3,
        min_xp: 500,
        max_xp: Some(999),
        name: "Trailblazer",
    },
    RankThreshold {
        rank: 4,
        min_xp: 1000,
        max_xp: Some(1999),
        name: "Navigator",
    },
    RankThreshold {
        rank: 5,
        min_xp: 2000,
        max_xp: None,
        name: "Legend",
    },
];

pub const MIN_RANK: u8 = 1;
pub const MAX_RANK: u8 = 5;

/// Highest-numbered band containing `total_xp`.
pub fn calculate_rank(total_xp: u64) -> u8 {
    RANK_THRESHOLDS
        .iter()
        .rev()
        .find(|t| t.contains(total_xp))
        .map(|t| t.rank)
        .unwrap_or(MIN_RANK)
}

pub fn rank_threshold(rank: u8) -> Option<&'static RankThreshold> {
    RANK_THRESHOLDS.iter().find(|t| t.rank == rank)
}

/// Display name for a rank. Unknown ranks fall back to rank 1's name.
pub fn get_rank_name(rank: u8) -> &'static str {
    rank_threshold(rank)
        .unwrap_or(&RANK_THRESHOLDS[0])
        .name
}

/// Apply a reward (or penalty) to an XP total. Totals never go below zero.
pub fn calculate_new_xp(current_xp: u64, reward: i64) -> u64 {
    if reward >= 0 {
        current_xp.saturating_add(reward as u64)
    } else {
        current_xp.saturating_sub(reward.unsigned_abs())
    }
}

/// True when `new_xp` lands in a higher band than `current_rank`.
///
/// Pass the rank held *before* the award.
pub fn check_level_up(current_rank: u8, new_xp: u64) -> bool {
    calculate_rank(new_xp) > current_rank
}

/// XP still needed to reach the next band, `None` at the top rank.
pub fn xp_to_next_rank(total_xp: u64) -> Option<u64> {
    let next = rank_threshold(calculate_rank(total_xp).checked_add(1)?)?;
    Some(next.min_xp.saturating_sub(total_xp))
}

/// `correct * base`, with a floored 1.5x bonus for a perfect non-empty quiz.
pub fn calculate_quiz_xp(correct: u32, total: u32, base_xp_per_question: u64) -> u64 {
    let xp = u64::from(correct).saturating_mul(base_xp_per_question);
    if correct == total && total > 0 {
        // integer floor of xp * 1.5
        xp.saturating_mul(3) / 2
    } else {
        xp
    }
}

/// [`calculate_quiz_xp`] at the default 25 XP per question.
pub fn calculate_quiz_xp_default(correct: u32, total: u32) -> u64 {
    calculate_quiz_xp(correct, total, QUIZ_XP_PER_QUESTION)
}

/// Percentage of correct answers, rounded. An empty quiz scores 0.
pub fn calculate_quiz_score(correct: u32, total: u32) -> u32 {
    if total == 0 {
        return 0;
    }
    (f64::from(correct) / f64::from(total) * 100.0).round() as u32
}

pub fn is_quiz_passed(score_percent: u32, min_score_percent: u32) -> bool {
    score_percent >= min_score_percent
}

pub fn is_quiz_passed_default(score_percent: u32) -> bool {
    is_quiz_passed(score_percent, QUIZ_PASS_SCORE_PERCENT)
}

/// A user's progression, keyed only by XP.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankProfile {
    pub total_xp: u64,
}

/// Outcome of applying a reward to a [`RankProfile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankChange {
    pub previous_xp: u64,
    pub new_xp: u64,
    pub previous_rank: u8,
    pub new_rank: u8,
    pub leveled_up: bool,
}

impl RankProfile {
    pub fn new(total_xp: u64) -> Self {
        Self { total_xp }
    }

    pub fn rank(&self) -> u8 {
        calculate_rank(self.total_xp)
    }

    pub fn rank_name(&self) -> &'static str {
        get_rank_name(self.rank())
    }

    pub fn xp_to_next_rank(&self) -> Option<u64> {
        xp_to_next_rank(self.total_xp)
    }

    pub fn award(&mut self, reward: i64) -> RankChange {
        let previous_xp = self.total_xp;
        let previous_rank = self.rank();
        self.total_xp = calculate_new_xp(previous_xp, reward);
        RankChange {
            previous_xp,
            new_xp: self.total_xp,
            previous_rank,
            new_rank: self.rank(),
            leveled_up: check_level_up(previous_rank, self.total_xp),
        }
    }
}
