//! Quest session state owned by the progression controller.
//!
//! [`UserQuestState`] is only ever mutated by the controller task. Outside
//! code sees it through [`QuestSnapshot`], a read-only copy published after
//! every transition.

use chrono::{DateTime, Utc};
use serde::Serialize;

use questwalk_shared::rank::{RankChange, RankProfile};
use questwalk_shared::types::{Location, Quest, QuestId, QuestStep};

use crate::route::Route;

/// Phase of an in-progress quest.
///
/// The active route only exists inside `Navigating`, so a route can never
/// outlive the leg it was fetched for.
#[derive(Debug, Clone, PartialEq)]
pub enum Phase {
    Waiting {
        starts_at: DateTime<Utc>,
    },
    Active,
    Navigating {
        leg: u64,
        origin: Location,
        route: Route,
    },
    Arrived {
        distance_m: f64,
    },
    Submitting {
        step_number: u32,
        token: u64,
        distance_m: f64,
    },
    Completed {
        xp_reward: i64,
        change: RankChange,
    },
    Ended,
}

impl Phase {
    pub fn kind(&self) -> PhaseKind {
        match self {
            Phase::Waiting { .. } => PhaseKind::Waiting,
            Phase::Active => PhaseKind::Active,
            Phase::Navigating { .. } => PhaseKind::Navigating,
            Phase::Arrived { .. } => PhaseKind::Arrived,
            Phase::Submitting { .. } => PhaseKind::Submitting,
            Phase::Completed { .. } => PhaseKind::Completed,
            Phase::Ended => PhaseKind::Ended,
        }
    }
}

/// Fieldless mirror of [`Phase`], plus `Idle` for "no quest joined".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    Idle,
    Waiting,
    Active,
    Navigating,
    Arrived,
    Submitting,
    Completed,
    Ended,
}

impl PhaseKind {
    /// A new quest may be joined from these phases.
    pub fn accepts_join(&self) -> bool {
        matches!(self, PhaseKind::Idle | PhaseKind::Completed | PhaseKind::Ended)
    }
}

impl std::fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PhaseKind::Idle => "idle",
            PhaseKind::Waiting => "waiting",
            PhaseKind::Active => "active",
            PhaseKind::Navigating => "navigating",
            PhaseKind::Arrived => "arrived",
            PhaseKind::Submitting => "submitting",
            PhaseKind::Completed => "completed",
            PhaseKind::Ended => "ended",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct UserQuestState {
    pub quest: Quest,
    /// 1-based, always within `1..=total_steps`.
    pub current_step_number: u32,
    pub total_steps: u32,
    pub phase: Phase,
    pub last_known_location: Option<Location>,
}

impl UserQuestState {
    /// Steps must already be sorted and contiguous from 1.
    pub fn new(quest: Quest, phase: Phase, last_known_location: Option<Location>) -> Self {
        let total_steps = quest.total_steps();
        Self {
            quest,
            current_step_number: 1,
            total_steps,
            phase,
            last_known_location,
        }
    }

    pub fn quest_id(&self) -> QuestId {
        self.quest.id
    }

    pub fn current_step(&self) -> Option<&QuestStep> {
        self.quest.step(self.current_step_number)
    }

    pub fn current_target(&self) -> Option<Location> {
        self.current_step().and_then(|s| s.location)
    }

    pub fn is_last_step(&self, step_number: u32) -> bool {
        step_number >= self.total_steps
    }

    /// Move to `step_number`, clamped to the valid range.
    pub fn advance_to(&mut self, step_number: u32) {
        self.current_step_number = step_number.clamp(1, self.total_steps.max(1));
    }

    pub fn active_route(&self) -> Option<&Route> {
        match &self.phase {
            Phase::Navigating { route, .. } => Some(route),
            _ => None,
        }
    }
}

/// Read-only view of the session, published after every transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestSnapshot {
    pub phase: PhaseKind,
    pub quest_id: Option<QuestId>,
    pub quest_title: Option<String>,
    pub current_step_number: Option<u32>,
    pub total_steps: Option<u32>,
    pub starts_at: Option<DateTime<Utc>>,
    pub last_known_location: Option<Location>,
    pub active_route: Option<Route>,
    pub total_xp: u64,
    pub rank: u8,
    pub rank_name: &'static str,
}

impl QuestSnapshot {
    pub fn build(state: Option<&UserQuestState>, profile: &RankProfile) -> Self {
        let starts_at = state.and_then(|s| match &s.phase {
            Phase::Waiting { starts_at } => Some(*starts_at),
            _ => None,
        });

        Self {
            phase: state.map_or(PhaseKind::Idle, |s| s.phase.kind()),
            quest_id: state.map(|s| s.quest_id()),
            quest_title: state.map(|s| s.quest.title.clone()),
            current_step_number: state.map(|s| s.current_step_number),
            total_steps: state.map(|s| s.total_steps),
            starts_at,
            last_known_location: state.and_then(|s| s.last_known_location),
            active_route: state.and_then(|s| s.active_route().cloned()),
            total_xp: profile.total_xp,
            rank: profile.rank(),
            rank_name: profile.rank_name(),
        }
    }
}
