use serde::Serialize;

use questwalk_shared::types::QuestId;

use crate::state::PhaseKind;

pub const EVENT_PHASE_CHANGED: &str = "phase-changed";
pub const EVENT_ROUTE_UPDATED: &str = "route-updated";
pub const EVENT_ARRIVED_AT_STEP: &str = "arrived-at-step";
pub const EVENT_STEP_COMPLETED: &str = "step-completed";
pub const EVENT_QUEST_COMPLETED: &str = "quest-completed";
pub const EVENT_QUEST_ERROR: &str = "quest-error";

/// Notifications broadcast by the controller to UI and other observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuestNotification {
    PhaseChanged {
        from: PhaseKind,
        to: PhaseKind,
    },
    RouteUpdated {
        leg: u64,
        distance_m: f64,
        duration_s: f64,
    },
    ArrivedAtStep {
        step_number: u32,
        distance_m: f64,
    },
    StepCompleted {
        step_number: u32,
        next_step_number: Option<u32>,
        total_steps: u32,
    },
    QuestCompleted {
        quest_id: QuestId,
        xp_reward: i64,
        total_xp: u64,
        rank: u8,
        rank_name: &'static str,
        leveled_up: bool,
    },
    Error {
        action: &'static str,
        message: String,
        retryable: bool,
    },
}

impl QuestNotification {
    pub fn event_name(&self) -> &'static str {
        match self {
            QuestNotification::PhaseChanged { .. } => EVENT_PHASE_CHANGED,
            QuestNotification::RouteUpdated { .. } => EVENT_ROUTE_UPDATED,
            QuestNotification::ArrivedAtStep { .. } => EVENT_ARRIVED_AT_STEP,
            QuestNotification::StepCompleted { .. } => EVENT_STEP_COMPLETED,
            QuestNotification::QuestCompleted { .. } => EVENT_QUEST_COMPLETED,
            QuestNotification::Error { .. } => EVENT_QUEST_ERROR,
        }
    }
}
