//! Request/response payloads for the quest backend RPCs.
//!
//! Every response arrives wrapped in an [`RpcEnvelope`] carrying a
//! success/error discriminant. Payloads are narrowed into these types
//! before the core reads any field.

use serde::{Deserialize, Serialize};

use crate::types::{Location, Quest, QuestId, QuestStep, StepId};

pub const RPC_GET_AVAILABLE_QUESTS: &str = "get_available_quests";
pub const RPC_START_QUEST: &str = "start_quest";
pub const RPC_GET_QUEST_DETAIL: &str = "get_quest_detail";
pub const RPC_COMPLETE_STEP: &str = "complete_step";
pub const RPC_COMPLETE_QUEST: &str = "complete_quest";
pub const RPC_UPDATE_USER_LOCATION: &str = "update_user_location";

/// Success/error wrapper around every RPC response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcEnvelope<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    /// The backend reported a failure.
    Rejected(String),
    /// `success` was set but no payload came with it.
    MissingData,
}

impl<T> RpcEnvelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }

    pub fn into_result(self) -> Result<T, EnvelopeError> {
        if !self.success {
            return Err(EnvelopeError::Rejected(
                self.error.unwrap_or_else(|| "unspecified backend error".into()),
            ));
        }
        self.data.ok_or(EnvelopeError::MissingData)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetAvailableQuestsRequest {
    pub latitude: f64,
    pub longitude: f64,
    pub max_distance_km: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailableQuestsResponse {
    #[serde(default)]
    pub quests: Vec<Quest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestRequest {
    pub quest_id: QuestId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartQuestResponse {
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestDetailResponse {
    #[serde(default)]
    pub steps: Vec<QuestStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteStepRequest {
    pub quest_id: QuestId,
    pub step_id: StepId,
    pub latitude: f64,
    pub longitude: f64,
}

impl CompleteStepRequest {
    pub fn new(quest_id: QuestId, step_id: StepId, location: Location) -> Self {
        Self {
            quest_id,
            step_id,
            latitude: location.latitude,
            longitude: location.longitude,
        }
    }
}

/// `current_step` and `total_steps` are optional: the backend omits them on
/// some paths and the client falls back to its own bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompleteStepResponse {
    #[serde(default)]
    pub quest_completed: bool,
    #[serde(default)]
    pub current_step: Option<u32>,
    #[serde(default)]
    pub total_steps: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteQuestResponse {
    pub xp_reward: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateLocationRequest {
    pub latitude: f64,
    pub longitude: f64,
}

impl From<Location> for UpdateLocationRequest {
    fn from(location: Location) -> Self {
        Self {
            latitude: location.latitude,
            longitude: location.longitude,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Ack {
    #[serde(default)]
    pub ok: bool,
}
