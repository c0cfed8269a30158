//! Quest backend boundary.
//!
//! The backend owns quests, step acceptance, and XP. The core talks to it
//! through [`QuestBackend`]; [`crate::rpc::RpcBackend`] is the HTTP
//! implementation.

use std::cmp::Ordering;

use async_trait::async_trait;
use tracing::debug;

use questwalk_shared::protocol::{CompleteStepResponse, StartQuestResponse};
use questwalk_shared::types::{Location, Quest, QuestId, QuestStep, StepId};

use crate::error::BackendError;

#[async_trait]
pub trait QuestBackend: Send + Sync {
    async fn get_available_quests(
        &self,
        location: Location,
        max_distance_km: f64,
    ) -> Result<Vec<Quest>, BackendError>;

    async fn start_quest(&self, quest_id: QuestId) -> Result<StartQuestResponse, BackendError>;

    async fn get_quest_detail(&self, quest_id: QuestId) -> Result<Vec<QuestStep>, BackendError>;

    async fn complete_step(
        &self,
        quest_id: QuestId,
        step_id: StepId,
        location: Location,
    ) -> Result<CompleteStepResponse, BackendError>;

    /// Returns the XP awarded for the quest.
    async fn complete_quest(&self, quest_id: QuestId) -> Result<i64, BackendError>;

    async fn update_user_location(&self, location: Location) -> Result<(), BackendError>;
}

/// Fetch quests near `location`, drop those outside `max_distance_km` or with
/// invalid coordinates, and sort nearest first.
///
/// Distances are recomputed locally from each quest's anchor; quests without
/// an anchor keep the backend-reported `distance_km` and sort last when that
/// is missing too.
pub async fn discover_quests(
    backend: &dyn QuestBackend,
    location: Location,
    max_distance_km: f64,
) -> Result<Vec<Quest>, BackendError> {
    let quests = backend.get_available_quests(location, max_distance_km).await?;
    let fetched = quests.len();

    let mut nearby: Vec<Quest> = quests
        .into_iter()
        .filter_map(|mut quest| {
            if let Some(anchor) = quest.location {
                if anchor.validated().is_err() {
                    return None;
                }
                quest.distance_km = Some(location.distance_to(&anchor) / 1000.0);
            }
            match quest.distance_km {
                Some(d) if d > max_distance_km => None,
                _ => Some(quest),
            }
        })
        .collect();

    nearby.sort_by(|a, b| match (a.distance_km, b.distance_km) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });

    debug!(fetched, kept = nearby.len(), max_distance_km, "Discovered nearby quests");
    Ok(nearby)
}
