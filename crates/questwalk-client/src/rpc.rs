//! HTTP implementation of [`QuestBackend`].
//!
//! Each RPC is a JSON `POST {backend_url}/rest/v1/rpc/{method}` whose
//! response body is an [`RpcEnvelope`].

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, instrument};

use questwalk_shared::protocol::{
    Ack, AvailableQuestsResponse, CompleteQuestResponse, CompleteStepRequest,
    CompleteStepResponse, EnvelopeError, GetAvailableQuestsRequest, QuestDetailResponse,
    QuestRequest, RpcEnvelope, StartQuestResponse, UpdateLocationRequest,
    RPC_COMPLETE_QUEST, RPC_COMPLETE_STEP, RPC_GET_AVAILABLE_QUESTS, RPC_GET_QUEST_DETAIL,
    RPC_START_QUEST, RPC_UPDATE_USER_LOCATION,
};
use questwalk_shared::types::{Location, Quest, QuestId, QuestStep, StepId};

use crate::backend::QuestBackend;
use crate::config::ClientConfig;
use crate::error::BackendError;

pub struct RpcBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl RpcBackend {
    pub fn new(config: &ClientConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(config.rpc_timeout)
            .build()
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.backend_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn rpc_url(&self, method: &str) -> String {
        format!("{}/rest/v1/rpc/{}", self.base_url, method)
    }

    async fn call<Req, Resp>(&self, method: &str, body: &Req) -> Result<Resp, BackendError>
    where
        Req: Serialize + Sync + ?Sized,
        Resp: DeserializeOwned,
    {
        let mut request = self.client.post(self.rpc_url(method)).json(body);
        if let Some(key) = &self.api_key {
            request = request.header("apikey", key).bearer_auth(key);
        }

        let resp = request.send().await.map_err(|e| {
            if e.is_timeout() {
                BackendError::Timeout
            } else {
                BackendError::Transport(e.to_string())
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(BackendError::Http {
                status: status.as_u16(),
            });
        }

        let text = resp
            .text()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        let envelope: RpcEnvelope<Resp> =
            serde_json::from_str(&text).map_err(|e| BackendError::Malformed(e.to_string()))?;

        debug!(method, success = envelope.success, "RPC response");
        envelope.into_result().map_err(|e| match e {
            EnvelopeError::Rejected(message) => BackendError::Rejected(message),
            EnvelopeError::MissingData => {
                BackendError::Malformed(format!("{method}: success without data"))
            }
        })
    }
}

#[async_trait]
impl QuestBackend for RpcBackend {
    #[instrument(level = "debug", skip(self))]
    async fn get_available_quests(
        &self,
        location: Location,
        max_distance_km: f64,
    ) -> Result<Vec<Quest>, BackendError> {
        let req = GetAvailableQuestsRequest {
            latitude: location.latitude,
            longitude: location.longitude,
            max_distance_km,
        };
        let resp: AvailableQuestsResponse = self.call(RPC_GET_AVAILABLE_QUESTS, &req).await?;
        Ok(resp.quests)
    }

    #[instrument(level = "debug", skip(self))]
    async fn start_quest(&self, quest_id: QuestId) -> Result<StartQuestResponse, BackendError> {
        self.call(RPC_START_QUEST, &QuestRequest { quest_id }).await
    }

    #[instrument(level = "debug", skip(self))]
    async fn get_quest_detail(&self, quest_id: QuestId) -> Result<Vec<QuestStep>, BackendError> {
        let resp: QuestDetailResponse = self
            .call(RPC_GET_QUEST_DETAIL, &QuestRequest { quest_id })
            .await?;
        Ok(resp.steps)
    }

    #[instrument(level = "debug", skip(self))]
    async fn complete_step(
        &self,
        quest_id: QuestId,
        step_id: StepId,
        location: Location,
    ) -> Result<CompleteStepResponse, BackendError> {
        let req = CompleteStepRequest::new(quest_id, step_id, location);
        self.call(RPC_COMPLETE_STEP, &req).await
    }

    #[instrument(level = "debug", skip(self))]
    async fn complete_quest(&self, quest_id: QuestId) -> Result<i64, BackendError> {
        let resp: CompleteQuestResponse = self
            .call(RPC_COMPLETE_QUEST, &QuestRequest { quest_id })
            .await?;
        Ok(resp.xp_reward)
    }

    async fn update_user_location(&self, location: Location) -> Result<(), BackendError> {
        let _: Ack = self
            .call(RPC_UPDATE_USER_LOCATION, &UpdateLocationRequest::from(location))
            .await?;
        Ok(())
    }
}
