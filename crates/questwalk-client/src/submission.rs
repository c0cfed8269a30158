//! Proof-of-visit payloads and the collaborator that uploads them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use questwalk_shared::types::{QuestId, QuestStep};

use crate::error::SubmissionError;

/// What the user hands in for a step. Which fields are mandatory depends on
/// the step's `requires_photo` / `requires_text` flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub photo_ref: Option<String>,
    pub text: Option<String>,
}

impl Submission {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_photo(mut self, photo_ref: impl Into<String>) -> Self {
        self.photo_ref = Some(photo_ref.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    fn has_photo(&self) -> bool {
        self.photo_ref.as_deref().is_some_and(|p| !p.trim().is_empty())
    }

    fn has_text(&self) -> bool {
        self.text.as_deref().is_some_and(|t| !t.trim().is_empty())
    }

    /// Check the payload against the step's requirements. Blank strings count
    /// as missing.
    pub fn check_requirements(&self, step: &QuestStep) -> Result<(), SubmissionError> {
        if step.requires_photo && !self.has_photo() {
            return Err(SubmissionError::MissingPhoto);
        }
        if step.requires_text && !self.has_text() {
            return Err(SubmissionError::MissingText);
        }
        Ok(())
    }
}

/// Uploads a submission to the backend before the step is reported complete.
#[async_trait]
pub trait SubmissionCollaborator: Send + Sync {
    async fn submit(
        &self,
        quest_id: QuestId,
        step: &QuestStep,
        submission: &Submission,
    ) -> Result<(), SubmissionError>;
}
