//! Call directory client.
//!
//! The directory (an external REST collaborator) owns call records and
//! the invited-participant roster; this client consumes its narrow
//! interface and nothing more. Who may call whom is its business, not
//! ours.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use campana_shared::types::{CallId, CallKind, CallStatus, ParticipantId};

#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("Directory request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Directory rejected request: {status} {message}")]
    Rejected { status: u16, message: String },
}

/// A call record as owned by the directory service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRecord {
    pub id: CallId,
    pub kind: CallKind,
    pub status: CallStatus,
    #[serde(default)]
    pub participant_ids: Vec<ParticipantId>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCall {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: CallKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct AddParticipant<'a> {
    user_id: &'a ParticipantId,
}

pub struct CallDirectory {
    base_url: String,
    bearer: String,
    http: reqwest::Client,
}

impl CallDirectory {
    pub fn new(base_url: impl Into<String>, bearer: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            bearer: bearer.into(),
            http: reqwest::Client::new(),
        }
    }

    pub async fn create(&self, request: &CreateCall) -> Result<CallRecord, DirectoryError> {
        let response = self
            .http
            .post(format!("{}/calls", self.base_url))
            .bearer_auth(&self.bearer)
            .json(request)
            .send()
            .await?;
        let record: CallRecord = checked(response).await?.json().await?;
        debug!(call = %record.id, "Call record created");
        Ok(record)
    }

    pub async fn end(&self, call_id: CallId) -> Result<CallRecord, DirectoryError> {
        let response = self
            .http
            .post(format!("{}/calls/{call_id}/end", self.base_url))
            .bearer_auth(&self.bearer)
            .send()
            .await?;
        let record: CallRecord = checked(response).await?.json().await?;
        debug!(call = %record.id, "Call record ended");
        Ok(record)
    }

    pub async fn add_participant(
        &self,
        call_id: CallId,
        user_id: &ParticipantId,
    ) -> Result<(), DirectoryError> {
        let response = self
            .http
            .post(format!("{}/calls/{call_id}/participants", self.base_url))
            .bearer_auth(&self.bearer)
            .json(&AddParticipant { user_id })
            .send()
            .await?;
        checked(response).await?;
        debug!(call = %call_id, user = %user_id.short(), "Participant added");
        Ok(())
    }
}

async fn checked(response: reqwest::Response) -> Result<reqwest::Response, DirectoryError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(DirectoryError::Rejected {
        status: status.as_u16(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_call_wire_shape() {
        let request = CreateCall {
            conversation_id: Some("conv-1".to_string()),
            kind: CallKind::Video,
            metadata: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["type"], "video");
        assert_eq!(json["conversationId"], "conv-1");
        assert!(json.get("metadata").is_none());
    }

    #[test]
    fn test_call_record_parses_without_roster() {
        let record: CallRecord = serde_json::from_str(
            r#"{"id":"6a63a121-9c57-4b52-a364-a0aa8de9f1b4","kind":"voice","status":"pending"}"#,
        )
        .unwrap();
        assert_eq!(record.status, CallStatus::Pending);
        assert!(record.participant_ids.is_empty());
    }
}
