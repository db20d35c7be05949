//! HTTP dispatcher
//!
//! One POST per mutation kind against the factory API:
//!
//! | kind         | endpoint                                   |
//! |--------------|--------------------------------------------|
//! | `attendance` | `POST /api/attendance`                     |
//! | `work_entry` | `POST /api/work-entries`                   |
//! | `validation` | `POST /api/work-entries/{id}/validation`   |
//!
//! The JSON body is the payload itself; the mutation id travels in the
//! `Idempotency-Key` header.

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;

use super::{DispatchError, DispatchReceipt, RemoteDispatch};
use crate::client::config::Config;
use crate::shared::{MutationPayload, QueuedMutation};

/// Header carrying the client-generated mutation id
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Dispatches mutations over the REST API
#[derive(Debug, Clone)]
pub struct HttpDispatcher {
    client: Client,
    config: Config,
}

#[derive(Debug, Deserialize)]
struct CreatedResource {
    id: Option<serde_json::Value>,
}

impl HttpDispatcher {
    pub fn new(config: Config) -> Self {
        Self::with_client(Client::new(), config)
    }

    pub fn with_client(client: Client, config: Config) -> Self {
        Self { client, config }
    }

    fn endpoint(&self, payload: &MutationPayload) -> Result<Url, DispatchError> {
        let base = match payload {
            MutationPayload::Attendance(_) => self.config.api_url("/api/attendance"),
            MutationPayload::WorkEntry(_) | MutationPayload::Validation(_) => {
                self.config.api_url("/api/work-entries")
            }
        };
        let mut url = Url::parse(&base)
            .map_err(|e| DispatchError::Network(format!("invalid endpoint {}: {}", base, e)))?;

        if let MutationPayload::Validation(p) = payload {
            url.path_segments_mut()
                .map_err(|_| DispatchError::Network(format!("endpoint {} cannot take a path", base)))?
                .push(&p.work_entry_id)
                .push("validation");
        }
        Ok(url)
    }
}

#[async_trait]
impl RemoteDispatch for HttpDispatcher {
    async fn dispatch(
        &self,
        mutation: &QueuedMutation,
        access_token: &str,
    ) -> Result<DispatchReceipt, DispatchError> {
        let url = self.endpoint(&mutation.payload)?;
        let body = mutation
            .payload
            .body()
            .map_err(|e| DispatchError::Validation(e.to_string()))?;

        let response = self
            .client
            .post(url)
            .bearer_auth(access_token)
            .header(IDEMPOTENCY_KEY_HEADER, mutation.id.to_string())
            .json(&body)
            .send()
            .await
            .map_err(|e| DispatchError::Network(format!("Network error: {}", e)))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_else(|_| status.to_string());

        if !status.is_success() {
            return Err(classify_status(status, text));
        }

        // Empty or non-JSON success bodies are fine; the id is optional.
        let server_id = serde_json::from_str::<CreatedResource>(&text)
            .ok()
            .and_then(|created| created.id)
            .map(|id| match id {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            });

        Ok(DispatchReceipt { server_id })
    }
}

/// Map a non-success status to the dispatch failure taxonomy
pub fn classify_status(status: StatusCode, detail: String) -> DispatchError {
    let detail = format!("{} - {}", status, detail);
    match status {
        StatusCode::UNAUTHORIZED => DispatchError::Authorization(detail),
        StatusCode::CONFLICT => DispatchError::Conflict(detail),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            DispatchError::Network(detail)
        }
        s if s.is_server_error() => DispatchError::Network(detail),
        _ => DispatchError::Validation(detail),
    }
}
