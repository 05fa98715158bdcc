use agentdb_types::{AgentDbError, Cid};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use crate::{BackendError, BlockBackend, StoreConfig};

/// Content network reached over HTTP: uploads go to an authenticated
/// endpoint, reads go through a public `/ipfs/<cid>/<filename>` gateway.
#[derive(Clone)]
pub struct HttpBackend {
    http: reqwest::Client,
    upload_url: Option<String>,
    gateway_url: String,
    auth_token: Option<String>,
}

#[derive(Deserialize)]
struct UploadResponse {
    cid: String,
}

impl HttpBackend {
    pub fn new(config: &StoreConfig) -> Result<Self, AgentDbError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AgentDbError::Validation(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            http,
            upload_url: config.upload_url.clone(),
            gateway_url: config.gateway_url.trim_end_matches('/').to_string(),
            auth_token: config.auth_token.clone(),
        })
    }
}

/// Map a non-success HTTP status onto the backend error taxonomy.
pub fn classify(status: StatusCode, body: String) -> BackendError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BackendError::Unauthenticated(body),
        StatusCode::NOT_FOUND | StatusCode::GONE => BackendError::NotFound,
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            BackendError::Transient(format!("{status}: {body}"))
        }
        s if s.is_client_error() => BackendError::Rejected {
            status: s.as_u16(),
            message: body,
        },
        s => BackendError::Transient(format!("{s}: {body}")),
    }
}

#[async_trait]
impl BlockBackend for HttpBackend {
    async fn put(
        &self,
        bytes: &[u8],
        filename: &str,
        mime_type: &str,
    ) -> Result<Cid, BackendError> {
        let (Some(upload_url), Some(token)) = (&self.upload_url, &self.auth_token) else {
            return Err(BackendError::Unauthenticated(
                "no upload endpoint or token configured".into(),
            ));
        };
        let url = format!("{upload_url}/upload");
        let resp = self
            .http
            .post(&url)
            .bearer_auth(token)
            .header("Content-Type", mime_type)
            .header("X-Name", filename)
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(|e| BackendError::Transient(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify(status, body));
        }

        let body: UploadResponse = resp
            .json()
            .await
            .map_err(|e| BackendError::Transient(format!("unreadable upload response: {e}")))?;
        let cid = Cid::parse(&body.cid).map_err(|e| BackendError::Rejected {
            status: status.as_u16(),
            message: e.to_string(),
        })?;
        debug!(%cid, filename, size = bytes.len(), "upload accepted");
        Ok(cid)
    }

    async fn get(&self, cid: &Cid, filename: &str) -> Result<Vec<u8>, BackendError> {
        let url = format!("{}/ipfs/{cid}/{filename}", self.gateway_url);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| BackendError::Transient(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify(status, body));
        }
        resp.bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| BackendError::Transient(e.to_string()))
    }
}
