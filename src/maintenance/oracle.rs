use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::OracleError;

/// Default bound on one oracle round trip.
pub const DEFAULT_ORACLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Wear snapshot sent to the oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleRequest {
    pub stage_id: String,
    pub runtime: f64,
    pub failure_probability: f64,
}

/// The oracle's answer. Any other shape is malformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct OracleResponse {
    pub need_maintenance: bool,
}

/// Remote decision service consulted for maintenance timing.
#[async_trait]
pub trait MaintenanceOracle: Send + Sync {
    async fn decide(&self, req: &OracleRequest) -> Result<bool, OracleError>;
}

/// Oracle reached over HTTP: `POST url` with an [`OracleRequest`] body.
pub struct HttpOracle {
    client: Client,
    url: String,
}

impl HttpOracle {
    /// `timeout` bounds both connecting and the whole round trip; hitting it
    /// yields [`OracleError::Timeout`].
    pub fn new(url: String, timeout: Duration) -> Result<Self, OracleError> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl MaintenanceOracle for HttpOracle {
    async fn decide(&self, req: &OracleRequest) -> Result<bool, OracleError> {
        let response = self
            .client
            .post(&self.url)
            .json(req)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(OracleError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.text().await.map_err(classify)?;
        let decision: OracleResponse =
            serde_json::from_str(&body).map_err(|e| OracleError::Malformed(e.to_string()))?;
        Ok(decision.need_maintenance)
    }
}

fn classify(err: reqwest::Error) -> OracleError {
    if err.is_timeout() {
        OracleError::Timeout
    } else {
        OracleError::Network(err)
    }
}
