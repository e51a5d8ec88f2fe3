//! Award dispatch: the irreversible side effect of an approval.
//!
//! The engine calls [`AwardDispatcher::award`] exactly once per claimed
//! merge. Implementations report one of three outcomes; `Unknown` means the
//! request may have been processed (timeouts, dropped responses, gateway
//! errors) and must not be treated as a failure.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AwardRequest {
    pub project_id: String,
    pub recipient: String,
    pub reward: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AwardOutcome {
    Granted(String),
    Failed(String),
    Unknown(String),
}

#[async_trait]
pub trait AwardDispatcher: Send + Sync {
    async fn award(&self, request: &AwardRequest) -> AwardOutcome;
}

/// `{success, message}` as answered by the award service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwardReceipt {
    pub success: bool,
    #[serde(default)]
    pub message: String,
}

/// Posts award requests to an external service.
pub struct HttpAwardDispatcher {
    client: Client,
    url: String,
}

impl HttpAwardDispatcher {
    pub fn new(url: impl Into<String>, timeout: Duration) -> reqwest::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl AwardDispatcher for HttpAwardDispatcher {
    async fn award(&self, request: &AwardRequest) -> AwardOutcome {
        debug!(
            "Dispatching award for project {} to {}",
            request.project_id, request.recipient
        );

        let response = match self.client.post(&self.url).json(request).send().await {
            Ok(resp) => resp,
            // Nothing reached the service.
            Err(e) if e.is_connect() || e.is_builder() => {
                warn!("Award service unreachable: {e}");
                return AwardOutcome::Failed(format!("award service unreachable: {e}"));
            }
            Err(e) => {
                warn!("Award request outcome unknown: {e}");
                return AwardOutcome::Unknown(e.to_string());
            }
        };

        let status = response.status();
        // A gateway error or request timeout says nothing about whether the
        // service already paid.
        if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
            warn!("Award request outcome unknown: service returned {status}");
            return AwardOutcome::Unknown(format!("award service returned {status}"));
        }
        if !status.is_success() {
            warn!("Award rejected: service returned {status}");
            return AwardOutcome::Failed(format!("award service returned {status}"));
        }

        match response.json::<AwardReceipt>().await {
            Ok(receipt) if receipt.success => AwardOutcome::Granted(receipt.message),
            Ok(receipt) => AwardOutcome::Failed(receipt.message),
            Err(e) => AwardOutcome::Unknown(format!("unreadable award response: {e}")),
        }
    }
}

/// Used when no award service is configured: records the award in the log.
#[derive(Debug, Default)]
pub struct LogAwardDispatcher;

#[async_trait]
impl AwardDispatcher for LogAwardDispatcher {
    async fn award(&self, request: &AwardRequest) -> AwardOutcome {
        info!(
            "Award granted (log only): project={} recipient={} reward={}",
            request.project_id, request.recipient, request.reward
        );
        AwardOutcome::Granted("recorded".to_string())
    }
}
