//! Merge-event ingestion from the code host.
//!
//! A `pull_request` delivery with `action = "closed"` and `merged = true`
//! whose repository and number match a stored submission is turned into the
//! same merge-and-award commit a human approval produces, without the owner
//! check. Trust rests on two settings passed in at construction:
//!
//! - `enabled`: when false every delivery is acknowledged as `disabled`
//!   before the payload is looked at.
//! - `shared_secret`: when set, deliveries must present it in
//!   `X-Webhook-Token`. When unset, the enablement flag is the only gate.
//!
//! Events that are not ours (other event types, unmerged closes, unknown pull
//! requests, already-merged submissions) are acknowledged, never errors.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::db;
use crate::engine::{Engine, MergeCommit, MergeContext, MergeTrigger};
use crate::errors::EngineError;
use crate::models::PullRequestRef;

pub const TOKEN_HEADER: &str = "x-webhook-token";
pub const EVENT_HEADER: &str = "x-github-event";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebhookSettings {
    pub enabled: bool,
    pub shared_secret: Option<String>,
}

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("missing webhook token")]
    MissingToken,

    #[error("invalid webhook token")]
    InvalidToken,

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl WebhookError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingToken | Self::InvalidToken => StatusCode::UNAUTHORIZED,
            Self::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            Self::Engine(e) => e.status_code(),
        }
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let body = match self {
            Self::MissingToken => "Missing token",
            Self::InvalidToken => "Invalid token",
            Self::InvalidPayload(_) => "Invalid payload",
            Self::Engine(e) => return e.into_response(),
        };
        (self.status_code(), body).into_response()
    }
}

/// Acknowledgement returned for every delivery that is not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WebhookAck {
    Disabled,
    NotMergeEvent,
    NoMatchingSubmission,
    AlreadyMerged { submission_id: String },
    ProjectClosed { submission_id: String },
    Awarded {
        submission_id: String,
        project_id: String,
    },
}

// ─────────────────────────────────────────────────────────
// Payload shapes (GitHub `pull_request` event)
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestEvent {
    pub action: String,
    pub pull_request: PullRequestPayload,
    pub repository: RepositoryPayload,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestPayload {
    pub number: i64,
    #[serde(default)]
    pub merged: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryPayload {
    pub name: String,
    pub owner: OwnerPayload,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OwnerPayload {
    pub login: String,
}

impl PullRequestEvent {
    pub fn is_merge(&self) -> bool {
        self.action == "closed" && self.pull_request.merged
    }

    pub fn pull_request_ref(&self) -> PullRequestRef {
        PullRequestRef {
            owner: self.repository.owner.login.clone(),
            repo: self.repository.name.clone(),
            number: self.pull_request.number,
        }
    }
}

/// One inbound delivery: relevant headers plus the raw body.
#[derive(Debug, Clone, Copy)]
pub struct Delivery<'a> {
    pub event: Option<&'a str>,
    pub token: Option<&'a str>,
    pub body: &'a [u8],
}

pub struct WebhookIngestion {
    settings: WebhookSettings,
    engine: Arc<Engine>,
}

impl WebhookIngestion {
    pub fn new(settings: WebhookSettings, engine: Arc<Engine>) -> Self {
        if settings.enabled && settings.shared_secret.is_none() {
            warn!("Webhook auto-award enabled without a shared secret; deliveries are trusted on the flag alone");
        }
        Self { settings, engine }
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    fn authenticate(&self, token: Option<&str>) -> Result<(), WebhookError> {
        let Some(secret) = self.settings.shared_secret.as_deref() else {
            return Ok(());
        };
        let token = token.ok_or(WebhookError::MissingToken)?;
        if bool::from(token.as_bytes().ct_eq(secret.as_bytes())) {
            Ok(())
        } else {
            Err(WebhookError::InvalidToken)
        }
    }

    pub async fn ingest(&self, delivery: Delivery<'_>) -> Result<WebhookAck, WebhookError> {
        if !self.settings.enabled {
            return Ok(WebhookAck::Disabled);
        }
        self.authenticate(delivery.token)?;

        if let Some(event) = delivery.event {
            if event != "pull_request" {
                debug!("Ignoring `{event}` delivery");
                return Ok(WebhookAck::NotMergeEvent);
            }
        }

        let event: PullRequestEvent = serde_json::from_slice(delivery.body)
            .map_err(|e| WebhookError::InvalidPayload(e.to_string()))?;
        self.process(&event).await
    }

    /// Apply a parsed event. Re-delivery of an applied merge is a no-op.
    pub async fn process(&self, event: &PullRequestEvent) -> Result<WebhookAck, WebhookError> {
        if !event.is_merge() {
            return Ok(WebhookAck::NotMergeEvent);
        }

        let pr = event.pull_request_ref();
        let Some(submission) = db::find_submission_by_pull_request(self.engine.pool(), &pr).await?
        else {
            debug!("No submission for {}/{}#{}", pr.owner, pr.repo, pr.number);
            return Ok(WebhookAck::NoMatchingSubmission);
        };

        let submission_id = submission.id.clone();
        if submission.merged {
            return Ok(WebhookAck::AlreadyMerged { submission_id });
        }
        let project = self.engine.load_project(&submission.project_id).await?;
        let project_id = project.id.clone();

        info!(
            "Merge event for {}/{}#{} matches submission {submission_id}",
            pr.owner, pr.repo, pr.number
        );
        let commit = self
            .engine
            .commit_merge(MergeContext {
                project,
                submission,
                trigger: MergeTrigger::Webhook { pull_request: pr },
            })
            .await?;

        Ok(match commit {
            MergeCommit::Committed { .. } => WebhookAck::Awarded {
                submission_id,
                project_id,
            },
            MergeCommit::AlreadyMerged => WebhookAck::AlreadyMerged { submission_id },
            MergeCommit::ProjectClosed => {
                warn!("Merged submission {submission_id} not awarded: project {project_id} is closed");
                WebhookAck::ProjectClosed { submission_id }
            }
        })
    }
}
