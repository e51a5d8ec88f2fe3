//! Shared engine state and the merge-and-award primitive.
//!
//! Human approvals ([`crate::approval`]) and merge webhooks
//! ([`crate::webhook`]) both end in [`Engine::commit_merge`]. Each entry point
//! is responsible only for producing an authorized [`MergeContext`]; the
//! primitive owns the at-most-one-award guarantee.
//!
//! The primitive runs in three steps and never keeps a transaction open
//! while the dispatcher is working:
//!
//! 1. **Claim.** One conditional update marks the open project `awarding`
//!    for this submission. Only one caller can win it; everyone else sees the
//!    claim at once and gets a conflict instead of waiting on a write lock.
//! 2. **Dispatch.** The winner calls the [`AwardDispatcher`].
//! 3. **Finish.** A granted award merges the submission and closes the
//!    project in one short transaction. A failed award releases the claim so
//!    the merge can be retried. An unknown outcome records the merge but keeps
//!    the claim, which blocks any further award until someone reconciles it.

use std::fmt;
use std::sync::Arc;

use sqlx::SqlitePool;
use tracing::{debug, error, info, warn};

use crate::auth::{ProofPolicy, ProofVerifier};
use crate::award::{AwardDispatcher, AwardOutcome, AwardRequest};
use crate::db;
use crate::errors::{EngineError, Result};
use crate::models::{AwardState, Project, PullRequestRef, Submission};

pub struct Engine {
    pub(crate) pool: SqlitePool,
    pub(crate) verifier: ProofVerifier,
    pub(crate) policy: ProofPolicy,
    pub(crate) dispatcher: Arc<dyn AwardDispatcher>,
}

/// What authorized a merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeTrigger {
    /// The project owner approved the submission.
    Approval { approver: String },
    /// The code host reported the linked pull request as merged.
    Webhook { pull_request: PullRequestRef },
}

impl fmt::Display for MergeTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Approval { approver } => write!(f, "approval by {approver}"),
            Self::Webhook { pull_request } => write!(
                f,
                "merge of {}/{}#{}",
                pull_request.owner, pull_request.repo, pull_request.number
            ),
        }
    }
}

/// An already-authorized request to merge `submission` and award its submitter.
#[derive(Debug, Clone)]
pub struct MergeContext {
    pub project: Project,
    pub submission: Submission,
    pub trigger: MergeTrigger,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeCommit {
    Committed {
        submission: Submission,
        award_message: String,
    },
    /// Another caller merged this submission, or is awarding it, first.
    AlreadyMerged,
    /// The project was closed, or claimed for a rival submission, first.
    ProjectClosed,
}

impl Engine {
    pub fn new(
        pool: SqlitePool,
        verifier: ProofVerifier,
        policy: ProofPolicy,
        dispatcher: Arc<dyn AwardDispatcher>,
    ) -> Self {
        Self {
            pool,
            verifier,
            policy,
            dispatcher,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub(crate) async fn load_project(&self, id: &str) -> Result<Project> {
        db::get_project_by_id(&self.pool, id)
            .await?
            .ok_or_else(|| EngineError::not_found("project", id))
    }

    pub(crate) async fn load_submission(&self, id: &str) -> Result<Submission> {
        db::get_submission_by_id(&self.pool, id)
            .await?
            .ok_or_else(|| EngineError::not_found("submission", id))
    }

    /// Merge the submission, close the project and dispatch the award, at
    /// most once per open period. See the module docs for the steps.
    pub async fn commit_merge(&self, ctx: MergeContext) -> Result<MergeCommit> {
        let MergeContext {
            project,
            mut submission,
            trigger,
        } = ctx;

        if db::claim_award(&self.pool, &project.id, &submission.id).await? == 0 {
            return self.claim_conflict(&project.id, &submission.id).await;
        }
        debug!(
            "Project {} claimed for submission {} ({trigger})",
            project.id, submission.id
        );

        let request = AwardRequest {
            project_id: project.id.clone(),
            recipient: submission.submitter.clone(),
            reward: project.reward.clone(),
        };

        match self.dispatcher.award(&request).await {
            AwardOutcome::Granted(message) => {
                self.record_merge(&project.id, &submission.id, AwardState::Awarded)
                    .await
                    .map_err(|e| {
                        error!(
                            "Award granted but merge not recorded: project={} submission={} recipient={}: {e}",
                            project.id, submission.id, submission.submitter
                        );
                        EngineError::Inconsistent(format!(
                            "award for submission {} granted but not recorded",
                            submission.id
                        ))
                    })?;
                info!(
                    "Submission {} merged ({trigger}); project {} closed and awarded to {}",
                    submission.id, project.id, submission.submitter
                );
                submission.merged = true;
                Ok(MergeCommit::Committed {
                    submission,
                    award_message: message,
                })
            }
            AwardOutcome::Failed(reason) => {
                match db::release_award_claim(&self.pool, &project.id, &submission.id).await {
                    Ok(_) => warn!(
                        "Award for submission {} failed, claim released: {reason}",
                        submission.id
                    ),
                    Err(e) => error!(
                        "Award for submission {} failed and its claim on project {} was not released: {e}",
                        submission.id, project.id
                    ),
                }
                Err(EngineError::DispatchFailure(reason))
            }
            AwardOutcome::Unknown(reason) => {
                let recorded = self
                    .record_merge(&project.id, &submission.id, AwardState::Awarding)
                    .await;
                error!(
                    "Award outcome unknown, reconcile manually: project={} submission={} recipient={} recorded={}: {reason}",
                    project.id,
                    submission.id,
                    submission.submitter,
                    recorded.is_ok()
                );
                match recorded {
                    Ok(()) => Err(EngineError::DispatchUnknown(reason)),
                    Err(e) => Err(EngineError::Inconsistent(format!(
                        "award outcome unknown and merge not recorded: {e}"
                    ))),
                }
            }
        }
    }

    /// Mark the submission merged and close the claimed project, leaving the
    /// claim in `state`. Both rows change or neither does.
    async fn record_merge(
        &self,
        project_id: &str,
        submission_id: &str,
        state: AwardState,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let merged = db::conditional_update_submission_merged(&mut *tx, submission_id).await?;
        let closed = db::record_award(&mut *tx, project_id, submission_id, state).await?;
        if merged == 0 || closed == 0 {
            tx.rollback().await?;
            return Err(EngineError::Inconsistent(format!(
                "claim on project {project_id} for submission {submission_id} was lost"
            )));
        }
        tx.commit().await?;
        Ok(())
    }

    /// Explain a lost claim: the submission is merged or being awarded, the
    /// project is closed or busy with a rival, or the submission is gone.
    async fn claim_conflict(&self, project_id: &str, submission_id: &str) -> Result<MergeCommit> {
        let submission = self.load_submission(submission_id).await?;
        let claim = db::get_award_claim(&self.pool, project_id)
            .await?
            .ok_or_else(|| EngineError::not_found("project", project_id))?;
        if submission.merged || claim.is_awarding(submission_id) {
            Ok(MergeCommit::AlreadyMerged)
        } else {
            Ok(MergeCommit::ProjectClosed)
        }
    }
}
