//! Owner approval of a submission.

use serde::Serialize;

use crate::auth::{authorize, Intent, SignedProof};
use crate::engine::{Engine, MergeCommit, MergeContext, MergeTrigger};
use crate::errors::{EngineError, Result, StateConflict};
use crate::models::{ProjectStatus, Submission};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Approval {
    pub submission: Submission,
    pub project_id: String,
    pub award_message: String,
}

impl Engine {
    /// Approve `submission_id` on behalf of `approver`.
    ///
    /// Checks run in order and any failure leaves the store untouched:
    /// submission exists, project exists, approver owns the project (plus a
    /// proof when the approval policy asks for one), project is open,
    /// submission is not merged. The merge and the award then happen through
    /// [`Engine::commit_merge`]; a repeated approval fails with
    /// `InvalidState` and never reaches the dispatcher.
    pub async fn approve(
        &self,
        submission_id: &str,
        approver: &str,
        proof: Option<&SignedProof>,
    ) -> Result<Approval> {
        let submission = self.load_submission(submission_id).await?;
        let project = self.load_project(&submission.project_id).await?;

        authorize(&project.owner, Some(approver)).into_result()?;
        self.verifier.check(
            self.policy.approvals,
            &Intent::ApproveSubmission { submission_id },
            approver,
            proof,
        )?;

        if project.status == ProjectStatus::Closed {
            return Err(EngineError::InvalidState(StateConflict::ProjectClosed));
        }
        if submission.merged {
            return Err(EngineError::InvalidState(StateConflict::AlreadyMerged));
        }

        let project_id = project.id.clone();
        let commit = self
            .commit_merge(MergeContext {
                project,
                submission,
                trigger: MergeTrigger::Approval {
                    approver: approver.to_string(),
                },
            })
            .await?;

        match commit {
            MergeCommit::Committed {
                submission,
                award_message,
            } => Ok(Approval {
                submission,
                project_id,
                award_message,
            }),
            MergeCommit::AlreadyMerged => {
                Err(EngineError::InvalidState(StateConflict::AlreadyMerged))
            }
            MergeCommit::ProjectClosed => {
                Err(EngineError::InvalidState(StateConflict::ProjectClosed))
            }
        }
    }
}
