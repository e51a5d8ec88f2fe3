//! Submission lifecycle: `{absent} → pending → merged`.
//!
//! Creation and deletion live here; the `pending → merged` transition belongs
//! to [`Engine::commit_merge`]. Reads are public.

use tracing::info;

use crate::auth::{authorize, Intent, ProofMode, SignedProof};
use crate::db;
use crate::engine::Engine;
use crate::errors::{EngineError, Result, StateConflict};
use crate::models::{NewSubmission, ProjectStatus, PullRequestRef, Submission};
use crate::signature::normalize_address;

impl Engine {
    /// Record a new pending submission against an open project.
    ///
    /// Repeated submissions for the same project and submitter are allowed.
    pub async fn create_submission(
        &self,
        project_id: &str,
        submitter: &str,
        work_reference: &str,
        proof: Option<&SignedProof>,
    ) -> Result<Submission> {
        let submitter = normalize_address(submitter)
            .map_err(|_| EngineError::Validation(format!("`{submitter}` is not a wallet address")))?;
        let work_reference = work_reference.trim();
        if work_reference.is_empty() {
            return Err(EngineError::Validation(
                "work reference must not be empty".to_string(),
            ));
        }

        let project = self.load_project(project_id).await?;
        self.verifier.check(
            self.policy.submissions,
            &Intent::CreateSubmission {
                project_id,
                work_reference,
            },
            &submitter,
            proof,
        )?;
        if project.status == ProjectStatus::Closed {
            return Err(EngineError::InvalidState(StateConflict::ProjectClosed));
        }

        let new = NewSubmission {
            project_id: project.id,
            submitter,
            work_reference: work_reference.to_string(),
            correlation: PullRequestRef::from_link(work_reference),
        };
        let submission = db::insert_submission(&self.pool, &new).await?;
        info!(
            "Submission {} created for project {} by {}",
            submission.id, submission.project_id, submission.submitter
        );
        Ok(submission)
    }

    pub async fn get_submission(&self, id: &str) -> Result<Submission> {
        self.load_submission(id).await
    }

    pub async fn list_submissions(&self) -> Result<Vec<Submission>> {
        db::list_submissions(&self.pool).await
    }

    pub async fn list_project_submissions(&self, project_id: &str) -> Result<Vec<Submission>> {
        self.load_project(project_id).await?;
        db::list_submissions_for_project(&self.pool, project_id).await
    }

    /// Remove a pending submission. Only its submitter may do so, with a
    /// signed `DeleteSubmission` proof. Merged submissions are kept.
    pub async fn delete_submission(
        &self,
        id: &str,
        caller: &str,
        proof: Option<&SignedProof>,
    ) -> Result<()> {
        let submission = self.load_submission(id).await?;

        authorize(&submission.submitter, Some(caller)).into_result()?;
        self.verifier.check(
            ProofMode::Required,
            &Intent::DeleteSubmission { submission_id: id },
            caller,
            proof,
        )?;
        if submission.merged {
            return Err(EngineError::InvalidState(StateConflict::AlreadyMerged));
        }

        if db::delete_submission(&self.pool, id).await? == 0 {
            // Merged or removed since it was read.
            return match db::get_submission_by_id(&self.pool, id).await? {
                Some(_) => Err(EngineError::InvalidState(StateConflict::AlreadyMerged)),
                None => Err(EngineError::not_found("submission", id)),
            };
        }
        info!("Submission {id} deleted by {caller}");
        Ok(())
    }
}
