//! Project creation and owner-driven project changes.

use serde::Deserialize;
use tracing::{info, warn};

use crate::auth::{authorize, Intent, ProofMode, SignedProof};
use crate::db;
use crate::engine::Engine;
use crate::errors::{EngineError, Result, StateConflict};
use crate::models::{validate_reward, NewProject, Project, ProjectStatus};
use crate::signature::normalize_address;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateProject {
    pub owner: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub reward: String,
    #[serde(default)]
    pub required_skills: Vec<String>,
    #[serde(default)]
    pub completion_skills: Vec<String>,
}

fn invalid_wallet(raw: &str) -> EngineError {
    EngineError::Validation(format!("`{raw}` is not a wallet address"))
}

impl Engine {
    pub async fn create_project(
        &self,
        req: CreateProject,
        proof: Option<&SignedProof>,
    ) -> Result<Project> {
        let owner = normalize_address(&req.owner).map_err(|_| invalid_wallet(&req.owner))?;
        let name = req.name.trim();
        if name.is_empty() {
            return Err(EngineError::Validation("name must not be empty".to_string()));
        }
        let reward = req.reward.trim();
        validate_reward(reward)?;

        self.verifier.check(
            self.policy.projects,
            &Intent::CreateProject { name, reward },
            &owner,
            proof,
        )?;

        let new = NewProject {
            name: name.to_string(),
            description: req.description,
            reward: reward.to_string(),
            owner,
            required_skills: req.required_skills,
            completion_skills: req.completion_skills,
        };
        let project = db::insert_project(&self.pool, &new).await?;
        info!("Project {} created by {}", project.id, project.owner);
        Ok(project)
    }

    pub async fn get_project(&self, id: &str) -> Result<Project> {
        self.load_project(id).await
    }

    pub async fn list_projects(&self) -> Result<Vec<Project>> {
        db::list_projects(&self.pool).await
    }

    /// Owner-initiated status change, including reopening a closed project.
    ///
    /// Reopening is allowed even when the project has already been awarded;
    /// the merged submission stays merged and a later approval can award again.
    /// No change is made while an award is in flight or awaiting
    /// reconciliation.
    pub async fn update_project_status(
        &self,
        project_id: &str,
        caller: &str,
        status: ProjectStatus,
        proof: Option<&SignedProof>,
    ) -> Result<Project> {
        let project = self.load_project(project_id).await?;

        authorize(&project.owner, Some(caller)).into_result()?;
        self.verifier.check(
            ProofMode::Required,
            &Intent::UpdateProjectStatus {
                project_id,
                status: status.as_str(),
            },
            caller,
            proof,
        )?;

        let conflict = match status {
            ProjectStatus::Open => StateConflict::ProjectOpen,
            ProjectStatus::Closed => StateConflict::ProjectClosed,
        };
        if project.status == status {
            return Err(EngineError::InvalidState(conflict));
        }

        if db::update_project_status(&self.pool, project_id, project.status, status).await? == 0 {
            return Err(EngineError::InvalidState(conflict));
        }

        if status == ProjectStatus::Open {
            let awarded = db::list_submissions_for_project(&self.pool, project_id)
                .await?
                .iter()
                .any(|s| s.merged);
            if awarded {
                warn!("Project {project_id} reopened after an award was dispatched");
            }
        }
        info!("Project {project_id} status changed to {status} by {caller}");
        self.load_project(project_id).await
    }

    /// Assign a contributor to an open project.
    pub async fn assign_contributor(
        &self,
        project_id: &str,
        caller: &str,
        contributor: &str,
        proof: Option<&SignedProof>,
    ) -> Result<Project> {
        let project = self.load_project(project_id).await?;

        authorize(&project.owner, Some(caller)).into_result()?;
        let contributor = normalize_address(contributor).map_err(|_| invalid_wallet(contributor))?;
        self.verifier.check(
            ProofMode::Required,
            &Intent::AssignContributor {
                project_id,
                contributor: &contributor,
            },
            caller,
            proof,
        )?;

        if project.status == ProjectStatus::Closed
            || db::assign_contributor(&self.pool, project_id, &contributor).await? == 0
        {
            return Err(EngineError::InvalidState(StateConflict::ProjectClosed));
        }
        info!("Project {project_id} assigned to {contributor}");
        self.load_project(project_id).await
    }
}
