//! Projects and submissions as stored in, and read back from, the database.

use std::fmt;
use std::str::FromStr;

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::errors::EngineError;

/// Lifecycle status of a project.
///
/// ```text
/// open ──► closed      (approval, webhook merge, owner status change)
/// closed ──► open      (owner status change only)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Open,
    Closed,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "closed" => Ok(Self::Closed),
            other => Err(EngineError::Validation(format!(
                "unknown project status `{other}`"
            ))),
        }
    }
}

/// A funding project as exposed by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Non-negative decimal, kept as text to avoid rounding.
    pub reward: String,
    pub status: ProjectStatus,
    pub owner: String,
    pub required_skills: Vec<String>,
    pub completion_skills: Vec<String>,
    pub assigned_to: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Raw `projects` row; skill lists are JSON text.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProjectRow {
    pub id: String,
    pub name: String,
    pub description: String,
    pub reward: String,
    pub status: String,
    pub owner: String,
    pub required_skills: String,
    pub completion_skills: String,
    pub assigned_to: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TryFrom<ProjectRow> for Project {
    type Error = EngineError;

    fn try_from(row: ProjectRow) -> Result<Self, Self::Error> {
        Ok(Project {
            status: row.status.parse()?,
            required_skills: serde_json::from_str(&row.required_skills)?,
            completion_skills: serde_json::from_str(&row.completion_skills)?,
            id: row.id,
            name: row.name,
            description: row.description,
            reward: row.reward,
            owner: row.owner,
            assigned_to: row.assigned_to,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Fields needed to insert a project.
#[derive(Debug, Clone)]
pub struct NewProject {
    pub name: String,
    pub description: String,
    pub reward: String,
    pub owner: String,
    pub required_skills: Vec<String>,
    pub completion_skills: Vec<String>,
}

/// A claim of completed work against a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Submission {
    pub id: String,
    pub project_id: String,
    pub submitter: String,
    /// Link to the delivered work, usually a pull request.
    pub work_reference: String,
    /// Monotonic: once true, never reset.
    pub merged: bool,
    pub repo_owner: Option<String>,
    pub repo_name: Option<String>,
    pub ref_number: Option<i64>,
    pub created_at: i64,
}

/// Fields needed to insert a submission.
#[derive(Debug, Clone)]
pub struct NewSubmission {
    pub project_id: String,
    pub submitter: String,
    pub work_reference: String,
    pub correlation: Option<PullRequestRef>,
}

/// Award claim held on a project while its award is dispatched.
///
/// ```text
/// none ──► awarding ──► awarded     (granted)
///             │
///             ├──► none             (failed; claim released)
///             └──  kept             (outcome unknown; reconcile by hand)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AwardState {
    None,
    Awarding,
    Awarded,
}

impl AwardState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Awarding => "awarding",
            Self::Awarded => "awarded",
        }
    }
}

impl FromStr for AwardState {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "awarding" => Ok(Self::Awarding),
            "awarded" => Ok(Self::Awarded),
            other => Err(EngineError::Validation(format!(
                "unknown award state `{other}`"
            ))),
        }
    }
}

/// The award columns of a `projects` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwardClaim {
    pub state: AwardState,
    pub submission_id: Option<String>,
}

impl AwardClaim {
    /// True while `submission_id` holds an unfinished claim.
    pub fn is_awarding(&self, submission_id: &str) -> bool {
        self.state == AwardState::Awarding && self.submission_id.as_deref() == Some(submission_id)
    }
}

/// `(owner, repo, number)` identifying a pull request on the code host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestRef {
    pub owner: String,
    pub repo: String,
    pub number: i64,
}

impl PullRequestRef {
    /// Parse `https://github.com/<owner>/<repo>/pull/<number>[/...]`. Host
    /// case, ports, queries and fragments are ignored.
    pub fn from_link(link: &str) -> Option<Self> {
        let url = Url::parse(link.trim()).ok()?;
        if !matches!(url.scheme(), "http" | "https") {
            return None;
        }
        let host = url.host_str()?.to_ascii_lowercase();
        if host != "github.com" && host != "www.github.com" {
            return None;
        }

        let mut segments = url.path_segments()?;
        let owner = segments.next().filter(|s| !s.is_empty())?;
        let repo = segments.next().filter(|s| !s.is_empty())?;
        if segments.next()? != "pull" {
            return None;
        }
        let number = segments.next()?.parse::<i64>().ok().filter(|n| *n > 0)?;

        Some(Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
            number,
        })
    }
}

/// Validate a reward amount: a non-negative decimal such as `100` or `12.50`.
pub fn validate_reward(reward: &str) -> Result<(), EngineError> {
    let reward = reward.trim();
    let (whole, fraction) = match reward.split_once('.') {
        Some((w, f)) => (w, Some(f)),
        None => (reward, None),
    };
    let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if digits(whole) && fraction.map_or(true, digits) {
        Ok(())
    } else {
        Err(EngineError::Validation(format!(
            "reward `{reward}` is not a non-negative decimal"
        )))
    }
}
