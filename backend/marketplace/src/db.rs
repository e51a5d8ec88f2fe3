//! Database layer: migrations and the project/submission store gateway.
//!
//! Every function takes any SQLite executor so the same query can run on the
//! pool or inside a transaction (`&mut *tx`). Mutations that guard a state
//! transition are conditional updates returning the affected-row count:
//! `0` means the row was already in (or past) the target state.
//!
//! The award claim columns (`award_state`, `award_submission`) let the engine
//! reserve a project before dispatching its award and record the outcome
//! afterwards, so no transaction is ever open across the dispatch.

use std::str::FromStr;
use std::time::Duration;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{SqliteExecutor, SqlitePool};
use tracing::info;
use uuid::Uuid;

use crate::errors::Result;
use crate::models::{
    AwardClaim, AwardState, NewProject, NewSubmission, Project, ProjectRow, ProjectStatus,
    PullRequestRef, Submission,
};

/// How long a writer waits for SQLite's write lock before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Establish a SQLite connection pool and run pending migrations.
pub async fn init_pool(database_url: &str) -> Result<SqlitePool> {
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };

    let options = SqliteConnectOptions::from_str(&url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(BUSY_TIMEOUT);

    // Each in-memory connection is its own database; pin a single one.
    let pool = if url.contains(":memory:") {
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?
    } else {
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?
    };

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

fn now() -> i64 {
    Utc::now().timestamp()
}

const PROJECT_COLUMNS: &str = "id, name, description, reward, status, owner, required_skills, \
     completion_skills, assigned_to, created_at, updated_at";

const SUBMISSION_COLUMNS: &str = "id, project_id, submitter, work_reference, merged, repo_owner, \
     repo_name, ref_number, created_at";

// ─────────────────────────────────────────────────────────
// Projects
// ─────────────────────────────────────────────────────────

pub async fn insert_project<'e, E>(exec: E, new: &NewProject) -> Result<Project>
where
    E: SqliteExecutor<'e>,
{
    let ts = now();
    let project = Project {
        id: Uuid::new_v4().to_string(),
        name: new.name.clone(),
        description: new.description.clone(),
        reward: new.reward.clone(),
        status: ProjectStatus::Open,
        owner: new.owner.clone(),
        required_skills: new.required_skills.clone(),
        completion_skills: new.completion_skills.clone(),
        assigned_to: None,
        created_at: ts,
        updated_at: ts,
    };

    sqlx::query(
        r#"
        INSERT INTO projects
            (id, name, description, reward, status, owner, required_skills,
             completion_skills, assigned_to, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL, ?9, ?9)
        "#,
    )
    .bind(&project.id)
    .bind(&project.name)
    .bind(&project.description)
    .bind(&project.reward)
    .bind(project.status.as_str())
    .bind(&project.owner)
    .bind(serde_json::to_string(&project.required_skills)?)
    .bind(serde_json::to_string(&project.completion_skills)?)
    .bind(ts)
    .execute(exec)
    .await?;

    Ok(project)
}

pub async fn get_project_by_id<'e, E>(exec: E, id: &str) -> Result<Option<Project>>
where
    E: SqliteExecutor<'e>,
{
    let row = sqlx::query_as::<_, ProjectRow>(&format!(
        "SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?1"
    ))
    .bind(id)
    .fetch_optional(exec)
    .await?;
    row.map(Project::try_from).transpose()
}

/// All projects, newest first.
pub async fn list_projects<'e, E>(exec: E) -> Result<Vec<Project>>
where
    E: SqliteExecutor<'e>,
{
    let rows = sqlx::query_as::<_, ProjectRow>(&format!(
        "SELECT {PROJECT_COLUMNS} FROM projects ORDER BY created_at DESC, id ASC"
    ))
    .fetch_all(exec)
    .await?;
    rows.into_iter().map(Project::try_from).collect()
}

/// Move a project from `from` to `to`. Returns affected rows.
///
/// Refused while an award claim is held. Reopening clears a finished claim.
pub async fn update_project_status<'e, E>(
    exec: E,
    id: &str,
    from: ProjectStatus,
    to: ProjectStatus,
) -> Result<u64>
where
    E: SqliteExecutor<'e>,
{
    let affected = sqlx::query(
        r#"
        UPDATE projects
        SET status = ?1,
            updated_at = ?2,
            award_state = CASE WHEN ?1 = 'open' THEN 'none' ELSE award_state END,
            award_submission = CASE WHEN ?1 = 'open' THEN NULL ELSE award_submission END
        WHERE id = ?3 AND status = ?4 AND award_state <> 'awarding'
        "#,
    )
    .bind(to.as_str())
    .bind(now())
    .bind(id)
    .bind(from.as_str())
    .execute(exec)
    .await?
    .rows_affected();
    Ok(affected)
}

/// Assign a contributor to an open project. Returns affected rows.
pub async fn assign_contributor<'e, E>(exec: E, id: &str, contributor: &str) -> Result<u64>
where
    E: SqliteExecutor<'e>,
{
    let affected = sqlx::query(
        "UPDATE projects SET assigned_to = ?1, updated_at = ?2 WHERE id = ?3 AND status = 'open'",
    )
    .bind(contributor)
    .bind(now())
    .bind(id)
    .execute(exec)
    .await?
    .rows_affected();
    Ok(affected)
}

// ─────────────────────────────────────────────────────────
// Submissions
// ─────────────────────────────────────────────────────────

pub async fn insert_submission<'e, E>(exec: E, new: &NewSubmission) -> Result<Submission>
where
    E: SqliteExecutor<'e>,
{
    let submission = Submission {
        id: Uuid::new_v4().to_string(),
        project_id: new.project_id.clone(),
        submitter: new.submitter.clone(),
        work_reference: new.work_reference.clone(),
        merged: false,
        repo_owner: new.correlation.as_ref().map(|c| c.owner.clone()),
        repo_name: new.correlation.as_ref().map(|c| c.repo.clone()),
        ref_number: new.correlation.as_ref().map(|c| c.number),
        created_at: now(),
    };

    sqlx::query(
        r#"
        INSERT INTO submissions
            (id, project_id, submitter, work_reference, merged,
             repo_owner, repo_name, ref_number, created_at)
        VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6, ?7, ?8)
        "#,
    )
    .bind(&submission.id)
    .bind(&submission.project_id)
    .bind(&submission.submitter)
    .bind(&submission.work_reference)
    .bind(&submission.repo_owner)
    .bind(&submission.repo_name)
    .bind(submission.ref_number)
    .bind(submission.created_at)
    .execute(exec)
    .await?;

    Ok(submission)
}

pub async fn get_submission_by_id<'e, E>(exec: E, id: &str) -> Result<Option<Submission>>
where
    E: SqliteExecutor<'e>,
{
    let row = sqlx::query_as::<_, Submission>(&format!(
        "SELECT {SUBMISSION_COLUMNS} FROM submissions WHERE id = ?1"
    ))
    .bind(id)
    .fetch_optional(exec)
    .await?;
    Ok(row)
}

pub async fn list_submissions<'e, E>(exec: E) -> Result<Vec<Submission>>
where
    E: SqliteExecutor<'e>,
{
    let rows = sqlx::query_as::<_, Submission>(&format!(
        "SELECT {SUBMISSION_COLUMNS} FROM submissions ORDER BY created_at ASC, id ASC"
    ))
    .fetch_all(exec)
    .await?;
    Ok(rows)
}

pub async fn list_submissions_for_project<'e, E>(
    exec: E,
    project_id: &str,
) -> Result<Vec<Submission>>
where
    E: SqliteExecutor<'e>,
{
    let rows = sqlx::query_as::<_, Submission>(&format!(
        "SELECT {SUBMISSION_COLUMNS} FROM submissions WHERE project_id = ?1 \
         ORDER BY created_at ASC, id ASC"
    ))
    .bind(project_id)
    .fetch_all(exec)
    .await?;
    Ok(rows)
}

/// Delete a submission that has not been merged and is not being awarded.
/// Returns affected rows.
pub async fn delete_submission<'e, E>(exec: E, id: &str) -> Result<u64>
where
    E: SqliteExecutor<'e>,
{
    let affected = sqlx::query(
        r#"
        DELETE FROM submissions
        WHERE id = ?1 AND merged = 0
          AND NOT EXISTS (
              SELECT 1 FROM projects
              WHERE award_state = 'awarding' AND award_submission = ?1
          )
        "#,
    )
    .bind(id)
    .execute(exec)
    .await?
    .rows_affected();
    Ok(affected)
}

/// `merged = 1 WHERE merged = 0`. Returns `1` for the single caller that
/// performed the transition and `0` for everyone else.
pub async fn conditional_update_submission_merged<'e, E>(exec: E, id: &str) -> Result<u64>
where
    E: SqliteExecutor<'e>,
{
    let affected = sqlx::query("UPDATE submissions SET merged = 1 WHERE id = ?1 AND merged = 0")
        .bind(id)
        .execute(exec)
        .await?
        .rows_affected();
    Ok(affected)
}

// ─────────────────────────────────────────────────────────
// Award claims
// ─────────────────────────────────────────────────────────

/// Reserve an open, unclaimed project for awarding `submission_id`, provided
/// the submission belongs to it and is still pending. A single statement, so
/// it commits on its own. Returns `1` for the one caller that wins the claim.
pub async fn claim_award<'e, E>(exec: E, project_id: &str, submission_id: &str) -> Result<u64>
where
    E: SqliteExecutor<'e>,
{
    let affected = sqlx::query(
        r#"
        UPDATE projects
        SET award_state = 'awarding', award_submission = ?1, updated_at = ?2
        WHERE id = ?3 AND status = 'open' AND award_state = 'none'
          AND EXISTS (
              SELECT 1 FROM submissions
              WHERE id = ?1 AND project_id = ?3 AND merged = 0
          )
        "#,
    )
    .bind(submission_id)
    .bind(now())
    .bind(project_id)
    .execute(exec)
    .await?
    .rows_affected();
    Ok(affected)
}

/// Close a claimed project and move its claim to `state`. Matches only the
/// claim held for `submission_id`. Returns affected rows.
pub async fn record_award<'e, E>(
    exec: E,
    project_id: &str,
    submission_id: &str,
    state: AwardState,
) -> Result<u64>
where
    E: SqliteExecutor<'e>,
{
    let affected = sqlx::query(
        r#"
        UPDATE projects
        SET status = 'closed', award_state = ?1, updated_at = ?2
        WHERE id = ?3 AND award_state = 'awarding' AND award_submission = ?4
        "#,
    )
    .bind(state.as_str())
    .bind(now())
    .bind(project_id)
    .bind(submission_id)
    .execute(exec)
    .await?
    .rows_affected();
    Ok(affected)
}

/// Drop the claim held for `submission_id`. Returns affected rows.
pub async fn release_award_claim<'e, E>(
    exec: E,
    project_id: &str,
    submission_id: &str,
) -> Result<u64>
where
    E: SqliteExecutor<'e>,
{
    let affected = sqlx::query(
        r#"
        UPDATE projects
        SET award_state = 'none', award_submission = NULL, updated_at = ?1
        WHERE id = ?2 AND award_state = 'awarding' AND award_submission = ?3
        "#,
    )
    .bind(now())
    .bind(project_id)
    .bind(submission_id)
    .execute(exec)
    .await?
    .rows_affected();
    Ok(affected)
}

pub async fn get_award_claim<'e, E>(exec: E, project_id: &str) -> Result<Option<AwardClaim>>
where
    E: SqliteExecutor<'e>,
{
    let row: Option<(String, Option<String>)> =
        sqlx::query_as("SELECT award_state, award_submission FROM projects WHERE id = ?1")
            .bind(project_id)
            .fetch_optional(exec)
            .await?;
    match row {
        Some((state, submission_id)) => Ok(Some(AwardClaim {
            state: state.parse::<AwardState>()?,
            submission_id,
        })),
        None => Ok(None),
    }
}

/// Oldest submission correlated with the given pull request. Owner and repo
/// names compare case-insensitively, as on the code host.
pub async fn find_submission_by_pull_request<'e, E>(
    exec: E,
    pr: &PullRequestRef,
) -> Result<Option<Submission>>
where
    E: SqliteExecutor<'e>,
{
    let row = sqlx::query_as::<_, Submission>(&format!(
        "SELECT {SUBMISSION_COLUMNS} FROM submissions \
         WHERE lower(repo_owner) = lower(?1) AND lower(repo_name) = lower(?2) AND ref_number = ?3 \
         ORDER BY created_at ASC, id ASC LIMIT 1"
    ))
    .bind(&pr.owner)
    .bind(&pr.repo)
    .bind(pr.number)
    .fetch_optional(exec)
    .await?;
    Ok(row)
}
