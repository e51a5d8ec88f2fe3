use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::auth::{DenyReason, Intent, ProofMode, ProofPolicy};
use crate::award::{AwardDispatcher, AwardOutcome, AwardRequest};
use crate::db;
use crate::engine::Engine;
use crate::errors::{EngineError, StateConflict};
use crate::models::{AwardState, NewProject, NewSubmission, ProjectStatus};
use crate::projects::CreateProject;
use crate::test_support::{
    sign_intent, verifier, wallet, Harness, RecordingDispatcher, CONTRIBUTOR, OUTSIDER, OWNER,
};

const PR_LINK: &str = "https://github.com/acme/site/pull/7";

/// Longer than the store's busy timeout.
const SLOW_AWARD: Duration = Duration::from_secs(6);

fn strict_approvals() -> ProofPolicy {
    ProofPolicy {
        approvals: ProofMode::Required,
        ..ProofPolicy::default()
    }
}

// ─────────────────────────────────────────────────────────
// Approval
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_approve_merges_closes_and_awards_once() {
    let h = Harness::new().await;
    let (_, owner) = wallet(OWNER);
    let (_, dev) = wallet(CONTRIBUTOR);
    let project = h.seed_project(&owner).await;
    let submission = h.seed_submission(&project.id, &dev, PR_LINK).await;

    let approval = h.engine.approve(&submission.id, &owner, None).await.unwrap();
    assert!(approval.submission.merged);
    assert_eq!(approval.project_id, project.id);
    assert_eq!(approval.award_message, "paid");

    let stored = h.engine.get_submission(&submission.id).await.unwrap();
    assert!(stored.merged);
    let project_after = h.engine.get_project(&project.id).await.unwrap();
    assert_eq!(project_after.status, ProjectStatus::Closed);

    assert_eq!(
        h.dispatcher.calls(),
        vec![AwardRequest {
            project_id: project.id.clone(),
            recipient: dev.clone(),
            reward: "250".to_string(),
        }]
    );
}

#[tokio::test]
async fn test_second_approval_is_rejected_without_dispatch() {
    let h = Harness::new().await;
    let (_, owner) = wallet(OWNER);
    let (_, dev) = wallet(CONTRIBUTOR);
    let project = h.seed_project(&owner).await;
    let submission = h.seed_submission(&project.id, &dev, PR_LINK).await;

    h.engine.approve(&submission.id, &owner, None).await.unwrap();
    let err = h
        .engine
        .approve(&submission.id, &owner, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidState(_)));
    assert_eq!(h.dispatcher.calls().len(), 1);
}

#[tokio::test]
async fn test_closed_project_rejects_approval_of_other_submission() {
    let h = Harness::new().await;
    let (_, owner) = wallet(OWNER);
    let (_, dev) = wallet(CONTRIBUTOR);
    let (_, other) = wallet(OUTSIDER);
    let project = h.seed_project(&owner).await;
    let first = h.seed_submission(&project.id, &dev, PR_LINK).await;
    let second = h
        .seed_submission(&project.id, &other, "https://example.com/work")
        .await;

    h.engine.approve(&first.id, &owner, None).await.unwrap();
    let err = h.engine.approve(&second.id, &owner, None).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidState(StateConflict::ProjectClosed)
    ));
    assert!(!h.engine.get_submission(&second.id).await.unwrap().merged);
    assert_eq!(h.dispatcher.calls().len(), 1);
}

#[tokio::test]
async fn test_non_owner_cannot_approve() {
    let h = Harness::new().await;
    let (_, owner) = wallet(OWNER);
    let (_, dev) = wallet(CONTRIBUTOR);
    let (_, outsider) = wallet(OUTSIDER);
    let project = h.seed_project(&owner).await;
    let submission = h.seed_submission(&project.id, &dev, PR_LINK).await;

    let err = h
        .engine
        .approve(&submission.id, &outsider, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(DenyReason::NotOwner)));

    assert!(!h.engine.get_submission(&submission.id).await.unwrap().merged);
    assert_eq!(
        h.engine.get_project(&project.id).await.unwrap().status,
        ProjectStatus::Open
    );
    assert!(h.dispatcher.calls().is_empty());
}

#[tokio::test]
async fn test_owner_match_ignores_case() {
    let h = Harness::new().await;
    let (_, owner) = wallet(OWNER);
    let (_, dev) = wallet(CONTRIBUTOR);
    let project = h.seed_project(&owner).await;
    let submission = h.seed_submission(&project.id, &dev, PR_LINK).await;

    let shouting = format!("0x{}", owner[2..].to_ascii_uppercase());
    h.engine.approve(&submission.id, &shouting, None).await.unwrap();
}

#[tokio::test]
async fn test_approve_unknown_submission_is_not_found() {
    let h = Harness::new().await;
    let (_, owner) = wallet(OWNER);

    let err = h.engine.approve("missing", &owner, None).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::NotFound {
            kind: "submission",
            ..
        }
    ));
}

#[tokio::test]
async fn test_failed_dispatch_rolls_back() {
    let h = Harness::with(
        ProofPolicy::default(),
        RecordingDispatcher::with_outcome(AwardOutcome::Failed("insufficient funds".into())),
    )
    .await;
    let (_, owner) = wallet(OWNER);
    let (_, dev) = wallet(CONTRIBUTOR);
    let project = h.seed_project(&owner).await;
    let submission = h.seed_submission(&project.id, &dev, PR_LINK).await;

    let err = h
        .engine
        .approve(&submission.id, &owner, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::DispatchFailure(_)));
    assert!(!h.engine.get_submission(&submission.id).await.unwrap().merged);
    assert_eq!(
        h.engine.get_project(&project.id).await.unwrap().status,
        ProjectStatus::Open
    );
    let claim = db::get_award_claim(h.engine.pool(), &project.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(claim.state, AwardState::None);

    // Retry once the payment side recovers.
    h.dispatcher
        .set_outcome(AwardOutcome::Granted("paid".into()));
    h.engine.approve(&submission.id, &owner, None).await.unwrap();
    assert_eq!(h.dispatcher.calls().len(), 2);
}

#[tokio::test]
async fn test_unknown_dispatch_outcome_commits_the_merge() {
    let h = Harness::with(
        ProofPolicy::default(),
        RecordingDispatcher::with_outcome(AwardOutcome::Unknown("timed out".into())),
    )
    .await;
    let (_, owner) = wallet(OWNER);
    let (_, dev) = wallet(CONTRIBUTOR);
    let project = h.seed_project(&owner).await;
    let submission = h.seed_submission(&project.id, &dev, PR_LINK).await;

    let err = h
        .engine
        .approve(&submission.id, &owner, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::DispatchUnknown(_)));
    assert!(h.engine.get_submission(&submission.id).await.unwrap().merged);
    assert_eq!(
        h.engine.get_project(&project.id).await.unwrap().status,
        ProjectStatus::Closed
    );

    // The claim stays until someone reconciles the award.
    let claim = db::get_award_claim(h.engine.pool(), &project.id)
        .await
        .unwrap()
        .unwrap();
    assert!(claim.is_awarding(&submission.id));

    let retry = h
        .engine
        .approve(&submission.id, &owner, None)
        .await
        .unwrap_err();
    assert!(matches!(retry, EngineError::InvalidState(_)));
    assert_eq!(h.dispatcher.calls().len(), 1);
}

#[tokio::test]
async fn test_project_with_unreconciled_award_cannot_be_reopened() {
    let h = Harness::with(
        ProofPolicy::default(),
        RecordingDispatcher::with_outcome(AwardOutcome::Unknown("timed out".into())),
    )
    .await;
    let (owner_key, owner) = wallet(OWNER);
    let (_, dev) = wallet(CONTRIBUTOR);
    let project = h.seed_project(&owner).await;
    let submission = h.seed_submission(&project.id, &dev, PR_LINK).await;
    h.engine
        .approve(&submission.id, &owner, None)
        .await
        .unwrap_err();

    let reopen = Intent::UpdateProjectStatus {
        project_id: &project.id,
        status: "open",
    };
    let proof = sign_intent(&verifier(), &owner_key, &reopen, &owner, 1);
    let err = h
        .engine
        .update_project_status(&project.id, &owner, ProjectStatus::Open, Some(&proof))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidState(_)));
    assert_eq!(
        h.engine.get_project(&project.id).await.unwrap().status,
        ProjectStatus::Closed
    );
}

/// Grants the award, but drops the project's claim while doing so.
struct ClaimDroppingDispatcher {
    pool: SqlitePool,
    submission_id: String,
}

#[async_trait]
impl AwardDispatcher for ClaimDroppingDispatcher {
    async fn award(&self, request: &AwardRequest) -> AwardOutcome {
        db::release_award_claim(&self.pool, &request.project_id, &self.submission_id)
            .await
            .unwrap();
        AwardOutcome::Granted("paid".into())
    }
}

#[tokio::test]
async fn test_granted_award_that_cannot_be_recorded_is_inconsistent() {
    let pool = db::init_pool("sqlite::memory:").await.unwrap();
    let (_, owner) = wallet(OWNER);
    let (_, dev) = wallet(CONTRIBUTOR);
    let project = db::insert_project(
        &pool,
        &NewProject {
            name: "Landing page".into(),
            description: String::new(),
            reward: "250".into(),
            owner: owner.clone(),
            required_skills: vec![],
            completion_skills: vec![],
        },
    )
    .await
    .unwrap();
    let submission = db::insert_submission(
        &pool,
        &NewSubmission {
            project_id: project.id.clone(),
            submitter: dev,
            work_reference: PR_LINK.into(),
            correlation: None,
        },
    )
    .await
    .unwrap();
    let engine = Engine::new(
        pool.clone(),
        verifier(),
        ProofPolicy::default(),
        Arc::new(ClaimDroppingDispatcher {
            pool: pool.clone(),
            submission_id: submission.id.clone(),
        }),
    );

    let err = engine.approve(&submission.id, &owner, None).await.unwrap_err();
    assert!(matches!(err, EngineError::Inconsistent(_)), "{err}");
    assert_eq!(err.status_code(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    // Neither row moved.
    assert!(!engine.get_submission(&submission.id).await.unwrap().merged);
    assert_eq!(
        engine.get_project(&project.id).await.unwrap().status,
        ProjectStatus::Open
    );
}

#[tokio::test]
async fn test_concurrent_approvals_award_once() {
    let h = Harness::with(
        ProofPolicy::default(),
        RecordingDispatcher::granted().delayed(Duration::from_millis(50)),
    )
    .await;
    let (_, owner) = wallet(OWNER);
    let (_, dev) = wallet(CONTRIBUTOR);
    let project = h.seed_project(&owner).await;
    let submission = h.seed_submission(&project.id, &dev, PR_LINK).await;

    let (a, b) = tokio::join!(
        h.engine.approve(&submission.id, &owner, None),
        h.engine.approve(&submission.id, &owner, None),
    );
    let successes = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
    assert_eq!(successes, 1);
    for result in [a, b] {
        if let Err(e) = result {
            assert!(matches!(e, EngineError::InvalidState(_)), "{e}");
        }
    }
    assert_eq!(h.dispatcher.calls().len(), 1);
}

#[tokio::test]
async fn test_concurrent_approvals_of_rival_submissions_award_once() {
    let h = Harness::with(
        ProofPolicy::default(),
        RecordingDispatcher::granted().delayed(Duration::from_millis(50)),
    )
    .await;
    let (_, owner) = wallet(OWNER);
    let (_, dev) = wallet(CONTRIBUTOR);
    let (_, rival) = wallet(OUTSIDER);
    let project = h.seed_project(&owner).await;
    let first = h.seed_submission(&project.id, &dev, PR_LINK).await;
    let second = h
        .seed_submission(&project.id, &rival, "https://example.com/rival")
        .await;

    let (a, b) = tokio::join!(
        h.engine.approve(&first.id, &owner, None),
        h.engine.approve(&second.id, &owner, None),
    );
    assert_eq!(u8::from(a.is_ok()) + u8::from(b.is_ok()), 1);
    let merged = db::list_submissions_for_project(h.engine.pool(), &project.id)
        .await
        .unwrap()
        .iter()
        .filter(|s| s.merged)
        .count();
    assert_eq!(merged, 1);
    assert_eq!(h.dispatcher.calls().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_slow_award_on_file_store_awards_once_without_blocking_writers() {
    let h = Harness::on_file(
        ProofPolicy::default(),
        RecordingDispatcher::granted().delayed(SLOW_AWARD),
    )
    .await;
    let (_, owner) = wallet(OWNER);
    let (_, dev) = wallet(CONTRIBUTOR);
    let project = h.seed_project(&owner).await;
    let elsewhere = h.seed_project(&owner).await;
    let submission = h.seed_submission(&project.id, &dev, PR_LINK).await;

    let started = Instant::now();
    let approvals: Vec<_> = (0..4)
        .map(|_| {
            let engine = h.engine.clone();
            let (id, owner) = (submission.id.clone(), owner.clone());
            tokio::spawn(async move {
                let result = engine.approve(&id, &owner, None).await;
                (result, started.elapsed())
            })
        })
        .collect();

    // Writes to other resources go through while the award is in flight.
    h.award_started().await;
    let unrelated = h
        .engine
        .create_submission(&elsewhere.id, &dev, "https://example.com/other", None)
        .await
        .unwrap();
    assert!(started.elapsed() < SLOW_AWARD);
    assert!(!unrelated.merged);
    let same_project = h
        .engine
        .create_submission(&project.id, &dev, "https://example.com/v2", None)
        .await
        .unwrap();
    assert!(started.elapsed() < SLOW_AWARD);

    let mut successes = 0;
    for handle in approvals {
        let (result, elapsed) = handle.await.unwrap();
        match result {
            Ok(approval) => {
                successes += 1;
                assert!(approval.submission.merged);
                assert!(elapsed >= SLOW_AWARD);
            }
            Err(e) => {
                assert!(
                    matches!(e, EngineError::InvalidState(StateConflict::AlreadyMerged)),
                    "{e}"
                );
                // Rejected on the claim, not after waiting for the lock.
                assert!(elapsed < SLOW_AWARD);
            }
        }
    }
    assert_eq!(successes, 1);
    assert_eq!(h.dispatcher.calls().len(), 1);
    assert_eq!(
        h.engine.get_project(&project.id).await.unwrap().status,
        ProjectStatus::Closed
    );
    assert!(!h.engine.get_submission(&same_project.id).await.unwrap().merged);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_slow_award_on_file_store_rejects_rival_submission() {
    let h = Harness::on_file(
        ProofPolicy::default(),
        RecordingDispatcher::granted().delayed(SLOW_AWARD),
    )
    .await;
    let (_, owner) = wallet(OWNER);
    let (dev_key, dev) = wallet(CONTRIBUTOR);
    let (_, rival) = wallet(OUTSIDER);
    let project = h.seed_project(&owner).await;
    let first = h.seed_submission(&project.id, &dev, PR_LINK).await;
    let second = h
        .seed_submission(&project.id, &rival, "https://example.com/rival")
        .await;

    let winner = {
        let engine = h.engine.clone();
        let (id, owner) = (first.id.clone(), owner.clone());
        tokio::spawn(async move { engine.approve(&id, &owner, None).await })
    };
    h.award_started().await;

    let started = Instant::now();
    let err = h.engine.approve(&second.id, &owner, None).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidState(StateConflict::ProjectClosed)
    ));

    // The submission being awarded cannot be deleted underneath the award.
    let intent = Intent::DeleteSubmission {
        submission_id: &first.id,
    };
    let proof = sign_intent(&verifier(), &dev_key, &intent, &dev, 1);
    let err = h
        .engine
        .delete_submission(&first.id, &dev, Some(&proof))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidState(_)), "{err}");
    assert!(started.elapsed() < SLOW_AWARD);

    winner.await.unwrap().unwrap();
    assert!(h.engine.get_submission(&first.id).await.unwrap().merged);
    assert!(!h.engine.get_submission(&second.id).await.unwrap().merged);
    assert_eq!(h.dispatcher.calls().len(), 1);
}

#[tokio::test]
async fn test_required_approval_proof() {
    let h = Harness::with(strict_approvals(), RecordingDispatcher::granted()).await;
    let (owner_key, owner) = wallet(OWNER);
    let (dev_key, dev) = wallet(CONTRIBUTOR);
    let project = h.seed_project(&owner).await;
    let submission = h.seed_submission(&project.id, &dev, PR_LINK).await;
    let intent = Intent::ApproveSubmission {
        submission_id: &submission.id,
    };

    let err = h
        .engine
        .approve(&submission.id, &owner, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Unauthorized(DenyReason::MissingCredentials)
    ));

    // Signed by someone else while claiming to be the owner.
    let forged = sign_intent(&verifier(), &dev_key, &intent, &owner, 1);
    let err = h
        .engine
        .approve(&submission.id, &owner, Some(&forged))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Unauthorized(DenyReason::SignerMismatch)
    ));
    assert!(h.dispatcher.calls().is_empty());

    let proof = sign_intent(&verifier(), &owner_key, &intent, &owner, 2);
    h.engine
        .approve(&submission.id, &owner, Some(&proof))
        .await
        .unwrap();
    assert_eq!(h.dispatcher.calls().len(), 1);
}

#[tokio::test]
async fn test_proof_for_another_operation_is_rejected() {
    let h = Harness::with(strict_approvals(), RecordingDispatcher::granted()).await;
    let (owner_key, owner) = wallet(OWNER);
    let (_, dev) = wallet(CONTRIBUTOR);
    let project = h.seed_project(&owner).await;
    let submission = h.seed_submission(&project.id, &dev, PR_LINK).await;

    let delete = Intent::DeleteSubmission {
        submission_id: &submission.id,
    };
    let proof = sign_intent(&verifier(), &owner_key, &delete, &owner, 9);
    let err = h
        .engine
        .approve(&submission.id, &owner, Some(&proof))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Unauthorized(_) | EngineError::Signature(_)
    ));
    assert!(h.dispatcher.calls().is_empty());
}

// ─────────────────────────────────────────────────────────
// Submissions
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_create_submission_records_pull_request() {
    let h = Harness::new().await;
    let (_, owner) = wallet(OWNER);
    let (_, dev) = wallet(CONTRIBUTOR);
    let project = h.seed_project(&owner).await;

    let submission = h
        .engine
        .create_submission(&project.id, &dev.to_uppercase().replace("0X", "0x"), PR_LINK, None)
        .await
        .unwrap();
    assert_eq!(submission.submitter, dev);
    assert!(!submission.merged);
    assert_eq!(submission.repo_owner.as_deref(), Some("acme"));
    assert_eq!(submission.repo_name.as_deref(), Some("site"));
    assert_eq!(submission.ref_number, Some(7));

    // Repeat submissions are allowed.
    h.engine
        .create_submission(&project.id, &dev, "https://example.com/v2", None)
        .await
        .unwrap();
    assert_eq!(
        h.engine
            .list_project_submissions(&project.id)
            .await
            .unwrap()
            .len(),
        2
    );
}

#[tokio::test]
async fn test_create_submission_rejections() {
    let h = Harness::new().await;
    let (_, owner) = wallet(OWNER);
    let (_, dev) = wallet(CONTRIBUTOR);
    let project = h.seed_project(&owner).await;

    let err = h
        .engine
        .create_submission("missing", &dev, PR_LINK, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { .. }));

    let err = h
        .engine
        .create_submission(&project.id, "not-a-wallet", PR_LINK, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let err = h
        .engine
        .create_submission(&project.id, &dev, "   ", None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    db::update_project_status(
        h.engine.pool(),
        &project.id,
        ProjectStatus::Open,
        ProjectStatus::Closed,
    )
    .await
    .unwrap();
    let err = h
        .engine
        .create_submission(&project.id, &dev, PR_LINK, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidState(StateConflict::ProjectClosed)
    ));
}

#[tokio::test]
async fn test_optional_submission_proof_is_still_verified_when_present() {
    let h = Harness::new().await;
    let (_, owner) = wallet(OWNER);
    let (dev_key, dev) = wallet(CONTRIBUTOR);
    let (_, outsider) = wallet(OUTSIDER);
    let project = h.seed_project(&owner).await;
    let intent = Intent::CreateSubmission {
        project_id: &project.id,
        work_reference: PR_LINK,
    };

    let proof = sign_intent(&verifier(), &dev_key, &intent, &dev, 1);
    h.engine
        .create_submission(&project.id, &dev, PR_LINK, Some(&proof))
        .await
        .unwrap();

    let err = h
        .engine
        .create_submission(&project.id, &outsider, PR_LINK, Some(&proof))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Unauthorized(_) | EngineError::Signature(_)
    ));
}

#[tokio::test]
async fn test_delete_submission_requires_submitter_proof() {
    let h = Harness::new().await;
    let (_, owner) = wallet(OWNER);
    let (dev_key, dev) = wallet(CONTRIBUTOR);
    let (outsider_key, outsider) = wallet(OUTSIDER);
    let project = h.seed_project(&owner).await;
    let submission = h.seed_submission(&project.id, &dev, PR_LINK).await;
    let intent = Intent::DeleteSubmission {
        submission_id: &submission.id,
    };

    let err = h
        .engine
        .delete_submission(&submission.id, &dev, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Unauthorized(DenyReason::MissingCredentials)
    ));

    let outsider_proof = sign_intent(&verifier(), &outsider_key, &intent, &outsider, 1);
    let err = h
        .engine
        .delete_submission(&submission.id, &outsider, Some(&outsider_proof))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(DenyReason::NotOwner)));

    let proof = sign_intent(&verifier(), &dev_key, &intent, &dev, 2);
    h.engine
        .delete_submission(&submission.id, &dev, Some(&proof))
        .await
        .unwrap();
    let err = h.engine.get_submission(&submission.id).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound { .. }));
}

#[tokio::test]
async fn test_merged_submission_cannot_be_deleted() {
    let h = Harness::new().await;
    let (_, owner) = wallet(OWNER);
    let (dev_key, dev) = wallet(CONTRIBUTOR);
    let project = h.seed_project(&owner).await;
    let submission = h.seed_submission(&project.id, &dev, PR_LINK).await;
    h.engine.approve(&submission.id, &owner, None).await.unwrap();

    let intent = Intent::DeleteSubmission {
        submission_id: &submission.id,
    };
    let proof = sign_intent(&verifier(), &dev_key, &intent, &dev, 3);
    let err = h
        .engine
        .delete_submission(&submission.id, &dev, Some(&proof))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidState(StateConflict::AlreadyMerged)
    ));
    assert!(h.engine.get_submission(&submission.id).await.unwrap().merged);
}

// ─────────────────────────────────────────────────────────
// Projects
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_create_project_requires_owner_proof() {
    let h = Harness::new().await;
    let (owner_key, owner) = wallet(OWNER);
    let req = CreateProject {
        owner: owner.clone(),
        name: "  Docs site ".to_string(),
        description: String::new(),
        reward: "12.50".to_string(),
        required_skills: vec!["markdown".to_string()],
        completion_skills: vec![],
    };

    let err = h.engine.create_project(req.clone(), None).await.unwrap_err();
    assert!(matches!(err, EngineError::Unauthorized(_)));

    let intent = Intent::CreateProject {
        name: "Docs site",
        reward: "12.50",
    };
    let proof = sign_intent(&verifier(), &owner_key, &intent, &owner, 1);
    let project = h.engine.create_project(req, Some(&proof)).await.unwrap();
    assert_eq!(project.name, "Docs site");
    assert_eq!(project.status, ProjectStatus::Open);
    assert_eq!(project.owner, owner);
    assert_eq!(project.required_skills, vec!["markdown".to_string()]);
    assert_eq!(h.engine.list_projects().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_create_project_validates_reward() {
    let h = Harness::new().await;
    let (_, owner) = wallet(OWNER);
    let req = CreateProject {
        owner,
        name: "Docs".to_string(),
        description: String::new(),
        reward: "-5".to_string(),
        required_skills: vec![],
        completion_skills: vec![],
    };
    let err = h.engine.create_project(req, None).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn test_owner_can_close_and_reopen() {
    let h = Harness::new().await;
    let (owner_key, owner) = wallet(OWNER);
    let project = h.seed_project(&owner).await;
    let v = verifier();

    let close = Intent::UpdateProjectStatus {
        project_id: &project.id,
        status: "closed",
    };
    let proof = sign_intent(&v, &owner_key, &close, &owner, 1);
    let closed = h
        .engine
        .update_project_status(&project.id, &owner, ProjectStatus::Closed, Some(&proof))
        .await
        .unwrap();
    assert_eq!(closed.status, ProjectStatus::Closed);

    // Same transition twice.
    let proof = sign_intent(&v, &owner_key, &close, &owner, 2);
    let err = h
        .engine
        .update_project_status(&project.id, &owner, ProjectStatus::Closed, Some(&proof))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidState(StateConflict::ProjectClosed)
    ));

    let reopen = Intent::UpdateProjectStatus {
        project_id: &project.id,
        status: "open",
    };
    let proof = sign_intent(&v, &owner_key, &reopen, &owner, 3);
    let reopened = h
        .engine
        .update_project_status(&project.id, &owner, ProjectStatus::Open, Some(&proof))
        .await
        .unwrap();
    assert_eq!(reopened.status, ProjectStatus::Open);
}

#[tokio::test]
async fn test_status_change_by_non_owner_is_forbidden() {
    let h = Harness::new().await;
    let (_, owner) = wallet(OWNER);
    let (outsider_key, outsider) = wallet(OUTSIDER);
    let project = h.seed_project(&owner).await;

    let intent = Intent::UpdateProjectStatus {
        project_id: &project.id,
        status: "closed",
    };
    let proof = sign_intent(&verifier(), &outsider_key, &intent, &outsider, 1);
    let err = h
        .engine
        .update_project_status(&project.id, &outsider, ProjectStatus::Closed, Some(&proof))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(_)));
    assert_eq!(
        h.engine.get_project(&project.id).await.unwrap().status,
        ProjectStatus::Open
    );
}

#[tokio::test]
async fn test_assign_contributor() {
    let h = Harness::new().await;
    let (owner_key, owner) = wallet(OWNER);
    let (_, dev) = wallet(CONTRIBUTOR);
    let project = h.seed_project(&owner).await;
    let v = verifier();

    let intent = Intent::AssignContributor {
        project_id: &project.id,
        contributor: &dev,
    };
    let proof = sign_intent(&v, &owner_key, &intent, &owner, 1);
    let assigned = h
        .engine
        .assign_contributor(&project.id, &owner, &dev, Some(&proof))
        .await
        .unwrap();
    assert_eq!(assigned.assigned_to.as_deref(), Some(dev.as_str()));

    let err = h
        .engine
        .assign_contributor(&project.id, &owner, "nobody", Some(&proof))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    db::update_project_status(
        h.engine.pool(),
        &project.id,
        ProjectStatus::Open,
        ProjectStatus::Closed,
    )
    .await
    .unwrap();
    let proof = sign_intent(&v, &owner_key, &intent, &owner, 2);
    let err = h
        .engine
        .assign_contributor(&project.id, &owner, &dev, Some(&proof))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidState(StateConflict::ProjectClosed)
    ));
}

#[tokio::test]
async fn test_project_submissions_of_unknown_project() {
    let h = Harness::new().await;
    let err = h
        .engine
        .list_project_submissions("missing")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { kind: "project", .. }));
}
