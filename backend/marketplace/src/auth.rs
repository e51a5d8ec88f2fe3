//! Authorization guard and wallet-signed proof of intent.
//!
//! Wallet addresses are the only identities: a project's `owner` and a
//! submission's `submitter` are compared against the caller's address,
//! case-insensitively. Where the caller is not otherwise authenticated the
//! request carries a [`SignedProof`] over an operation-specific [`Intent`],
//! and the recovered signer must equal the claimed wallet.
//!
//! Nonces are caller-chosen (a millisecond timestamp in practice) and are not
//! remembered server-side.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::errors::{EngineError, Result};
use crate::signature::{self, TypeSchema, TypedData, TypedDataDomain, TypedField};

// ─────────────────────────────────────────────────────────
// Guard
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// The caller is not the owner of the resource.
    NotOwner,
    /// No identity or proof was presented.
    MissingCredentials,
    /// A proof was presented but was signed by another wallet.
    SignerMismatch,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotOwner => f.write_str("caller is not the resource owner"),
            Self::MissingCredentials => f.write_str("missing credentials"),
            Self::SignerMismatch => f.write_str("signature does not match the claimed wallet"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthDecision {
    Allowed,
    Denied(DenyReason),
}

impl AuthDecision {
    /// `NotOwner` becomes `Forbidden`; credential problems become `Unauthorized`.
    pub fn into_result(self) -> Result<()> {
        match self {
            Self::Allowed => Ok(()),
            Self::Denied(reason @ DenyReason::NotOwner) => Err(EngineError::Forbidden(reason)),
            Self::Denied(reason) => Err(EngineError::Unauthorized(reason)),
        }
    }
}

/// Decide whether `presented` may act on a resource owned by `required`.
pub fn authorize(required: &str, presented: Option<&str>) -> AuthDecision {
    match presented.map(str::trim) {
        None | Some("") => AuthDecision::Denied(DenyReason::MissingCredentials),
        Some(caller) if caller.eq_ignore_ascii_case(required.trim()) => AuthDecision::Allowed,
        Some(_) => AuthDecision::Denied(DenyReason::NotOwner),
    }
}

// ─────────────────────────────────────────────────────────
// Proof policy
// ─────────────────────────────────────────────────────────

/// How strictly an operation class demands a signed proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProofMode {
    /// A proof must be present and must recover the claimed wallet.
    Required,
    /// A present proof is verified; an absent one is accepted.
    Optional,
    /// Proofs are ignored.
    Disabled,
}

impl FromStr for ProofMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "required" => Ok(Self::Required),
            "optional" => Ok(Self::Optional),
            "disabled" => Ok(Self::Disabled),
            other => Err(format!("unknown proof mode `{other}`")),
        }
    }
}

/// Proof requirements per operation class. Deletion and status changes always
/// require a proof and are not configurable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProofPolicy {
    pub submissions: ProofMode,
    pub approvals: ProofMode,
    pub projects: ProofMode,
}

impl Default for ProofPolicy {
    fn default() -> Self {
        Self {
            submissions: ProofMode::Optional,
            approvals: ProofMode::Optional,
            projects: ProofMode::Required,
        }
    }
}

/// Signature material attached to a mutating request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedProof {
    pub nonce: u64,
    pub signature: String,
}

// ─────────────────────────────────────────────────────────
// Intents
// ─────────────────────────────────────────────────────────

/// The operation a proof authorizes. Each variant is its own primary type so a
/// signature for one operation can never be presented for another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent<'a> {
    CreateSubmission {
        project_id: &'a str,
        work_reference: &'a str,
    },
    DeleteSubmission {
        submission_id: &'a str,
    },
    ApproveSubmission {
        submission_id: &'a str,
    },
    CreateProject {
        name: &'a str,
        reward: &'a str,
    },
    UpdateProjectStatus {
        project_id: &'a str,
        status: &'a str,
    },
    AssignContributor {
        project_id: &'a str,
        contributor: &'a str,
    },
}

impl Intent<'_> {
    pub fn primary_type(&self) -> &'static str {
        match self {
            Self::CreateSubmission { .. } => "CreateSubmission",
            Self::DeleteSubmission { .. } => "DeleteSubmission",
            Self::ApproveSubmission { .. } => "ApproveSubmission",
            Self::CreateProject { .. } => "CreateProject",
            Self::UpdateProjectStatus { .. } => "UpdateProjectStatus",
            Self::AssignContributor { .. } => "AssignContributor",
        }
    }

    /// Operation-specific fields, followed by `wallet` and `nonce`.
    fn operation_fields(&self) -> Vec<(TypedField, Value)> {
        let string = |name: &str, v: &str| (TypedField::new(name, "string"), json!(v));
        match self {
            Self::CreateSubmission {
                project_id,
                work_reference,
            } => vec![
                string("projectId", project_id),
                string("workReference", work_reference),
            ],
            Self::DeleteSubmission { submission_id } | Self::ApproveSubmission { submission_id } => {
                vec![string("submissionId", submission_id)]
            }
            Self::CreateProject { name, reward } => {
                vec![string("name", name), string("reward", reward)]
            }
            Self::UpdateProjectStatus { project_id, status } => {
                vec![string("projectId", project_id), string("status", status)]
            }
            Self::AssignContributor {
                project_id,
                contributor,
            } => vec![
                string("projectId", project_id),
                (TypedField::new("contributor", "address"), json!(contributor)),
            ],
        }
    }
}

/// Builds typed data for intents under a fixed domain and checks proofs.
#[derive(Debug, Clone)]
pub struct ProofVerifier {
    domain: TypedDataDomain,
}

impl ProofVerifier {
    pub fn new(domain: TypedDataDomain) -> Self {
        Self { domain }
    }

    /// The exact payload a wallet must sign to authorize `intent`.
    pub fn typed_data(&self, intent: &Intent<'_>, wallet: &str, nonce: u64) -> TypedData {
        let mut fields = intent.operation_fields();
        fields.push((TypedField::new("wallet", "address"), json!(wallet)));
        fields.push((TypedField::new("nonce", "uint256"), json!(nonce)));

        let mut types = TypeSchema::new();
        types.insert(
            intent.primary_type().to_string(),
            fields.iter().map(|(f, _)| f.clone()).collect(),
        );
        let pairs: Vec<(&str, Value)> = fields
            .iter()
            .map(|(f, v)| (f.name.as_str(), v.clone()))
            .collect();

        TypedData {
            domain: self.domain.clone(),
            types,
            primary_type: intent.primary_type().to_string(),
            message: signature::message(&pairs),
        }
    }

    /// Enforce `mode` for `intent` claimed by `wallet`.
    pub fn check(
        &self,
        mode: ProofMode,
        intent: &Intent<'_>,
        wallet: &str,
        proof: Option<&SignedProof>,
    ) -> Result<()> {
        match (mode, proof) {
            (ProofMode::Disabled, _) => Ok(()),
            (ProofMode::Required, None) => {
                Err(EngineError::Unauthorized(DenyReason::MissingCredentials))
            }
            (ProofMode::Optional, None) => {
                debug!("Accepting unsigned {} from {wallet}", intent.primary_type());
                Ok(())
            }
            (_, Some(proof)) => self.require(intent, wallet, proof),
        }
    }

    /// Verify `proof` unconditionally.
    pub fn require(&self, intent: &Intent<'_>, wallet: &str, proof: &SignedProof) -> Result<()> {
        let data = self.typed_data(intent, wallet, proof.nonce);
        let signer = signature::verify(&data, &proof.signature)?;
        match authorize(wallet, Some(&signer)) {
            AuthDecision::Allowed => Ok(()),
            AuthDecision::Denied(_) => Err(EngineError::Unauthorized(DenyReason::SignerMismatch)),
        }
    }
}
