//! Application configuration loaded from environment variables.

use std::str::FromStr;

use crate::auth::{ProofMode, ProofPolicy};
use crate::errors::{EngineError, Result};
use crate::signature::{normalize_address, TypedDataDomain};
use crate::webhook::WebhookSettings;

#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite connection string (e.g. sqlite:./marketplace.db)
    pub database_url: String,
    /// Port for the REST API server
    pub api_port: u16,
    /// Merge-webhook enablement and shared secret
    pub webhook: WebhookSettings,
    /// Which operation classes demand a signed proof
    pub proof_policy: ProofPolicy,
    /// Typed-data domain every proof is signed under
    pub domain: TypedDataDomain,
    /// Payment endpoint; awards are only logged when unset
    pub award_url: Option<String>,
    /// Upper bound on one award request, in seconds
    pub award_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| env_var(&lookup, key);

        let verifying_contract = match var("EIP712_VERIFYING_CONTRACT") {
            Ok(raw) => Some(normalize_address(&raw).map_err(|_| {
                EngineError::Config("Invalid EIP712_VERIFYING_CONTRACT".to_string())
            })?),
            Err(_) => None,
        };

        Ok(Config {
            database_url: var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./marketplace.db".to_string()),
            api_port: parsed(&lookup, "API_PORT", "3001")?,
            webhook: WebhookSettings {
                enabled: parse_flag(&lookup, "WEBHOOK_AUTO_AWARD_ENABLED")?,
                shared_secret: var("WEBHOOK_SHARED_SECRET").ok(),
            },
            proof_policy: ProofPolicy {
                submissions: proof_mode(&lookup, "SUBMISSION_PROOF_MODE", ProofMode::Optional)?,
                approvals: proof_mode(&lookup, "APPROVAL_PROOF_MODE", ProofMode::Optional)?,
                projects: proof_mode(&lookup, "PROJECT_PROOF_MODE", ProofMode::Required)?,
            },
            domain: TypedDataDomain {
                name: Some(
                    var("EIP712_DOMAIN_NAME").unwrap_or_else(|_| "Marketplace".to_string()),
                ),
                version: Some(var("EIP712_DOMAIN_VERSION").unwrap_or_else(|_| "1".to_string())),
                chain_id: Some(parsed(&lookup, "EIP712_CHAIN_ID", "1")?),
                verifying_contract,
            },
            award_url: var("AWARD_DISPATCHER_URL").ok(),
            award_timeout_secs: parsed(&lookup, "AWARD_TIMEOUT_SECS", "30")?,
        })
    }
}

/// Empty values count as unset.
fn env_var<F>(lookup: &F, key: &str) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| EngineError::Config(format!("Missing env var: {key}")))
}

fn parsed<F, T>(lookup: &F, key: &str, default: &str) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    env_var(lookup, key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| EngineError::Config(format!("Invalid {key}")))
}

fn parse_flag<F>(lookup: &F, key: &str) -> Result<bool>
where
    F: Fn(&str) -> Option<String>,
{
    match env_var(lookup, key) {
        Err(_) => Ok(false),
        Ok(v) => match v.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(EngineError::Config(format!("Invalid {key}"))),
        },
    }
}

fn proof_mode<F>(lookup: &F, key: &str, default: ProofMode) -> Result<ProofMode>
where
    F: Fn(&str) -> Option<String>,
{
    match env_var(lookup, key) {
        Err(_) => Ok(default),
        Ok(v) => v
            .parse()
            .map_err(|e| EngineError::Config(format!("Invalid {key}: {e}"))),
    }
}
