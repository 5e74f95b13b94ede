//! Exchange configuration record.
//!
//! The environment is read exactly once at startup into an
//! [`ExchangeConfig`]; every component receives the record (or the
//! fields it needs) by value. Nothing reads the environment past
//! initialization.

use serde::{Deserialize, Serialize};

/// Default exchange WebSocket port.
pub const DEFAULT_PORT: u16 = 8787;

/// Default spectator/observer port.
pub const DEFAULT_SPECTATOR_PORT: u16 = 8790;

/// Default worker stake percentage of the budget.
pub const DEFAULT_WORKER_STAKE_PCT: f64 = 0.05;

/// Default slash percentage of the stake on failure.
pub const DEFAULT_WORKER_SLASH_PCT: f64 = 0.5;

/// Default negotiation round ceiling.
pub const DEFAULT_NEGOTIATION_MAX_ROUNDS: u32 = 3;

/// Default starting credit grant for newly authenticated agents.
pub const DEFAULT_START_CREDITS: u64 = 1000;

/// Default contract deadline when the job payload carries none.
pub const DEFAULT_TIMEOUT_SECONDS: f64 = 900.0;

/// Auth handshake deadline; half-authed sessions are closed after this.
pub const AUTH_HANDSHAKE_TIMEOUT_SECONDS: u64 = 30;

/// When the GitHub ingress pays out a linked job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GithubPayOn {
    /// Settle when the linked PR's checks succeed.
    ChecksSuccess,
    /// Settle when the linked PR merges.
    Merge,
}

impl GithubPayOn {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "checks_success" => Some(Self::ChecksSuccess),
            "merge" => Some(Self::Merge),
            _ => None,
        }
    }
}

/// Startup configuration snapshot for the exchange process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// Exchange WebSocket port (`SYNAPSE_PORT`).
    pub port: u16,
    /// Spectator/observer port (`SYNAPSE_SPECTATOR_PORT`).
    pub spectator_port: u16,
    /// Worker stake as a fraction of the budget
    /// (`SYNAPSE_WORKER_STAKE_PCT`).
    pub worker_stake_pct: f64,
    /// Slashed fraction of the stake on failure
    /// (`SYNAPSE_WORKER_SLASH_PCT`).
    pub worker_slash_pct: f64,
    /// Negotiation round ceiling (`SYNAPSE_NEGOTIATION_MAX_ROUNDS`).
    pub negotiation_max_rounds: u32,
    /// Credit grant for new accounts created via authentication
    /// (`SYNAPSE_START_CREDITS`).
    pub start_credits: u64,
    /// SQLite database path (`DATABASE_URL`); `None` disables the
    /// persistence port and serves snapshots from memory.
    pub database_url: Option<String>,
    /// Shared secret for the GitHub ingress collaborator
    /// (`GITHUB_WEBHOOK_SECRET`).
    pub github_webhook_secret: Option<String>,
    /// Payout trigger for GitHub-linked jobs (`SYNAPSE_GH_PAY_ON`).
    pub github_pay_on: GithubPayOn,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            spectator_port: DEFAULT_SPECTATOR_PORT,
            worker_stake_pct: DEFAULT_WORKER_STAKE_PCT,
            worker_slash_pct: DEFAULT_WORKER_SLASH_PCT,
            negotiation_max_rounds: DEFAULT_NEGOTIATION_MAX_ROUNDS,
            start_credits: DEFAULT_START_CREDITS,
            database_url: None,
            github_webhook_secret: None,
            github_pay_on: GithubPayOn::ChecksSuccess,
        }
    }
}

impl ExchangeConfig {
    /// Builds the configuration record from the process environment.
    ///
    /// Unparseable values fall back to their defaults; this is the only
    /// place in the codebase that touches the environment.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            port: env_parse("SYNAPSE_PORT").unwrap_or(defaults.port),
            spectator_port: env_parse("SYNAPSE_SPECTATOR_PORT")
                .unwrap_or(defaults.spectator_port),
            worker_stake_pct: env_parse("SYNAPSE_WORKER_STAKE_PCT")
                .unwrap_or(defaults.worker_stake_pct),
            worker_slash_pct: env_parse("SYNAPSE_WORKER_SLASH_PCT")
                .unwrap_or(defaults.worker_slash_pct),
            negotiation_max_rounds: env_parse("SYNAPSE_NEGOTIATION_MAX_ROUNDS")
                .unwrap_or(defaults.negotiation_max_rounds),
            start_credits: env_parse("SYNAPSE_START_CREDITS").unwrap_or(defaults.start_credits),
            database_url: std::env::var("DATABASE_URL")
                .ok()
                .filter(|v| !v.is_empty()),
            github_webhook_secret: std::env::var("GITHUB_WEBHOOK_SECRET")
                .ok()
                .filter(|v| !v.is_empty()),
            github_pay_on: std::env::var("SYNAPSE_GH_PAY_ON")
                .ok()
                .as_deref()
                .and_then(GithubPayOn::parse)
                .unwrap_or(defaults.github_pay_on),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_contract() {
        let cfg = ExchangeConfig::default();
        assert_eq!(cfg.port, 8787);
        assert_eq!(cfg.spectator_port, 8790);
        assert!((cfg.worker_stake_pct - 0.05).abs() < f64::EPSILON);
        assert!((cfg.worker_slash_pct - 0.5).abs() < f64::EPSILON);
        assert_eq!(cfg.negotiation_max_rounds, 3);
        assert_eq!(cfg.start_credits, 1000);
        assert!(cfg.database_url.is_none());
        assert_eq!(cfg.github_pay_on, GithubPayOn::ChecksSuccess);
    }

    #[test]
    fn test_pay_on_parse() {
        assert_eq!(GithubPayOn::parse("merge"), Some(GithubPayOn::Merge));
        assert_eq!(
            GithubPayOn::parse("checks_success"),
            Some(GithubPayOn::ChecksSuccess)
        );
        assert_eq!(GithubPayOn::parse("other"), None);
    }
}
