//! Configuration for chatgate.
//!
//! Everything comes from environment variables (a `.env` file is loaded by
//! the binary before this runs). Invalid values fail fast at startup rather
//! than being coerced.

use std::path::PathBuf;

use crate::ident::IdentToken;
use crate::policy::{GatePolicy, PolicyMode};

/// Error from configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Main configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the store files and their locks.
    pub state_dir: PathBuf,
    pub policy: GatePolicy,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let state_dir = optional_env("CHATGATE_HOME")?
            .map(PathBuf::from)
            .unwrap_or_else(default_state_dir);

        let dm = policy_env("CHATGATE_DM_POLICY", PolicyMode::Pairing)?;
        let group = policy_env("CHATGATE_GROUP_POLICY", PolicyMode::Allowlist)?;

        let group_require_mention = optional_env("CHATGATE_GROUP_REQUIRE_MENTION")?
            .map(|s| s.parse())
            .transpose()
            .map_err(|e| ConfigError::InvalidValue {
                key: "CHATGATE_GROUP_REQUIRE_MENTION".to_string(),
                message: format!("must be 'true' or 'false': {e}"),
            })?
            .unwrap_or(true);

        let bot_handle = optional_env("CHATGATE_BOT_HANDLE")?;
        let mention_keywords = optional_env("CHATGATE_MENTION_KEYWORDS")?
            .map(|s| split_list(&s))
            .unwrap_or_default();

        let allow_from = optional_env("CHATGATE_ALLOW_FROM")?
            .map(|s| {
                split_list(&s)
                    .iter()
                    .map(|raw| {
                        IdentToken::parse(raw).map_err(|e| ConfigError::InvalidValue {
                            key: "CHATGATE_ALLOW_FROM".to_string(),
                            message: e.to_string(),
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            state_dir,
            policy: GatePolicy {
                dm,
                group,
                group_require_mention,
                bot_handle,
                mention_keywords,
                allow_from,
            },
        })
    }
}

/// Default state directory (~/.chatgate).
pub fn default_state_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".chatgate")
}

fn policy_env(key: &str, default: PolicyMode) -> Result<PolicyMode, ConfigError> {
    // Unrecognized values are kept and fail closed at evaluation time, so a
    // typo in the policy never silently opens the gate.
    match optional_env(key)? {
        Some(s) => Ok(s.parse().unwrap_or(default)),
        None => Ok(default),
    }
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

fn optional_env(key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(val) if val.is_empty() => Ok(None),
        Ok(val) => Ok(Some(val)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_list() {
        assert_eq!(split_list("a, b ,,c"), vec!["a", "b", "c"]);
        assert!(split_list("  ").is_empty());
    }

    #[test]
    fn test_policy_mode_round_trip() {
        for mode in ["disabled", "open", "allowlist", "pairing"] {
            let parsed: PolicyMode = mode.parse().unwrap();
            assert_eq!(parsed.to_string(), mode);
        }
        assert!(matches!(
            "Something-Else".parse::<PolicyMode>().unwrap(),
            PolicyMode::Other(_)
        ));
    }
}
