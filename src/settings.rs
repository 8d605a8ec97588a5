//! Environment-driven configuration.
//!
//! Settings are read once at startup from the process environment, with a
//! `.env` file honored when present. Collaborator credentials are optional:
//! an absent key leaves the corresponding provider unconfigured, which
//! degrades the affected stages instead of refusing to run.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

const ENV_MAX_REVISIONS: &str = "REPORTWEAVE_MAX_REVISIONS";
const ENV_OUTPUT_DIR: &str = "REPORTWEAVE_OUTPUT_DIR";
const ENV_DATA_API_KEY: &str = "REPORTWEAVE_DATA_API_KEY";
const ENV_LLM_API_KEY: &str = "REPORTWEAVE_LLM_API_KEY";
const ENV_DEBUG: &str = "REPORTWEAVE_DEBUG";

/// Malformed environment value. Surfaced before a run starts; maps to
/// process exit code 1 in the CLI.
#[derive(Debug, Error, Diagnostic)]
pub enum SettingsError {
    #[error("{var} must be a non-negative integer, got `{value}`")]
    #[diagnostic(code(reportweave::settings::invalid_int))]
    InvalidInt { var: String, value: String },
}

/// Resolved runtime configuration.
#[derive(Clone, Debug)]
pub struct Settings {
    /// Revision-loop budget per run.
    pub max_revisions: u32,
    /// Directory where rendered reports are written.
    pub output_dir: PathBuf,
    /// Credential for the fundamentals/market data provider.
    pub data_api_key: Option<String>,
    /// Credential for the language-model provider.
    pub llm_api_key: Option<String>,
    /// Widens log filtering to debug for this crate.
    pub debug: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_revisions: 1,
            output_dir: PathBuf::from("reports"),
            data_api_key: None,
            llm_api_key: None,
            debug: false,
        }
    }
}

impl Settings {
    /// Load from the process environment, reading `.env` first if present.
    pub fn from_env() -> Result<Self, SettingsError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load from an arbitrary variable source. Split out so the parsing
    /// rules are testable without touching process globals.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SettingsError> {
        let defaults = Self::default();

        let max_revisions = match lookup(ENV_MAX_REVISIONS) {
            Some(raw) => raw.trim().parse::<u32>().map_err(|_| SettingsError::InvalidInt {
                var: ENV_MAX_REVISIONS.to_string(),
                value: raw,
            })?,
            None => defaults.max_revisions,
        };

        let output_dir = lookup(ENV_OUTPUT_DIR)
            .map(PathBuf::from)
            .unwrap_or(defaults.output_dir);

        let non_empty = |v: String| if v.trim().is_empty() { None } else { Some(v) };

        Ok(Self {
            max_revisions,
            output_dir,
            data_api_key: lookup(ENV_DATA_API_KEY).and_then(non_empty),
            llm_api_key: lookup(ENV_LLM_API_KEY).and_then(non_empty),
            debug: lookup(ENV_DEBUG).map(|v| truthy(&v)).unwrap_or(defaults.debug),
        })
    }
}

fn truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashMap;

    fn env(pairs: &[(&str, &str)]) -> FxHashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let settings = Settings::from_lookup(|_| None).unwrap();
        assert_eq!(settings.max_revisions, 1);
        assert_eq!(settings.output_dir, PathBuf::from("reports"));
        assert!(settings.data_api_key.is_none());
        assert!(!settings.debug);
    }

    #[test]
    fn values_parse_from_lookup() {
        let vars = env(&[
            (ENV_MAX_REVISIONS, "3"),
            (ENV_OUTPUT_DIR, "/tmp/out"),
            (ENV_DATA_API_KEY, "k-123"),
            (ENV_DEBUG, "true"),
        ]);
        let settings = Settings::from_lookup(|var| vars.get(var).cloned()).unwrap();
        assert_eq!(settings.max_revisions, 3);
        assert_eq!(settings.output_dir, PathBuf::from("/tmp/out"));
        assert_eq!(settings.data_api_key.as_deref(), Some("k-123"));
        assert!(settings.debug);
    }

    #[test]
    fn malformed_revision_budget_is_an_error() {
        let vars = env(&[(ENV_MAX_REVISIONS, "often")]);
        let err = Settings::from_lookup(|var| vars.get(var).cloned()).unwrap_err();
        assert!(matches!(err, SettingsError::InvalidInt { .. }));
    }

    #[test]
    fn blank_credentials_stay_unconfigured() {
        let vars = env(&[(ENV_LLM_API_KEY, "  ")]);
        let settings = Settings::from_lookup(|var| vars.get(var).cloned()).unwrap();
        assert!(settings.llm_api_key.is_none());
    }

    #[test]
    fn debug_flag_accepts_common_truthy_spellings() {
        for spelling in ["1", "TRUE", "yes", "On"] {
            let vars = env(&[(ENV_DEBUG, spelling)]);
            let settings = Settings::from_lookup(|var| vars.get(var).cloned()).unwrap();
            assert!(settings.debug, "{spelling} should be truthy");
        }
        let vars = env(&[(ENV_DEBUG, "nope")]);
        let settings = Settings::from_lookup(|var| vars.get(var).cloned()).unwrap();
        assert!(!settings.debug);
    }
}
