//! Config file loading.
//!
//! `load()` runs:
//! 1. Parse the file (or start from defaults when no path is given)
//! 2. Apply environment fallbacks
//! 3. Validate

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, info};

use crate::error::{ConfigError, ConfigResult};
use crate::types::Config;
use crate::validate;

/// Maximum allowed config file size (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1_048_576;

/// Environment variables consulted for the token, in priority order.
const TOKEN_VARS: &[&str] = &["DCORE_TOKEN", "DISCORD_TOKEN"];

/// Environment variable overriding `logging.level`.
const LOG_LEVEL_VAR: &str = "DCORE_LOG";

/// Load the configuration from `path` (if any) and `env_vars`.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file is unreadable, malformed, or the
/// merged configuration fails validation.
pub fn load(path: Option<&Path>, env_vars: &HashMap<String, String>) -> ConfigResult<Config> {
    let mut config = match path {
        Some(p) => {
            let config = read_file(p)?;
            info!(path = %p.display(), "loaded config file");
            config
        },
        None => Config::default(),
    };

    let applied = apply_env_fallbacks(&mut config, env_vars);
    if applied > 0 {
        debug!(count = applied, "applied environment variable fallbacks");
    }

    validate::validate(&config)?;
    Ok(config)
}

/// Read and parse a single file without environment fallbacks.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file cannot be read or parsed.
pub fn read_file(path: &Path) -> ConfigResult<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.display().to_string(),
        source: e,
    })?;

    // Checked after reading to avoid a stat/read race.
    if content.len() as u64 > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::ValidationError {
            field: path.display().to_string(),
            message: format!(
                "config file is {} bytes, exceeding the {MAX_CONFIG_FILE_SIZE} byte limit",
                content.len()
            ),
        });
    }

    parse(&path.display().to_string(), &content)
}

/// Parse TOML text into a [`Config`].
///
/// # Errors
///
/// Returns [`ConfigError::ParseError`] tagged with `origin`.
pub fn parse(origin: &str, content: &str) -> ConfigResult<Config> {
    toml::from_str(content).map_err(|e| ConfigError::ParseError {
        path: origin.to_owned(),
        source: e,
    })
}

/// Snapshot of the process environment.
#[must_use]
pub fn collect_env_vars() -> HashMap<String, String> {
    std::env::vars().collect()
}

/// Fill unset fields from the environment. Returns how many were applied.
pub fn apply_env_fallbacks(config: &mut Config, env_vars: &HashMap<String, String>) -> usize {
    let mut applied = 0usize;

    if config.token.is_none()
        && let Some(token) = TOKEN_VARS
            .iter()
            .filter_map(|var| env_vars.get(*var))
            .find(|v| !v.is_empty())
    {
        config.token = Some(token.clone());
        applied = applied.saturating_add(1);
    }

    if let Some(level) = env_vars.get(LOG_LEVEL_VAR).filter(|v| !v.is_empty()) {
        config.logging.level.clone_from(level);
        applied = applied.saturating_add(1);
    }

    applied
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn load_without_file_uses_defaults() {
        let config = load(None, &HashMap::new()).unwrap();
        assert!(config.token.is_none());
        assert_eq!(config.http.max_retries, 10);
        assert_eq!(config.gateway.hello_timeout_secs, 30);
    }

    #[test]
    fn load_reads_file_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dcore.toml");
        std::fs::write(
            &path,
            r#"
token = "file-token"

[http]
max_retries = 3

[gateway]
shard_count = 4
shard_ids = [0, 1]
"#,
        )
        .unwrap();

        let config = load(Some(&path), &HashMap::new()).unwrap();
        assert_eq!(config.token.as_deref(), Some("file-token"));
        assert_eq!(config.http.max_retries, 3);
        assert_eq!(config.gateway.shard_count, Some(4));
        assert_eq!(config.gateway.shard_ids, Some(vec![0, 1]));
        // Untouched fields keep their defaults.
        assert_eq!(config.http.backoff_base_ms, 500);
    }

    #[test]
    fn token_falls_back_to_environment() {
        let vars = env(&[("DISCORD_TOKEN", "env-token")]);
        let config = load(None, &vars).unwrap();
        assert_eq!(config.token.as_deref(), Some("env-token"));
    }

    #[test]
    fn dcore_token_wins_over_discord_token() {
        let vars = env(&[("DISCORD_TOKEN", "second"), ("DCORE_TOKEN", "first")]);
        let config = load(None, &vars).unwrap();
        assert_eq!(config.token.as_deref(), Some("first"));
    }

    #[test]
    fn file_token_is_not_overridden_by_environment() {
        let mut config = parse("<test>", "token = \"from-file\"").unwrap();
        let applied = apply_env_fallbacks(&mut config, &env(&[("DCORE_TOKEN", "from-env")]));
        assert_eq!(applied, 0);
        assert_eq!(config.token.as_deref(), Some("from-file"));
    }

    #[test]
    fn log_level_override() {
        let config = load(None, &env(&[("DCORE_LOG", "debug")])).unwrap();
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = load(Some(&dir.path().join("absent.toml")), &HashMap::new());
        assert!(matches!(result, Err(ConfigError::ReadError { .. })));
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[http\nmax_retries = ").unwrap();
        let result = load(Some(&path), &HashMap::new());
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn oversized_config_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge.toml");
        let data = "x = \"".to_owned() + &"a".repeat(1_100_000) + "\"";
        std::fs::write(&path, data).unwrap();

        let result = read_file(&path);
        assert!(
            matches!(result, Err(ConfigError::ValidationError { .. })),
            "Expected ValidationError for oversized config, got: {result:?}"
        );
    }

    #[test]
    fn debug_output_redacts_token() {
        let config = parse("<test>", "token = \"super-secret\"").unwrap();
        let debug_str = format!("{config:?}");
        assert!(!debug_str.contains("super-secret"));
        assert!(debug_str.contains("has_token: true"));
    }

    #[test]
    fn serialize_omits_token() {
        let config = parse("<test>", "token = \"super-secret\"").unwrap();
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("super-secret"));
        assert!(!json.contains("\"token\""));
    }
}
