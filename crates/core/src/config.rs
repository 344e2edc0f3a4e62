//! Configuration source resolution.
//!
//! Precedence for the rule document location: explicit path argument,
//! then the `DYNAPROBE_CONFIG_PATH` env var, then a fixed default.

use std::env;
use std::path::PathBuf;

/// Env var naming the rule document path.
pub const ENV_CONFIG_PATH: &str = "DYNAPROBE_CONFIG_PATH";

/// Fallback rule document path when nothing else is configured.
pub const DEFAULT_CONFIG_PATH: &str = "config/instrumentation.json";

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Resolve the rule document path: explicit argument wins, then the
/// env var, then the default.
pub fn resolve_config_path(explicit: Option<&str>) -> PathBuf {
    match explicit {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => PathBuf::from(env_opt(ENV_CONFIG_PATH).unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_path_wins() {
        let path = resolve_config_path(Some("/tmp/rules.json"));
        assert_eq!(path, PathBuf::from("/tmp/rules.json"));
    }

    #[test]
    fn empty_explicit_falls_through() {
        // Env state is shared across the test binary, so only assert
        // that the empty string is not taken literally.
        let path = resolve_config_path(Some(""));
        assert_ne!(path, PathBuf::from(""));
    }

    #[test]
    fn default_used_without_env() {
        if env::var(ENV_CONFIG_PATH).is_err() {
            assert_eq!(resolve_config_path(None), PathBuf::from(DEFAULT_CONFIG_PATH));
        }
    }
}
