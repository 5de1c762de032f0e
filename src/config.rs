use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

pub const WORKSPACE_ENV: &str = "BULLETIND_WORKSPACE";
pub const LOG_ENV: &str = "BULLETIND_LOG";
const DEFAULT_LOG_FILTER: &str = "bulletind=info";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    /// Opened before the first request when set.
    pub workspace: Option<PathBuf>,
    pub log_filter: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Self {
            workspace: non_empty(WORKSPACE_ENV).map(PathBuf::from),
            log_filter: non_empty(LOG_ENV),
        }
    }

    pub fn env_filter(&self) -> EnvFilter {
        self.log_filter
            .as_deref()
            .and_then(|f| EnvFilter::try_new(f).ok())
            .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
    }
}

/// Logs go to stderr; stdout carries the protocol.
pub fn init_tracing(config: &Config) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(config.env_filter())
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let cfg = Config::from_lookup(lookup(&[]));
        assert_eq!(cfg, Config::default());
        let _ = cfg.env_filter();
    }

    #[test]
    fn reads_workspace_and_filter() {
        let cfg = Config::from_lookup(lookup(&[
            (WORKSPACE_ENV, " /srv/ecole "),
            (LOG_ENV, "bulletind=debug"),
        ]));
        assert_eq!(cfg.workspace, Some(PathBuf::from("/srv/ecole")));
        assert_eq!(cfg.log_filter.as_deref(), Some("bulletind=debug"));
    }

    #[test]
    fn blank_values_are_ignored() {
        let cfg = Config::from_lookup(lookup(&[(WORKSPACE_ENV, "  "), (LOG_ENV, "")]));
        assert!(cfg.workspace.is_none());
        assert!(cfg.log_filter.is_none());
    }
}
