use std::path::PathBuf;

pub const LOG_ENV: &str = "ATTENDOD_LOG";
pub const WORKSPACE_ENV: &str = "ATTENDOD_WORKSPACE";
const DEFAULT_LOG_FILTER: &str = "info";

/// Process-level settings. Per-workspace settings live in the `settings` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub log_filter: String,
    /// Opened before the first request when set.
    pub workspace: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let non_blank = |key: &str| {
            get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Self {
            log_filter: non_blank(LOG_ENV).unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
            workspace: non_blank(WORKSPACE_ENV).map(PathBuf::from),
        }
    }
}
