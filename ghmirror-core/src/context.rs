use std::env;
use std::time::Duration;

use crate::constants::{DEFAULT_API_BASE, DEFAULT_DB_PATH, DEFAULT_PER_PAGE};

/// Runtime configuration, read from the environment.
///
/// Every field has a usable default so `Context::default()` works out of the
/// box; `from_env()` overrides from `GHM_*` variables and `GITHUB_TOKEN`.
#[derive(Debug, Clone)]
pub struct Context {
    /// sqlite database file path, GHM_DB_PATH
    pub db_path: String,
    /// GitHub bearer token, GITHUB_TOKEN (unauthenticated when empty)
    pub github_token: Option<String>,
    /// API base URL, GHM_API_BASE
    pub api_base: String,
    /// records per page, GHM_PER_PAGE (clamped to 1..=100)
    pub per_page: u32,
    /// quota floor that triggers a pre-emptive wait, GHM_MIN_RATE_POINTS
    pub min_rate_points: i64,
    /// ceiling on a single rate-limit wait, GHM_MAX_RATE_WAIT (seconds)
    pub max_rate_wait: Duration,
    /// retry cap for transient errors, GHM_MAX_RETRIES
    pub max_retries: u32,
    /// exponential backoff base, GHM_RETRY_BASE_MS
    pub retry_base: Duration,
    /// storage batch commit timeout, GHM_COMMIT_TIMEOUT (seconds)
    pub commit_timeout: Duration,
    /// debug level: 0 none, 1 verbose, 2 trace, GHM_DEBUG
    pub debug: i32,
}

impl Default for Context {
    fn default() -> Self {
        Context {
            db_path: DEFAULT_DB_PATH.to_string(),
            github_token: None,
            api_base: DEFAULT_API_BASE.to_string(),
            per_page: DEFAULT_PER_PAGE,
            min_rate_points: 1,
            max_rate_wait: Duration::from_secs(3600),
            max_retries: 5,
            retry_base: Duration::from_millis(1000),
            commit_timeout: Duration::from_secs(30),
            debug: 0,
        }
    }
}

impl Context {
    /// Create context from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        let mut ctx = Context::default();

        if let Ok(v) = env::var("GHM_DB_PATH") {
            if !v.is_empty() {
                ctx.db_path = v;
            }
        }
        if let Ok(v) = env::var("GITHUB_TOKEN") {
            if !v.is_empty() {
                ctx.github_token = Some(v);
            }
        }
        if let Ok(v) = env::var("GHM_API_BASE") {
            if !v.is_empty() {
                ctx.api_base = v.trim_end_matches('/').to_string();
            }
        }
        if let Ok(v) = env::var("GHM_PER_PAGE") {
            ctx.per_page = v.parse::<u32>()?.clamp(1, 100);
        }
        if let Ok(v) = env::var("GHM_MIN_RATE_POINTS") {
            ctx.min_rate_points = v.parse()?;
        }
        if let Ok(v) = env::var("GHM_MAX_RATE_WAIT") {
            ctx.max_rate_wait = Duration::from_secs(v.parse()?);
        }
        if let Ok(v) = env::var("GHM_MAX_RETRIES") {
            ctx.max_retries = v.parse()?;
        }
        if let Ok(v) = env::var("GHM_RETRY_BASE_MS") {
            ctx.retry_base = Duration::from_millis(v.parse()?);
        }
        if let Ok(v) = env::var("GHM_COMMIT_TIMEOUT") {
            ctx.commit_timeout = Duration::from_secs(v.parse()?);
        }
        if let Ok(v) = env::var("GHM_DEBUG") {
            ctx.debug = v.parse()?;
        }

        Ok(ctx)
    }

    /// sqlite connection URL for the configured database file
    pub fn sqlite_url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.db_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_context() {
        let ctx = Context::default();
        assert_eq!(ctx.db_path, "ghmirror.db");
        assert_eq!(ctx.api_base, "https://api.github.com");
        assert_eq!(ctx.per_page, 100);
        assert_eq!(ctx.max_retries, 5);
        assert!(ctx.github_token.is_none());
    }

    #[test]
    fn sqlite_url_creates_file_mode() {
        let ctx = Context::default();
        assert_eq!(ctx.sqlite_url(), "sqlite://ghmirror.db?mode=rwc");
    }
}
