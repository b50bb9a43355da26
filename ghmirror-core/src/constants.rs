//! Shared constants for the ghmirror tools.

/// Default GitHub REST API base URL
pub const DEFAULT_API_BASE: &str = "https://api.github.com";

/// REST API version header value sent with every request
pub const API_VERSION: &str = "2022-11-28";

/// User-Agent header value (GitHub rejects requests without one)
pub const USER_AGENT: &str = "ghmirror";

/// Default records per page (GitHub caps list endpoints at 100)
pub const DEFAULT_PER_PAGE: u32 = 100;

/// Default sqlite database file
pub const DEFAULT_DB_PATH: &str = "ghmirror.db";

/// Rate limit headers
pub const HDR_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
pub const HDR_RATELIMIT_RESET: &str = "x-ratelimit-reset";
pub const HDR_RETRY_AFTER: &str = "retry-after";
