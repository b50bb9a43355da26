//! Normalized entities stored in the local database.
//!
//! Remote identity is the GitHub id (`gh_id`) for issues, comments and
//! users; pull requests key on the repo-scoped `number` because the two
//! endpoints that report them disagree on ids. Enums are stored as
//! lowercase text.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::{Result, SyncError};

/// Resource kinds a sync cursor is tracked for, in deterministic sync order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Issues,
    PullRequests,
    Comments,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 3] = [
        ResourceKind::Issues,
        ResourceKind::PullRequests,
        ResourceKind::Comments,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Issues => "issues",
            ResourceKind::PullRequests => "pull_requests",
            ResourceKind::Comments => "comments",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "issues" => Ok(ResourceKind::Issues),
            "pull_requests" | "pulls" => Ok(ResourceKind::PullRequests),
            "comments" => Ok(ResourceKind::Comments),
            other => Err(SyncError::Config(format!(
                "unknown resource kind: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueState {
    Open,
    Closed,
}

impl IssueState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueState::Open => "open",
            IssueState::Closed => "closed",
        }
    }
}

/// Pull request lifecycle state. `Closed` means closed without merging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeState {
    Open,
    Closed,
    Merged,
}

impl MergeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeState::Open => "open",
            MergeState::Closed => "closed",
            MergeState::Merged => "merged",
        }
    }
}

/// Comment parent, resolved at write time to an issue or pull request,
/// carrying the parent's repo-scoped number. The number is the stable
/// handle; a pull request's remote id depends on the endpoint that last
/// reported it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentParent {
    Issue(i64),
    PullRequest(i64),
}

impl CommentParent {
    pub fn kind_str(&self) -> &'static str {
        match self {
            CommentParent::Issue(_) => "issue",
            CommentParent::PullRequest(_) => "pull_request",
        }
    }

    pub fn number(&self) -> i64 {
        match self {
            CommentParent::Issue(n) | CommentParent::PullRequest(n) => *n,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub gh_id: i64,
    pub login: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub color: Option<String>,
}

/// A registered repository row.
#[derive(Debug, Clone, FromRow)]
pub struct Repository {
    pub id: i64,
    pub gh_id: Option<i64>,
    pub owner: String,
    pub name: String,
    pub default_branch: Option<String>,
    pub description: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl Repository {
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

/// Mapped issue ready for storage.
#[derive(Debug, Clone, PartialEq)]
pub struct IssueRecord {
    pub gh_id: i64,
    pub number: i64,
    pub title: String,
    pub body: Option<String>,
    pub state: IssueState,
    pub author: Option<User>,
    pub labels: Vec<Label>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

/// Mapped pull request ready for storage.
#[derive(Debug, Clone, PartialEq)]
pub struct PullRequestRecord {
    pub gh_id: i64,
    pub number: i64,
    pub title: String,
    pub body: Option<String>,
    pub state: MergeState,
    pub author: Option<User>,
    pub labels: Vec<Label>,
    pub base_ref: Option<String>,
    pub head_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub merged_at: Option<DateTime<Utc>>,
}

/// Mapped comment ready for storage. The parent is carried as the
/// repo-scoped issue/PR number and resolved to a row at write time.
#[derive(Debug, Clone, PartialEq)]
pub struct CommentRecord {
    pub gh_id: i64,
    pub parent_number: i64,
    pub author: Option<User>,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Output of the entity mapper. A raw issue carrying the pull-request link
/// maps to `PullRequest`, so one remote id always yields exactly one row.
#[derive(Debug, Clone, PartialEq)]
pub enum MappedRecord {
    Issue(IssueRecord),
    PullRequest(PullRequestRecord),
    Comment(CommentRecord),
}

impl MappedRecord {
    pub fn gh_id(&self) -> i64 {
        match self {
            MappedRecord::Issue(r) => r.gh_id,
            MappedRecord::PullRequest(r) => r.gh_id,
            MappedRecord::Comment(r) => r.gh_id,
        }
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        match self {
            MappedRecord::Issue(r) => r.updated_at,
            MappedRecord::PullRequest(r) => r.updated_at,
            MappedRecord::Comment(r) => r.updated_at,
        }
    }
}

/// Per-(repository, resource kind) sync watermark.
///
/// `last_synced_at` is the maximum remote `updated_at` fully applied so
/// far, not wall-clock time. `page_token` is set while a paginated scan is
/// interrupted mid-flight and cleared once the scan completes.
#[derive(Debug, Clone, FromRow)]
pub struct SyncCursor {
    pub repository_id: i64,
    pub resource_kind: String,
    pub last_synced_at: DateTime<Utc>,
    pub page_token: Option<String>,
}

/// Read-model row for issue/PR listings.
#[derive(Debug, Clone, FromRow)]
pub struct IssueSummary {
    pub number: i64,
    pub title: String,
    pub state: String,
    pub author: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Read-model row for comment listings.
#[derive(Debug, Clone, FromRow)]
pub struct CommentSummary {
    pub author: Option<String>,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// One row of a stats aggregation: login and count, ordered by count.
#[derive(Debug, Clone, FromRow)]
pub struct UserCount {
    pub login: String,
    pub cnt: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_kind_round_trip() {
        for kind in ResourceKind::ALL {
            assert_eq!(ResourceKind::parse(kind.as_str()).unwrap(), kind);
        }
        assert_eq!(
            ResourceKind::parse("pulls").unwrap(),
            ResourceKind::PullRequests
        );
        assert!(ResourceKind::parse("gists").is_err());
    }

    #[test]
    fn comment_parent_accessors() {
        let p = CommentParent::PullRequest(42);
        assert_eq!(p.kind_str(), "pull_request");
        assert_eq!(p.number(), 42);
    }
}
