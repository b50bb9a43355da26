//! Pure mapping from raw wire records to normalized entities.
//!
//! No I/O happens here. Missing identity fields produce
//! `MalformedRecord { field }`; they are never silently defaulted. Empty
//! strings are tolerated, absent keys are not.

use crate::api::{RawComment, RawIssue, RawLabel, RawPullRequestDetail, RawUser};
use crate::error::{Result, SyncError};
use crate::models::{
    CommentRecord, IssueRecord, IssueState, Label, MappedRecord, MergeState, PullRequestRecord,
    User,
};

fn missing(field: &'static str) -> SyncError {
    SyncError::MalformedRecord { field }
}

fn map_user(raw: &RawUser) -> Result<User> {
    Ok(User {
        gh_id: raw.id.ok_or_else(|| missing("user.id"))?,
        login: raw.login.clone().ok_or_else(|| missing("user.login"))?,
    })
}

fn map_labels(raw: &[RawLabel]) -> Result<Vec<Label>> {
    raw.iter()
        .map(|l| {
            Ok(Label {
                name: l.name.clone().ok_or_else(|| missing("labels.name"))?,
                color: l.color.clone(),
            })
        })
        .collect()
}

/// Map a raw issue. An issue carrying the pull-request link is really a
/// pull request and maps to `MappedRecord::PullRequest`, so one remote id
/// never produces both an issue row and a PR row.
pub fn map_issue(raw: &RawIssue) -> Result<MappedRecord> {
    let gh_id = raw.id.ok_or_else(|| missing("id"))?;
    let number = raw.number.ok_or_else(|| missing("number"))?;
    let title = raw.title.clone().ok_or_else(|| missing("title"))?;
    let state = raw.state.as_deref().ok_or_else(|| missing("state"))?;
    let created_at = raw.created_at.ok_or_else(|| missing("created_at"))?;
    let updated_at = raw.updated_at.ok_or_else(|| missing("updated_at"))?;
    let author = raw.user.as_ref().map(map_user).transpose()?;
    let labels = map_labels(&raw.labels)?;

    if let Some(link) = &raw.pull_request {
        let state = match state {
            "open" => MergeState::Open,
            "closed" if link.merged_at.is_some() => MergeState::Merged,
            "closed" => MergeState::Closed,
            _ => return Err(missing("state")),
        };
        return Ok(MappedRecord::PullRequest(PullRequestRecord {
            gh_id,
            number,
            title,
            body: raw.body.clone(),
            state,
            author,
            labels,
            // The issues listing does not carry branch refs.
            base_ref: None,
            head_ref: None,
            created_at,
            updated_at,
            closed_at: raw.closed_at,
            merged_at: link.merged_at,
        }));
    }

    let state = match state {
        "open" => IssueState::Open,
        "closed" => IssueState::Closed,
        _ => return Err(missing("state")),
    };
    Ok(MappedRecord::Issue(IssueRecord {
        gh_id,
        number,
        title,
        body: raw.body.clone(),
        state,
        author,
        labels,
        created_at,
        updated_at,
        closed_at: raw.closed_at,
    }))
}

pub fn map_pull(raw: &RawPullRequestDetail) -> Result<MappedRecord> {
    let gh_id = raw.id.ok_or_else(|| missing("id"))?;
    let number = raw.number.ok_or_else(|| missing("number"))?;
    let title = raw.title.clone().ok_or_else(|| missing("title"))?;
    let state = raw.state.as_deref().ok_or_else(|| missing("state"))?;
    let created_at = raw.created_at.ok_or_else(|| missing("created_at"))?;
    let updated_at = raw.updated_at.ok_or_else(|| missing("updated_at"))?;

    let state = match state {
        "open" => MergeState::Open,
        "closed" if raw.merged_at.is_some() => MergeState::Merged,
        "closed" => MergeState::Closed,
        _ => return Err(missing("state")),
    };

    Ok(MappedRecord::PullRequest(PullRequestRecord {
        gh_id,
        number,
        title,
        body: raw.body.clone(),
        state,
        author: raw.user.as_ref().map(map_user).transpose()?,
        labels: map_labels(&raw.labels)?,
        base_ref: raw.base.as_ref().and_then(|b| b.ref_name.clone()),
        head_ref: raw.head.as_ref().and_then(|h| h.ref_name.clone()),
        created_at,
        updated_at,
        closed_at: raw.closed_at,
        merged_at: raw.merged_at,
    }))
}

pub fn map_comment(raw: &RawComment) -> Result<MappedRecord> {
    let gh_id = raw.id.ok_or_else(|| missing("id"))?;
    let created_at = raw.created_at.ok_or_else(|| missing("created_at"))?;
    let updated_at = raw.updated_at.ok_or_else(|| missing("updated_at"))?;
    let parent_number = raw
        .issue_url
        .as_deref()
        .and_then(|u| u.rsplit('/').next())
        .and_then(|n| n.parse::<i64>().ok())
        .ok_or_else(|| missing("issue_url"))?;

    Ok(MappedRecord::Comment(CommentRecord {
        gh_id,
        parent_number,
        author: raw.user.as_ref().map(map_user).transpose()?,
        body: raw.body.clone().unwrap_or_default(),
        created_at,
        updated_at,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::RawPullRequestLink;
    use chrono::{DateTime, Utc};

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn raw_issue(id: i64, number: i64) -> RawIssue {
        RawIssue {
            id: Some(id),
            number: Some(number),
            title: Some("fix the frobnicator".into()),
            state: Some("open".into()),
            user: Some(RawUser {
                id: Some(7),
                login: Some("alice".into()),
            }),
            created_at: Some(ts(100)),
            updated_at: Some(ts(200)),
            ..Default::default()
        }
    }

    #[test]
    fn plain_issue_maps_to_issue() {
        let mapped = map_issue(&raw_issue(11, 1)).unwrap();
        match mapped {
            MappedRecord::Issue(issue) => {
                assert_eq!(issue.gh_id, 11);
                assert_eq!(issue.number, 1);
                assert_eq!(issue.state, IssueState::Open);
                assert_eq!(issue.author.as_ref().unwrap().login, "alice");
            }
            other => panic!("expected issue, got {other:?}"),
        }
    }

    #[test]
    fn issue_with_pr_link_maps_to_pull_request() {
        let mut raw = raw_issue(12, 2);
        raw.state = Some("closed".into());
        raw.pull_request = Some(RawPullRequestLink {
            url: Some("https://api.github.com/repos/a/b/pulls/2".into()),
            merged_at: Some(ts(150)),
        });
        match map_issue(&raw).unwrap() {
            MappedRecord::PullRequest(pr) => {
                assert_eq!(pr.gh_id, 12);
                assert_eq!(pr.state, MergeState::Merged);
                assert_eq!(pr.merged_at, Some(ts(150)));
            }
            other => panic!("expected pull request, got {other:?}"),
        }
    }

    #[test]
    fn closed_unmerged_pr_link_maps_closed() {
        let mut raw = raw_issue(13, 3);
        raw.state = Some("closed".into());
        raw.pull_request = Some(RawPullRequestLink::default());
        match map_issue(&raw).unwrap() {
            MappedRecord::PullRequest(pr) => assert_eq!(pr.state, MergeState::Closed),
            other => panic!("expected pull request, got {other:?}"),
        }
    }

    #[test]
    fn missing_identity_fields_are_rejected() {
        let mut raw = raw_issue(14, 4);
        raw.id = None;
        assert!(matches!(
            map_issue(&raw),
            Err(SyncError::MalformedRecord { field: "id" })
        ));

        let mut raw = raw_issue(15, 5);
        raw.updated_at = None;
        assert!(matches!(
            map_issue(&raw),
            Err(SyncError::MalformedRecord {
                field: "updated_at"
            })
        ));

        let mut raw = raw_issue(16, 6);
        raw.user = Some(RawUser {
            id: Some(9),
            login: None,
        });
        assert!(matches!(
            map_issue(&raw),
            Err(SyncError::MalformedRecord {
                field: "user.login"
            })
        ));
    }

    #[test]
    fn empty_title_is_tolerated() {
        let mut raw = raw_issue(17, 7);
        raw.title = Some(String::new());
        assert!(map_issue(&raw).is_ok());
    }

    #[test]
    fn absent_author_is_allowed() {
        // Deleted accounts come back with no user object.
        let mut raw = raw_issue(18, 8);
        raw.user = None;
        match map_issue(&raw).unwrap() {
            MappedRecord::Issue(issue) => assert!(issue.author.is_none()),
            other => panic!("expected issue, got {other:?}"),
        }
    }

    #[test]
    fn comment_parent_parsed_from_issue_url() {
        let raw = RawComment {
            id: Some(900),
            body: Some("looks good".into()),
            user: Some(RawUser {
                id: Some(8),
                login: Some("bob".into()),
            }),
            created_at: Some(ts(300)),
            updated_at: Some(ts(300)),
            issue_url: Some("https://api.github.com/repos/acme/widgets/issues/42".into()),
        };
        match map_comment(&raw).unwrap() {
            MappedRecord::Comment(c) => {
                assert_eq!(c.parent_number, 42);
                assert_eq!(c.gh_id, 900);
            }
            other => panic!("expected comment, got {other:?}"),
        }
    }

    #[test]
    fn comment_without_parent_url_is_malformed() {
        let raw = RawComment {
            id: Some(901),
            created_at: Some(ts(300)),
            updated_at: Some(ts(300)),
            ..Default::default()
        };
        assert!(matches!(
            map_comment(&raw),
            Err(SyncError::MalformedRecord { field: "issue_url" })
        ));
    }

    #[test]
    fn pull_detail_carries_branch_refs() {
        let raw = RawPullRequestDetail {
            id: Some(30),
            number: Some(9),
            title: Some("add ci".into()),
            state: Some("open".into()),
            base: Some(crate::api::RawBranchRef {
                ref_name: Some("main".into()),
            }),
            head: Some(crate::api::RawBranchRef {
                ref_name: Some("feature/ci".into()),
            }),
            created_at: Some(ts(100)),
            updated_at: Some(ts(200)),
            ..Default::default()
        };
        match map_pull(&raw).unwrap() {
            MappedRecord::PullRequest(pr) => {
                assert_eq!(pr.base_ref.as_deref(), Some("main"));
                assert_eq!(pr.head_ref.as_deref(), Some("feature/ci"));
                assert_eq!(pr.state, MergeState::Open);
            }
            other => panic!("expected pull request, got {other:?}"),
        }
    }
}
