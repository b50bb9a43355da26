//! The reconciler: drives incremental sync per repository and resource
//! kind, turning pages of raw records into atomic local batches.
//!
//! Each (repository, kind) pair keeps a cursor holding the maximum remote
//! `updated_at` fully applied so far. Listings arrive newest first, so a
//! run walks pages until it reaches records at or below the cursor,
//! decides insert/update/skip per record against the local rows, and
//! commits each page atomically together with the continuation token. The
//! cursor timestamp only advances once the scan completes, held below any
//! record that failed and must be fetched again. Failures stay local: a
//! bad record is counted and skipped, a failing kind is reported and the
//! next kind still runs.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{GithubApi, RawComment, RawIssue, RawPullRequestDetail};
use crate::context::Context;
use crate::error::{Result, SyncError};
use crate::map::{map_comment, map_issue, map_pull};
use crate::models::{MappedRecord, Repository, ResourceKind};
use crate::page::{PageRequest, Paginator, RawPage};
use crate::store::{EntityBatch, Store};

/// One failure surfaced by a sync run: either a single record (with its
/// remote id) or a whole resource kind.
#[derive(Debug, Clone)]
pub struct SyncFailure {
    pub kind: ResourceKind,
    pub gh_id: Option<i64>,
    pub message: String,
}

impl SyncFailure {
    fn record(kind: ResourceKind, gh_id: i64, message: String) -> Self {
        SyncFailure {
            kind,
            gh_id: Some(gh_id),
            message,
        }
    }

    fn kind_level(kind: ResourceKind, message: String) -> Self {
        SyncFailure {
            kind,
            gh_id: None,
            message,
        }
    }
}

/// Aggregated outcome of a sync run.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
    pub failed: Vec<SyncFailure>,
}

impl SyncReport {
    pub fn merge(&mut self, other: SyncReport) {
        self.created += other.created;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.failed.extend(other.failed);
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Record types the engine can sync, tying together the fetch endpoint,
/// the raw ordering timestamp and the mapper.
#[async_trait]
trait Syncable: Sized + Send + Sync + Clone {
    const KIND: ResourceKind;

    fn raw_updated_at(&self) -> Option<DateTime<Utc>>;

    fn mapped(&self) -> Result<MappedRecord>;

    async fn fetch(
        api: &dyn GithubApi,
        owner: &str,
        name: &str,
        page: PageRequest,
    ) -> Result<RawPage<Self>>;
}

#[async_trait]
impl Syncable for RawIssue {
    const KIND: ResourceKind = ResourceKind::Issues;

    fn raw_updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    fn mapped(&self) -> Result<MappedRecord> {
        map_issue(self)
    }

    async fn fetch(
        api: &dyn GithubApi,
        owner: &str,
        name: &str,
        page: PageRequest,
    ) -> Result<RawPage<Self>> {
        api.list_repo_issues(owner, name, page).await
    }
}

#[async_trait]
impl Syncable for RawPullRequestDetail {
    const KIND: ResourceKind = ResourceKind::PullRequests;

    fn raw_updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    fn mapped(&self) -> Result<MappedRecord> {
        map_pull(self)
    }

    async fn fetch(
        api: &dyn GithubApi,
        owner: &str,
        name: &str,
        page: PageRequest,
    ) -> Result<RawPage<Self>> {
        api.list_repo_pulls(owner, name, page).await
    }
}

#[async_trait]
impl Syncable for RawComment {
    const KIND: ResourceKind = ResourceKind::Comments;

    fn raw_updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    fn mapped(&self) -> Result<MappedRecord> {
        map_comment(self)
    }

    async fn fetch(
        api: &dyn GithubApi,
        owner: &str,
        name: &str,
        page: PageRequest,
    ) -> Result<RawPage<Self>> {
        api.list_issue_comments(owner, name, page).await
    }
}

/// In-run identity of a mapped record. Pull requests key on the
/// repo-scoped number because the issues and pulls endpoints report
/// different remote ids for the same pull request.
fn record_key(record: &MappedRecord) -> (u8, i64) {
    match record {
        MappedRecord::Issue(r) => (0, r.gh_id),
        MappedRecord::PullRequest(r) => (1, r.number),
        MappedRecord::Comment(r) => (2, r.gh_id),
    }
}

pub struct SyncEngine {
    api: Arc<dyn GithubApi>,
    store: Store,
    ctx: Context,
}

impl SyncEngine {
    pub fn new(api: Arc<dyn GithubApi>, store: Store, ctx: Context) -> Self {
        SyncEngine { api, store, ctx }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Register a repository, filling in remote metadata when reachable.
    /// No sync history is created; the first sync run backfills.
    pub async fn add_repo(&self, owner: &str, name: &str) -> Result<Repository> {
        let repo = self.store.insert_repository(owner, name).await?;
        self.refresh_repo_meta(&repo).await?;
        self.store.get_repository(owner, name).await?.ok_or_else(|| {
            SyncError::Config(format!("repository {owner}/{name} vanished after insert"))
        })
    }

    async fn refresh_repo_meta(&self, repo: &Repository) -> Result<()> {
        match self.api.get_repo(&repo.owner, &repo.name).await {
            Ok(raw) => {
                self.store
                    .update_repository_meta(
                        repo.id,
                        raw.id,
                        raw.default_branch.as_deref(),
                        raw.description.as_deref(),
                    )
                    .await?;
            }
            Err(err) => {
                warn!(
                    "could not fetch metadata for {}: {}",
                    repo.full_name(),
                    err
                );
            }
        }
        Ok(())
    }

    /// Sync the requested resource kinds for one registered repository.
    ///
    /// Kinds run sequentially in the given order. `since_override` replaces
    /// the cursor as the incremental boundary for this run only; the cursor
    /// still never moves backwards. Cancellation is honored at page
    /// boundaries, leaving already committed batches in place.
    pub async fn sync_repo(
        &self,
        owner: &str,
        name: &str,
        kinds: &[ResourceKind],
        since_override: Option<DateTime<Utc>>,
        cancel: &CancellationToken,
    ) -> Result<SyncReport> {
        let repo = self.store.get_repository(owner, name).await?.ok_or_else(|| {
            SyncError::Config(format!(
                "repository {owner}/{name} is not registered, run `repo add` first"
            ))
        })?;
        self.refresh_repo_meta(&repo).await?;

        let mut report = SyncReport::default();
        for kind in kinds {
            if cancel.is_cancelled() {
                info!("sync of {} cancelled before {}", repo.full_name(), kind);
                break;
            }
            let kind_report = match kind {
                ResourceKind::Issues => {
                    self.sync_kind::<RawIssue>(&repo, since_override, cancel).await
                }
                ResourceKind::PullRequests => {
                    self.sync_kind::<RawPullRequestDetail>(&repo, since_override, cancel)
                        .await
                }
                ResourceKind::Comments => {
                    self.sync_kind::<RawComment>(&repo, since_override, cancel)
                        .await
                }
            };
            report.merge(kind_report);
        }
        info!(
            "sync {} done: created={} updated={} skipped={} failed={}",
            repo.full_name(),
            report.created,
            report.updated,
            report.skipped,
            report.failed.len()
        );
        Ok(report)
    }

    async fn sync_kind<T: Syncable>(
        &self,
        repo: &Repository,
        since_override: Option<DateTime<Utc>>,
        cancel: &CancellationToken,
    ) -> SyncReport {
        let kind = T::KIND;
        let mut report = SyncReport::default();

        let cursor = match self.store.get_cursor(repo.id, kind).await {
            Ok(cursor) => cursor,
            Err(err) => {
                report
                    .failed
                    .push(SyncFailure::kind_level(kind, err.to_string()));
                return report;
            }
        };
        let resume_token = cursor.as_ref().and_then(|c| c.page_token.clone());
        // A stored page token means the previous scan was interrupted.
        // Resume it without an incremental boundary: the remaining pages
        // hold records older than the committed high-water mark, and
        // change detection makes re-reading them idempotent.
        let boundary = if resume_token.is_some() {
            None
        } else {
            since_override.or(cursor.as_ref().map(|c| c.last_synced_at))
        };
        let seed = cursor.as_ref().map(|c| c.last_synced_at);
        let mut high_water = seed;
        let mut retry_floor: Option<DateTime<Utc>> = None;
        let mut token_written = false;

        let mut paginator = match resume_token {
            Some(token) => {
                info!(
                    "resuming interrupted {} scan for {}",
                    kind,
                    repo.full_name()
                );
                Paginator::<T>::resume_from(self.ctx.per_page, token)
            }
            None => {
                let mut p = Paginator::<T>::new(self.ctx.per_page);
                if let Some(b) = boundary {
                    p = p.with_stop_when(move |r: &T| {
                        r.raw_updated_at().map(|u| u <= b).unwrap_or(false)
                    });
                }
                p
            }
        };

        let mut seen: HashMap<(u8, i64), DateTime<Utc>> = HashMap::new();
        while let Some(req) = paginator.next_request() {
            if cancel.is_cancelled() {
                info!(
                    "{} sync for {} cancelled at page boundary",
                    kind,
                    repo.full_name()
                );
                break;
            }
            let page = match T::fetch(self.api.as_ref(), &repo.owner, &repo.name, req).await {
                Ok(page) => page,
                Err(err) => {
                    report.failed.push(SyncFailure::kind_level(
                        kind,
                        format!("page fetch failed: {err}"),
                    ));
                    return report;
                }
            };
            let records = paginator.accept(page);
            debug!("{}: got page of {} records", kind, records.len());

            let mut candidates = Vec::new();
            for raw in &records {
                match raw.mapped() {
                    Ok(mapped) => candidates.push(mapped),
                    Err(err) => {
                        warn!("{}: dropping record: {}", kind, err);
                        report
                            .failed
                            .push(SyncFailure::kind_level(kind, err.to_string()));
                    }
                }
            }

            // Records at or below the boundary were committed by an earlier
            // run; the boundary page may still carry newer ones above them.
            candidates.retain(|m| match boundary {
                Some(b) if m.updated_at() <= b => {
                    report.skipped += 1;
                    false
                }
                _ => true,
            });

            // In-run duplicates (records moving between pages mid-scan):
            // a later occurrence wins only if it is not older.
            let mut deduped = Vec::new();
            for mapped in candidates {
                let key = record_key(&mapped);
                match seen.get(&key) {
                    Some(&prev) if mapped.updated_at() <= prev => report.skipped += 1,
                    _ => {
                        seen.insert(key, mapped.updated_at());
                        deduped.push(mapped);
                    }
                }
            }

            let (batch, page_created, page_updated, orphan_floor) =
                match self.decide_actions(repo, kind, deduped, &mut report).await {
                    Ok(out) => out,
                    Err(err) => {
                        report
                            .failed
                            .push(SyncFailure::kind_level(kind, err.to_string()));
                        return report;
                    }
                };
            if let Some(floor) = orphan_floor {
                retry_floor = Some(retry_floor.map_or(floor, |r| r.min(floor)));
            }

            for record in batch.issues.iter().map(|r| r.updated_at).chain(
                batch
                    .pulls
                    .iter()
                    .map(|r| r.updated_at)
                    .chain(batch.comments.iter().map(|r| r.updated_at)),
            ) {
                high_water = Some(high_water.map_or(record, |h| h.max(record)));
            }

            // The cursor timestamp advances only once the scan completes,
            // held below any comment that failed and must be fetched
            // again. Mid-scan commits stamp the old watermark and persist
            // the continuation token, so an interrupted backfill resumes
            // instead of restarting from page one.
            let next_token = paginator.resume_token().map(str::to_string);
            let mut stamp = if next_token.is_none() { high_water } else { seed };
            if let Some(floor) = retry_floor {
                let cap = floor - chrono::Duration::seconds(1);
                stamp = Some(stamp.map_or(cap, |s| s.min(cap)));
            }
            let stamp = match stamp {
                Some(s) => s,
                None => {
                    // Nothing ever synced: a cursor row is only needed
                    // while a continuation token must be kept or cleared.
                    if next_token.is_none() && !token_written {
                        continue;
                    }
                    DateTime::UNIX_EPOCH
                }
            };
            match self
                .store
                .commit_batch(
                    repo.id,
                    kind,
                    batch,
                    stamp,
                    next_token.as_deref(),
                    self.ctx.commit_timeout,
                )
                .await
            {
                Ok(comment_failures) => {
                    token_written = next_token.is_some();
                    let mut created = page_created;
                    for (gh_id, message) in comment_failures {
                        created = created.saturating_sub(1);
                        report.failed.push(SyncFailure::record(kind, gh_id, message));
                    }
                    report.created += created;
                    report.updated += page_updated;
                }
                Err(err) => {
                    // Rolled back: this page's entities and the cursor
                    // advance are both gone, earlier pages stay committed.
                    warn!("{}: batch commit failed: {}", kind, err);
                    report
                        .failed
                        .push(SyncFailure::kind_level(kind, err.to_string()));
                    return report;
                }
            }
        }

        report
    }

    /// Decide insert/update/skip per record against the local rows and
    /// split out comments whose parent is not mirrored. Returns the oldest
    /// `updated_at` among those orphans so the caller can keep them inside
    /// the next incremental window.
    async fn decide_actions(
        &self,
        repo: &Repository,
        kind: ResourceKind,
        records: Vec<MappedRecord>,
        report: &mut SyncReport,
    ) -> Result<(EntityBatch, u64, u64, Option<DateTime<Utc>>)> {
        let mut issue_ids = Vec::new();
        let mut pull_numbers = Vec::new();
        let mut comment_ids = Vec::new();
        let mut parent_numbers = Vec::new();
        for record in &records {
            match record {
                MappedRecord::Issue(r) => issue_ids.push(r.gh_id),
                MappedRecord::PullRequest(r) => pull_numbers.push(r.number),
                MappedRecord::Comment(r) => {
                    comment_ids.push(r.gh_id);
                    parent_numbers.push(r.parent_number);
                }
            }
        }
        let local_issues = self.store.issue_updated_map(repo.id, &issue_ids).await?;
        let local_pulls = self.store.pull_updated_map(repo.id, &pull_numbers).await?;
        let local_comments = self.store.comment_updated_map(repo.id, &comment_ids).await?;
        let known_parents: HashSet<i64> = self
            .store
            .existing_parent_numbers(repo.id, &parent_numbers)
            .await?;

        let mut batch = EntityBatch::default();
        let mut created = 0u64;
        let mut updated = 0u64;
        let mut orphan_floor: Option<DateTime<Utc>> = None;
        for record in records {
            if let MappedRecord::Comment(c) = &record {
                if !known_parents.contains(&c.parent_number) {
                    orphan_floor =
                        Some(orphan_floor.map_or(c.updated_at, |f| f.min(c.updated_at)));
                    report.failed.push(SyncFailure::record(
                        kind,
                        c.gh_id,
                        format!("parent #{} not mirrored", c.parent_number),
                    ));
                    continue;
                }
            }
            let local = match &record {
                MappedRecord::Issue(r) => local_issues.get(&r.gh_id),
                MappedRecord::PullRequest(r) => local_pulls.get(&r.number),
                MappedRecord::Comment(r) => local_comments.get(&r.gh_id),
            };
            match local {
                None => {
                    created += 1;
                    batch.push(record);
                }
                Some(&local_updated) if record.updated_at() > local_updated => {
                    updated += 1;
                    batch.push(record);
                }
                Some(_) => report.skipped += 1,
            }
        }
        Ok((batch, created, updated, orphan_floor))
    }
}
