//! sqlite persistence: mirrored entities, sync cursors, stats queries.
//!
//! All entity writes for one page go through [`Store::commit_batch`], a
//! single transaction that also advances the sync cursor, so a batch is
//! either fully visible or not at all.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool, Transaction};
use std::time::Duration;
use tracing::{debug, info};

use crate::context::Context;
use crate::error::{is_unique_violation, Result, SyncError};
use crate::models::{
    CommentParent, CommentRecord, CommentSummary, IssueRecord, IssueSummary, Label, MappedRecord,
    PullRequestRecord, Repository, ResourceKind, SyncCursor, User, UserCount,
};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        gh_id INTEGER NOT NULL UNIQUE,
        login TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS repositories (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        gh_id INTEGER UNIQUE,
        owner TEXT NOT NULL,
        name TEXT NOT NULL,
        default_branch TEXT,
        description TEXT,
        last_synced_at TEXT,
        UNIQUE(owner, name)
    )",
    "CREATE TABLE IF NOT EXISTS issues (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        gh_id INTEGER NOT NULL UNIQUE,
        repository_id INTEGER NOT NULL REFERENCES repositories(id),
        number INTEGER NOT NULL,
        title TEXT NOT NULL,
        body TEXT,
        state TEXT NOT NULL,
        author_id INTEGER REFERENCES users(id),
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        closed_at TEXT,
        UNIQUE(repository_id, number)
    )",
    // pull_requests.gh_id is not unique: the issues and pulls endpoints
    // report different remote ids for the same pull request, so the stable
    // identity is (repository_id, number).
    "CREATE TABLE IF NOT EXISTS pull_requests (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        gh_id INTEGER NOT NULL,
        repository_id INTEGER NOT NULL REFERENCES repositories(id),
        number INTEGER NOT NULL,
        title TEXT NOT NULL,
        body TEXT,
        state TEXT NOT NULL,
        author_id INTEGER REFERENCES users(id),
        base_ref TEXT,
        head_ref TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        closed_at TEXT,
        merged_at TEXT,
        UNIQUE(repository_id, number)
    )",
    "CREATE INDEX IF NOT EXISTS idx_pull_requests_gh_id ON pull_requests(gh_id)",
    "CREATE TABLE IF NOT EXISTS labels (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        repository_id INTEGER NOT NULL REFERENCES repositories(id),
        name TEXT NOT NULL,
        color TEXT,
        UNIQUE(repository_id, name)
    )",
    "CREATE TABLE IF NOT EXISTS issue_labels (
        issue_id INTEGER NOT NULL REFERENCES issues(id),
        label_id INTEGER NOT NULL REFERENCES labels(id),
        UNIQUE(issue_id, label_id)
    )",
    "CREATE TABLE IF NOT EXISTS pull_request_labels (
        pull_request_id INTEGER NOT NULL REFERENCES pull_requests(id),
        label_id INTEGER NOT NULL REFERENCES labels(id),
        UNIQUE(pull_request_id, label_id)
    )",
    // The parent link uses the repo-scoped number: a pull request's gh_id
    // changes depending on which endpoint last wrote it, the number never
    // does.
    "CREATE TABLE IF NOT EXISTS comments (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        gh_id INTEGER NOT NULL UNIQUE,
        repository_id INTEGER NOT NULL REFERENCES repositories(id),
        parent_kind TEXT NOT NULL,
        parent_number INTEGER NOT NULL,
        author_id INTEGER REFERENCES users(id),
        body TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS sync_cursors (
        repository_id INTEGER NOT NULL REFERENCES repositories(id),
        resource_kind TEXT NOT NULL,
        last_synced_at TEXT NOT NULL,
        page_token TEXT,
        PRIMARY KEY (repository_id, resource_kind)
    )",
];

/// Entities of one page, partitioned by table, ready to commit.
#[derive(Debug, Default)]
pub struct EntityBatch {
    pub issues: Vec<IssueRecord>,
    pub pulls: Vec<PullRequestRecord>,
    pub comments: Vec<CommentRecord>,
}

impl EntityBatch {
    pub fn push(&mut self, record: MappedRecord) {
        match record {
            MappedRecord::Issue(r) => self.issues.push(r),
            MappedRecord::PullRequest(r) => self.pulls.push(r),
            MappedRecord::Comment(r) => self.comments.push(r),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty() && self.pulls.is_empty() && self.comments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.issues.len() + self.pulls.len() + self.comments.len()
    }
}

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Connect to the configured database file, creating it and the schema
    /// when missing.
    pub async fn open(ctx: &Context) -> Result<Self> {
        let store = Store::connect(&ctx.sqlite_url()).await?;
        Ok(store)
    }

    pub async fn connect(url: &str) -> Result<Self> {
        // Single connection: sqlite serializes writers anyway and this keeps
        // in-memory databases on one shared handle.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(url)
            .await?;
        let store = Store { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<()> {
        for stmt in SCHEMA {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        debug!("database schema ensured, {} tables", SCHEMA.len());
        Ok(())
    }

    /// Register a repository. No sync history yet, first sync backfills.
    pub async fn insert_repository(&self, owner: &str, name: &str) -> Result<Repository> {
        let result = sqlx::query("INSERT INTO repositories (owner, name) VALUES (?, ?)")
            .bind(owner)
            .bind(name)
            .execute(&self.pool)
            .await;
        if let Err(err) = result {
            if is_unique_violation(&err) {
                return Err(SyncError::Config(format!(
                    "repository {owner}/{name} is already registered"
                )));
            }
            return Err(err.into());
        }
        info!("registered repository {}/{}", owner, name);
        self.get_repository(owner, name).await?.ok_or_else(|| {
            SyncError::Config(format!("repository {owner}/{name} vanished after insert"))
        })
    }

    /// Refresh remote metadata for a registered repository.
    pub async fn update_repository_meta(
        &self,
        id: i64,
        gh_id: Option<i64>,
        default_branch: Option<&str>,
        description: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE repositories SET
                gh_id = coalesce(?, gh_id),
                default_branch = coalesce(?, default_branch),
                description = coalesce(?, description)
             WHERE id = ?",
        )
        .bind(gh_id)
        .bind(default_branch)
        .bind(description)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_repository(&self, owner: &str, name: &str) -> Result<Option<Repository>> {
        let repo = sqlx::query_as::<_, Repository>(
            "SELECT id, gh_id, owner, name, default_branch, description, last_synced_at
             FROM repositories WHERE owner = ? AND name = ?",
        )
        .bind(owner)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(repo)
    }

    pub async fn list_repositories(&self) -> Result<Vec<Repository>> {
        let repos = sqlx::query_as::<_, Repository>(
            "SELECT id, gh_id, owner, name, default_branch, description, last_synced_at
             FROM repositories ORDER BY owner, name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(repos)
    }

    pub async fn get_cursor(
        &self,
        repository_id: i64,
        kind: ResourceKind,
    ) -> Result<Option<SyncCursor>> {
        let cursor = sqlx::query_as::<_, SyncCursor>(
            "SELECT repository_id, resource_kind, last_synced_at, page_token
             FROM sync_cursors WHERE repository_id = ? AND resource_kind = ?",
        )
        .bind(repository_id)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(cursor)
    }

    /// Change-detection lookup: local `updated_at` per remote issue id.
    pub async fn issue_updated_map(
        &self,
        repository_id: i64,
        gh_ids: &[i64],
    ) -> Result<HashMap<i64, DateTime<Utc>>> {
        self.updated_map("issues", "gh_id", repository_id, gh_ids).await
    }

    /// Pull requests key on the repo-scoped number, see the schema note.
    pub async fn pull_updated_map(
        &self,
        repository_id: i64,
        numbers: &[i64],
    ) -> Result<HashMap<i64, DateTime<Utc>>> {
        self.updated_map("pull_requests", "number", repository_id, numbers)
            .await
    }

    pub async fn comment_updated_map(
        &self,
        repository_id: i64,
        gh_ids: &[i64],
    ) -> Result<HashMap<i64, DateTime<Utc>>> {
        self.updated_map("comments", "gh_id", repository_id, gh_ids)
            .await
    }

    async fn updated_map(
        &self,
        table: &str,
        key_col: &str,
        repository_id: i64,
        keys: &[i64],
    ) -> Result<HashMap<i64, DateTime<Utc>>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {key_col}, updated_at FROM {table} WHERE repository_id = "
        ));
        qb.push_bind(repository_id);
        qb.push(format!(" AND {key_col} IN ("));
        let mut sep = qb.separated(", ");
        for key in keys {
            sep.push_bind(*key);
        }
        qb.push(")");
        let rows = qb.build().fetch_all(&self.pool).await?;
        let mut map = HashMap::with_capacity(rows.len());
        for row in rows {
            map.insert(
                row.get::<i64, _>(0),
                row.get::<DateTime<Utc>, _>("updated_at"),
            );
        }
        Ok(map)
    }

    /// Which of the given issue/PR numbers exist locally. Comments whose
    /// parent is not in this set cannot be attached yet.
    pub async fn existing_parent_numbers(
        &self,
        repository_id: i64,
        numbers: &[i64],
    ) -> Result<HashSet<i64>> {
        if numbers.is_empty() {
            return Ok(HashSet::new());
        }
        let mut set = HashSet::new();
        for table in ["issues", "pull_requests"] {
            let mut qb = QueryBuilder::<Sqlite>::new(format!(
                "SELECT number FROM {table} WHERE repository_id = "
            ));
            qb.push_bind(repository_id);
            qb.push(" AND number IN (");
            let mut sep = qb.separated(", ");
            for number in numbers {
                sep.push_bind(*number);
            }
            qb.push(")");
            for row in qb.build().fetch_all(&self.pool).await? {
                set.insert(row.get::<i64, _>(0));
            }
        }
        Ok(set)
    }

    /// Commit one page of entities and the cursor advance atomically.
    ///
    /// The cursor moves to `max(existing, high_water)`, never backwards.
    /// `next_token` records an unfinished scan for later resumption; `None`
    /// clears it. Any error rolls the whole batch back, leaving the cursor
    /// untouched. Comments whose parent row cannot be resolved are reported
    /// back as per-record failures, not errors.
    pub async fn commit_batch(
        &self,
        repository_id: i64,
        kind: ResourceKind,
        batch: EntityBatch,
        high_water: DateTime<Utc>,
        next_token: Option<&str>,
        timeout: Duration,
    ) -> Result<Vec<(i64, String)>> {
        let work = async {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| SyncError::commit(e.to_string()))?;
            let failures =
                apply_batch(&mut tx, repository_id, &batch).await.map_err(commit_err)?;
            advance_cursor(&mut tx, repository_id, kind, high_water, next_token)
                .await
                .map_err(commit_err)?;
            tx.commit().await.map_err(|e| SyncError::commit(e.to_string()))?;
            Ok::<_, SyncError>(failures)
        };
        match tokio::time::timeout(timeout, work).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::commit(format!(
                "batch of {} records timed out after {:?}",
                batch.len(),
                timeout
            ))),
        }
    }

    // ---- read model ----

    pub async fn list_issues(&self, repository_id: i64) -> Result<Vec<IssueSummary>> {
        let rows = sqlx::query_as::<_, IssueSummary>(
            "SELECT i.number, i.title, i.state, u.login AS author, i.updated_at
             FROM issues i LEFT JOIN users u ON u.id = i.author_id
             WHERE i.repository_id = ? ORDER BY i.number",
        )
        .bind(repository_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn list_pulls(&self, repository_id: i64) -> Result<Vec<IssueSummary>> {
        let rows = sqlx::query_as::<_, IssueSummary>(
            "SELECT p.number, p.title, p.state, u.login AS author, p.updated_at
             FROM pull_requests p LEFT JOIN users u ON u.id = p.author_id
             WHERE p.repository_id = ? ORDER BY p.number",
        )
        .bind(repository_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Comments for one issue or pull request, by repo-scoped number.
    pub async fn list_comments(
        &self,
        repository_id: i64,
        number: i64,
    ) -> Result<Vec<CommentSummary>> {
        let rows = sqlx::query_as::<_, CommentSummary>(
            "SELECT u.login AS author, c.body, c.created_at
             FROM comments c LEFT JOIN users u ON u.id = c.author_id
             WHERE c.repository_id = ? AND c.parent_number = ?
             ORDER BY c.created_at",
        )
        .bind(repository_id)
        .bind(number)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn open_pull_titles(&self, repository_id: i64) -> Result<Vec<(i64, String)>> {
        let rows = sqlx::query_as::<_, (i64, String)>(
            "SELECT number, title FROM pull_requests
             WHERE repository_id = ? AND state = 'open' ORDER BY number",
        )
        .bind(repository_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // ---- stats ----

    pub async fn top_issue_creators(
        &self,
        repository_id: i64,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<UserCount>> {
        self.user_counts(
            "SELECT u.login AS login, COUNT(*) AS cnt
             FROM issues i JOIN users u ON u.id = i.author_id
             WHERE i.repository_id = ?1 AND (?2 IS NULL OR i.created_at >= ?2)
             GROUP BY u.login ORDER BY cnt DESC, login",
            repository_id,
            since,
        )
        .await
    }

    /// Authors of closed issues (closure attribution is not mirrored).
    pub async fn top_issue_closers(
        &self,
        repository_id: i64,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<UserCount>> {
        self.user_counts(
            "SELECT u.login AS login, COUNT(*) AS cnt
             FROM issues i JOIN users u ON u.id = i.author_id
             WHERE i.repository_id = ?1 AND i.state = 'closed'
               AND (?2 IS NULL OR i.closed_at >= ?2)
             GROUP BY u.login ORDER BY cnt DESC, login",
            repository_id,
            since,
        )
        .await
    }

    pub async fn top_pr_creators(
        &self,
        repository_id: i64,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<UserCount>> {
        self.user_counts(
            "SELECT u.login AS login, COUNT(*) AS cnt
             FROM pull_requests p JOIN users u ON u.id = p.author_id
             WHERE p.repository_id = ?1 AND (?2 IS NULL OR p.created_at >= ?2)
             GROUP BY u.login ORDER BY cnt DESC, login",
            repository_id,
            since,
        )
        .await
    }

    /// Authors of merged pull requests.
    pub async fn top_pr_mergers(
        &self,
        repository_id: i64,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<UserCount>> {
        self.user_counts(
            "SELECT u.login AS login, COUNT(*) AS cnt
             FROM pull_requests p JOIN users u ON u.id = p.author_id
             WHERE p.repository_id = ?1 AND p.merged_at IS NOT NULL
               AND (?2 IS NULL OR p.merged_at >= ?2)
             GROUP BY u.login ORDER BY cnt DESC, login",
            repository_id,
            since,
        )
        .await
    }

    async fn user_counts(
        &self,
        sql: &str,
        repository_id: i64,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<UserCount>> {
        let rows = sqlx::query_as::<_, UserCount>(sql)
            .bind(repository_id)
            .bind(since)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}

fn commit_err(err: SyncError) -> SyncError {
    match err {
        SyncError::Commit { .. } => err,
        other => SyncError::commit(other.to_string()),
    }
}

async fn apply_batch(
    tx: &mut Transaction<'_, Sqlite>,
    repository_id: i64,
    batch: &EntityBatch,
) -> Result<Vec<(i64, String)>> {
    for issue in &batch.issues {
        upsert_issue(tx, repository_id, issue).await?;
    }
    for pull in &batch.pulls {
        upsert_pull(tx, repository_id, pull).await?;
    }
    let mut failures = Vec::new();
    for comment in &batch.comments {
        match resolve_parent(tx, repository_id, comment.parent_number).await? {
            Some(parent) => upsert_comment(tx, repository_id, parent, comment).await?,
            None => failures.push((
                comment.gh_id,
                format!("parent #{} not mirrored", comment.parent_number),
            )),
        }
    }
    Ok(failures)
}

async fn upsert_user(tx: &mut Transaction<'_, Sqlite>, user: &User) -> Result<i64> {
    let row = sqlx::query(
        "INSERT INTO users (gh_id, login) VALUES (?, ?)
         ON CONFLICT(gh_id) DO UPDATE SET login = excluded.login
         RETURNING id",
    )
    .bind(user.gh_id)
    .bind(&user.login)
    .fetch_one(&mut **tx)
    .await?;
    Ok(row.get(0))
}

async fn upsert_label(
    tx: &mut Transaction<'_, Sqlite>,
    repository_id: i64,
    label: &Label,
) -> Result<i64> {
    let row = sqlx::query(
        "INSERT INTO labels (repository_id, name, color) VALUES (?, ?, ?)
         ON CONFLICT(repository_id, name) DO UPDATE
         SET color = coalesce(excluded.color, labels.color)
         RETURNING id",
    )
    .bind(repository_id)
    .bind(&label.name)
    .bind(&label.color)
    .fetch_one(&mut **tx)
    .await?;
    Ok(row.get(0))
}

async fn author_id(
    tx: &mut Transaction<'_, Sqlite>,
    author: &Option<User>,
) -> Result<Option<i64>> {
    match author {
        Some(user) => Ok(Some(upsert_user(tx, user).await?)),
        None => Ok(None),
    }
}

async fn upsert_issue(
    tx: &mut Transaction<'_, Sqlite>,
    repository_id: i64,
    rec: &IssueRecord,
) -> Result<()> {
    let author = author_id(tx, &rec.author).await?;
    // Guarded upsert: stale snapshots never overwrite newer local rows, so
    // replays and racing writers are idempotent.
    sqlx::query(
        "INSERT INTO issues
            (gh_id, repository_id, number, title, body, state, author_id,
             created_at, updated_at, closed_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(gh_id) DO UPDATE SET
            number = excluded.number, title = excluded.title,
            body = excluded.body, state = excluded.state,
            author_id = excluded.author_id, updated_at = excluded.updated_at,
            closed_at = excluded.closed_at
         WHERE excluded.updated_at > issues.updated_at",
    )
    .bind(rec.gh_id)
    .bind(repository_id)
    .bind(rec.number)
    .bind(&rec.title)
    .bind(&rec.body)
    .bind(rec.state.as_str())
    .bind(author)
    .bind(rec.created_at)
    .bind(rec.updated_at)
    .bind(rec.closed_at)
    .execute(&mut **tx)
    .await?;

    let issue_id: i64 = sqlx::query_scalar("SELECT id FROM issues WHERE gh_id = ?")
        .bind(rec.gh_id)
        .fetch_one(&mut **tx)
        .await?;
    for label in &rec.labels {
        let label_id = upsert_label(tx, repository_id, label).await?;
        sqlx::query("INSERT OR IGNORE INTO issue_labels (issue_id, label_id) VALUES (?, ?)")
            .bind(issue_id)
            .bind(label_id)
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}

async fn upsert_pull(
    tx: &mut Transaction<'_, Sqlite>,
    repository_id: i64,
    rec: &PullRequestRecord,
) -> Result<()> {
    let author = author_id(tx, &rec.author).await?;
    sqlx::query(
        "INSERT INTO pull_requests
            (gh_id, repository_id, number, title, body, state, author_id,
             base_ref, head_ref, created_at, updated_at, closed_at, merged_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(repository_id, number) DO UPDATE SET
            gh_id = excluded.gh_id, title = excluded.title,
            body = excluded.body, state = excluded.state,
            author_id = excluded.author_id,
            base_ref = coalesce(excluded.base_ref, pull_requests.base_ref),
            head_ref = coalesce(excluded.head_ref, pull_requests.head_ref),
            updated_at = excluded.updated_at, closed_at = excluded.closed_at,
            merged_at = excluded.merged_at
         WHERE excluded.updated_at > pull_requests.updated_at",
    )
    .bind(rec.gh_id)
    .bind(repository_id)
    .bind(rec.number)
    .bind(&rec.title)
    .bind(&rec.body)
    .bind(rec.state.as_str())
    .bind(author)
    .bind(&rec.base_ref)
    .bind(&rec.head_ref)
    .bind(rec.created_at)
    .bind(rec.updated_at)
    .bind(rec.closed_at)
    .bind(rec.merged_at)
    .execute(&mut **tx)
    .await?;

    let pull_id: i64 = sqlx::query_scalar(
        "SELECT id FROM pull_requests WHERE repository_id = ? AND number = ?",
    )
    .bind(repository_id)
    .bind(rec.number)
    .fetch_one(&mut **tx)
    .await?;
    for label in &rec.labels {
        let label_id = upsert_label(tx, repository_id, label).await?;
        sqlx::query(
            "INSERT OR IGNORE INTO pull_request_labels (pull_request_id, label_id) VALUES (?, ?)",
        )
        .bind(pull_id)
        .bind(label_id)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

/// Resolve a comment parent by repo-scoped number to an issue or PR row
/// visible inside the current transaction.
async fn resolve_parent(
    tx: &mut Transaction<'_, Sqlite>,
    repository_id: i64,
    number: i64,
) -> Result<Option<CommentParent>> {
    let issue: Option<i64> =
        sqlx::query_scalar("SELECT 1 FROM issues WHERE repository_id = ? AND number = ?")
            .bind(repository_id)
            .bind(number)
            .fetch_optional(&mut **tx)
            .await?;
    if issue.is_some() {
        return Ok(Some(CommentParent::Issue(number)));
    }
    let pull: Option<i64> =
        sqlx::query_scalar("SELECT 1 FROM pull_requests WHERE repository_id = ? AND number = ?")
            .bind(repository_id)
            .bind(number)
            .fetch_optional(&mut **tx)
            .await?;
    Ok(pull.map(|_| CommentParent::PullRequest(number)))
}

async fn upsert_comment(
    tx: &mut Transaction<'_, Sqlite>,
    repository_id: i64,
    parent: CommentParent,
    rec: &CommentRecord,
) -> Result<()> {
    let author = author_id(tx, &rec.author).await?;
    sqlx::query(
        "INSERT INTO comments
            (gh_id, repository_id, parent_kind, parent_number, author_id,
             body, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(gh_id) DO UPDATE SET
            parent_kind = excluded.parent_kind,
            body = excluded.body, author_id = excluded.author_id,
            updated_at = excluded.updated_at
         WHERE excluded.updated_at > comments.updated_at",
    )
    .bind(rec.gh_id)
    .bind(repository_id)
    .bind(parent.kind_str())
    .bind(parent.number())
    .bind(author)
    .bind(&rec.body)
    .bind(rec.created_at)
    .bind(rec.updated_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn advance_cursor(
    tx: &mut Transaction<'_, Sqlite>,
    repository_id: i64,
    kind: ResourceKind,
    high_water: DateTime<Utc>,
    next_token: Option<&str>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO sync_cursors (repository_id, resource_kind, last_synced_at, page_token)
         VALUES (?, ?, ?, ?)
         ON CONFLICT(repository_id, resource_kind) DO UPDATE SET
            last_synced_at = max(sync_cursors.last_synced_at, excluded.last_synced_at),
            page_token = excluded.page_token",
    )
    .bind(repository_id)
    .bind(kind.as_str())
    .bind(high_water)
    .bind(next_token)
    .execute(&mut **tx)
    .await?;
    sqlx::query(
        "UPDATE repositories
         SET last_synced_at = max(coalesce(last_synced_at, ''), ?) WHERE id = ?",
    )
    .bind(high_water)
    .bind(repository_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
