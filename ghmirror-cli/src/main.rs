//! ghmirror command line tool.

use std::sync::Arc;

use anyhow::{anyhow, bail, Context as _};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use ghmirror_core::api::{GithubApi as _, RestClient};
use ghmirror_core::models::{Repository, ResourceKind};
use ghmirror_core::stats::group_open_prs;
use ghmirror_core::transport::RateLimiter;
use ghmirror_core::{Context, Store, SyncEngine};

#[derive(Parser)]
#[command(
    name = "ghmirror",
    version,
    about = "Mirror GitHub repository data into a local sqlite database"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage registered repositories
    Repo {
        #[command(subcommand)]
        command: RepoCommands,
    },
    /// Sync one or all registered repositories
    Sync {
        /// owner/name, all registered repositories when omitted
        repo: Option<String>,
        /// Resource kinds to sync: issues, pull_requests, comments (default: all)
        #[arg(long = "kind", value_name = "KIND")]
        kinds: Vec<String>,
        /// RFC3339 timestamp overriding the incremental boundary for this run
        #[arg(long, value_name = "TIMESTAMP")]
        since: Option<String>,
    },
    /// List mirrored data
    Show {
        #[command(subcommand)]
        command: ShowCommands,
    },
    /// Contribution statistics
    Stats {
        #[command(subcommand)]
        command: StatsCommands,
    },
    /// EasyBuild pull request reports
    Eb {
        #[command(subcommand)]
        command: EbCommands,
    },
    /// Show the remaining GitHub API quota
    RateLimit,
}

#[derive(Subcommand)]
enum RepoCommands {
    /// Register a repository for mirroring
    Add { repo: String },
    /// List registered repositories
    List,
}

#[derive(Subcommand)]
enum ShowCommands {
    /// Issues of a repository
    Issues { repo: String },
    /// Pull requests of a repository
    Pulls { repo: String },
    /// Comments on one issue or pull request
    Comments { repo: String, number: i64 },
}

#[derive(Subcommand)]
enum StatsCommands {
    /// Top issue creators
    IssueCreators {
        repo: String,
        #[arg(long)]
        since: Option<String>,
    },
    /// Authors of closed issues
    IssueClosers {
        repo: String,
        #[arg(long)]
        since: Option<String>,
    },
    /// Top pull request creators
    PrCreators {
        repo: String,
        #[arg(long)]
        since: Option<String>,
    },
    /// Authors of merged pull requests
    PrMergers {
        repo: String,
        #[arg(long)]
        since: Option<String>,
    },
}

#[derive(Subcommand)]
enum EbCommands {
    /// Group open PRs by toolchain and module class from their titles
    GroupOpenPrs {
        repo: String,
        /// Substring filter on toolchain names
        #[arg(long)]
        tc_filter: Option<String>,
        /// Substring filter on module class names
        #[arg(long)]
        mclass_filter: Option<String>,
    },
}

fn split_repo(spec: &str) -> anyhow::Result<(String, String)> {
    match spec.split_once('/') {
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() => {
            Ok((owner.to_string(), name.to_string()))
        }
        _ => bail!("expected owner/name, got `{spec}`"),
    }
}

fn parse_since(since: Option<&str>) -> anyhow::Result<Option<DateTime<Utc>>> {
    since
        .map(|s| {
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .with_context(|| format!("invalid --since timestamp `{s}`"))
        })
        .transpose()
}

fn parse_kinds(kinds: &[String]) -> anyhow::Result<Vec<ResourceKind>> {
    if kinds.is_empty() {
        return Ok(ResourceKind::ALL.to_vec());
    }
    kinds
        .iter()
        .map(|k| ResourceKind::parse(k).map_err(|e| anyhow!(e)))
        .collect()
}

async fn resolve_repo(store: &Store, spec: &str) -> anyhow::Result<Repository> {
    let (owner, name) = split_repo(spec)?;
    store
        .get_repository(&owner, &name)
        .await?
        .ok_or_else(|| anyhow!("repository {spec} is not registered, run `repo add` first"))
}

fn build_engine(ctx: &Context, store: Store) -> anyhow::Result<SyncEngine> {
    let limiter = RateLimiter::new(ctx);
    let api = RestClient::new(ctx, limiter)?;
    Ok(SyncEngine::new(Arc::new(api), store, ctx.clone()))
}

async fn run_sync(
    ctx: &Context,
    store: Store,
    repo: Option<String>,
    kinds: Vec<String>,
    since: Option<String>,
) -> anyhow::Result<()> {
    let kinds = parse_kinds(&kinds)?;
    let since = parse_since(since.as_deref())?;
    let engine = build_engine(ctx, store.clone())?;

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping at the next page boundary");
            signal_cancel.cancel();
        }
    });

    let targets = match repo {
        Some(spec) => vec![resolve_repo(&store, &spec).await?],
        None => store.list_repositories().await?,
    };
    if targets.is_empty() {
        bail!("no repositories registered, run `repo add` first");
    }

    let mut failures = 0usize;
    for target in &targets {
        if cancel.is_cancelled() {
            break;
        }
        let report = engine
            .sync_repo(&target.owner, &target.name, &kinds, since, &cancel)
            .await?;
        println!(
            "{}: created={} updated={} skipped={} failed={}",
            target.full_name(),
            report.created,
            report.updated,
            report.skipped,
            report.failed.len()
        );
        for failure in &report.failed {
            error!(
                "{} {}: {}{}",
                target.full_name(),
                failure.kind,
                failure
                    .gh_id
                    .map(|id| format!("record {id}: "))
                    .unwrap_or_default(),
                failure.message
            );
        }
        failures += report.failed.len();
    }
    if failures > 0 {
        bail!("sync finished with {failures} failure(s)");
    }
    Ok(())
}

fn print_counts(rows: &[ghmirror_core::models::UserCount]) {
    for row in rows {
        println!("{:>25} : {:>7}", row.login, row.cnt);
    }
}

async fn run_stats(store: &Store, command: StatsCommands) -> anyhow::Result<()> {
    let (spec, since, which) = match command {
        StatsCommands::IssueCreators { repo, since } => (repo, since, 0),
        StatsCommands::IssueClosers { repo, since } => (repo, since, 1),
        StatsCommands::PrCreators { repo, since } => (repo, since, 2),
        StatsCommands::PrMergers { repo, since } => (repo, since, 3),
    };
    let repo = resolve_repo(store, &spec).await?;
    let since = parse_since(since.as_deref())?;
    let rows = match which {
        0 => store.top_issue_creators(repo.id, since).await?,
        1 => store.top_issue_closers(repo.id, since).await?,
        2 => store.top_pr_creators(repo.id, since).await?,
        _ => store.top_pr_mergers(repo.id, since).await?,
    };
    print_counts(&rows);
    Ok(())
}

async fn run_show(store: &Store, command: ShowCommands) -> anyhow::Result<()> {
    match command {
        ShowCommands::Issues { repo } => {
            let repo = resolve_repo(store, &repo).await?;
            for issue in store.list_issues(repo.id).await? {
                println!(
                    "[IS] #{:<6} {:8} {:20} {}",
                    issue.number,
                    issue.state,
                    issue.author.as_deref().unwrap_or("-"),
                    issue.title
                );
            }
        }
        ShowCommands::Pulls { repo } => {
            let repo = resolve_repo(store, &repo).await?;
            for pull in store.list_pulls(repo.id).await? {
                println!(
                    "[PR] #{:<6} {:8} {:20} {}",
                    pull.number,
                    pull.state,
                    pull.author.as_deref().unwrap_or("-"),
                    pull.title
                );
            }
        }
        ShowCommands::Comments { repo, number } => {
            let repo = resolve_repo(store, &repo).await?;
            for comment in store.list_comments(repo.id, number).await? {
                println!(
                    "{} [{}]\n{}\n",
                    comment.author.as_deref().unwrap_or("-"),
                    comment.created_at,
                    comment.body
                );
            }
        }
    }
    Ok(())
}

async fn run_eb(
    store: &Store,
    spec: &str,
    tc_filter: Option<String>,
    mclass_filter: Option<String>,
) -> anyhow::Result<()> {
    let repo = resolve_repo(store, spec).await?;
    let titles = store.open_pull_titles(repo.id).await?;
    let report = group_open_prs(&titles, tc_filter.as_deref(), mclass_filter.as_deref());

    let itab = "|   ";
    for (toolchain, classes) in &report.groups {
        println!("{toolchain}");
        for (class, prs) in classes {
            println!("{itab}{class}");
            for pr in prs {
                println!("{itab}{itab}#{} {}", pr.number, pr.summary);
            }
        }
    }
    if !report.unclassified.is_empty() {
        println!("unclassified:");
        for pr in &report.unclassified {
            println!("{itab}#{} {}", pr.number, pr.summary);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let ctx = Context::from_env()?;
    let default_filter = match ctx.debug {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.to_string()),
        )
        .init();
    let store = Store::open(&ctx).await?;

    match cli.command {
        Commands::Repo { command } => match command {
            RepoCommands::Add { repo } => {
                let (owner, name) = split_repo(&repo)?;
                let engine = build_engine(&ctx, store.clone())?;
                let added = engine.add_repo(&owner, &name).await?;
                println!("registered {}", added.full_name());
            }
            RepoCommands::List => {
                for repo in store.list_repositories().await? {
                    println!(
                        "{:40} last synced: {}",
                        repo.full_name(),
                        repo.last_synced_at
                            .map(|t| t.to_rfc3339())
                            .unwrap_or_else(|| "never".to_string())
                    );
                }
            }
        },
        Commands::Sync { repo, kinds, since } => {
            run_sync(&ctx, store, repo, kinds, since).await?;
        }
        Commands::Show { command } => run_show(&store, command).await?,
        Commands::Stats { command } => run_stats(&store, command).await?,
        Commands::Eb { command } => match command {
            EbCommands::GroupOpenPrs {
                repo,
                tc_filter,
                mclass_filter,
            } => run_eb(&store, &repo, tc_filter, mclass_filter).await?,
        },
        Commands::RateLimit => {
            let limiter = RateLimiter::new(&ctx);
            let api = RestClient::new(&ctx, limiter)?;
            let status = api.rate_limit_status().await?;
            let reset = DateTime::from_timestamp(status.rate.reset, 0)
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "-".to_string());
            println!(
                "{} of {} points remaining, resets at {}",
                status.rate.remaining, status.rate.limit, reset
            );
        }
    }
    Ok(())
}
