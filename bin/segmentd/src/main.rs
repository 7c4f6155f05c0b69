//! segmentd - Segment membership service
//!
//! Runs the retention scheduler over a local segment store and provides
//! admin subcommands for segments, memberships and the audit log.

mod scheduler;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use segmentd_common::config::LogFormat;
use segmentd_common::{Config, UserId};
use segmentd_store::{CancelToken, OpContext, SegmentEngine, Store};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::scheduler::Job;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(name = "segmentd", about = "Segment membership service")]
#[command(version)]
struct Args {
    /// Configuration file path (TOML)
    #[arg(short, long, env = "SEGMENTD_CONFIG")]
    config: Option<PathBuf>,

    /// Database path (overrides storage.path)
    #[arg(long)]
    data_path: Option<PathBuf>,

    /// Log level (trace / debug / info / warn / error)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the retention scheduler until interrupted
    Run,
    /// Segment operations
    Segment {
        #[command(subcommand)]
        action: SegmentCommands,
    },
    /// Membership operations
    Member {
        #[command(subcommand)]
        action: MemberCommands,
    },
    /// Print a user's audit entries as JSON lines
    Logs {
        /// User ID
        #[arg(long)]
        user: i64,
        /// Start of the window, inclusive (RFC 3339)
        #[arg(long)]
        from: DateTime<Utc>,
        /// End of the window, exclusive (RFC 3339); defaults to now
        #[arg(long)]
        to: Option<DateTime<Utc>>,
    },
    /// Run one retention pass
    Purge {
        #[arg(value_enum)]
        job: Job,
        /// Maximum rows removed (defaults to the job's batch size)
        #[arg(long)]
        limit: Option<u64>,
    },
}

#[derive(Debug, Subcommand)]
enum SegmentCommands {
    /// Register a segment
    Create {
        /// Segment slug
        slug: String,
        /// Auto-enroll this percentage of users
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
        percent: Option<u8>,
    },
    /// Soft-delete a segment
    Delete {
        /// Segment slug
        slug: String,
    },
    /// Show segment details
    Show {
        /// Segment slug
        slug: String,
    },
    /// List all segments
    List,
}

#[derive(Debug, Subcommand)]
enum MemberCommands {
    /// Add a user to segments
    Add {
        /// User ID
        user: i64,
        /// Segment slugs
        #[arg(required = true)]
        slugs: Vec<String>,
        /// Membership lifetime in seconds
        #[arg(long)]
        ttl_secs: Option<u64>,
    },
    /// Remove a user from segments
    Remove {
        /// User ID
        user: i64,
        /// Segment slugs
        #[arg(required = true)]
        slugs: Vec<String>,
    },
    /// Resolve a user's active segments
    Resolve {
        /// User ID
        user: i64,
    },
}

// ── Setup ─────────────────────────────────────────────────────────────────────

/// Defaults, then the config file, then `SEGMENTD__*` variables, then flags.
fn load_config(args: &Args) -> Result<Config> {
    let mut builder = config::Config::builder();
    if let Some(path) = &args.config {
        builder = builder.add_source(config::File::from(path.as_path()));
    }
    builder = builder.add_source(
        config::Environment::with_prefix("SEGMENTD")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    let mut config: Config = builder
        .build()
        .and_then(config::Config::try_deserialize)
        .context("load configuration")?;

    if let Some(path) = &args.data_path {
        config.storage.path.clone_from(path);
    }
    if let Some(level) = &args.log_level {
        config.logging.level.clone_from(level);
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match config.logging.format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;
    init_tracing(&config);

    let store = Store::open(&config.storage.path)
        .with_context(|| format!("open store {:?}", config.storage.path))?;
    let engine =
        SegmentEngine::new(store).with_log_retention_months(config.retention.log_retention_months);

    match args.command {
        Commands::Run => {
            info!("Starting segmentd retention scheduler");
            scheduler::run(engine, &config.retention).await
        }
        Commands::Purge { job, limit } => {
            let limit = limit.unwrap_or(job.config(&config.retention).batch_size);
            let rows = scheduler::run_once(engine, job, limit, CancelToken::new())
                .await
                .with_context(|| format!("purge {}", job.name()))?;
            println!("Purged {rows} row(s) ({})", job.name());
            Ok(())
        }
        command => tokio::task::spawn_blocking(move || admin(&engine, command)).await?,
    }
}

// ── Admin commands ────────────────────────────────────────────────────────────

fn admin(engine: &SegmentEngine, command: Commands) -> Result<()> {
    let ctx = OpContext::background().with_timeout(Duration::from_secs(30));

    match command {
        Commands::Segment { action } => match action {
            SegmentCommands::Create { slug, percent } => {
                engine.create_segment(&ctx, &slug, percent)?;
                println!("Created segment: {slug}");
            }
            SegmentCommands::Delete { slug } => {
                engine.delete_segment(&ctx, &slug)?;
                println!("Deleted segment: {slug}");
            }
            SegmentCommands::Show { slug } => {
                let segment = engine
                    .get_segment(&ctx, &slug)?
                    .with_context(|| format!("segment not found: {slug}"))?;
                println!("{}", serde_json::to_string_pretty(&segment)?);
            }
            SegmentCommands::List => {
                for segment in engine.list_segments(&ctx)? {
                    println!("{}", serde_json::to_string(&segment)?);
                }
            }
        },
        Commands::Member { action } => match action {
            MemberCommands::Add {
                user,
                slugs,
                ttl_secs,
            } => {
                let ttl = ttl_secs.map(Duration::from_secs);
                engine.add_user_to_segments(&ctx, UserId::new(user), &slugs, ttl)?;
                println!("Added user {user} to {} segment(s)", slugs.len());
            }
            MemberCommands::Remove { user, slugs } => {
                engine.remove_user_from_segments(&ctx, UserId::new(user), &slugs)?;
                println!("Removed user {user} from {} segment(s)", slugs.len());
            }
            MemberCommands::Resolve { user } => {
                for slug in engine.active_segments(&ctx, UserId::new(user))? {
                    println!("{slug}");
                }
            }
        },
        Commands::Logs { user, from, to } => {
            let to = to.unwrap_or_else(|| engine.store().now());
            for entry in engine.logs(&ctx, UserId::new(user), from, to)? {
                println!("{}", serde_json::to_string(&entry)?);
            }
        }
        Commands::Run | Commands::Purge { .. } => anyhow::bail!("not an admin command"),
    }
    Ok(())
}
