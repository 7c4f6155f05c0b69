//! Retention scheduler: runs each purge job on its own fixed interval.
//!
//! Failures are logged and the job simply waits for its next tick; retry
//! policy is the interval itself.

use std::time::Duration;

use anyhow::Context;
use clap::ValueEnum;
use segmentd_common::config::{JobConfig, RetentionConfig};
use segmentd_store::{CancelToken, OpContext, SegmentEngine};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// One of the three retention purges
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Job {
    /// Physically remove soft-deleted segments and their links
    Segments,
    /// Remove memberships past their TTL
    Links,
    /// Remove audit entries past the retention window
    Logs,
}

impl Job {
    pub const ALL: [Self; 3] = [Self::Segments, Self::Links, Self::Logs];

    pub const fn name(self) -> &'static str {
        match self {
            Self::Segments => "segments",
            Self::Links => "links",
            Self::Logs => "logs",
        }
    }

    pub const fn config(self, retention: &RetentionConfig) -> JobConfig {
        match self {
            Self::Segments => retention.segments,
            Self::Links => retention.links,
            Self::Logs => retention.logs,
        }
    }

    /// Run one pass and return the number of rows removed.
    pub fn run(self, engine: &SegmentEngine, ctx: &OpContext, limit: u64) -> segmentd_store::Result<u64> {
        match self {
            Self::Segments => {
                let report = engine.purge_deleted_segments(ctx, limit)?;
                for segment in &report.segments {
                    debug!("Segment '{}' is now {:?}", segment.slug, segment.state);
                }
                Ok(report.rows())
            }
            Self::Links => Ok(engine.purge_expired_links(ctx, limit)?.rows),
            Self::Logs => Ok(engine.purge_old_logs(ctx, limit)?.rows),
        }
    }
}

/// Run one pass on the blocking pool and return the number of rows removed.
pub async fn run_once(engine: SegmentEngine, job: Job, limit: u64, cancel: CancelToken) -> anyhow::Result<u64> {
    let ctx = OpContext::background().with_cancel(cancel);
    let rows = tokio::task::spawn_blocking(move || job.run(&engine, &ctx, limit))
        .await
        .with_context(|| format!("retention job '{}' aborted", job.name()))??;

    if rows >= limit {
        debug!("Retention job '{}' hit its batch limit ({})", job.name(), limit);
    }
    Ok(rows)
}

/// Long-running background task: run `job` every `interval`.
pub async fn job_loop(engine: SegmentEngine, job: Job, interval: Duration, limit: u64, cancel: CancelToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if cancel.is_cancelled() {
            break;
        }
        if let Err(e) = run_once(engine.clone(), job, limit, cancel.clone()).await {
            error!("Retention job '{}' failed: {:#}", job.name(), e);
        }
    }
    debug!("Retention job '{}' stopped", job.name());
}

/// Spawn one loop per enabled job and wait for Ctrl-C.
pub async fn run(engine: SegmentEngine, retention: &RetentionConfig) -> anyhow::Result<()> {
    let cancel = CancelToken::new();
    let mut tasks = JoinSet::new();

    for job in Job::ALL {
        let config = job.config(retention);
        if !config.enabled {
            info!("Retention job '{}' disabled", job.name());
            continue;
        }
        info!(
            "Retention job '{}' every {}s, batch {}",
            job.name(),
            config.interval_secs,
            config.batch_size
        );
        tasks.spawn(job_loop(
            engine.clone(),
            job,
            config.interval(),
            config.batch_size,
            cancel.clone(),
        ));
    }

    if tasks.is_empty() {
        warn!("No retention jobs enabled");
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down retention scheduler");
    cancel.cancel();
    // An in-flight purge rolls back at its next store call
    tasks.abort_all();
    while tasks.join_next().await.is_some() {}
    Ok(())
}
