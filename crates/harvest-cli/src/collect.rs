//! The `collect` command: build adapters from settings and drive the
//! orchestrator once or on an interval.

use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use clap::Args;
use harvest_collector::{DbStore, Orchestrator, OrchestratorConfig, ScheduleReport, Scheduler};
use harvest_core::{
    AppConfig, CollectionQuery, CollectorSettings, ContentFilter, RunOutcome, RunStats, TimeBound,
};
use harvest_db::SqlitePool;
use harvest_sources::{build_adapters, HttpSettings};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Args)]
pub struct CollectArgs {
    /// Search keyword; repeat for several, matched with OR
    #[arg(short = 'k', long = "keyword", required = true)]
    pub keywords: Vec<String>,

    /// Restrict the run to these platforms; defaults to every enabled one
    #[arg(long = "platform")]
    pub platforms: Vec<String>,

    /// Cap per platform; defaults to `default_max_posts`
    #[arg(long)]
    pub max_posts: Option<usize>,

    /// Only collect posts from the last N hours; defaults to `default_time_range_hours`
    #[arg(long)]
    pub time_range_hours: Option<u32>,

    /// Keep collecting on an interval until interrupted
    #[arg(long)]
    pub continuous: bool,

    #[arg(long, default_value_t = 60, value_parser = clap::value_parser!(u64).range(1..))]
    pub interval_minutes: u64,
}

impl CollectArgs {
    pub(crate) fn to_query(&self, settings: &CollectorSettings) -> CollectionQuery {
        let hours = self
            .time_range_hours
            .unwrap_or(settings.default_time_range_hours);
        let mut query = CollectionQuery::new(self.keywords.iter().cloned())
            .with_max_posts(self.max_posts.unwrap_or(settings.default_max_posts))
            .with_time_bound(TimeBound::Trailing(TimeDelta::hours(i64::from(hours))));
        if !self.platforms.is_empty() {
            query = query.with_platforms(self.platforms.iter().cloned());
        }
        query
    }

    pub(crate) fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes.saturating_mul(60))
    }
}

/// Cancel `token` on the first Ctrl-C.
fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping collection");
            token.cancel();
        }
    });
}

/// Run one collection, or a continuous schedule when `--continuous` is set.
///
/// # Errors
///
/// Returns an error if no adapter can be built from the settings or if a
/// one-shot run is aborted. Adapter failures inside a run are reported, not
/// returned.
pub(crate) async fn run_collect(
    pool: &SqlitePool,
    config: &AppConfig,
    settings: &CollectorSettings,
    args: &CollectArgs,
) -> anyhow::Result<()> {
    let adapters = build_adapters(settings, &HttpSettings::from_app_config(config))?;
    let orchestrator = Orchestrator::new(
        adapters,
        Arc::new(DbStore::new(pool.clone())),
        ContentFilter::from_settings(settings),
        OrchestratorConfig::from_app_config(config),
    );
    tracing::info!(platforms = ?orchestrator.platforms(), "adapters ready");
    let scheduler = Scheduler::new(Arc::new(orchestrator), config.shutdown_grace());

    let query = args.to_query(settings);
    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());

    if args.continuous {
        println!(
            "collecting every {} minute(s); press Ctrl-C to stop",
            args.interval_minutes
        );
        let report = scheduler.run_every(args.interval(), &query, &cancel).await;
        print_schedule(&report);
        return Ok(());
    }

    let stats = scheduler.run_once(&query, &cancel).await;
    print_run(&stats);
    if let RunOutcome::Aborted { reason } = &stats.outcome {
        anyhow::bail!("collection run aborted: {reason}");
    }
    Ok(())
}

pub(crate) fn print_run(stats: &RunStats) {
    println!(
        "run {} {} in {:.1}s",
        stats.run_id,
        stats.outcome.as_str(),
        Duration::from_millis(stats.elapsed_ms).as_secs_f64()
    );
    println!(
        "{:<12}{:<11}{:>9}{:>9}{:>10}{:>10}{:>10}{:>9}",
        "PLATFORM", "STATUS", "FETCHED", "STORED", "DUPLICATE", "ENRICHED", "FILTERED", "FAILED"
    );
    for (platform, p) in &stats.platforms {
        println!(
            "{:<12}{:<11}{:>9}{:>9}{:>10}{:>10}{:>10}{:>9}",
            platform,
            p.status.to_string(),
            p.fetched,
            p.stored,
            p.duplicate,
            p.enriched,
            p.filtered_out,
            p.normalization_failed + p.store_failed
        );
    }
    for error in &stats.errors {
        eprintln!("error: {error}");
    }
}

fn print_schedule(report: &ScheduleReport) {
    if let Some(last) = &report.last_run {
        print_run(last);
        println!();
    }
    println!(
        "schedule stopped: {} run(s) started, {} completed, {} incomplete, {} tick(s) skipped",
        report.runs_started, report.runs_completed, report.runs_incomplete, report.ticks_skipped
    );
}
