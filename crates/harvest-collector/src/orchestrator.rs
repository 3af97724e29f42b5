//! One collection run: fan out to every selected adapter, then normalize,
//! filter, deduplicate and store what comes back.
//!
//! Each adapter runs in its own task under a deadline. Counters are atomic
//! per platform so tasks never contend on a shared report. A run-scoped
//! child of the caller's token lets the run stop itself (sustained store
//! failure) without cancelling the caller.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use harvest_core::{
    AppConfig, CollectionQuery, ContentFilter, PlatformStats, RunOutcome, RunStats, SourceError,
    SubRunStatus,
};
use harvest_sources::{normalize, SourceAdapter};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::dedup::{DedupOutcome, Deduplicator};
use crate::store::CollectionStore;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Deadline for one adapter's sub-run.
    pub adapter_timeout: Duration,
    /// How long in-flight adapters may keep going after cancellation.
    pub shutdown_grace: Duration,
    /// Consecutive store failures (across all adapters) that abort the run.
    pub max_consecutive_store_failures: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            adapter_timeout: Duration::from_secs(300),
            shutdown_grace: Duration::from_secs(30),
            max_consecutive_store_failures: 5,
        }
    }
}

impl OrchestratorConfig {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            adapter_timeout: config.adapter_timeout(),
            shutdown_grace: config.shutdown_grace(),
            max_consecutive_store_failures: config.max_consecutive_store_failures,
        }
    }
}

#[derive(Debug, Default)]
struct PlatformCounters {
    fetched: AtomicU64,
    normalized: AtomicU64,
    normalization_failed: AtomicU64,
    filtered_out: AtomicU64,
    duplicate: AtomicU64,
    enriched: AtomicU64,
    stored: AtomicU64,
    store_failed: AtomicU64,
    errors: Mutex<Vec<SourceError>>,
}

impl PlatformCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn push_error(&self, error: SourceError) {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(error);
    }

    fn take_errors(&self) -> Vec<SourceError> {
        std::mem::take(&mut *self.errors.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn snapshot(&self, status: SubRunStatus) -> PlatformStats {
        PlatformStats {
            status,
            fetched: self.fetched.load(Ordering::Relaxed),
            normalized: self.normalized.load(Ordering::Relaxed),
            normalization_failed: self.normalization_failed.load(Ordering::Relaxed),
            filtered_out: self.filtered_out.load(Ordering::Relaxed),
            duplicate: self.duplicate.load(Ordering::Relaxed),
            enriched: self.enriched.load(Ordering::Relaxed),
            stored: self.stored.load(Ordering::Relaxed),
            store_failed: self.store_failed.load(Ordering::Relaxed),
        }
    }
}

/// State shared by every adapter task of one run.
struct RunContext {
    query: CollectionQuery,
    filter: ContentFilter,
    dedup: Deduplicator,
    token: CancellationToken,
    consecutive_store_failures: AtomicU32,
    max_consecutive_store_failures: u32,
    abort_reason: Mutex<Option<String>>,
}

impl RunContext {
    fn store_succeeded(&self) {
        self.consecutive_store_failures.store(0, Ordering::Relaxed);
    }

    fn store_failed(&self) {
        let failures = self.consecutive_store_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if self.max_consecutive_store_failures > 0 && failures >= self.max_consecutive_store_failures {
            let mut reason = self.abort_reason.lock().unwrap_or_else(PoisonError::into_inner);
            if reason.is_none() {
                tracing::error!(failures, "store keeps failing, aborting run");
                *reason = Some(format!("{failures} consecutive store failures"));
            }
            self.token.cancel();
        }
    }

    fn abort_reason(&self) -> Option<String> {
        self.abort_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Drives collection runs over a fixed set of adapters and one store.
pub struct Orchestrator {
    adapters: Vec<Arc<dyn SourceAdapter>>,
    store: Arc<dyn CollectionStore>,
    filter: ContentFilter,
    config: OrchestratorConfig,
    run_gate: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let platforms: Vec<&str> = self.adapters.iter().map(|a| a.platform_name()).collect();
        f.debug_struct("Orchestrator")
            .field("platforms", &platforms)
            .field("filter", &self.filter)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        adapters: Vec<Arc<dyn SourceAdapter>>,
        store: Arc<dyn CollectionStore>,
        filter: ContentFilter,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            adapters,
            store,
            filter,
            config,
            run_gate: tokio::sync::Mutex::new(()),
        }
    }

    #[must_use]
    pub fn platforms(&self) -> Vec<&str> {
        self.adapters.iter().map(|a| a.platform_name()).collect()
    }

    /// Execute one collection run for `query`.
    ///
    /// Concurrent calls are serialized. Adapter, normalization and store
    /// failures are counted in the returned [`RunStats`], never returned as
    /// errors. Cancelling `cancel` stops dispatching new adapters and gives
    /// in-flight ones [`OrchestratorConfig::shutdown_grace`] to wind down.
    pub async fn run(&self, query: &CollectionQuery, cancel: &CancellationToken) -> RunStats {
        let _gate = self.run_gate.lock().await;

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let clock = Instant::now();
        let query = query.resolved_at(started_at);
        tracing::info!(
            %run_id,
            keywords = ?query.keywords,
            max_posts_per_source = query.max_posts_per_source,
            "collection run started"
        );

        let mut errors = Vec::new();
        let mut statuses: BTreeMap<String, SubRunStatus> = BTreeMap::new();
        if let Some(requested) = &query.platforms {
            for platform in requested {
                if !self.adapters.iter().any(|a| a.platform_name() == platform.as_str()) {
                    tracing::warn!(platform = %platform, "no adapter registered for requested platform");
                    errors.push(SourceError::fatal(
                        platform.clone(),
                        "no adapter registered for this platform",
                    ));
                    statuses.insert(platform.clone(), SubRunStatus::Failed);
                }
            }
        }

        let ctx = Arc::new(RunContext {
            query,
            filter: self.filter.clone(),
            dedup: Deduplicator::new(Arc::clone(&self.store)),
            token: cancel.child_token(),
            consecutive_store_failures: AtomicU32::new(0),
            max_consecutive_store_failures: self.config.max_consecutive_store_failures,
            abort_reason: Mutex::new(None),
        });

        let mut counters: BTreeMap<String, Arc<PlatformCounters>> = BTreeMap::new();
        let mut tasks = JoinSet::new();
        for adapter in &self.adapters {
            let platform = adapter.platform_name().to_string();
            if !ctx.query.includes_platform(&platform) {
                continue;
            }
            let platform_counters = Arc::new(PlatformCounters::default());
            counters.insert(platform.clone(), Arc::clone(&platform_counters));

            if ctx.token.is_cancelled() {
                tracing::info!(platform = %platform, "run cancelled before dispatch, skipping adapter");
                statuses.insert(platform, SubRunStatus::Skipped);
                continue;
            }

            let adapter = Arc::clone(adapter);
            let ctx = Arc::clone(&ctx);
            let deadline = deadline_after(self.config.adapter_timeout);
            let timeout = self.config.adapter_timeout;
            tasks.spawn(async move {
                let driven = drive_adapter(adapter.as_ref(), &ctx, &platform_counters);
                let result = match deadline {
                    Some(deadline) => tokio::time::timeout_at(deadline, driven).await,
                    None => Ok(driven.await),
                };
                let status = match result {
                    Ok(status) => status,
                    Err(_) => {
                        tracing::warn!(platform = %platform, ?timeout, "adapter exceeded its deadline");
                        platform_counters.push_error(SourceError::retryable(
                            platform.clone(),
                            format!("sub-run exceeded deadline of {}s", timeout.as_secs()),
                        ));
                        SubRunStatus::TimedOut
                    }
                };
                (platform, status)
            });
        }

        self.await_tasks(&mut tasks, &ctx.token, &mut statuses).await;

        // Tasks that never reported were aborted after the grace period or panicked.
        let unreported = if ctx.token.is_cancelled() {
            SubRunStatus::Cancelled
        } else {
            SubRunStatus::Failed
        };
        let mut platforms = BTreeMap::new();
        for (platform, platform_counters) in &counters {
            let status = statuses.get(platform).copied().unwrap_or(unreported);
            platforms.insert(platform.clone(), platform_counters.snapshot(status));
            errors.extend(platform_counters.take_errors());
        }
        for (platform, status) in &statuses {
            platforms
                .entry(platform.clone())
                .or_insert_with(|| PlatformStats {
                    status: *status,
                    ..PlatformStats::default()
                });
        }

        let outcome = if let Some(reason) = ctx.abort_reason() {
            RunOutcome::Aborted { reason }
        } else if cancel.is_cancelled() {
            RunOutcome::Cancelled
        } else {
            RunOutcome::Completed
        };

        let stats = RunStats {
            run_id,
            started_at,
            elapsed_ms: u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX),
            outcome,
            keywords: ctx.query.keywords.clone(),
            platforms,
            errors,
        };

        let totals = stats.totals();
        tracing::info!(
            %run_id,
            outcome = stats.outcome.as_str(),
            fetched = totals.fetched,
            stored = totals.stored,
            duplicate = totals.duplicate,
            enriched = totals.enriched,
            filtered_out = totals.filtered_out,
            errors = stats.errors.len(),
            elapsed_ms = stats.elapsed_ms,
            "collection run finished"
        );

        if let Err(e) = self.store.record_run(&stats).await {
            tracing::warn!(%run_id, error = %e, "failed to record run history");
        }
        stats
    }

    /// Join every adapter task. Once `token` fires, remaining tasks get the
    /// shutdown grace period and are then aborted.
    async fn await_tasks(
        &self,
        tasks: &mut JoinSet<(String, SubRunStatus)>,
        token: &CancellationToken,
        statuses: &mut BTreeMap<String, SubRunStatus>,
    ) {
        let mut grace_deadline: Option<Option<Instant>> = None;
        loop {
            let joined = if token.is_cancelled() {
                let deadline =
                    *grace_deadline.get_or_insert_with(|| deadline_after(self.config.shutdown_grace));
                let within_grace = match deadline {
                    Some(deadline) => tokio::time::timeout_at(deadline, tasks.join_next()).await,
                    None => Ok(tasks.join_next().await),
                };
                if let Ok(joined) = within_grace {
                    joined
                } else {
                    tracing::warn!(
                        remaining = tasks.len(),
                        "shutdown grace period elapsed, abandoning adapters"
                    );
                    tasks.abort_all();
                    while tasks.join_next().await.is_some() {}
                    return;
                }
            } else {
                tokio::select! {
                    joined = tasks.join_next() => joined,
                    () = token.cancelled() => continue,
                }
            };

            match joined {
                None => return,
                Some(Ok((platform, status))) => {
                    statuses.insert(platform, status);
                }
                Some(Err(e)) => {
                    tracing::error!(error = %e, "adapter task failed to complete");
                }
            }
        }
    }
}

/// `None` when `after` is too far out to represent, which means no deadline.
fn deadline_after(after: Duration) -> Option<Instant> {
    Instant::now().checked_add(after)
}

/// Consume one adapter's stream and push every item through the pipeline.
async fn drive_adapter(
    adapter: &dyn SourceAdapter,
    ctx: &RunContext,
    counters: &PlatformCounters,
) -> SubRunStatus {
    let platform = adapter.platform_name();
    let mut stream = adapter.fetch(&ctx.query, &ctx.token);
    let mut failed = false;

    loop {
        let next = tokio::select! {
            biased;
            () = ctx.token.cancelled() => return SubRunStatus::Cancelled,
            next = stream.next() => next,
        };
        let raw = match next {
            None => break,
            Some(Err(e)) => {
                tracing::warn!(platform, retryable = e.retryable, error = %e.cause, "adapter reported an error");
                counters.push_error(e);
                failed = true;
                continue;
            }
            Some(Ok(raw)) => raw,
        };
        PlatformCounters::bump(&counters.fetched);

        let post = match normalize(raw, Utc::now()) {
            Ok(post) => post,
            Err(e) => {
                tracing::debug!(platform, error = %e, "dropping item that failed normalization");
                PlatformCounters::bump(&counters.normalization_failed);
                continue;
            }
        };
        PlatformCounters::bump(&counters.normalized);

        if !ctx.query.is_within_bound(post.created_at) {
            tracing::debug!(platform, source_id = %post.source_id, "dropping item older than the time bound");
            PlatformCounters::bump(&counters.filtered_out);
            continue;
        }
        if let Err(rejection) = ctx.filter.check(&post) {
            tracing::debug!(platform, source_id = %post.source_id, %rejection, "filtered out");
            PlatformCounters::bump(&counters.filtered_out);
            continue;
        }

        match ctx.dedup.process(&post).await {
            Ok(outcome) => {
                ctx.store_succeeded();
                match outcome {
                    DedupOutcome::Stored { .. } => PlatformCounters::bump(&counters.stored),
                    DedupOutcome::Enriched => PlatformCounters::bump(&counters.enriched),
                    DedupOutcome::Duplicate => PlatformCounters::bump(&counters.duplicate),
                }
            }
            Err(e) => {
                tracing::warn!(platform, source_id = %post.source_id, error = %e, "store write failed");
                PlatformCounters::bump(&counters.store_failed);
                ctx.store_failed();
            }
        }
    }

    if ctx.token.is_cancelled() {
        SubRunStatus::Cancelled
    } else if failed {
        SubRunStatus::Failed
    } else {
        SubRunStatus::Completed
    }
}

#[cfg(test)]
#[path = "orchestrator_test.rs"]
mod tests;
