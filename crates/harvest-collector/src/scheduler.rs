//! One-shot and fixed-interval execution of collection runs.

use std::sync::Arc;
use std::time::Duration;

use harvest_core::{CollectionQuery, RunStats};
use serde::Serialize;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::orchestrator::Orchestrator;

/// Summary of a continuous schedule once it stops.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScheduleReport {
    pub runs_started: u64,
    /// Runs that finished with [`harvest_core::RunOutcome::Completed`].
    pub runs_completed: u64,
    /// Runs cancelled, aborted, or abandoned after the grace period.
    pub runs_incomplete: u64,
    /// Ticks that arrived while the previous run was still in flight.
    pub ticks_skipped: u64,
    pub last_run: Option<RunStats>,
    /// `true` when the schedule ended because of the stop signal.
    pub interrupted: bool,
}

impl ScheduleReport {
    fn finish(&mut self, stats: RunStats) {
        if stats.is_complete() {
            self.runs_completed += 1;
        } else {
            self.runs_incomplete += 1;
        }
        self.last_run = Some(stats);
    }
}

struct InFlight {
    handle: JoinHandle<RunStats>,
    token: CancellationToken,
}

enum Event {
    Stop,
    Tick,
    Finished(Result<RunStats, JoinError>),
}

#[derive(Debug, Clone)]
pub struct Scheduler {
    orchestrator: Arc<Orchestrator>,
    shutdown_grace: Duration,
}

impl Scheduler {
    #[must_use]
    pub fn new(orchestrator: Arc<Orchestrator>, shutdown_grace: Duration) -> Self {
        Self {
            orchestrator,
            shutdown_grace,
        }
    }

    pub async fn run_once(&self, query: &CollectionQuery, cancel: &CancellationToken) -> RunStats {
        self.orchestrator.run(query, cancel).await
    }

    /// Start a run every `interval` until `stop` fires.
    ///
    /// The first run starts immediately. A tick that lands while a run is in
    /// flight is skipped, never queued. On stop the in-flight run is
    /// cancelled and awaited for up to the grace period, then abandoned.
    pub async fn run_every(
        &self,
        interval: Duration,
        query: &CollectionQuery,
        stop: &CancellationToken,
    ) -> ScheduleReport {
        let mut report = ScheduleReport::default();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight: Option<InFlight> = None;

        loop {
            let running = in_flight.is_some();
            let event = tokio::select! {
                biased;
                () = stop.cancelled() => Event::Stop,
                joined = async {
                    match in_flight.as_mut() {
                        Some(run) => (&mut run.handle).await,
                        None => std::future::pending().await,
                    }
                }, if running => Event::Finished(joined),
                _ = ticker.tick() => Event::Tick,
            };

            match event {
                Event::Stop => break,
                Event::Finished(joined) => {
                    in_flight = None;
                    match joined {
                        Ok(stats) => report.finish(stats),
                        Err(e) => {
                            tracing::error!(error = %e, "scheduled run task failed");
                            report.runs_incomplete += 1;
                        }
                    }
                }
                Event::Tick => {
                    if in_flight.is_some() {
                        report.ticks_skipped += 1;
                        tracing::warn!(
                            ticks_skipped = report.ticks_skipped,
                            "previous run still in flight, skipping tick"
                        );
                        continue;
                    }
                    let token = stop.child_token();
                    let orchestrator = Arc::clone(&self.orchestrator);
                    let run_query = query.clone();
                    let run_token = token.clone();
                    let handle =
                        tokio::spawn(async move { orchestrator.run(&run_query, &run_token).await });
                    report.runs_started += 1;
                    tracing::info!(run = report.runs_started, "scheduled run started");
                    in_flight = Some(InFlight { handle, token });
                }
            }
        }

        report.interrupted = true;
        if let Some(InFlight { mut handle, token }) = in_flight {
            token.cancel();
            match tokio::time::timeout(self.shutdown_grace, &mut handle).await {
                Ok(Ok(stats)) => report.finish(stats),
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "scheduled run task failed during shutdown");
                    report.runs_incomplete += 1;
                }
                Err(_) => {
                    tracing::warn!("in-flight run did not stop within the grace period, abandoning it");
                    handle.abort();
                    report.runs_incomplete += 1;
                }
            }
        }

        tracing::info!(
            runs_started = report.runs_started,
            runs_completed = report.runs_completed,
            runs_incomplete = report.runs_incomplete,
            ticks_skipped = report.ticks_skipped,
            "schedule stopped"
        );
        report
    }
}
