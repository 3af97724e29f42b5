use harvest_db::SqlitePool;

/// Print the most recent collection runs, newest first.
///
/// # Errors
///
/// Returns an error if the run history cannot be read.
pub(crate) async fn run_list_runs(pool: &SqlitePool, limit: i64) -> anyhow::Result<()> {
    anyhow::ensure!(limit > 0, "--limit must be positive");
    let runs = harvest_db::list_collection_runs(pool, limit).await?;
    if runs.is_empty() {
        println!("no collection runs recorded; run `harvest collect` first");
        return Ok(());
    }

    println!(
        "{:<18}{:<11}{:>9}{:>9}{:>9}  KEYWORDS",
        "STARTED", "OUTCOME", "SECONDS", "FETCHED", "STORED"
    );
    for run in &runs {
        println!(
            "{:<18}{:<11}{:>9.1}{:>9}{:>9}  {}",
            run.started_at.format("%Y-%m-%d %H:%M"),
            run.outcome,
            std::time::Duration::from_millis(run.elapsed_ms).as_secs_f64(),
            run.posts_fetched,
            run.posts_stored,
            run.keywords.join(", ")
        );
        for (platform, stats) in &run.platforms {
            if stats.status != harvest_core::SubRunStatus::Completed {
                println!("    {platform}: {}", stats.status);
            }
        }
        if let Some(message) = &run.error_message {
            println!("    {message}");
        }
    }
    Ok(())
}
