mod collect;
mod posts;
mod runs;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use harvest_core::{AppConfig, CollectorSettings};
use harvest_db::{PoolConfig, SqlitePool};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "harvest")]
#[command(about = "Collect, store and export posts from Reddit, Hacker News, Discourse and feeds")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run a collection once, or repeatedly with --continuous
    Collect(collect::CollectArgs),
    /// List stored posts matching the filters, newest first
    Search {
        #[command(flatten)]
        filter: posts::FilterArgs,

        /// Print the posts as JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Summarize the stored corpus
    Stats {
        /// Print the statistics as JSON
        #[arg(long)]
        json: bool,
    },
    /// Write stored posts to a file
    Export {
        /// Destination file; overwritten if it exists
        #[arg(short, long)]
        output: PathBuf,

        /// One of the configured export formats (json, jsonl, csv, xlsx)
        #[arg(short, long, default_value = "json")]
        format: String,

        #[command(flatten)]
        filter: posts::FilterArgs,
    },
    /// Load posts from a previous export; keys already stored are skipped
    Import {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long, default_value = "json")]
        format: String,
    },
    /// Show the most recent collection runs
    Runs {
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },
    /// Database maintenance
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommands {
    /// Apply pending migrations
    Migrate,
    /// Check that the database is reachable
    Ping,
}

fn init_tracing(config: &AppConfig) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .with_context(|| format!("invalid log level '{}'", config.log_level))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
    Ok(())
}

fn load_settings(config: &AppConfig) -> anyhow::Result<CollectorSettings> {
    harvest_core::load_collector_settings(&config.sources_path, config.sources_path_explicit)
        .with_context(|| {
            format!(
                "failed to load collector settings from {}",
                config.sources_path.display()
            )
        })
}

async fn open_pool(config: &AppConfig) -> anyhow::Result<SqlitePool> {
    harvest_db::connect_pool(&config.database_url, PoolConfig::from_app_config(config))
        .await
        .with_context(|| format!("failed to open database at {}", config.database_url))
}

async fn migrate(pool: &SqlitePool) -> anyhow::Result<usize> {
    harvest_db::run_migrations(pool)
        .await
        .context("failed to apply migrations")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let Some(command) = cli.command else {
        println!("harvest: no command given; see `harvest --help`");
        return Ok(());
    };

    let config = harvest_core::load_app_config().context("invalid environment configuration")?;
    init_tracing(&config)?;
    tracing::debug!(env = %config.env, database_url = %config.database_url, "configuration loaded");

    let pool = open_pool(&config).await?;

    match command {
        Commands::Db {
            command: DbCommands::Migrate,
        } => {
            let applied = migrate(&pool).await?;
            println!("applied {applied} migration(s)");
        }
        Commands::Db {
            command: DbCommands::Ping,
        } => {
            harvest_db::ping(&pool)
                .await
                .context("database did not answer")?;
            println!("database reachable at {}", config.database_url);
        }
        Commands::Collect(args) => {
            let settings = load_settings(&config)?;
            migrate(&pool).await?;
            collect::run_collect(&pool, &config, &settings, &args).await?;
        }
        Commands::Search { filter, json } => {
            migrate(&pool).await?;
            posts::run_search(&pool, &filter, json).await?;
        }
        Commands::Stats { json } => {
            migrate(&pool).await?;
            posts::run_stats(&pool, json).await?;
        }
        Commands::Export {
            output,
            format,
            filter,
        } => {
            let settings = load_settings(&config)?;
            migrate(&pool).await?;
            posts::run_export(&pool, &settings, &output, &format, &filter).await?;
        }
        Commands::Import { input, format } => {
            migrate(&pool).await?;
            posts::run_import(&pool, &input, &format).await?;
        }
        Commands::Runs { limit } => {
            migrate(&pool).await?;
            runs::run_list_runs(&pool, limit).await?;
        }
    }

    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests;
