use super::*;
use harvest_core::{CollectorSettings, TimeBound};

#[test]
fn parses_db_ping_command() {
    let cli = Cli::try_parse_from(["harvest", "db", "ping"]).expect("expected valid cli args");

    assert!(matches!(
        cli.command,
        Some(Commands::Db {
            command: DbCommands::Ping
        })
    ));
}

#[test]
fn parses_db_migrate_command() {
    let cli = Cli::try_parse_from(["harvest", "db", "migrate"]).expect("expected valid cli args");

    assert!(matches!(
        cli.command,
        Some(Commands::Db {
            command: DbCommands::Migrate
        })
    ));
}

#[test]
fn no_command_is_none() {
    let cli = Cli::try_parse_from(["harvest"]).expect("expected valid cli args");
    assert!(cli.command.is_none());
}

#[test]
fn collect_requires_a_keyword() {
    assert!(Cli::try_parse_from(["harvest", "collect"]).is_err());
}

#[test]
fn collect_accepts_repeated_keywords_and_platforms() {
    let cli = Cli::try_parse_from([
        "harvest",
        "collect",
        "-k",
        "python",
        "--keyword",
        "machine learning",
        "--platform",
        "reddit",
        "--platform",
        "rss",
        "--max-posts",
        "25",
    ])
    .unwrap();

    let Some(Commands::Collect(args)) = cli.command else {
        panic!("expected collect command");
    };
    assert_eq!(args.keywords, vec!["python", "machine learning"]);
    assert_eq!(args.platforms, vec!["reddit", "rss"]);
    assert_eq!(args.max_posts, Some(25));
    assert!(!args.continuous);
    assert_eq!(args.interval_minutes, 60);
}

#[test]
fn collect_rejects_zero_interval() {
    let result = Cli::try_parse_from([
        "harvest",
        "collect",
        "-k",
        "rust",
        "--continuous",
        "--interval-minutes",
        "0",
    ]);
    assert!(result.is_err());
}

#[test]
fn collect_query_falls_back_to_settings_defaults() {
    let cli = Cli::try_parse_from(["harvest", "collect", "-k", "rust"]).unwrap();
    let Some(Commands::Collect(args)) = cli.command else {
        panic!("expected collect command");
    };
    let settings = CollectorSettings::default();

    let query = args.to_query(&settings);
    assert_eq!(query.max_posts_per_source, settings.default_max_posts);
    assert_eq!(
        query.time_bound,
        TimeBound::Trailing(chrono::TimeDelta::hours(i64::from(
            settings.default_time_range_hours
        )))
    );
    assert!(query.platforms.is_none());
}

#[test]
fn collect_query_uses_explicit_overrides() {
    let cli = Cli::try_parse_from([
        "harvest",
        "collect",
        "-k",
        "rust",
        "--platform",
        "hackernews",
        "--time-range-hours",
        "6",
        "--continuous",
        "--interval-minutes",
        "15",
    ])
    .unwrap();
    let Some(Commands::Collect(args)) = cli.command else {
        panic!("expected collect command");
    };

    let query = args.to_query(&CollectorSettings::default());
    assert_eq!(
        query.time_bound,
        TimeBound::Trailing(chrono::TimeDelta::hours(6))
    );
    assert!(query.includes_platform("hackernews"));
    assert!(!query.includes_platform("reddit"));
    assert!(args.continuous);
    assert_eq!(args.interval(), std::time::Duration::from_secs(15 * 60));
}

#[test]
fn search_parses_date_filters() {
    let cli = Cli::try_parse_from([
        "harvest",
        "search",
        "-k",
        "tokio",
        "--start-date",
        "2024-05-01",
        "--end-date",
        "2024-05-31",
        "--limit",
        "5",
        "--json",
    ])
    .unwrap();

    let Some(Commands::Search { filter, json }) = cli.command else {
        panic!("expected search command");
    };
    assert!(json);
    assert_eq!(filter.keywords, vec!["tokio"]);
    assert_eq!(filter.limit, Some(5));
    assert_eq!(
        filter.start_date,
        chrono::NaiveDate::from_ymd_opt(2024, 5, 1)
    );
}

#[test]
fn search_rejects_malformed_date() {
    let result = Cli::try_parse_from(["harvest", "search", "--start-date", "May 1st"]);
    assert!(result.is_err());
}

#[test]
fn export_requires_output_and_defaults_to_json() {
    assert!(Cli::try_parse_from(["harvest", "export"]).is_err());

    let cli = Cli::try_parse_from(["harvest", "export", "-o", "posts.json", "--platform", "rss"])
        .unwrap();
    assert!(matches!(
        cli.command,
        Some(Commands::Export { ref output, ref format, ref filter })
            if output == &PathBuf::from("posts.json")
                && format == "json"
                && filter.platforms == vec!["rss".to_string()]
    ));
}

#[test]
fn import_takes_input_and_format() {
    let cli =
        Cli::try_parse_from(["harvest", "import", "--input", "dump.csv", "--format", "csv"]).unwrap();
    assert!(matches!(
        cli.command,
        Some(Commands::Import { ref input, ref format })
            if input == &PathBuf::from("dump.csv") && format == "csv"
    ));
}

#[test]
fn runs_limit_defaults_to_ten() {
    let cli = Cli::try_parse_from(["harvest", "runs"]).unwrap();
    assert!(matches!(cli.command, Some(Commands::Runs { limit: 10 })));
}
