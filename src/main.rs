use chrono::Local;
use clap::Parser;
use episode_sync::{
    CatalogClient, Config, FixtureCatalog, ProgressEvent, SpotifyClient, SyncOptions, SyncReport,
    TokenCache, default_config_path, sync_all_series, sync_single_series,
};
use std::path::PathBuf;
use std::process;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

/// Automated podcast episode detection and update
///
/// Checks the catalog for new episodes of every configured series and merges
/// them into the per-series JSON files.
#[derive(Parser)]
#[command(name = "episode_sync")]
#[command(version, about, long_about = None)]
#[command(after_help = "Examples:
  episode_sync                    Check all series, update files
  episode_sync --dry-run          Preview changes without updating
  episode_sync --series dating    Check only the dating series
  episode_sync --no-backup        Skip backup creation")]
struct Cli {
    /// Preview changes without actually updating files
    #[arg(long)]
    dry_run: bool,

    /// Check only a specific series (e.g. dating, shalom-bayis)
    #[arg(long)]
    series: Option<String>,

    /// Skip creating backup files
    #[arg(long)]
    no_backup: bool,

    /// Show detailed output and progress
    #[arg(short, long)]
    verbose: bool,

    /// Path to the configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Read recorded catalog pages from this directory instead of the API
    #[arg(long, value_name = "DIR")]
    offline: Option<PathBuf>,
}

/// Handles progress events and prints formatted output to stdout
fn handle_progress_event(event: ProgressEvent) {
    match event {
        ProgressEvent::Started { series, dry_run } => {
            let suffix = if dry_run { " (DRY RUN)" } else { "" };
            match series {
                Some(series) => println!("Checking single series: {}{}", series, suffix),
                None => println!("Checking all series for new episodes...{}", suffix),
            }
        }
        ProgressEvent::UnknownSeries { series } => {
            eprintln!("Series '{}' not found in configuration", series);
        }
        ProgressEvent::CheckingSeries {
            index,
            total,
            series,
        } => {
            println!("[{}/{}] Checking series: {}", index + 1, total, series);
        }
        ProgressEvent::SeriesChecked {
            series,
            new_count,
            titles,
        } => {
            if new_count == 0 {
                println!("  No new episodes for {}", series);
            } else {
                println!("  Found {} new episode(s) for {}", new_count, series);
                for title in titles.iter().take(3) {
                    println!("    - {}", title);
                }
                if titles.len() > 3 {
                    println!("    ... and {} more", titles.len() - 3);
                }
            }
        }
        ProgressEvent::FormattingSeries {
            series,
            count,
            first_number,
        } => {
            println!(
                "Formatting {} episode(s) for {} starting at #{}",
                count, series, first_number
            );
        }
        ProgressEvent::UpdatingFiles {
            series_count,
            dry_run,
        } => {
            let suffix = if dry_run { " (DRY RUN)" } else { "" };
            println!("\nUpdating {} file(s)...{}", series_count, suffix);
        }
        ProgressEvent::SeriesUpdated { record } => {
            println!(
                "  {}: +{} episodes ({} total) -> {}",
                record.series,
                record.added_episodes,
                record.total_episodes,
                record.file_path.display()
            );
            if let Some(backup) = record.backup_path {
                println!("    backup: {}", backup.display());
            }
        }
        ProgressEvent::SeriesFailed { series } => {
            eprintln!("  {}: update failed", series);
        }
        ProgressEvent::Complete {
            new_episodes,
            files_updated,
            files_failed,
        } => {
            println!("\n=== Update Summary ===");
            println!("  New episodes:  {}", new_episodes);
            println!("  Files updated: {}", files_updated);
            println!("  Files failed:  {}", files_failed);
        }
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: &Cli, config: &Config) -> SyncReport {
    let options = SyncOptions {
        dry_run: cli.dry_run,
        backup_enabled: !cli.no_backup,
    };

    let client: Box<dyn CatalogClient> = match &cli.offline {
        Some(directory) => Box::new(FixtureCatalog::new(directory)),
        None => Box::new(SpotifyClient::new(
            config.credentials.clone(),
            TokenCache::new(),
            &config.settings.market,
        )),
    };

    match &cli.series {
        Some(series) => {
            sync_single_series(config, client, series, options, handle_progress_event)
        }
        None => sync_all_series(config, client, options, handle_progress_event),
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let started_at = Local::now();
    let timer = Instant::now();

    println!("Episode Detection System");
    println!("{}", "=".repeat(50));
    println!("Started at: {}\n", started_at.format("%Y-%m-%d %H:%M:%S"));

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);

    if cli.verbose {
        println!("Configuration:");
        println!("  Config file:    {}", config_path.display());
        println!("  Dry run:        {}", cli.dry_run);
        println!("  Backup enabled: {}", !cli.no_backup);
        if let Some(series) = &cli.series {
            println!("  Target series:  {}", series);
        }
        if let Some(offline) = &cli.offline {
            println!("  Offline pages:  {}", offline.display());
        }
        println!();
    }

    // Credentials are only needed when talking to the real catalog
    let config = match Config::load(&config_path, cli.offline.is_none()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            process::exit(1);
        }
    };

    let report = run(&cli, &config);

    println!("\n{}", "=".repeat(50));
    if report.success() {
        println!("Episode update process completed successfully!");
    } else {
        println!(
            "Episode update process completed with errors: {}",
            report.failed_series.join(", ")
        );
    }
    println!("Finished at: {}", Local::now().format("%Y-%m-%d %H:%M:%S"));
    println!("Total duration: {:.1} seconds", timer.elapsed().as_secs_f64());

    if !report.success() {
        process::exit(1);
    }
}
