use clap::{Parser, ValueEnum};
use tracing::error;

use huodong_scraper::config::Config;
use huodong_scraper::logging;
use huodong_scraper::pipeline::orchestrator;
use huodong_scraper::types::WalkMode;

#[derive(Parser)]
#[command(name = "huodong_scraper")]
#[command(about = "Offline community event scraper and city-mapping pipeline")]
#[command(version = "0.1.0")]
struct Cli {
    /// How aggressively the page walk stops once it only sees known records
    #[arg(value_enum, default_value_t = Mode::Incremental)]
    mode: Mode,

    /// Ignore the freshness check on the persisted dataset
    #[arg(long)]
    force: bool,

    /// Alternate config file
    #[arg(long, default_value = "config.toml")]
    config: String,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    /// Walk every page of the listing
    Full,
    /// Stop after consecutive pages with no new records
    Incremental,
    /// Stop after the first page with no new records
    Quick,
}

#[tokio::main]
async fn main() {
    logging::init_logging();

    let cli = Cli::parse();

    let config = match Config::load_from(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            eprintln!("❌ Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let mode = match cli.mode {
        Mode::Full => WalkMode::Full,
        Mode::Incremental => WalkMode::Incremental(config.pagination.incremental_threshold),
        Mode::Quick => WalkMode::Quick,
    };

    println!("🔄 Running {} scrape...", mode);

    match orchestrator::run(&config, mode, cli.force).await {
        Ok(summary) if summary.skipped_fresh => {
            println!("⏭️  Dataset is fresh, nothing to do (use --force to override)");
        }
        Ok(summary) => {
            println!("\n📊 Run results:");
            println!("   New records: {}", summary.new_records);
            println!("   Published events: {}", summary.published_events);
            println!("   Quality score: {}%", summary.quality_score);
            println!("   Artifacts: {}/", summary.output_dir);
            if summary.degraded {
                println!("⚠️  Run degraded: see quality_report.json");
            }
            println!("✅ Run completed");
        }
        Err(e) => {
            error!("Run failed: {}", e);
            eprintln!("❌ Run failed: {}", e);
            std::process::exit(1);
        }
    }
}
