use clap::Parser;
use dotenv::dotenv;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use page_scraper::{pipeline, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    let config = match cli.into_config() {
        Ok(config) => config,
        Err(e) => {
            error!(stage = e.stage(), "❌ {}", e);
            return Err(e.into());
        }
    };

    match pipeline::run(&config).await {
        Ok(summary) => {
            for (name, count) in &summary.counts {
                info!("{}: {}", name, count);
            }
            println!("{}", summary.path.display());
            Ok(())
        }
        Err(e) => {
            error!(stage = e.stage(), target = %config.target, "❌ Scrape failed: {}", e);
            Err(e.into())
        }
    }
}
