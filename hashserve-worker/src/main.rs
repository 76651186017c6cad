//! Process entry point: loads configuration, sets up logging, and hands off
//! to [`hashserve_core::supervisor::run`].

use hashserve_core::Config;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> std::process::ExitCode {
    dotenvy::dotenv().ok();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            return std::process::ExitCode::FAILURE;
        }
    };

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| {
        eprintln!(
            "LOG_LEVEL {:?} is not a valid filter, falling back to \"info\"",
            config.log_level
        );
        EnvFilter::new("info")
    });

    tracing_subscriber::fmt().with_env_filter(filter).init();

    match hashserve_core::supervisor::run(config).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("worker exited with error: {e}");
            std::process::ExitCode::FAILURE
        }
    }
}
