#![cfg(not(tarpaulin_include))]

use medsheets::{Config, app};

/// Main entry point for the web application
///
/// Reads configuration from the environment (and `.env`), then serves the
/// dashboard until the process is stopped.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = env_logger::Builder::from_default_env()
        .format_timestamp_secs()
        .try_init();

    let config = Config::from_env()?;
    app::run(config).await
}
