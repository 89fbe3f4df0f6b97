use clap::Parser;
use tracing_subscriber::EnvFilter;

use next_token_game::cli::Args;
use next_token_game::config::Config;
use next_token_game::session;

/// Logs go to stderr so they never interleave with the rendered response.
fn init_tracing(config_filter: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config_filter.unwrap_or("warn")))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = Config::load(&args)?;
    init_tracing(config.log_filter.as_deref());

    session::run(config).await?;
    Ok(())
}
