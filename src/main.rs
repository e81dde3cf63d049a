use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use journeyguard::config::{self, AppConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if config::has_flag(&args, "--help") || config::has_flag(&args, "-h") {
        println!("{}", config::USAGE);
        return Ok(());
    }

    // Init logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    let cfg = AppConfig::from_env()?.apply_args(&args)?;
    info!(
        target: "startup",
        "journeyguard starting: RUST_LOG='{}', http_port={}, data_dir={:?}, running_local={}",
        rust_log, cfg.http_port, cfg.data_dir, cfg.running_local
    );

    journeyguard::server::run(cfg).await
}
