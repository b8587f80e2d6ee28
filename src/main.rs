use clap::Parser;
use tracing::{debug, error, info, warn};

mod log;

#[derive(Parser)]
#[command(version)]
struct Args {
    /// Set config file path
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let cfg = gatekeeper::config::Config::parse(args.config)?;

    log::set(format!(
        "streamgate={},gatekeeper={},sqlx=warn",
        cfg.log.level, cfg.log.level
    ));

    warn!("set log level : {}", cfg.log.level);
    debug!("config : {:?}", cfg);

    let listener = tokio::net::TcpListener::bind(cfg.http.listen).await?;

    if let Err(e) = gatekeeper::serve(cfg, listener, shutdown_signal()).await {
        error!("Server error: {:?}", e);
        return Err(e);
    }
    info!("Server shutdown");
    Ok(())
}

async fn shutdown_signal() {
    let name = signal::wait_for_stop_signal().await;
    info!("received {}, shutting down", name);
}
