use tracing::warn;

/// SIGTERM from the service manager or SIGINT from a terminal.
/// Falls back to Ctrl-C if the handlers cannot be installed.
#[cfg(unix)]
async fn wait_for_signal_impl() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(mut terminate), Ok(mut interrupt)) => tokio::select! {
            _ = terminate.recv() => "SIGTERM",
            _ = interrupt.recv() => "SIGINT",
        },
        _ => {
            warn!("unix signal handlers unavailable, waiting for ctrl-c");
            ctrl_c().await
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal_impl() -> &'static str {
    ctrl_c().await
}

async fn ctrl_c() -> &'static str {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("ctrl-c handler failed, no stop signal will arrive: {}", e);
        std::future::pending::<()>().await;
    }
    "CTRL_C"
}

/// Resolves once a graceful shutdown is requested, with the signal name
pub async fn wait_for_stop_signal() -> &'static str {
    wait_for_signal_impl().await
}
