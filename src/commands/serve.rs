use super::ServeArgs;
use crate::config::SIGNALING_PATH;
use crate::peer::connection::RtcTransport;
use crate::responder::Responder;
use crate::signaling::build_router;
use anyhow::Context;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

pub async fn run(args: ServeArgs) -> anyhow::Result<()> {
    let config = args.to_config();
    config.validate()?;
    info!(
        "ICE servers: {}",
        config
            .ice_servers
            .iter()
            .map(|s| s.url.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let transport = Arc::new(RtcTransport::new(&config.ice_servers));
    let responder = Responder::new(transport, config);
    let router = build_router(responder.clone());

    let listener = TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("binding {}", args.bind))?;
    info!(
        "signaling on http://{}{SIGNALING_PATH} ({:?} policy)",
        listener.local_addr()?,
        responder.registry().policy()
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("closing {} session(s)", responder.registry().len());
    responder.shutdown().await;
    Ok(())
}

/// Wait for ctrl-c, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("cannot listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
