use super::connect::exchange;
use super::DemoArgs;
use crate::config::{RelayConfig, SIGNALING_PATH};
use crate::initiator::Initiator;
use crate::peer::loopback::LoopbackTransport;
use crate::responder::Responder;
use crate::signaling::build_router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Both roles in one process: real HTTP signaling, in-memory peer transport.
pub async fn run(args: DemoArgs) -> anyhow::Result<()> {
    let transport = LoopbackTransport::new();
    let config = RelayConfig::default();

    let responder = Responder::new(Arc::new(transport.clone()), config.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let endpoint = format!("http://{}{SIGNALING_PATH}", listener.local_addr()?);
    let router = build_router(responder.clone());
    let server = tokio::spawn(async move { axum::serve(listener, router).await });
    info!("demo responder on {endpoint}");

    let initiator = Initiator::new(Arc::new(transport), endpoint, &config)?;
    let mut session = initiator.begin_handshake().await?;
    let result = exchange(&mut session, &args.message, args.count, config.gathering_timeout).await;

    session.close().await?;
    responder.shutdown().await;
    server.abort();
    if let Err(e) = &result {
        warn!("demo failed: {e:#}");
    }
    result
}
