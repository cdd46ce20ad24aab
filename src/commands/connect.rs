use super::ConnectArgs;
use crate::initiator::{Initiator, InitiatorSession};
use crate::peer::connection::RtcTransport;
use anyhow::{bail, Context};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::info;

pub async fn run(args: ConnectArgs) -> anyhow::Result<()> {
    let config = args.relay.to_config();
    config.validate()?;

    let transport = Arc::new(RtcTransport::new(&config.ice_servers));
    let initiator = Initiator::new(transport, args.url.clone(), &config)?;
    let mut session = initiator
        .begin_handshake()
        .await
        .with_context(|| format!("handshake with {}", args.url))?;

    // ICE checks and DTLS still run after the answer is applied
    let result = exchange(&mut session, &args.message, args.count, config.gathering_timeout).await;
    session.close().await?;
    result
}

/// Send `count` messages and wait for each echo in turn.
pub(super) async fn exchange(
    session: &mut InitiatorSession,
    message: &str,
    count: u32,
    limit: Duration,
) -> anyhow::Result<()> {
    session.wait_open(limit).await?;
    for n in 1..=count {
        session.send_text(message).await?;
        let Some(echo) = timeout(limit, session.recv()).await.context("waiting for echo")? else {
            bail!("channel closed after {} of {count} echoes", n - 1);
        };
        println!("{echo}");
    }
    info!("{count} message(s) echoed");
    Ok(())
}
