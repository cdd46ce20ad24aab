//! Full handshake and echo over webrtc-rs, host candidates only.

use rtc_echo::config::SIGNALING_PATH;
use rtc_echo::peer::connection::RtcTransport;
use rtc_echo::peer::types::Payload;
use rtc_echo::relay::RelayState;
use rtc_echo::{build_router, Initiator, RelayConfig, Responder};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(15);

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn button_click_is_echoed_once_over_webrtc() {
    let config = RelayConfig {
        ice_servers: Vec::new(),
        ..Default::default()
    };

    let responder = Responder::new(Arc::new(RtcTransport::new(&[])), config.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = format!("http://{}{SIGNALING_PATH}", listener.local_addr().unwrap());
    let router = build_router(responder.clone());
    let server = tokio::spawn(async move { axum::serve(listener, router).await });

    let initiator = Initiator::new(Arc::new(RtcTransport::new(&[])), endpoint, &config).unwrap();
    let mut session = initiator.begin_handshake().await.unwrap();
    session.wait_open(WAIT).await.unwrap();

    session.send_text("Button Clicked!").await.unwrap();
    let echo = timeout(WAIT, session.recv()).await.unwrap().unwrap();
    assert_eq!(echo, Payload::Text("Button Clicked!".into()));
    assert!(
        timeout(Duration::from_millis(300), session.recv()).await.is_err(),
        "a single message must be echoed once"
    );

    let id = session.session_id().unwrap().to_string();
    let info = responder.registry().get(&id).unwrap();
    assert_eq!(info.state, RelayState::Active);
    assert_eq!((info.received, info.echoed), (1, 1));

    session.close().await.unwrap();
    responder.shutdown().await;
    server.abort();
}
