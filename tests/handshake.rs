//! End-to-end: real HTTP signaling on a local port, in-memory peer transport.

use axum::routing::post;
use axum::Router;
use rtc_echo::config::SIGNALING_PATH;
use rtc_echo::peer::loopback::LoopbackTransport;
use rtc_echo::peer::types::Payload;
use rtc_echo::relay::RelayState;
use rtc_echo::{build_router, Error, Initiator, RelayConfig, Responder, SessionPolicy};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(2);

struct Harness {
    transport: LoopbackTransport,
    responder: Responder,
    base: String,
    server: JoinHandle<()>,
}

impl Harness {
    async fn start(config: RelayConfig) -> Self {
        let transport = LoopbackTransport::new();
        let responder = Responder::new(Arc::new(transport.clone()), config);
        let (base, server) = spawn_router(build_router(responder.clone())).await;
        Self {
            transport,
            responder,
            base,
            server,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}{SIGNALING_PATH}", self.base)
    }

    fn initiator(&self) -> Initiator {
        Initiator::new(
            Arc::new(self.transport.clone()),
            self.endpoint(),
            &RelayConfig::default(),
        )
        .unwrap()
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn spawn_router(router: Router) -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let server = tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (base, server)
}

#[tokio::test]
async fn button_click_is_echoed_exactly_once() {
    let harness = Harness::start(RelayConfig::default()).await;
    let mut session = harness.initiator().begin_handshake().await.unwrap();
    session.wait_open(WAIT).await.unwrap();

    session.send_text("Button Clicked!").await.unwrap();
    let echo = timeout(WAIT, session.recv()).await.unwrap().unwrap();
    assert_eq!(echo, Payload::Text("Button Clicked!".into()));

    assert!(
        timeout(Duration::from_millis(100), session.recv()).await.is_err(),
        "a single message must be echoed once"
    );

    let id = session.session_id().unwrap().to_string();
    let info = harness.responder.registry().get(&id).unwrap();
    assert_eq!(info.state, RelayState::Active);
    assert_eq!((info.received, info.echoed), (1, 1));
    assert_eq!(info.label.as_deref(), Some("mychannel"));
}

#[tokio::test]
async fn echoes_keep_send_order() {
    let harness = Harness::start(RelayConfig::default()).await;
    let mut session = harness.initiator().begin_handshake().await.unwrap();
    session.wait_open(WAIT).await.unwrap();

    for i in 0..50 {
        session.send_text(format!("msg-{i}")).await.unwrap();
    }
    session.send_binary(vec![0xde, 0xad, 0xbe, 0xef]).await.unwrap();

    for i in 0..50 {
        let echo = timeout(WAIT, session.recv()).await.unwrap().unwrap();
        assert_eq!(echo.as_text(), Some(format!("msg-{i}").as_str()));
    }
    let echo = timeout(WAIT, session.recv()).await.unwrap().unwrap();
    assert_eq!(echo, Payload::Binary(vec![0xde, 0xad, 0xbe, 0xef].into()));
}

#[tokio::test]
async fn stalled_discovery_times_out_without_posting() {
    let harness = Harness::start(RelayConfig::default()).await;
    let config = RelayConfig {
        gathering_timeout: Duration::from_millis(50),
        ..Default::default()
    };
    let initiator = Initiator::new(
        Arc::new(harness.transport.stalled()),
        harness.endpoint(),
        &config,
    )
    .unwrap();

    let err = initiator.begin_handshake().await.err().unwrap();
    assert!(matches!(err, Error::HandshakeTimeout(_)), "{err}");
    assert_eq!(harness.transport.live_links(), 0);
    assert!(harness.responder.registry().is_empty());
}

#[tokio::test]
async fn slow_endpoint_times_out() {
    let slow = Router::new().route(
        SIGNALING_PATH,
        post(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            "too late"
        }),
    );
    let (base, server) = spawn_router(slow).await;

    let transport = LoopbackTransport::new();
    let config = RelayConfig {
        signaling_timeout: Duration::from_millis(200),
        ..Default::default()
    };
    let initiator = Initiator::new(
        Arc::new(transport.clone()),
        format!("{base}{SIGNALING_PATH}"),
        &config,
    )
    .unwrap();

    let err = initiator.begin_handshake().await.err().unwrap();
    assert!(matches!(err, Error::HandshakeTimeout(_)), "{err}");
    assert_eq!(transport.live_links(), 0);
    server.abort();
}

#[tokio::test]
async fn rejected_offer_surfaces_status() {
    let harness = Harness::start(RelayConfig::default()).await;

    let response = reqwest::Client::new()
        .post(harness.endpoint())
        .body("definitely not an offer")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "malformed_offer");

    assert!(harness.responder.registry().is_empty());
    assert_eq!(harness.transport.live_links(), 0);
}

#[tokio::test]
async fn concurrent_sessions_each_get_their_echo() {
    let harness = Harness::start(RelayConfig::default()).await;
    let initiator = harness.initiator();
    let mut first = initiator.begin_handshake().await.unwrap();
    let mut second = initiator.begin_handshake().await.unwrap();
    assert_ne!(first.session_id(), second.session_id());

    first.send_text("from first").await.unwrap();
    second.send_text("from second").await.unwrap();

    let echo = timeout(WAIT, first.recv()).await.unwrap().unwrap();
    assert_eq!(echo.as_text(), Some("from first"));
    let echo = timeout(WAIT, second.recv()).await.unwrap().unwrap();
    assert_eq!(echo.as_text(), Some("from second"));

    let sessions = harness.responder.registry().list();
    assert_eq!(sessions.len(), 2);
    assert!(sessions.iter().all(|s| s.state == RelayState::Active));
}

#[tokio::test]
async fn single_slot_displaces_the_older_session() {
    let config = RelayConfig {
        session_policy: SessionPolicy::SingleSlot,
        ..Default::default()
    };
    let harness = Harness::start(config).await;
    let initiator = harness.initiator();

    let mut first = initiator.begin_handshake().await.unwrap();
    first.wait_open(WAIT).await.unwrap();
    first.send_text("before").await.unwrap();
    let echo = timeout(WAIT, first.recv()).await.unwrap().unwrap();
    assert_eq!(echo.as_text(), Some("before"));

    let mut second = initiator.begin_handshake().await.unwrap();
    second.wait_open(WAIT).await.unwrap();

    // The displaced channel is torn down, so the older initiator sees its
    // stream end instead of an echo
    assert!(timeout(WAIT, first.recv()).await.unwrap().is_none());
    assert!(first.send_text("after").await.is_err());

    second.send_text("newest").await.unwrap();
    let echo = timeout(WAIT, second.recv()).await.unwrap().unwrap();
    assert_eq!(echo.as_text(), Some("newest"));

    let registry = harness.responder.registry();
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.current().as_deref(), second.session_id());
}

#[tokio::test]
async fn deleting_a_session_closes_the_channel() {
    let harness = Harness::start(RelayConfig::default()).await;
    let mut session = harness.initiator().begin_handshake().await.unwrap();
    let id = session.session_id().unwrap().to_string();

    let client = reqwest::Client::new();
    let response = client
        .delete(format!("{}/sessions/{id}", harness.base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NO_CONTENT);

    assert!(timeout(WAIT, session.recv()).await.unwrap().is_none());
    assert!(harness.responder.registry().is_empty());

    let response = client
        .delete(format!("{}/sessions/{id}", harness.base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn initiator_close_tears_down_responder_session() {
    let harness = Harness::start(RelayConfig::default()).await;
    let session = harness.initiator().begin_handshake().await.unwrap();
    session.close().await.unwrap();

    timeout(WAIT, async {
        while !harness.responder.registry().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(harness.transport.live_links(), 0);
}
