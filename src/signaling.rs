//! HTTP signaling surface.
//!
//! - `POST /setupRTC` - complete offer in, complete answer out
//! - `GET /sessions` - registered responder sessions
//! - `DELETE /sessions/:id` - tear one session down
//! - `GET /health`

use crate::config::SIGNALING_PATH;
use crate::error::Error;
use crate::peer::types::ConnectionDescription;
use crate::responder::Responder;
use crate::session::SessionInfo;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

/// Response header carrying the responder-side session id
pub const SESSION_HEADER: &str = "x-session-id";

#[derive(Serialize, Debug)]
pub struct ErrorResponse {
    pub error: &'static str,
    pub message: String,
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::MalformedOffer(_) | Error::Json(_) => StatusCode::BAD_REQUEST,
            Error::InvalidState(_) => StatusCode::CONFLICT,
            Error::SessionNotFound(_) => StatusCode::NOT_FOUND,
            Error::HandshakeTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            warn!("signaling request failed: {self}");
        } else {
            debug!("signaling request rejected: {self}");
        }
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub fn build_router(responder: Responder) -> Router {
    // Browser initiators post from other origins
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([axum::http::HeaderName::from_static(SESSION_HEADER)]);

    Router::new()
        .route(SIGNALING_PATH, post(setup_rtc))
        .route("/sessions", get(list_sessions))
        .route("/sessions/:id", delete(delete_session))
        .route("/health", get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(responder)
}

/// The body is parsed by hand so a bad payload gets the same error shape as
/// every other rejection.
async fn setup_rtc(
    State(responder): State<Responder>,
    body: Bytes,
) -> Result<impl IntoResponse, Error> {
    let offer = ConnectionDescription::from_json(&body).map_err(Error::MalformedOffer)?;
    let answer = responder.handle_offer(offer).await?;
    Ok((
        [(SESSION_HEADER, answer.session_id)],
        Json(answer.description),
    ))
}

async fn list_sessions(State(responder): State<Responder>) -> Json<Vec<SessionInfo>> {
    Json(responder.registry().list())
}

async fn delete_session(
    State(responder): State<Responder>,
    Path(id): Path<String>,
) -> Result<StatusCode, Error> {
    responder.close_session(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;
    use crate::peer::loopback::LoopbackTransport;
    use crate::peer::transport::PeerTransport;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app(transport: &LoopbackTransport) -> (Responder, Router) {
        let responder = Responder::new(Arc::new(transport.clone()), RelayConfig::default());
        (responder.clone(), build_router(responder))
    }

    fn post_offer(body: impl Into<Body>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(SIGNALING_PATH)
            .header("content-type", "application/json")
            .body(body.into())
            .unwrap()
    }

    #[tokio::test]
    async fn malformed_body_is_rejected() {
        let transport = LoopbackTransport::new();
        let (responder, app) = app(&transport);

        for body in ["not json", r#"{"type":"offer"}"#, r#"{"type":"offer","sdp":""}"#] {
            let response = app.clone().oneshot(post_offer(body)).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body: {body}");

            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
            assert_eq!(json["error"], "malformed_offer");
        }
        assert!(responder.registry().is_empty());
        assert_eq!(transport.live_links(), 0);
    }

    #[tokio::test]
    async fn offer_gets_answer_and_session_header() {
        let transport = LoopbackTransport::new();
        let (responder, app) = app(&transport);

        let (initiator, _events) = transport.new_link().await.unwrap();
        initiator.create_channel("mychannel").await.unwrap();
        let offer = initiator.create_offer().await.unwrap();
        initiator.set_local_description(offer).await.unwrap();
        let offer = initiator.local_description().await.unwrap();

        let response = app
            .oneshot(post_offer(serde_json::to_vec(&offer).unwrap()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let id = response.headers()[SESSION_HEADER].to_str().unwrap().to_string();
        assert!(responder.registry().contains(&id));

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let answer = ConnectionDescription::from_json(&bytes).unwrap();
        assert_eq!(answer.kind, crate::peer::types::SdpKind::Answer);
    }

    #[tokio::test]
    async fn unknown_session_delete_is_not_found() {
        let transport = LoopbackTransport::new();
        let (_, app) = app(&transport);

        let request = Request::builder()
            .method("DELETE")
            .uri("/sessions/nope")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn health_and_empty_listing() {
        let transport = LoopbackTransport::new();
        let (_, app) = app(&transport);

        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let request = Request::builder().uri("/sessions").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"[]");
    }
}
