//! Live notification stream over WebSocket.

use std::time::Duration;

use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use tracing::debug;

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::notification::Subscription;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(ws_handler))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> ApiResult<Response> {
    let publisher = state
        .websocket
        .clone()
        .ok_or_else(|| ApiError::service_unavailable("WebSocket publisher is disabled"))?;

    Ok(ws.on_upgrade(move |socket| async move {
        let subscription = publisher.connect();
        handle_socket(socket, subscription).await;
    }))
}

/// Forward published notifications to the client until either side closes.
/// Dropping the subscription on return unregisters the client.
async fn handle_socket(socket: WebSocket, mut subscription: Subscription) {
    let (mut sender, mut receiver) = socket.split();
    let subscriber = subscription.id();

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            payload = subscription.recv() => {
                let Some(payload) = payload else { break };
                if sender.send(Message::Text(payload.to_string().into())).await.is_err() {
                    break;
                }
            }

            _ = heartbeat.tick() => {
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(_)) => break,
                }
            }
        }
    }

    debug!(subscriber = %subscriber, "WebSocket connection closed");
}

#[cfg(test)]
mod tests {
    use crate::api::routes::{create_router, test_support};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn plain_request_is_not_upgraded() {
        let (state, _) = test_support::state();
        let response = create_router(state)
            .oneshot(Request::get("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_ne!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.status().is_client_error());
    }
}
