//! HTTP listener for event intake, stored notification queries and the live
//! WebSocket stream.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::Request;
use axum::http::{HeaderValue, Method};
use axum::response::Response;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, MakeSpan, OnResponse, TraceLayer};
use tracing::{Level, Span, info, warn};

use crate::api::routes;
use crate::database::repositories::NotificationRepository;
use crate::error::{Error, Result};
use crate::notification::{NotificationPipeline, WebSocketPublisher};

#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    pub bind_address: String,
    pub port: u16,
    /// Origins allowed by CORS; empty allows any origin.
    pub cors_allowed_origins: Vec<String>,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 4000,
            cors_allowed_origins: Vec::new(),
        }
    }
}

/// State handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub start_time: Instant,
    pub pipeline: Arc<NotificationPipeline>,
    pub repository: Arc<dyn NotificationRepository>,
    /// Live subscriber registry; `None` when the WebSocket publisher is disabled.
    pub websocket: Option<Arc<WebSocketPublisher>>,
}

impl AppState {
    pub fn new(
        pipeline: Arc<NotificationPipeline>,
        repository: Arc<dyn NotificationRepository>,
    ) -> Self {
        Self {
            start_time: Instant::now(),
            pipeline,
            repository,
            websocket: None,
        }
    }

    pub fn with_websocket(mut self, websocket: Option<Arc<WebSocketPublisher>>) -> Self {
        self.websocket = websocket;
        self
    }
}

pub struct ApiServer {
    config: ApiServerConfig,
    state: AppState,
    cancel_token: CancellationToken,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig, state: AppState) -> Self {
        Self {
            config,
            state,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Token that stops [`ApiServer::run`] when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    fn cors_layer(&self) -> CorsLayer {
        let cors = CorsLayer::new()
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any);

        if self.config.cors_allowed_origins.is_empty() {
            return cors.allow_origin(Any);
        }

        let origins: Vec<HeaderValue> = self
            .config
            .cors_allowed_origins
            .iter()
            .filter_map(|origin| match origin.parse::<HeaderValue>() {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(origin = %origin, error = %e, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        cors.allow_origin(AllowOrigin::list(origins))
    }

    /// Routes wrapped in CORS and request tracing. Health probes are not traced.
    pub fn build_router(&self) -> Router {
        let trace = TraceLayer::new_for_http()
            .make_span_with(|req: &Request| {
                if req.uri().path().starts_with("/health") {
                    Span::none()
                } else {
                    DefaultMakeSpan::new().level(Level::INFO).make_span(req)
                }
            })
            .on_response(|res: &Response, latency: Duration, span: &Span| {
                if !span.is_disabled() {
                    DefaultOnResponse::new()
                        .level(Level::INFO)
                        .on_response(res, latency, span);
                }
            });

        routes::create_router(self.state.clone())
            .layer(self.cors_layer())
            .layer(trace)
    }

    fn socket_addr(&self) -> Result<SocketAddr> {
        let raw = format!("{}:{}", self.config.bind_address, self.config.port);
        raw.parse()
            .map_err(|e| Error::config(format!("Invalid API bind address {raw}: {e}")))
    }

    /// Serve until [`ApiServer::shutdown`] or the cancellation token fires,
    /// letting in-flight requests finish.
    pub async fn run(&self) -> Result<()> {
        let addr = self.socket_addr()?;
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "Accepting events on http://{addr}");

        let cancel = self.cancel_token.clone();
        axum::serve(listener, self.build_router())
            .with_graceful_shutdown(async move {
                cancel.cancelled().await;
                info!("API server draining connections");
            })
            .await
            .map_err(|e| Error::ApiError(format!("Server error: {e}")))
    }

    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }
}
