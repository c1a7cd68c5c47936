//! HTTP surface: `GET /health` and the streaming `POST /api/chat` relay.

pub mod error;
pub mod relay;
pub mod session;

use std::any::Any;
use std::future::Future;
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use http::{HeaderValue, Method};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, Any as CorsAny, CorsLayer};

use crate::config::{Config, ServerCfg};
use crate::error::CoreResult;
use crate::provider::InferenceClient;

pub use self::error::ApiError;
pub use self::session::SseSession;

/// Shared, read-only state handed to every request.
#[derive(Clone)]
pub struct AppState {
    pub client: Arc<dyn InferenceClient>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(client: Arc<dyn InferenceClient>, config: Config) -> Self {
        Self {
            client,
            config: Arc::new(config),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    model_id: String,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        model_id: state.config.bedrock.model_id.clone(),
    })
}

fn cors_layer(cfg: &ServerCfg) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(CorsAny);
    match &cfg.cors_origins {
        None => layer.allow_origin(CorsAny),
        Some(origins) => {
            let allowed: Vec<HeaderValue> = origins
                .iter()
                .filter_map(|origin| match HeaderValue::from_str(origin) {
                    Ok(value) => Some(value),
                    Err(_) => {
                        tracing::warn!(%origin, "ignoring invalid CORS origin");
                        None
                    }
                })
                .collect();
            layer.allow_origin(AllowOrigin::list(allowed))
        }
    }
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let message = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        relay::GENERIC_FAILURE.to_string()
    };
    ApiError::Internal(message).into_response()
}

pub fn router(state: AppState) -> Router {
    let body_limit = state.config.server.body_limit_bytes;
    let cors = cors_layer(&state.config.server);
    Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(relay::chat))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(CatchPanicLayer::custom(handle_panic))
        .with_state(state)
}

/// Serve until Ctrl-C.
pub async fn serve(listener: TcpListener, state: AppState) -> CoreResult<()> {
    serve_with_shutdown(listener, state, shutdown_signal()).await
}

pub async fn serve_with_shutdown<F>(listener: TcpListener, state: AppState, signal: F) -> CoreResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    tracing::info!(
        %addr,
        llm.model = %state.config.bedrock.model_id,
        provider = state.client.name(),
        "relay listening"
    );
    axum::serve(listener, router(state))
        .with_graceful_shutdown(signal)
        .await?;
    tracing::info!("relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("shutdown requested"),
        Err(e) => {
            tracing::error!(error = %e, "cannot listen for Ctrl-C; running until killed");
            std::future::pending::<()>().await;
        }
    }
}

/// Start the router on an ephemeral local port; returns the base URL.
#[cfg(test)]
pub(crate) async fn spawn_test_server(client: Arc<dyn InferenceClient>, config: Config) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(AppState::new(client, config));
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    format!("http://{addr}")
}
