use crate::payload::SuggestParams;
use crate::proxy::{ProxyConfig, ProxyReply, SuggestionProxy, UPSTREAM_TIMEOUT};
use crate::settings::{FieldConfig, Settings, SettingsError};
use crate::widget::DEFAULT_ENDPOINT;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::compression::CompressionLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::info;

type SharedState = Arc<AppState>;

pub struct AppState {
    pub proxy: SuggestionProxy,
    pub fields: Vec<FieldConfig>,
}

impl AppState {
    pub fn from_settings(settings: &Settings, timeout: Duration) -> Result<Self, SettingsError> {
        let credential = settings.credential()?;
        Ok(Self {
            proxy: SuggestionProxy::new(ProxyConfig::new(credential).with_timeout(timeout)),
            fields: settings.fields.clone(),
        })
    }
}

#[derive(Clone)]
pub struct WebConfig {
    pub addr: SocketAddr,
    pub timeout: Duration,
    pub settings: Settings,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            timeout: UPSTREAM_TIMEOUT,
            settings: Settings::default(),
        }
    }
}

#[derive(Debug)]
pub enum WebError {
    Io(std::io::Error),
    Settings(SettingsError),
}

impl fmt::Display for WebError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebError::Io(err) => write!(f, "io error: {err}"),
            WebError::Settings(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for WebError {}

impl From<std::io::Error> for WebError {
    fn from(value: std::io::Error) -> Self {
        WebError::Io(value)
    }
}

impl From<SettingsError> for WebError {
    fn from(value: SettingsError) -> Self {
        WebError::Settings(value)
    }
}

pub async fn serve(config: WebConfig) -> Result<(), WebError> {
    let state = Arc::new(AppState::from_settings(&config.settings, config.timeout)?);
    let router = build_router(state);
    info!(
        %config.addr,
        upstream = %config.settings.api_url,
        fields = config.settings.fields.len(),
        timeout_ms = config.timeout.as_millis() as u64,
        "Binding HTTP listener"
    );
    let listener = TcpListener::bind(config.addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("HTTP server exited");
    Ok(())
}

pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route(DEFAULT_ENDPOINT, get(suggest_default))
        .route(&format!("{DEFAULT_ENDPOINT}/"), get(suggest_default))
        .route(&format!("{DEFAULT_ENDPOINT}/:kind"), get(suggest))
        .route("/api/fields", get(fields))
        .route("/healthz", get(health))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(false))
                .on_response(DefaultOnResponse::new().include_headers(false)),
        )
        .layer(CompressionLayer::new())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        if let Ok(mut stream) = signal(SignalKind::terminate()) {
            let _ = stream.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "service": "field-suggest" }))
}

async fn suggest(
    State(state): State<SharedState>,
    Path(kind): Path<String>,
    Query(params): Query<SuggestParams>,
) -> Response {
    reply(state.proxy.handle(Some(&kind), &params).await)
}

async fn suggest_default(
    State(state): State<SharedState>,
    Query(params): Query<SuggestParams>,
) -> Response {
    reply(state.proxy.handle(None, &params).await)
}

fn reply(reply: ProxyReply) -> Response {
    (reply.status, Json(reply.body)).into_response()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FieldsPayload {
    endpoint: String,
    fields: Vec<FieldConfig>,
}

async fn fields(State(state): State<SharedState>) -> Json<FieldsPayload> {
    Json(FieldsPayload {
        endpoint: DEFAULT_ENDPOINT.to_string(),
        fields: state.fields.clone(),
    })
}
