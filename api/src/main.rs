use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod config;
mod conversation;
mod error;
mod extract;
mod middleware;
mod registry;
mod relay;
mod routes;
mod sanitize;
mod state;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "AgentDesk API",
        version = "0.1.0",
        description = "Interactive form registry and chat relay between a browser chat page and a workflow execution API."
    ),
    paths(
        routes::health::health_check,
        routes::forms::notify,
        routes::forms::list_forms,
        routes::forms::submit_form,
        routes::forms::submit_all,
        routes::forms::clear_forms,
        routes::chat::post_message,
        routes::chat::latest_message,
        routes::chat::reset_conversation,
    ),
    components(schemas(
        HealthResponse,
        agentdesk_core::error::ApiError,
        agentdesk_core::forms::Form,
        agentdesk_core::forms::FormContent,
        agentdesk_core::forms::FormOption,
        agentdesk_core::forms::FormsResponse,
        agentdesk_core::forms::NotifyResponse,
        agentdesk_core::forms::SubmitFormRequest,
        agentdesk_core::forms::SubmitFormResponse,
        agentdesk_core::forms::SubmitAllRequest,
        agentdesk_core::forms::SubmitAllResponse,
        agentdesk_core::forms::ClearFormsResponse,
        agentdesk_core::chat::PostMessageRequest,
        agentdesk_core::chat::StreamFrame,
        agentdesk_core::chat::ChatReply,
        agentdesk_core::chat::ChatMessage,
        agentdesk_core::chat::MessagesRequest,
        agentdesk_core::chat::ResetResponse,
    ))
)]
struct ApiDoc;

#[derive(Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    /// Pending forms visible to the caller
    pub pending_forms: usize,
    pub active_sessions: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    // Structured JSON logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agentdesk_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = config::AppConfig::from_env()?;
    tracing::info!(
        discipline = ?config.form_discipline,
        streaming = config.streaming,
        upstream = %config.relay.upstream_url,
        "Configuration loaded"
    );

    let forms = Arc::new(registry::FormRegistry::new(
        config.form_discipline,
        config.form_max_age,
    ));
    forms.clone().spawn_sweeper(config.form_sweep_interval);

    let app_state = state::AppState {
        forms,
        conversations: Arc::new(conversation::ConversationStore::new()),
        relay: Arc::new(relay::WorkflowRelay::new(config.relay.clone())?),
        streaming: config.streaming,
    };

    let cors_layer = middleware::cors::build_cors_layer(config.cors_origins.as_deref());

    // Router with per-endpoint rate limiting on the relay and notify routes
    let app = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .merge(routes::health::router())
        .merge(routes::forms::notify_router().layer(middleware::rate_limit::notify_layer()))
        .merge(routes::forms::router())
        .merge(routes::chat::post_router().layer(middleware::rate_limit::chat_layer()))
        .merge(routes::chat::router())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer)
                .layer(axum::middleware::from_fn(middleware::response_headers::apply)),
        )
        .with_state(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("AgentDesk API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
