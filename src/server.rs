//! # Server Configuration
//!
//! Router assembly and the HTTP server for Pipenotify: public Pipedrive
//! ingestion, the operator dashboard API and the OpenAPI docs.

use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::{auth_middleware, operator_middleware};
use crate::config::AppConfig;
use crate::handlers::{self, chat_webhooks, delivery_logs, quiet_hours, rules, tenants, webhooks};
use crate::telemetry::trace_context_middleware;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DatabaseConnection,
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let config = Arc::clone(&state.config);

    let ingestion = Router::new()
        .route("/webhooks/pipedrive", post(webhooks::receive_pipedrive_webhook))
        .route(
            "/webhooks/pipedrive/{tenant_id}",
            post(webhooks::receive_tenant_pipedrive_webhook),
        )
        .layer(DefaultBodyLimit::max(config.webhook_max_body_bytes()));

    let operator = Router::new()
        .route("/api/v1/tenants", post(tenants::create_tenant))
        .route("/api/v1/tenants/{id}", get(tenants::get_tenant))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&config),
            operator_middleware,
        ));

    let tenant_scoped = Router::new()
        .route("/api/v1/rules", get(rules::list_rules).post(rules::create_rule))
        .route(
            "/api/v1/rules/provision-defaults",
            post(rules::provision_default_rules),
        )
        .route(
            "/api/v1/rules/{id}",
            get(rules::get_rule).patch(rules::update_rule),
        )
        .route(
            "/api/v1/chat-webhooks",
            get(chat_webhooks::list_chat_webhooks).post(chat_webhooks::create_chat_webhook),
        )
        .route(
            "/api/v1/chat-webhooks/{id}",
            axum::routing::delete(chat_webhooks::delete_chat_webhook),
        )
        .route(
            "/api/v1/quiet-hours",
            get(quiet_hours::get_quiet_hours)
                .put(quiet_hours::put_quiet_hours)
                .delete(quiet_hours::delete_quiet_hours),
        )
        .route("/api/v1/delivery-logs", get(delivery_logs::list_delivery_logs))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&config),
            auth_middleware,
        ));

    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .merge(ingestion)
        .merge(operator)
        .merge(tenant_scoped)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(trace_context_middleware))
}

/// Serves the API until `shutdown` fires
pub async fn run_server(
    config: Arc<AppConfig>,
    db: DatabaseConnection,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let addr = config.bind_addr()?;
    let app = create_app(AppState {
        config: Arc::clone(&config),
        db,
    });

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, profile = %config.profile, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

struct BearerSecurity;

impl Modify for BearerSecurity {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
        );
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz,
        crate::handlers::webhooks::receive_pipedrive_webhook,
        crate::handlers::webhooks::receive_tenant_pipedrive_webhook,
        crate::handlers::tenants::create_tenant,
        crate::handlers::tenants::get_tenant,
        crate::handlers::rules::list_rules,
        crate::handlers::rules::create_rule,
        crate::handlers::rules::get_rule,
        crate::handlers::rules::update_rule,
        crate::handlers::rules::provision_default_rules,
        crate::handlers::chat_webhooks::list_chat_webhooks,
        crate::handlers::chat_webhooks::create_chat_webhook,
        crate::handlers::chat_webhooks::delete_chat_webhook,
        crate::handlers::quiet_hours::get_quiet_hours,
        crate::handlers::quiet_hours::put_quiet_hours,
        crate::handlers::quiet_hours::delete_quiet_hours,
        crate::handlers::delivery_logs::list_delivery_logs,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::handlers::HealthResponse,
            crate::error::ApiError,
            crate::handlers::webhooks::WebhookAcceptResponse,
            crate::handlers::tenants::CreateTenantRequestDto,
            crate::handlers::tenants::TenantInfo,
            crate::handlers::rules::RuleInfo,
            crate::handlers::rules::RulesResponse,
            crate::handlers::rules::CreateRuleDto,
            crate::handlers::rules::UpdateRuleDto,
            crate::handlers::rules::ProvisionDefaultsDto,
            crate::handlers::chat_webhooks::ChatWebhookInfo,
            crate::handlers::chat_webhooks::ChatWebhooksResponse,
            crate::handlers::chat_webhooks::CreateChatWebhookDto,
            crate::handlers::quiet_hours::QuietHoursInfo,
            crate::handlers::quiet_hours::UpsertQuietHoursDto,
            crate::handlers::delivery_logs::DeliveryLogInfo,
            crate::handlers::delivery_logs::DeliveryLogsResponse,
            crate::pipeline::quota::Plan,
            crate::pipeline::template::TemplateMode,
        )
    ),
    modifiers(&BearerSecurity),
    info(
        title = "Pipenotify API",
        description = "Relays Pipedrive events to Google Chat rooms",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
