//! # Webhook Handlers
//!
//! Public ingestion endpoints for Pipedrive webhooks. A request is accepted
//! (202) once its event is durably queued; everything after that happens in
//! the delivery worker and never reaches the caller.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
};
use chrono::Utc;
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use tracing::{debug, info, warn};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::error::{ApiError, ErrorType, conflict, not_found, validation_error};
use crate::models::tenant::Model as TenantModel;
use crate::pipeline::event::normalize;
use crate::repositories::{NotificationJobRepository, TenantRepository};
use crate::server::AppState;
use crate::webhook_verification::{VerificationError, verify_request};

/// Webhook accept response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WebhookAcceptResponse {
    /// `accepted` when an event job was queued, `ignored` for canceled tenants
    #[schema(example = "accepted")]
    pub status: String,
    /// Identifier of the queued event job
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
}

/// Signature header for webhook verification
#[derive(Debug, Serialize, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Header)]
pub struct PipenotifySignatureHeader {
    /// HMAC-SHA256 of the raw body, hex encoded with a `sha256=` prefix
    #[serde(rename = "X-Pipenotify-Signature")]
    #[param(rename = "X-Pipenotify-Signature", value_type = String)]
    pub signature: String,
}

type WebhookResponse = (StatusCode, Json<WebhookAcceptResponse>);

/// Receive a Pipedrive webhook, routed to a tenant by its company id
#[utoipa::path(
    post,
    path = "/webhooks/pipedrive",
    params(PipenotifySignatureHeader),
    request_body(content = serde_json::Value, description = "Pipedrive webhook payload (v1 or v2)"),
    responses(
        (status = 202, description = "Event queued or ignored", body = WebhookAcceptResponse),
        (status = 400, description = "Malformed payload", body = ApiError),
        (status = 401, description = "Missing or invalid signature", body = ApiError),
        (status = 404, description = "No tenant for this Pipedrive account", body = ApiError),
        (status = 413, description = "Payload too large", body = ApiError)
    ),
    tag = "webhooks"
)]
pub async fn receive_pipedrive_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<WebhookResponse, ApiError> {
    ingest(&state, None, &headers, &body).await
}

/// Receive a Pipedrive webhook for an explicit tenant
#[utoipa::path(
    post,
    path = "/webhooks/pipedrive/{tenant_id}",
    params(
        ("tenant_id" = Uuid, Path, description = "Tenant UUID"),
        PipenotifySignatureHeader
    ),
    request_body(content = serde_json::Value, description = "Pipedrive webhook payload (v1 or v2)"),
    responses(
        (status = 202, description = "Event queued or ignored", body = WebhookAcceptResponse),
        (status = 400, description = "Malformed payload", body = ApiError),
        (status = 401, description = "Missing or invalid signature", body = ApiError),
        (status = 404, description = "Tenant not found (after shared-secret verification)", body = ApiError),
        (status = 409, description = "Tenant is bound to another Pipedrive account", body = ApiError),
        (status = 413, description = "Payload too large", body = ApiError)
    ),
    tag = "webhooks"
)]
pub async fn receive_tenant_pipedrive_webhook(
    State(state): State<AppState>,
    Path(tenant_id): Path<Uuid>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<WebhookResponse, ApiError> {
    ingest(&state, Some(tenant_id), &headers, &body).await
}

async fn ingest(
    state: &AppState,
    path_tenant_id: Option<Uuid>,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<WebhookResponse, ApiError> {
    let result = ingest_inner(state, path_tenant_id, headers, body).await;
    let outcome = match &result {
        Ok((_, Json(response))) => response.status.clone(),
        Err(err) => err.code.to_lowercase(),
    };
    counter!("pipenotify_webhooks_received_total", "outcome" => outcome).increment(1);
    result
}

async fn ingest_inner(
    state: &AppState,
    path_tenant_id: Option<Uuid>,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<WebhookResponse, ApiError> {
    let max_bytes = state.config.webhook_max_body_bytes();
    if body.len() > max_bytes {
        warn!(size = body.len(), max_bytes, "Rejecting oversized webhook payload");
        return Err(ApiError::from(ErrorType::PayloadTooLarge));
    }

    let shared_secret = state.config.webhook_shared_secret.as_deref();
    let tenants = TenantRepository::new(&state.db);

    // A path tenant is known up front, so the signature is checked before parsing.
    // Unknown ids must pass the shared secret before a 404 reveals anything.
    let path_tenant = match path_tenant_id {
        Some(tenant_id) => match tenants.get_tenant_by_id(tenant_id).await? {
            Some(tenant) => {
                verify(body, headers, &tenant, shared_secret)?;
                Some(tenant)
            }
            None => {
                verify_shared(body, headers, shared_secret)?;
                return Err(not_found("Tenant not found"));
            }
        },
        None => None,
    };

    let payload: JsonValue = serde_json::from_slice(body).map_err(|err| {
        validation_error("Invalid JSON payload", json!({ "body": err.to_string() }))
    })?;
    let event = normalize(&payload, Utc::now()).map_err(|err| {
        validation_error(
            "Unsupported Pipedrive payload",
            json!({ "payload": err.to_string() }),
        )
    })?;

    let tenant = match path_tenant {
        Some(tenant) => match tenant.pipedrive_company_id.as_deref() {
            Some(bound) if bound == event.company_id => tenant,
            Some(_) => {
                warn!(tenant_id = %tenant.id, "Webhook company does not match tenant binding");
                return Err(conflict("Tenant is bound to a different Pipedrive account"));
            }
            None => {
                info!(tenant_id = %tenant.id, company_id = %event.company_id, "Binding tenant to Pipedrive account");
                tenants.bind_company_id(tenant.id, &event.company_id).await?
            }
        },
        None => {
            let existing = tenants.find_by_company_id(&event.company_id).await?;
            match existing {
                Some(tenant) => {
                    verify(body, headers, &tenant, shared_secret)?;
                    tenant
                }
                None => {
                    verify_shared(body, headers, shared_secret)?;
                    if !state.config.auto_provision_tenants {
                        debug!(company_id = %event.company_id, "Unknown Pipedrive account");
                        return Err(not_found("No tenant is connected to this Pipedrive account"));
                    }
                    info!(company_id = %event.company_id, "Auto-provisioning tenant");
                    tenants.create_for_company(&event.company_id).await?
                }
            }
        }
    };

    if tenant.is_canceled() {
        debug!(tenant_id = %tenant.id, "Ignoring webhook for canceled tenant");
        return Ok((
            StatusCode::ACCEPTED,
            Json(WebhookAcceptResponse {
                status: "ignored".to_string(),
                job_id: None,
            }),
        ));
    }

    let snapshot = serde_json::to_value(&event).map_err(anyhow::Error::from)?;
    let job = NotificationJobRepository::new(&state.db)
        .enqueue_event_job(tenant.id, snapshot, Utc::now())
        .await?;

    info!(
        tenant_id = %tenant.id,
        job_id = %job.id,
        event_type = %event.event_type,
        "Pipedrive event queued"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(WebhookAcceptResponse {
            status: "accepted".to_string(),
            job_id: Some(job.id.to_string()),
        }),
    ))
}

fn verify(
    body: &[u8],
    headers: &HeaderMap,
    tenant: &TenantModel,
    shared_secret: Option<&str>,
) -> Result<(), ApiError> {
    verify_request(body, headers, tenant.webhook_secret.as_deref(), shared_secret)
        .map_err(|err| rejection(err, Some(tenant.id)))
}

fn verify_shared(
    body: &[u8],
    headers: &HeaderMap,
    shared_secret: Option<&str>,
) -> Result<(), ApiError> {
    verify_request(body, headers, None, shared_secret).map_err(|err| rejection(err, None))
}

fn rejection(err: VerificationError, tenant_id: Option<Uuid>) -> ApiError {
    warn!(tenant_id = ?tenant_id, error = %err, "Webhook signature rejected");
    ApiError::new(err.status_code(), "UNAUTHORIZED", err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::db::connect_in_memory;
    use crate::repositories::tenant::CreateTenantRequest;
    use crate::webhook_verification::{SIGNATURE_HEADER, compute_signature};
    use axum::http::HeaderValue;
    use std::sync::Arc;

    async fn state(config: AppConfig) -> AppState {
        AppState {
            config: Arc::new(config),
            db: connect_in_memory().await.unwrap(),
        }
    }

    fn signed(body: &[u8], secret: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            SIGNATURE_HEADER,
            HeaderValue::from_str(&compute_signature(body, secret).unwrap()).unwrap(),
        );
        headers
    }

    fn won_payload(company_id: u64) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "meta": { "action": "updated", "object": "deal", "id": 7, "company_id": company_id },
            "current": { "id": 7, "title": "Big deal", "status": "won", "value": 1000 },
            "previous": { "status": "open" }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn unknown_account_is_rejected_without_auto_provisioning() {
        let state = state(AppConfig {
            webhook_shared_secret: Some("shared".to_string()),
            ..AppConfig::default()
        })
        .await;
        let body = won_payload(42);

        let err = ingest(&state, None, &signed(&body, "shared"), &body)
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn auto_provisioning_creates_bound_tenant() {
        let state = state(AppConfig {
            webhook_shared_secret: Some("shared".to_string()),
            auto_provision_tenants: true,
            ..AppConfig::default()
        })
        .await;
        let body = won_payload(42);

        let (status, Json(response)) = ingest(&state, None, &signed(&body, "shared"), &body)
            .await
            .unwrap();
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(response.status, "accepted");

        let tenant = TenantRepository::new(&state.db)
            .find_by_company_id("42")
            .await
            .unwrap();
        assert!(tenant.is_some());
    }

    #[tokio::test]
    async fn path_tenant_binding_is_enforced() {
        let state = state(AppConfig::default()).await;
        let tenant = TenantRepository::new(&state.db)
            .create_tenant(CreateTenantRequest {
                webhook_secret: Some("tenant-secret".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        let first = won_payload(1);
        ingest(&state, Some(tenant.id), &signed(&first, "tenant-secret"), &first)
            .await
            .unwrap();
        let bound = TenantRepository::new(&state.db)
            .get_tenant_by_id(tenant.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(bound.pipedrive_company_id.as_deref(), Some("1"));

        let other = won_payload(2);
        let err = ingest(&state, Some(tenant.id), &signed(&other, "tenant-secret"), &other)
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn bad_signature_is_unauthorized() {
        let state = state(AppConfig {
            webhook_shared_secret: Some("shared".to_string()),
            ..AppConfig::default()
        })
        .await;
        let tenant = TenantRepository::new(&state.db)
            .create_tenant(CreateTenantRequest::default())
            .await
            .unwrap();
        let body = won_payload(1);

        let err = ingest(&state, Some(tenant.id), &signed(&body, "wrong"), &body)
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);

        let err = ingest(&state, Some(tenant.id), &HeaderMap::new(), &body)
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unknown_path_tenant_requires_signature_before_not_found() {
        let state = state(AppConfig {
            webhook_shared_secret: Some("shared".to_string()),
            ..AppConfig::default()
        })
        .await;
        let body = won_payload(1);
        let missing = Uuid::new_v4();

        let err = ingest(&state, Some(missing), &HeaderMap::new(), &body)
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);

        let err = ingest(&state, Some(missing), &signed(&body, "tenant-guess"), &body)
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);

        let err = ingest(&state, Some(missing), &signed(&body, "shared"), &body)
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn oversized_and_malformed_payloads_are_rejected() {
        let state = state(AppConfig {
            webhook_shared_secret: Some("shared".to_string()),
            webhook_max_body_kb: 1,
            ..AppConfig::default()
        })
        .await;

        let large = vec![b' '; 2048];
        let err = ingest(&state, None, &signed(&large, "shared"), &large)
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::PAYLOAD_TOO_LARGE);

        let garbage = b"not json".to_vec();
        let err = ingest(&state, None, &signed(&garbage, "shared"), &garbage)
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }
}
