//! Token-gated signing surface.
//!
//! HTML endpoints:
//! - `GET  /sign/{kind}/{token}`                — review & sign page
//!
//! JSON API endpoints, one pair per document kind:
//! - `GET  /api/{kind}-approval/{token}`        — resolve a link to its view model
//! - `POST /api/{kind}-approval/{token}`        — submit an approval or rejection
//! - `POST /api/v1/signing-links`               — issue a signing link (internal)

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Html,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tera::{Context, Tera};
use tracing::warn;
use uuid::Uuid;

use standsign_core::domain::kind::DocumentKind;
use standsign_core::domain::outcome::ApprovalOutcome;
use standsign_core::domain::token::DocumentRef;
use standsign_core::errors::{ApprovalError, ErrorDisposition};
use standsign_core::signing::{LinkResolution, SubmissionInput};

use crate::signing::SigningService;

#[derive(Clone)]
pub struct PortalState {
    service: Arc<SigningService>,
    templates: Arc<Tera>,
    public_base_url: String,
}

impl PortalState {
    pub fn new(service: Arc<SigningService>, public_base_url: impl Into<String>) -> Self {
        Self {
            service,
            templates: init_templates(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    #[cfg(test)]
    fn with_templates(mut self, templates: Tera) -> Self {
        self.templates = Arc::new(templates);
        self
    }
}

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub success: bool,
    pub outcome: ApprovalOutcome,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ApprovalOutcome>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLinkRequest {
    pub document_kind: String,
    pub document_ref: String,
    pub expires_in_days: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkResponse {
    pub token: String,
    pub document_kind: DocumentKind,
    pub document_ref: String,
    pub url: String,
    pub expires_at: Option<String>,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Tera templates with embedded fallbacks for when the filesystem copies are
/// not deployed alongside the binary.
fn init_templates() -> Arc<Tera> {
    let mut tera = match Tera::new("templates/signing/**/*") {
        Ok(t) => t,
        Err(e) => {
            warn!(error = %e, "failed to load signing templates from filesystem, using embedded templates");
            Tera::default()
        }
    };

    tera.add_raw_template(
        "review.html",
        include_str!("../../../templates/signing/review.html"),
    )
    .ok();
    tera.add_raw_template(
        "completed.html",
        include_str!("../../../templates/signing/completed.html"),
    )
    .ok();

    Arc::new(tera)
}

pub fn router(state: PortalState) -> Router {
    Router::new()
        .route("/sign/{kind}/{token}", get(view_sign_page))
        .route("/api/{kind_approval}/{token}", get(get_approval).post(post_approval))
        .route("/api/v1/signing-links", post(create_signing_link))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// JSON API handlers
// ---------------------------------------------------------------------------

async fn get_approval(
    Path((kind_segment, token)): Path<(String, String)>,
    State(state): State<PortalState>,
) -> Result<Json<LinkResolution>, (StatusCode, Json<ApiError>)> {
    let kind = parse_approval_segment(&kind_segment)?;
    let correlation_id = new_correlation_id();

    state
        .service
        .resolve(kind, &token, &correlation_id)
        .await
        .map(Json)
        .map_err(|error| error_response(&error, None))
}

async fn post_approval(
    Path((kind_segment, token)): Path<(String, String)>,
    State(state): State<PortalState>,
    headers: HeaderMap,
    Json(input): Json<SubmissionInput>,
) -> Result<Json<SubmitResponse>, (StatusCode, Json<ApiError>)> {
    let kind = parse_approval_segment(&kind_segment)?;
    let correlation_id = new_correlation_id();
    let source_ip = client_ip(&headers);

    match state.service.submit(kind, &token, input, source_ip, &correlation_id).await {
        Ok(outcome) => Ok(Json(SubmitResponse { success: true, outcome })),
        Err(failure) => Err(error_response(&failure.error, failure.existing_outcome)),
    }
}

async fn create_signing_link(
    State(state): State<PortalState>,
    Json(body): Json<CreateLinkRequest>,
) -> Result<Json<LinkResponse>, (StatusCode, Json<ApiError>)> {
    let kind: DocumentKind = body.document_kind.parse().map_err(|_| {
        (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ApiError {
                error: "UnknownDocumentKind".to_string(),
                message: format!("`{}` is not a signable document kind", body.document_kind),
                outcome: None,
            }),
        )
    })?;

    let document_ref = body.document_ref.trim();
    if document_ref.is_empty() {
        return Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ApiError {
                error: "MissingDocumentRef".to_string(),
                message: "documentRef is required".to_string(),
                outcome: None,
            }),
        ));
    }

    let ttl_override = body
        .expires_in_days
        .map(|days| chrono::Duration::days(i64::from(days.clamp(1, 365))));
    let correlation_id = new_correlation_id();

    let token = state
        .service
        .issue_link(kind, DocumentRef(document_ref.to_string()), ttl_override, &correlation_id)
        .await
        .map_err(|error| error_response(&error, None))?;

    let url = format!(
        "{}/sign/{}/{}",
        state.public_base_url,
        kind.as_route_segment(),
        token.token
    );

    Ok(Json(LinkResponse {
        token: token.token,
        document_kind: kind,
        document_ref: token.document_ref.0,
        url,
        expires_at: token.expires_at.map(|dt| dt.to_rfc3339()),
    }))
}

// ---------------------------------------------------------------------------
// HTML handlers
// ---------------------------------------------------------------------------

async fn view_sign_page(
    Path((kind_segment, token)): Path<(String, String)>,
    State(state): State<PortalState>,
) -> Result<Html<String>, (StatusCode, Html<String>)> {
    let Ok(kind) = kind_segment.parse::<DocumentKind>() else {
        return Err((
            StatusCode::NOT_FOUND,
            Html("<h1>Link invalid</h1><p>This signing link is no longer valid.</p>".to_string()),
        ));
    };
    let correlation_id = new_correlation_id();

    let resolution = state
        .service
        .resolve(kind, &token, &correlation_id)
        .await
        .map_err(|error| html_error(&error))?;

    let mut context = Context::new();
    context.insert("kind_label", kind.display_name());
    context.insert("kind_segment", kind.as_route_segment());
    context.insert("token", &token);

    let (template, context) = match resolution {
        LinkResolution::Pending { document, prefill, policy } => {
            context.insert("document", &document);
            context.insert("prefill", &prefill);
            context.insert("policy", &policy);
            ("review.html", context)
        }
        LinkResolution::AlreadyCompleted { outcome, .. } => {
            context.insert("document_ref", &outcome.document_ref.0);
            context.insert("decision", outcome.record.decision.as_str());
            context.insert("signer_name", &outcome.record.signer_name);
            context.insert("recorded_at", &outcome.recorded_at.to_rfc3339());
            ("completed.html", context)
        }
    };

    let html = state.templates.render(template, &context).map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Html(format!("<h1>Template error</h1><pre>{e:?}</pre>")),
        )
    })?;

    Ok(Html(html))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// `collection-receipt-approval` -> `DocumentKind::CollectionReceipt`.
fn parse_approval_segment(
    segment: &str,
) -> Result<DocumentKind, (StatusCode, Json<ApiError>)> {
    segment
        .strip_suffix("-approval")
        .and_then(|kind_segment| kind_segment.parse::<DocumentKind>().ok())
        .ok_or_else(|| error_response(&ApprovalError::TokenNotFound, None))
}

fn error_response(
    error: &ApprovalError,
    outcome: Option<ApprovalOutcome>,
) -> (StatusCode, Json<ApiError>) {
    let status = match (error, error.disposition()) {
        (ApprovalError::TokenAlreadyConsumed, _) => StatusCode::CONFLICT,
        (_, ErrorDisposition::Terminal) => StatusCode::NOT_FOUND,
        (_, ErrorDisposition::Correctable) => StatusCode::UNPROCESSABLE_ENTITY,
        (_, ErrorDisposition::Transient) => StatusCode::SERVICE_UNAVAILABLE,
    };

    (
        status,
        Json(ApiError {
            error: error.code().to_string(),
            message: error.user_message().to_string(),
            outcome,
        }),
    )
}

fn html_error(error: &ApprovalError) -> (StatusCode, Html<String>) {
    let (status, _) = error_response(error, None);
    (status, Html(format!("<h1>Link invalid</h1><p>{}</p>", error.user_message())))
}

fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn new_correlation_id() -> String {
    format!("REQ-{}", &Uuid::new_v4().simple().to_string()[..12])
}
