use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Map, Value};
use utoipa::IntoParams;

use agentdesk_core::error::ApiError;
use agentdesk_core::forms::{
    ClearFormsResponse, FormContent, FormKind, FormsResponse, NewForm, NotifyResponse,
    SubmitAllRequest, SubmitAllResponse, SubmitFormRequest, SubmitFormResponse,
};

use crate::error::AppError;
use crate::extract::{AppJson, ClientOrigin};
use crate::sanitize;
use crate::state::AppState;

/// Notification endpoints called by the workflow system.
pub fn notify_router() -> Router<AppState> {
    Router::new()
        .route("/external/options", get(notify))
        .route("/api/notify", get(notify))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/forms", get(list_forms))
        .route("/api/submit_form", post(submit_form))
        .route("/api/submit_all", post(submit_all))
        .route("/api/clear_forms", post(clear_forms))
}

/// Query parameters of a form notification
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct NotifyQuery {
    /// Kind code: "0" update, "1" choice (default), "2" input
    #[serde(rename = "type")]
    pub form_type: Option<String>,
    pub message: Option<String>,
    pub question: Option<String>,
    /// JSON array of `{value, text}` options
    pub options: Option<String>,
    /// JSON object passed through on update forms
    pub update_data: Option<String>,
    /// Session key to stage the form for; defaults to the caller
    pub session: Option<String>,
}

/// Decode a JSON query parameter. Malformed input is logged and replaced
/// with `fallback` instead of failing the request.
fn decode_param(name: &str, raw: Option<&str>, fallback: Value) -> Value {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return fallback;
    };
    match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(param = name, error = %e, "Malformed JSON query parameter ignored");
            fallback
        }
    }
}

/// Stage a pending form
///
/// Called by the workflow system. In session discipline an identical pending
/// choice question from the same session is reused instead of duplicated.
#[utoipa::path(
    get,
    path = "/external/options",
    params(NotifyQuery),
    responses(
        (status = 200, description = "Form staged or reused", body = NotifyResponse)
    ),
    tag = "forms"
)]
pub async fn notify(
    State(state): State<AppState>,
    ClientOrigin(caller): ClientOrigin,
    Query(query): Query<NotifyQuery>,
) -> Json<NotifyResponse> {
    let origin = query
        .session
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or(caller);

    let kind = FormKind::from_code(query.form_type.as_deref().unwrap_or_default());
    let options = decode_param(
        "options",
        query.options.as_deref(),
        Value::Array(Vec::new()),
    );
    let update_data = decode_param(
        "update_data",
        query.update_data.as_deref(),
        Value::Object(Map::new()),
    );

    let form = NewForm::new(
        &sanitize::clean(query.question.as_deref().unwrap_or_default()),
        &sanitize::clean(query.message.as_deref().unwrap_or_default()),
        FormContent::from_parts(kind, &options, &update_data),
    );
    let outcome = state.forms.notify(form, &origin);
    let form_count = state.forms.pending_count(state.forms.scope_for(&origin));

    Json(NotifyResponse {
        status: "success".to_string(),
        message: if outcome.existing {
            "Form already pending".to_string()
        } else {
            "Request received".to_string()
        },
        form_type: kind.code().to_string(),
        form_id: outcome.form_id,
        existing: outcome.existing,
        form_count,
    })
}

/// List pending forms
///
/// Expired forms are dropped first. Update forms are handed out once: they
/// are resolved by the listing that returns them.
#[utoipa::path(
    get,
    path = "/api/forms",
    responses(
        (status = 200, description = "Pending forms in insertion order", body = FormsResponse)
    ),
    tag = "forms"
)]
pub async fn list_forms(
    State(state): State<AppState>,
    ClientOrigin(origin): ClientOrigin,
) -> Json<FormsResponse> {
    let forms = state.forms.list_pending(state.forms.scope_for(&origin));
    Json(FormsResponse {
        status: "success".to_string(),
        count: forms.len(),
        forms,
    })
}

/// Submit one form
///
/// Resolves the form and returns the message text its answer stands for.
#[utoipa::path(
    post,
    path = "/api/submit_form",
    request_body = SubmitFormRequest,
    responses(
        (status = 200, description = "Form resolved", body = SubmitFormResponse),
        (status = 400, description = "Missing form_id", body = ApiError),
        (status = 404, description = "Form already resolved or expired", body = ApiError)
    ),
    tag = "forms"
)]
pub async fn submit_form(
    State(state): State<AppState>,
    ClientOrigin(origin): ClientOrigin,
    AppJson(req): AppJson<SubmitFormRequest>,
) -> Result<Json<SubmitFormResponse>, AppError> {
    let form_id = req
        .form_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::Validation {
            message: "form_id is required".to_string(),
            field: Some("form_id".to_string()),
            received: None,
            docs_hint: Some("Use a form_id from GET /api/forms".to_string()),
        })?;

    let submission = state
        .forms
        .submit_one(form_id, &req.form_data, state.forms.scope_for(&origin))?;

    if let Some(claimed) = req.form_type.as_deref()
        && claimed != submission.kind.code()
    {
        tracing::debug!(
            form_id,
            claimed,
            stored = submission.kind.code(),
            "Submitted type differs from stored form kind"
        );
    }

    let message_text = match req.full_message {
        Some(text) if !text.trim().is_empty() => text,
        _ => submission.text,
    };

    Ok(Json(SubmitFormResponse {
        status: "success".to_string(),
        message: "Form submitted".to_string(),
        form_id: submission.form_id,
        message_text,
        form_type: submission.kind.code().to_string(),
        update_data: submission.update_data,
    }))
}

/// Submit several forms
///
/// Forms are resolved in body order. Ids that are no longer pending are
/// listed in `failed_forms` without failing the batch.
#[utoipa::path(
    post,
    path = "/api/submit_all",
    request_body = SubmitAllRequest,
    responses(
        (status = 200, description = "Batch processed", body = SubmitAllResponse),
        (status = 400, description = "Malformed body", body = ApiError)
    ),
    tag = "forms"
)]
pub async fn submit_all(
    State(state): State<AppState>,
    ClientOrigin(origin): ClientOrigin,
    AppJson(req): AppJson<SubmitAllRequest>,
) -> Result<Json<SubmitAllResponse>, AppError> {
    let entries: Vec<(String, Map<String, Value>)> = req
        .form_data
        .into_iter()
        .map(|(id, data)| match data {
            Value::Object(values) => (id, values),
            _ => (id, Map::new()),
        })
        .collect();

    let batch = state.forms.submit_batch(
        entries.iter().map(|(id, values)| (id.as_str(), values)),
        state.forms.scope_for(&origin),
    );

    let combined_message = match req.combined_message {
        Some(text) if !text.trim().is_empty() => text,
        _ => batch.combined_text,
    };
    let count = batch.resolved_ids.len();

    Ok(Json(SubmitAllResponse {
        status: "success".to_string(),
        message: format!("Submitted {count} forms"),
        combined_message,
        submitted_forms: batch.resolved_ids,
        failed_forms: batch.failed_ids,
        count,
    }))
}

/// Clear pending forms
#[utoipa::path(
    post,
    path = "/api/clear_forms",
    responses(
        (status = 200, description = "Forms cleared", body = ClearFormsResponse)
    ),
    tag = "forms"
)]
pub async fn clear_forms(
    State(state): State<AppState>,
    ClientOrigin(origin): ClientOrigin,
) -> Json<ClearFormsResponse> {
    let count = state.forms.clear_all(state.forms.scope_for(&origin));
    Json(ClearFormsResponse {
        status: "success".to_string(),
        message: format!("Cleared {count} forms"),
        count,
    })
}
