use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use serde::{Deserialize, Deserializer};

use crate::ai::{self, GeneratorClient};
use crate::db::DbHandle;
use crate::errors::ApiError;
use crate::models::{FieldChanges, FieldType};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub generator: GeneratorClient,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateFormRequest {
    pub name: String,
    pub slug: String,
}

#[derive(Deserialize)]
pub struct UpdateFormRequest {
    pub name: Option<String>,
    pub slug: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateFieldRequest {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub label: String,
    pub required: Option<bool>,
    pub config: Option<serde_json::Value>,
}

#[derive(Deserialize)]
pub struct UpdateFieldRequest {
    #[serde(rename = "type")]
    pub field_type: Option<FieldType>,
    pub label: Option<String>,
    pub required: Option<bool>,
    pub order: Option<i64>,
    #[serde(default, deserialize_with = "double_option")]
    pub config: Option<Option<serde_json::Value>>,
}

#[derive(Deserialize)]
pub struct ReorderFieldsRequest {
    #[serde(rename = "fieldOrder")]
    pub field_order: Vec<String>,
}

#[derive(Deserialize)]
pub struct GenerateFieldsRequest {
    pub prompt: String,
}

/// Distinguishes an absent `config` key (leave untouched) from an explicit
/// `"config": null` (clear the column).
fn double_option<'de, D>(
    deserializer: D,
) -> Result<Option<Option<serde_json::Value>>, D::Error>
where
    D: Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

// ── Error handling ────────────────────────────────────────────────────

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::FormNotFound { .. } | ApiError::FieldNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            ApiError::SlugTaken | ApiError::AlreadyPublished => StatusCode::CONFLICT,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::LockPoisoned | ApiError::Database(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/forms", get(list_forms).post(create_form))
        .route("/api/forms/{id}", get(get_form).patch(update_form))
        .route("/api/forms/{id}/publish", post(publish_form))
        .route("/api/forms/{id}/generate", post(generate_fields))
        .route(
            "/api/forms/{id}/fields",
            get(list_fields).post(create_field),
        )
        .route("/api/forms/{id}/fields/reorder", put(reorder_fields))
        .route(
            "/api/forms/{id}/fields/{field_id}",
            axum::routing::patch(update_field).delete(delete_field),
        )
        .route("/health", get(health_check))
}

// ── Helpers ───────────────────────────────────────────────────────────

fn require_non_empty(value: &str, message: &str) -> Result<String, ApiError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ApiError::BadRequest(message.to_string()));
    }
    Ok(trimmed.to_string())
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn list_forms(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let forms = state.db.call(|db| db.list_forms()).await?;
    Ok(Json(forms))
}

async fn create_form(
    State(state): State<SharedState>,
    Json(req): Json<CreateFormRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = require_non_empty(&req.name, "Name required")?;
    let slug = require_non_empty(&req.slug, "Slug required")?;
    let form = state
        .db
        .call(move |db| db.create_form(&name, &slug))
        .await?;
    Ok((StatusCode::CREATED, Json(form)))
}

async fn get_form(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let form = state
        .db
        .call(move |db| {
            let found = db.get_form(&id)?;
            found.ok_or(ApiError::FormNotFound { id })
        })
        .await?;
    Ok(Json(form))
}

async fn update_form(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateFormRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = req
        .name
        .map(|n| require_non_empty(&n, "Name required"))
        .transpose()?;
    let slug = req
        .slug
        .map(|s| require_non_empty(&s, "Slug required"))
        .transpose()?;
    let form = state
        .db
        .call(move |db| db.update_form(&id, name.as_deref(), slug.as_deref()))
        .await?;
    Ok(Json(form))
}

async fn publish_form(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let form = state.db.call(move |db| db.publish_form(&id)).await?;
    Ok(Json(form))
}

async fn generate_fields(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<GenerateFieldsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let fields = ai::generate_form_fields(&state.db, &state.generator, &id, &req.prompt).await?;
    Ok(Json(fields))
}

async fn list_fields(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let fields = state.db.call(move |db| db.list_fields(&id)).await?;
    Ok(Json(fields))
}

async fn create_field(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<CreateFieldRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let label = require_non_empty(&req.label, "Label required")?;
    let field_type = req.field_type;
    let required = req.required.unwrap_or(false);
    let config = req.config;
    let field = state
        .db
        .call(move |db| db.create_field(&id, field_type, &label, required, config.as_ref()))
        .await?;
    Ok((StatusCode::CREATED, Json(field)))
}

async fn update_field(
    State(state): State<SharedState>,
    Path((id, field_id)): Path<(String, String)>,
    Json(req): Json<UpdateFieldRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let label = req
        .label
        .map(|l| require_non_empty(&l, "Label required"))
        .transpose()?;
    let changes = FieldChanges {
        field_type: req.field_type,
        label,
        required: req.required,
        position: req.order,
        config: req.config,
    };
    let field = state
        .db
        .call(move |db| db.update_field(&id, &field_id, &changes))
        .await?;
    Ok(Json(field))
}

async fn delete_field(
    State(state): State<SharedState>,
    Path((id, field_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .db
        .call(move |db| db.delete_field(&id, &field_id))
        .await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

async fn reorder_fields(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<ReorderFieldsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let order = req.field_order;
    let fields = state
        .db
        .call(move |db| db.reorder_fields(&id, &order))
        .await?;
    Ok(Json(fields))
}
