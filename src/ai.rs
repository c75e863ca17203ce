//! AI field generation: turns a free-text brief into a validated, ordered
//! field set and atomically replaces the form's fields.
//!
//! One request goes to an OpenAI-compatible `chat/completions` endpoint with
//! a strict JSON schema constraining the output. Everything the model sends
//! back is normalized before it touches the database, and the commit is a
//! single transaction (`FormsDb::replace_fields`).

use std::collections::HashSet;

use anyhow::Context;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::db::DbHandle;
use crate::errors::ApiError;
use crate::models::{Field, FieldType, Form, FormStatus, NewField};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

const SYSTEM_PROMPT: &str = "You generate a form definition from a user brief. \
    Return only valid JSON that strictly follows the schema. \
    Use short, clear labels. \
    Allowed field types: TEXT, NUMBER, DROPDOWN. \
    If the field is not a DROPDOWN, set config.options to []. \
    If the field is a DROPDOWN, provide 2 to 6 short options.";

/// Structured-output schema sent as `response_format.json_schema`.
fn form_schema() -> serde_json::Value {
    json!({
        "name": "generated_form",
        "description": "Structured form generated from a user brief.",
        "strict": true,
        "schema": {
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "name": { "type": "string" },
                "slug": { "type": "string" },
                "description": { "type": "string" },
                "fields": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "additionalProperties": false,
                        "properties": {
                            "label": { "type": "string" },
                            "type": { "type": "string", "enum": ["TEXT", "NUMBER", "DROPDOWN"] },
                            "required": { "type": "boolean" },
                            "config": {
                                "type": "object",
                                "additionalProperties": false,
                                "properties": {
                                    "options": {
                                        "type": "array",
                                        "items": { "type": "string" }
                                    }
                                },
                                "required": ["options"]
                            }
                        },
                        "required": ["label", "type", "required", "config"]
                    }
                }
            },
            "required": ["name", "slug", "description", "fields"]
        }
    })
}

// ── Model output shapes ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct GeneratedForm {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub fields: Vec<GeneratedField>,
}

#[derive(Debug, Deserialize)]
pub struct GeneratedField {
    #[serde(default)]
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub config: GeneratedConfig,
}

#[derive(Debug, Default, Deserialize)]
pub struct GeneratedConfig {
    #[serde(default)]
    pub options: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

// ── Client ────────────────────────────────────────────────────────────

/// Handle to the external structured-generation service. Constructed once at
/// the composition root and injected into `AppState`; tests substitute a
/// local mock by pointing `base_url` at it.
#[derive(Clone)]
pub struct GeneratorClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl GeneratorClient {
    pub fn new(api_key: String, base_url: String, model: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            base_url,
            model,
        }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").context("OPENAI_API_KEY is not set")?;
        let base_url =
            std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let model = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        Ok(Self::new(api_key, base_url, model))
    }

    /// One schema-constrained completion call. Every failure mode — transport
    /// error, non-2xx status, empty content, unparseable content — maps to
    /// Bad Gateway; nothing is retried here.
    async fn generate(&self, user_message: &str) -> Result<GeneratedForm, ApiError> {
        let url = format!(
            "{}/chat/completions",
            self.base_url.trim_end_matches('/')
        );
        let body = json!({
            "model": self.model,
            "temperature": 0.2,
            "response_format": {
                "type": "json_schema",
                "json_schema": form_schema(),
            },
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": user_message },
            ],
        });

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "generation request failed");
                ApiError::BadGateway("Invalid AI response".into())
            })?
            .error_for_status()
            .map_err(|e| {
                tracing::warn!(error = %e, "generation service returned error status");
                ApiError::BadGateway("Invalid AI response".into())
            })?;

        let completion: ChatCompletion = response.json().await.map_err(|e| {
            tracing::warn!(error = %e, "generation response body unreadable");
            ApiError::BadGateway("Invalid AI response".into())
        })?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();
        if content.trim().is_empty() {
            return Err(ApiError::BadGateway("Empty AI response".into()));
        }

        serde_json::from_str(&content).map_err(|e| {
            tracing::warn!(error = %e, "generation content did not match schema");
            ApiError::BadGateway("Invalid AI response".into())
        })
    }
}

// ── Orchestration ─────────────────────────────────────────────────────

/// Replace the form's field set from a free-text brief.
///
/// Guards (empty prompt, missing form, published form) run before any
/// network traffic. The commit is one transaction: delete all fields,
/// update name/slug/updated_at, insert the normalized generated set.
pub async fn generate_form_fields(
    db: &DbHandle,
    client: &GeneratorClient,
    form_id: &str,
    prompt: &str,
) -> Result<Vec<Field>, ApiError> {
    let prompt = prompt.trim().to_string();
    if prompt.is_empty() {
        return Err(ApiError::BadRequest("Prompt required".into()));
    }

    let lookup_id = form_id.to_string();
    let (form, existing_fields) = db
        .call(move |db| {
            let form = db
                .get_form(&lookup_id)?
                .ok_or(ApiError::FormNotFound { id: lookup_id })?;
            if form.status == FormStatus::Published {
                return Err(ApiError::AlreadyPublished);
            }
            let fields = db.list_fields(&form.id)?;
            Ok((form, fields))
        })
        .await?;

    let user_message = build_user_message(&form, &existing_fields, &prompt);
    let generated = client.generate(&user_message).await?;

    if generated.fields.is_empty() {
        return Err(ApiError::BadGateway("No fields generated".into()));
    }

    let next_name = {
        let trimmed = generated.name.trim();
        if trimmed.is_empty() {
            form.name.clone()
        } else {
            trimmed.to_string()
        }
    };

    let candidate = slug_candidate(&generated.slug, &form.slug);
    let scan_candidate = candidate.clone();
    let scan_form_id = form.id.clone();
    let taken: HashSet<String> = db
        .call(move |db| db.slugs_with_prefix(&scan_candidate, &scan_form_id))
        .await?
        .into_iter()
        .collect();
    let next_slug = pick_available_slug(&candidate, &taken);

    let new_fields = normalize_fields(generated.fields);
    let commit_form_id = form.id.clone();
    let fields = db
        .call(move |db| db.replace_fields(&commit_form_id, &next_name, &next_slug, &new_fields))
        .await?;

    tracing::info!(form_id = %form.id, count = fields.len(), "regenerated form fields");
    Ok(fields)
}

fn build_user_message(form: &Form, existing_fields: &[Field], prompt: &str) -> String {
    let fields_summary = if existing_fields.is_empty() {
        "No fields yet".to_string()
    } else {
        let compact: Vec<serde_json::Value> = existing_fields
            .iter()
            .map(|f| {
                json!({
                    "id": f.id,
                    "label": f.label,
                    "type": f.field_type,
                    "required": f.required,
                    "order": f.position,
                    "config": f.config,
                })
            })
            .collect();
        serde_json::Value::Array(compact).to_string()
    };

    format!(
        "Current form:\nName: {}\nSlug: {}\nFields:\n{}\n\nBrief: {}",
        form.name, form.slug, fields_summary, prompt
    )
}

/// Normalize the raw model output into insertable fields: blank labels get a
/// positional default, dropdowns keep only non-blank options and fall back
/// to two placeholders when fewer than 2 survive, and non-dropdown types
/// always get an empty option list.
fn normalize_fields(raw: Vec<GeneratedField>) -> Vec<NewField> {
    raw.into_iter()
        .enumerate()
        .map(|(index, field)| {
            let label = {
                let trimmed = field.label.trim();
                if trimmed.is_empty() {
                    format!("Field {}", index + 1)
                } else {
                    trimmed.to_string()
                }
            };
            let options = if field.field_type == FieldType::Dropdown {
                let kept: Vec<String> = field
                    .config
                    .options
                    .into_iter()
                    .filter(|opt| !opt.trim().is_empty())
                    .collect();
                if kept.len() >= 2 {
                    kept
                } else {
                    vec!["Option 1".to_string(), "Option 2".to_string()]
                }
            } else {
                Vec::new()
            };
            NewField {
                field_type: field.field_type,
                label,
                required: field.required,
                config: json!({ "options": options }),
            }
        })
        .collect()
}

fn slug_candidate(generated_slug: &str, current_slug: &str) -> String {
    let generated = generated_slug.trim();
    let base = if generated.is_empty() {
        current_slug.trim()
    } else {
        generated
    };
    if base.is_empty() {
        fallback_slug()
    } else {
        base.to_string()
    }
}

fn fallback_slug() -> String {
    let id = Uuid::new_v4().to_string();
    format!("form-{}", &id[..8])
}

/// Exact candidate if free, else `-2`, `-3`, … until an unused suffix turns
/// up. `taken` comes from a prefix scan over other forms' slugs.
fn pick_available_slug(candidate: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(candidate) {
        return candidate.to_string();
    }
    let mut suffix = 2u64;
    loop {
        let attempt = format!("{}-{}", candidate, suffix);
        if !taken.contains(&attempt) {
            return attempt;
        }
        suffix += 1;
    }
}
