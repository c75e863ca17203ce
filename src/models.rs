use std::str::FromStr;

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Current timestamp as an RFC 3339 string, the storage format for all
/// `created_at` / `updated_at` / `published_at` columns.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FormStatus {
    Draft,
    Published,
}

impl FormStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Published => "PUBLISHED",
        }
    }
}

impl std::fmt::Display for FormStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FormStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DRAFT" => Ok(Self::Draft),
            "PUBLISHED" => Ok(Self::Published),
            _ => Err(format!("Invalid form status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldType {
    Text,
    Number,
    Dropdown,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Number => "NUMBER",
            Self::Dropdown => "DROPDOWN",
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TEXT" => Ok(Self::Text),
            "NUMBER" => Ok(Self::Number),
            "DROPDOWN" => Ok(Self::Dropdown),
            _ => Err(format!("Invalid field type: {}", s)),
        }
    }
}

/// A user-defined form. Slugs are globally unique; `published_at` is set
/// exactly once, at the DRAFT → PUBLISHED transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Form {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub status: FormStatus,
    pub published_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// One input definition within a form. `position` defines the total order
/// of fields inside the owning form and serializes as `order` on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    pub id: String,
    pub form_id: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub label: String,
    pub required: bool,
    #[serde(rename = "order")]
    pub position: i64,
    pub config: Option<serde_json::Value>,
    pub created_at: String,
    pub updated_at: String,
}

/// Partial update for a field. `None` leaves the column untouched; for
/// `config`, `Some(None)` clears it to NULL.
#[derive(Debug, Clone, Default)]
pub struct FieldChanges {
    pub field_type: Option<FieldType>,
    pub label: Option<String>,
    pub required: Option<bool>,
    pub position: Option<i64>,
    pub config: Option<Option<serde_json::Value>>,
}

/// A fully normalized field ready for insertion by the generation commit
/// protocol. Positions are assigned from array order at insert time.
#[derive(Debug, Clone)]
pub struct NewField {
    pub field_type: FieldType,
    pub label: String,
    pub required: bool,
    pub config: serde_json::Value,
}

// Raw row shapes: enum and JSON columns come back as TEXT and are converted
// after the rusqlite row mapping, so query_map closures stay fallible-free.

pub(crate) struct FormRow {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub status: String,
    pub published_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl FormRow {
    pub fn into_form(self) -> anyhow::Result<Form> {
        let status = FormStatus::from_str(&self.status)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Invalid status column")?;
        Ok(Form {
            id: self.id,
            name: self.name,
            slug: self.slug,
            status,
            published_at: self.published_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

pub(crate) struct FieldRow {
    pub id: String,
    pub form_id: String,
    pub field_type: String,
    pub label: String,
    pub required: bool,
    pub position: i64,
    pub config: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl FieldRow {
    pub fn into_field(self) -> anyhow::Result<Field> {
        let field_type = FieldType::from_str(&self.field_type)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Invalid field_type column")?;
        let config = match self.config {
            Some(raw) => {
                Some(serde_json::from_str(&raw).context("Invalid config column JSON")?)
            }
            None => None,
        };
        Ok(Field {
            id: self.id,
            form_id: self.form_id,
            field_type,
            label: self.label,
            required: self.required,
            position: self.position,
            config,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_form_status_roundtrip() {
        for s in &["DRAFT", "PUBLISHED"] {
            let parsed: FormStatus = s.parse().unwrap();
            assert_eq!(parsed.as_str(), *s);
        }
        assert!("ARCHIVED".parse::<FormStatus>().is_err());
    }

    #[test]
    fn test_field_type_roundtrip() {
        for s in &["TEXT", "NUMBER", "DROPDOWN"] {
            let parsed: FieldType = s.parse().unwrap();
            assert_eq!(parsed.as_str(), *s);
        }
        assert!("CHECKBOX".parse::<FieldType>().is_err());
    }

    #[test]
    fn test_serde_produces_uppercase_strings() {
        assert_eq!(
            serde_json::to_string(&FormStatus::Draft).unwrap(),
            "\"DRAFT\""
        );
        assert_eq!(
            serde_json::to_string(&FieldType::Dropdown).unwrap(),
            "\"DROPDOWN\""
        );
        assert_eq!(
            serde_json::from_str::<FieldType>("\"NUMBER\"").unwrap(),
            FieldType::Number
        );
    }

    #[test]
    fn test_field_serializes_wire_names() {
        let field = Field {
            id: "f1".into(),
            form_id: "fm1".into(),
            field_type: FieldType::Text,
            label: "Name".into(),
            required: false,
            position: 3,
            config: None,
            created_at: now_rfc3339(),
            updated_at: now_rfc3339(),
        };
        let value = serde_json::to_value(&field).unwrap();
        assert_eq!(value["type"], "TEXT");
        assert_eq!(value["order"], 3);
        assert_eq!(value["formId"], "fm1");
        assert!(value.get("position").is_none());
        assert!(value.get("field_type").is_none());
    }

    #[test]
    fn test_form_serializes_camel_case() {
        let form = Form {
            id: "fm1".into(),
            name: "Contact".into(),
            slug: "contact".into(),
            status: FormStatus::Published,
            published_at: Some("2026-01-01T00:00:00.000Z".into()),
            created_at: now_rfc3339(),
            updated_at: now_rfc3339(),
        };
        let value = serde_json::to_value(&form).unwrap();
        assert_eq!(value["status"], "PUBLISHED");
        assert_eq!(value["publishedAt"], "2026-01-01T00:00:00.000Z");
        assert!(value.get("published_at").is_none());
    }

    #[test]
    fn test_field_row_parses_config_json() {
        let row = FieldRow {
            id: "f1".into(),
            form_id: "fm1".into(),
            field_type: "DROPDOWN".into(),
            label: "Color".into(),
            required: true,
            position: 0,
            config: Some(r#"{"options":["Red","Blue"]}"#.into()),
            created_at: now_rfc3339(),
            updated_at: now_rfc3339(),
        };
        let field = row.into_field().unwrap();
        assert_eq!(field.field_type, FieldType::Dropdown);
        assert_eq!(field.config.unwrap()["options"][1], "Blue");
    }

    #[test]
    fn test_field_row_rejects_unknown_type() {
        let row = FieldRow {
            id: "f1".into(),
            form_id: "fm1".into(),
            field_type: "RADIO".into(),
            label: "x".into(),
            required: false,
            position: 0,
            config: None,
            created_at: now_rfc3339(),
            updated_at: now_rfc3339(),
        };
        assert!(row.into_field().is_err());
    }
}
