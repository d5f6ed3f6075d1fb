use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "flag_type", rename_all = "lowercase")]
pub enum FlagType {
    Boolean,
    String,
    Number,
    Json,
}

/// A flag definition, the global source of truth for one flag key.
/// Definitions are soft-disabled via `is_active`, never deleted.
#[derive(Debug, Clone, Deserialize, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct FlagDefinition {
    pub flag_key: String,
    pub name: String,
    pub description: Option<String>,
    pub flag_type: FlagType,
    // String-encoded; decoded per flag_type at the boundary.
    pub default_value: String,
    pub is_active: bool,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Error, Debug)]
pub enum ValueError {
    #[error("expected \"true\" or \"false\", got {0:?}")]
    InvalidBoolean(String),
    #[error("expected a finite number, got {0:?}")]
    InvalidNumber(String),
    #[error("invalid json: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Decodes a string-encoded flag value into its typed JSON representation.
pub fn parse_value(flag_type: FlagType, raw: &str) -> Result<Value, ValueError> {
    match flag_type {
        FlagType::Boolean => match raw.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(ValueError::InvalidBoolean(raw.to_string())),
        },
        FlagType::String => Ok(Value::String(raw.to_string())),
        FlagType::Number => {
            let parsed: f64 = raw
                .trim()
                .parse()
                .map_err(|_| ValueError::InvalidNumber(raw.to_string()))?;
            serde_json::Number::from_f64(parsed)
                .map(Value::Number)
                .ok_or_else(|| ValueError::InvalidNumber(raw.to_string()))
        }
        FlagType::Json => Ok(serde_json::from_str(raw)?),
    }
}

impl FlagDefinition {
    /// The value served when an org-level rule resolves this flag "on".
    /// Boolean flags turn into `true`; for other types the only payload an
    /// enablement can serve is the configured default.
    pub fn on_value(&self) -> Result<Value, ValueError> {
        match self.flag_type {
            FlagType::Boolean => Ok(Value::Bool(true)),
            _ => parse_value(self.flag_type, &self.default_value),
        }
    }

    /// The value served when an org-level rule resolves this flag "off".
    pub fn off_value(&self) -> Value {
        match self.flag_type {
            FlagType::Boolean => Value::Bool(false),
            _ => Value::Null,
        }
    }

    pub fn resolved_default(&self) -> Result<Value, ValueError> {
        parse_value(self.flag_type, &self.default_value)
    }
}
