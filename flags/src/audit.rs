use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Which rule produced a flag's resolved value. Reasons are mutually
/// exclusive; exactly one is recorded per evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "evaluation_reason", rename_all = "snake_case")]
pub enum EvaluationReason {
    UserOverride,
    OrgRollout,
    OrgEnabled,
    OrgDisabled,
    Default,
    UnknownFlag,
}

impl EvaluationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationReason::UserOverride => "user_override",
            EvaluationReason::OrgRollout => "org_rollout",
            EvaluationReason::OrgEnabled => "org_enabled",
            EvaluationReason::OrgDisabled => "org_disabled",
            EvaluationReason::Default => "default",
            EvaluationReason::UnknownFlag => "unknown_flag",
        }
    }
}

/// One appended row per evaluated flag per call. Never updated or deleted
/// by the engine; retention is an external concern.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationRecord {
    pub flag_key: String,
    pub user_id: Option<i64>,
    pub organization_id: Option<i64>,
    pub evaluated_value: String,
    pub evaluation_reason: EvaluationReason,
    pub environment: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ReasonCount {
    pub evaluation_reason: EvaluationReason,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DailyCount {
    pub day: NaiveDate,
    pub count: i64,
}
