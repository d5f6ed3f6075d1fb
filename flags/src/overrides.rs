use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::flag_definitions::FlagType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "rollout_strategy", rename_all = "lowercase")]
pub enum RolloutStrategy {
    Percentage,
    Whitelist,
    All,
}

/// Strategy-specific settings, stored as jsonb. Only the whitelist strategy
/// reads it today; unknown fields are tolerated so older rows keep decoding.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RolloutConfig {
    #[serde(default)]
    pub whitelist: Vec<i64>,
}

/// Per-tenant enablement for one flag in one environment.
#[derive(Debug, Clone, Deserialize, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationFlagOverride {
    pub organization_id: i64,
    pub flag_key: String,
    pub is_enabled: bool,
    pub rollout_percentage: i16,
    pub rollout_strategy: RolloutStrategy,
    pub rollout_config: sqlx::types::Json<RolloutConfig>,
    pub environment: String,
    pub enabled_by: Option<String>,
    pub enabled_at: DateTime<Utc>,
}

/// Per-user escape hatch, the highest-priority source while unexpired.
/// Expiry is a read-time filter; rows are kept for audit history.
#[derive(Debug, Clone, Deserialize, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserFlagOverride {
    pub user_id: i64,
    pub flag_key: String,
    pub override_value: String,
    pub reason: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl UserFlagOverride {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Org override row joined with its flag's metadata, for the admin listing.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationOverrideDetails {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub org_override: OrganizationFlagOverride,
    pub name: String,
    pub flag_type: FlagType,
    pub description: Option<String>,
}

/// User override row joined with its flag's metadata, for the admin listing.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserOverrideDetails {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub user_override: UserFlagOverride,
    pub name: String,
    pub flag_type: FlagType,
    pub description: Option<String>,
}
