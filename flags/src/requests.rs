use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::api::FlagError;
use crate::engine::EvaluationContext;
use crate::flag_definitions::{parse_value, FlagDefinition, FlagType};
use crate::overrides::{
    OrganizationFlagOverride, RolloutConfig, RolloutStrategy, UserFlagOverride,
};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateRequest {
    pub flag_keys: Vec<String>,
    #[serde(default)]
    pub context: Option<RequestContext>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    pub user_id: Option<i64>,
    pub organization_id: Option<i64>,
    pub environment: Option<String>,
}

impl EvaluateRequest {
    pub fn into_context(self, default_environment: &str) -> (Vec<String>, EvaluationContext) {
        let request_context = self.context.unwrap_or_default();
        let context = EvaluationContext {
            user_id: request_context.user_id,
            organization_id: request_context.organization_id,
            environment: request_context
                .environment
                .unwrap_or_else(|| default_environment.to_string()),
        };
        (self.flag_keys, context)
    }
}

fn default_is_active() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagDefinitionBody {
    pub name: String,
    pub description: Option<String>,
    pub flag_type: FlagType,
    pub default_value: String,
    #[serde(default = "default_is_active")]
    pub is_active: bool,
    pub created_by: Option<String>,
}

impl FlagDefinitionBody {
    pub fn into_definition(self, flag_key: String) -> Result<FlagDefinition, FlagError> {
        if flag_key.trim().is_empty() {
            return Err(FlagError::Validation {
                field: "flagKey",
                message: "must not be empty".to_string(),
            });
        }
        // Reject defaults the flag's own type cannot decode before anything
        // is written.
        parse_value(self.flag_type, &self.default_value).map_err(|e| FlagError::Validation {
            field: "defaultValue",
            message: e.to_string(),
        })?;

        Ok(FlagDefinition {
            flag_key,
            name: self.name,
            description: self.description,
            flag_type: self.flag_type,
            default_value: self.default_value,
            is_active: self.is_active,
            created_by: self.created_by,
            created_at: Utc::now(),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFlagBody {
    pub flag_key: String,
    #[serde(flatten)]
    pub definition: FlagDefinitionBody,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrgFlagBody {
    pub is_enabled: bool,
    pub rollout_percentage: Option<i16>,
    pub rollout_strategy: Option<RolloutStrategy>,
    pub rollout_config: Option<RolloutConfig>,
    pub environment: Option<String>,
    pub enabled_by: Option<String>,
}

impl OrgFlagBody {
    pub fn into_override(
        self,
        organization_id: i64,
        flag_key: String,
        default_environment: &str,
    ) -> Result<OrganizationFlagOverride, FlagError> {
        let rollout_percentage = self.rollout_percentage.unwrap_or(100);
        if !(0..=100).contains(&rollout_percentage) {
            return Err(FlagError::RolloutPercentageOutOfRange);
        }

        Ok(OrganizationFlagOverride {
            organization_id,
            flag_key,
            is_enabled: self.is_enabled,
            rollout_percentage,
            rollout_strategy: self.rollout_strategy.unwrap_or(RolloutStrategy::All),
            rollout_config: sqlx::types::Json(self.rollout_config.unwrap_or_default()),
            environment: self
                .environment
                .unwrap_or_else(|| default_environment.to_string()),
            enabled_by: self.enabled_by,
            enabled_at: Utc::now(),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOverrideBody {
    pub override_value: String,
    pub reason: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_by: Option<String>,
}

impl UserOverrideBody {
    pub fn into_override(self, user_id: i64, flag_key: String) -> UserFlagOverride {
        UserFlagOverride {
            user_id,
            flag_key,
            override_value: self.override_value,
            reason: self.reason,
            expires_at: self.expires_at,
            created_by: self.created_by,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PaginationQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

impl PaginationQuery {
    /// Page defaults to 1; limit defaults to 50 and is capped at 100.
    pub fn page_and_limit(&self) -> (u64, u64) {
        let page = self.page.unwrap_or(1).max(1);
        let limit = self.limit.unwrap_or(50).clamp(1, 100);
        (page, limit)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AnalyticsQuery {
    pub days: Option<i64>,
}

impl AnalyticsQuery {
    pub fn window(&self) -> DateTime<Utc> {
        let days = self.days.unwrap_or(30).clamp(1, 365);
        Utc::now() - chrono::Duration::days(days)
    }
}
