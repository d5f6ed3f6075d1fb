use std::sync::Arc;

use chrono::Utc;
use rand::{distributions::Alphanumeric, Rng};

use crate::engine::{EvaluationContext, FlagEvaluationEngine};
use crate::flag_definitions::{FlagDefinition, FlagType};
use crate::overrides::{
    OrganizationFlagOverride, RolloutConfig, RolloutStrategy, UserFlagOverride,
};
use crate::store::MemoryStore;

pub fn random_string(prefix: &str, length: usize) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(Alphanumeric)
        .take(length)
        .map(char::from)
        .collect();
    format!("{}{}", prefix, suffix)
}

/// An active boolean definition with the given default.
pub fn definition(flag_key: &str, default_value: &str) -> FlagDefinition {
    FlagDefinition {
        flag_key: flag_key.to_string(),
        name: flag_key.to_string(),
        description: None,
        flag_type: FlagType::Boolean,
        default_value: default_value.to_string(),
        is_active: true,
        created_by: None,
        created_at: Utc::now(),
    }
}

/// An enabled org override with the `all` strategy.
pub fn org_override(
    organization_id: i64,
    flag_key: &str,
    environment: &str,
) -> OrganizationFlagOverride {
    OrganizationFlagOverride {
        organization_id,
        flag_key: flag_key.to_string(),
        is_enabled: true,
        rollout_percentage: 100,
        rollout_strategy: RolloutStrategy::All,
        rollout_config: sqlx::types::Json(RolloutConfig::default()),
        environment: environment.to_string(),
        enabled_by: None,
        enabled_at: Utc::now(),
    }
}

pub fn percentage_rollout(
    organization_id: i64,
    flag_key: &str,
    environment: &str,
    rollout_percentage: i16,
) -> OrganizationFlagOverride {
    OrganizationFlagOverride {
        rollout_strategy: RolloutStrategy::Percentage,
        rollout_percentage,
        ..org_override(organization_id, flag_key, environment)
    }
}

pub fn whitelist_rollout(
    organization_id: i64,
    flag_key: &str,
    environment: &str,
    whitelist: Vec<i64>,
) -> OrganizationFlagOverride {
    OrganizationFlagOverride {
        rollout_strategy: RolloutStrategy::Whitelist,
        rollout_config: sqlx::types::Json(RolloutConfig { whitelist }),
        ..org_override(organization_id, flag_key, environment)
    }
}

pub fn user_override(user_id: i64, flag_key: &str, value: &str) -> UserFlagOverride {
    UserFlagOverride {
        user_id,
        flag_key: flag_key.to_string(),
        override_value: value.to_string(),
        reason: None,
        expires_at: None,
        created_by: None,
        created_at: Utc::now(),
    }
}

pub fn context_for(user_id: Option<i64>, organization_id: Option<i64>) -> EvaluationContext {
    EvaluationContext {
        user_id,
        organization_id,
        environment: "production".to_string(),
    }
}

/// An engine whose four store seams all point at the same in-memory store.
pub fn engine_over(store: Arc<MemoryStore>) -> FlagEvaluationEngine {
    FlagEvaluationEngine::new(store.clone(), store.clone(), store.clone(), store)
}
