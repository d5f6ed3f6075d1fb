use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use serde::Serialize;
use serde_json::Value;
use tracing::instrument;

use crate::api::FlagError;
use crate::audit::{EvaluationRecord, EvaluationReason};
use crate::flag_definitions::{parse_value, FlagDefinition, ValueError};
use crate::overrides::RolloutStrategy;
use crate::rollout;
use crate::store::{
    EvaluationAuditLog, FlagDefinitionStore, OrganizationOverrideStore, StoreError,
    UserOverrideStore,
};

/// The (user, organization, environment) tuple a batch of flags is
/// resolved against.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationContext {
    pub user_id: Option<i64>,
    pub organization_id: Option<i64>,
    pub environment: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedFlag {
    pub value: Value,
    pub reason: EvaluationReason,
}

#[derive(thiserror::Error, Debug)]
enum ResolveError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Value(#[from] ValueError),
}

/// Resolves flag values against injected stores, applying a strict priority
/// order: user override, then org override, then the definition's default.
/// One engine per process; it holds no state beyond the store handles.
pub struct FlagEvaluationEngine {
    definitions: Arc<dyn FlagDefinitionStore + Send + Sync>,
    org_overrides: Arc<dyn OrganizationOverrideStore + Send + Sync>,
    user_overrides: Arc<dyn UserOverrideStore + Send + Sync>,
    audit: Arc<dyn EvaluationAuditLog + Send + Sync>,
}

impl FlagEvaluationEngine {
    pub fn new(
        definitions: Arc<dyn FlagDefinitionStore + Send + Sync>,
        org_overrides: Arc<dyn OrganizationOverrideStore + Send + Sync>,
        user_overrides: Arc<dyn UserOverrideStore + Send + Sync>,
        audit: Arc<dyn EvaluationAuditLog + Send + Sync>,
    ) -> Self {
        Self {
            definitions,
            org_overrides,
            user_overrides,
            audit,
        }
    }

    /// Resolve every requested key, returning exactly one entry per key.
    ///
    /// A failure on one key never aborts the rest of the batch: that key
    /// degrades to the flag's global default with reason `default`. The only
    /// hard error is an empty key list, which is a caller contract violation.
    #[instrument(skip_all, fields(batch_size = flag_keys.len()))]
    pub async fn evaluate(
        &self,
        flag_keys: &[String],
        context: &EvaluationContext,
    ) -> Result<HashMap<String, ResolvedFlag>, FlagError> {
        if flag_keys.is_empty() {
            return Err(FlagError::EmptyFlagKeys);
        }

        let mut results = HashMap::with_capacity(flag_keys.len());
        for flag_key in flag_keys {
            if results.contains_key(flag_key) {
                continue;
            }

            let resolved = match self.resolve(flag_key, context).await {
                Ok(resolved) => resolved,
                Err(e) => {
                    tracing::warn!(flag_key = %flag_key, "evaluation degraded to default: {}", e);
                    self.default_fallback(flag_key).await
                }
            };

            counter!(
                "flag_evaluations_total",
                &[("reason", resolved.reason.as_str().to_string())]
            )
            .increment(1);

            self.record(flag_key, context, &resolved).await;
            results.insert(flag_key.clone(), resolved);
        }

        Ok(results)
    }

    async fn resolve(
        &self,
        flag_key: &str,
        context: &EvaluationContext,
    ) -> Result<ResolvedFlag, ResolveError> {
        // The three reads have no ordering dependency; only the combination
        // logic below needs all of them.
        let user_fut = async {
            match context.user_id {
                Some(user_id) => self.user_overrides.get_user_override(user_id, flag_key).await,
                None => Ok(None),
            }
        };
        let org_fut = async {
            match context.organization_id {
                Some(organization_id) => {
                    self.org_overrides
                        .get_org_override(organization_id, flag_key, &context.environment)
                        .await
                }
                None => Ok(None),
            }
        };
        let def_fut = self.definitions.get_definition(flag_key);

        let (user_override, org_override, definition) =
            tokio::try_join!(user_fut, org_fut, def_fut)?;

        let Some(definition) = definition else {
            return Ok(ResolvedFlag {
                value: Value::Null,
                reason: EvaluationReason::UnknownFlag,
            });
        };

        // Soft-disabled flags serve their off value; overrides cannot
        // resurrect them.
        if !definition.is_active {
            return Ok(ResolvedFlag {
                value: definition.off_value(),
                reason: EvaluationReason::Default,
            });
        }

        let now = Utc::now();
        if let Some(user_override) = user_override.filter(|o| !o.is_expired(now)) {
            let value = parse_value(definition.flag_type, &user_override.override_value)?;
            return Ok(ResolvedFlag {
                value,
                reason: EvaluationReason::UserOverride,
            });
        }

        if let Some(org_override) = org_override {
            if !org_override.is_enabled {
                return Ok(off(&definition, EvaluationReason::OrgDisabled));
            }
            return match org_override.rollout_strategy {
                RolloutStrategy::All => on(&definition, EvaluationReason::OrgEnabled),
                RolloutStrategy::Whitelist => {
                    let listed = context
                        .user_id
                        .is_some_and(|uid| org_override.rollout_config.whitelist.contains(&uid));
                    if listed {
                        on(&definition, EvaluationReason::OrgEnabled)
                    } else {
                        // A whitelist miss behaves like a disabled flag, not
                        // like a missing override row.
                        Ok(off(&definition, EvaluationReason::OrgDisabled))
                    }
                }
                RolloutStrategy::Percentage => match context.user_id {
                    Some(user_id) => {
                        if rollout::is_in_rollout(
                            flag_key,
                            user_id,
                            org_override.rollout_percentage,
                        ) {
                            on(&definition, EvaluationReason::OrgRollout)
                        } else {
                            Ok(off(&definition, EvaluationReason::OrgRollout))
                        }
                    }
                    // No subject to bucket: fall back to plain enablement.
                    None => on(&definition, EvaluationReason::OrgEnabled),
                },
            };
        }

        Ok(ResolvedFlag {
            value: definition.resolved_default()?,
            reason: EvaluationReason::Default,
        })
    }

    /// Fail-safe resolution when the normal path errored for one key.
    async fn default_fallback(&self, flag_key: &str) -> ResolvedFlag {
        match self.definitions.get_definition(flag_key).await {
            Ok(Some(definition)) => ResolvedFlag {
                value: definition.resolved_default().unwrap_or(Value::Null),
                reason: EvaluationReason::Default,
            },
            Ok(None) => ResolvedFlag {
                value: Value::Null,
                reason: EvaluationReason::UnknownFlag,
            },
            Err(_) => ResolvedFlag {
                value: Value::Null,
                reason: EvaluationReason::Default,
            },
        }
    }

    /// Audit writes are best-effort: a dropped record is acceptable, a wrong
    /// evaluation result is not.
    async fn record(&self, flag_key: &str, context: &EvaluationContext, resolved: &ResolvedFlag) {
        let record = EvaluationRecord {
            flag_key: flag_key.to_string(),
            user_id: context.user_id,
            organization_id: context.organization_id,
            evaluated_value: resolved.value.to_string(),
            evaluation_reason: resolved.reason,
            environment: context.environment.clone(),
            created_at: Utc::now(),
        };
        if let Err(e) = self.audit.append(record).await {
            tracing::warn!(flag_key = %flag_key, "failed to append evaluation record: {}", e);
        }
    }
}

fn on(definition: &FlagDefinition, reason: EvaluationReason) -> Result<ResolvedFlag, ResolveError> {
    Ok(ResolvedFlag {
        value: definition.on_value()?,
        reason,
    })
}

fn off(definition: &FlagDefinition, reason: EvaluationReason) -> ResolvedFlag {
    ResolvedFlag {
        value: definition.off_value(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use serde_json::{json, Value};

    use super::*;
    use crate::store::MemoryStore;
    use crate::test_utils::{
        context_for, definition, engine_over, org_override, percentage_rollout, user_override,
        whitelist_rollout,
    };

    async fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store
            .upsert_definition(definition("new_ui", "false"))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_user_override_wins_over_org_and_default() {
        let store = seeded_store().await;
        store
            .upsert_org_override(percentage_rollout(1, "new_ui", "production", 0))
            .await
            .unwrap();
        store
            .upsert_user_override(user_override(7, "new_ui", "true"))
            .await
            .unwrap();

        let engine = engine_over(store);
        let results = engine
            .evaluate(&["new_ui".to_string()], &context_for(Some(7), Some(1)))
            .await
            .unwrap();

        let resolved = &results["new_ui"];
        assert_eq!(resolved.value, Value::Bool(true));
        assert_eq!(resolved.reason, EvaluationReason::UserOverride);
    }

    #[tokio::test]
    async fn test_expired_user_override_is_ignored() {
        let store = seeded_store().await;
        store
            .upsert_org_override(percentage_rollout(1, "new_ui", "production", 0))
            .await
            .unwrap();
        let mut stale = user_override(7, "new_ui", "true");
        stale.expires_at = Some(Utc::now() - Duration::hours(1));
        store.upsert_user_override(stale).await.unwrap();

        let engine = engine_over(store);
        let results = engine
            .evaluate(&["new_ui".to_string()], &context_for(Some(7), Some(1)))
            .await
            .unwrap();

        // 0% rollout: the org path resolves off, via the rollout reason.
        let resolved = &results["new_ui"];
        assert_eq!(resolved.value, Value::Bool(false));
        assert_eq!(resolved.reason, EvaluationReason::OrgRollout);
    }

    #[tokio::test]
    async fn test_unknown_flag_resolves_without_error() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_over(store);

        let results = engine
            .evaluate(&["missing".to_string()], &context_for(Some(7), Some(1)))
            .await
            .unwrap();

        let resolved = &results["missing"];
        assert_eq!(resolved.value, Value::Null);
        assert_eq!(resolved.reason, EvaluationReason::UnknownFlag);
    }

    #[tokio::test]
    async fn test_batch_isolation_of_unknown_keys() {
        let store = seeded_store().await;
        let engine = engine_over(store);

        let results = engine
            .evaluate(
                &["new_ui".to_string(), "missing".to_string()],
                &context_for(Some(7), Some(1)),
            )
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results["new_ui"].reason, EvaluationReason::Default);
        assert_eq!(results["missing"].reason, EvaluationReason::UnknownFlag);
    }

    #[tokio::test]
    async fn test_empty_batch_is_a_contract_violation() {
        let store = seeded_store().await;
        let engine = engine_over(store);

        let result = engine.evaluate(&[], &context_for(Some(7), Some(1))).await;
        assert!(matches!(result, Err(FlagError::EmptyFlagKeys)));
    }

    #[tokio::test]
    async fn test_org_enabled_with_all_strategy() {
        let store = seeded_store().await;
        store
            .upsert_org_override(org_override(1, "new_ui", "production"))
            .await
            .unwrap();

        let engine = engine_over(store);
        let results = engine
            .evaluate(&["new_ui".to_string()], &context_for(Some(7), Some(1)))
            .await
            .unwrap();

        let resolved = &results["new_ui"];
        assert_eq!(resolved.value, Value::Bool(true));
        assert_eq!(resolved.reason, EvaluationReason::OrgEnabled);
    }

    #[tokio::test]
    async fn test_org_disabled_turns_the_flag_off() {
        let store = seeded_store().await;
        let mut row = org_override(1, "new_ui", "production");
        row.is_enabled = false;
        store.upsert_org_override(row).await.unwrap();

        let engine = engine_over(store);
        let results = engine
            .evaluate(&["new_ui".to_string()], &context_for(Some(7), Some(1)))
            .await
            .unwrap();

        let resolved = &results["new_ui"];
        assert_eq!(resolved.value, Value::Bool(false));
        assert_eq!(resolved.reason, EvaluationReason::OrgDisabled);
    }

    #[tokio::test]
    async fn test_whitelist_hit_and_miss() {
        let store = seeded_store().await;
        store
            .upsert_org_override(whitelist_rollout(1, "new_ui", "production", vec![7]))
            .await
            .unwrap();
        let engine = engine_over(store);

        let hit = engine
            .evaluate(&["new_ui".to_string()], &context_for(Some(7), Some(1)))
            .await
            .unwrap();
        assert_eq!(hit["new_ui"].value, Value::Bool(true));
        assert_eq!(hit["new_ui"].reason, EvaluationReason::OrgEnabled);

        // A miss behaves like a disabled flag rather than falling through
        // to the global default.
        let miss = engine
            .evaluate(&["new_ui".to_string()], &context_for(Some(8), Some(1)))
            .await
            .unwrap();
        assert_eq!(miss["new_ui"].value, Value::Bool(false));
        assert_eq!(miss["new_ui"].reason, EvaluationReason::OrgDisabled);
    }

    #[tokio::test]
    async fn test_percentage_rollout_without_subject_falls_back_to_enablement() {
        let store = seeded_store().await;
        store
            .upsert_org_override(percentage_rollout(1, "new_ui", "production", 50))
            .await
            .unwrap();

        let engine = engine_over(store);
        let results = engine
            .evaluate(&["new_ui".to_string()], &context_for(None, Some(1)))
            .await
            .unwrap();

        assert_eq!(results["new_ui"].value, Value::Bool(true));
        assert_eq!(results["new_ui"].reason, EvaluationReason::OrgEnabled);
    }

    #[tokio::test]
    async fn test_half_rollout_is_deterministic_and_near_half() {
        let store = seeded_store().await;
        store
            .upsert_org_override(percentage_rollout(1, "new_ui", "production", 50))
            .await
            .unwrap();
        let engine = engine_over(store);

        let mut first_pass = Vec::new();
        for user_id in 0..1000 {
            let results = engine
                .evaluate(&["new_ui".to_string()], &context_for(Some(user_id), Some(1)))
                .await
                .unwrap();
            if results["new_ui"].value == Value::Bool(true) {
                first_pass.push(user_id);
            }
        }
        assert!(
            (430..=570).contains(&first_pass.len()),
            "expected roughly half of 1000 users, got {}",
            first_pass.len()
        );

        let mut second_pass = Vec::new();
        for user_id in 0..1000 {
            let results = engine
                .evaluate(&["new_ui".to_string()], &context_for(Some(user_id), Some(1)))
                .await
                .unwrap();
            if results["new_ui"].value == Value::Bool(true) {
                second_pass.push(user_id);
            }
        }
        assert_eq!(first_pass, second_pass);
    }

    #[tokio::test]
    async fn test_inactive_definition_ignores_overrides() {
        let store = Arc::new(MemoryStore::new());
        let mut def = definition("retired", "true");
        def.is_active = false;
        store.upsert_definition(def).await.unwrap();
        store
            .upsert_user_override(user_override(7, "retired", "true"))
            .await
            .unwrap();

        let engine = engine_over(store);
        let results = engine
            .evaluate(&["retired".to_string()], &context_for(Some(7), Some(1)))
            .await
            .unwrap();

        assert_eq!(results["retired"].value, Value::Bool(false));
        assert_eq!(results["retired"].reason, EvaluationReason::Default);
    }

    #[tokio::test]
    async fn test_malformed_override_degrades_to_default() {
        let store = seeded_store().await;
        store
            .upsert_user_override(user_override(7, "new_ui", "not-a-boolean"))
            .await
            .unwrap();

        let engine = engine_over(store);
        let results = engine
            .evaluate(&["new_ui".to_string()], &context_for(Some(7), Some(1)))
            .await
            .unwrap();

        assert_eq!(results["new_ui"].value, Value::Bool(false));
        assert_eq!(results["new_ui"].reason, EvaluationReason::Default);
    }

    #[tokio::test]
    async fn test_exactly_one_audit_record_per_key() {
        let store = seeded_store().await;
        let engine = engine_over(store.clone());

        engine
            .evaluate(
                &[
                    "new_ui".to_string(),
                    "missing".to_string(),
                    // Duplicate keys collapse to one entry and one record.
                    "new_ui".to_string(),
                ],
                &context_for(Some(7), Some(1)),
            )
            .await
            .unwrap();

        let since = Utc::now() - Duration::days(1);
        let known = store.evaluation_stats("new_ui", since).await.unwrap();
        assert_eq!(known.iter().map(|r| r.count).sum::<i64>(), 1);

        let unknown = store.evaluation_stats("missing", since).await.unwrap();
        assert_eq!(unknown.iter().map(|r| r.count).sum::<i64>(), 1);
        assert_eq!(
            unknown[0].evaluation_reason,
            EvaluationReason::UnknownFlag
        );
    }

    #[tokio::test]
    async fn test_non_boolean_on_value_is_the_configured_default() {
        let store = Arc::new(MemoryStore::new());
        let mut def = definition("page_size", "25");
        def.flag_type = crate::flag_definitions::FlagType::Number;
        store.upsert_definition(def).await.unwrap();
        store
            .upsert_org_override(org_override(1, "page_size", "production"))
            .await
            .unwrap();

        let engine = engine_over(store);
        let results = engine
            .evaluate(&["page_size".to_string()], &context_for(Some(7), Some(1)))
            .await
            .unwrap();

        assert_eq!(results["page_size"].value, json!(25.0));
        assert_eq!(results["page_size"].reason, EvaluationReason::OrgEnabled);
    }
}
