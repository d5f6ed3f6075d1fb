use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::audit::{DailyCount, EvaluationRecord, ReasonCount};
use crate::flag_definitions::FlagDefinition;
use crate::overrides::{
    OrganizationFlagOverride, OrganizationOverrideDetails, UserFlagOverride, UserOverrideDetails,
};

/// Errors for operations against the flag stores.
/// Errors can originate from sqlx and are wrapped by us to provide additional context.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("connection failed with: {error}")]
    ConnectionError { error: sqlx::Error },
    #[error("{command} query failed with: {error}")]
    QueryError { command: String, error: sqlx::Error },
    #[error("migration failed with: {error}")]
    MigrationError { error: sqlx::migrate::MigrateError },
}

/// Registry of flag definitions, keyed by flag_key.
#[async_trait]
pub trait FlagDefinitionStore {
    async fn get_definition(&self, flag_key: &str) -> Result<Option<FlagDefinition>, StoreError>;

    /// Page through definitions ordered by flag_key; also returns the total
    /// row count for pagination.
    async fn list_definitions(
        &self,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<FlagDefinition>, u64), StoreError>;

    /// Insert or replace by flag_key, preserving created_by/created_at of an
    /// existing row. Returns the stored row.
    async fn upsert_definition(
        &self,
        definition: FlagDefinition,
    ) -> Result<FlagDefinition, StoreError>;
}

/// Per-tenant enablement records, keyed by (organization_id, flag_key, environment).
#[async_trait]
pub trait OrganizationOverrideStore {
    async fn get_org_override(
        &self,
        organization_id: i64,
        flag_key: &str,
        environment: &str,
    ) -> Result<Option<OrganizationFlagOverride>, StoreError>;

    async fn list_org_overrides(
        &self,
        organization_id: i64,
    ) -> Result<Vec<OrganizationOverrideDetails>, StoreError>;

    async fn upsert_org_override(
        &self,
        row: OrganizationFlagOverride,
    ) -> Result<(), StoreError>;
}

/// Per-user override records, keyed by (user_id, flag_key).
#[async_trait]
pub trait UserOverrideStore {
    async fn get_user_override(
        &self,
        user_id: i64,
        flag_key: &str,
    ) -> Result<Option<UserFlagOverride>, StoreError>;

    async fn list_user_overrides(
        &self,
        user_id: i64,
    ) -> Result<Vec<UserOverrideDetails>, StoreError>;

    async fn upsert_user_override(&self, row: UserFlagOverride) -> Result<(), StoreError>;

    /// Delete by key. Absence of the row is not an error.
    async fn delete_user_override(&self, user_id: i64, flag_key: &str)
        -> Result<(), StoreError>;
}

/// Append-only record of evaluation decisions, with windowed rollups.
#[async_trait]
pub trait EvaluationAuditLog {
    async fn append(&self, record: EvaluationRecord) -> Result<(), StoreError>;

    async fn evaluation_stats(
        &self,
        flag_key: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<ReasonCount>, StoreError>;

    async fn daily_stats(
        &self,
        flag_key: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<DailyCount>, StoreError>;
}

/// In-process store for tests and local development. Not durable.
#[derive(Default)]
pub struct MemoryStore {
    definitions: RwLock<HashMap<String, FlagDefinition>>,
    org_overrides: RwLock<HashMap<(i64, String, String), OrganizationFlagOverride>>,
    user_overrides: RwLock<HashMap<(i64, String), UserFlagOverride>>,
    evaluations: RwLock<Vec<EvaluationRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn join_metadata(
        definitions: &HashMap<String, FlagDefinition>,
        flag_key: &str,
    ) -> Option<(String, crate::flag_definitions::FlagType, Option<String>)> {
        definitions
            .get(flag_key)
            .map(|def| (def.name.clone(), def.flag_type, def.description.clone()))
    }
}

#[async_trait]
impl FlagDefinitionStore for MemoryStore {
    async fn get_definition(&self, flag_key: &str) -> Result<Option<FlagDefinition>, StoreError> {
        Ok(self.definitions.read().await.get(flag_key).cloned())
    }

    async fn list_definitions(
        &self,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<FlagDefinition>, u64), StoreError> {
        let definitions = self.definitions.read().await;
        let total = definitions.len() as u64;

        let mut rows: Vec<FlagDefinition> = definitions.values().cloned().collect();
        rows.sort_by(|a, b| a.flag_key.cmp(&b.flag_key));

        let offset = ((page - 1) * limit) as usize;
        let rows = rows.into_iter().skip(offset).take(limit as usize).collect();
        Ok((rows, total))
    }

    async fn upsert_definition(
        &self,
        mut definition: FlagDefinition,
    ) -> Result<FlagDefinition, StoreError> {
        let mut definitions = self.definitions.write().await;
        if let Some(existing) = definitions.get(&definition.flag_key) {
            definition.created_by = existing.created_by.clone();
            definition.created_at = existing.created_at;
        }
        definitions.insert(definition.flag_key.clone(), definition.clone());
        Ok(definition)
    }
}

#[async_trait]
impl OrganizationOverrideStore for MemoryStore {
    async fn get_org_override(
        &self,
        organization_id: i64,
        flag_key: &str,
        environment: &str,
    ) -> Result<Option<OrganizationFlagOverride>, StoreError> {
        let key = (
            organization_id,
            flag_key.to_string(),
            environment.to_string(),
        );
        Ok(self.org_overrides.read().await.get(&key).cloned())
    }

    async fn list_org_overrides(
        &self,
        organization_id: i64,
    ) -> Result<Vec<OrganizationOverrideDetails>, StoreError> {
        let definitions = self.definitions.read().await;
        let org_overrides = self.org_overrides.read().await;

        let mut rows: Vec<OrganizationOverrideDetails> = org_overrides
            .values()
            .filter(|row| row.organization_id == organization_id)
            .filter_map(|row| {
                Self::join_metadata(&definitions, &row.flag_key).map(
                    |(name, flag_type, description)| OrganizationOverrideDetails {
                        org_override: row.clone(),
                        name,
                        flag_type,
                        description,
                    },
                )
            })
            .collect();
        rows.sort_by(|a, b| a.org_override.flag_key.cmp(&b.org_override.flag_key));
        Ok(rows)
    }

    async fn upsert_org_override(&self, row: OrganizationFlagOverride) -> Result<(), StoreError> {
        let key = (
            row.organization_id,
            row.flag_key.clone(),
            row.environment.clone(),
        );
        self.org_overrides.write().await.insert(key, row);
        Ok(())
    }
}

#[async_trait]
impl UserOverrideStore for MemoryStore {
    async fn get_user_override(
        &self,
        user_id: i64,
        flag_key: &str,
    ) -> Result<Option<UserFlagOverride>, StoreError> {
        let key = (user_id, flag_key.to_string());
        Ok(self.user_overrides.read().await.get(&key).cloned())
    }

    async fn list_user_overrides(
        &self,
        user_id: i64,
    ) -> Result<Vec<UserOverrideDetails>, StoreError> {
        let definitions = self.definitions.read().await;
        let user_overrides = self.user_overrides.read().await;

        let mut rows: Vec<UserOverrideDetails> = user_overrides
            .values()
            .filter(|row| row.user_id == user_id)
            .filter_map(|row| {
                Self::join_metadata(&definitions, &row.flag_key).map(
                    |(name, flag_type, description)| UserOverrideDetails {
                        user_override: row.clone(),
                        name,
                        flag_type,
                        description,
                    },
                )
            })
            .collect();
        rows.sort_by(|a, b| a.user_override.flag_key.cmp(&b.user_override.flag_key));
        Ok(rows)
    }

    async fn upsert_user_override(&self, row: UserFlagOverride) -> Result<(), StoreError> {
        let key = (row.user_id, row.flag_key.clone());
        self.user_overrides.write().await.insert(key, row);
        Ok(())
    }

    async fn delete_user_override(
        &self,
        user_id: i64,
        flag_key: &str,
    ) -> Result<(), StoreError> {
        let key = (user_id, flag_key.to_string());
        self.user_overrides.write().await.remove(&key);
        Ok(())
    }
}

#[async_trait]
impl EvaluationAuditLog for MemoryStore {
    async fn append(&self, record: EvaluationRecord) -> Result<(), StoreError> {
        self.evaluations.write().await.push(record);
        Ok(())
    }

    async fn evaluation_stats(
        &self,
        flag_key: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<ReasonCount>, StoreError> {
        let evaluations = self.evaluations.read().await;

        let mut counts = HashMap::new();
        for record in evaluations
            .iter()
            .filter(|r| r.flag_key == flag_key && r.created_at >= since)
        {
            *counts.entry(record.evaluation_reason).or_insert(0i64) += 1;
        }

        let mut rows: Vec<ReasonCount> = counts
            .into_iter()
            .map(|(evaluation_reason, count)| ReasonCount {
                evaluation_reason,
                count,
            })
            .collect();
        rows.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then(a.evaluation_reason.as_str().cmp(b.evaluation_reason.as_str()))
        });
        Ok(rows)
    }

    async fn daily_stats(
        &self,
        flag_key: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<DailyCount>, StoreError> {
        let evaluations = self.evaluations.read().await;

        let mut counts = BTreeMap::new();
        for record in evaluations
            .iter()
            .filter(|r| r.flag_key == flag_key && r.created_at >= since)
        {
            *counts.entry(record.created_at.date_naive()).or_insert(0i64) += 1;
        }

        Ok(counts
            .into_iter()
            .map(|(day, count)| DailyCount { day, count })
            .collect())
    }
}
