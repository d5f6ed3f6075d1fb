use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::instrument;

use crate::audit::{DailyCount, EvaluationRecord, ReasonCount};
use crate::config::Config;
use crate::flag_definitions::FlagDefinition;
use crate::overrides::{
    OrganizationFlagOverride, OrganizationOverrideDetails, UserFlagOverride, UserOverrideDetails,
};
use crate::store::{
    EvaluationAuditLog, FlagDefinitionStore, OrganizationOverrideStore, StoreError,
    UserOverrideStore,
};

/// Production store backed by PostgreSQL. One pool, shared by all traits.
pub struct PostgresStore {
    pool: PgPool,
}

fn query_error(command: &str) -> impl FnOnce(sqlx::Error) -> StoreError + '_ {
    move |error| StoreError::QueryError {
        command: command.to_owned(),
        error,
    }
}

impl PostgresStore {
    /// Connect and bring the schema up to date.
    pub async fn connect(config: &Config) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_pg_connections)
            .connect(&config.database_url)
            .await
            .map_err(|error| StoreError::ConnectionError { error })?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|error| StoreError::MigrationError { error })?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl FlagDefinitionStore for PostgresStore {
    #[instrument(skip(self))]
    async fn get_definition(&self, flag_key: &str) -> Result<Option<FlagDefinition>, StoreError> {
        sqlx::query_as::<_, FlagDefinition>(
            r#"
SELECT flag_key, name, description, flag_type, default_value, is_active, created_by, created_at
FROM flag_definitions
WHERE flag_key = $1
            "#,
        )
        .bind(flag_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error("get_definition"))
    }

    async fn list_definitions(
        &self,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<FlagDefinition>, u64), StoreError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM flag_definitions")
            .fetch_one(&self.pool)
            .await
            .map_err(query_error("count_definitions"))?;

        let rows = sqlx::query_as::<_, FlagDefinition>(
            r#"
SELECT flag_key, name, description, flag_type, default_value, is_active, created_by, created_at
FROM flag_definitions
ORDER BY flag_key
LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit as i64)
        .bind(((page - 1) * limit) as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(query_error("list_definitions"))?;

        Ok((rows, total as u64))
    }

    async fn upsert_definition(
        &self,
        definition: FlagDefinition,
    ) -> Result<FlagDefinition, StoreError> {
        sqlx::query_as::<_, FlagDefinition>(
            r#"
INSERT INTO flag_definitions
    (flag_key, name, description, flag_type, default_value, is_active, created_by, created_at)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
ON CONFLICT (flag_key) DO UPDATE SET
    name = EXCLUDED.name,
    description = EXCLUDED.description,
    flag_type = EXCLUDED.flag_type,
    default_value = EXCLUDED.default_value,
    is_active = EXCLUDED.is_active
RETURNING flag_key, name, description, flag_type, default_value, is_active, created_by, created_at
            "#,
        )
        .bind(&definition.flag_key)
        .bind(&definition.name)
        .bind(&definition.description)
        .bind(definition.flag_type)
        .bind(&definition.default_value)
        .bind(definition.is_active)
        .bind(&definition.created_by)
        .bind(definition.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(query_error("upsert_definition"))
    }
}

#[async_trait]
impl OrganizationOverrideStore for PostgresStore {
    #[instrument(skip(self))]
    async fn get_org_override(
        &self,
        organization_id: i64,
        flag_key: &str,
        environment: &str,
    ) -> Result<Option<OrganizationFlagOverride>, StoreError> {
        sqlx::query_as::<_, OrganizationFlagOverride>(
            r#"
SELECT organization_id, flag_key, is_enabled, rollout_percentage, rollout_strategy,
       rollout_config, environment, enabled_by, enabled_at
FROM organization_flag_overrides
WHERE organization_id = $1 AND flag_key = $2 AND environment = $3
            "#,
        )
        .bind(organization_id)
        .bind(flag_key)
        .bind(environment)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error("get_org_override"))
    }

    async fn list_org_overrides(
        &self,
        organization_id: i64,
    ) -> Result<Vec<OrganizationOverrideDetails>, StoreError> {
        sqlx::query_as::<_, OrganizationOverrideDetails>(
            r#"
SELECT o.organization_id, o.flag_key, o.is_enabled, o.rollout_percentage, o.rollout_strategy,
       o.rollout_config, o.environment, o.enabled_by, o.enabled_at,
       f.name, f.flag_type, f.description
FROM organization_flag_overrides o
JOIN flag_definitions f USING (flag_key)
WHERE o.organization_id = $1
ORDER BY o.flag_key, o.environment
            "#,
        )
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await
        .map_err(query_error("list_org_overrides"))
    }

    async fn upsert_org_override(&self, row: OrganizationFlagOverride) -> Result<(), StoreError> {
        sqlx::query(
            r#"
INSERT INTO organization_flag_overrides
    (organization_id, flag_key, is_enabled, rollout_percentage, rollout_strategy,
     rollout_config, environment, enabled_by, enabled_at)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
ON CONFLICT (organization_id, flag_key, environment) DO UPDATE SET
    is_enabled = EXCLUDED.is_enabled,
    rollout_percentage = EXCLUDED.rollout_percentage,
    rollout_strategy = EXCLUDED.rollout_strategy,
    rollout_config = EXCLUDED.rollout_config,
    enabled_by = EXCLUDED.enabled_by,
    enabled_at = EXCLUDED.enabled_at
            "#,
        )
        .bind(row.organization_id)
        .bind(&row.flag_key)
        .bind(row.is_enabled)
        .bind(row.rollout_percentage)
        .bind(row.rollout_strategy)
        .bind(&row.rollout_config)
        .bind(&row.environment)
        .bind(&row.enabled_by)
        .bind(row.enabled_at)
        .execute(&self.pool)
        .await
        .map_err(query_error("upsert_org_override"))?;
        Ok(())
    }
}

#[async_trait]
impl UserOverrideStore for PostgresStore {
    #[instrument(skip(self))]
    async fn get_user_override(
        &self,
        user_id: i64,
        flag_key: &str,
    ) -> Result<Option<UserFlagOverride>, StoreError> {
        sqlx::query_as::<_, UserFlagOverride>(
            r#"
SELECT user_id, flag_key, override_value, reason, expires_at, created_by, created_at
FROM user_flag_overrides
WHERE user_id = $1 AND flag_key = $2
            "#,
        )
        .bind(user_id)
        .bind(flag_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error("get_user_override"))
    }

    async fn list_user_overrides(
        &self,
        user_id: i64,
    ) -> Result<Vec<UserOverrideDetails>, StoreError> {
        sqlx::query_as::<_, UserOverrideDetails>(
            r#"
SELECT u.user_id, u.flag_key, u.override_value, u.reason, u.expires_at, u.created_by,
       u.created_at, f.name, f.flag_type, f.description
FROM user_flag_overrides u
JOIN flag_definitions f USING (flag_key)
WHERE u.user_id = $1
ORDER BY u.flag_key
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(query_error("list_user_overrides"))
    }

    async fn upsert_user_override(&self, row: UserFlagOverride) -> Result<(), StoreError> {
        sqlx::query(
            r#"
INSERT INTO user_flag_overrides
    (user_id, flag_key, override_value, reason, expires_at, created_by, created_at)
VALUES ($1, $2, $3, $4, $5, $6, $7)
ON CONFLICT (user_id, flag_key) DO UPDATE SET
    override_value = EXCLUDED.override_value,
    reason = EXCLUDED.reason,
    expires_at = EXCLUDED.expires_at,
    created_by = EXCLUDED.created_by,
    created_at = EXCLUDED.created_at
            "#,
        )
        .bind(row.user_id)
        .bind(&row.flag_key)
        .bind(&row.override_value)
        .bind(&row.reason)
        .bind(row.expires_at)
        .bind(&row.created_by)
        .bind(row.created_at)
        .execute(&self.pool)
        .await
        .map_err(query_error("upsert_user_override"))?;
        Ok(())
    }

    async fn delete_user_override(
        &self,
        user_id: i64,
        flag_key: &str,
    ) -> Result<(), StoreError> {
        // Deleting zero rows is a success: the delete is idempotent.
        sqlx::query("DELETE FROM user_flag_overrides WHERE user_id = $1 AND flag_key = $2")
            .bind(user_id)
            .bind(flag_key)
            .execute(&self.pool)
            .await
            .map_err(query_error("delete_user_override"))?;
        Ok(())
    }
}

#[async_trait]
impl EvaluationAuditLog for PostgresStore {
    async fn append(&self, record: EvaluationRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
INSERT INTO flag_evaluations
    (flag_key, user_id, organization_id, evaluated_value, evaluation_reason, environment, created_at)
VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&record.flag_key)
        .bind(record.user_id)
        .bind(record.organization_id)
        .bind(&record.evaluated_value)
        .bind(record.evaluation_reason)
        .bind(&record.environment)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(query_error("append_evaluation"))?;
        Ok(())
    }

    async fn evaluation_stats(
        &self,
        flag_key: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<ReasonCount>, StoreError> {
        sqlx::query_as::<_, ReasonCount>(
            r#"
SELECT evaluation_reason, COUNT(*) AS count
FROM flag_evaluations
WHERE flag_key = $1 AND created_at >= $2
GROUP BY evaluation_reason
ORDER BY count DESC, evaluation_reason
            "#,
        )
        .bind(flag_key)
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(query_error("evaluation_stats"))
    }

    async fn daily_stats(
        &self,
        flag_key: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<DailyCount>, StoreError> {
        sqlx::query_as::<_, DailyCount>(
            r#"
SELECT created_at::date AS day, COUNT(*) AS count
FROM flag_evaluations
WHERE flag_key = $1 AND created_at >= $2
GROUP BY day
ORDER BY day
            "#,
        )
        .bind(flag_key)
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(query_error("daily_stats"))
    }
}
