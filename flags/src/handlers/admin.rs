use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use serde_json::json;

use crate::api::{ApiResponse, FlagError, PagedResponse, Pagination};
use crate::audit::{DailyCount, ReasonCount};
use crate::flag_definitions::{parse_value, FlagDefinition};
use crate::overrides::{
    OrganizationFlagOverride, OrganizationOverrideDetails, UserFlagOverride, UserOverrideDetails,
};
use crate::requests::{
    AnalyticsQuery, CreateFlagBody, FlagDefinitionBody, OrgFlagBody, PaginationQuery,
    UserOverrideBody,
};
use crate::router;

pub async fn list_flags(
    state: State<router::State>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<PagedResponse<FlagDefinition>>, FlagError> {
    let (page, limit) = query.page_and_limit();
    let (data, total) = state.definitions.list_definitions(page, limit).await?;

    Ok(Json(PagedResponse {
        success: true,
        data,
        pagination: Pagination { page, limit, total },
    }))
}

pub async fn create_flag(
    state: State<router::State>,
    Json(body): Json<CreateFlagBody>,
) -> Result<(StatusCode, Json<ApiResponse<FlagDefinition>>), FlagError> {
    let definition = body.definition.into_definition(body.flag_key)?;
    let stored = state.definitions.upsert_definition(definition).await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::new(stored))))
}

pub async fn update_flag(
    state: State<router::State>,
    Path(flag_key): Path<String>,
    Json(body): Json<FlagDefinitionBody>,
) -> Result<Json<ApiResponse<FlagDefinition>>, FlagError> {
    let definition = body.into_definition(flag_key)?;
    let stored = state.definitions.upsert_definition(definition).await?;

    Ok(Json(ApiResponse::new(stored)))
}

pub async fn list_org_overrides(
    state: State<router::State>,
    Path(organization_id): Path<i64>,
) -> Result<Json<ApiResponse<Vec<OrganizationOverrideDetails>>>, FlagError> {
    let rows = state.org_overrides.list_org_overrides(organization_id).await?;
    Ok(Json(ApiResponse::new(rows)))
}

pub async fn set_org_flag(
    state: State<router::State>,
    Path((organization_id, flag_key)): Path<(i64, String)>,
    Json(body): Json<OrgFlagBody>,
) -> Result<Json<ApiResponse<OrganizationFlagOverride>>, FlagError> {
    // Validation happens before any write; an out-of-range percentage must
    // not create or modify a row.
    let row = body.into_override(
        organization_id,
        flag_key,
        &state.config.default_environment,
    )?;
    state.org_overrides.upsert_org_override(row.clone()).await?;

    Ok(Json(ApiResponse::new(row)))
}

pub async fn list_user_overrides(
    state: State<router::State>,
    Path(user_id): Path<i64>,
) -> Result<Json<ApiResponse<Vec<UserOverrideDetails>>>, FlagError> {
    let rows = state.user_overrides.list_user_overrides(user_id).await?;
    Ok(Json(ApiResponse::new(rows)))
}

pub async fn set_user_override(
    state: State<router::State>,
    Path((user_id, flag_key)): Path<(i64, String)>,
    Json(body): Json<UserOverrideBody>,
) -> Result<Json<ApiResponse<UserFlagOverride>>, FlagError> {
    // When the flag is defined, reject values its type cannot decode.
    if let Some(definition) = state.definitions.get_definition(&flag_key).await? {
        parse_value(definition.flag_type, &body.override_value).map_err(|e| {
            FlagError::Validation {
                field: "overrideValue",
                message: e.to_string(),
            }
        })?;
    }

    let row = body.into_override(user_id, flag_key);
    state.user_overrides.upsert_user_override(row.clone()).await?;

    Ok(Json(ApiResponse::new(row)))
}

pub async fn remove_user_override(
    state: State<router::State>,
    Path((user_id, flag_key)): Path<(i64, String)>,
) -> Result<Json<serde_json::Value>, FlagError> {
    state
        .user_overrides
        .delete_user_override(user_id, &flag_key)
        .await?;

    // Absence of the row is not an error: the delete is idempotent.
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagAnalytics {
    pub evaluation_stats: Vec<ReasonCount>,
    pub daily_stats: Vec<DailyCount>,
}

pub async fn flag_analytics(
    state: State<router::State>,
    Path(flag_key): Path<String>,
    Query(query): Query<AnalyticsQuery>,
) -> Result<Json<ApiResponse<FlagAnalytics>>, FlagError> {
    let since = query.window();
    let evaluation_stats = state.audit.evaluation_stats(&flag_key, since).await?;
    let daily_stats = state.audit.daily_stats(&flag_key, since).await?;

    Ok(Json(ApiResponse::new(FlagAnalytics {
        evaluation_stats,
        daily_stats,
    })))
}
