use std::collections::HashMap;

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use tracing::instrument;

use crate::api::FlagError;
use crate::engine::{EvaluationContext, ResolvedFlag};
use crate::requests::EvaluateRequest;
use crate::router;

#[derive(Debug, Serialize)]
pub struct EvaluateResponse {
    pub success: bool,
    pub data: HashMap<String, ResolvedFlag>,
    pub context: EvaluationContext,
}

#[instrument(skip_all)]
pub async fn evaluate(
    state: State<router::State>,
    Json(request): Json<EvaluateRequest>,
) -> Result<Json<EvaluateResponse>, FlagError> {
    let (flag_keys, context) = request.into_context(&state.config.default_environment);
    let data = state.engine.evaluate(&flag_keys, &context).await?;

    Ok(Json(EvaluateResponse {
        success: true,
        data,
        context,
    }))
}
