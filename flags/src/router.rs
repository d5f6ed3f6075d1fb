use std::future::ready;
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::auth;
use crate::config::Config;
use crate::engine::FlagEvaluationEngine;
use crate::handlers::{admin, evaluate};
use crate::prometheus::{setup_metrics_recorder, track_metrics};
use crate::store::{
    EvaluationAuditLog, FlagDefinitionStore, OrganizationOverrideStore, UserOverrideStore,
};

#[derive(Clone)]
pub struct State {
    pub engine: Arc<FlagEvaluationEngine>,
    pub definitions: Arc<dyn FlagDefinitionStore + Send + Sync>,
    pub org_overrides: Arc<dyn OrganizationOverrideStore + Send + Sync>,
    pub user_overrides: Arc<dyn UserOverrideStore + Send + Sync>,
    pub audit: Arc<dyn EvaluationAuditLog + Send + Sync>,
    pub config: Arc<Config>,
}

async fn liveness() -> &'static str {
    "flags"
}

pub fn router<S>(store: Arc<S>, config: Config, metrics: bool) -> Router
where
    S: FlagDefinitionStore
        + OrganizationOverrideStore
        + UserOverrideStore
        + EvaluationAuditLog
        + Send
        + Sync
        + 'static,
{
    let engine = Arc::new(FlagEvaluationEngine::new(
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
    ));

    let state = State {
        engine,
        definitions: store.clone(),
        org_overrides: store.clone(),
        user_overrides: store.clone(),
        audit: store,
        config: Arc::new(config),
    };

    let admin_routes = Router::new()
        .route("/", get(admin::list_flags).post(admin::create_flag))
        .route("/:flag_key", put(admin::update_flag))
        .route(
            "/organization/:organization_id",
            get(admin::list_org_overrides),
        )
        .route(
            "/organization/:organization_id/:flag_key",
            put(admin::set_org_flag),
        )
        .route("/user/:user_id/overrides", get(admin::list_user_overrides))
        .route(
            "/user/:user_id/:flag_key/override",
            put(admin::set_user_override).delete(admin::remove_user_override),
        )
        .route("/analytics/:flag_key", get(admin::flag_analytics))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_admin,
        ));

    let router = Router::new()
        .route("/_liveness", get(liveness))
        .route(
            "/evaluate",
            post(evaluate::evaluate).layer(middleware::from_fn_with_state(
                state.clone(),
                auth::require_auth,
            )),
        )
        .merge(admin_routes)
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(track_metrics))
        .with_state(state);

    // Don't install a global recorder unless asked to; tests build many
    // routers in one process.
    if metrics {
        let recorder_handle = setup_metrics_recorder();

        router.route("/metrics", get(move || ready(recorder_handle.render())))
    } else {
        router
    }
}
