//! §6 HTTP surface: wires [`handler`] and [`admin`] into one `axum::Router`
//! over a shared [`AppState`]. The binary only has to bind a listener and
//! call [`axum::serve`].

use axum::Router;
use axum::routing::{delete, get, patch, post};

use crate::admin;
use crate::handler;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handler::health))
        .route("/v1/chat/completions", post(handler::chat_completions))
        .route("/keys/api", post(admin::create_api_key).get(admin::list_api_keys))
        .route("/keys/api/{id}", patch(admin::update_api_key).delete(admin::delete_api_key))
        .route("/keys/api/limit/{id}", patch(admin::set_api_key_limit))
        .route(
            "/keys/api/{id}/iam",
            post(admin::create_iam_rule).get(admin::list_iam_rules),
        )
        .route(
            "/keys/api/{id}/iam/{ruleId}",
            patch(admin::update_iam_rule).delete(admin::delete_iam_rule),
        )
        .route("/activity", get(admin::activity))
        .route("/logs", get(admin::logs))
        .with_state(state)
}
