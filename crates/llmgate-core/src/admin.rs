//! §6 key/IAM management plus the `/activity` and `/logs` read surfaces.
//! Thin SeaORM-backed handlers, guarded by the same bearer-token auth as
//! the chat endpoint (§4.E "no separate admin crate, since the spec treats
//! key/IAM data as first-class gateway state, not a side admin panel").

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use llmgate_common::GatewayError;
use llmgate_storage::{ActivityBucket, ApiKeyRow, IamRuleRow, LogQueryFilter, LogQueryResult};

use crate::auth;
use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ApiKeyResponse {
    pub id: i64,
    pub project_id: i64,
    pub masked_token: String,
    pub status: String,
    pub usage: Decimal,
    pub usage_limit: Option<Decimal>,
}

impl From<ApiKeyRow> for ApiKeyResponse {
    fn from(row: ApiKeyRow) -> Self {
        Self {
            id: row.id,
            project_id: row.project_id,
            masked_token: row.masked_token,
            status: row.status,
            usage: row.usage,
            usage_limit: row.usage_limit,
        }
    }
}

/// Created keys are returned with the plaintext `token` exactly once, like
/// every comparable API-key-issuance surface; every subsequent read
/// (`GET /keys/api`) only ever sees `masked_token`.
#[derive(Debug, Serialize)]
pub struct CreatedApiKey {
    #[serde(flatten)]
    pub key: ApiKeyResponse,
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateApiKeyBody {
    pub usage_limit: Option<Decimal>,
}

fn mask(token: &str) -> String {
    let tail: String = token.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
    format!("sk-...{tail}")
}

/// `POST /keys/api`.
pub async fn create_api_key(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateApiKeyBody>,
) -> Result<Response, AppError> {
    let resolved = auth::authenticate(state.storage.as_ref(), &headers).await?;
    let token = format!("sk-{}", uuid::Uuid::new_v4().simple());
    let masked = mask(&token);

    let row = state
        .storage
        .create_api_key(resolved.project.id, &token, &masked, body.usage_limit)
        .await
        .map_err(|e| GatewayError::internal(e.to_string()))?;

    Ok((
        axum::http::StatusCode::CREATED,
        Json(CreatedApiKey { key: row.into(), token }),
    )
        .into_response())
}

/// `GET /keys/api`.
pub async fn list_api_keys(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, AppError> {
    let resolved = auth::authenticate(state.storage.as_ref(), &headers).await?;
    let rows = state
        .storage
        .list_api_keys(resolved.project.id)
        .await
        .map_err(|e| GatewayError::internal(e.to_string()))?;
    let body: Vec<ApiKeyResponse> = rows.into_iter().map(Into::into).collect();
    Ok(Json(body).into_response())
}

#[derive(Debug, Deserialize)]
pub struct UpdateApiKeyStatusBody {
    pub status: String,
}

/// `PATCH /keys/api/{id}`.
pub async fn update_api_key(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<UpdateApiKeyStatusBody>,
) -> Result<Response, AppError> {
    auth::authenticate(state.storage.as_ref(), &headers).await?;
    let row = state
        .storage
        .update_api_key_status(id, &body.status)
        .await
        .map_err(|e| GatewayError::internal(e.to_string()))?
        .ok_or_else(|| GatewayError::not_found("api key not found"))?;
    Ok(Json(ApiKeyResponse::from(row)).into_response())
}

/// `DELETE /keys/api/{id}` — soft delete (`status="deleted"`, §3 ApiKey invariant).
pub async fn delete_api_key(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    auth::authenticate(state.storage.as_ref(), &headers).await?;
    let existed = state
        .storage
        .delete_api_key(id)
        .await
        .map_err(|e| GatewayError::internal(e.to_string()))?;
    if !existed {
        return Err(GatewayError::not_found("api key not found").into());
    }
    Ok(axum::http::StatusCode::NO_CONTENT.into_response())
}

#[derive(Debug, Deserialize)]
pub struct SetApiKeyLimitBody {
    pub usage_limit: Option<Decimal>,
}

/// `PATCH /keys/api/limit/{id}`.
pub async fn set_api_key_limit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<SetApiKeyLimitBody>,
) -> Result<Response, AppError> {
    auth::authenticate(state.storage.as_ref(), &headers).await?;
    let row = state
        .storage
        .set_api_key_limit(id, body.usage_limit)
        .await
        .map_err(|e| GatewayError::internal(e.to_string()))?
        .ok_or_else(|| GatewayError::not_found("api key not found"))?;
    Ok(Json(ApiKeyResponse::from(row)).into_response())
}

#[derive(Debug, Serialize)]
pub struct IamRuleResponse {
    pub id: i64,
    pub rule_type: String,
    pub rule_value: serde_json::Value,
    pub status: String,
}

impl From<IamRuleRow> for IamRuleResponse {
    fn from(row: IamRuleRow) -> Self {
        Self {
            id: row.id,
            rule_type: row.rule_type,
            rule_value: row.rule_value,
            status: row.status,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateIamRuleBody {
    pub rule_type: String,
    pub rule_value: serde_json::Value,
}

/// `POST /keys/api/{id}/iam`.
pub async fn create_iam_rule(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(api_key_id): Path<i64>,
    Json(body): Json<CreateIamRuleBody>,
) -> Result<Response, AppError> {
    auth::authenticate(state.storage.as_ref(), &headers).await?;
    let row = state
        .storage
        .create_iam_rule(api_key_id, &body.rule_type, body.rule_value)
        .await
        .map_err(|e| GatewayError::internal(e.to_string()))?;
    Ok((axum::http::StatusCode::CREATED, Json(IamRuleResponse::from(row))).into_response())
}

/// `GET /keys/api/{id}/iam`.
pub async fn list_iam_rules(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(api_key_id): Path<i64>,
) -> Result<Response, AppError> {
    auth::authenticate(state.storage.as_ref(), &headers).await?;
    let rows = state
        .storage
        .list_iam_rules(api_key_id)
        .await
        .map_err(|e| GatewayError::internal(e.to_string()))?;
    let body: Vec<IamRuleResponse> = rows.into_iter().map(Into::into).collect();
    Ok(Json(body).into_response())
}

#[derive(Debug, Deserialize)]
pub struct UpdateIamRuleBody {
    pub status: Option<String>,
    pub rule_value: Option<serde_json::Value>,
}

/// `PATCH /keys/api/{id}/iam/{ruleId}`.
pub async fn update_iam_rule(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((_api_key_id, rule_id)): Path<(i64, i64)>,
    Json(body): Json<UpdateIamRuleBody>,
) -> Result<Response, AppError> {
    auth::authenticate(state.storage.as_ref(), &headers).await?;
    let row = state
        .storage
        .update_iam_rule(rule_id, body.status.as_deref(), body.rule_value)
        .await
        .map_err(|e| GatewayError::internal(e.to_string()))?
        .ok_or_else(|| GatewayError::not_found("iam rule not found"))?;
    Ok(Json(IamRuleResponse::from(row)).into_response())
}

/// `DELETE /keys/api/{id}/iam/{ruleId}`.
pub async fn delete_iam_rule(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((_api_key_id, rule_id)): Path<(i64, i64)>,
) -> Result<Response, AppError> {
    auth::authenticate(state.storage.as_ref(), &headers).await?;
    let existed = state
        .storage
        .delete_iam_rule(rule_id)
        .await
        .map_err(|e| GatewayError::internal(e.to_string()))?;
    if !existed {
        return Err(GatewayError::not_found("iam rule not found").into());
    }
    Ok(axum::http::StatusCode::NO_CONTENT.into_response())
}

#[derive(Debug, Deserialize)]
pub struct ActivityQuery {
    #[serde(default = "default_activity_days")]
    pub days: u32,
    pub project_id: Option<i64>,
}

fn default_activity_days() -> u32 {
    7
}

#[derive(Debug, Serialize)]
pub struct ActivityBucketResponse {
    #[serde(with = "time::serde::rfc3339")]
    pub day: OffsetDateTime,
    pub requests: i64,
    pub errors: i64,
    pub total_tokens: i64,
    pub cost: Decimal,
}

impl From<ActivityBucket> for ActivityBucketResponse {
    fn from(bucket: ActivityBucket) -> Self {
        Self {
            day: bucket.day,
            requests: bucket.requests,
            errors: bucket.errors,
            total_tokens: bucket.total_tokens,
            cost: bucket.cost,
        }
    }
}

/// `GET /activity?days={7|30}&projectId=…`.
pub async fn activity(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ActivityQuery>,
) -> Result<Response, AppError> {
    let resolved = auth::authenticate(state.storage.as_ref(), &headers).await?;
    let project_id = query.project_id.unwrap_or(resolved.project.id);
    let days = if query.days >= 30 { 30 } else { 7 };

    let buckets = state
        .storage
        .activity_daily(project_id, days)
        .await
        .map_err(|e| GatewayError::internal(e.to_string()))?;
    let body: Vec<ActivityBucketResponse> = buckets.into_iter().map(Into::into).collect();
    Ok(Json(body).into_response())
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub start_date: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub end_date: Option<OffsetDateTime>,
    pub unified_finish_reason: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub custom_header_key: Option<String>,
    pub custom_header_value: Option<String>,
    pub project_id: Option<i64>,
    pub cursor: Option<i64>,
    #[serde(default = "default_logs_limit")]
    pub limit: u64,
}

fn default_logs_limit() -> u64 {
    50
}

#[derive(Debug, Serialize)]
pub struct LogSummaryResponse {
    pub id: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub requested_model: String,
    pub used_model: String,
    pub used_provider: String,
    pub unified_finish_reason: String,
    pub cost: Option<Decimal>,
    pub total_tokens: Option<i64>,
    pub has_error: bool,
}

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub rows: Vec<LogSummaryResponse>,
    pub next_cursor: Option<i64>,
    pub has_more: bool,
    pub limit: u64,
}

impl From<LogQueryResult> for LogsResponse {
    fn from(result: LogQueryResult) -> Self {
        let limit = result.rows.len() as u64;
        Self {
            rows: result
                .rows
                .into_iter()
                .map(|r| LogSummaryResponse {
                    id: r.id,
                    created_at: r.created_at,
                    requested_model: r.requested_model,
                    used_model: r.used_model,
                    used_provider: r.used_provider,
                    unified_finish_reason: r.unified_finish_reason,
                    cost: r.cost,
                    total_tokens: r.total_tokens,
                    has_error: r.has_error,
                })
                .collect(),
            next_cursor: result.next_cursor,
            has_more: result.has_more,
            limit,
        }
    }
}

/// `GET /logs` — cursor-paginated.
pub async fn logs(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<LogsQuery>,
) -> Result<Response, AppError> {
    let resolved = auth::authenticate(state.storage.as_ref(), &headers).await?;
    let limit = query.limit.clamp(1, 200);

    let filter = LogQueryFilter {
        project_id: Some(query.project_id.unwrap_or(resolved.project.id)),
        from: query.start_date,
        to: query.end_date,
        unified_finish_reason: query.unified_finish_reason,
        provider: query.provider,
        model: query.model,
        custom_header_key: query.custom_header_key,
        custom_header_value: query.custom_header_value,
        cursor: query.cursor,
        limit,
    };

    let result = state
        .storage
        .query_logs(filter)
        .await
        .map_err(|e| GatewayError::internal(e.to_string()))?;

    let mut response = LogsResponse::from(result);
    response.limit = limit;
    Ok(Json(response).into_response())
}
