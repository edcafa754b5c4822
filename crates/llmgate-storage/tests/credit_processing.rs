//! §8 "usage worker" scenarios against a real `SeaOrmStorage` backed by
//! in-memory sqlite. No mocks: these exercise the same transaction that
//! runs against Postgres in production, just on a different SQLx driver.

use rust_decimal_macros::dec;
use sea_orm::{ActiveValue, EntityTrait};
use time::OffsetDateTime;

use llmgate_storage::entities;
use llmgate_storage::{NewLogRecord, SeaOrmStorage, Storage};

async fn fresh_storage() -> SeaOrmStorage {
    let storage = SeaOrmStorage::connect("sqlite::memory:").await.unwrap();
    storage.sync().await.unwrap();
    storage
}

async fn seed_organization(storage: &SeaOrmStorage, credits: rust_decimal::Decimal) -> i64 {
    let now = OffsetDateTime::now_utc();
    let active = entities::organizations::ActiveModel {
        id: ActiveValue::NotSet,
        credits: ActiveValue::Set(credits),
        plan: ActiveValue::Set("pro".to_string()),
        retention_level: ActiveValue::Set("standard".to_string()),
        status: ActiveValue::Set("active".to_string()),
        auto_topup_enabled: ActiveValue::Set(false),
        auto_topup_threshold: ActiveValue::Set(None),
        created_at: ActiveValue::Set(now),
        updated_at: ActiveValue::Set(now),
    };
    entities::Organizations::insert(active)
        .exec(storage.connection())
        .await
        .unwrap()
        .last_insert_id
}

async fn seed_project(storage: &SeaOrmStorage, organization_id: i64, mode: &str) -> i64 {
    let active = entities::projects::ActiveModel {
        id: ActiveValue::NotSet,
        organization_id: ActiveValue::Set(organization_id),
        mode: ActiveValue::Set(mode.to_string()),
        created_at: ActiveValue::Set(OffsetDateTime::now_utc()),
    };
    entities::Projects::insert(active)
        .exec(storage.connection())
        .await
        .unwrap()
        .last_insert_id
}

async fn seed_api_key(storage: &SeaOrmStorage, project_id: i64) -> i64 {
    let now = OffsetDateTime::now_utc();
    let active = entities::api_keys::ActiveModel {
        id: ActiveValue::NotSet,
        project_id: ActiveValue::Set(project_id),
        token: ActiveValue::Set(format!("sk-test-{project_id}")),
        masked_token: ActiveValue::Set("sk-...test".to_string()),
        status: ActiveValue::Set("active".to_string()),
        usage: ActiveValue::Set(dec!(0.00)),
        usage_limit: ActiveValue::Set(None),
        created_at: ActiveValue::Set(now),
        updated_at: ActiveValue::Set(now),
    };
    entities::ApiKeys::insert(active)
        .exec(storage.connection())
        .await
        .unwrap()
        .last_insert_id
}

fn log_record(organization_id: i64, project_id: i64, api_key_id: i64, used_mode: &str) -> NewLogRecord {
    static NEXT_ID: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
    let n = NEXT_ID.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    NewLogRecord {
        request_id: format!("req-{n}"),
        organization_id,
        project_id,
        api_key_id,
        created_at: OffsetDateTime::now_utc(),
        duration_ms: 120,
        requested_model: "gpt-4o".to_string(),
        requested_provider: None,
        used_model: "gpt-4o".to_string(),
        used_provider: "openai".to_string(),
        mode: "chat".to_string(),
        used_mode: used_mode.to_string(),
        cached: false,
        cost: Some(dec!(0.01)),
        input_cost: Some(dec!(0.006)),
        output_cost: Some(dec!(0.004)),
        request_cost: Some(dec!(0.00)),
        prompt_tokens: Some(100),
        completion_tokens: Some(50),
        total_tokens: Some(150),
        reasoning_tokens: None,
        cached_tokens: None,
        has_error: false,
        unified_finish_reason: "stop".to_string(),
        response_size: 512,
        time_to_first_token: Some(80),
        time_to_first_reasoning_token: None,
        messages: None,
        content: None,
        custom_headers: None,
        error_details: None,
    }
}

async fn organization_credits(storage: &SeaOrmStorage, organization_id: i64) -> rust_decimal::Decimal {
    entities::Organizations::find_by_id(organization_id)
        .one(storage.connection())
        .await
        .unwrap()
        .unwrap()
        .credits
}

async fn api_key_usage(storage: &SeaOrmStorage, api_key_id: i64) -> rust_decimal::Decimal {
    entities::ApiKeys::find_by_id(api_key_id)
        .one(storage.connection())
        .await
        .unwrap()
        .unwrap()
        .usage
}

async fn log_processed_at(storage: &SeaOrmStorage, log_id: i64) -> Option<OffsetDateTime> {
    entities::Logs::find_by_id(log_id)
        .one(storage.connection())
        .await
        .unwrap()
        .unwrap()
        .processed_at
}

/// Scenario 1: a `credits`-mode project deducts `cost` straight from the
/// organization's balance (100.00 -> 99.99 on a 0.01 log) *and* accumulates
/// the same cost onto the key's `usage` counter — the two updates are
/// independent (§4.F: "always accumulate into apiKeyCosts... additionally,
/// if usedMode=="credits" accumulate into orgCosts").
#[tokio::test]
async fn credits_mode_deducts_organization_balance() {
    let storage = fresh_storage().await;
    let org_id = seed_organization(&storage, dec!(100.00)).await;
    let project_id = seed_project(&storage, org_id, "credits").await;
    let api_key_id = seed_api_key(&storage, project_id).await;

    storage
        .insert_logs_batch(vec![log_record(org_id, project_id, api_key_id, "credits")])
        .await
        .unwrap();

    let outcome = storage.process_pending_logs(10).await.unwrap();
    assert_eq!(outcome.processed_logs, Some(1));
    assert_eq!(organization_credits(&storage, org_id).await, dec!(99.99));
    assert_eq!(api_key_usage(&storage, api_key_id).await, dec!(0.01));
}

/// Scenario 2: an `api-keys`-mode project leaves the organization's credits
/// untouched and instead accumulates `usage` on the key itself.
#[tokio::test]
async fn api_keys_mode_leaves_credits_untouched() {
    let storage = fresh_storage().await;
    let org_id = seed_organization(&storage, dec!(100.00)).await;
    let project_id = seed_project(&storage, org_id, "api-keys").await;
    let api_key_id = seed_api_key(&storage, project_id).await;

    storage
        .insert_logs_batch(vec![log_record(org_id, project_id, api_key_id, "api-keys")])
        .await
        .unwrap();

    storage.process_pending_logs(10).await.unwrap();

    assert_eq!(organization_credits(&storage, org_id).await, dec!(100.00));
    assert_eq!(api_key_usage(&storage, api_key_id).await, dec!(0.01));
}

/// Scenario 3: a cached response has `cost = None` and is a no-op on
/// balances, but still gets marked processed so it isn't retried forever.
#[tokio::test]
async fn cached_log_has_zero_effect_but_is_marked_processed() {
    let storage = fresh_storage().await;
    let org_id = seed_organization(&storage, dec!(100.00)).await;
    let project_id = seed_project(&storage, org_id, "credits").await;
    let api_key_id = seed_api_key(&storage, project_id).await;

    let mut cached = log_record(org_id, project_id, api_key_id, "credits");
    cached.cached = true;
    cached.cost = None;
    cached.input_cost = None;
    cached.output_cost = None;
    storage.insert_logs_batch(vec![cached]).await.unwrap();

    let outcome = storage.process_pending_logs(10).await.unwrap();
    assert_eq!(outcome.processed_logs, Some(1));
    assert_eq!(organization_credits(&storage, org_id).await, dec!(100.00));

    let log_id = entities::Logs::find()
        .one(storage.connection())
        .await
        .unwrap()
        .unwrap()
        .id;
    assert!(log_processed_at(&storage, log_id).await.is_some());
}

/// Scenario 4: a log already carrying `processed_at` must not be touched
/// again by a later batch — the `WHERE processed_at IS NULL` filter is
/// what makes batches idempotent across worker restarts.
#[tokio::test]
async fn already_processed_logs_are_skipped() {
    let storage = fresh_storage().await;
    let org_id = seed_organization(&storage, dec!(100.00)).await;
    let project_id = seed_project(&storage, org_id, "credits").await;
    let api_key_id = seed_api_key(&storage, project_id).await;

    storage
        .insert_logs_batch(vec![log_record(org_id, project_id, api_key_id, "credits")])
        .await
        .unwrap();
    let first = storage.process_pending_logs(10).await.unwrap();
    assert_eq!(first.processed_logs, Some(1));
    assert_eq!(organization_credits(&storage, org_id).await, dec!(99.99));

    let second = storage.process_pending_logs(10).await.unwrap();
    assert_eq!(second.processed_logs, Some(0));
    assert_eq!(organization_credits(&storage, org_id).await, dec!(99.99));
}

/// Scenario 5: a batch spanning several logs for the same organization
/// deducts the exact sum in one transaction.
#[tokio::test]
async fn batched_logs_deduct_exact_sum() {
    let storage = fresh_storage().await;
    let org_id = seed_organization(&storage, dec!(100.00)).await;
    let project_id = seed_project(&storage, org_id, "credits").await;
    let api_key_id = seed_api_key(&storage, project_id).await;

    let mut first = log_record(org_id, project_id, api_key_id, "credits");
    first.cost = Some(dec!(0.01));
    let mut second = log_record(org_id, project_id, api_key_id, "credits");
    second.cost = Some(dec!(0.02));

    storage.insert_logs_batch(vec![first, second]).await.unwrap();

    let outcome = storage.process_pending_logs(10).await.unwrap();
    assert_eq!(outcome.processed_logs, Some(2));
    assert_eq!(organization_credits(&storage, org_id).await, dec!(99.97));
}

/// `process_pending_logs` respects `batch_size`, leaving the remainder for
/// the next tick rather than draining the whole queue at once.
#[tokio::test]
async fn batch_size_bounds_how_many_logs_are_processed() {
    let storage = fresh_storage().await;
    let org_id = seed_organization(&storage, dec!(100.00)).await;
    let project_id = seed_project(&storage, org_id, "credits").await;
    let api_key_id = seed_api_key(&storage, project_id).await;

    let logs = (0..5)
        .map(|_| log_record(org_id, project_id, api_key_id, "credits"))
        .collect();
    storage.insert_logs_batch(logs).await.unwrap();

    let first = storage.process_pending_logs(2).await.unwrap();
    assert_eq!(first.processed_logs, Some(2));

    let second = storage.process_pending_logs(10).await.unwrap();
    assert_eq!(second.processed_logs, Some(3));

    assert_eq!(organization_credits(&storage, org_id).await, dec!(99.95));
}
