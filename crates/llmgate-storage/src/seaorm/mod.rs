//! [`SeaOrmStorage`] is the only [`Storage`] (and [`CredentialStore`])
//! implementation shipped here. It talks to whatever backend the DSN names
//! (sqlite for local/dev, postgres/mysql for the rest) through the same
//! entity set, using SeaORM 2.0's entity-first schema sync at startup
//! instead of hand-written migrations.

use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue, ColumnTrait, ConnectionTrait, Database, DatabaseBackend,
    DatabaseConnection, EntityTrait, FromQueryResult, QueryFilter, QueryOrder, QuerySelect, Schema,
    Statement, TransactionTrait,
};
use time::{Duration, OffsetDateTime};

use llmgate_common::GlobalConfig;

use crate::entities;
use crate::snapshot::GlobalConfigRow;
use crate::storage::{
    ActivityBucket, ApiKeyRow, CreditBatchOutcome, CredentialStore, IamRuleRow, LogQueryFilter,
    LogQueryResult, LogSummaryRow, NewLogRecord, OrgTopupCandidate, OrganizationRow, ProjectRow,
    ResolvedApiKey, Storage, StorageError, StorageResult,
};

const CREDIT_LOCK_KEY: &str = "credit_processing";
const LOCK_TTL: Duration = Duration::minutes(5);

#[derive(Debug, FromQueryResult)]
struct MaxTimestampRow {
    m: Option<OffsetDateTime>,
}

#[derive(Debug, FromQueryResult)]
struct MappingAggRow {
    used_model: String,
    used_provider: String,
    logs_count: i64,
    errors_count: i64,
    client_errors_count: i64,
    gateway_errors_count: i64,
    upstream_errors_count: i64,
    cached_count: i64,
    prompt_tokens_sum: i64,
    completion_tokens_sum: i64,
    total_tokens_sum: i64,
    reasoning_tokens_sum: i64,
    duration_sum: i64,
    time_to_first_token_sum: i64,
}

#[derive(Debug, FromQueryResult)]
struct ModelAggRow {
    used_model: String,
    logs_count: i64,
    errors_count: i64,
    client_errors_count: i64,
    gateway_errors_count: i64,
    upstream_errors_count: i64,
    cached_count: i64,
    prompt_tokens_sum: i64,
    completion_tokens_sum: i64,
    total_tokens_sum: i64,
    reasoning_tokens_sum: i64,
    duration_sum: i64,
    time_to_first_token_sum: i64,
}

#[derive(Debug, FromQueryResult)]
struct RollupMappingRow {
    model_id: String,
    provider_id: String,
    request_count_5m: i64,
    error_count_5m: i64,
    avg_duration_ms_5m: i64,
}

#[derive(Debug, FromQueryResult)]
struct RollupModelRow {
    model_id: String,
    request_count_5m: i64,
    error_count_5m: i64,
    avg_duration_ms_5m: i64,
}

#[derive(Debug, FromQueryResult)]
struct RollupProviderRow {
    provider_id: String,
    request_count_5m: i64,
    error_count_5m: i64,
    avg_duration_ms_5m: i64,
}

#[derive(Clone)]
pub struct SeaOrmStorage {
    db: DatabaseConnection,
}

impl SeaOrmStorage {
    pub async fn connect(dsn: &str) -> StorageResult<Self> {
        let db = Database::connect(dsn).await?;
        if db.get_database_backend() == DatabaseBackend::Sqlite {
            db.execute_unprepared("PRAGMA foreign_keys = ON").await?;
        }
        Ok(Self { db })
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    /// §4.F / §4.G advisory lock: held by updating `locks.updated_at`, free
    /// once a row is missing or past [`LOCK_TTL`].
    async fn try_acquire_lock(&self, key: &str) -> StorageResult<bool> {
        let now = OffsetDateTime::now_utc();
        let existing = entities::Locks::find_by_id(key.to_string())
            .one(&self.db)
            .await?;
        match existing {
            Some(row) if now - row.updated_at < LOCK_TTL => Ok(false),
            Some(row) => {
                let mut active: entities::locks::ActiveModel = row.into();
                active.updated_at = ActiveValue::Set(now);
                active.update(&self.db).await?;
                Ok(true)
            }
            None => {
                let active = entities::locks::ActiveModel {
                    key: ActiveValue::Set(key.to_string()),
                    updated_at: ActiveValue::Set(now),
                };
                match entities::Locks::insert(active).exec(&self.db).await {
                    Ok(_) => Ok(true),
                    Err(_) => Ok(false),
                }
            }
        }
    }

    async fn release_lock(&self, key: &str) -> StorageResult<()> {
        entities::Locks::delete_by_id(key.to_string())
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn max_timestamp(&self, sql: &str) -> StorageResult<Option<OffsetDateTime>> {
        let stmt = Statement::from_string(self.db.get_database_backend(), sql.to_owned());
        let row = MaxTimestampRow::find_by_statement(stmt)
            .one(&self.db)
            .await?;
        Ok(row.and_then(|r| r.m))
    }

    async fn mapping_aggregates(
        &self,
        minute: OffsetDateTime,
    ) -> StorageResult<Vec<MappingAggRow>> {
        let end = minute + Duration::minutes(1);
        // §4.G groups by `split_part(usedModel,'/',2)` — the bare catalog
        // model id `usedModel` carries after `{provider}/`, not the raw
        // `{provider}/{model}` string the handler writes — so the match
        // against a catalog `model_id` in `write_minute_bucket` can succeed.
        let model_segment = match self.db.get_database_backend() {
            DatabaseBackend::Postgres => "split_part(used_model, '/', 2)",
            DatabaseBackend::MySql => "SUBSTRING_INDEX(used_model, '/', -1)",
            DatabaseBackend::Sqlite => {
                "CASE WHEN instr(used_model, '/') > 0 \
                 THEN substr(used_model, instr(used_model, '/') + 1) \
                 ELSE used_model END"
            }
        };
        let sql = format!(
            "SELECT {model_segment} as used_model, used_provider, \
             COUNT(*) as logs_count, \
             SUM(CASE WHEN has_error THEN 1 ELSE 0 END) as errors_count, \
             SUM(CASE WHEN unified_finish_reason = 'client_error' THEN 1 ELSE 0 END) as client_errors_count, \
             SUM(CASE WHEN unified_finish_reason = 'gateway_error' THEN 1 ELSE 0 END) as gateway_errors_count, \
             SUM(CASE WHEN unified_finish_reason = 'upstream_error' THEN 1 ELSE 0 END) as upstream_errors_count, \
             SUM(CASE WHEN cached THEN 1 ELSE 0 END) as cached_count, \
             SUM(CASE WHEN cached THEN 0 ELSE COALESCE(prompt_tokens, 0) END) as prompt_tokens_sum, \
             SUM(CASE WHEN cached THEN 0 ELSE COALESCE(completion_tokens, 0) END) as completion_tokens_sum, \
             SUM(CASE WHEN cached THEN 0 ELSE COALESCE(total_tokens, 0) END) as total_tokens_sum, \
             SUM(CASE WHEN cached THEN 0 ELSE COALESCE(reasoning_tokens, 0) END) as reasoning_tokens_sum, \
             SUM(duration) as duration_sum, \
             SUM(COALESCE(time_to_first_token, 0)) as time_to_first_token_sum \
             FROM logs WHERE created_at >= '{}' AND created_at < '{}' \
             GROUP BY {model_segment}, used_provider",
            minute, end
        );
        let stmt = Statement::from_string(self.db.get_database_backend(), sql);
        Ok(MappingAggRow::find_by_statement(stmt).all(&self.db).await?)
    }

    async fn upsert_mapping_bucket(
        &self,
        model_id: &str,
        provider_id: &str,
        minute: OffsetDateTime,
        agg: Option<&MappingAggRow>,
    ) -> StorageResult<()> {
        use entities::model_provider_mapping_history::Column;

        let existing = entities::ModelProviderMappingHistory::find()
            .filter(Column::ModelId.eq(model_id))
            .filter(Column::ProviderId.eq(provider_id))
            .filter(Column::MinuteTimestamp.eq(minute))
            .one(&self.db)
            .await?;

        let (
            logs_count,
            errors_count,
            client_errors_count,
            gateway_errors_count,
            upstream_errors_count,
            cached_count,
            prompt_tokens_sum,
            completion_tokens_sum,
            total_tokens_sum,
            reasoning_tokens_sum,
            duration_sum,
            time_to_first_token_sum,
        ) = match agg {
            Some(a) => (
                a.logs_count,
                a.errors_count,
                a.client_errors_count,
                a.gateway_errors_count,
                a.upstream_errors_count,
                a.cached_count,
                a.prompt_tokens_sum,
                a.completion_tokens_sum,
                a.total_tokens_sum,
                a.reasoning_tokens_sum,
                a.duration_sum,
                a.time_to_first_token_sum,
            ),
            None => (0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0),
        };

        match existing {
            Some(row) => {
                let mut active: entities::model_provider_mapping_history::ActiveModel =
                    row.into();
                active.logs_count = ActiveValue::Set(logs_count);
                active.errors_count = ActiveValue::Set(errors_count);
                active.client_errors_count = ActiveValue::Set(client_errors_count);
                active.gateway_errors_count = ActiveValue::Set(gateway_errors_count);
                active.upstream_errors_count = ActiveValue::Set(upstream_errors_count);
                active.cached_count = ActiveValue::Set(cached_count);
                active.prompt_tokens_sum = ActiveValue::Set(prompt_tokens_sum);
                active.completion_tokens_sum = ActiveValue::Set(completion_tokens_sum);
                active.total_tokens_sum = ActiveValue::Set(total_tokens_sum);
                active.reasoning_tokens_sum = ActiveValue::Set(reasoning_tokens_sum);
                active.duration_sum = ActiveValue::Set(duration_sum);
                active.time_to_first_token_sum = ActiveValue::Set(time_to_first_token_sum);
                active.update(&self.db).await?;
            }
            None => {
                let active = entities::model_provider_mapping_history::ActiveModel {
                    id: ActiveValue::NotSet,
                    model_id: ActiveValue::Set(model_id.to_string()),
                    provider_id: ActiveValue::Set(provider_id.to_string()),
                    minute_timestamp: ActiveValue::Set(minute),
                    logs_count: ActiveValue::Set(logs_count),
                    errors_count: ActiveValue::Set(errors_count),
                    client_errors_count: ActiveValue::Set(client_errors_count),
                    gateway_errors_count: ActiveValue::Set(gateway_errors_count),
                    upstream_errors_count: ActiveValue::Set(upstream_errors_count),
                    cached_count: ActiveValue::Set(cached_count),
                    prompt_tokens_sum: ActiveValue::Set(prompt_tokens_sum),
                    completion_tokens_sum: ActiveValue::Set(completion_tokens_sum),
                    total_tokens_sum: ActiveValue::Set(total_tokens_sum),
                    reasoning_tokens_sum: ActiveValue::Set(reasoning_tokens_sum),
                    duration_sum: ActiveValue::Set(duration_sum),
                    time_to_first_token_sum: ActiveValue::Set(time_to_first_token_sum),
                };
                entities::ModelProviderMappingHistory::insert(active)
                    .exec(&self.db)
                    .await?;
            }
        }
        Ok(())
    }

    async fn upsert_model_bucket(
        &self,
        model_id: &str,
        minute: OffsetDateTime,
        agg: Option<&ModelAggRow>,
    ) -> StorageResult<()> {
        use entities::model_history::Column;

        let existing = entities::ModelHistory::find()
            .filter(Column::ModelId.eq(model_id))
            .filter(Column::MinuteTimestamp.eq(minute))
            .one(&self.db)
            .await?;

        let (
            logs_count,
            errors_count,
            client_errors_count,
            gateway_errors_count,
            upstream_errors_count,
            cached_count,
            prompt_tokens_sum,
            completion_tokens_sum,
            total_tokens_sum,
            reasoning_tokens_sum,
            duration_sum,
            time_to_first_token_sum,
        ) = match agg {
            Some(a) => (
                a.logs_count,
                a.errors_count,
                a.client_errors_count,
                a.gateway_errors_count,
                a.upstream_errors_count,
                a.cached_count,
                a.prompt_tokens_sum,
                a.completion_tokens_sum,
                a.total_tokens_sum,
                a.reasoning_tokens_sum,
                a.duration_sum,
                a.time_to_first_token_sum,
            ),
            None => (0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0),
        };

        match existing {
            Some(row) => {
                let mut active: entities::model_history::ActiveModel = row.into();
                active.logs_count = ActiveValue::Set(logs_count);
                active.errors_count = ActiveValue::Set(errors_count);
                active.client_errors_count = ActiveValue::Set(client_errors_count);
                active.gateway_errors_count = ActiveValue::Set(gateway_errors_count);
                active.upstream_errors_count = ActiveValue::Set(upstream_errors_count);
                active.cached_count = ActiveValue::Set(cached_count);
                active.prompt_tokens_sum = ActiveValue::Set(prompt_tokens_sum);
                active.completion_tokens_sum = ActiveValue::Set(completion_tokens_sum);
                active.total_tokens_sum = ActiveValue::Set(total_tokens_sum);
                active.reasoning_tokens_sum = ActiveValue::Set(reasoning_tokens_sum);
                active.duration_sum = ActiveValue::Set(duration_sum);
                active.time_to_first_token_sum = ActiveValue::Set(time_to_first_token_sum);
                active.update(&self.db).await?;
            }
            None => {
                let active = entities::model_history::ActiveModel {
                    id: ActiveValue::NotSet,
                    model_id: ActiveValue::Set(model_id.to_string()),
                    minute_timestamp: ActiveValue::Set(minute),
                    logs_count: ActiveValue::Set(logs_count),
                    errors_count: ActiveValue::Set(errors_count),
                    client_errors_count: ActiveValue::Set(client_errors_count),
                    gateway_errors_count: ActiveValue::Set(gateway_errors_count),
                    upstream_errors_count: ActiveValue::Set(upstream_errors_count),
                    cached_count: ActiveValue::Set(cached_count),
                    prompt_tokens_sum: ActiveValue::Set(prompt_tokens_sum),
                    completion_tokens_sum: ActiveValue::Set(completion_tokens_sum),
                    total_tokens_sum: ActiveValue::Set(total_tokens_sum),
                    reasoning_tokens_sum: ActiveValue::Set(reasoning_tokens_sum),
                    duration_sum: ActiveValue::Set(duration_sum),
                    time_to_first_token_sum: ActiveValue::Set(time_to_first_token_sum),
                };
                entities::ModelHistory::insert(active).exec(&self.db).await?;
            }
        }
        Ok(())
    }

    async fn upsert_catalog_stat(
        &self,
        scope: &str,
        provider_id: Option<&str>,
        model_id: Option<&str>,
        request_count_5m: i64,
        error_count_5m: i64,
        avg_duration_ms_5m: i64,
        as_of: OffsetDateTime,
    ) -> StorageResult<()> {
        use entities::catalog_stats::Column;

        let mut query = entities::CatalogStats::find().filter(Column::Scope.eq(scope));
        query = match provider_id {
            Some(p) => query.filter(Column::ProviderId.eq(p)),
            None => query.filter(Column::ProviderId.is_null()),
        };
        query = match model_id {
            Some(m) => query.filter(Column::ModelId.eq(m)),
            None => query.filter(Column::ModelId.is_null()),
        };
        let existing = query.one(&self.db).await?;

        match existing {
            Some(row) => {
                let mut active: entities::catalog_stats::ActiveModel = row.into();
                active.request_count_5m = ActiveValue::Set(request_count_5m);
                active.error_count_5m = ActiveValue::Set(error_count_5m);
                active.avg_duration_ms_5m = ActiveValue::Set(avg_duration_ms_5m);
                active.stats_updated_at = ActiveValue::Set(as_of);
                active.update(&self.db).await?;
            }
            None => {
                let active = entities::catalog_stats::ActiveModel {
                    id: ActiveValue::NotSet,
                    scope: ActiveValue::Set(scope.to_string()),
                    provider_id: ActiveValue::Set(provider_id.map(str::to_string)),
                    model_id: ActiveValue::Set(model_id.map(str::to_string)),
                    request_count_5m: ActiveValue::Set(request_count_5m),
                    error_count_5m: ActiveValue::Set(error_count_5m),
                    avg_duration_ms_5m: ActiveValue::Set(avg_duration_ms_5m),
                    stats_updated_at: ActiveValue::Set(as_of),
                };
                entities::CatalogStats::insert(active)
                    .exec(&self.db)
                    .await?;
            }
        }
        Ok(())
    }

    /// §4.F "Batch credit processing": runs under the caller-held advisory
    /// lock. Postgres gets `FOR UPDATE SKIP LOCKED` so concurrent replicas
    /// never double-charge the same row; other backends (sqlite in tests,
    /// mysql) fall back to a plain locking read inside the same transaction.
    async fn process_pending_logs_locked(&self, batch_size: u64) -> StorageResult<u64> {
        let backend = self.db.get_database_backend();
        let txn = self.db.begin().await?;

        let select_sql = match backend {
            DatabaseBackend::Postgres => format!(
                "SELECT id FROM logs WHERE processed_at IS NULL ORDER BY id ASC LIMIT {} FOR UPDATE SKIP LOCKED",
                batch_size
            ),
            _ => format!(
                "SELECT id FROM logs WHERE processed_at IS NULL ORDER BY id ASC LIMIT {}",
                batch_size
            ),
        };
        #[derive(FromQueryResult)]
        struct IdRow {
            id: i64,
        }
        let stmt = Statement::from_string(backend, select_sql);
        let ids: Vec<i64> = IdRow::find_by_statement(stmt)
            .all(&txn)
            .await?
            .into_iter()
            .map(|r| r.id)
            .collect();

        if ids.is_empty() {
            txn.commit().await?;
            return Ok(0);
        }

        let now = OffsetDateTime::now_utc();
        let mut processed = 0u64;
        for id in ids {
            let Some(log) = entities::Logs::find_by_id(id).one(&txn).await? else {
                continue;
            };
            // §4.F: "if cost>0 AND NOT cached, always accumulate into
            // apiKeyCosts[apiKeyId]; additionally, if usedMode=="credits"
            // accumulate into orgCosts[orgId]" — the two updates are not
            // mutually exclusive on `used_mode`.
            if let Some(cost) = log.cost
                && !log.cached
                && cost > Decimal::ZERO
            {
                if let Some(api_key) = entities::ApiKeys::find_by_id(log.api_key_id).one(&txn).await? {
                    let new_usage = api_key.usage + cost;
                    let mut active: entities::api_keys::ActiveModel = api_key.into();
                    active.usage = ActiveValue::Set(new_usage);
                    active.updated_at = ActiveValue::Set(now);
                    active.update(&txn).await?;
                }

                if log.used_mode == "credits"
                    && let Some(org) = entities::Organizations::find_by_id(log.organization_id).one(&txn).await?
                {
                    let new_credits = org.credits - cost;
                    let mut active: entities::organizations::ActiveModel = org.into();
                    active.credits = ActiveValue::Set(new_credits);
                    active.updated_at = ActiveValue::Set(now);
                    active.update(&txn).await?;
                }
            }

            let mut active: entities::logs::ActiveModel = log.into();
            active.processed_at = ActiveValue::Set(Some(now));
            active.update(&txn).await?;
            processed += 1;
        }

        txn.commit().await?;
        Ok(processed)
    }
}

#[async_trait::async_trait]
impl CredentialStore for SeaOrmStorage {
    async fn get(
        &self,
        organization_id: i64,
        provider_id: &str,
    ) -> StorageResult<Option<String>> {
        use entities::provider_keys::Column;
        let row = entities::ProviderKeys::find()
            .filter(Column::OrganizationId.eq(organization_id))
            .filter(Column::ProviderId.eq(provider_id))
            .filter(Column::Enabled.eq(true))
            .one(&self.db)
            .await?;
        Ok(row.map(|m| m.token))
    }
}

#[async_trait::async_trait]
impl Storage for SeaOrmStorage {
    async fn sync(&self) -> StorageResult<()> {
        Schema::new(self.db.get_database_backend())
            .builder()
            .register(entities::GlobalConfig)
            .register(entities::Organizations)
            .register(entities::Projects)
            .register(entities::ApiKeys)
            .register(entities::IamRules)
            .register(entities::ProviderKeys)
            .register(entities::Logs)
            .register(entities::Locks)
            .register(entities::ModelHistory)
            .register(entities::ModelProviderMappingHistory)
            .register(entities::CatalogStats)
            .register(entities::Transactions)
            .sync(&self.db)
            .await?;
        Ok(())
    }

    async fn try_acquire_lock(&self, key: &str) -> StorageResult<bool> {
        SeaOrmStorage::try_acquire_lock(self, key).await
    }

    async fn release_lock(&self, key: &str) -> StorageResult<()> {
        SeaOrmStorage::release_lock(self, key).await
    }

    async fn load_global_config(&self) -> StorageResult<Option<GlobalConfigRow>> {
        use entities::global_config::Column;
        let row = entities::GlobalConfig::find()
            .order_by_asc(Column::Id)
            .one(&self.db)
            .await?;
        Ok(match row {
            Some(m) => Some(GlobalConfigRow {
                id: m.id,
                config: serde_json::from_value(m.config_json)?,
                updated_at: m.updated_at,
            }),
            None => None,
        })
    }

    async fn upsert_global_config(&self, config: &GlobalConfig) -> StorageResult<()> {
        use entities::global_config::ActiveModel as GlobalActive;

        let now = OffsetDateTime::now_utc();
        let id = 1_i64;
        let config_json = serde_json::to_value(config)?;
        let existing = entities::GlobalConfig::find_by_id(id).one(&self.db).await?;

        match existing {
            Some(model) => {
                let mut active: GlobalActive = model.into();
                active.config_json = ActiveValue::Set(config_json);
                active.updated_at = ActiveValue::Set(now);
                active.update(&self.db).await?;
            }
            None => {
                let active = GlobalActive {
                    id: ActiveValue::Set(id),
                    config_json: ActiveValue::Set(config_json),
                    updated_at: ActiveValue::Set(now),
                };
                entities::GlobalConfig::insert(active)
                    .exec(&self.db)
                    .await?;
            }
        }
        Ok(())
    }

    async fn resolve_api_key(&self, token: &str) -> StorageResult<Option<ResolvedApiKey>> {
        use entities::api_keys::Column as ApiKeyColumn;
        use entities::iam_rules::Column as IamRuleColumn;

        let Some(api_key) = entities::ApiKeys::find()
            .filter(ApiKeyColumn::Token.eq(token))
            .one(&self.db)
            .await?
        else {
            return Ok(None);
        };

        let Some(project) = entities::Projects::find_by_id(api_key.project_id)
            .one(&self.db)
            .await?
        else {
            return Ok(None);
        };

        let Some(organization) = entities::Organizations::find_by_id(project.organization_id)
            .one(&self.db)
            .await?
        else {
            return Ok(None);
        };

        let iam_rules = entities::IamRules::find()
            .filter(IamRuleColumn::ApiKeyId.eq(api_key.id))
            .filter(IamRuleColumn::Status.eq("active"))
            .all(&self.db)
            .await?
            .into_iter()
            .map(|m| IamRuleRow {
                id: m.id,
                rule_type: m.rule_type,
                rule_value: m.rule_value,
                status: m.status,
            })
            .collect();

        Ok(Some(ResolvedApiKey {
            api_key: ApiKeyRow {
                id: api_key.id,
                project_id: api_key.project_id,
                masked_token: api_key.masked_token,
                status: api_key.status,
                usage: api_key.usage,
                usage_limit: api_key.usage_limit,
            },
            project: ProjectRow {
                id: project.id,
                organization_id: project.organization_id,
                mode: project.mode,
            },
            organization: OrganizationRow {
                id: organization.id,
                credits: organization.credits,
                plan: organization.plan,
                retention_level: organization.retention_level,
                status: organization.status,
                auto_topup_enabled: organization.auto_topup_enabled,
                auto_topup_threshold: organization.auto_topup_threshold,
            },
            iam_rules,
        }))
    }

    async fn insert_logs_batch(&self, logs: Vec<NewLogRecord>) -> StorageResult<()> {
        if logs.is_empty() {
            return Ok(());
        }
        let models: Vec<entities::logs::ActiveModel> = logs
            .into_iter()
            .map(|log| entities::logs::ActiveModel {
                id: ActiveValue::NotSet,
                request_id: ActiveValue::Set(log.request_id),
                organization_id: ActiveValue::Set(log.organization_id),
                project_id: ActiveValue::Set(log.project_id),
                api_key_id: ActiveValue::Set(log.api_key_id),
                created_at: ActiveValue::Set(log.created_at),
                duration: ActiveValue::Set(log.duration_ms),
                requested_model: ActiveValue::Set(log.requested_model),
                requested_provider: ActiveValue::Set(log.requested_provider),
                used_model: ActiveValue::Set(log.used_model),
                used_provider: ActiveValue::Set(log.used_provider),
                mode: ActiveValue::Set(log.mode),
                used_mode: ActiveValue::Set(log.used_mode),
                cached: ActiveValue::Set(log.cached),
                cost: ActiveValue::Set(log.cost),
                input_cost: ActiveValue::Set(log.input_cost),
                output_cost: ActiveValue::Set(log.output_cost),
                request_cost: ActiveValue::Set(log.request_cost),
                prompt_tokens: ActiveValue::Set(log.prompt_tokens),
                completion_tokens: ActiveValue::Set(log.completion_tokens),
                total_tokens: ActiveValue::Set(log.total_tokens),
                reasoning_tokens: ActiveValue::Set(log.reasoning_tokens),
                cached_tokens: ActiveValue::Set(log.cached_tokens),
                has_error: ActiveValue::Set(log.has_error),
                unified_finish_reason: ActiveValue::Set(log.unified_finish_reason),
                response_size: ActiveValue::Set(log.response_size),
                time_to_first_token: ActiveValue::Set(log.time_to_first_token),
                time_to_first_reasoning_token: ActiveValue::Set(log.time_to_first_reasoning_token),
                messages: ActiveValue::Set(log.messages),
                content: ActiveValue::Set(log.content),
                custom_headers: ActiveValue::Set(log.custom_headers),
                error_details: ActiveValue::Set(log.error_details),
                processed_at: ActiveValue::Set(None),
            })
            .collect();

        entities::Logs::insert_many(models).exec(&self.db).await?;
        Ok(())
    }

    async fn process_pending_logs(&self, batch_size: u64) -> StorageResult<CreditBatchOutcome> {
        if !self.try_acquire_lock(CREDIT_LOCK_KEY).await? {
            return Ok(CreditBatchOutcome {
                processed_logs: None,
            });
        }
        let result = self.process_pending_logs_locked(batch_size).await;
        self.release_lock(CREDIT_LOCK_KEY).await?;
        Ok(CreditBatchOutcome {
            processed_logs: Some(result?),
        })
    }

    async fn minute_history_high_watermark(&self) -> StorageResult<Option<OffsetDateTime>> {
        let a = self
            .max_timestamp("SELECT MAX(minute_timestamp) as m FROM model_history")
            .await?;
        let b = self
            .max_timestamp("SELECT MAX(minute_timestamp) as m FROM model_provider_mapping_history")
            .await?;
        Ok(match (a, b) {
            (Some(x), Some(y)) => Some(x.max(y)),
            (Some(x), None) | (None, Some(x)) => Some(x),
            (None, None) => None,
        })
    }

    async fn write_minute_bucket(
        &self,
        minute: OffsetDateTime,
        mappings: &[(String, String)],
        models: &[String],
    ) -> StorageResult<()> {
        let mapping_aggs = self.mapping_aggregates(minute).await?;

        for (model_id, provider_id) in mappings {
            let agg = mapping_aggs
                .iter()
                .find(|r| &r.used_model == model_id && &r.used_provider == provider_id);
            self.upsert_mapping_bucket(model_id, provider_id, minute, agg)
                .await?;
        }

        for model_id in models {
            let model_agg = mapping_aggs
                .iter()
                .filter(|r| &r.used_model == model_id)
                .fold(None::<ModelAggRow>, |acc, r| match acc {
                    None => Some(ModelAggRow {
                        used_model: r.used_model.clone(),
                        logs_count: r.logs_count,
                        errors_count: r.errors_count,
                        client_errors_count: r.client_errors_count,
                        gateway_errors_count: r.gateway_errors_count,
                        upstream_errors_count: r.upstream_errors_count,
                        cached_count: r.cached_count,
                        prompt_tokens_sum: r.prompt_tokens_sum,
                        completion_tokens_sum: r.completion_tokens_sum,
                        total_tokens_sum: r.total_tokens_sum,
                        reasoning_tokens_sum: r.reasoning_tokens_sum,
                        duration_sum: r.duration_sum,
                        time_to_first_token_sum: r.time_to_first_token_sum,
                    }),
                    Some(mut m) => {
                        m.logs_count += r.logs_count;
                        m.errors_count += r.errors_count;
                        m.client_errors_count += r.client_errors_count;
                        m.gateway_errors_count += r.gateway_errors_count;
                        m.upstream_errors_count += r.upstream_errors_count;
                        m.cached_count += r.cached_count;
                        m.prompt_tokens_sum += r.prompt_tokens_sum;
                        m.completion_tokens_sum += r.completion_tokens_sum;
                        m.total_tokens_sum += r.total_tokens_sum;
                        m.reasoning_tokens_sum += r.reasoning_tokens_sum;
                        m.duration_sum += r.duration_sum;
                        m.time_to_first_token_sum += r.time_to_first_token_sum;
                        Some(m)
                    }
                });
            self.upsert_model_bucket(model_id, minute, model_agg.as_ref())
                .await?;
        }

        Ok(())
    }

    async fn rollup_five_minutes(&self, as_of: OffsetDateTime) -> StorageResult<()> {
        let start = as_of - Duration::minutes(5);
        let backend = self.db.get_database_backend();

        let mapping_sql = format!(
            "SELECT model_id, provider_id, \
             SUM(logs_count) as request_count_5m, \
             SUM(errors_count) as error_count_5m, \
             CASE WHEN SUM(logs_count) = 0 THEN 0 ELSE SUM(duration_sum) / SUM(logs_count) END as avg_duration_ms_5m \
             FROM model_provider_mapping_history \
             WHERE minute_timestamp > '{}' AND minute_timestamp <= '{}' \
             GROUP BY model_id, provider_id",
            start, as_of
        );
        let mapping_rows = RollupMappingRow::find_by_statement(Statement::from_string(
            backend,
            mapping_sql,
        ))
        .all(&self.db)
        .await?;
        for row in &mapping_rows {
            self.upsert_catalog_stat(
                "mapping",
                Some(&row.provider_id),
                Some(&row.model_id),
                row.request_count_5m,
                row.error_count_5m,
                row.avg_duration_ms_5m,
                as_of,
            )
            .await?;
        }

        let model_sql = format!(
            "SELECT model_id, \
             SUM(logs_count) as request_count_5m, \
             SUM(errors_count) as error_count_5m, \
             CASE WHEN SUM(logs_count) = 0 THEN 0 ELSE SUM(duration_sum) / SUM(logs_count) END as avg_duration_ms_5m \
             FROM model_history \
             WHERE minute_timestamp > '{}' AND minute_timestamp <= '{}' \
             GROUP BY model_id",
            start, as_of
        );
        let model_rows =
            RollupModelRow::find_by_statement(Statement::from_string(backend, model_sql))
                .all(&self.db)
                .await?;
        for row in &model_rows {
            self.upsert_catalog_stat(
                "model",
                None,
                Some(&row.model_id),
                row.request_count_5m,
                row.error_count_5m,
                row.avg_duration_ms_5m,
                as_of,
            )
            .await?;
        }

        let provider_sql = format!(
            "SELECT provider_id, \
             SUM(logs_count) as request_count_5m, \
             SUM(errors_count) as error_count_5m, \
             CASE WHEN SUM(logs_count) = 0 THEN 0 ELSE SUM(duration_sum) / SUM(logs_count) END as avg_duration_ms_5m \
             FROM model_provider_mapping_history \
             WHERE minute_timestamp > '{}' AND minute_timestamp <= '{}' \
             GROUP BY provider_id",
            start, as_of
        );
        let provider_rows =
            RollupProviderRow::find_by_statement(Statement::from_string(backend, provider_sql))
                .all(&self.db)
                .await?;
        for row in &provider_rows {
            self.upsert_catalog_stat(
                "provider",
                Some(&row.provider_id),
                None,
                row.request_count_5m,
                row.error_count_5m,
                row.avg_duration_ms_5m,
                as_of,
            )
            .await?;
        }

        Ok(())
    }

    async fn organizations_needing_topup(&self) -> StorageResult<Vec<OrgTopupCandidate>> {
        use entities::organizations::Column;
        let rows = entities::Organizations::find()
            .filter(Column::AutoTopupEnabled.eq(true))
            .filter(Column::AutoTopupThreshold.is_not_null())
            .all(&self.db)
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|m| {
                let threshold = m.auto_topup_threshold?;
                if m.credits < threshold {
                    Some(OrgTopupCandidate {
                        organization_id: m.id,
                        credits: m.credits,
                        threshold,
                    })
                } else {
                    None
                }
            })
            .collect())
    }

    async fn has_recent_transaction(
        &self,
        organization_id: i64,
        since: OffsetDateTime,
    ) -> StorageResult<bool> {
        use entities::transactions::Column;
        let row = entities::Transactions::find()
            .filter(Column::OrganizationId.eq(organization_id))
            .filter(Column::CreatedAt.gte(since))
            .one(&self.db)
            .await?;
        Ok(row.is_some())
    }

    async fn create_pending_transaction(
        &self,
        organization_id: i64,
        amount: Decimal,
    ) -> StorageResult<i64> {
        let now = OffsetDateTime::now_utc();
        let active = entities::transactions::ActiveModel {
            id: ActiveValue::NotSet,
            organization_id: ActiveValue::Set(organization_id),
            amount: ActiveValue::Set(amount),
            status: ActiveValue::Set("pending".to_string()),
            kind: ActiveValue::Set("auto_topup".to_string()),
            provider_reference: ActiveValue::Set(None),
            created_at: ActiveValue::Set(now),
            updated_at: ActiveValue::Set(now),
        };
        let res = entities::Transactions::insert(active).exec(&self.db).await?;
        Ok(res.last_insert_id)
    }

    async fn update_transaction_status(
        &self,
        transaction_id: i64,
        status: &str,
        provider_reference: Option<&str>,
    ) -> StorageResult<()> {
        let Some(row) = entities::Transactions::find_by_id(transaction_id)
            .one(&self.db)
            .await?
        else {
            return Ok(());
        };
        let mut active: entities::transactions::ActiveModel = row.into();
        active.status = ActiveValue::Set(status.to_string());
        if let Some(reference) = provider_reference {
            active.provider_reference = ActiveValue::Set(Some(reference.to_string()));
        }
        active.updated_at = ActiveValue::Set(OffsetDateTime::now_utc());
        active.update(&self.db).await?;
        Ok(())
    }

    async fn query_logs(&self, filter: LogQueryFilter) -> StorageResult<LogQueryResult> {
        use entities::logs::Column;

        let mut query = entities::Logs::find();
        if let Some(project_id) = filter.project_id {
            query = query.filter(Column::ProjectId.eq(project_id));
        }
        if let Some(from) = filter.from {
            query = query.filter(Column::CreatedAt.gte(from));
        }
        if let Some(to) = filter.to {
            query = query.filter(Column::CreatedAt.lt(to));
        }
        if let Some(reason) = &filter.unified_finish_reason {
            query = query.filter(Column::UnifiedFinishReason.eq(reason.as_str()));
        }
        if let Some(provider) = &filter.provider {
            query = query.filter(Column::UsedProvider.eq(provider.as_str()));
        }
        if let Some(model) = &filter.model {
            query = query.filter(Column::UsedModel.eq(model.as_str()));
        }
        if let (Some(key), Some(value)) = (&filter.custom_header_key, &filter.custom_header_value) {
            use sea_orm::sea_query::Expr;
            let backend = self.db.get_database_backend();
            let cond = match backend {
                DatabaseBackend::Postgres => {
                    Expr::cust_with_values("custom_headers ->> $1 = $2", [key.clone(), value.clone()])
                }
                DatabaseBackend::MySql => Expr::cust_with_values(
                    "JSON_UNQUOTE(JSON_EXTRACT(custom_headers, CONCAT('$.', ?))) = ?",
                    [key.clone(), value.clone()],
                ),
                DatabaseBackend::Sqlite => Expr::cust_with_values(
                    "json_extract(custom_headers, '$.' || ?) = ?",
                    [key.clone(), value.clone()],
                ),
            };
            query = query.filter(cond);
        }
        if let Some(cursor) = filter.cursor {
            query = query.filter(Column::Id.lt(cursor));
        }

        let rows = query
            .order_by_desc(Column::Id)
            .limit(filter.limit + 1)
            .all(&self.db)
            .await?;

        let has_more = rows.len() as u64 > filter.limit;
        let mut rows: Vec<_> = rows.into_iter().take(filter.limit as usize).collect();
        let next_cursor = if has_more {
            rows.last().map(|m| m.id)
        } else {
            None
        };

        let summaries = rows
            .drain(..)
            .map(|m| LogSummaryRow {
                id: m.id,
                created_at: m.created_at,
                requested_model: m.requested_model,
                used_model: m.used_model,
                used_provider: m.used_provider,
                unified_finish_reason: m.unified_finish_reason,
                cost: m.cost,
                total_tokens: m.total_tokens,
                has_error: m.has_error,
            })
            .collect();

        Ok(LogQueryResult {
            rows: summaries,
            next_cursor,
            has_more,
        })
    }

    async fn activity_daily(
        &self,
        project_id: i64,
        days: u32,
    ) -> StorageResult<Vec<ActivityBucket>> {
        use entities::logs::Column;

        let now = OffsetDateTime::now_utc();
        let since = now - Duration::days(i64::from(days));
        let rows = entities::Logs::find()
            .filter(Column::ProjectId.eq(project_id))
            .filter(Column::CreatedAt.gte(since))
            .all(&self.db)
            .await?;

        let mut buckets: std::collections::BTreeMap<time::Date, ActivityBucket> =
            std::collections::BTreeMap::new();
        for row in rows {
            let day = row.created_at.date();
            let entry = buckets.entry(day).or_insert_with(|| ActivityBucket {
                day: day.midnight().assume_utc(),
                requests: 0,
                errors: 0,
                total_tokens: 0,
                cost: Decimal::ZERO,
            });
            entry.requests += 1;
            if row.has_error {
                entry.errors += 1;
            }
            entry.total_tokens += row.total_tokens.unwrap_or(0);
            entry.cost += row.cost.unwrap_or(Decimal::ZERO);
        }

        Ok(buckets.into_values().collect())
    }

    async fn create_api_key(
        &self,
        project_id: i64,
        token: &str,
        masked_token: &str,
        usage_limit: Option<Decimal>,
    ) -> StorageResult<ApiKeyRow> {
        let now = OffsetDateTime::now_utc();
        let active = entities::api_keys::ActiveModel {
            id: ActiveValue::NotSet,
            project_id: ActiveValue::Set(project_id),
            token: ActiveValue::Set(token.to_string()),
            masked_token: ActiveValue::Set(masked_token.to_string()),
            status: ActiveValue::Set("active".to_string()),
            usage: ActiveValue::Set(Decimal::ZERO),
            usage_limit: ActiveValue::Set(usage_limit),
            created_at: ActiveValue::Set(now),
            updated_at: ActiveValue::Set(now),
        };
        let model = active.insert(&self.db).await?;
        Ok(ApiKeyRow {
            id: model.id,
            project_id: model.project_id,
            masked_token: model.masked_token,
            status: model.status,
            usage: model.usage,
            usage_limit: model.usage_limit,
        })
    }

    async fn list_api_keys(&self, project_id: i64) -> StorageResult<Vec<ApiKeyRow>> {
        use entities::api_keys::Column;
        let rows = entities::ApiKeys::find()
            .filter(Column::ProjectId.eq(project_id))
            .all(&self.db)
            .await?
            .into_iter()
            .map(|m| ApiKeyRow {
                id: m.id,
                project_id: m.project_id,
                masked_token: m.masked_token,
                status: m.status,
                usage: m.usage,
                usage_limit: m.usage_limit,
            })
            .collect();
        Ok(rows)
    }

    async fn update_api_key_status(
        &self,
        id: i64,
        status: &str,
    ) -> StorageResult<Option<ApiKeyRow>> {
        let Some(model) = entities::ApiKeys::find_by_id(id).one(&self.db).await? else {
            return Ok(None);
        };
        let mut active: entities::api_keys::ActiveModel = model.into();
        active.status = ActiveValue::Set(status.to_string());
        active.updated_at = ActiveValue::Set(OffsetDateTime::now_utc());
        let model = active.update(&self.db).await?;
        Ok(Some(ApiKeyRow {
            id: model.id,
            project_id: model.project_id,
            masked_token: model.masked_token,
            status: model.status,
            usage: model.usage,
            usage_limit: model.usage_limit,
        }))
    }

    async fn delete_api_key(&self, id: i64) -> StorageResult<bool> {
        Ok(self.update_api_key_status(id, "deleted").await?.is_some())
    }

    async fn set_api_key_limit(
        &self,
        id: i64,
        usage_limit: Option<Decimal>,
    ) -> StorageResult<Option<ApiKeyRow>> {
        let Some(model) = entities::ApiKeys::find_by_id(id).one(&self.db).await? else {
            return Ok(None);
        };
        let mut active: entities::api_keys::ActiveModel = model.into();
        active.usage_limit = ActiveValue::Set(usage_limit);
        active.updated_at = ActiveValue::Set(OffsetDateTime::now_utc());
        let model = active.update(&self.db).await?;
        Ok(Some(ApiKeyRow {
            id: model.id,
            project_id: model.project_id,
            masked_token: model.masked_token,
            status: model.status,
            usage: model.usage,
            usage_limit: model.usage_limit,
        }))
    }

    async fn create_iam_rule(
        &self,
        api_key_id: i64,
        rule_type: &str,
        rule_value: serde_json::Value,
    ) -> StorageResult<IamRuleRow> {
        let active = entities::iam_rules::ActiveModel {
            id: ActiveValue::NotSet,
            api_key_id: ActiveValue::Set(api_key_id),
            rule_type: ActiveValue::Set(rule_type.to_string()),
            rule_value: ActiveValue::Set(rule_value),
            status: ActiveValue::Set("active".to_string()),
            created_at: ActiveValue::Set(OffsetDateTime::now_utc()),
        };
        let model = active.insert(&self.db).await?;
        Ok(IamRuleRow {
            id: model.id,
            rule_type: model.rule_type,
            rule_value: model.rule_value,
            status: model.status,
        })
    }

    async fn list_iam_rules(&self, api_key_id: i64) -> StorageResult<Vec<IamRuleRow>> {
        use entities::iam_rules::Column;
        let rows = entities::IamRules::find()
            .filter(Column::ApiKeyId.eq(api_key_id))
            .all(&self.db)
            .await?
            .into_iter()
            .map(|m| IamRuleRow {
                id: m.id,
                rule_type: m.rule_type,
                rule_value: m.rule_value,
                status: m.status,
            })
            .collect();
        Ok(rows)
    }

    async fn update_iam_rule(
        &self,
        id: i64,
        status: Option<&str>,
        rule_value: Option<serde_json::Value>,
    ) -> StorageResult<Option<IamRuleRow>> {
        let Some(model) = entities::IamRules::find_by_id(id).one(&self.db).await? else {
            return Ok(None);
        };
        let mut active: entities::iam_rules::ActiveModel = model.into();
        if let Some(status) = status {
            active.status = ActiveValue::Set(status.to_string());
        }
        if let Some(rule_value) = rule_value {
            active.rule_value = ActiveValue::Set(rule_value);
        }
        let model = active.update(&self.db).await?;
        Ok(Some(IamRuleRow {
            id: model.id,
            rule_type: model.rule_type,
            rule_value: model.rule_value,
            status: model.status,
        }))
    }

    async fn delete_iam_rule(&self, id: i64) -> StorageResult<bool> {
        let res = entities::IamRules::delete_by_id(id).exec(&self.db).await?;
        Ok(res.rows_affected > 0)
    }
}
