//! §9 "Global mutable state": the KV client and DB pool are process-wide
//! singletons. `bootstrap` is the one place that connects both, merges
//! config (CLI > ENV > DB-persisted, §2 Configuration), seeds the static
//! catalog, and hands back an [`AppState`] plus the two background tasks
//! (`UsageWorker`, `StatsCalculator`) for the binary to spawn.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use llmgate_catalog::ProviderRegistry;
use llmgate_common::{GlobalConfig, GlobalConfigPatch, NodeEnv};
use llmgate_ratelimit::{FreeModelLimiter, InMemoryKvStore, KvStore, LogQueue, RedisKvStore};
use llmgate_storage::{CredentialStore, SeaOrmStorage, Storage};
use llmgate_usage::{NoopPaymentProvider, PaymentProvider, StatsCalculator, UsageWorker, UsageWorkerConfig};

use crate::state::AppState;

/// CLI args mirroring the environment variables in spec §6. `clap`'s `env`
/// feature gives every field CLI > ENV precedence for free; `bootstrap`
/// layers the DB-persisted config underneath via [`GlobalConfigPatch`].
#[derive(Debug, Clone, Parser)]
#[command(name = "llmgate", version, about = "OpenAI-compatible LLM gateway")]
pub struct CliArgs {
    #[arg(long, env = "HOST")]
    pub host: Option<String>,

    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Relational store DSN (sqlite/postgres/mysql, entity-first schema sync).
    #[arg(long, env = "DATABASE_URL")]
    pub dsn: Option<String>,

    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    #[arg(long, env = "REDIS_HOST")]
    pub redis_host: Option<String>,

    #[arg(long, env = "REDIS_PORT")]
    pub redis_port: Option<u16>,

    #[arg(long, env = "REDIS_PASSWORD")]
    pub redis_password: Option<String>,

    #[arg(long, env = "CREDIT_BATCH_SIZE")]
    pub credit_batch_size: Option<u64>,

    #[arg(long, env = "CREDIT_BATCH_INTERVAL")]
    pub credit_batch_interval: Option<u64>,

    #[arg(long, env = "BACKFILL_DURATION_SECONDS")]
    pub backfill_duration_seconds: Option<u64>,

    #[arg(long, env = "TIMEOUT_MS")]
    pub health_timeout_ms: Option<u64>,

    #[arg(long, env = "NODE_ENV")]
    pub node_env: Option<String>,
}

pub struct Bootstrap {
    pub storage: Arc<SeaOrmStorage>,
    pub state: Arc<AppState>,
    pub usage_worker: Arc<UsageWorker>,
    pub stats_calculator: Arc<StatsCalculator>,
}

pub async fn bootstrap_from_env() -> anyhow::Result<Bootstrap> {
    bootstrap(CliArgs::parse()).await
}

pub async fn bootstrap(args: CliArgs) -> anyhow::Result<Bootstrap> {
    let dsn = args.dsn.clone().unwrap_or_else(|| "sqlite://llmgate.db?mode=rwc".to_string());

    let storage = Arc::new(SeaOrmStorage::connect(&dsn).await.context("connect storage")?);
    storage.sync().await.context("schema sync")?;

    // CLI/ENV > DB-persisted defaults, then written back (§2 Configuration).
    let db_global = storage.load_global_config().await.context("load global config")?;
    let mut merged = db_global
        .map(|row| GlobalConfigPatch::from(row.config))
        .unwrap_or_default();
    merged.overlay(cli_patch(&args, &dsn)?);
    let global: GlobalConfig = merged.into_config().context("finalize merged global config")?;
    storage.upsert_global_config(&global).await.context("persist global config")?;

    let registry = Arc::new(ProviderRegistry::new());

    let kv: Arc<dyn KvStore> = match RedisKvStore::connect(&global.redis_url).await {
        Ok(store) => Arc::new(store),
        Err(err) => {
            tracing::warn!(error = %err, "redis unreachable at startup, falling back to in-process rate limiting");
            Arc::new(InMemoryKvStore::new())
        }
    };
    let log_queue = Arc::new(LogQueue::new(kv.clone()));
    let free_model_limiter = Arc::new(FreeModelLimiter::new(kv.clone()));

    let gateway_credentials = Arc::new(load_gateway_credentials(&registry));

    let state = Arc::new(AppState {
        storage: storage.clone() as Arc<dyn Storage>,
        credentials: storage.clone() as Arc<dyn CredentialStore>,
        registry: registry.clone(),
        config: Arc::new(global.clone()),
        kv,
        log_queue: log_queue.clone(),
        free_model_limiter,
        gateway_credentials,
        http_client: reqwest::Client::builder()
            .build()
            .context("build upstream http client")?,
        dropped_logs: Arc::new(AtomicU64::new(0)),
        health_timeout: Duration::from_millis(global.health_timeout_ms),
    });

    let payments: Arc<dyn PaymentProvider> = Arc::new(NoopPaymentProvider);
    let usage_worker = Arc::new(UsageWorker::new(
        storage.clone() as Arc<dyn Storage>,
        log_queue,
        payments,
        UsageWorkerConfig {
            batch_size: global.credit_batch_size,
            batch_processing_interval: Duration::from_secs(global.credit_batch_interval_secs),
            ..UsageWorkerConfig::default()
        },
    ));
    let stats_calculator = Arc::new(StatsCalculator::new(
        storage.clone() as Arc<dyn Storage>,
        registry,
        global.backfill_duration_secs,
    ));

    Ok(Bootstrap {
        storage,
        state,
        usage_worker,
        stats_calculator,
    })
}

fn cli_patch(args: &CliArgs, dsn: &str) -> anyhow::Result<GlobalConfigPatch> {
    let node_env = match args.node_env.as_deref() {
        None => None,
        Some("production") => Some(NodeEnv::Production),
        Some(_) => Some(NodeEnv::Development),
    };

    Ok(GlobalConfigPatch {
        host: args.host.clone(),
        port: args.port,
        dsn: Some(dsn.to_string()),
        redis_url: redis_url(args),
        credit_batch_size: args.credit_batch_size,
        credit_batch_interval_secs: args.credit_batch_interval,
        backfill_duration_secs: args.backfill_duration_seconds,
        health_timeout_ms: args.health_timeout_ms,
        node_env,
    })
}

/// §6 "`REDIS_URL` is the single connection string... in place of separately
/// specified `REDIS_HOST`/`REDIS_PORT`/`REDIS_PASSWORD` when present — all
/// three remain supported and are composed into a DSN if `REDIS_URL` is
/// absent".
fn redis_url(args: &CliArgs) -> Option<String> {
    if let Some(url) = args.redis_url.clone() {
        return Some(url);
    }
    let host = args.redis_host.as_deref()?;
    let port = args.redis_port.unwrap_or(6379);
    Some(RedisKvStore::dsn_from_parts(host, port, args.redis_password.as_deref()))
}

/// §6 "Provider credentials are injected via per-organization `providerKey`
/// records; the router obtains them through a `CredentialStore`
/// interface"... the *gateway's own* fallback keys (§4.C step 4 "credits
/// mode allows fallback to the gateway's own credentials") are simpler:
/// one env var per provider, `LLMGATE_PROVIDER_KEY_<PROVIDER_ID>`.
fn load_gateway_credentials(registry: &ProviderRegistry) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for provider in registry.providers() {
        let var = format!(
            "LLMGATE_PROVIDER_KEY_{}",
            provider.id.to_ascii_uppercase().replace(['-', '.'], "_")
        );
        if let Ok(token) = std::env::var(&var) {
            let token = token.trim();
            if !token.is_empty() {
                out.insert(provider.id.clone(), token.to_string());
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redis_url_prefers_explicit_url() {
        let args = CliArgs {
            host: None,
            port: None,
            dsn: None,
            redis_url: Some("redis://explicit:6380".to_string()),
            redis_host: Some("ignored".to_string()),
            redis_port: None,
            redis_password: None,
            credit_batch_size: None,
            credit_batch_interval: None,
            backfill_duration_seconds: None,
            health_timeout_ms: None,
            node_env: None,
        };
        assert_eq!(redis_url(&args).as_deref(), Some("redis://explicit:6380"));
    }

    #[test]
    fn redis_url_composes_from_host_port_password() {
        let args = CliArgs {
            host: None,
            port: None,
            dsn: None,
            redis_url: None,
            redis_host: Some("cache.internal".to_string()),
            redis_port: Some(6390),
            redis_password: Some("hunter2".to_string()),
            credit_batch_size: None,
            credit_batch_interval: None,
            backfill_duration_seconds: None,
            health_timeout_ms: None,
            node_env: None,
        };
        assert_eq!(
            redis_url(&args).as_deref(),
            Some("redis://:hunter2@cache.internal:6390")
        );
    }
}
