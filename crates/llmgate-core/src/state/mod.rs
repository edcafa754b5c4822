//! §9 "Global mutable state": the KV client and DB pool are process-wide
//! singletons handed to every request task. `AppState` is that bag of
//! singletons, built once in `bootstrap` and cloned (cheaply, via `Arc`)
//! into every axum handler.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::Duration;

use llmgate_catalog::ProviderRegistry;
use llmgate_common::GlobalConfig;
use llmgate_ratelimit::{FreeModelLimiter, KvStore, LogQueue};
use llmgate_storage::{CredentialStore, Storage};

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub credentials: Arc<dyn CredentialStore>,
    pub registry: Arc<ProviderRegistry>,
    /// Merged CLI > ENV > DB-persisted config (§2 Configuration, §6). Not
    /// hot-reloaded: the out-of-scope admin surface that used to mutate this
    /// at runtime doesn't exist here, so a plain value is enough.
    pub config: Arc<GlobalConfig>,
    pub kv: Arc<dyn KvStore>,
    pub log_queue: Arc<LogQueue>,
    pub free_model_limiter: Arc<FreeModelLimiter>,
    /// Gateway-operated provider API keys, used as a last resort in
    /// `credits` mode (§4.C step 4, `llmgate_router::Router`).
    pub gateway_credentials: Arc<HashMap<String, String>>,
    pub http_client: reqwest::Client,
    /// Count of `LOG_QUEUE` push failures (§4.E step 7: "on failure the log
    /// is dropped and an error counter is incremented").
    pub dropped_logs: Arc<AtomicU64>,
    pub health_timeout: Duration,
}
