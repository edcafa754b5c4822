use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum GlobalConfigError {
    #[error("missing required global config field: {0}")]
    MissingField(&'static str),
}

/// Final, merged global configuration used by the running process.
///
/// Merge order: CLI > ENV > DB-persisted defaults, then written back to DB.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalConfig {
    pub host: String,
    pub port: u16,
    /// Database DSN used for this process.
    pub dsn: String,
    /// Redis-compatible KV store DSN (rate limiting, log queue).
    pub redis_url: String,
    /// Size of one usage-worker credit-processing batch.
    pub credit_batch_size: u64,
    /// Interval (seconds) between credit-processing batches.
    pub credit_batch_interval_secs: u64,
    /// Stats backfill window on startup when no history exists.
    pub backfill_duration_secs: u64,
    /// Health-check upstream timeout.
    pub health_timeout_ms: u64,
    pub node_env: NodeEnv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeEnv {
    Development,
    Production,
}

impl NodeEnv {
    pub fn is_production(self) -> bool {
        matches!(self, NodeEnv::Production)
    }
}

/// Optional layer used for merging global config from CLI/ENV/DB sources.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlobalConfigPatch {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub dsn: Option<String>,
    pub redis_url: Option<String>,
    pub credit_batch_size: Option<u64>,
    pub credit_batch_interval_secs: Option<u64>,
    pub backfill_duration_secs: Option<u64>,
    pub health_timeout_ms: Option<u64>,
    pub node_env: Option<NodeEnv>,
}

impl GlobalConfigPatch {
    pub fn overlay(&mut self, other: GlobalConfigPatch) {
        if other.host.is_some() {
            self.host = other.host;
        }
        if other.port.is_some() {
            self.port = other.port;
        }
        if other.dsn.is_some() {
            self.dsn = other.dsn;
        }
        if other.redis_url.is_some() {
            self.redis_url = other.redis_url;
        }
        if other.credit_batch_size.is_some() {
            self.credit_batch_size = other.credit_batch_size;
        }
        if other.credit_batch_interval_secs.is_some() {
            self.credit_batch_interval_secs = other.credit_batch_interval_secs;
        }
        if other.backfill_duration_secs.is_some() {
            self.backfill_duration_secs = other.backfill_duration_secs;
        }
        if other.health_timeout_ms.is_some() {
            self.health_timeout_ms = other.health_timeout_ms;
        }
        if other.node_env.is_some() {
            self.node_env = other.node_env;
        }
    }

    pub fn into_config(self) -> Result<GlobalConfig, GlobalConfigError> {
        Ok(GlobalConfig {
            host: self.host.unwrap_or_else(|| "0.0.0.0".to_string()),
            port: self.port.unwrap_or(4002),
            dsn: self.dsn.ok_or(GlobalConfigError::MissingField("dsn"))?,
            redis_url: self
                .redis_url
                .unwrap_or_else(|| "redis://127.0.0.1:6379".to_string()),
            credit_batch_size: self.credit_batch_size.unwrap_or(200),
            credit_batch_interval_secs: self.credit_batch_interval_secs.unwrap_or(5),
            backfill_duration_secs: self.backfill_duration_secs.unwrap_or(300),
            health_timeout_ms: self.health_timeout_ms.unwrap_or(5000),
            node_env: self.node_env.unwrap_or(NodeEnv::Development),
        })
    }
}

impl From<GlobalConfig> for GlobalConfigPatch {
    fn from(value: GlobalConfig) -> Self {
        Self {
            host: Some(value.host),
            port: Some(value.port),
            dsn: Some(value.dsn),
            redis_url: Some(value.redis_url),
            credit_batch_size: Some(value.credit_batch_size),
            credit_batch_interval_secs: Some(value.credit_batch_interval_secs),
            backfill_duration_secs: Some(value.backfill_duration_secs),
            health_timeout_ms: Some(value.health_timeout_ms),
            node_env: Some(value.node_env),
        }
    }
}
