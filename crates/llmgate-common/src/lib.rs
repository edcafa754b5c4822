pub mod config;
pub mod error;
pub mod money;

pub use config::{GlobalConfig, GlobalConfigError, GlobalConfigPatch, NodeEnv};
pub use error::{ErrorKind, ErrorEnvelope, GatewayError};
pub use money::{Money, average_discounted_price};
