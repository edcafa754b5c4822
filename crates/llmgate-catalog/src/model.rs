use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCapabilities {
    pub streaming: bool,
    pub cancellation: bool,
    pub json_output: bool,
}

/// Static catalog entry for an upstream provider. Immutable after load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderCatalogEntry {
    pub id: String,
    pub display_name: String,
    pub capabilities: ProviderCapabilities,
    pub color: String,
    pub website: String,
    pub status: ProviderStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stability {
    Stable,
    Beta,
    Unstable,
    Experimental,
}

/// A `(model, provider)` pairing with pricing and capability metadata.
///
/// Prices are per-token (input/output), per-request, or per-image, in the
/// same currency as `Organization::credits` (USD).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMapping {
    pub provider_id: String,
    /// The upstream wire name for this model (may differ from the catalog id).
    pub model_name: String,
    pub input_price: Option<Decimal>,
    pub output_price: Option<Decimal>,
    pub image_input_price: Option<Decimal>,
    pub request_price: Option<Decimal>,
    pub context_size: Option<u64>,
    pub supported_parameters: Option<Vec<String>>,
    #[serde(default = "default_true")]
    pub supports_responses_api: bool,
    /// Multiplier in `(0, 1]` applied to the average price when comparing costs.
    pub discount: Option<Decimal>,
    pub stability: Option<Stability>,
}

fn default_true() -> bool {
    true
}

impl ProviderMapping {
    pub fn has_full_pricing(&self) -> bool {
        self.input_price.is_some() && self.output_price.is_some()
    }
}

/// Static catalog entry for a model, independent of which providers host it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCatalogEntry {
    pub id: String,
    pub family: String,
    #[serde(default = "default_true")]
    pub supports_system_role: bool,
    pub json_output: bool,
    pub vision: bool,
    pub free: bool,
    pub stability: Stability,
    pub deprecated_at: Option<OffsetDateTime>,
    pub providers: Vec<ProviderMapping>,
}

impl ModelCatalogEntry {
    pub fn is_deprecated(&self) -> bool {
        self.deprecated_at
            .is_some_and(|at| at <= OffsetDateTime::now_utc())
    }

    pub fn mapping_for(&self, provider_id: &str) -> Option<&ProviderMapping> {
        self.providers.iter().find(|p| p.provider_id == provider_id)
    }
}
