use std::collections::HashMap;

use llmgate_common::average_discounted_price;

use crate::endpoint::{EndpointError, Headers, endpoint_for as resolve_endpoint, headers_for as resolve_headers};
use crate::model::{ModelCatalogEntry, ProviderCatalogEntry, ProviderMapping};
use crate::seed::seed_catalog;

/// Read-only lookup surface over the static provider/model catalog (§4.A).
pub struct ProviderRegistry {
    providers: HashMap<String, ProviderCatalogEntry>,
    models: HashMap<String, ModelCatalogEntry>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        let (providers, models) = seed_catalog();
        Self::from_catalog(providers, models)
    }

    pub fn from_catalog(
        providers: Vec<ProviderCatalogEntry>,
        models: Vec<ModelCatalogEntry>,
    ) -> Self {
        Self {
            providers: providers.into_iter().map(|p| (p.id.clone(), p)).collect(),
            models: models.into_iter().map(|m| (m.id.clone(), m)).collect(),
        }
    }

    pub fn find_model(&self, id: &str) -> Option<&ModelCatalogEntry> {
        self.models.get(id)
    }

    pub fn find_provider(&self, id: &str) -> Option<&ProviderCatalogEntry> {
        self.providers.get(id)
    }

    pub fn models(&self) -> impl Iterator<Item = &ModelCatalogEntry> {
        self.models.values()
    }

    pub fn providers(&self) -> impl Iterator<Item = &ProviderCatalogEntry> {
        self.providers.values()
    }

    pub fn providers_of(&self, model_id: &str) -> &[ProviderMapping] {
        self.models
            .get(model_id)
            .map(|m| m.providers.as_slice())
            .unwrap_or(&[])
    }

    /// Cheapest (upstream wire) model name a given provider hosts, ignoring
    /// deprecated catalog entries and mappings missing either price.
    pub fn cheapest_model_for(&self, provider_id: &str) -> Option<String> {
        self.models
            .values()
            .filter(|m| !m.is_deprecated())
            .filter_map(|m| {
                m.mapping_for(provider_id)
                    .filter(|mapping| mapping.has_full_pricing())
                    .map(|mapping| (mapping, score(mapping)))
            })
            .min_by(|(_, a), (_, b)| a.cmp(b))
            .map(|(mapping, _)| mapping.model_name.clone())
    }

    /// Cheapest candidate among an already-filtered set of mappings for one model.
    pub fn cheapest_from_available<'a>(
        &self,
        candidates: &'a [ProviderMapping],
    ) -> Option<&'a ProviderMapping> {
        candidates
            .iter()
            .filter(|m| m.has_full_pricing())
            .min_by(|a, b| score(a).cmp(&score(b)))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn endpoint_for(
        &self,
        provider_id: &str,
        model_name: Option<&str>,
        token: Option<&str>,
        stream: bool,
        supports_reasoning: bool,
        has_existing_tool_calls: bool,
        supports_responses_api: bool,
    ) -> Result<String, EndpointError> {
        resolve_endpoint(
            provider_id,
            model_name,
            token,
            stream,
            supports_reasoning,
            has_existing_tool_calls,
            supports_responses_api,
        )
    }

    pub fn headers_for(&self, provider_id: &str, token: &str) -> Headers {
        resolve_headers(provider_id, token)
    }
}

/// Comparable fixed-point score: lower is cheaper. `Decimal` has no total
/// order required by `Ord` over floats, so this sorts directly on it.
fn score(mapping: &ProviderMapping) -> rust_decimal::Decimal {
    average_discounted_price(
        mapping.input_price.unwrap_or_default(),
        mapping.output_price.unwrap_or_default(),
        mapping.discount,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn mapping(provider: &str, input: rust_decimal::Decimal, output: rust_decimal::Decimal) -> ProviderMapping {
        ProviderMapping {
            provider_id: provider.to_string(),
            model_name: format!("{provider}-model"),
            input_price: Some(input),
            output_price: Some(output),
            image_input_price: None,
            request_price: None,
            context_size: None,
            supported_parameters: None,
            supports_responses_api: true,
            discount: None,
            stability: None,
        }
    }

    #[test]
    fn cheapest_from_available_picks_lowest_average_price() {
        let registry = ProviderRegistry::from_catalog(vec![], vec![]);
        let candidates = vec![
            mapping("expensive", dec!(10), dec!(10)),
            mapping("cheap", dec!(1), dec!(1)),
        ];
        let winner = registry.cheapest_from_available(&candidates).unwrap();
        assert_eq!(winner.provider_id, "cheap");
    }

    #[test]
    fn cheapest_from_available_skips_missing_pricing() {
        let registry = ProviderRegistry::from_catalog(vec![], vec![]);
        let mut no_price = mapping("no-price", dec!(1), dec!(1));
        no_price.output_price = None;
        let candidates = vec![no_price, mapping("priced", dec!(5), dec!(5))];
        let winner = registry.cheapest_from_available(&candidates).unwrap();
        assert_eq!(winner.provider_id, "priced");
    }

    #[test]
    fn discount_lowers_the_score() {
        let registry = ProviderRegistry::from_catalog(vec![], vec![]);
        let mut discounted = mapping("discounted", dec!(10), dec!(10));
        discounted.discount = Some(dec!(0.1));
        let candidates = vec![mapping("full-price", dec!(2), dec!(2)), discounted];
        let winner = registry.cheapest_from_available(&candidates).unwrap();
        assert_eq!(winner.provider_id, "discounted");
    }
}
