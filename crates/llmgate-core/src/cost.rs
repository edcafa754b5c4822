//! §4.E step 6 "Compute costs". Pure decimal arithmetic over a mapping's
//! pricing and the decoded usage; no I/O.

use rust_decimal::Decimal;

use llmgate_catalog::ProviderMapping;
use llmgate_protocol::CanonicalUsage;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CostBreakdown {
    pub input_cost: Option<Decimal>,
    pub output_cost: Option<Decimal>,
    /// Folds in the per-image cost (`imageInputPrice × imageCount`) since
    /// `NewLogRecord` has no dedicated image-cost column.
    pub request_cost: Option<Decimal>,
    pub total_cost: Option<Decimal>,
}

/// `inputCost = promptTokens × inputPrice`, `outputCost = (completion +
/// reasoning) × outputPrice`, `requestCost = requestPrice` plus `N ×
/// imageInputPrice` (§4.E step 6).
pub fn compute_cost(
    mapping: &ProviderMapping,
    usage: Option<&CanonicalUsage>,
    image_count: usize,
) -> CostBreakdown {
    let input_cost = usage.and_then(|u| {
        mapping
            .input_price
            .map(|price| Decimal::from(u.prompt_tokens) * price)
    });

    let output_cost = usage.and_then(|u| {
        mapping.output_price.map(|price| {
            let billable = u.completion_tokens + u.reasoning_tokens.unwrap_or(0);
            Decimal::from(billable) * price
        })
    });

    let image_cost = mapping
        .image_input_price
        .filter(|_| image_count > 0)
        .map(|price| Decimal::from(image_count as i64) * price);

    let request_cost = match (mapping.request_price, image_cost) {
        (None, None) => None,
        (price, images) => Some(price.unwrap_or_default() + images.unwrap_or_default()),
    };

    let total_cost = if input_cost.is_none() && output_cost.is_none() && request_cost.is_none() {
        None
    } else {
        Some(
            input_cost.unwrap_or_default()
                + output_cost.unwrap_or_default()
                + request_cost.unwrap_or_default(),
        )
    };

    CostBreakdown {
        input_cost,
        output_cost,
        request_cost,
        total_cost,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn mapping() -> ProviderMapping {
        ProviderMapping {
            provider_id: "openai".to_string(),
            model_name: "gpt-test".to_string(),
            input_price: Some(dec!(0.01)),
            output_price: Some(dec!(0.03)),
            image_input_price: Some(dec!(0.05)),
            request_price: None,
            context_size: None,
            supported_parameters: None,
            supports_responses_api: true,
            discount: None,
            stability: None,
        }
    }

    #[test]
    fn computes_input_output_and_image_cost() {
        let usage = CanonicalUsage {
            prompt_tokens: 1000,
            completion_tokens: 500,
            total_tokens: 1500,
            reasoning_tokens: Some(100),
            cached_tokens: None,
        };
        let cost = compute_cost(&mapping(), Some(&usage), 2);
        assert_eq!(cost.input_cost, Some(dec!(10.00)));
        assert_eq!(cost.output_cost, Some(dec!(18.00)));
        assert_eq!(cost.request_cost, Some(dec!(0.10)));
        assert_eq!(cost.total_cost, Some(dec!(28.10)));
    }

    #[test]
    fn no_usage_and_no_request_price_yields_no_total() {
        let mut m = mapping();
        m.image_input_price = None;
        let cost = compute_cost(&m, None, 0);
        assert_eq!(cost.total_cost, None);
    }
}
