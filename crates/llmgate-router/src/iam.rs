//! §4.C "IAM evaluation": rules attached to an `ApiKey`, evaluated in order,
//! first denial wins. `rule_value` is JSON because only one of the six
//! `rule_type`s is ever active per row.

use rust_decimal::Decimal;
use serde::Deserialize;

use llmgate_catalog::ProviderMapping;
use llmgate_storage::IamRuleRow;

#[derive(Debug, Deserialize)]
struct ModelsRuleValue {
    models: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ProvidersRuleValue {
    providers: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PricingRuleValue {
    /// Model-wide check: `"free"` or `"paid"`, compared against the model's
    /// own `free` flag.
    #[serde(default)]
    pricing_type: Option<String>,
    /// Per-candidate check against the provider mapping's own prices.
    #[serde(default)]
    max_input_price: Option<Decimal>,
    #[serde(default)]
    max_output_price: Option<Decimal>,
}

#[derive(Debug, Clone)]
pub struct IamDenial {
    pub rule_id: i64,
    pub reason: String,
}

fn pricing_type_of(model_free: bool) -> &'static str {
    if model_free { "free" } else { "paid" }
}

/// Checked once per request, before candidate selection: `allow_models` /
/// `deny_models` and `pricing_type`-shaped pricing rules apply to the whole
/// requested model regardless of which provider ends up serving it.
pub fn first_denial_model_wide(
    rules: &[IamRuleRow],
    requested_model: &str,
    model_free: bool,
) -> Option<IamDenial> {
    for rule in rules {
        match rule.rule_type.as_str() {
            "allow_models" => {
                if let Ok(v) = serde_json::from_value::<ModelsRuleValue>(rule.rule_value.clone())
                    && !v.models.iter().any(|m| m == requested_model)
                {
                    return Some(IamDenial {
                        rule_id: rule.id,
                        reason: format!(
                            "model `{requested_model}` is not in the allow_models list (rule {})",
                            rule.id
                        ),
                    });
                }
            }
            "deny_models" => {
                if let Ok(v) = serde_json::from_value::<ModelsRuleValue>(rule.rule_value.clone())
                    && v.models.iter().any(|m| m == requested_model)
                {
                    return Some(IamDenial {
                        rule_id: rule.id,
                        reason: format!(
                            "model `{requested_model}` is denied by rule {}",
                            rule.id
                        ),
                    });
                }
            }
            "allow_pricing" | "deny_pricing" => {
                let Ok(v) = serde_json::from_value::<PricingRuleValue>(rule.rule_value.clone())
                else {
                    continue;
                };
                let Some(pricing_type) = &v.pricing_type else {
                    continue;
                };
                let actual = pricing_type_of(model_free);
                let denies = if rule.rule_type == "allow_pricing" {
                    pricing_type != actual
                } else {
                    pricing_type == actual
                };
                if denies {
                    return Some(IamDenial {
                        rule_id: rule.id,
                        reason: format!(
                            "model `{requested_model}` pricing type `{actual}` denied by rule {}",
                            rule.id
                        ),
                    });
                }
            }
            _ => {}
        }
    }
    None
}

/// Checked once per surviving candidate: `allow_providers` / `deny_providers`
/// and `max_input_price` / `max_output_price`-shaped pricing rules only
/// remove that one candidate, not the whole model.
pub fn first_denial_for_candidate(
    rules: &[IamRuleRow],
    mapping: &ProviderMapping,
) -> Option<IamDenial> {
    for rule in rules {
        match rule.rule_type.as_str() {
            "allow_providers" => {
                if let Ok(v) =
                    serde_json::from_value::<ProvidersRuleValue>(rule.rule_value.clone())
                    && !v.providers.iter().any(|p| p == &mapping.provider_id)
                {
                    return Some(IamDenial {
                        rule_id: rule.id,
                        reason: format!(
                            "provider `{}` is not in the allow_providers list (rule {})",
                            mapping.provider_id, rule.id
                        ),
                    });
                }
            }
            "deny_providers" => {
                if let Ok(v) =
                    serde_json::from_value::<ProvidersRuleValue>(rule.rule_value.clone())
                    && v.providers.iter().any(|p| p == &mapping.provider_id)
                {
                    return Some(IamDenial {
                        rule_id: rule.id,
                        reason: format!(
                            "provider `{}` is denied by rule {}",
                            mapping.provider_id, rule.id
                        ),
                    });
                }
            }
            "allow_pricing" | "deny_pricing" => {
                let Ok(v) = serde_json::from_value::<PricingRuleValue>(rule.rule_value.clone())
                else {
                    continue;
                };
                if v.max_input_price.is_none() && v.max_output_price.is_none() {
                    continue;
                }
                let over_input = v
                    .max_input_price
                    .zip(mapping.input_price)
                    .is_some_and(|(cap, price)| price > cap);
                let over_output = v
                    .max_output_price
                    .zip(mapping.output_price)
                    .is_some_and(|(cap, price)| price > cap);
                // Both `allow_pricing` and `deny_pricing` name a ceiling here;
                // exceeding it denies the candidate either way (§4.C).
                if over_input || over_output {
                    return Some(IamDenial {
                        rule_id: rule.id,
                        reason: format!(
                            "provider `{}` pricing exceeds the cap set by rule {}",
                            mapping.provider_id, rule.id
                        ),
                    });
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn rule(id: i64, rule_type: &str, value: serde_json::Value) -> IamRuleRow {
        IamRuleRow {
            id,
            rule_type: rule_type.to_string(),
            rule_value: value,
            status: "active".to_string(),
        }
    }

    fn mapping(provider: &str, input: Decimal, output: Decimal) -> ProviderMapping {
        ProviderMapping {
            provider_id: provider.to_string(),
            model_name: format!("{provider}-wire"),
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
    fn no_rules_allows_everything() {
        assert!(first_denial_model_wide(&[], "gpt-4o", false).is_none());
        assert!(first_denial_for_candidate(&[], &mapping("openai", dec!(1), dec!(1))).is_none());
    }

    #[test]
    fn allow_models_denies_anything_not_listed() {
        let rules = vec![rule(1, "allow_models", json!({"models": ["gpt-4o"]}))];
        assert!(first_denial_model_wide(&rules, "gpt-4o", false).is_none());
        let denial = first_denial_model_wide(&rules, "claude-3", false).unwrap();
        assert_eq!(denial.rule_id, 1);
    }

    #[test]
    fn deny_providers_removes_only_that_candidate() {
        let rules = vec![rule(2, "deny_providers", json!({"providers": ["openai"]}))];
        assert!(first_denial_for_candidate(&rules, &mapping("anthropic", dec!(1), dec!(1))).is_none());
        let denial =
            first_denial_for_candidate(&rules, &mapping("openai", dec!(1), dec!(1))).unwrap();
        assert_eq!(denial.rule_id, 2);
    }

    #[test]
    fn per_candidate_pricing_cap_only_blocks_exceeding_provider() {
        let rules = vec![rule(
            3,
            "deny_pricing",
            json!({"max_input_price": "1.00", "max_output_price": "1.00"}),
        )];
        assert!(
            first_denial_for_candidate(&rules, &mapping("cheap", dec!(0.5), dec!(0.5))).is_none()
        );
        let denial =
            first_denial_for_candidate(&rules, &mapping("pricey", dec!(2.0), dec!(0.5))).unwrap();
        assert_eq!(denial.rule_id, 3);
    }

    #[test]
    fn more_rules_never_widen_the_allowed_set() {
        // Monotonicity (§8): adding a deny rule can only shrink what passes.
        let base: Vec<IamRuleRow> = vec![];
        let with_deny = vec![rule(4, "deny_providers", json!({"providers": ["openai"]}))];
        let candidate = mapping("openai", dec!(1), dec!(1));
        assert!(first_denial_for_candidate(&base, &candidate).is_none());
        assert!(first_denial_for_candidate(&with_deny, &candidate).is_some());
    }
}
