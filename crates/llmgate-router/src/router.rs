//! §4.C `Router`: resolves `(callerApiKey, canonicalRequest)` into the
//! `(provider, modelName, endpoint, credentials, modeHint)` tuple the
//! gateway handler dispatches against.

use std::collections::HashMap;

use serde_json::json;

use llmgate_catalog::{Headers, ProviderMapping, ProviderRegistry, Stability};
use llmgate_common::GatewayError;
use llmgate_storage::{CredentialStore, ResolvedApiKey};

use crate::iam;

/// Which ledger this request's cost should be attributed to. Independent of
/// *whose* credentials actually served the call: a credits-mode project may
/// still fall back to the gateway's own key for a provider it has none of
/// its own, and is still billed to `credits`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeHint {
    ApiKeys,
    Credits,
}

#[derive(Debug, Clone)]
pub struct RouteRequest<'a> {
    pub requested_model: &'a str,
    /// Set when the caller's request names `provider/model` explicitly
    /// rather than letting the router pick the cheapest candidate.
    pub pinned_provider: Option<&'a str>,
    /// Resolved default for the synthetic `auto`/`custom` model names.
    pub default_model: Option<&'a str>,
    pub stream: bool,
    pub supports_reasoning: bool,
    pub has_existing_tool_calls: bool,
}

#[derive(Debug, Clone)]
pub struct RouteDecision {
    pub provider_id: String,
    pub model_name: String,
    pub endpoint: String,
    pub headers: Headers,
    pub token: String,
    pub mode_hint: ModeHint,
    pub mapping: ProviderMapping,
}

pub struct Router<'a> {
    registry: &'a ProviderRegistry,
    org_credentials: &'a dyn CredentialStore,
    /// Gateway-operated fallback keys, keyed by provider id, loaded from the
    /// environment at bootstrap. Used only in `credits` mode.
    gateway_credentials: &'a HashMap<String, String>,
}

impl<'a> Router<'a> {
    pub fn new(
        registry: &'a ProviderRegistry,
        org_credentials: &'a dyn CredentialStore,
        gateway_credentials: &'a HashMap<String, String>,
    ) -> Self {
        Self {
            registry,
            org_credentials,
            gateway_credentials,
        }
    }

    pub async fn route(
        &self,
        resolved: &ResolvedApiKey,
        request: RouteRequest<'_>,
    ) -> Result<RouteDecision, GatewayError> {
        if resolved.api_key.status != "active" {
            return Err(GatewayError::forbidden("api key is not active"));
        }

        let model_id = resolve_synthetic_model(request.requested_model, request.default_model)?;
        let model = self
            .registry
            .find_model(model_id)
            .ok_or_else(|| GatewayError::not_found(format!("unknown model `{model_id}`")))?;

        if let Some(denial) =
            iam::first_denial_model_wide(&resolved.iam_rules, model_id, model.free)
        {
            return Err(
                GatewayError::forbidden(denial.reason).with_details(json!({ "ruleIds": [denial.rule_id] }))
            );
        }

        let mut candidates: Vec<ProviderMapping> = model
            .providers
            .iter()
            .filter(|m| {
                request
                    .pinned_provider
                    .is_none_or(|pinned| pinned == m.provider_id)
            })
            .filter(|m| !matches!(m.stability, Some(Stability::Experimental)))
            .cloned()
            .collect();

        let mut denying_rule_ids = Vec::new();
        candidates.retain(|mapping| match iam::first_denial_for_candidate(&resolved.iam_rules, mapping) {
            Some(denial) => {
                denying_rule_ids.push(denial.rule_id);
                false
            }
            None => true,
        });

        if candidates.is_empty() {
            return Err(GatewayError::forbidden("no provider mapping passes IAM rules")
                .with_details(json!({ "ruleIds": denying_rule_ids })));
        }

        let chosen = if request.pinned_provider.is_some() {
            candidates.into_iter().next().ok_or_else(|| {
                GatewayError::not_found("pinned provider has no mapping for this model")
            })?
        } else {
            self.registry
                .cheapest_from_available(&candidates)
                .cloned()
                .ok_or_else(|| {
                    GatewayError::bad_request("no fully priced provider mapping available")
                })?
        };

        let mode_hint = if resolved.project.mode == "api-keys" {
            ModeHint::ApiKeys
        } else {
            ModeHint::Credits
        };

        let token = self
            .org_credentials
            .get(resolved.organization.id, &chosen.provider_id)
            .await
            .map_err(|e| GatewayError::internal(e.to_string()))?;

        let token = match token {
            Some(token) => token,
            None if mode_hint == ModeHint::ApiKeys => {
                return Err(GatewayError::bad_request(format!(
                    "organization has no provider key configured for `{}`",
                    chosen.provider_id
                )));
            }
            None => self.gateway_credentials.get(&chosen.provider_id).cloned().ok_or_else(|| {
                GatewayError::payment_required(format!(
                    "no credentials available for provider `{}`",
                    chosen.provider_id
                ))
            })?,
        };

        let endpoint = self
            .registry
            .endpoint_for(
                &chosen.provider_id,
                Some(&chosen.model_name),
                Some(&token),
                request.stream,
                request.supports_reasoning,
                request.has_existing_tool_calls,
                chosen.supports_responses_api,
            )
            .map_err(|e| GatewayError::internal(e.to_string()))?;
        let headers = self.registry.headers_for(&chosen.provider_id, &token);

        Ok(RouteDecision {
            provider_id: chosen.provider_id.clone(),
            model_name: chosen.model_name.clone(),
            endpoint,
            headers,
            token,
            mode_hint,
            mapping: chosen,
        })
    }
}

fn resolve_synthetic_model<'a>(
    requested: &'a str,
    default_model: Option<&'a str>,
) -> Result<&'a str, GatewayError> {
    match requested {
        "auto" | "custom" => default_model.ok_or_else(|| {
            GatewayError::bad_request(format!(
                "model `{requested}` requires a configured default"
            ))
        }),
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use llmgate_catalog::{ModelCatalogEntry, Stability as CatalogStability};
    use llmgate_storage::{ApiKeyRow, IamRuleRow, OrganizationRow, ProjectRow, StorageResult};
    use rust_decimal_macros::dec;

    struct FakeCredentials(HashMap<(i64, String), String>);

    #[async_trait]
    impl CredentialStore for FakeCredentials {
        async fn get(&self, org_id: i64, provider_id: &str) -> StorageResult<Option<String>> {
            Ok(self.0.get(&(org_id, provider_id.to_string())).cloned())
        }
    }

    fn mapping(provider: &str, input: rust_decimal::Decimal, output: rust_decimal::Decimal) -> ProviderMapping {
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

    fn registry_with_one_model() -> ProviderRegistry {
        let model = ModelCatalogEntry {
            id: "chat-model".to_string(),
            family: "generic".to_string(),
            supports_system_role: true,
            json_output: false,
            vision: false,
            free: false,
            stability: CatalogStability::Stable,
            deprecated_at: None,
            providers: vec![
                mapping("cheap", dec!(1), dec!(1)),
                mapping("pricey", dec!(10), dec!(10)),
            ],
        };
        ProviderRegistry::from_catalog(vec![], vec![model])
    }

    fn resolved_api_key(mode: &str) -> ResolvedApiKey {
        ResolvedApiKey {
            api_key: ApiKeyRow {
                id: 1,
                project_id: 1,
                masked_token: "sk-***".to_string(),
                status: "active".to_string(),
                usage: dec!(0),
                usage_limit: None,
            },
            project: ProjectRow {
                id: 1,
                organization_id: 1,
                mode: mode.to_string(),
            },
            organization: OrganizationRow {
                id: 1,
                credits: dec!(100),
                plan: "free".to_string(),
                retention_level: "full".to_string(),
                status: "active".to_string(),
                auto_topup_enabled: false,
                auto_topup_threshold: None,
            },
            iam_rules: vec![],
        }
    }

    #[tokio::test]
    async fn picks_cheapest_candidate_when_unpinned() {
        let registry = registry_with_one_model();
        let credentials = FakeCredentials(HashMap::from([(
            (1, "cheap".to_string()),
            "token-cheap".to_string(),
        )]));
        let gateway_credentials = HashMap::new();
        let router = Router::new(&registry, &credentials, &gateway_credentials);
        let resolved = resolved_api_key("credits");

        let decision = router
            .route(
                &resolved,
                RouteRequest {
                    requested_model: "chat-model",
                    pinned_provider: None,
                    default_model: None,
                    stream: false,
                    supports_reasoning: false,
                    has_existing_tool_calls: false,
                },
            )
            .await
            .unwrap();

        assert_eq!(decision.provider_id, "cheap");
    }

    #[tokio::test]
    async fn pinned_provider_overrides_cheapest_pick() {
        let registry = registry_with_one_model();
        let credentials = FakeCredentials(HashMap::from([(
            (1, "pricey".to_string()),
            "token-pricey".to_string(),
        )]));
        let gateway_credentials = HashMap::new();
        let router = Router::new(&registry, &credentials, &gateway_credentials);
        let resolved = resolved_api_key("credits");

        let decision = router
            .route(
                &resolved,
                RouteRequest {
                    requested_model: "chat-model",
                    pinned_provider: Some("pricey"),
                    default_model: None,
                    stream: false,
                    supports_reasoning: false,
                    has_existing_tool_calls: false,
                },
            )
            .await
            .unwrap();

        assert_eq!(decision.provider_id, "pricey");
    }

    #[tokio::test]
    async fn api_keys_mode_without_org_credentials_is_bad_request() {
        let registry = registry_with_one_model();
        let credentials = FakeCredentials(HashMap::new());
        let gateway_credentials = HashMap::new();
        let router = Router::new(&registry, &credentials, &gateway_credentials);
        let resolved = resolved_api_key("api-keys");

        let err = router
            .route(
                &resolved,
                RouteRequest {
                    requested_model: "chat-model",
                    pinned_provider: None,
                    default_model: None,
                    stream: false,
                    supports_reasoning: false,
                    has_existing_tool_calls: false,
                },
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind, llmgate_common::ErrorKind::BadRequest);
    }

    #[tokio::test]
    async fn credits_mode_falls_back_to_gateway_credentials() {
        let registry = registry_with_one_model();
        let credentials = FakeCredentials(HashMap::new());
        let gateway_credentials =
            HashMap::from([("cheap".to_string(), "gateway-token".to_string())]);
        let router = Router::new(&registry, &credentials, &gateway_credentials);
        let resolved = resolved_api_key("credits");

        let decision = router
            .route(
                &resolved,
                RouteRequest {
                    requested_model: "chat-model",
                    pinned_provider: None,
                    default_model: None,
                    stream: false,
                    supports_reasoning: false,
                    has_existing_tool_calls: false,
                },
            )
            .await
            .unwrap();

        assert_eq!(decision.token, "gateway-token");
    }

    #[tokio::test]
    async fn unknown_model_is_not_found() {
        let registry = registry_with_one_model();
        let credentials = FakeCredentials(HashMap::new());
        let gateway_credentials = HashMap::new();
        let router = Router::new(&registry, &credentials, &gateway_credentials);
        let resolved = resolved_api_key("credits");

        let err = router
            .route(
                &resolved,
                RouteRequest {
                    requested_model: "does-not-exist",
                    pinned_provider: None,
                    default_model: None,
                    stream: false,
                    supports_reasoning: false,
                    has_existing_tool_calls: false,
                },
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind, llmgate_common::ErrorKind::NotFound);
    }
}
