//! §4.E step 1: "extract bearer token... resolve ApiKey + Organization +
//! Project". The usage-limit check from §3's `ApiKey` invariant and the
//! organization-status check from §7's `forbidden` kind live here too, since
//! both gate every request before routing ever sees it.

use axum::http::HeaderMap;

use llmgate_common::GatewayError;
use llmgate_storage::{ResolvedApiKey, Storage};

/// Resolves the bearer token in `Authorization` against `storage`, enforcing
/// the request-plane auth invariants (§3 `ApiKey`, §7 `unauthorized` /
/// `forbidden` / `payment_required`). Session/cookie auth is out of scope
/// (§1) — only `Authorization: Bearer {token}` is recognized.
pub async fn authenticate(
    storage: &dyn Storage,
    headers: &HeaderMap,
) -> Result<ResolvedApiKey, GatewayError> {
    let token = extract_bearer(headers)
        .ok_or_else(|| GatewayError::unauthorized("missing bearer token"))?;

    let resolved = storage
        .resolve_api_key(&token)
        .await
        .map_err(|e| GatewayError::internal(e.to_string()))?
        .ok_or_else(|| GatewayError::unauthorized("invalid api key"))?;

    if resolved.api_key.status != "active" {
        return Err(GatewayError::unauthorized("api key is not active"));
    }
    if resolved.organization.status != "active" {
        return Err(GatewayError::forbidden("organization is not active"));
    }
    if let Some(limit) = resolved.api_key.usage_limit
        && resolved.api_key.usage >= limit
    {
        return Err(GatewayError::payment_required("api key usage limit reached"));
    }

    Ok(resolved)
}

fn extract_bearer(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.trim().strip_prefix("Bearer ").or_else(|| value.trim().strip_prefix("bearer "))?;
    let token = token.trim();
    if token.is_empty() { None } else { Some(token.to_string()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, "Bearer sk-abc123".parse().unwrap());
        assert_eq!(extract_bearer(&headers), Some("sk-abc123".to_string()));
    }

    #[test]
    fn rejects_missing_or_malformed_header() {
        let headers = HeaderMap::new();
        assert_eq!(extract_bearer(&headers), None);

        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, "Basic xyz".parse().unwrap());
        assert_eq!(extract_bearer(&headers), None);
    }
}
