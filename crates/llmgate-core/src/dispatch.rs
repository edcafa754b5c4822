//! §4.B encode/decode dispatch plus §4.E's upstream HTTP call. One switch on
//! [`ProviderFamily`] per direction, matching §9's "tag-dispatch over
//! subclass hierarchies" design note.

use std::time::Duration;

use llmgate_common::GatewayError;
use llmgate_protocol::{CanonicalRequest, CanonicalResponse, UnifiedFinishReason};
use llmgate_translate::{
    ImageFetcher, ProviderFamily, Tokenizer, anthropic, google, openai, strip_system_role, zai,
};
use serde_json::Value as JsonValue;

/// §4.E step 4: "open an upstream connection with a request timeout and a
/// distinct first-byte timeout".
#[derive(Debug, Clone, Copy)]
pub struct UpstreamTimeouts {
    pub connect: Duration,
    pub first_byte: Duration,
    pub total: Duration,
}

impl Default for UpstreamTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(5),
            first_byte: Duration::from_secs(30),
            total: Duration::from_secs(86_400),
        }
    }
}

/// §4.B "System-role stripping" plus the per-family request encode.
pub async fn encode_upstream_body(
    family: ProviderFamily,
    req: &CanonicalRequest,
    wire_model: &str,
    supports_system_role: bool,
    supports_reasoning: bool,
    fetcher: &dyn ImageFetcher,
    enforce_https: bool,
) -> Result<JsonValue, GatewayError> {
    let mut prepared = req.clone();
    prepared.messages = strip_system_role(&req.messages, supports_system_role);

    let body = match family {
        ProviderFamily::OpenAiChat | ProviderFamily::GenericOpenAiCompatible => {
            openai::encode_chat(&prepared, wire_model)?
        }
        ProviderFamily::OpenAiResponses => openai::encode_responses(&prepared, wire_model)?,
        ProviderFamily::Anthropic => {
            let encoded =
                anthropic::encode(&prepared, wire_model, supports_reasoning, fetcher, enforce_https).await?;
            serde_json::to_value(encoded).map_err(|e| GatewayError::internal(e.to_string()))?
        }
        ProviderFamily::Google => {
            let encoded = google::encode(&prepared, supports_reasoning, fetcher, enforce_https).await?;
            serde_json::to_value(encoded).map_err(|e| GatewayError::internal(e.to_string()))?
        }
    };

    Ok(body)
}

/// §4.B decoding rules plus the ZAI finish-reason quirk, which only applies
/// post-decode since it inspects both the request and the decoded response.
pub fn decode_upstream_body(
    family: ProviderFamily,
    provider_id: &str,
    req: &CanonicalRequest,
    wire_model: &str,
    body: &JsonValue,
    tokenizer: Option<&dyn Tokenizer>,
) -> Result<CanonicalResponse, GatewayError> {
    let mut response = match family {
        ProviderFamily::OpenAiChat | ProviderFamily::GenericOpenAiCompatible => {
            openai::decode_chat(req, body, tokenizer)?
        }
        ProviderFamily::OpenAiResponses => openai::decode_responses(req, body, tokenizer)?,
        ProviderFamily::Anthropic => {
            let parsed = serde_json::from_value(body.clone()).map_err(|e| GatewayError::upstream_error(e.to_string()))?;
            anthropic::decode(&parsed)
        }
        ProviderFamily::Google => {
            let parsed = serde_json::from_value(body.clone()).map_err(|e| GatewayError::upstream_error(e.to_string()))?;
            google::decode(&parsed, tokenizer)?
        }
    };

    if provider_id == "zai" {
        zai::apply_quirk(wire_model, req, &mut response);
    }

    Ok(response)
}

/// Reverses `openai::unified_to_wire`: every `CanonicalChoice`/
/// `CanonicalStreamChoice.finish_reason` on the wire is one of these nine
/// strings (§3 `LogRecord.unifiedFinishReason`), so a `LogRecord` always has
/// somewhere to put it back into the enum.
pub fn wire_to_unified(reason: &str) -> UnifiedFinishReason {
    match reason {
        "stop" => UnifiedFinishReason::Completed,
        "length" => UnifiedFinishReason::LengthLimit,
        "content_filter" => UnifiedFinishReason::ContentFilter,
        "tool_calls" => UnifiedFinishReason::ToolCalls,
        "client_error" => UnifiedFinishReason::ClientError,
        "gateway_error" => UnifiedFinishReason::GatewayError,
        "upstream_error" => UnifiedFinishReason::UpstreamError,
        "canceled" => UnifiedFinishReason::Canceled,
        _ => UnifiedFinishReason::Unknown,
    }
}

/// §4.E step 4: POST the encoded body, bounding only time-to-first-byte here
/// (the total deadline is enforced by the caller racing the whole call).
pub async fn send_upstream(
    client: &reqwest::Client,
    endpoint: &str,
    headers: &llmgate_catalog::Headers,
    body: JsonValue,
    timeouts: UpstreamTimeouts,
) -> Result<reqwest::Response, GatewayError> {
    let mut request = client.post(endpoint).json(&body);
    for (name, value) in headers {
        request = request.header(name, value);
    }

    let response = tokio::time::timeout(timeouts.first_byte, request.send())
        .await
        .map_err(|_| GatewayError::upstream_error("upstream first-byte timeout"))?
        .map_err(|e| GatewayError::upstream_error(e.to_string()))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let truncated: String = body.chars().take(2000).collect();
        return Err(GatewayError::upstream_error(format!("upstream returned {status}"))
            .with_details(serde_json::json!({ "body": truncated })));
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_to_unified_round_trips_every_variant() {
        for reason in [
            UnifiedFinishReason::Completed,
            UnifiedFinishReason::LengthLimit,
            UnifiedFinishReason::ContentFilter,
            UnifiedFinishReason::ToolCalls,
            UnifiedFinishReason::ClientError,
            UnifiedFinishReason::GatewayError,
            UnifiedFinishReason::UpstreamError,
            UnifiedFinishReason::Canceled,
        ] {
            let wire = openai::unified_to_wire(reason);
            assert_eq!(wire_to_unified(&wire), reason);
        }
        assert_eq!(wire_to_unified("nonsense"), UnifiedFinishReason::Unknown);
    }
}
