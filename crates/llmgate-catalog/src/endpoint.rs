#[derive(Debug, Clone, thiserror::Error)]
pub enum EndpointError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("model name required for provider {0}")]
    MissingModelName(String),
    #[error("token required for provider {0}")]
    MissingToken(String),
}

/// A flat header set; Google passes its key in the URL so it contributes none.
pub type Headers = Vec<(String, String)>;

/// Table-driven endpoint resolution, one arm per provider family (§4.A, §9).
pub fn endpoint_for(
    provider_id: &str,
    model_name: Option<&str>,
    token: Option<&str>,
    stream: bool,
    supports_reasoning: bool,
    has_existing_tool_calls: bool,
    supports_responses_api: bool,
) -> Result<String, EndpointError> {
    match provider_id {
        "anthropic" => Ok(anthropic_base_url().to_string() + "/v1/messages"),
        "google" | "google-ai-studio" | "aistudio" => {
            let model = model_name.ok_or_else(|| EndpointError::MissingModelName(provider_id.to_string()))?;
            let token = token.ok_or_else(|| EndpointError::MissingToken(provider_id.to_string()))?;
            let method = if stream {
                "streamGenerateContent"
            } else {
                "generateContent"
            };
            let mut url = format!(
                "{}/v1beta/models/{model}:{method}?key={token}",
                google_base_url()
            );
            if stream {
                url.push_str("&alt=sse");
            }
            Ok(url)
        }
        "openai" if supports_reasoning && !has_existing_tool_calls && supports_responses_api => {
            Ok(openai_base_url().to_string() + "/v1/responses")
        }
        "zai" => Ok(zai_base_url().to_string() + "/api/paas/v4/chat/completions"),
        _ => Ok(generic_base_url(provider_id).to_string() + "/v1/chat/completions"),
    }
}

/// Per-provider auth header conventions (§4.A).
pub fn headers_for(provider_id: &str, token: &str) -> Headers {
    match provider_id {
        "anthropic" => vec![
            ("x-api-key".to_string(), token.to_string()),
            ("anthropic-version".to_string(), "2023-06-01".to_string()),
            (
                "anthropic-beta".to_string(),
                "tools-2024-04-04".to_string(),
            ),
        ],
        "google" | "google-ai-studio" | "aistudio" => Vec::new(),
        _ => vec![("Authorization".to_string(), format!("Bearer {token}"))],
    }
}

fn anthropic_base_url() -> &'static str {
    "https://api.anthropic.com"
}

fn google_base_url() -> &'static str {
    "https://generativelanguage.googleapis.com"
}

fn openai_base_url() -> &'static str {
    "https://api.openai.com"
}

fn zai_base_url() -> &'static str {
    "https://open.bigmodel.cn"
}

/// Other OpenAI-compatible providers (xAI, Groq, DeepSeek, Perplexity,
/// Mistral, Novita, Moonshot, Alibaba, Nebius, Inference.net, Together,
/// Routeway, custom) each carry their own base URL in the provider catalog
/// entry in production; this fallback covers local/test seeding.
fn generic_base_url(provider_id: &str) -> String {
    format!("https://api.{provider_id}.com")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anthropic_endpoint_is_messages() {
        let url = endpoint_for("anthropic", None, None, false, false, false, true).unwrap();
        assert_eq!(url, "https://api.anthropic.com/v1/messages");
    }

    #[test]
    fn google_streaming_adds_sse_alt() {
        let url = endpoint_for("google", Some("gemini-pro"), Some("tok"), true, false, false, true).unwrap();
        assert_eq!(
            url,
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-pro:streamGenerateContent?key=tok&alt=sse"
        );
    }

    #[test]
    fn openai_reasoning_without_tool_calls_uses_responses_api() {
        let url = endpoint_for("openai", None, None, false, true, false, true).unwrap();
        assert_eq!(url, "https://api.openai.com/v1/responses");
    }

    #[test]
    fn openai_reasoning_with_existing_tool_calls_uses_chat_completions() {
        let url = endpoint_for("openai", None, None, false, true, true, true).unwrap();
        assert_eq!(url, "https://api.openai.com/v1/chat/completions");
    }

    #[test]
    fn openai_responses_api_requires_mapping_support() {
        let url = endpoint_for("openai", None, None, false, true, false, false).unwrap();
        assert_eq!(url, "https://api.openai.com/v1/chat/completions");
    }

    #[test]
    fn zai_uses_paas_path() {
        let url = endpoint_for("zai", None, None, false, false, false, true).unwrap();
        assert_eq!(url, "https://open.bigmodel.cn/api/paas/v4/chat/completions");
    }

    #[test]
    fn anthropic_headers_include_version_and_beta() {
        let headers = headers_for("anthropic", "sk-ant-xyz");
        assert!(headers.contains(&("x-api-key".to_string(), "sk-ant-xyz".to_string())));
        assert!(headers.iter().any(|(k, _)| k == "anthropic-version"));
    }

    #[test]
    fn google_headers_are_empty() {
        assert!(headers_for("google", "tok").is_empty());
    }

    #[test]
    fn default_headers_use_bearer() {
        let headers = headers_for("groq", "tok");
        assert_eq!(headers, vec![("Authorization".to_string(), "Bearer tok".to_string())]);
    }
}
