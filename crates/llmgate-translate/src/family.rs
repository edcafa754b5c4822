use serde::{Deserialize, Serialize};

/// The upstream wire dialect a request is translated into (§4.A, §9).
/// Dispatch on this tag replaces a combinatorial proto-to-proto matrix:
/// every family only ever translates to and from the canonical shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderFamily {
    OpenAiChat,
    OpenAiResponses,
    Anthropic,
    Google,
    GenericOpenAiCompatible,
}

impl ProviderFamily {
    /// Resolves the family for a `(provider_id, model)` pair the way
    /// `llmgate-catalog::endpoint_for` picks an endpoint (§4.A): most
    /// providers speak the generic OpenAI-compatible dialect, a handful
    /// have their own wire format, and OpenAI itself splits between chat
    /// completions and the Responses API "only when the model supports it,
    /// reasoning is requested, and the conversation has no tool-call/
    /// tool-result turns" (§4.B) — `mapping_supports_responses_api` is that
    /// per-mapping capability gate (`ProviderMapping::supports_responses_api`).
    pub fn resolve(
        provider_id: &str,
        supports_reasoning: bool,
        has_existing_tool_calls: bool,
        mapping_supports_responses_api: bool,
    ) -> Self {
        match provider_id {
            "anthropic" => ProviderFamily::Anthropic,
            "google" | "google-ai-studio" | "aistudio" => ProviderFamily::Google,
            "openai"
                if supports_reasoning && !has_existing_tool_calls && mapping_supports_responses_api =>
            {
                ProviderFamily::OpenAiResponses
            }
            "openai" => ProviderFamily::OpenAiChat,
            _ => ProviderFamily::GenericOpenAiCompatible,
        }
    }

    pub fn supports_streaming_sse(self) -> bool {
        !matches!(self, ProviderFamily::Google)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openai_picks_responses_api_for_reasoning_without_tool_history() {
        assert_eq!(
            ProviderFamily::resolve("openai", true, false, true),
            ProviderFamily::OpenAiResponses
        );
        assert_eq!(
            ProviderFamily::resolve("openai", true, true, true),
            ProviderFamily::OpenAiChat
        );
        assert_eq!(
            ProviderFamily::resolve("openai", false, false, true),
            ProviderFamily::OpenAiChat
        );
    }

    #[test]
    fn openai_responses_api_requires_mapping_support() {
        assert_eq!(
            ProviderFamily::resolve("openai", true, false, false),
            ProviderFamily::OpenAiChat
        );
    }

    #[test]
    fn unrecognized_providers_fall_back_to_generic() {
        assert_eq!(
            ProviderFamily::resolve("groq", false, false, true),
            ProviderFamily::GenericOpenAiCompatible
        );
    }
}
