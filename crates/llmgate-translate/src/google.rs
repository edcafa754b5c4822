//! Google AI Studio `generateContent` encode/decode (§4.B).

use llmgate_protocol::google::{
    GoogleContent, GoogleFunctionDeclaration, GoogleGenerationConfig, GoogleInlineData, GooglePart, GoogleRequest,
    GoogleResponse, GoogleStreamChunk, GoogleTool, map_finish_reason,
};
use llmgate_protocol::{
    CanonicalChoice, CanonicalDelta, CanonicalMessage, CanonicalRequest, CanonicalResponse,
    CanonicalResponseMessage, CanonicalStreamChoice, CanonicalStreamChunk, CanonicalUsage, ContentPart,
    MessageContent, Role, ToolCall, ToolCallFunction, ToolCallKind, ToolDefinition,
};
use serde_json::Value as JsonValue;

use crate::error::TranslateError;
use crate::estimate::{Tokenizer, estimate_completion_tokens};
use crate::image::{ImageFetcher, inline_image};
use crate::openai::unified_to_wire;

fn strip_schema_noise(schema: &JsonValue) -> JsonValue {
    match schema {
        JsonValue::Object(map) => {
            let cleaned: serde_json::Map<String, JsonValue> = map
                .iter()
                .filter(|(k, _)| k.as_str() != "additionalProperties" && k.as_str() != "$schema")
                .map(|(k, v)| (k.clone(), strip_schema_noise(v)))
                .collect();
            JsonValue::Object(cleaned)
        }
        JsonValue::Array(items) => JsonValue::Array(items.iter().map(strip_schema_noise).collect()),
        other => other.clone(),
    }
}

async fn parts_for(message: &CanonicalMessage, fetcher: &dyn ImageFetcher, enforce_https: bool) -> Result<Vec<GooglePart>, TranslateError> {
    match &message.content {
        MessageContent::Text(text) => Ok(vec![GooglePart::text(text.clone())]),
        MessageContent::Parts(content_parts) => {
            let mut parts = Vec::with_capacity(content_parts.len());
            for part in content_parts {
                match part {
                    ContentPart::Text { text } => parts.push(GooglePart::text(text.clone())),
                    ContentPart::ImageUrl { image_url } => {
                        // Unlike Anthropic, Google has no documented placeholder
                        // fallback, so an unsupported/oversized image fails the
                        // whole translation here (§4.B, §9 open question).
                        let inlined = inline_image(&image_url.url, fetcher, enforce_https).await?;
                        parts.push(GooglePart {
                            text: None,
                            inline_data: Some(GoogleInlineData {
                                mime_type: inlined.mime_type,
                                data: inlined.base64_data,
                            }),
                            function_call: None,
                            function_response: None,
                            thought: false,
                        });
                    }
                    ContentPart::ToolUse { name, input, .. } => {
                        parts.push(GooglePart {
                            text: None,
                            inline_data: None,
                            function_call: Some(llmgate_protocol::google::GoogleFunctionCall {
                                name: name.clone(),
                                args: input.clone(),
                            }),
                            function_response: None,
                            thought: false,
                        });
                    }
                    ContentPart::ToolResult { tool_use_id, content, .. } => {
                        parts.push(GooglePart {
                            text: None,
                            inline_data: None,
                            function_call: None,
                            function_response: Some(llmgate_protocol::google::GoogleFunctionResponse {
                                name: tool_use_id.clone(),
                                response: serde_json::json!({"result": content}),
                            }),
                            thought: false,
                        });
                    }
                }
            }
            Ok(parts)
        }
    }
}

/// `assistant → model`, system role dropped into `system_instruction`
/// (§4.B).
pub async fn encode(
    req: &CanonicalRequest,
    supports_reasoning: bool,
    fetcher: &dyn ImageFetcher,
    enforce_https: bool,
) -> Result<GoogleRequest, TranslateError> {
    let mut system_instruction = None;
    let mut contents = Vec::new();

    for message in &req.messages {
        if message.role == Role::System {
            system_instruction = Some(GoogleContent {
                role: None,
                parts: vec![GooglePart::text(message.content.as_text())],
            });
            continue;
        }
        let role = match message.role {
            Role::Assistant => "model",
            _ => "user",
        };
        let parts = parts_for(message, fetcher, enforce_https).await?;
        contents.push(GoogleContent { role: Some(role.to_string()), parts });
    }

    let tools = req.tools.as_ref().map(|tools| {
        vec![GoogleTool {
            function_declarations: tools
                .iter()
                .map(|t| {
                    let ToolDefinition::Function { function } = t;
                    GoogleFunctionDeclaration {
                        name: function.name.clone(),
                        description: function.description.clone(),
                        parameters: function.parameters.as_ref().map(strip_schema_noise),
                    }
                })
                .collect(),
        }]
    });

    let thinking_config = req
        .reasoning_effort
        .filter(|_| supports_reasoning)
        .map(|effort| serde_json::json!({"thinkingBudget": reasoning_effort_budget(effort)}));

    let generation_config = GoogleGenerationConfig {
        temperature: req.temperature,
        top_p: req.top_p,
        max_output_tokens: req.max_tokens,
        response_mime_type: None,
        thinking_config,
    };

    Ok(GoogleRequest {
        contents,
        system_instruction,
        tools,
        generation_config: Some(generation_config),
    })
}

fn reasoning_effort_budget(effort: llmgate_protocol::ReasoningEffort) -> i64 {
    use llmgate_protocol::ReasoningEffort as E;
    match effort {
        E::Minimal => 1024,
        E::Low => 1024,
        E::Medium => 2000,
        E::High => 4000,
    }
}

/// Splits candidate 0's parts into text vs `thought=true` reasoning,
/// recomputes total tokens because Google's own total excludes reasoning
/// (§4.B).
pub fn decode(response: &GoogleResponse, tokenizer: Option<&dyn Tokenizer>) -> Result<CanonicalResponse, TranslateError> {
    let candidate = response
        .candidates
        .first()
        .ok_or_else(|| TranslateError::internal("response had no candidates"))?;

    let mut text = String::new();
    let mut reasoning = String::new();
    let mut tool_calls = Vec::new();

    for (part_index, part) in candidate.content.parts.iter().enumerate() {
        if let Some(call) = &part.function_call {
            tool_calls.push(ToolCall {
                id: format!("{}_{}_{}", call.name, 0, part_index),
                kind: ToolCallKind::Function,
                function: ToolCallFunction {
                    name: call.name.clone(),
                    arguments: call.args.to_string(),
                },
            });
            continue;
        }
        if let Some(t) = &part.text {
            if part.thought {
                reasoning.push_str(t);
            } else {
                text.push_str(t);
            }
        }
    }

    let unified = if !tool_calls.is_empty() {
        llmgate_protocol::UnifiedFinishReason::ToolCalls
    } else {
        map_finish_reason(candidate.finish_reason.as_deref())
    };

    let prompt = response.usage_metadata.prompt_token_count;
    let completion = if response.usage_metadata.candidates_token_count > 0 {
        response.usage_metadata.candidates_token_count
    } else {
        estimate_completion_tokens(&text, tokenizer)
    };
    let reasoning_tokens = response.usage_metadata.thoughts_token_count;
    let total = prompt + completion + reasoning_tokens;

    Ok(CanonicalResponse {
        id: String::new(),
        object: "chat.completion".to_string(),
        created: 0,
        model: String::new(),
        choices: vec![CanonicalChoice {
            index: 0,
            message: CanonicalResponseMessage {
                role: Role::Assistant,
                content: if text.is_empty() { None } else { Some(text) },
                reasoning_content: if reasoning.is_empty() { None } else { Some(reasoning) },
                tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
            },
            finish_reason: Some(unified_to_wire(unified)),
        }],
        usage: Some(CanonicalUsage {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: total,
            reasoning_tokens: if reasoning_tokens > 0 { Some(reasoning_tokens) } else { None },
            cached_tokens: None,
        }),
    })
}

/// Decodes one `streamGenerateContent?alt=sse` chunk the same way as a full
/// response — Google streams whole-candidate updates, not OpenAI-style
/// argument fragments, so there is no cross-chunk coalescing state to keep.
pub fn decode_stream_chunk(chunk: &GoogleStreamChunk) -> Result<CanonicalStreamChunk, TranslateError> {
    let decoded = decode(chunk, None)?;
    let choice = &decoded.choices[0];
    Ok(CanonicalStreamChunk {
        id: decoded.id,
        object: "chat.completion.chunk".to_string(),
        created: decoded.created,
        model: decoded.model,
        choices: vec![CanonicalStreamChoice {
            index: 0,
            delta: CanonicalDelta {
                role: Some(Role::Assistant),
                content: choice.message.content.clone(),
                reasoning_content: choice.message.reasoning_content.clone(),
                tool_calls: choice.message.tool_calls.as_ref().map(|calls| {
                    calls
                        .iter()
                        .enumerate()
                        .map(|(i, c)| llmgate_protocol::ToolCallDelta {
                            index: i as u32,
                            id: Some(c.id.clone()),
                            kind: Some(c.kind),
                            function: Some(llmgate_protocol::ToolCallFunctionDelta {
                                name: Some(c.function.name.clone()),
                                arguments: Some(c.function.arguments.clone()),
                            }),
                        })
                        .collect()
                }),
            },
            finish_reason: choice.finish_reason.clone(),
        }],
        usage: decoded.usage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmgate_protocol::google::{GoogleCandidate, GoogleUsageMetadata};

    #[test]
    fn total_tokens_includes_reasoning_unlike_googles_own_total() {
        let response = GoogleResponse {
            candidates: vec![GoogleCandidate {
                content: GoogleContent { role: Some("model".into()), parts: vec![GooglePart::text("hi")] },
                finish_reason: Some("STOP".into()),
            }],
            usage_metadata: GoogleUsageMetadata {
                prompt_token_count: 10,
                candidates_token_count: 5,
                total_token_count: 15,
                thoughts_token_count: 3,
            },
        };
        let decoded = decode(&response, None).unwrap();
        assert_eq!(decoded.usage.unwrap().total_tokens, 18);
    }

    #[test]
    fn function_call_id_is_synthesized_from_name_and_index() {
        let mut part = GooglePart::text("");
        part.text = None;
        part.function_call = Some(llmgate_protocol::google::GoogleFunctionCall {
            name: "lookup".into(),
            args: serde_json::json!({}),
        });
        let response = GoogleResponse {
            candidates: vec![GoogleCandidate {
                content: GoogleContent { role: Some("model".into()), parts: vec![part] },
                finish_reason: None,
            }],
            usage_metadata: GoogleUsageMetadata::default(),
        };
        let decoded = decode(&response, None).unwrap();
        let call = &decoded.choices[0].message.tool_calls.as_ref().unwrap()[0];
        assert_eq!(call.id, "lookup_0_0");
    }
}
