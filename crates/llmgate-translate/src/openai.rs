//! OpenAI chat-completions and Responses API encode/decode (§4.B). Also
//! doubles as the decoder for every generic OpenAI-compatible provider,
//! since they all reply with the same chat-completions shape.

use llmgate_protocol::{
    CanonicalChoice, CanonicalDelta, CanonicalRequest, CanonicalResponse, CanonicalResponseMessage,
    CanonicalStreamChoice, CanonicalStreamChunk, CanonicalUsage, Role, UnifiedFinishReason,
};
use serde_json::{Value as JsonValue, json};

use crate::error::TranslateError;
use crate::estimate::{Tokenizer, estimate_completion_tokens, estimate_prompt_tokens};
use crate::wire_messages::{to_openai_messages, tool_calls_from_openai_json};

/// `gpt-5*` models reject `temperature` values other than 1 and rename the
/// token-budget field (§4.B).
fn is_gpt5_family(model_name: &str) -> bool {
    model_name.starts_with("gpt-5")
}

pub fn encode_chat(req: &CanonicalRequest, wire_model: &str) -> Result<JsonValue, TranslateError> {
    let mut body = serde_json::Map::new();
    body.insert("model".into(), json!(wire_model));
    body.insert("messages".into(), JsonValue::Array(to_openai_messages(&req.messages)));
    body.insert("stream".into(), json!(req.stream));

    if is_gpt5_family(wire_model) {
        body.insert("temperature".into(), json!(1));
        if let Some(max_tokens) = req.max_tokens {
            body.insert("max_completion_tokens".into(), json!(max_tokens));
        }
    } else {
        if let Some(temperature) = req.temperature {
            body.insert("temperature".into(), json!(temperature));
        }
        if let Some(max_tokens) = req.max_tokens {
            body.insert("max_tokens".into(), json!(max_tokens));
        }
    }

    if let Some(top_p) = req.top_p {
        body.insert("top_p".into(), json!(top_p));
    }
    if let Some(fp) = req.frequency_penalty {
        body.insert("frequency_penalty".into(), json!(fp));
    }
    if let Some(pp) = req.presence_penalty {
        body.insert("presence_penalty".into(), json!(pp));
    }
    if let Some(rf) = &req.response_format {
        body.insert("response_format".into(), rf.clone());
    }
    if let Some(tools) = &req.tools {
        body.insert("tools".into(), serde_json::to_value(tools).map_err(|e| TranslateError::internal(e.to_string()))?);
    }
    if let Some(tool_choice) = &req.tool_choice {
        body.insert(
            "tool_choice".into(),
            serde_json::to_value(tool_choice).map_err(|e| TranslateError::internal(e.to_string()))?,
        );
    }
    if let Some(effort) = req.reasoning_effort {
        body.insert("reasoning_effort".into(), serde_json::to_value(effort).unwrap());
    }
    if req.stream {
        body.insert("stream_options".into(), json!({"include_usage": true}));
    }

    Ok(JsonValue::Object(body))
}

/// Flattens canonical `input` messages into the Responses API's `input`
/// array — same per-message shape as chat-completions, just under a
/// different top-level key.
pub fn encode_responses(req: &CanonicalRequest, wire_model: &str) -> Result<JsonValue, TranslateError> {
    let mut body = serde_json::Map::new();
    body.insert("model".into(), json!(wire_model));
    body.insert("input".into(), JsonValue::Array(to_openai_messages(&req.messages)));
    body.insert("stream".into(), json!(req.stream));

    if let Some(effort) = req.reasoning_effort {
        body.insert(
            "reasoning".into(),
            json!({"effort": effort, "summary": "detailed"}),
        );
    }
    if let Some(tools) = &req.tools {
        let flattened: Vec<JsonValue> = tools
            .iter()
            .map(|t| {
                let llmgate_protocol::ToolDefinition::Function { function } = t;
                json!({
                    "type": "function",
                    "name": function.name,
                    "description": function.description,
                    "parameters": function.parameters,
                })
            })
            .collect();
        body.insert("tools".into(), JsonValue::Array(flattened));
    }
    if let Some(tool_choice) = &req.tool_choice {
        body.insert(
            "tool_choice".into(),
            serde_json::to_value(tool_choice).map_err(|e| TranslateError::internal(e.to_string()))?,
        );
    }
    if let Some(temperature) = req.temperature {
        body.insert("temperature".into(), json!(temperature));
    }
    if let Some(max_tokens) = req.max_tokens {
        body.insert("max_output_tokens".into(), json!(max_tokens));
    }

    Ok(JsonValue::Object(body))
}

fn finish_reason_from_str(reason: Option<&str>, has_tool_calls: bool) -> UnifiedFinishReason {
    match reason {
        Some("stop") => UnifiedFinishReason::Completed,
        Some("length") => UnifiedFinishReason::LengthLimit,
        Some("content_filter") => UnifiedFinishReason::ContentFilter,
        Some("tool_calls") => UnifiedFinishReason::ToolCalls,
        _ if has_tool_calls => UnifiedFinishReason::ToolCalls,
        Some(_) => UnifiedFinishReason::Unknown,
        None => UnifiedFinishReason::Unknown,
    }
}

/// Decodes a standard OpenAI chat-completions JSON body (also covers
/// Mistral and every generic OpenAI-compatible provider, which reply with
/// the identical shape) into the canonical response. `req` is only used to
/// estimate prompt tokens when the upstream body omits `usage` entirely
/// (§4.B "Token estimation").
pub fn decode_chat(
    req: &CanonicalRequest,
    body: &JsonValue,
    tokenizer: Option<&dyn Tokenizer>,
) -> Result<CanonicalResponse, TranslateError> {
    let choice = body
        .get("choices")
        .and_then(|c| c.get(0))
        .ok_or_else(|| TranslateError::internal("response had no choices"))?;
    let message = choice.get("message").cloned().unwrap_or(JsonValue::Null);
    let content = message.get("content").and_then(|v| v.as_str()).map(str::to_string);
    let reasoning_content = message
        .get("reasoning_content")
        .and_then(|v| v.as_str())
        .map(str::to_string);
    let tool_calls = message.get("tool_calls").and_then(tool_calls_from_openai_json);
    let finish_reason = choice.get("finish_reason").and_then(|v| v.as_str());
    let unified = finish_reason_from_str(finish_reason, tool_calls.is_some());

    let usage = body.get("usage").map(|u| CanonicalUsage {
        prompt_tokens: u.get("prompt_tokens").and_then(|v| v.as_i64()).unwrap_or(0),
        completion_tokens: u.get("completion_tokens").and_then(|v| v.as_i64()).unwrap_or(0),
        total_tokens: u.get("total_tokens").and_then(|v| v.as_i64()).unwrap_or(0),
        reasoning_tokens: u
            .get("completion_tokens_details")
            .and_then(|d| d.get("reasoning_tokens"))
            .and_then(|v| v.as_i64()),
        cached_tokens: u
            .get("prompt_tokens_details")
            .and_then(|d| d.get("cached_tokens"))
            .and_then(|v| v.as_i64()),
    });

    let usage = usage.or_else(|| {
        let prompt = estimate_prompt_tokens(&req.messages, tokenizer);
        let completion = content.as_deref().map(|c| estimate_completion_tokens(c, tokenizer)).unwrap_or(0);
        Some(CanonicalUsage {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: prompt + completion,
            reasoning_tokens: None,
            cached_tokens: None,
        })
    });

    Ok(CanonicalResponse {
        id: body.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
        object: "chat.completion".to_string(),
        created: body.get("created").and_then(|v| v.as_i64()).unwrap_or(0),
        model: body.get("model").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
        choices: vec![CanonicalChoice {
            index: 0,
            message: CanonicalResponseMessage {
                role: Role::Assistant,
                content,
                reasoning_content,
                tool_calls,
            },
            finish_reason: Some(unified_to_wire(unified)),
        }],
        usage,
    })
}

/// Decodes a Responses API body (`output: [...]`, `status: "completed"`).
pub fn decode_responses(
    req: &CanonicalRequest,
    body: &JsonValue,
    tokenizer: Option<&dyn Tokenizer>,
) -> Result<CanonicalResponse, TranslateError> {
    let output = body
        .get("output")
        .and_then(|o| o.as_array())
        .cloned()
        .unwrap_or_default();

    let mut content = String::new();
    let mut reasoning = String::new();
    let mut tool_calls = Vec::new();

    for item in &output {
        match item.get("type").and_then(|v| v.as_str()) {
            Some("message") => {
                if let Some(parts) = item.get("content").and_then(|v| v.as_array()) {
                    for part in parts {
                        if let Some(text) = part.get("text").and_then(|v| v.as_str()) {
                            content.push_str(text);
                        }
                    }
                }
            }
            Some("reasoning") => {
                if let Some(text) = item
                    .get("summary")
                    .and_then(|s| s.as_array())
                    .and_then(|a| a.first())
                    .and_then(|s| s.get("text"))
                    .and_then(|v| v.as_str())
                {
                    reasoning.push_str(text);
                }
            }
            Some("function_call") => {
                let id = item.get("call_id").or_else(|| item.get("id")).and_then(|v| v.as_str()).unwrap_or_default();
                let name = item.get("name").and_then(|v| v.as_str()).unwrap_or_default();
                let arguments = item.get("arguments").and_then(|v| v.as_str()).unwrap_or("{}");
                tool_calls.push(llmgate_protocol::ToolCall {
                    id: id.to_string(),
                    kind: llmgate_protocol::ToolCallKind::Function,
                    function: llmgate_protocol::ToolCallFunction {
                        name: name.to_string(),
                        arguments: arguments.to_string(),
                    },
                });
            }
            _ => {}
        }
    }

    let status = body.get("status").and_then(|v| v.as_str());
    let unified = match status {
        Some("completed") if !tool_calls.is_empty() => UnifiedFinishReason::ToolCalls,
        Some("completed") => UnifiedFinishReason::Completed,
        Some(other) => wire_status_to_unified(other),
        None => UnifiedFinishReason::Unknown,
    };

    let usage = body.get("usage").map(|u| {
        let prompt = u.get("input_tokens").and_then(|v| v.as_i64()).unwrap_or(0);
        let completion = u.get("output_tokens").and_then(|v| v.as_i64()).unwrap_or(0);
        let reasoning_tokens = u
            .get("output_tokens_details")
            .and_then(|d| d.get("reasoning_tokens"))
            .and_then(|v| v.as_i64());
        let cached_tokens = u
            .get("input_tokens_details")
            .and_then(|d| d.get("cached_tokens"))
            .and_then(|v| v.as_i64());
        CanonicalUsage {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: u.get("total_tokens").and_then(|v| v.as_i64()).unwrap_or(prompt + completion),
            reasoning_tokens,
            cached_tokens,
        }
    });

    let usage = usage.or_else(|| {
        let prompt = estimate_prompt_tokens(&req.messages, tokenizer);
        let completion = if content.is_empty() {
            0
        } else {
            estimate_completion_tokens(&content, tokenizer)
        };
        Some(CanonicalUsage {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: prompt + completion,
            reasoning_tokens: None,
            cached_tokens: None,
        })
    });

    Ok(CanonicalResponse {
        id: body.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
        object: "response".to_string(),
        created: body.get("created_at").and_then(|v| v.as_i64()).unwrap_or(0),
        model: body.get("model").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
        choices: vec![CanonicalChoice {
            index: 0,
            message: CanonicalResponseMessage {
                role: Role::Assistant,
                content: if content.is_empty() { None } else { Some(content) },
                reasoning_content: if reasoning.is_empty() { None } else { Some(reasoning) },
                tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
            },
            finish_reason: Some(unified_to_wire(unified)),
        }],
        usage,
    })
}

fn wire_status_to_unified(status: &str) -> UnifiedFinishReason {
    match status {
        "incomplete" => UnifiedFinishReason::LengthLimit,
        "failed" => UnifiedFinishReason::UpstreamError,
        "cancelled" => UnifiedFinishReason::Canceled,
        _ => UnifiedFinishReason::Unknown,
    }
}

pub fn unified_to_wire(reason: UnifiedFinishReason) -> String {
    match reason {
        UnifiedFinishReason::Completed => "stop",
        UnifiedFinishReason::LengthLimit => "length",
        UnifiedFinishReason::ContentFilter => "content_filter",
        UnifiedFinishReason::ToolCalls => "tool_calls",
        UnifiedFinishReason::ClientError => "client_error",
        UnifiedFinishReason::GatewayError => "gateway_error",
        UnifiedFinishReason::UpstreamError => "upstream_error",
        UnifiedFinishReason::Canceled => "canceled",
        UnifiedFinishReason::Unknown => "unknown",
    }
    .to_string()
}

/// Decodes one OpenAI-shaped streaming chunk (`choices[0].delta`) into the
/// canonical stream chunk. The shape is already canonical on the wire, so
/// this is close to a pass-through; it exists to apply `stream_options`
/// usage extraction and keep call sites uniform across families.
pub fn decode_stream_chunk(chunk: &JsonValue) -> Result<CanonicalStreamChunk, TranslateError> {
    let choice = chunk.get("choices").and_then(|c| c.get(0));
    let delta_json = choice.and_then(|c| c.get("delta")).cloned().unwrap_or(JsonValue::Null);

    let delta = CanonicalDelta {
        role: delta_json.get("role").and_then(|v| v.as_str()).map(|r| match r {
            "assistant" => Role::Assistant,
            "tool" => Role::Tool,
            "system" => Role::System,
            _ => Role::User,
        }),
        content: delta_json.get("content").and_then(|v| v.as_str()).map(str::to_string),
        reasoning_content: delta_json
            .get("reasoning_content")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        tool_calls: delta_json.get("tool_calls").and_then(|tc| {
            tc.as_array().map(|array| {
                array
                    .iter()
                    .filter_map(|entry| {
                        Some(llmgate_protocol::ToolCallDelta {
                            index: entry.get("index")?.as_u64()? as u32,
                            id: entry.get("id").and_then(|v| v.as_str()).map(str::to_string),
                            kind: Some(llmgate_protocol::ToolCallKind::Function),
                            function: entry.get("function").map(|f| llmgate_protocol::ToolCallFunctionDelta {
                                name: f.get("name").and_then(|v| v.as_str()).map(str::to_string),
                                arguments: f.get("arguments").and_then(|v| v.as_str()).map(str::to_string),
                            }),
                        })
                    })
                    .collect()
            })
        }),
    };

    let usage = chunk.get("usage").filter(|v| !v.is_null()).map(|u| CanonicalUsage {
        prompt_tokens: u.get("prompt_tokens").and_then(|v| v.as_i64()).unwrap_or(0),
        completion_tokens: u.get("completion_tokens").and_then(|v| v.as_i64()).unwrap_or(0),
        total_tokens: u.get("total_tokens").and_then(|v| v.as_i64()).unwrap_or(0),
        reasoning_tokens: u
            .get("completion_tokens_details")
            .and_then(|d| d.get("reasoning_tokens"))
            .and_then(|v| v.as_i64()),
        cached_tokens: u
            .get("prompt_tokens_details")
            .and_then(|d| d.get("cached_tokens"))
            .and_then(|v| v.as_i64()),
    });

    Ok(CanonicalStreamChunk {
        id: chunk.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
        object: "chat.completion.chunk".to_string(),
        created: chunk.get("created").and_then(|v| v.as_i64()).unwrap_or(0),
        model: chunk.get("model").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
        choices: vec![CanonicalStreamChoice {
            index: 0,
            delta,
            finish_reason: choice.and_then(|c| c.get("finish_reason")).and_then(|v| v.as_str()).map(str::to_string),
        }],
        usage,
    })
}

/// `inference.net`/`together.ai` strip the leading `"{provider}/"` prefix
/// from the model name if present (§4.B "Other OpenAI-compatible providers").
pub fn strip_provider_prefix<'a>(provider_id: &str, model_name: &'a str) -> &'a str {
    if matches!(provider_id, "inference.net" | "together.ai" | "together") {
        let prefix = format!("{provider_id}/");
        if let Some(stripped) = model_name.strip_prefix(prefix.as_str()) {
            return stripped;
        }
    }
    model_name
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmgate_protocol::CanonicalMessage;

    fn base_request() -> CanonicalRequest {
        CanonicalRequest {
            model: "gpt-4o".into(),
            messages: vec![CanonicalMessage::user("hi")],
            stream: false,
            temperature: Some(0.5),
            max_tokens: Some(100),
            top_p: None,
            frequency_penalty: None,
            presence_penalty: None,
            response_format: None,
            tools: None,
            tool_choice: None,
            reasoning_effort: None,
        }
    }

    #[test]
    fn gpt5_forces_temperature_one_and_renames_max_tokens() {
        let body = encode_chat(&base_request(), "gpt-5-mini").unwrap();
        assert_eq!(body["temperature"], 1);
        assert_eq!(body["max_completion_tokens"], 100);
        assert!(body.get("max_tokens").is_none());
    }

    #[test]
    fn streaming_requests_include_usage_option() {
        let mut req = base_request();
        req.stream = true;
        let body = encode_chat(&req, "gpt-4o").unwrap();
        assert_eq!(body["stream_options"]["include_usage"], true);
    }

    #[test]
    fn decodes_tool_calls_from_chat_response() {
        let body = serde_json::json!({
            "id": "resp_1",
            "model": "gpt-4o",
            "choices": [{
                "message": {"role": "assistant", "tool_calls": [{"id": "call_1", "type": "function", "function": {"name": "get_weather", "arguments": "{}"}}]},
                "finish_reason": "tool_calls",
            }],
            "usage": {"prompt_tokens": 5, "completion_tokens": 2, "total_tokens": 7},
        });
        let decoded = decode_chat(&base_request(), &body, None).unwrap();
        let tool_calls = decoded.choices[0].message.tool_calls.as_ref().unwrap();
        assert_eq!(tool_calls[0].function.name, "get_weather");
        assert_eq!(decoded.choices[0].finish_reason.as_deref(), Some("tool_calls"));
    }

    #[test]
    fn decode_responses_estimates_usage_when_upstream_omits_it() {
        let body = serde_json::json!({
            "id": "resp_1",
            "model": "gpt-5",
            "status": "completed",
            "output": [{
                "type": "message",
                "content": [{"text": "hello there"}],
            }],
        });
        let decoded = decode_responses(&base_request(), &body, None).unwrap();
        let usage = decoded.usage.unwrap();
        assert!(usage.prompt_tokens > 0);
        assert!(usage.completion_tokens > 0);
        assert_eq!(usage.total_tokens, usage.prompt_tokens + usage.completion_tokens);
    }

    #[test]
    fn strips_together_ai_prefix() {
        assert_eq!(strip_provider_prefix("together.ai", "together.ai/llama-3"), "llama-3");
        assert_eq!(strip_provider_prefix("groq", "together.ai/llama-3"), "together.ai/llama-3");
    }
}
