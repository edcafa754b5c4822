//! Anthropic Messages API encode/decode (§4.B).

use llmgate_protocol::anthropic::{
    AnthropicContentBlock, AnthropicImageSource, AnthropicMessage, AnthropicRequest, AnthropicResponse,
    AnthropicStreamDelta, AnthropicStreamEvent, AnthropicThinking, AnthropicTool, AnthropicUsage, map_stop_reason,
};
use llmgate_protocol::{
    CanonicalChoice, CanonicalDelta, CanonicalMessage, CanonicalRequest, CanonicalResponse,
    CanonicalResponseMessage, CanonicalStreamChoice, CanonicalStreamChunk, CanonicalUsage, ContentPart,
    MessageContent, Role, ToolCall, ToolCallFunction, ToolCallKind, ToolChoice, ToolChoiceMode, ToolDefinition,
};
use serde_json::{Value as JsonValue, json};

use crate::error::TranslateError;
use crate::image::{ImageFetcher, inline_image};
use crate::openai::unified_to_wire;

/// `low=1024, medium=2000, high=4000` (§4.B); `minimal` is not named by the
/// spec's thinking-budget table and is treated as the smallest budget.
fn thinking_budget_tokens(effort: llmgate_protocol::ReasoningEffort) -> i64 {
    use llmgate_protocol::ReasoningEffort as E;
    match effort {
        E::Minimal => 1024,
        E::Low => 1024,
        E::Medium => 2000,
        E::High => 4000,
    }
}

fn placeholder_text_block(reason: &str) -> AnthropicContentBlock {
    AnthropicContentBlock::Text {
        text: format!("[image omitted: {reason}]"),
    }
}

async fn content_blocks_for(
    message: &CanonicalMessage,
    fetcher: &dyn ImageFetcher,
    enforce_https: bool,
) -> Vec<AnthropicContentBlock> {
    match &message.content {
        MessageContent::Text(text) => vec![AnthropicContentBlock::Text { text: text.clone() }],
        MessageContent::Parts(parts) => {
            let mut blocks = Vec::with_capacity(parts.len());
            for part in parts {
                match part {
                    ContentPart::Text { text } => blocks.push(AnthropicContentBlock::Text { text: text.clone() }),
                    ContentPart::ImageUrl { image_url } => {
                        match inline_image(&image_url.url, fetcher, enforce_https).await {
                            Ok(inlined) => blocks.push(AnthropicContentBlock::Image {
                                source: AnthropicImageSource {
                                    kind: "base64".to_string(),
                                    media_type: inlined.mime_type,
                                    data: inlined.base64_data,
                                },
                            }),
                            // Anthropic is the one family allowed to substitute a
                            // placeholder instead of failing the whole request (§4.B).
                            Err(err) => blocks.push(placeholder_text_block(&err.to_string())),
                        }
                    }
                    ContentPart::ToolUse { id, name, input } => blocks.push(AnthropicContentBlock::ToolUse {
                        id: id.clone(),
                        name: name.clone(),
                        input: input.clone(),
                    }),
                    ContentPart::ToolResult { tool_use_id, content, is_error } => {
                        blocks.push(AnthropicContentBlock::ToolResult {
                            tool_use_id: tool_use_id.clone(),
                            content: content.clone(),
                            is_error: *is_error,
                        })
                    }
                }
            }
            blocks
        }
    }
}

fn tool_choice_to_anthropic(choice: &ToolChoice) -> Option<JsonValue> {
    match choice {
        ToolChoice::Mode(ToolChoiceMode::Auto) => None,
        ToolChoice::Mode(ToolChoiceMode::None) => Some(json!({"type": "none"})),
        ToolChoice::Mode(ToolChoiceMode::Required) => Some(json!({"type": "any"})),
        ToolChoice::Function { function, .. } => Some(json!({"type": "tool", "name": function.name})),
    }
}

/// Encodes a canonical request into the Anthropic wire shape: system
/// messages merged into a leading user turn, `max_tokens` floored, and
/// `thinking` populated when reasoning is requested (§4.B).
pub async fn encode(
    req: &CanonicalRequest,
    wire_model: &str,
    supports_reasoning: bool,
    fetcher: &dyn ImageFetcher,
    enforce_https: bool,
) -> Result<AnthropicRequest, TranslateError> {
    let mut system_text = String::new();
    let mut messages = Vec::new();

    for message in &req.messages {
        if message.role == Role::System {
            if !system_text.is_empty() {
                system_text.push('\n');
            }
            system_text.push_str(&message.content.as_text());
            continue;
        }
        let role = if message.role == Role::Tool { "user".to_string() } else {
            match message.role {
                Role::Assistant => "assistant".to_string(),
                _ => "user".to_string(),
            }
        };
        let blocks = if message.role == Role::Tool {
            vec![AnthropicContentBlock::ToolResult {
                tool_use_id: message.tool_call_id.clone().unwrap_or_default(),
                content: message.content.as_text(),
                is_error: None,
            }]
        } else {
            content_blocks_for(message, fetcher, enforce_https).await
        };
        messages.push(AnthropicMessage { role, content: blocks });
    }

    let thinking = req.reasoning_effort.filter(|_| supports_reasoning).map(|effort| AnthropicThinking {
        kind: "enabled".to_string(),
        budget_tokens: thinking_budget_tokens(effort),
    });

    let thinking_budget = thinking.as_ref().map(|t| t.budget_tokens).unwrap_or(0);
    let max_tokens = req
        .max_tokens
        .unwrap_or(1024)
        .max(1024)
        .max(thinking_budget + 1000);

    let tools = req.tools.as_ref().map(|tools| {
        tools
            .iter()
            .map(|t| {
                let ToolDefinition::Function { function } = t;
                AnthropicTool {
                    name: function.name.clone(),
                    description: function.description.clone(),
                    input_schema: function.parameters.clone().unwrap_or_else(|| json!({"type": "object"})),
                }
            })
            .collect()
    });

    Ok(AnthropicRequest {
        model: wire_model.to_string(),
        max_tokens,
        messages,
        system: if system_text.is_empty() { None } else { Some(system_text) },
        temperature: req.temperature,
        top_p: req.top_p,
        stream: req.stream,
        tools,
        tool_choice: req.tool_choice.as_ref().and_then(tool_choice_to_anthropic),
        thinking,
    })
}

/// Concatenates text/thinking content blocks and translates `tool_use`
/// blocks into canonical tool calls (§4.B).
pub fn decode(response: &AnthropicResponse) -> CanonicalResponse {
    let mut text = String::new();
    let mut reasoning = String::new();
    let mut tool_calls = Vec::new();

    for block in &response.content {
        match block {
            AnthropicContentBlock::Text { text: t } => text.push_str(t),
            AnthropicContentBlock::Thinking { thinking, .. } => reasoning.push_str(thinking),
            AnthropicContentBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                id: id.clone(),
                kind: ToolCallKind::Function,
                function: ToolCallFunction {
                    name: name.clone(),
                    arguments: input.to_string(),
                },
            }),
            AnthropicContentBlock::Image { .. } | AnthropicContentBlock::ToolResult { .. } => {}
        }
    }

    let unified = if !tool_calls.is_empty() {
        llmgate_protocol::UnifiedFinishReason::ToolCalls
    } else {
        map_stop_reason(response.stop_reason.as_deref())
    };

    let reasoning_tokens = response.usage.reasoning_output_tokens;
    let total = response.usage.input_tokens + response.usage.output_tokens + reasoning_tokens;
    CanonicalResponse {
        id: response.id.clone(),
        object: "chat.completion".to_string(),
        created: 0,
        model: response.model.clone(),
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
            prompt_tokens: response.usage.input_tokens,
            completion_tokens: response.usage.output_tokens,
            total_tokens: total,
            reasoning_tokens: if reasoning_tokens > 0 { Some(reasoning_tokens) } else { None },
            cached_tokens: if response.usage.cache_read_input_tokens > 0 {
                Some(response.usage.cache_read_input_tokens)
            } else {
                None
            },
        }),
    }
}

/// Streaming accumulator state for one Anthropic SSE connection; tool-call
/// argument fragments arrive as `input_json_delta` events keyed by content
/// block index and must be coalesced the same way OpenAI coalesces by
/// `tool_calls[].index` (§4.B "Streaming").
#[derive(Default)]
pub struct AnthropicStreamState {
    message_id: String,
    model: String,
}

impl AnthropicStreamState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: &AnthropicStreamEvent) -> Option<CanonicalStreamChunk> {
        match event {
            AnthropicStreamEvent::MessageStart { message } => {
                self.message_id = message.id.clone();
                self.model = message.model.clone();
                None
            }
            AnthropicStreamEvent::ContentBlockStart { index, content_block } => {
                if let AnthropicContentBlock::ToolUse { id, name, .. } = content_block {
                    return Some(self.chunk(CanonicalDelta {
                        role: None,
                        content: None,
                        reasoning_content: None,
                        tool_calls: Some(vec![llmgate_protocol::ToolCallDelta {
                            index: *index,
                            id: Some(id.clone()),
                            kind: Some(ToolCallKind::Function),
                            function: Some(llmgate_protocol::ToolCallFunctionDelta {
                                name: Some(name.clone()),
                                arguments: Some(String::new()),
                            }),
                        }]),
                    }, None));
                }
                None
            }
            AnthropicStreamEvent::ContentBlockDelta { index, delta } => match delta {
                AnthropicStreamDelta::TextDelta { text } => Some(self.chunk(CanonicalDelta {
                    role: None,
                    content: Some(text.clone()),
                    reasoning_content: None,
                    tool_calls: None,
                }, None)),
                AnthropicStreamDelta::ThinkingDelta { thinking } => Some(self.chunk(CanonicalDelta {
                    role: None,
                    content: None,
                    reasoning_content: Some(thinking.clone()),
                    tool_calls: None,
                }, None)),
                AnthropicStreamDelta::InputJsonDelta { partial_json } => Some(self.chunk(CanonicalDelta {
                    role: None,
                    content: None,
                    reasoning_content: None,
                    tool_calls: Some(vec![llmgate_protocol::ToolCallDelta {
                        index: *index,
                        id: None,
                        kind: None,
                        function: Some(llmgate_protocol::ToolCallFunctionDelta {
                            name: None,
                            arguments: Some(partial_json.clone()),
                        }),
                    }]),
                }, None)),
                AnthropicStreamDelta::Other => None,
            },
            AnthropicStreamEvent::MessageDelta { delta, usage } => {
                let unified = map_stop_reason(delta.stop_reason.as_deref());
                let canonical_usage = usage.map(usage_to_canonical);
                Some(self.chunk(CanonicalDelta::default(), Some((unified_to_wire(unified), canonical_usage))))
            }
            AnthropicStreamEvent::ContentBlockStop { .. }
            | AnthropicStreamEvent::MessageStop
            | AnthropicStreamEvent::Ping
            | AnthropicStreamEvent::Other => None,
        }
    }

    fn chunk(&self, delta: CanonicalDelta, finish: Option<(String, Option<CanonicalUsage>)>) -> CanonicalStreamChunk {
        let (finish_reason, usage) = match finish {
            Some((reason, usage)) => (Some(reason), usage),
            None => (None, None),
        };
        CanonicalStreamChunk {
            id: self.message_id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: 0,
            model: self.model.clone(),
            choices: vec![CanonicalStreamChoice { index: 0, delta, finish_reason }],
            usage,
        }
    }
}

fn usage_to_canonical(usage: &AnthropicUsage) -> CanonicalUsage {
    CanonicalUsage {
        prompt_tokens: usage.input_tokens,
        completion_tokens: usage.output_tokens,
        total_tokens: usage.input_tokens + usage.output_tokens + usage.reasoning_output_tokens,
        reasoning_tokens: if usage.reasoning_output_tokens > 0 {
            Some(usage.reasoning_output_tokens)
        } else {
            None
        },
        cached_tokens: if usage.cache_read_input_tokens > 0 {
            Some(usage.cache_read_input_tokens)
        } else {
            None
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmgate_protocol::anthropic::AnthropicStreamMessageStart;

    #[test]
    fn decode_concatenates_text_and_thinking_blocks() {
        let response = AnthropicResponse {
            id: "msg_1".into(),
            model: "claude-3-5-sonnet".into(),
            role: "assistant".into(),
            content: vec![
                AnthropicContentBlock::Thinking { thinking: "pondering".into(), signature: None },
                AnthropicContentBlock::Text { text: "hello".into() },
            ],
            stop_reason: Some("end_turn".into()),
            usage: AnthropicUsage {
                input_tokens: 3,
                output_tokens: 2,
                cache_read_input_tokens: 0,
                cache_creation_input_tokens: 0,
                reasoning_output_tokens: 0,
            },
        };
        let decoded = decode(&response);
        assert_eq!(decoded.choices[0].message.content.as_deref(), Some("hello"));
        assert_eq!(decoded.choices[0].message.reasoning_content.as_deref(), Some("pondering"));
        assert_eq!(decoded.usage.unwrap().total_tokens, 5);
    }

    #[test]
    fn decode_bills_extended_thinking_tokens_as_reasoning() {
        let response = AnthropicResponse {
            id: "msg_4".into(),
            model: "claude-sonnet-4-5".into(),
            role: "assistant".into(),
            content: vec![AnthropicContentBlock::Text { text: "hi".into() }],
            stop_reason: Some("end_turn".into()),
            usage: AnthropicUsage {
                input_tokens: 10,
                output_tokens: 5,
                cache_read_input_tokens: 0,
                cache_creation_input_tokens: 0,
                reasoning_output_tokens: 40,
            },
        };
        let decoded = decode(&response);
        let usage = decoded.usage.unwrap();
        assert_eq!(usage.reasoning_tokens, Some(40));
        assert_eq!(usage.total_tokens, 55);
    }

    #[test]
    fn tool_use_block_forces_tool_calls_finish_reason() {
        let response = AnthropicResponse {
            id: "msg_2".into(),
            model: "claude-3-5-sonnet".into(),
            role: "assistant".into(),
            content: vec![AnthropicContentBlock::ToolUse {
                id: "toolu_1".into(),
                name: "lookup".into(),
                input: json!({"q": "weather"}),
            }],
            stop_reason: Some("tool_use".into()),
            usage: AnthropicUsage::default(),
        };
        let decoded = decode(&response);
        assert_eq!(decoded.choices[0].finish_reason.as_deref(), Some("tool_calls"));
    }

    #[test]
    fn stream_state_tracks_message_id_across_events() {
        let mut state = AnthropicStreamState::new();
        state.apply(&AnthropicStreamEvent::MessageStart {
            message: AnthropicStreamMessageStart {
                id: "msg_3".into(),
                model: "claude-3-5-sonnet".into(),
                usage: AnthropicUsage::default(),
            },
        });
        let chunk = state
            .apply(&AnthropicStreamEvent::ContentBlockDelta {
                index: 0,
                delta: AnthropicStreamDelta::TextDelta { text: "hi".into() },
            })
            .unwrap();
        assert_eq!(chunk.id, "msg_3");
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("hi"));
    }
}
