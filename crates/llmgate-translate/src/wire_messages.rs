//! Shared OpenAI-shaped message wire encoding used by every family that
//! speaks (a dialect of) chat-completions: OpenAI itself, the Responses
//! API's `input` array, and every generic OpenAI-compatible provider.

use llmgate_protocol::{CanonicalMessage, ContentPart, MessageContent, Role, ToolCall};
use serde_json::{Value as JsonValue, json};

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn content_part_json(part: &ContentPart) -> Option<JsonValue> {
    match part {
        ContentPart::Text { text } => Some(json!({"type": "text", "text": text})),
        ContentPart::ImageUrl { image_url } => Some(json!({
            "type": "image_url",
            "image_url": {
                "url": image_url.url,
                "detail": image_url.detail,
            }
        })),
        // Tool use/result parts are surfaced through `tool_calls` /
        // `tool_call_id` instead of inline content parts on the wire.
        ContentPart::ToolUse { .. } | ContentPart::ToolResult { .. } => None,
    }
}

fn content_json(content: &MessageContent) -> JsonValue {
    match content {
        MessageContent::Text(text) => JsonValue::String(text.clone()),
        MessageContent::Parts(parts) => {
            let mapped: Vec<JsonValue> = parts.iter().filter_map(content_part_json).collect();
            JsonValue::Array(mapped)
        }
    }
}

fn tool_calls_from_content(content: &MessageContent) -> Option<Vec<JsonValue>> {
    let MessageContent::Parts(parts) = content else {
        return None;
    };
    let calls: Vec<JsonValue> = parts
        .iter()
        .filter_map(|part| match part {
            ContentPart::ToolUse { id, name, input } => Some(json!({
                "id": id,
                "type": "function",
                "function": {
                    "name": name,
                    "arguments": input.to_string(),
                }
            })),
            _ => None,
        })
        .collect();
    if calls.is_empty() { None } else { Some(calls) }
}

/// One `messages[]` entry in the OpenAI chat-completions wire shape.
pub fn to_openai_message(message: &CanonicalMessage) -> JsonValue {
    if message.role == Role::Tool {
        return json!({
            "role": "tool",
            "tool_call_id": message.tool_call_id,
            "content": message.content.as_text(),
        });
    }

    let tool_calls = tool_calls_from_content(&message.content);
    let mut obj = serde_json::Map::new();
    obj.insert("role".into(), JsonValue::String(role_str(message.role).into()));

    if let Some(calls) = tool_calls {
        obj.insert("tool_calls".into(), JsonValue::Array(calls));
        let text = message.content.as_text();
        if !text.is_empty() {
            obj.insert("content".into(), JsonValue::String(text));
        } else {
            obj.insert("content".into(), JsonValue::Null);
        }
    } else {
        obj.insert("content".into(), content_json(&message.content));
    }

    if let Some(name) = &message.name {
        obj.insert("name".into(), JsonValue::String(name.clone()));
    }

    JsonValue::Object(obj)
}

pub fn to_openai_messages(messages: &[CanonicalMessage]) -> Vec<JsonValue> {
    messages.iter().map(to_openai_message).collect()
}

/// Parses `choices[0].message.tool_calls` (OpenAI wire shape) back into
/// canonical tool calls.
pub fn tool_calls_from_openai_json(value: &JsonValue) -> Option<Vec<ToolCall>> {
    let array = value.as_array()?;
    if array.is_empty() {
        return None;
    }
    let mut out = Vec::with_capacity(array.len());
    for entry in array {
        let id = entry.get("id")?.as_str()?.to_string();
        let function = entry.get("function")?;
        let name = function.get("name")?.as_str()?.to_string();
        let arguments = function
            .get("arguments")
            .and_then(|v| v.as_str())
            .unwrap_or("{}")
            .to_string();
        out.push(ToolCall {
            id,
            kind: llmgate_protocol::ToolCallKind::Function,
            function: llmgate_protocol::ToolCallFunction { name, arguments },
        });
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmgate_protocol::ImageUrl;

    #[test]
    fn tool_role_message_carries_tool_call_id() {
        let message = CanonicalMessage {
            role: Role::Tool,
            content: MessageContent::Text("42".into()),
            name: None,
            tool_call_id: Some("call_1".into()),
        };
        let wire = to_openai_message(&message);
        assert_eq!(wire["tool_call_id"], "call_1");
        assert_eq!(wire["content"], "42");
    }

    #[test]
    fn assistant_tool_use_becomes_tool_calls_array() {
        let message = CanonicalMessage {
            role: Role::Assistant,
            content: MessageContent::Parts(vec![ContentPart::ToolUse {
                id: "call_1".into(),
                name: "get_weather".into(),
                input: serde_json::json!({"city": "nyc"}),
            }]),
            name: None,
            tool_call_id: None,
        };
        let wire = to_openai_message(&message);
        assert_eq!(wire["tool_calls"][0]["function"]["name"], "get_weather");
    }

    #[test]
    fn image_part_becomes_image_url_block() {
        let message = CanonicalMessage {
            role: Role::User,
            content: MessageContent::Parts(vec![ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: "https://example.com/a.png".into(),
                    detail: None,
                },
            }]),
            name: None,
            tool_call_id: None,
        };
        let wire = to_openai_message(&message);
        assert_eq!(wire["content"][0]["type"], "image_url");
    }
}
