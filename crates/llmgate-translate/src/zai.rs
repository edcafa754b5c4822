//! ZAI's `finish_reason` quirk on `glm-4.5-airx` / `glm-4.5-flash` (§4.B
//! "ZAI quirk"): when the conversation's last turn was already a tool
//! result and the model echoes new tool calls anyway, the upstream's
//! `finish_reason: tool_calls` is treated as spurious and rewritten.

use llmgate_protocol::{CanonicalRequest, CanonicalResponse, Role};

use crate::openai::unified_to_wire;

fn is_affected_model(wire_model: &str) -> bool {
    matches!(wire_model, "glm-4.5-airx" | "glm-4.5-flash")
}

/// Mutates a decoded chat response in place, matching the quirk described
/// in §4.B exactly (model id, "last message was a tool result", "response
/// claims `finish_reason=tool_calls` with new tool calls").
pub fn apply_quirk(wire_model: &str, req: &CanonicalRequest, response: &mut CanonicalResponse) {
    if !is_affected_model(wire_model) {
        return;
    }
    let last_was_tool_result = matches!(req.messages.last(), Some(m) if m.role == Role::Tool);
    if !last_was_tool_result {
        return;
    }
    let Some(choice) = response.choices.first_mut() else {
        return;
    };
    let claims_tool_calls = choice.finish_reason.as_deref() == Some("tool_calls");
    let has_new_tool_calls = choice
        .message
        .tool_calls
        .as_ref()
        .is_some_and(|calls| !calls.is_empty());

    if claims_tool_calls && has_new_tool_calls {
        choice.message.tool_calls = None;
        choice.finish_reason = Some(unified_to_wire(llmgate_protocol::UnifiedFinishReason::Completed));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmgate_protocol::{
        CanonicalChoice, CanonicalMessage, CanonicalResponseMessage, MessageContent, ToolCall, ToolCallFunction,
        ToolCallKind,
    };

    fn req_with_trailing_tool_result() -> CanonicalRequest {
        CanonicalRequest {
            model: "glm-4.5-airx".into(),
            messages: vec![CanonicalMessage {
                role: Role::Tool,
                content: MessageContent::Text("42".into()),
                name: None,
                tool_call_id: Some("call_1".into()),
            }],
            stream: false,
            temperature: None,
            max_tokens: None,
            top_p: None,
            frequency_penalty: None,
            presence_penalty: None,
            response_format: None,
            tools: None,
            tool_choice: None,
            reasoning_effort: None,
        }
    }

    fn response_with_tool_calls() -> CanonicalResponse {
        CanonicalResponse {
            id: "1".into(),
            object: "chat.completion".into(),
            created: 0,
            model: "glm-4.5-airx".into(),
            choices: vec![CanonicalChoice {
                index: 0,
                message: CanonicalResponseMessage {
                    role: Role::Assistant,
                    content: None,
                    reasoning_content: None,
                    tool_calls: Some(vec![ToolCall {
                        id: "call_2".into(),
                        kind: ToolCallKind::Function,
                        function: ToolCallFunction { name: "again".into(), arguments: "{}".into() },
                    }]),
                },
                finish_reason: Some("tool_calls".into()),
            }],
            usage: None,
        }
    }

    #[test]
    fn rewrites_spurious_tool_calls_after_tool_result() {
        let req = req_with_trailing_tool_result();
        let mut response = response_with_tool_calls();
        apply_quirk("glm-4.5-airx", &req, &mut response);
        assert!(response.choices[0].message.tool_calls.is_none());
        assert_eq!(response.choices[0].finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn leaves_other_models_untouched() {
        let req = req_with_trailing_tool_result();
        let mut response = response_with_tool_calls();
        apply_quirk("glm-4.5", &req, &mut response);
        assert!(response.choices[0].message.tool_calls.is_some());
    }
}
