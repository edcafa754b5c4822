//! Stateful per-connection streaming dispatch (§4.B "Streaming").
//!
//! Wraps an [`SseParser`] and routes each decoded upstream frame to the
//! right family's stream-decode function. A frame that fails to parse is
//! logged and dropped; only a failure to make any progress at all on the
//! whole chunk closes the stream (the caller decides that from an empty
//! return plus an upstream EOF, not from this type).

use bytes::Bytes;
use llmgate_protocol::{CanonicalStreamChunk, SseEvent, SseParser};
use tracing::warn;

use crate::anthropic::AnthropicStreamState;
use crate::family::ProviderFamily;
use crate::google;
use crate::openai;

/// Accumulates tool-call argument fragments across chunks, keyed by the
/// `tool_calls[].index` both OpenAI and the Anthropic translation agree on,
/// so a final usage/log record can carry whole tool calls instead of
/// fragments.
#[derive(Debug, Default, Clone)]
struct ToolCallAccumulator {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

pub struct StreamTranslator {
    family: ProviderFamily,
    parser: SseParser,
    anthropic_state: AnthropicStreamState,
    tool_calls: std::collections::BTreeMap<u32, ToolCallAccumulator>,
}

impl StreamTranslator {
    pub fn new(family: ProviderFamily) -> Self {
        Self {
            family,
            parser: SseParser::new(),
            anthropic_state: AnthropicStreamState::new(),
            tool_calls: std::collections::BTreeMap::new(),
        }
    }

    /// Feeds a raw chunk of bytes off the upstream connection and returns
    /// every canonical stream chunk it produced, in order.
    pub fn push(&mut self, bytes: &Bytes) -> Vec<CanonicalStreamChunk> {
        let events = self.parser.push_bytes(bytes);
        self.decode_events(events)
    }

    pub fn finish(&mut self) -> Vec<CanonicalStreamChunk> {
        let events = self.parser.finish();
        self.decode_events(events)
    }

    fn decode_events(&mut self, events: Vec<SseEvent>) -> Vec<CanonicalStreamChunk> {
        let mut chunks = Vec::with_capacity(events.len());
        for event in events {
            if event.data.trim() == "[DONE]" {
                continue;
            }
            match self.decode_one(&event) {
                Ok(Some(chunk)) => {
                    self.absorb_tool_calls(&chunk);
                    chunks.push(chunk);
                }
                Ok(None) => {}
                Err(err) => warn!(family = ?self.family, error = %err, "dropping unparseable stream frame"),
            }
        }
        chunks
    }

    fn decode_one(&mut self, event: &SseEvent) -> Result<Option<CanonicalStreamChunk>, crate::error::TranslateError> {
        match self.family {
            ProviderFamily::Anthropic => {
                let parsed: llmgate_protocol::anthropic::AnthropicStreamEvent =
                    serde_json::from_str(&event.data).map_err(|e| crate::error::TranslateError::internal(e.to_string()))?;
                Ok(self.anthropic_state.apply(&parsed))
            }
            ProviderFamily::Google => {
                let parsed: llmgate_protocol::google::GoogleStreamChunk =
                    serde_json::from_str(&event.data).map_err(|e| crate::error::TranslateError::internal(e.to_string()))?;
                Ok(Some(google::decode_stream_chunk(&parsed)?))
            }
            ProviderFamily::OpenAiChat | ProviderFamily::OpenAiResponses | ProviderFamily::GenericOpenAiCompatible => {
                let parsed: serde_json::Value =
                    serde_json::from_str(&event.data).map_err(|e| crate::error::TranslateError::internal(e.to_string()))?;
                Ok(Some(openai::decode_stream_chunk(&parsed)?))
            }
        }
    }

    fn absorb_tool_calls(&mut self, chunk: &CanonicalStreamChunk) {
        let Some(delta) = chunk.choices.first().map(|c| &c.delta) else {
            return;
        };
        let Some(deltas) = &delta.tool_calls else {
            return;
        };
        for delta in deltas {
            let entry = self.tool_calls.entry(delta.index).or_default();
            if let Some(id) = &delta.id {
                entry.id = Some(id.clone());
            }
            if let Some(function) = &delta.function {
                if let Some(name) = &function.name {
                    entry.name = Some(name.clone());
                }
                if let Some(arguments) = &function.arguments {
                    entry.arguments.push_str(arguments);
                }
            }
        }
    }

    /// The fully coalesced tool calls seen across the stream so far, for a
    /// final usage/log record — `None` once the stream carried none.
    pub fn coalesced_tool_calls(&self) -> Option<Vec<llmgate_protocol::ToolCall>> {
        if self.tool_calls.is_empty() {
            return None;
        }
        Some(
            self.tool_calls
                .values()
                .map(|acc| llmgate_protocol::ToolCall {
                    id: acc.id.clone().unwrap_or_default(),
                    kind: llmgate_protocol::ToolCallKind::Function,
                    function: llmgate_protocol::ToolCallFunction {
                        name: acc.name.clone().unwrap_or_default(),
                        arguments: acc.arguments.clone(),
                    },
                })
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_done_sentinel_without_emitting_a_chunk() {
        let mut translator = StreamTranslator::new(ProviderFamily::OpenAiChat);
        let chunks = translator.push(&Bytes::from_static(b"data: [DONE]\n\n"));
        assert!(chunks.is_empty());
    }

    #[test]
    fn logs_and_skips_invalid_frame_without_losing_later_ones() {
        let mut translator = StreamTranslator::new(ProviderFamily::OpenAiChat);
        let mut chunks = translator.push(&Bytes::from_static(b"data: not json\n\n"));
        assert!(chunks.is_empty());
        chunks = translator.push(&Bytes::from_static(
            b"data: {\"id\":\"1\",\"model\":\"gpt-4o\",\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\n\n",
        ));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].choices[0].delta.content.as_deref(), Some("hi"));
    }

    #[test]
    fn coalesces_tool_call_argument_fragments_across_chunks() {
        let mut translator = StreamTranslator::new(ProviderFamily::OpenAiChat);
        translator.push(&Bytes::from_static(
            b"data: {\"id\":\"1\",\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",\"function\":{\"name\":\"lookup\",\"arguments\":\"{\\\"q\\\":\"}}]}}]}\n\n",
        ));
        translator.push(&Bytes::from_static(
            b"data: {\"id\":\"1\",\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"\\\"weather\\\"}\"}}]}}]}\n\n",
        ));
        let calls = translator.coalesced_tool_calls().unwrap();
        assert_eq!(calls[0].function.name, "lookup");
        assert_eq!(calls[0].function.arguments, "{\"q\":\"weather\"}");
    }
}
