//! Wire and canonical request/response types for the gateway (§4.B), plus
//! the generic SSE line-buffering parser shared by every provider family.

pub mod anthropic;
pub mod canonical;
pub mod google;
pub mod sse;

pub use canonical::{
    CanonicalChoice, CanonicalDelta, CanonicalMessage, CanonicalRequest, CanonicalResponse,
    CanonicalResponseMessage, CanonicalStreamChoice, CanonicalStreamChunk, CanonicalUsage,
    ContentPart, FunctionDefinition, ImageUrl, MessageContent, ReasoningEffort, Role, ToolCall,
    ToolCallDelta, ToolCallFunction, ToolCallFunctionDelta, ToolCallKind, ToolChoice,
    ToolChoiceFunctionName, ToolChoiceFunctionTag, ToolChoiceMode, ToolDefinition,
    UnifiedFinishReason,
};
pub use sse::{SseEvent, SseParser};
