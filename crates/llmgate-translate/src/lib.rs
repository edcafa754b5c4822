//! Request/response translation between the gateway's canonical shape and
//! every upstream wire dialect (§4.B). One module per family plus the
//! cross-cutting concerns (image inlining, token estimation, SSE streaming)
//! they all share.

pub mod anthropic;
pub mod error;
pub mod estimate;
pub mod family;
pub mod google;
pub mod image;
pub mod openai;
pub mod stream;
pub mod system_role;
pub mod wire_messages;
pub mod zai;

pub use error::TranslateError;
pub use estimate::{Tokenizer, estimate_completion_tokens, estimate_prompt_tokens};
pub use family::ProviderFamily;
pub use image::{HttpImageFetcher, ImageFetcher, InlinedImage, MAX_IMAGE_BYTES, inline_image};
pub use stream::StreamTranslator;
pub use system_role::strip_system_role;
