/// Errors from the underlying key-value store. Every limiter treats these
/// as fail-open (§4.D): the call is logged and the request proceeds.
#[derive(Debug, Clone, thiserror::Error)]
pub enum KvError {
    #[error("kv store unavailable: {0}")]
    Unavailable(String),
    #[error("kv store returned an unexpected reply: {0}")]
    Protocol(String),
}
