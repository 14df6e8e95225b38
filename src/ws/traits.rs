//! Core traits for the WebSocket layer.

/// Message parser trait for converting raw frame bytes into messages.
///
/// Text and binary frames are both handed to the parser as bytes.
///
/// # Example
///
/// ```ignore
/// pub struct SimpleParser;
///
/// impl MessageParser<MyMessage> for SimpleParser {
///     fn parse(&self, bytes: &[u8]) -> crate::Result<MyMessage> {
///         Ok(serde_json::from_slice(bytes).map_err(WsError::MessageParse)?)
///     }
/// }
/// ```
pub trait MessageParser<M>: Send + Sync + 'static {
    /// Parse one inbound frame.
    fn parse(&self, bytes: &[u8]) -> crate::Result<M>;
}
