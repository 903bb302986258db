//! Decoded message content.

use chrono::{DateTime, Utc};

/// Structured content extracted from an XMPP stanza.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StanzaContent {
    /// Root element name, e.g. `message`.
    pub element: String,
    /// Text of the `body` child, if any.
    pub body: Option<String>,
    /// The stanza as received.
    pub xml: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageContent {
    Text(String),
    Stanza(StanzaContent),
}

impl MessageContent {
    /// Human readable text, if the content has any.
    pub fn text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(text) => Some(text),
            MessageContent::Stanza(stanza) => stanza.body.as_deref(),
        }
    }
}

/// Envelope headers of a decrypted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    pub from: String,
    pub to: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
#[error("stanza parse error: {0}")]
pub struct StanzaError(pub String);

/// Parses stanzas carried as `application/xmpp+xml`. Implemented by the
/// protocol layer.
pub trait StanzaParser: Send + Sync {
    fn parse(&self, xml: &str) -> Result<StanzaContent, StanzaError>;
}
