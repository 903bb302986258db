//! Inner message envelope.
//!
//! The envelope is the literal data of every encrypted message. It repeats
//! sender and recipients inside the encrypted payload so that a message
//! replayed to someone else, or under another sender address, is detected
//! after decryption.
//!
//! ```text
//! From: Alice <alice@example.org>
//! To: Bob <bob@example.org>
//! DateTime: 2024-05-01T10:00:00Z
//!
//! Content-Type: text/plain; charset=utf-8
//!
//! hello
//! ```

use std::fmt;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use tracing::warn;

use crate::status::{CoderError, ErrorSet};

const CRLF: &str = "\r\n";

const HEADER_FROM: &str = "From";
const HEADER_TO: &str = "To";
const HEADER_DATETIME: &str = "DateTime";
const HEADER_CONTENT_TYPE: &str = "Content-Type";

/// Root element wrapping structured content.
pub const XMPP_WRAPPER_OPEN: &str = "<xmpp xmlns='jabber:client'>";
pub const XMPP_WRAPPER_CLOSE: &str = "</xmpp>";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    #[error("envelope truncated")]
    Truncated,
    #[error("envelope header is not valid UTF-8")]
    InvalidUtf8,
    #[error("malformed header line: {0}")]
    MalformedHeader(String),
    #[error("unknown header: {0}")]
    UnknownHeader(String),
    #[error("duplicate header: {0}")]
    DuplicateHeader(&'static str),
    #[error("missing header: {0}")]
    MissingHeader(&'static str),
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),
    #[error("unsupported charset: {0}")]
    UnsupportedCharset(String),
    #[error("envelope has no recipients")]
    NoRecipients,
    #[error("identity contains a line break or a list separator")]
    InvalidIdentity,
}

/// Payload type of the envelope body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    /// `text/plain; charset=utf-8`
    PlainText,
    /// `application/xmpp+xml`: an XMPP stanza wrapped in [`XMPP_WRAPPER_OPEN`].
    XmppStanza,
}

impl ContentType {
    pub fn mime(&self) -> &'static str {
        match self {
            ContentType::PlainText => "text/plain",
            ContentType::XmppStanza => "application/xmpp+xml",
        }
    }

    fn header_value(&self) -> String {
        format!("{}; charset=utf-8", self.mime())
    }

    fn parse(value: &str) -> Result<Self, EnvelopeError> {
        let mut params = value.split(';').map(str::trim);
        let mime = params.next().unwrap_or_default().to_ascii_lowercase();
        let content_type = match mime.as_str() {
            "text/plain" => ContentType::PlainText,
            "application/xmpp+xml" => ContentType::XmppStanza,
            _ => return Err(EnvelopeError::UnsupportedContentType(mime)),
        };
        for param in params.filter(|p| !p.is_empty()) {
            let (name, val) = param
                .split_once('=')
                .ok_or_else(|| EnvelopeError::MalformedHeader(param.to_string()))?;
            if name.trim().eq_ignore_ascii_case("charset") {
                let charset = val.trim().trim_matches('"');
                if !charset.eq_ignore_ascii_case("utf-8") && !charset.eq_ignore_ascii_case("us-ascii") {
                    return Err(EnvelopeError::UnsupportedCharset(charset.to_string()));
                }
            }
        }
        Ok(content_type)
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime())
    }
}

/// Decoded envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub from: String,
    pub to: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub content_type: ContentType,
    pub body: Vec<u8>,
}

/// Envelope plus the identity-binding errors found while opening it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedEnvelope {
    pub envelope: Envelope,
    pub errors: ErrorSet,
}

fn check_identity(identity: &str) -> Result<(), EnvelopeError> {
    if identity.contains(['\r', '\n']) || split_recipients(identity).len() > 1 {
        return Err(EnvelopeError::InvalidIdentity);
    }
    Ok(())
}

/// Split a `To` value on `;` separators outside comments, quoted strings
/// and angle-bracketed addresses.
fn split_recipients(value: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quoted = false;
    let mut start = 0;
    for (i, c) in value.char_indices() {
        match c {
            '"' => quoted = !quoted,
            '(' | '<' if !quoted => depth += 1,
            ')' | '>' if !quoted => depth = depth.saturating_sub(1),
            ';' if !quoted && depth == 0 => {
                parts.push(&value[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&value[start..]);
    parts
}

impl Envelope {
    pub fn new(
        from: impl Into<String>,
        to: Vec<String>,
        timestamp: DateTime<Utc>,
        content_type: ContentType,
        body: impl Into<Vec<u8>>,
    ) -> Result<Self, EnvelopeError> {
        // The wire format carries milliseconds.
        let timestamp = timestamp.trunc_subsecs(3);
        let from = from.into();
        check_identity(&from)?;
        if to.is_empty() {
            return Err(EnvelopeError::NoRecipients);
        }
        for recipient in &to {
            check_identity(recipient)?;
        }
        Ok(Self {
            from,
            to,
            timestamp,
            content_type,
            body: body.into(),
        })
    }

    /// Plain text envelope stamped with the current time.
    pub fn text(from: &str, to: Vec<String>, text: &str) -> Result<Self, EnvelopeError> {
        Self::new(from, to, Utc::now(), ContentType::PlainText, text)
    }

    /// Stanza envelope; `stanza` is wrapped in the XMPP root element.
    pub fn stanza(from: &str, to: Vec<String>, stanza: &str) -> Result<Self, EnvelopeError> {
        let body = format!("{XMPP_WRAPPER_OPEN}{stanza}{XMPP_WRAPPER_CLOSE}");
        Self::new(from, to, Utc::now(), ContentType::XmppStanza, body)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = String::new();
        out.push_str(&format!("{HEADER_FROM}: {}{CRLF}", self.from));
        for recipient in &self.to {
            out.push_str(&format!("{HEADER_TO}: {recipient}{CRLF}"));
        }
        out.push_str(&format!(
            "{HEADER_DATETIME}: {}{CRLF}",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
        ));
        out.push_str(CRLF);
        out.push_str(&format!("{HEADER_CONTENT_TYPE}: {}{CRLF}", self.content_type.header_value()));
        out.push_str(CRLF);

        let mut bytes = out.into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let mut reader = LineReader { bytes, pos: 0 };

        let mut from = None;
        let mut to: Option<Vec<String>> = None;
        let mut timestamp = None;
        for (name, value) in reader.header_block()? {
            if name.eq_ignore_ascii_case(HEADER_FROM) {
                if from.replace(value.to_string()).is_some() {
                    return Err(EnvelopeError::DuplicateHeader(HEADER_FROM));
                }
            } else if name.eq_ignore_ascii_case(HEADER_TO) {
                to.get_or_insert_with(Vec::new).extend(
                    split_recipients(value)
                        .into_iter()
                        .map(str::trim)
                        .filter(|r| !r.is_empty())
                        .map(str::to_string),
                );
            } else if name.eq_ignore_ascii_case(HEADER_DATETIME) {
                let parsed = DateTime::parse_from_rfc3339(value)
                    .map_err(|_| EnvelopeError::InvalidTimestamp(value.to_string()))?;
                if timestamp.replace(parsed.with_timezone(&Utc).trunc_subsecs(3)).is_some() {
                    return Err(EnvelopeError::DuplicateHeader(HEADER_DATETIME));
                }
            } else {
                return Err(EnvelopeError::UnknownHeader(name.to_string()));
            }
        }

        let mut content_type = None;
        for (name, value) in reader.header_block()? {
            if name.eq_ignore_ascii_case(HEADER_CONTENT_TYPE) {
                if content_type.replace(ContentType::parse(value)?).is_some() {
                    return Err(EnvelopeError::DuplicateHeader(HEADER_CONTENT_TYPE));
                }
            } else {
                return Err(EnvelopeError::UnknownHeader(name.to_string()));
            }
        }

        let to = to.ok_or(EnvelopeError::MissingHeader(HEADER_TO))?;
        if to.is_empty() {
            return Err(EnvelopeError::NoRecipients);
        }

        Ok(Self {
            from: from.ok_or(EnvelopeError::MissingHeader(HEADER_FROM))?,
            to,
            timestamp: timestamp.ok_or(EnvelopeError::MissingHeader(HEADER_DATETIME))?,
            content_type: content_type.ok_or(EnvelopeError::MissingHeader(HEADER_CONTENT_TYPE))?,
            body: bytes[reader.pos..].to_vec(),
        })
    }

    /// Check sender and recipient identities against the keys involved.
    ///
    /// # Arguments
    /// * `my_uid` - Full user ID of the local key; must be among `to`
    /// * `sender_uid` - User ID of the sender key, if one is known; must equal `from`
    pub fn check_binding(&self, my_uid: &str, sender_uid: Option<&str>) -> ErrorSet {
        let mut errors = ErrorSet::empty();
        if !self.to.iter().any(|r| r == my_uid) {
            warn!("local identity not among envelope recipients");
            errors.insert(CoderError::InvalidRecipient);
        }
        if let Some(sender_uid) = sender_uid {
            if self.from != sender_uid {
                warn!("envelope sender does not match sender key");
                errors.insert(CoderError::InvalidSender);
            }
        }
        errors
    }

    /// Decode and check identity binding. Binding failures are reported in
    /// [`OpenedEnvelope::errors`], never as `Err`.
    pub fn open(bytes: &[u8], my_uid: &str, sender_uid: Option<&str>) -> Result<OpenedEnvelope, EnvelopeError> {
        let envelope = Self::decode(bytes)?;
        let errors = envelope.check_binding(my_uid, sender_uid);
        Ok(OpenedEnvelope { envelope, errors })
    }

    /// Body as text.
    pub fn body_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    /// Stanza body with the XMPP root element removed.
    pub fn stanza_body(&self) -> Option<&str> {
        if self.content_type != ContentType::XmppStanza {
            return None;
        }
        let text = self.body_text()?.trim();
        text.strip_prefix(XMPP_WRAPPER_OPEN)
            .or_else(|| text.strip_prefix("<xmpp xmlns=\"jabber:client\">"))?
            .strip_suffix(XMPP_WRAPPER_CLOSE)
    }
}

struct LineReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> LineReader<'a> {
    /// Next line without its terminator. `None` at end of input.
    fn line(&mut self) -> Option<&'a [u8]> {
        if self.pos >= self.bytes.len() {
            return None;
        }
        let rest = &self.bytes[self.pos..];
        let (line, consumed) = match rest.iter().position(|b| *b == b'\n') {
            Some(i) => (&rest[..i], i + 1),
            None => (rest, rest.len()),
        };
        self.pos += consumed;
        Some(line.strip_suffix(b"\r").unwrap_or(line))
    }

    /// Header lines up to and including the blank separator line.
    fn header_block(&mut self) -> Result<Vec<(&'a str, &'a str)>, EnvelopeError> {
        let mut headers = Vec::new();
        loop {
            let line = self.line().ok_or(EnvelopeError::Truncated)?;
            if line.is_empty() {
                return Ok(headers);
            }
            let line = std::str::from_utf8(line).map_err(|_| EnvelopeError::InvalidUtf8)?;
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| EnvelopeError::MalformedHeader(line.to_string()))?;
            let name = name.trim();
            if name.is_empty() || name.contains(char::is_whitespace) {
                return Err(EnvelopeError::MalformedHeader(line.to_string()));
            }
            headers.push((name, value.trim()));
        }
    }
}
