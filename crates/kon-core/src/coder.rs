//! Message coder façade.
//!
//! [`Coder`] ties the local personal key, the contact key cache and the
//! configuration together. Outgoing operations return [`CoreError`];
//! incoming operations never fail and report every problem in the returned
//! [`CoderStatus`].

use std::fmt;
use std::sync::Arc;

use kon_crypto::contact::{ContactKey, ContactKeyCache};
use kon_crypto::decrypt;
use kon_crypto::encrypt::{self, Sender};
use kon_crypto::envelope::{ContentType, Envelope};
use kon_crypto::keys::{PersonalKey, PublicKey};
use kon_crypto::status::{CoderError, CoderStatus, ErrorSet};
use tracing::{debug, info, warn};

use crate::config::{BindingPolicy, CoderConfig};
use crate::content::{MessageContent, MessageHeader, StanzaParser};
use crate::errors::CoreError;

// ============================================================================
// Inputs and outputs
// ============================================================================

/// What the caller knows about a contact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactRecord {
    /// Contact identity, used as cache key
    pub id: String,
    /// Fingerprint stored for the contact
    pub fingerprint: String,
    /// Stored public keyring, if the contact ever sent one
    pub public_keyring: Option<Vec<u8>>,
}

impl ContactRecord {
    pub fn new(id: impl Into<String>, fingerprint: impl Into<String>, public_keyring: Option<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            fingerprint: fingerprint.into(),
            public_keyring,
        }
    }
}

/// Result of decrypting an incoming message.
#[derive(Debug, Clone)]
pub struct DecryptedMessage {
    /// Decoded content; `None` when it could not be recovered or was withheld
    pub content: Option<MessageContent>,
    /// Envelope headers, present whenever the envelope decoded
    pub header: Option<MessageHeader>,
    pub status: CoderStatus,
}

impl DecryptedMessage {
    fn failed(status: CoderStatus) -> Self {
        Self {
            content: None,
            header: None,
            status,
        }
    }
}

// ============================================================================
// Coder
// ============================================================================

pub struct Coder {
    my_key: Option<Arc<PersonalKey>>,
    contacts: Arc<ContactKeyCache>,
    config: CoderConfig,
    stanza_parser: Option<Arc<dyn StanzaParser>>,
}

impl Coder {
    /// Create a coder.
    ///
    /// # Arguments
    /// * `my_key` - Unlocked personal key; operations needing it report
    ///   `MyKeyUnavailable` when absent
    /// * `contacts` - Contact key cache shared between coders
    /// * `config` - Pipeline configuration
    pub fn new(my_key: Option<Arc<PersonalKey>>, contacts: Arc<ContactKeyCache>, config: CoderConfig) -> Self {
        Self {
            my_key,
            contacts,
            config,
            stanza_parser: None,
        }
    }

    /// Hand structured stanza content to `parser` when decrypting.
    pub fn with_stanza_parser(mut self, parser: Arc<dyn StanzaParser>) -> Self {
        self.stanza_parser = Some(parser);
        self
    }

    pub fn config(&self) -> &CoderConfig {
        &self.config
    }

    pub fn contacts(&self) -> &Arc<ContactKeyCache> {
        &self.contacts
    }

    pub(crate) fn my_key(&self) -> Result<&PersonalKey, CoreError> {
        self.my_key.as_deref().ok_or(CoreError::MyKeyUnavailable)
    }

    /// Resolve a contact's keys through the cache.
    pub(crate) fn contact_key(&self, contact: &ContactRecord) -> Result<Arc<ContactKey>, CoreError> {
        let keyring = contact
            .public_keyring
            .as_deref()
            .ok_or_else(|| CoreError::KeyUnavailable(contact.id.clone()))?;
        self.contacts
            .lookup(&contact.id, &contact.fingerprint, keyring)
            .map_err(|source| CoreError::InvalidKey {
                contact: contact.id.clone(),
                source,
            })
    }

    pub(crate) fn recipient_keys(&self, recipients: &[ContactRecord]) -> Result<Vec<Arc<ContactKey>>, CoreError> {
        if recipients.is_empty() {
            return Err(CoreError::NoRecipients);
        }
        recipients.iter().map(|r| self.contact_key(r)).collect()
    }

    /// Sender key for an incoming message. A missing keyring leaves the
    /// signature unverified; an unusable one is recorded as `InvalidKey`.
    pub(crate) fn sender_key(&self, sender: &ContactRecord, status: &mut CoderStatus) -> Option<Arc<ContactKey>> {
        match self.contact_key(sender) {
            Ok(key) => Some(key),
            Err(CoreError::KeyUnavailable(_)) => {
                debug!(contact = %sender.id, "no public key for sender, signature will not be verified");
                None
            }
            Err(e) => {
                warn!(contact = %sender.id, error = %e, "sender key unusable");
                status.errors.extend_from(e.security_errors());
                None
            }
        }
    }

    // ------------------------------------------------------------------------
    // Outgoing
    // ------------------------------------------------------------------------

    /// Encrypt a text message for `recipients`.
    pub fn encrypt_message(&self, text: &str, recipients: &[ContactRecord]) -> Result<Vec<u8>, CoreError> {
        self.encrypt_envelope(ContentType::PlainText, text, recipients)
    }

    /// Encrypt an XMPP stanza for `recipients`.
    pub fn encrypt_stanza(&self, xml: &str, recipients: &[ContactRecord]) -> Result<Vec<u8>, CoreError> {
        self.encrypt_envelope(ContentType::XmppStanza, xml, recipients)
    }

    fn encrypt_envelope(
        &self,
        content_type: ContentType,
        body: &str,
        recipients: &[ContactRecord],
    ) -> Result<Vec<u8>, CoreError> {
        let my_key = self.my_key()?;
        let keys = self.recipient_keys(recipients)?;
        let to = keys.iter().map(|k| k.user_id().to_string()).collect();

        let envelope = match content_type {
            ContentType::PlainText => Envelope::text(my_key.user_id(), to, body)?,
            ContentType::XmppStanza => Envelope::stanza(my_key.user_id(), to, body)?,
        };

        let encryption_keys: Vec<&PublicKey> = keys.iter().map(|k| k.encryption_key()).collect();
        let sender = Sender {
            key: my_key.signing_key(),
            user_id: my_key.user_id(),
        };
        let ciphertext = encrypt::encrypt_message(
            &envelope.encode(),
            sender,
            &encryption_keys,
            &self.config.pipeline_options(),
        )?;

        info!(recipients = keys.len(), content = %content_type, bytes = ciphertext.len(), "message encrypted");
        Ok(ciphertext)
    }

    // ------------------------------------------------------------------------
    // Incoming
    // ------------------------------------------------------------------------

    /// Decrypt and verify an incoming message from `sender`.
    pub fn decrypt_message(&self, ciphertext: &[u8], sender: &ContactRecord) -> DecryptedMessage {
        let mut status = CoderStatus::incoming();

        let my_key = match self.my_key() {
            Ok(key) => key,
            Err(e) => {
                warn!(error = %e, "cannot decrypt message");
                status.errors.extend_from(e.security_errors());
                return DecryptedMessage::failed(status);
            }
        };
        let sender_key = self.sender_key(sender, &mut status);

        let result = decrypt::decrypt_message(
            ciphertext,
            my_key.encryption_key(),
            sender_key.as_deref().map(ContactKey::signing_key),
            &self.config.pipeline_options(),
        );
        status.errors.extend_from(result.errors);
        status.set_signing(result.signing);

        let Some(plaintext) = result.plaintext else {
            return DecryptedMessage::failed(status);
        };
        status.set_decrypted();

        let opened = match Envelope::open(&plaintext, my_key.user_id(), sender_key.as_deref().map(ContactKey::user_id)) {
            Ok(opened) => opened,
            Err(e) => {
                warn!(error = %e, "decrypted payload is not a valid envelope");
                status.add_error(CoderError::InvalidData);
                return DecryptedMessage::failed(status);
            }
        };
        status.errors.extend_from(opened.errors);

        let envelope = opened.envelope;
        let header = MessageHeader {
            from: envelope.from.clone(),
            to: envelope.to.clone(),
            timestamp: envelope.timestamp,
        };

        if !opened.errors.is_empty() && self.config.binding_policy == BindingPolicy::Hide {
            info!("identity binding failed, content withheld");
            return DecryptedMessage {
                content: None,
                header: Some(header),
                status,
            };
        }

        let content = self.decode_content(&envelope, &mut status.errors);
        DecryptedMessage {
            content,
            header: Some(header),
            status,
        }
    }

    fn decode_content(&self, envelope: &Envelope, errors: &mut ErrorSet) -> Option<MessageContent> {
        match envelope.content_type {
            ContentType::PlainText => match envelope.body_text() {
                Some(text) => Some(MessageContent::Text(text.to_string())),
                None => {
                    warn!("text body is not valid UTF-8");
                    errors.insert(CoderError::InvalidData);
                    None
                }
            },
            ContentType::XmppStanza => {
                let Some(xml) = envelope.stanza_body() else {
                    warn!("stanza body missing its wrapper");
                    errors.insert(CoderError::InvalidData);
                    return None;
                };
                let Some(parser) = &self.stanza_parser else {
                    warn!("no stanza parser configured");
                    errors.insert(CoderError::InvalidData);
                    return None;
                };
                match parser.parse(xml) {
                    Ok(stanza) => Some(MessageContent::Stanza(stanza)),
                    Err(e) => {
                        warn!(error = %e, "stanza rejected");
                        errors.insert(CoderError::InvalidData);
                        None
                    }
                }
            }
        }
    }
}

impl fmt::Debug for Coder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coder")
            .field("my_key", &self.my_key.as_ref().map(|k| k.fingerprint()))
            .field("contacts", &self.contacts.len())
            .field("config", &self.config)
            .field("stanza_parser", &self.stanza_parser.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coder() -> Coder {
        Coder::new(None, Arc::new(ContactKeyCache::new()), CoderConfig::default())
    }

    #[test]
    fn missing_personal_key() {
        let coder = coder();
        let bob = ContactRecord::new("bob", "00", None);

        let err = coder.encrypt_message("hello", &[bob.clone()]).unwrap_err();
        assert!(matches!(err, CoreError::MyKeyUnavailable));

        let out = coder.decrypt_message(b"anything", &bob);
        assert!(out.content.is_none());
        assert!(out.status.errors.contains(CoderError::MyKeyUnavailable));
        assert!(out.status.is_encrypted());
    }

    #[test]
    fn garbage_contact_keyring() {
        let coder = coder();
        let bob = ContactRecord::new("bob", "00", Some(b"not a keyring".to_vec()));
        let err = coder.contact_key(&bob).unwrap_err();
        assert!(matches!(err, CoreError::InvalidKey { .. }));
        assert!(err.security_errors().contains(CoderError::InvalidKey));
        assert!(coder.contacts().is_empty());
    }

    #[test]
    fn no_recipients() {
        assert!(matches!(coder().recipient_keys(&[]), Err(CoreError::NoRecipients)));
    }
}
