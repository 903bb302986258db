//! Encryption pipeline: sign, compress and encrypt in one pass.
//!
//! Output layout, outermost first:
//! PKESK per recipient, SEIPD (with MDC) containing
//! compressed data containing one-pass signature, literal data, signature.

use std::io::{Read, Write};

use sequoia_openpgp as openpgp;
use openpgp::packet::signature::SignatureBuilder;
use openpgp::serialize::stream::{Compressor, Encryptor, LiteralWriter, Message, Recipient, Signer};
use openpgp::types::{DataFormat, HashAlgorithm, SignatureType};
use tracing::{info, warn};

use crate::keys::{PublicKey, SecretKey};
use crate::stream::{pump, CancelToken, PipelineOptions, PumpError};

#[derive(Debug, thiserror::Error)]
pub enum EncryptError {
    #[error("no recipients")]
    NoRecipients,
    #[error("signing key unusable: {0}")]
    SigningKey(String),
    #[error("OpenPGP stream error: {0}")]
    OpenPgp(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cancelled")]
    Cancelled,
}

impl From<PumpError> for EncryptError {
    fn from(e: PumpError) -> Self {
        match e {
            PumpError::Read(e) | PumpError::Write(e) => EncryptError::Io(e),
            PumpError::Cancelled => EncryptError::Cancelled,
        }
    }
}

fn stream_err(e: impl std::fmt::Display) -> EncryptError {
    EncryptError::OpenPgp(e.to_string())
}

/// Signing identity of the sender.
#[derive(Clone, Copy)]
pub struct Sender<'a> {
    pub key: &'a SecretKey,
    /// Written into the signer's user ID subpacket.
    pub user_id: &'a str,
}

/// Encrypt and sign `input` for `recipients`, streaming into `output`.
///
/// Returns the number of plaintext bytes consumed. On error the content of
/// `output` is undefined and must be discarded.
pub fn encrypt_and_sign<R, W>(
    input: &mut R,
    output: &mut W,
    sender: Sender<'_>,
    recipients: &[&PublicKey],
    options: &PipelineOptions,
    cancel: &CancelToken,
) -> Result<u64, EncryptError>
where
    R: Read + ?Sized,
    W: Write + Send + Sync,
{
    if recipients.is_empty() {
        return Err(EncryptError::NoRecipients);
    }

    let keypair = sender
        .key
        .clone()
        .into_keypair()
        .map_err(|e| EncryptError::SigningKey(e.to_string()))?;
    let template = SignatureBuilder::new(SignatureType::Binary)
        .set_signers_user_id(sender.user_id.as_bytes())
        .map_err(stream_err)?;

    let recipients: Vec<Recipient> = recipients
        .iter()
        .map(|key| Recipient::new(key.keyid(), *key))
        .collect();

    info!(recipients = recipients.len(), "encrypting message");

    let message = Message::new(output);
    let message = Encryptor::for_recipients(message, recipients)
        .symmetric_algo(options.cipher)
        .build()
        .map_err(stream_err)?;
    let message = Compressor::new(message)
        .algo(options.compression)
        .build()
        .map_err(stream_err)?;
    let message = Signer::with_template(message, keypair, template)
        .hash_algo(HashAlgorithm::SHA256)
        .map_err(stream_err)?
        .build()
        .map_err(stream_err)?;
    let mut literal = LiteralWriter::new(message)
        .format(DataFormat::Binary)
        .build()
        .map_err(stream_err)?;

    let written = match pump(input, &mut literal, options.buffer_size, cancel, |_| {}) {
        Ok(n) => n,
        Err(e) => {
            warn!(error = %e, "encryption aborted");
            return Err(e.into());
        }
    };
    literal.finalize().map_err(stream_err)?;

    Ok(written)
}

/// In-memory variant of [`encrypt_and_sign`].
pub fn encrypt_message(
    plaintext: &[u8],
    sender: Sender<'_>,
    recipients: &[&PublicKey],
    options: &PipelineOptions,
) -> Result<Vec<u8>, EncryptError> {
    let mut ciphertext = Vec::new();
    encrypt_and_sign(
        &mut &plaintext[..],
        &mut ciphertext,
        sender,
        recipients,
        options,
        &CancelToken::new(),
    )?;
    Ok(ciphertext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contact::ContactKey;
    use crate::keys::PersonalKey;
    use crate::test_keys;

    #[test]
    fn refuses_empty_recipient_list() {
        let fixture = test_keys::split("Alice <alice@example.org>");
        let alice = PersonalKey::load(&fixture.secret, test_keys::PASSPHRASE, None).unwrap();
        let sender = Sender { key: alice.signing_key(), user_id: alice.user_id() };
        let err = encrypt_message(b"hi", sender, &[], &PipelineOptions::default()).unwrap_err();
        assert!(matches!(err, EncryptError::NoRecipients));
    }

    #[test]
    fn produces_binary_openpgp_message() {
        let a = test_keys::split("Alice <alice@example.org>");
        let b = test_keys::split("Bob <bob@example.org>");
        let alice = PersonalKey::load(&a.secret, test_keys::PASSPHRASE, None).unwrap();
        let bob = ContactKey::from_keyring(&b.public).unwrap();

        let sender = Sender { key: alice.signing_key(), user_id: alice.user_id() };
        let ct = encrypt_message(b"hello", sender, &[bob.encryption_key()], &PipelineOptions::default()).unwrap();
        // New-format PKESK packet tag.
        assert_eq!(ct[0] & 0xC0, 0xC0);
        assert!(!ct.windows(5).any(|w| w == b"hello"));
    }

    #[test]
    fn cancelled_encryption_fails() {
        let a = test_keys::split("Alice <alice@example.org>");
        let alice = PersonalKey::load(&a.secret, test_keys::PASSPHRASE, None).unwrap();
        let me = alice.encryption_public();
        let cancel = CancelToken::new();
        cancel.cancel();

        let mut out = Vec::new();
        let sender = Sender { key: alice.signing_key(), user_id: alice.user_id() };
        let err = encrypt_and_sign(
            &mut &b"data"[..],
            &mut out,
            sender,
            &[&me],
            &PipelineOptions::default(),
            &cancel,
        )
        .unwrap_err();
        assert!(matches!(err, EncryptError::Cancelled));
    }
}
