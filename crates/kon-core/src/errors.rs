//! Error types for the message coder.
//!
//! Outgoing operations fail with [`CoreError`]. Every variant maps onto the
//! persisted security error taxonomy so that a failed send can be stored
//! with the same flags an incoming message would carry.

use kon_crypto::encrypt::EncryptError;
use kon_crypto::envelope::EnvelopeError;
use kon_crypto::keys::KeyLoadError;
use kon_crypto::status::{CoderError, ErrorSet};
use thiserror::Error;

use crate::config::ConfigError;

/// Unified coder error.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The local personal key is not loaded
    #[error("personal key unavailable")]
    MyKeyUnavailable,

    /// Nobody to encrypt for
    #[error("no recipients")]
    NoRecipients,

    /// A recipient has no stored public key
    #[error("public key unavailable for {0}")]
    KeyUnavailable(String),

    /// A recipient's stored public key is unusable
    #[error("invalid public key for {contact}: {source}")]
    InvalidKey {
        contact: String,
        #[source]
        source: KeyLoadError,
    },

    #[error("envelope error: {0}")]
    Envelope(#[from] EnvelopeError),

    #[error("encryption failed: {0}")]
    Encrypt(#[from] EncryptError),

    /// Destination file for a decrypted attachment already exists
    #[error("destination exists: {0}")]
    DestinationExists(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl CoreError {
    /// Security error flags to persist with the failed message.
    pub fn security_errors(&self) -> ErrorSet {
        let error = match self {
            CoreError::MyKeyUnavailable => CoderError::MyKeyUnavailable,
            CoreError::NoRecipients | CoreError::KeyUnavailable(_) => CoderError::KeyUnavailable,
            CoreError::InvalidKey { .. } => CoderError::InvalidKey,
            CoreError::Envelope(_) => CoderError::InvalidData,
            CoreError::Encrypt(EncryptError::NoRecipients) => CoderError::KeyUnavailable,
            CoreError::Encrypt(_)
            | CoreError::DestinationExists(_)
            | CoreError::Io(_)
            | CoreError::Config(_) => CoderError::UnknownError,
        };
        ErrorSet::from(error)
    }
}
