//! Kon Core - Message coder for end-to-end encrypted chat.
//!
//! This crate implements:
//! - The `Coder` façade for text and stanza messages
//! - Attachment file encryption and decryption
//! - Security status aggregation for persisted messages
//! - Coder configuration

#![forbid(unsafe_code)]

// Façade
pub mod coder;
pub mod attachment;

// Supporting modules
pub mod config;
pub mod content;
pub mod errors;

#[cfg(test)]
mod proptests;

pub use coder::{Coder, ContactRecord, DecryptedMessage};
pub use attachment::AttachmentOutcome;
pub use kon_crypto::status::{CoderError, CoderStatus, Encryption, ErrorSet, Signing};
pub use kon_crypto::stream::CancelToken;
