//! Security status taxonomy.
//!
//! Every message carries an encryption status, a signing status and a set of
//! security errors. Ordinals and bit positions are persisted by the storage
//! layer: only add new values at the end, never reorder.

use serde::{Deserialize, Serialize};
use tracing::warn;

// ============================================================================
// Error taxonomy
// ============================================================================

/// Security error kinds recorded against a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
#[repr(u8)]
pub enum CoderError {
    /// Catch-all for failures outside the taxonomy (I/O, cancellation).
    #[error("unknown error")]
    UnknownError = 0,
    /// The local personal key is not loaded.
    #[error("own key unavailable")]
    MyKeyUnavailable = 1,
    /// No public key is stored for a recipient or sender.
    #[error("recipient key unavailable")]
    KeyUnavailable = 2,
    /// A stored contact key could not be used.
    #[error("invalid key")]
    InvalidKey = 3,
    /// The message was not encrypted for the local key.
    #[error("invalid private key")]
    InvalidPrivateKey = 4,
    /// Structural failure of the ciphertext or the inner envelope.
    #[error("invalid data")]
    InvalidData = 5,
    /// Encrypted data carried no integrity protection.
    #[error("no integrity protection")]
    NoIntegrity = 6,
    /// Integrity check failed.
    #[error("integrity check failed")]
    InvalidIntegrity = 7,
    /// Signature packet missing or malformed.
    #[error("invalid signature data")]
    InvalidSignatureData = 8,
    /// Signature did not verify against the sender key.
    #[error("invalid signature")]
    InvalidSignature = 9,
    /// Local identity missing from the envelope recipients.
    #[error("invalid recipient")]
    InvalidRecipient = 10,
    /// Envelope sender does not match the sender key.
    #[error("invalid sender")]
    InvalidSender = 11,
}

impl CoderError {
    pub const ALL: [CoderError; 12] = [
        CoderError::UnknownError,
        CoderError::MyKeyUnavailable,
        CoderError::KeyUnavailable,
        CoderError::InvalidKey,
        CoderError::InvalidPrivateKey,
        CoderError::InvalidData,
        CoderError::NoIntegrity,
        CoderError::InvalidIntegrity,
        CoderError::InvalidSignatureData,
        CoderError::InvalidSignature,
        CoderError::InvalidRecipient,
        CoderError::InvalidSender,
    ];

    pub fn ordinal(self) -> u8 {
        self as u8
    }

    pub fn from_ordinal(ordinal: u8) -> Option<Self> {
        Self::ALL.get(ordinal as usize).copied()
    }

    fn bit(self) -> u32 {
        1u32 << (self as u8)
    }
}

/// Set of [`CoderError`] values, stored as a bit mask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorSet(u32);

impl ErrorSet {
    const MASK: u32 = (1 << CoderError::ALL.len()) - 1;

    pub const fn empty() -> Self {
        Self(0)
    }

    /// Rebuild a set from its persisted mask. Unknown bits are dropped.
    pub fn from_bits(bits: u32) -> Self {
        Self(bits & Self::MASK)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn insert(&mut self, error: CoderError) {
        self.0 |= error.bit();
    }

    pub fn remove(&mut self, error: CoderError) {
        self.0 &= !error.bit();
    }

    pub fn contains(self, error: CoderError) -> bool {
        self.0 & error.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn union(self, other: ErrorSet) -> ErrorSet {
        ErrorSet(self.0 | other.0)
    }

    pub fn extend_from(&mut self, other: ErrorSet) {
        self.0 |= other.0;
    }

    /// Iterate in ordinal order.
    pub fn iter(self) -> impl Iterator<Item = CoderError> {
        CoderError::ALL
            .into_iter()
            .filter(move |e| self.contains(*e))
    }
}

impl From<CoderError> for ErrorSet {
    fn from(error: CoderError) -> Self {
        ErrorSet(error.bit())
    }
}

impl FromIterator<CoderError> for ErrorSet {
    fn from_iter<I: IntoIterator<Item = CoderError>>(iter: I) -> Self {
        let mut set = ErrorSet::empty();
        for error in iter {
            set.insert(error);
        }
        set
    }
}

// ============================================================================
// Encryption / signing status
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Encryption {
    Not = 0,
    /// Outgoing message, stored encrypted.
    Encrypted = 1,
    /// Incoming message, plaintext recovered.
    Decrypted = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Signing {
    Not = 0,
    /// Signed, but the signature could not be verified.
    Signed = 1,
    Verified = 2,
    /// Not processed yet.
    Unknown = 3,
}

impl Encryption {
    pub fn ordinal(self) -> u8 {
        self as u8
    }

    pub fn from_ordinal(ordinal: u8) -> Option<Self> {
        match ordinal {
            0 => Some(Self::Not),
            1 => Some(Self::Encrypted),
            2 => Some(Self::Decrypted),
            _ => None,
        }
    }
}

impl Signing {
    pub fn ordinal(self) -> u8 {
        self as u8
    }

    pub fn from_ordinal(ordinal: u8) -> Option<Self> {
        match ordinal {
            0 => Some(Self::Not),
            1 => Some(Self::Signed),
            2 => Some(Self::Verified),
            3 => Some(Self::Unknown),
            _ => None,
        }
    }
}

/// Security status of a single message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoderStatus {
    pub encryption: Encryption,
    pub signing: Signing,
    pub errors: ErrorSet,
}

impl CoderStatus {
    pub fn new(encryption: Encryption, signing: Signing, errors: ErrorSet) -> Self {
        Self { encryption, signing, errors }
    }

    /// Status of a message sent or received in clear text.
    pub fn insecure() -> Self {
        Self::new(Encryption::Not, Signing::Not, ErrorSet::empty())
    }

    /// Status of an outgoing message stored for encryption on send.
    pub fn encrypted() -> Self {
        Self::new(Encryption::Encrypted, Signing::Signed, ErrorSet::empty())
    }

    /// Status of an incoming encrypted message not yet processed.
    pub fn incoming() -> Self {
        Self::new(Encryption::Encrypted, Signing::Unknown, ErrorSet::empty())
    }

    pub fn is_encrypted(&self) -> bool {
        self.encryption == Encryption::Encrypted
    }

    pub fn is_decrypted(&self) -> bool {
        self.encryption == Encryption::Decrypted
    }

    /// Whether the message was transferred encrypted, whatever the outcome.
    pub fn is_secure(&self) -> bool {
        self.encryption != Encryption::Not
    }

    pub fn set_decrypted(&mut self) {
        self.encryption = Encryption::Decrypted;
    }

    /// Move the signing status forward.
    ///
    /// Only `Unknown` may become anything, and `Signed` may become
    /// `Verified`. Other transitions are ignored and return `false`.
    pub fn set_signing(&mut self, signing: Signing) -> bool {
        let allowed = match (self.signing, signing) {
            (Signing::Unknown, _) => true,
            (Signing::Signed, Signing::Verified) => true,
            (current, next) => current == next,
        };
        if allowed {
            self.signing = signing;
        } else {
            warn!(from = ?self.signing, to = ?signing, "ignoring signing status downgrade");
        }
        allowed
    }

    pub fn add_error(&mut self, error: CoderError) {
        self.errors.insert(error);
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

impl Default for CoderStatus {
    fn default() -> Self {
        Self::incoming()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordinals_are_stable() {
        assert_eq!(CoderError::UnknownError.ordinal(), 0);
        assert_eq!(CoderError::InvalidKey.ordinal(), 3);
        assert_eq!(CoderError::InvalidSender.ordinal(), 11);
        assert_eq!(Signing::Unknown.ordinal(), 3);
        assert_eq!(Encryption::Decrypted.ordinal(), 2);
        for (i, e) in CoderError::ALL.iter().enumerate() {
            assert_eq!(CoderError::from_ordinal(i as u8), Some(*e));
        }
        assert_eq!(CoderError::from_ordinal(12), None);
    }

    #[test]
    fn error_set_basics() {
        let mut set = ErrorSet::empty();
        assert!(set.is_empty());
        set.insert(CoderError::InvalidSignature);
        set.insert(CoderError::InvalidRecipient);
        set.insert(CoderError::InvalidSignature);
        assert_eq!(set.len(), 2);
        assert!(set.contains(CoderError::InvalidRecipient));
        assert!(!set.contains(CoderError::InvalidData));
        assert_eq!(
            set.iter().collect::<Vec<_>>(),
            vec![CoderError::InvalidSignature, CoderError::InvalidRecipient]
        );
        set.remove(CoderError::InvalidSignature);
        assert_eq!(set, ErrorSet::from(CoderError::InvalidRecipient));
    }

    #[test]
    fn from_bits_drops_unknown() {
        let set = ErrorSet::from_bits(u32::MAX);
        assert_eq!(set.len(), CoderError::ALL.len());
    }

    #[test]
    fn signing_transitions() {
        let mut status = CoderStatus::incoming();
        assert!(status.set_signing(Signing::Signed));
        assert!(status.set_signing(Signing::Verified));
        assert!(!status.set_signing(Signing::Not));
        assert_eq!(status.signing, Signing::Verified);
    }

    #[test]
    fn status_serializes_mask() {
        let mut status = CoderStatus::incoming();
        status.set_decrypted();
        status.add_error(CoderError::InvalidData);
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"errors\":32"));
        let back: CoderStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, status);
        assert!(back.is_secure());
    }
}
