//! Contact public keys and the per-contact key cache.

use std::sync::Arc;

use constant_time_eq::constant_time_eq;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use sequoia_openpgp as openpgp;
use openpgp::cert::Cert;
use openpgp::parse::Parse;
use tracing::debug;

use crate::keys::{self, KeyLayout, KeyLoadError, PublicKey};

/// Public keys of a contact.
#[derive(Debug, Clone)]
pub struct ContactKey {
    user_id: String,
    fingerprint: String,
    sign: PublicKey,
    encrypt: PublicKey,
    layout: KeyLayout,
}

impl ContactKey {
    /// Build a contact key from a public keyring.
    pub fn from_keyring(public_keyring: &[u8]) -> Result<Self, KeyLoadError> {
        let cert = Cert::from_bytes(public_keyring).map_err(|e| KeyLoadError::Parse(e.to_string()))?;
        let resolved = keys::resolve(&cert)?;
        let roles = resolved.roles;
        Ok(Self {
            sign: resolved.keys[roles.sign].clone(),
            encrypt: resolved.keys[roles.encrypt].clone(),
            layout: resolved.layout,
            user_id: resolved.user_id,
            fingerprint: resolved.fingerprint,
        })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Lowercase hex fingerprint of the master key.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn signing_key(&self) -> &PublicKey {
        &self.sign
    }

    pub fn encryption_key(&self) -> &PublicKey {
        &self.encrypt
    }

    pub fn layout(&self) -> KeyLayout {
        self.layout
    }

    pub fn matches_fingerprint(&self, fingerprint: &str) -> bool {
        let expected = fingerprint.trim().to_ascii_lowercase();
        constant_time_eq(self.fingerprint.as_bytes(), expected.as_bytes())
    }
}

/// Cache of contact keys keyed by contact identity.
///
/// An entry is replaced when the fingerprint stored for the contact no
/// longer matches the cached key, e.g. after a key rotation.
#[derive(Debug, Default)]
pub struct ContactKeyCache {
    entries: DashMap<String, Arc<ContactKey>>,
}

impl ContactKeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the key for a contact, parsing `public_keyring` on a miss or a
    /// fingerprint mismatch.
    ///
    /// # Arguments
    /// * `contact` - Contact identity used as cache key
    /// * `fingerprint` - Fingerprint currently stored for the contact
    /// * `public_keyring` - Keyring currently stored for the contact
    pub fn lookup(
        &self,
        contact: &str,
        fingerprint: &str,
        public_keyring: &[u8],
    ) -> Result<Arc<ContactKey>, KeyLoadError> {
        if let Some(cached) = self.entries.get(contact) {
            if cached.matches_fingerprint(fingerprint) {
                return Ok(Arc::clone(cached.value()));
            }
        }

        // Holding the entry lock keeps concurrent refreshes of one contact serialized.
        match self.entries.entry(contact.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().matches_fingerprint(fingerprint) {
                    return Ok(Arc::clone(entry.get()));
                }
                debug!(contact, "contact fingerprint changed, reloading key");
                let key = Arc::new(ContactKey::from_keyring(public_keyring)?);
                entry.insert(Arc::clone(&key));
                Ok(key)
            }
            Entry::Vacant(entry) => {
                let key = Arc::new(ContactKey::from_keyring(public_keyring)?);
                entry.insert(Arc::clone(&key));
                Ok(key)
            }
        }
    }

    pub fn invalidate(&self, contact: &str) -> bool {
        self.entries.remove(contact).is_some()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
