//! Personal key material.
//!
//! A keyring holds a master key and its subkeys. Roles are inferred from the
//! key flags on each binding signature:
//! - the master key is the authentication key;
//! - a subkey flagged for signing is the signing key;
//! - the remaining subkey flagged for encryption is the encryption key.
//!
//! Older keyrings have no signing subkey; if the master key itself may sign,
//! it doubles as signing key.

use std::fmt;
use std::time::SystemTime;

use sequoia_openpgp as openpgp;
use openpgp::cert::prelude::*;
use openpgp::crypto::Password;
use openpgp::packet::key::{PublicParts, SecretParts, UnspecifiedRole};
use openpgp::packet::Key;
use openpgp::parse::Parse;
use openpgp::policy::StandardPolicy;
use openpgp::serialize::SerializeInto;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::x509_bridge::{self, BridgeCertificate, BridgeError};

pub type PublicKey = Key<PublicParts, UnspecifiedRole>;
pub type SecretKey = Key<SecretParts, UnspecifiedRole>;

/// Role of an asymmetric key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyRole {
    Authentication,
    Signing,
    Encryption,
}

impl fmt::Display for KeyRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyRole::Authentication => f.write_str("authentication"),
            KeyRole::Signing => f.write_str("signing"),
            KeyRole::Encryption => f.write_str("encryption"),
        }
    }
}

/// Errors raised while loading a keyring. Always fatal to the load.
#[derive(Debug, thiserror::Error)]
pub enum KeyLoadError {
    #[error("keyring parse error: {0}")]
    Parse(String),
    #[error("keyring rejected by policy: {0}")]
    Policy(String),
    #[error("no usable {0} key in keyring")]
    MissingRole(KeyRole),
    #[error("{0} key has no secret material")]
    NoSecret(KeyRole),
    #[error("unable to unlock secret key: wrong passphrase")]
    Decrypt,
    #[error("keyring has no user ID")]
    NoUserId,
    #[error("keyring serialization failed: {0}")]
    Serialize(String),
    #[error("bridge certificate: {0}")]
    Certificate(#[from] BridgeError),
}

// ============================================================================
// Role inference
// ============================================================================

/// Capabilities of one key, in keyring order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyCandidate {
    pub is_primary: bool,
    pub can_sign: bool,
    pub can_encrypt: bool,
}

/// Role layout of a keyring. Indices point into the candidate list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyLayout {
    /// No complete role set; `missing` names the first role not found.
    AuthOnly { auth: usize, missing: KeyRole },
    /// Legacy layout: master key authenticates and signs.
    AuthAndSign { auth: usize, encrypt: usize },
    Split { auth: usize, sign: usize, encrypt: usize },
}

/// Resolved key indices for each role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleAssignment {
    pub auth: usize,
    pub sign: usize,
    pub encrypt: usize,
}

impl KeyLayout {
    pub fn roles(&self) -> Result<RoleAssignment, KeyRole> {
        match *self {
            KeyLayout::AuthOnly { missing, .. } => Err(missing),
            KeyLayout::AuthAndSign { auth, encrypt } => Ok(RoleAssignment { auth, sign: auth, encrypt }),
            KeyLayout::Split { auth, sign, encrypt } => Ok(RoleAssignment { auth, sign, encrypt }),
        }
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, KeyLayout::AuthAndSign { .. })
    }
}

/// Infer key roles from capabilities.
///
/// Returns `None` if no candidate is the master key.
pub fn classify(candidates: &[KeyCandidate]) -> Option<KeyLayout> {
    let auth = candidates.iter().position(|c| c.is_primary)?;

    let sign = candidates
        .iter()
        .position(|c| !c.is_primary && c.can_sign);
    let encrypt = candidates
        .iter()
        .enumerate()
        .position(|(i, c)| !c.is_primary && c.can_encrypt && Some(i) != sign);

    let layout = match (sign, encrypt) {
        (Some(sign), Some(encrypt)) => KeyLayout::Split { auth, sign, encrypt },
        (None, Some(encrypt)) if candidates[auth].can_sign => KeyLayout::AuthAndSign { auth, encrypt },
        (None, Some(_)) => KeyLayout::AuthOnly { auth, missing: KeyRole::Signing },
        (_, None) => KeyLayout::AuthOnly { auth, missing: KeyRole::Encryption },
    };
    Some(layout)
}

// ============================================================================
// Keyring resolution
// ============================================================================

/// Keys of a certificate with their roles resolved.
pub(crate) struct ResolvedKeyring {
    pub keys: Vec<PublicKey>,
    pub layout: KeyLayout,
    pub roles: RoleAssignment,
    pub user_id: String,
    pub fingerprint: String,
    pub created: SystemTime,
    pub expires: Option<SystemTime>,
}

pub(crate) fn resolve(cert: &Cert) -> Result<ResolvedKeyring, KeyLoadError> {
    let policy = StandardPolicy::new();
    let vc = cert
        .with_policy(&policy, None)
        .map_err(|e| KeyLoadError::Policy(e.to_string()))?;

    let primary = cert.fingerprint();
    let mut keys = Vec::new();
    let mut candidates = Vec::new();
    for ka in vc.keys().alive().revoked(false) {
        let key = ka.key().clone();
        candidates.push(KeyCandidate {
            is_primary: key.fingerprint() == primary,
            can_sign: ka.for_signing(),
            can_encrypt: ka.for_transport_encryption() || ka.for_storage_encryption(),
        });
        keys.push(key);
    }

    let layout = classify(&candidates).ok_or(KeyLoadError::MissingRole(KeyRole::Authentication))?;
    let roles = layout.roles().map_err(KeyLoadError::MissingRole)?;
    debug!(?layout, keys = keys.len(), "resolved key roles");

    let user_id = vc
        .primary_userid()
        .map(|ua| String::from_utf8_lossy(ua.userid().value()).into_owned())
        .map_err(|_| KeyLoadError::NoUserId)?;

    let primary_key = vc.primary_key();
    Ok(ResolvedKeyring {
        keys,
        layout,
        roles,
        user_id,
        fingerprint: hex::encode(primary.as_bytes()),
        created: primary_key.key().creation_time(),
        expires: primary_key.key_expiration_time(),
    })
}

fn unlock(key: &PublicKey, password: &Password, role: KeyRole) -> Result<SecretKey, KeyLoadError> {
    let key = key
        .clone()
        .parts_into_secret()
        .map_err(|_| KeyLoadError::NoSecret(role))?;
    if key.secret().is_encrypted() {
        key.decrypt_secret(password).map_err(|_| KeyLoadError::Decrypt)
    } else {
        Ok(key)
    }
}

// ============================================================================
// Personal key
// ============================================================================

/// The local identity: authentication, signing and encryption key pairs plus
/// the X.509 certificate used for transport authentication.
///
/// Immutable after loading; share it with `Arc`.
pub struct PersonalKey {
    auth: SecretKey,
    sign: SecretKey,
    encrypt: SecretKey,
    layout: KeyLayout,
    user_id: String,
    fingerprint: String,
    public_keyring: Vec<u8>,
    bridge: BridgeCertificate,
    login_key: Option<Zeroizing<Vec<u8>>>,
}

impl PersonalKey {
    /// Load a personal key from a secret keyring.
    ///
    /// # Arguments
    /// * `secret_keyring` - Transferable secret key, binary or ASCII armored
    /// * `passphrase` - Passphrase protecting the secret keys
    /// * `bundled_cert` - Previously issued certificate (PEM or DER); derived
    ///   from the authentication key when absent
    pub fn load(
        secret_keyring: &[u8],
        passphrase: &str,
        bundled_cert: Option<&[u8]>,
    ) -> Result<Self, KeyLoadError> {
        let cert = Cert::from_bytes(secret_keyring).map_err(|e| KeyLoadError::Parse(e.to_string()))?;
        let resolved = resolve(&cert)?;
        let roles = resolved.roles;

        let password = Password::from(passphrase);
        let auth = unlock(&resolved.keys[roles.auth], &password, KeyRole::Authentication)?;
        let sign = if roles.sign == roles.auth {
            auth.clone()
        } else {
            unlock(&resolved.keys[roles.sign], &password, KeyRole::Signing)?
        };
        let encrypt = unlock(&resolved.keys[roles.encrypt], &password, KeyRole::Encryption)?;

        let public_keyring = cert
            .to_vec()
            .map_err(|e| KeyLoadError::Serialize(e.to_string()))?;

        let login_key = x509_bridge::login_key_pkcs8(&auth).ok();
        let bridge = match bundled_cert {
            Some(bytes) => BridgeCertificate::parse(bytes)?,
            None => BridgeCertificate::derive(
                &auth,
                &resolved.user_id,
                &public_keyring,
                &resolved.fingerprint,
                resolved.created,
                resolved.expires,
            )?,
        };

        info!(fingerprint = %resolved.fingerprint, legacy = resolved.layout.is_legacy(), "personal key loaded");

        Ok(Self {
            auth,
            sign,
            encrypt,
            layout: resolved.layout,
            user_id: resolved.user_id,
            fingerprint: resolved.fingerprint,
            public_keyring,
            bridge,
            login_key,
        })
    }

    pub fn authentication_key(&self) -> &SecretKey {
        &self.auth
    }

    pub fn signing_key(&self) -> &SecretKey {
        &self.sign
    }

    pub fn encryption_key(&self) -> &SecretKey {
        &self.encrypt
    }

    /// Public part of the encryption key, so the local user can be a recipient.
    pub fn encryption_public(&self) -> PublicKey {
        self.encrypt.clone().parts_into_public()
    }

    pub fn signing_public(&self) -> PublicKey {
        self.sign.clone().parts_into_public()
    }

    pub fn layout(&self) -> KeyLayout {
        self.layout
    }

    /// First user ID of the keyring.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Lowercase hex fingerprint of the master key.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn public_keyring(&self) -> &[u8] {
        &self.public_keyring
    }

    pub fn bridge_certificate(&self) -> &BridgeCertificate {
        &self.bridge
    }

    /// Authentication key as PKCS#8 DER for TLS client authentication.
    /// Only available for Ed25519 keys.
    pub fn login_key_der(&self) -> Option<&[u8]> {
        self.login_key.as_ref().map(|k| k.as_slice())
    }
}

impl fmt::Debug for PersonalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersonalKey")
            .field("user_id", &self.user_id)
            .field("fingerprint", &self.fingerprint)
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}
