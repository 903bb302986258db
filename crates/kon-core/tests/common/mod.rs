//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Once};

use kon_core::config::CoderConfig;
use kon_core::{Coder, ContactRecord};
use kon_crypto::contact::ContactKeyCache;
use kon_crypto::keys::PersonalKey;
use kon_crypto::openpgp::cert::prelude::*;
use kon_crypto::openpgp::serialize::SerializeInto;
use kon_crypto::openpgp::types::KeyFlags;

pub const PASSPHRASE: &str = "integration passphrase";

/// A user with an unlocked personal key.
pub struct User {
    pub id: &'static str,
    pub key: Arc<PersonalKey>,
}

impl User {
    /// Master key for authentication, separate signing and encryption subkeys.
    pub fn new(id: &'static str, uid: &str) -> Self {
        Self::build(
            id,
            CertBuilder::new()
                .add_userid(uid)
                .add_signing_subkey()
                .add_transport_encryption_subkey(),
        )
    }

    /// Master key signs, one encryption subkey.
    pub fn legacy(id: &'static str, uid: &str) -> Self {
        Self::build(
            id,
            CertBuilder::new()
                .add_userid(uid)
                .set_primary_key_flags(KeyFlags::empty().set_certification().set_signing())
                .add_transport_encryption_subkey(),
        )
    }

    fn build(id: &'static str, builder: CertBuilder<'_>) -> Self {
        let (cert, _revocation) = builder
            .set_password(Some(PASSPHRASE.into()))
            .generate()
            .expect("generate key");
        let secret = cert.as_tsk().to_vec().expect("serialize key");
        let key = PersonalKey::load(&secret, PASSPHRASE, None).expect("load key");
        Self {
            id,
            key: Arc::new(key),
        }
    }

    /// How other users store this one.
    pub fn record(&self) -> ContactRecord {
        ContactRecord::new(
            self.id,
            self.key.fingerprint(),
            Some(self.key.public_keyring().to_vec()),
        )
    }

    pub fn coder(&self) -> Coder {
        self.coder_with(CoderConfig::default())
    }

    pub fn coder_with(&self, config: CoderConfig) -> Coder {
        Coder::new(Some(Arc::clone(&self.key)), Arc::new(ContactKeyCache::new()), config)
    }
}

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
