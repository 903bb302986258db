//! Keyring fixtures for unit tests.

use std::time::Duration;

use sequoia_openpgp as openpgp;
use openpgp::cert::prelude::*;
use openpgp::serialize::SerializeInto;
use openpgp::types::KeyFlags;

pub const PASSPHRASE: &str = "correct horse battery";

pub struct Fixture {
    pub secret: Vec<u8>,
    pub public: Vec<u8>,
    pub fingerprint: String,
}

fn finish(builder: CertBuilder<'_>) -> Fixture {
    let (cert, _revocation) = builder
        .set_password(Some(PASSPHRASE.into()))
        .generate()
        .unwrap();
    let secret = cert.as_tsk().to_vec().unwrap();
    let public = cert.to_vec().unwrap();
    Fixture {
        secret,
        public,
        fingerprint: hex::encode(cert.fingerprint().as_bytes()),
    }
}

/// Master key for authentication, separate signing and encryption subkeys.
pub fn split(uid: &str) -> Fixture {
    finish(
        CertBuilder::new()
            .add_userid(uid)
            .add_signing_subkey()
            .add_transport_encryption_subkey(),
    )
}

/// Master key signs; single encryption subkey.
pub fn legacy(uid: &str) -> Fixture {
    finish(
        CertBuilder::new()
            .add_userid(uid)
            .set_primary_key_flags(KeyFlags::empty().set_certification().set_signing())
            .add_transport_encryption_subkey(),
    )
}

/// No encryption subkey at all.
pub fn sign_only(uid: &str) -> Fixture {
    finish(
        CertBuilder::new()
            .add_userid(uid)
            .set_primary_key_flags(KeyFlags::empty().set_certification().set_signing())
            .add_signing_subkey(),
    )
}

/// Split layout carrying several user IDs; the first one is primary.
pub fn with_user_ids(uids: &[&str]) -> Fixture {
    let builder = uids
        .iter()
        .fold(CertBuilder::new(), |builder, uid| builder.add_userid(*uid));
    finish(builder.add_signing_subkey().add_transport_encryption_subkey())
}

/// Split layout whose keys expire after `validity`.
pub fn expiring(uid: &str, validity: Duration) -> Fixture {
    finish(
        CertBuilder::new()
            .add_userid(uid)
            .set_validity_period(validity)
            .add_signing_subkey()
            .add_transport_encryption_subkey(),
    )
}
