//! Fuzzing target for the decryption pipeline.
//!
//! Uses a throwaway key generated once per process; arbitrary input must
//! never panic the pipeline.

#![no_main]
use std::sync::OnceLock;

use libfuzzer_sys::fuzz_target;
use kon_crypto::decrypt::decrypt_message;
use kon_crypto::keys::PersonalKey;
use kon_crypto::openpgp::cert::prelude::*;
use kon_crypto::openpgp::serialize::SerializeInto;
use kon_crypto::stream::PipelineOptions;

fn key() -> &'static PersonalKey {
    static KEY: OnceLock<PersonalKey> = OnceLock::new();
    KEY.get_or_init(|| {
        let (cert, _) = CertBuilder::new()
            .add_userid("Fuzz <fuzz@example.org>")
            .add_signing_subkey()
            .add_transport_encryption_subkey()
            .generate()
            .expect("generate key");
        let secret = cert.as_tsk().to_vec().expect("serialize key");
        PersonalKey::load(&secret, "", None).expect("load key")
    })
}

fuzz_target!(|data: &[u8]| {
    let _ = decrypt_message(data, key().encryption_key(), None, &PipelineOptions::default());
});
