//! Fuzzing target for the inner envelope decoder.

#![no_main]
use libfuzzer_sys::fuzz_target;
use kon_crypto::envelope::Envelope;

fuzz_target!(|data: &[u8]| {
    // Decoding must never panic; a decoded envelope must re-encode.
    if let Ok(envelope) = Envelope::decode(data) {
        let _ = envelope.check_binding("Bob <bob@example.org>", Some("Alice <alice@example.org>"));
        let _ = envelope.encode();
    }
});
