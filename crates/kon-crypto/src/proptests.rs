#[cfg(test)]
mod tests {
    use std::sync::OnceLock;

    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    use crate::decrypt::decrypt_message;
    use crate::envelope::{ContentType, Envelope};
    use crate::keys::{classify, KeyCandidate, PersonalKey};
    use crate::status::{CoderError, ErrorSet};
    use crate::stream::PipelineOptions;
    use crate::test_keys;
    use crate::userid::UserId;

    fn bob() -> &'static PersonalKey {
        static KEY: OnceLock<PersonalKey> = OnceLock::new();
        KEY.get_or_init(|| {
            let fixture = test_keys::split("Bob <bob@example.org>");
            PersonalKey::load(&fixture.secret, test_keys::PASSPHRASE, None).unwrap()
        })
    }

    fn identity() -> impl Strategy<Value = String> {
        "[A-Za-z][A-Za-z ]{0,12} <[a-z]{1,8}@example\\.org>"
    }

    fn candidate() -> impl Strategy<Value = KeyCandidate> {
        (any::<bool>(), any::<bool>()).prop_map(|(can_sign, can_encrypt)| KeyCandidate {
            is_primary: false,
            can_sign,
            can_encrypt,
        })
    }

    proptest! {
        #[test]
        fn envelope_decode_never_panics(data in any::<Vec<u8>>()) {
            let _ = Envelope::decode(&data);
        }

        #[test]
        fn recipient_binding_is_exact_membership(
            to in proptest::collection::vec(identity(), 1..5),
            me in identity(),
        ) {
            let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
            let env = Envelope::new("Alice <alice@example.org>", to.clone(), ts, ContentType::PlainText, "x").unwrap();
            let decoded = Envelope::decode(&env.encode()).unwrap();
            let errors = decoded.check_binding(&me, None);
            prop_assert_eq!(errors.contains(CoderError::InvalidRecipient), !to.contains(&me));
        }

        #[test]
        fn decode_inverts_encode_at_any_precision(
            secs in 0i64..4_000_000_000,
            nanos in 0u32..1_000_000_000,
            to in proptest::collection::vec(identity(), 1..4),
            body in any::<Vec<u8>>(),
        ) {
            let ts = Utc.timestamp_opt(secs, nanos).unwrap();
            let env = Envelope::new("Alice (a; b) <alice@example.org>", to, ts, ContentType::PlainText, body).unwrap();
            prop_assert_eq!(Envelope::decode(&env.encode()).unwrap(), env);
        }

        #[test]
        fn error_set_iterates_sorted_and_deduplicated(ordinals in proptest::collection::vec(0u8..12, 0..30)) {
            let set: ErrorSet = ordinals.iter().filter_map(|o| CoderError::from_ordinal(*o)).collect();
            let listed: Vec<u8> = set.iter().map(CoderError::ordinal).collect();
            let mut expected = ordinals.clone();
            expected.sort_unstable();
            expected.dedup();
            prop_assert_eq!(listed, expected);
            prop_assert_eq!(ErrorSet::from_bits(set.bits()), set);
        }

        #[test]
        fn classified_roles_respect_capabilities(
            primary_signs in any::<bool>(),
            subkeys in proptest::collection::vec(candidate(), 0..5),
        ) {
            let mut candidates = vec![KeyCandidate { is_primary: true, can_sign: primary_signs, can_encrypt: false }];
            candidates.extend(subkeys);

            let layout = classify(&candidates).unwrap();
            if let Ok(roles) = layout.roles() {
                prop_assert_eq!(roles.auth, 0);
                prop_assert!(candidates[roles.sign].can_sign);
                prop_assert!(candidates[roles.encrypt].can_encrypt);
                prop_assert!(roles.encrypt != roles.auth);
                prop_assert!(roles.encrypt != roles.sign);
            } else {
                let signer = candidates.iter().skip(1).position(|c| c.can_sign).map(|i| i + 1);
                let has_encrypt = candidates
                    .iter()
                    .enumerate()
                    .skip(1)
                    .any(|(i, c)| c.can_encrypt && Some(i) != signer);
                prop_assert!(!has_encrypt || (signer.is_none() && !primary_signs));
            }
        }

        #[test]
        fn user_id_parse_never_panics(s in ".{0,64}") {
            let _ = UserId::parse(&s).to_string();
        }

        #[test]
        fn user_id_display_reparses(
            name in "[A-Za-z][A-Za-z ]{0,10}[A-Za-z]",
            comment in "[a-z]{0,8}",
            email in "([a-z]{1,8}@example\\.org)?",
        ) {
            let uid = UserId::new(&name, &comment, &email);
            prop_assert_eq!(UserId::parse(&uid.to_string()), uid);
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn random_ciphertext_never_yields_plaintext(data in proptest::collection::vec(any::<u8>(), 0..512)) {
            let out = decrypt_message(&data, bob().encryption_key(), None, &PipelineOptions::default());
            prop_assert!(out.plaintext.is_none());
            prop_assert!(!out.errors.is_empty());
        }
    }
}
