#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::config::CoderConfig;
    use crate::errors::CoreError;
    use kon_crypto::status::ErrorSet;

    proptest! {
        #[test]
        fn buffer_size_validation(shift in 0u32..24, offset in 0usize..3) {
            let size = (1usize << shift) + offset;
            let config = CoderConfig { buffer_size: size, ..CoderConfig::default() };
            let valid = offset == 0 && (8..=20).contains(&shift);
            prop_assert_eq!(config.validate().is_ok(), valid);
        }

        #[test]
        fn config_toml_never_panics(s in ".{0,128}") {
            let _ = CoderConfig::from_toml_str(&s);
        }

        #[test]
        fn contact_errors_map_to_one_flag(contact in "[a-z]{1,12}") {
            let errors: ErrorSet = CoreError::KeyUnavailable(contact).security_errors();
            prop_assert_eq!(errors.len(), 1);
        }
    }
}
