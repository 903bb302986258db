//! Configuration management

use std::path::{Path, PathBuf};

use kon_crypto::openpgp::types::{CompressionAlgorithm, SymmetricAlgorithm};
use kon_crypto::stream::PipelineOptions;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const MIN_BUFFER_SIZE: usize = 1 << 8;
const MAX_BUFFER_SIZE: usize = 1 << 20;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Session cipher for outgoing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cipher {
    Aes128,
    Aes192,
    Aes256,
}

impl Cipher {
    pub fn algorithm(self) -> SymmetricAlgorithm {
        match self {
            Cipher::Aes128 => SymmetricAlgorithm::AES128,
            Cipher::Aes192 => SymmetricAlgorithm::AES192,
            Cipher::Aes256 => SymmetricAlgorithm::AES256,
        }
    }

    fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aes128" => Ok(Cipher::Aes128),
            "aes192" => Ok(Cipher::Aes192),
            "aes256" => Ok(Cipher::Aes256),
            other => Err(ConfigError::Invalid(format!("Unknown cipher: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    Zip,
    Zlib,
    Uncompressed,
}

impl Compression {
    pub fn algorithm(self) -> CompressionAlgorithm {
        match self {
            Compression::Zip => CompressionAlgorithm::Zip,
            Compression::Zlib => CompressionAlgorithm::Zlib,
            Compression::Uncompressed => CompressionAlgorithm::Uncompressed,
        }
    }

    fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zip" => Ok(Compression::Zip),
            "zlib" => Ok(Compression::Zlib),
            "uncompressed" | "none" => Ok(Compression::Uncompressed),
            other => Err(ConfigError::Invalid(format!("Unknown compression: {}", other))),
        }
    }
}

/// What to do with a message whose envelope does not match sender or recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindingPolicy {
    /// Deliver the content, flagged with the binding errors.
    Flag,
    /// Withhold the content; the errors are still recorded.
    Hide,
}

/// Coder configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoderConfig {
    /// Streaming chunk size in bytes (power of two)
    pub buffer_size: usize,
    pub cipher: Cipher,
    pub compression: Compression,
    /// Where encrypted attachments are staged
    pub temp_dir: PathBuf,
    pub binding_policy: BindingPolicy,
}

impl Default for CoderConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1 << 12,
            cipher: Cipher::Aes256,
            compression: Compression::Zip,
            temp_dir: std::env::temp_dir(),
            binding_policy: BindingPolicy::Flag,
        }
    }
}

impl CoderConfig {
    /// Load configuration from environment variables and TOML file
    pub fn load() -> Result<Self, ConfigError> {
        // Start with defaults
        let mut config = Self::default();

        if let Ok(size) = std::env::var("KON_CODER_BUFFER_SIZE") {
            config.buffer_size = size
                .parse()
                .map_err(|e| ConfigError::Invalid(format!("Invalid buffer_size: {}", e)))?;
        }

        if let Ok(cipher) = std::env::var("KON_CODER_CIPHER") {
            config.cipher = Cipher::parse(&cipher)?;
        }

        if let Ok(compression) = std::env::var("KON_CODER_COMPRESSION") {
            config.compression = Compression::parse(&compression)?;
        }

        if let Ok(path) = std::env::var("KON_CODER_TEMP_DIR") {
            config.temp_dir = PathBuf::from(path);
        }

        // TOML file wins over the environment
        if let Ok(config_path) = std::env::var("KON_CODER_CONFIG") {
            config.load_from_toml(Path::new(&config_path))?;
        }

        config.validate()?;

        Ok(config)
    }

    /// Parse a complete configuration; missing keys take their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.buffer_size.is_power_of_two() {
            return Err(ConfigError::Invalid(format!(
                "buffer_size must be a power of two, got {}",
                self.buffer_size
            )));
        }

        if !(MIN_BUFFER_SIZE..=MAX_BUFFER_SIZE).contains(&self.buffer_size) {
            return Err(ConfigError::Invalid(format!(
                "buffer_size must be between {} and {}",
                MIN_BUFFER_SIZE, MAX_BUFFER_SIZE
            )));
        }

        if !self.temp_dir.is_dir() {
            return Err(ConfigError::Invalid(format!(
                "Temporary directory not found: {:?}",
                self.temp_dir
            )));
        }

        Ok(())
    }

    /// Load from TOML config file, overriding only the keys present
    fn load_from_toml(&mut self, path: &Path) -> Result<(), ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let toml_config: toml::Value = toml::from_str(&content)?;

        if let Some(size) = toml_config.get("buffer_size").and_then(|v| v.as_integer()) {
            self.buffer_size = usize::try_from(size)
                .map_err(|_| ConfigError::Invalid(format!("Invalid buffer_size in TOML: {}", size)))?;
        }

        if let Some(cipher) = toml_config.get("cipher").and_then(|v| v.as_str()) {
            self.cipher = Cipher::parse(cipher)?;
        }

        if let Some(compression) = toml_config.get("compression").and_then(|v| v.as_str()) {
            self.compression = Compression::parse(compression)?;
        }

        if let Some(path) = toml_config.get("temp_dir").and_then(|v| v.as_str()) {
            self.temp_dir = PathBuf::from(path);
        }

        if let Some(policy) = toml_config.get("binding_policy").and_then(|v| v.as_str()) {
            self.binding_policy = match policy {
                "flag" => BindingPolicy::Flag,
                "hide" => BindingPolicy::Hide,
                other => {
                    return Err(ConfigError::Invalid(format!("Unknown binding_policy: {}", other)));
                }
            };
        }

        Ok(())
    }

    /// Pipeline options derived from this configuration
    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            buffer_size: self.buffer_size,
            cipher: self.cipher.algorithm(),
            compression: self.compression.algorithm(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = CoderConfig::default();
        config.validate().unwrap();
        let options = config.pipeline_options();
        assert_eq!(options.cipher, SymmetricAlgorithm::AES256);
        assert_eq!(options.compression, CompressionAlgorithm::Zip);
        assert_eq!(options.buffer_size, 4096);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = CoderConfig::from_toml_str("cipher = \"aes192\"\nbinding_policy = \"hide\"\n").unwrap();
        assert_eq!(config.cipher, Cipher::Aes192);
        assert_eq!(config.binding_policy, BindingPolicy::Hide);
        assert_eq!(config.compression, Compression::Zip);
        assert_eq!(config.buffer_size, 4096);
    }

    #[test]
    fn rejects_bad_buffer_sizes() {
        assert!(matches!(
            CoderConfig::from_toml_str("buffer_size = 1000"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            CoderConfig::from_toml_str("buffer_size = 16"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn rejects_unknown_cipher() {
        assert!(matches!(
            CoderConfig::from_toml_str("cipher = \"des\""),
            Err(ConfigError::Toml(_))
        ));
        assert!(Cipher::parse("des").is_err());
        assert_eq!(Cipher::parse(" AES128 ").unwrap(), Cipher::Aes128);
    }

    #[test]
    fn missing_temp_dir_is_invalid() {
        let config = CoderConfig {
            temp_dir: PathBuf::from("/definitely/not/here"),
            ..CoderConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn toml_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = tempfile::NamedTempFile::new_in(dir.path()).unwrap();
        writeln!(
            file,
            "buffer_size = 256\ncompression = \"zlib\"\ntemp_dir = {:?}",
            dir.path().to_str().unwrap()
        )
        .unwrap();

        let mut config = CoderConfig::default();
        config.load_from_toml(file.path()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.buffer_size, 256);
        assert_eq!(config.compression, Compression::Zlib);
        assert_eq!(config.temp_dir, dir.path());
    }
}
