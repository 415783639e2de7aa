//! Protocol configuration.
//!
//! [`ProtocolConfig`] is the immutable runtime configuration handed to a
//! processor. [`ProtocolSettings`] is its serializable counterpart, loaded in
//! the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML file (if specified via `UNET_CONFIG` or [`ProtocolSettings::from_file`])
//! 3. Environment variables

use crate::crypto::CryptoScheme;
use crate::frame::{HASH_SIZE, HEADER_FLAG_SIZE};
use crate::packet::PACKET_ID_SIZE;
use crate::{DEFAULT_MAX_FRAME_SIZE, MAX_FRAME_SIZE_LIMIT};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Runtime protocol configuration, fixed for the lifetime of a processor.
#[derive(Clone)]
pub struct ProtocolConfig {
    verify_integrity: bool,
    crypto: Option<Arc<dyn CryptoScheme>>,
    max_frame_size: u32,
}

impl ProtocolConfig {
    /// Plain frames without integrity hashes or encryption.
    pub fn new() -> Self {
        Self {
            verify_integrity: false,
            crypto: None,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Builds a runtime configuration from loaded settings.
    pub fn from_settings(
        settings: &ProtocolSettings,
        crypto: Option<Arc<dyn CryptoScheme>>,
    ) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self {
            verify_integrity: settings.verify_integrity,
            crypto,
            max_frame_size: settings.max_frame_size,
        })
    }

    pub fn with_verification(mut self, enabled: bool) -> Self {
        self.verify_integrity = enabled;
        self
    }

    pub fn with_crypto(mut self, scheme: Arc<dyn CryptoScheme>) -> Self {
        self.crypto = Some(scheme);
        self
    }

    pub fn with_max_frame_size(mut self, size: u32) -> Self {
        self.max_frame_size = size;
        self
    }

    pub fn verify_integrity(&self) -> bool {
        self.verify_integrity
    }

    pub fn crypto(&self) -> Option<&dyn CryptoScheme> {
        self.crypto.as_deref()
    }

    pub fn max_frame_size(&self) -> u32 {
        self.max_frame_size
    }

    /// Bytes between the length prefix and the body: the encrypt flag plus
    /// the integrity hash when verification is on.
    pub fn header_size(&self) -> usize {
        if self.verify_integrity {
            HEADER_FLAG_SIZE + HASH_SIZE
        } else {
            HEADER_FLAG_SIZE
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ProtocolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolConfig")
            .field("verify_integrity", &self.verify_integrity)
            .field("crypto", &self.crypto.is_some())
            .field("max_frame_size", &self.max_frame_size)
            .finish()
    }
}

/// Serializable protocol settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolSettings {
    /// Attach and check a 128-bit digest on every frame.
    pub verify_integrity: bool,
    /// Largest accepted value of the length prefix.
    pub max_frame_size: u32,
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            verify_integrity: false,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl ProtocolSettings {
    /// Loads settings from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut settings = Self::default();

        if let Ok(path) = std::env::var("UNET_CONFIG") {
            settings = Self::from_file(&path)?;
        }

        settings.apply_env_overrides();
        settings.validate()?;
        Ok(settings)
    }

    /// Loads settings from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let settings: ProtocolSettings = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(settings)
    }

    /// Saves settings to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(verify) = lookup("UNET_VERIFY_INTEGRITY") {
            self.verify_integrity = verify == "1" || verify.to_lowercase() == "true";
        }

        if let Some(size) = lookup("UNET_MAX_FRAME_SIZE") {
            if let Ok(n) = size.parse() {
                self.max_frame_size = n;
            }
        }
    }

    /// Checks that a frame of the configured maximum can hold at least a
    /// verified, identifier-only body.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let minimum = (HEADER_FLAG_SIZE + HASH_SIZE + PACKET_ID_SIZE) as u32;
        if self.max_frame_size < minimum {
            return Err(ConfigError::ValidationError(format!(
                "max_frame_size {} is below the minimum frame of {} bytes",
                self.max_frame_size, minimum
            )));
        }
        if self.max_frame_size > MAX_FRAME_SIZE_LIMIT {
            return Err(ConfigError::ValidationError(format!(
                "max_frame_size {} exceeds the limit of {} bytes",
                self.max_frame_size, MAX_FRAME_SIZE_LIMIT
            )));
        }
        Ok(())
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
