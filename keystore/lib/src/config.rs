// Copyright (C) Microsoft Corporation. All rights reserved.

//! Service configuration.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use ks2_keymint_interface::ErrorCode;
use ks2_keymint_sim::PatchLevelError;
use ks2_keymint_sim::PatchLevels;
use ks2_keymint_sim::SimConfig;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::permission::PolicyConfig;

/// Default number of concurrent operations per security level.
pub const DEFAULT_MAX_OPERATIONS: usize = 16;

/// Configuration error
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read
    #[error("failed to read configuration")]
    Io(#[from] std::io::Error),

    /// The file is not valid JSON for [`KeystoreConfig`]
    #[error("malformed configuration")]
    Json(#[from] serde_json::Error),

    /// `patch_level` could not be parsed
    #[error("malformed patch level")]
    PatchLevel(#[from] PatchLevelError),

    /// A backend could not be created
    #[error("backend initialization failed")]
    Backend(#[from] ErrorCode),

    /// A backend could not be attached
    #[error("backend rejected")]
    Keystore(#[from] crate::error::Error),

    /// The configuration is inconsistent
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Keystore configuration.
///
/// Every field has a default, so `{}` is a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeystoreConfig {
    /// Operation slots per security level
    pub max_operations: usize,

    /// Software backends to create, one per security level
    pub security_levels: Vec<SimConfig>,

    /// Access policy
    pub policy: PolicyConfig,

    /// Package names per uid, used for attestation application ids
    pub application_ids: BTreeMap<u32, Vec<String>>,

    /// Patch levels in `security_patch.txt` form, applied to every backend
    pub patch_level: Option<String>,
}

impl Default for KeystoreConfig {
    fn default() -> Self {
        Self {
            max_operations: DEFAULT_MAX_OPERATIONS,
            security_levels: vec![SimConfig::default()],
            policy: PolicyConfig::default(),
            application_ids: BTreeMap::new(),
            patch_level: None,
        }
    }
}

impl KeystoreConfig {
    /// Parses a JSON configuration.
    ///
    /// # Error
    /// * `ConfigError::Json` - Malformed JSON
    /// * `ConfigError::PatchLevel` - Malformed `patch_level`
    /// * `ConfigError::Invalid` - Not a JSON object, zero slots or duplicate
    ///   security levels
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        // Derived struct deserialization also accepts the positional array form.
        let value: serde_json::Value = serde_json::from_str(json)?;
        if !value.is_object() {
            return Err(ConfigError::Invalid(
                "configuration must be a JSON object".into(),
            ));
        }
        let mut config: KeystoreConfig = serde_json::from_value(value)?;
        config.validate()?;
        if let Some(text) = config.patch_level.as_deref() {
            let levels = PatchLevels::from_str(text)?;
            for backend in config.security_levels.iter_mut() {
                backend.patch_levels = levels;
            }
        }
        Ok(config)
    }

    /// Reads a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        tracing::debug!(path = %path.display(), "loading configuration");
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_operations == 0 {
            return Err(ConfigError::Invalid("max_operations must be positive".into()));
        }
        for (i, backend) in self.security_levels.iter().enumerate() {
            if self.security_levels[..i]
                .iter()
                .any(|b| b.security_level == backend.security_level)
            {
                return Err(ConfigError::Invalid(format!(
                    "duplicate security level {:?}",
                    backend.security_level
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ks2_keymint_interface::SecurityLevel;
    use test_with_tracing::test;

    use super::*;
    use crate::permission::KeyPerm;

    #[test]
    fn test_empty_config() {
        let config = KeystoreConfig::from_json("{}").expect("parse");
        assert_eq!(config, KeystoreConfig::default());
        assert_eq!(config.max_operations, DEFAULT_MAX_OPERATIONS);
    }

    #[test]
    fn test_full_config() {
        let json = r#"{
            "max_operations": 4,
            "security_levels": [
                { "security_level": "TrustedEnvironment", "max_operations": 8 },
                { "security_level": "StrongBox" }
            ],
            "policy": {
                "namespaces": [ { "nspace": 102, "uid": 1000, "perms": ["Use", "ManageBlob"] } ]
            },
            "application_ids": { "10001": ["com.example.app"] },
            "patch_level": "2024-06-05"
        }"#;
        let config = KeystoreConfig::from_json(json).expect("parse");
        assert_eq!(config.max_operations, 4);
        assert_eq!(config.security_levels.len(), 2);
        assert_eq!(config.security_levels[1].security_level, SecurityLevel::StrongBox);
        assert_eq!(config.policy.namespaces[0].perms, vec![KeyPerm::Use, KeyPerm::ManageBlob]);
        assert_eq!(config.application_ids[&10001], vec!["com.example.app".to_string()]);
        for backend in &config.security_levels {
            assert_eq!(backend.patch_levels.system, Some(202406));
            assert_eq!(backend.patch_levels.vendor, Some(20240605));
        }
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            KeystoreConfig::from_json(r#"{ "max_operations": 0 }"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            KeystoreConfig::from_json(r#"{ "security_levels": [{}, {}] }"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            KeystoreConfig::from_json(r#"{ "patch_level": "soon" }"#),
            Err(ConfigError::PatchLevel(_))
        ));
    }

    #[test]
    fn test_rejects_malformed_json() {
        assert!(matches!(
            KeystoreConfig::from_json("{"),
            Err(ConfigError::Json(_))
        ));
        assert!(matches!(
            KeystoreConfig::from_json("not json"),
            Err(ConfigError::Json(_))
        ));
        assert!(matches!(
            KeystoreConfig::from_json(r#"{ "max_operations": "many" }"#),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn test_rejects_array_form() {
        assert!(matches!(
            KeystoreConfig::from_json("[1]"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            KeystoreConfig::from_json("[]"),
            Err(ConfigError::Invalid(_))
        ));
    }
}
