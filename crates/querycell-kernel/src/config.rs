//! Kernel configuration.

use querycell_client::RemoteConfig;
use serde::{Deserialize, Serialize};

/// Kernel configuration with sensible defaults for every field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Remote endpoint settings.
    pub remote: RemoteConfig,
    /// Handshake deadline override in milliseconds.
    pub handshake_timeout_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_document() {
        let config: KernelConfig = serde_json::from_str("{}").unwrap();
        assert!(config.handshake_timeout_ms.is_none());
        assert!(!config.remote.default_base_url.is_empty());
    }
}
