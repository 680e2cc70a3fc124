//! Host Configuration

use anyhow::{Context, Result};
use bridge_runtime::DrainLoopConfig;
use ledger_types::SigningIdentity;
use local_node::NodeConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Demo host configuration, loaded from JSON
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Host frames per second
    pub fps: u32,
    /// Frames to run before exiting (0 = until Ctrl+C)
    pub frames: u64,
    /// Submit a move every N frames
    pub submit_every: u64,
    /// Player name registered on the first frame
    pub player_name: String,
    /// bs58-encoded 32-byte secret; random identity when unset
    pub secret_key: Option<String>,
    /// Drain loop settings
    pub drain: DrainLoopConfig,
    /// Local node settings
    pub node: NodeConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            fps: 60,
            frames: 0,
            submit_every: 30,
            player_name: "player-one".to_string(),
            secret_key: None,
            drain: DrainLoopConfig::default(),
            node: NodeConfig::default(),
        }
    }
}

impl HostConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        Ok(config)
    }

    /// Signing identity for the local node
    pub fn identity(&self) -> Result<SigningIdentity> {
        let Some(encoded) = &self.secret_key else {
            return Ok(SigningIdentity::generate());
        };
        let bytes = bs58::decode(encoded)
            .into_vec()
            .context("secret_key is not valid base58")?;
        let secret: [u8; 32] = bytes.try_into().map_err(|bytes: Vec<u8>| {
            anyhow::anyhow!("secret_key must be 32 bytes, got {}", bytes.len())
        })?;
        Ok(SigningIdentity::from_secret_bytes(&secret))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_runtime::ShutdownPolicy;
    use std::io::Write;

    #[test]
    fn test_load_partial_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "fps": 30,
                "drain": {{ "interval_ms": 0, "shutdown_policy": "discard" }},
                "node": {{ "block_interval_ms": 200 }}
            }}"#
        )
        .unwrap();

        let config = HostConfig::load(file.path()).unwrap();
        assert_eq!(config.fps, 30);
        assert_eq!(config.submit_every, 30);
        assert_eq!(config.drain.interval_ms, 0);
        assert_eq!(config.drain.shutdown_policy, ShutdownPolicy::Discard);
        assert_eq!(config.node.block_interval_ms, 200);
        assert!(!config.node.mine_empty_blocks);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = HostConfig::load(&dir.path().join("missing.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config"));
    }

    #[test]
    fn test_identity_from_secret() {
        let secret = [7u8; 32];
        let config = HostConfig {
            secret_key: Some(bs58::encode(secret).into_string()),
            ..Default::default()
        };
        let identity = config.identity().unwrap();
        assert_eq!(identity.address(), SigningIdentity::from_secret_bytes(&secret).address());

        let short = HostConfig {
            secret_key: Some(bs58::encode([1u8; 8]).into_string()),
            ..Default::default()
        };
        assert!(short.identity().is_err());
    }
}
