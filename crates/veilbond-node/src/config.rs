use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use veilbond_attest::AttestConfig;
use veilbond_ledger::LedgerConfig;
use veilbond_relay::{EvidenceConfig, RateLimitConfig, RelayConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub node: NodeSettings,
    pub storage: StorageConfig,
    pub api: ApiConfig,
    pub ledger: LedgerConfig,
    pub attest: AttestConfig,
    pub relay: RelayConfig,
    pub rate_limit: RateLimitConfig,
    pub evidence: EvidenceConfig,
    pub sweeps: SweepConfig,
    pub secrets: SecretsConfig,
    /// Sharing contexts seeded into the in-process settlement adapter
    #[serde(default)]
    pub contexts: Vec<ContextEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSettings {
    pub data_dir: PathBuf,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// "memory" or "rocksdb"
    pub backend: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    /// How often the scheduler polls for due slash jobs, in seconds
    pub job_poll_interval_secs: u64,

    /// How often unresolved bonds are checked for expiry, in seconds
    pub bond_expiry_interval_secs: u64,

    /// How often evidence, replay fingerprints and resolved
    /// attestations are swept, in seconds
    pub retention_sweep_interval_secs: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            job_poll_interval_secs: 15,
            bond_expiry_interval_secs: 60,
            retention_sweep_interval_secs: 300,
        }
    }
}

/// Secrets arrive through configuration or environment, never minted
/// and persisted by the engine itself. Absent values fall back to
/// ephemeral process-local keys, which only suits development.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecretsConfig {
    /// 32-byte hex key for evidence encryption at rest
    pub evidence_key_hex: Option<String>,

    /// 32-byte hex seed for the receipt signing key
    pub receipt_seed_hex: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextEntry {
    /// Human handle; the context id is derived from it
    pub name: String,
    pub requires_bond: bool,
    pub base_minimum_units: u64,
    pub ttl_secs: i64,
    pub challenge_window_secs: i64,
    /// Actors allowed to file attestations against this context
    #[serde(default)]
    pub guardians: Vec<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node: NodeSettings {
                data_dir: PathBuf::from("./data"),
                name: "veilbond-node".to_string(),
            },
            storage: StorageConfig {
                backend: "memory".to_string(),
            },
            api: ApiConfig {
                enabled: true,
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            ledger: LedgerConfig::default(),
            attest: AttestConfig::default(),
            relay: RelayConfig::default(),
            rate_limit: RateLimitConfig::default(),
            evidence: EvidenceConfig::default(),
            sweeps: SweepConfig::default(),
            secrets: SecretsConfig::default(),
            contexts: Vec::new(),
        }
    }
}

impl NodeConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

pub fn decode_key_hex(value: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(value)?;
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("key must be exactly 32 bytes of hex"))?;
    Ok(arr)
}
