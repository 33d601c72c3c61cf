use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default timeout for read-only evaluation
pub const DEFAULT_EVALUATE_TIMEOUT: Duration = Duration::from_secs(5);
/// Default timeout for endorsement collection
pub const DEFAULT_ENDORSE_TIMEOUT: Duration = Duration::from_secs(15);
/// Default timeout for submission dispatch
pub const DEFAULT_SUBMIT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default timeout for commit-status polling
pub const DEFAULT_COMMIT_STATUS_TIMEOUT: Duration = Duration::from_secs(60);
/// Default timeout for establishing the TCP/TLS connection
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connector configuration: one gateway per organizational role
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Gateways keyed by role name (e.g. "farmer", "lab")
    pub gateways: BTreeMap<String, GatewayConfig>,
}

/// Connection settings for a single role
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayConfig {
    /// Organization (MSP) identifier
    pub msp_id: String,

    /// Client certificate file, or directory holding exactly one certificate
    pub cert_path: PathBuf,

    /// Client private key file, or directory holding exactly one key
    pub key_path: PathBuf,

    /// TLS root certificate of the peer
    pub tls_cert_path: PathBuf,

    /// Client TLS certificate for mutual TLS (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_tls_cert_path: Option<PathBuf>,

    /// Client TLS private key for mutual TLS (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_tls_key_path: Option<PathBuf>,

    /// Peer network address (host:port)
    pub peer_endpoint: String,

    /// Host name expected in the peer's TLS certificate
    pub gateway_peer: String,

    /// Ledger channel name
    pub channel_name: String,

    /// Contract (chaincode) name
    pub chaincode_name: String,

    /// Perform the TLS handshake during setup instead of on first use
    #[serde(default)]
    pub connect_eagerly: bool,

    #[serde(default)]
    pub timeouts: Timeouts,
}

/// Per-operation timeouts, in seconds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Timeouts {
    #[serde(default = "default_evaluate")]
    pub evaluate_seconds: u64,

    #[serde(default = "default_endorse")]
    pub endorse_seconds: u64,

    #[serde(default = "default_submit")]
    pub submit_seconds: u64,

    #[serde(default = "default_commit_status")]
    pub commit_status_seconds: u64,

    #[serde(default = "default_connect")]
    pub connect_seconds: u64,
}

fn default_evaluate() -> u64 {
    DEFAULT_EVALUATE_TIMEOUT.as_secs()
}

fn default_endorse() -> u64 {
    DEFAULT_ENDORSE_TIMEOUT.as_secs()
}

fn default_submit() -> u64 {
    DEFAULT_SUBMIT_TIMEOUT.as_secs()
}

fn default_commit_status() -> u64 {
    DEFAULT_COMMIT_STATUS_TIMEOUT.as_secs()
}

fn default_connect() -> u64 {
    DEFAULT_CONNECT_TIMEOUT.as_secs()
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            evaluate_seconds: default_evaluate(),
            endorse_seconds: default_endorse(),
            submit_seconds: default_submit(),
            commit_status_seconds: default_commit_status(),
            connect_seconds: default_connect(),
        }
    }
}

impl Timeouts {
    pub fn evaluate(&self) -> Duration {
        Duration::from_secs(self.evaluate_seconds)
    }

    pub fn endorse(&self) -> Duration {
        Duration::from_secs(self.endorse_seconds)
    }

    pub fn submit(&self) -> Duration {
        Duration::from_secs(self.submit_seconds)
    }

    pub fn commit_status(&self) -> Duration {
        Duration::from_secs(self.commit_status_seconds)
    }

    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_seconds)
    }

    fn validate(&self) -> Result<()> {
        let all = [
            ("evaluate", self.evaluate_seconds),
            ("endorse", self.endorse_seconds),
            ("submit", self.submit_seconds),
            ("commit_status", self.commit_status_seconds),
            ("connect", self.connect_seconds),
        ];
        for (name, seconds) in all {
            if seconds == 0 {
                anyhow::bail!("{} timeout must be greater than 0", name);
            }
        }
        Ok(())
    }
}

impl GatewayConfig {
    /// Validate a single gateway entry
    pub fn validate(&self) -> Result<()> {
        if self.msp_id.trim().is_empty() {
            anyhow::bail!("msp_id cannot be empty");
        }

        if !self.peer_endpoint.contains(':') {
            anyhow::bail!(
                "peer_endpoint '{}' must be in host:port form",
                self.peer_endpoint
            );
        }

        if self.gateway_peer.trim().is_empty() {
            anyhow::bail!("gateway_peer cannot be empty");
        }

        if self.channel_name.trim().is_empty() || self.chaincode_name.trim().is_empty() {
            anyhow::bail!("channel_name and chaincode_name are required");
        }

        if self.client_tls_cert_path.is_some() != self.client_tls_key_path.is_some() {
            anyhow::bail!("client_tls_cert_path and client_tls_key_path must be set together");
        }

        self.timeouts.validate()
    }
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        let mut gateways = BTreeMap::new();

        gateways.insert(
            "farmer".to_string(),
            sample_gateway("Org1MSP", "farmer", "localhost:7051", "peer0.org1.example.com"),
        );
        gateways.insert(
            "lab".to_string(),
            sample_gateway("Org2MSP", "lab", "localhost:9051", "peer0.org2.example.com"),
        );

        Self { gateways }
    }
}

fn sample_gateway(msp_id: &str, role: &str, endpoint: &str, peer: &str) -> GatewayConfig {
    let base = PathBuf::from("./crypto").join(role);
    GatewayConfig {
        msp_id: msp_id.to_string(),
        cert_path: base.join("msp/signcerts"),
        key_path: base.join("msp/keystore"),
        tls_cert_path: base.join("tls/ca.crt"),
        client_tls_cert_path: None,
        client_tls_key_path: None,
        peer_endpoint: endpoint.to_string(),
        gateway_peer: peer.to_string(),
        channel_name: "mychannel".to_string(),
        chaincode_name: "ayurtrace".to_string(),
        connect_eagerly: false,
        timeouts: Timeouts::default(),
    }
}

impl ConnectorConfig {
    /// Load configuration from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file {}", path.as_ref().display()))?;

        let config: ConnectorConfig = toml::from_str(&content)
            .context("Failed to parse config file")?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;

        fs::write(path.as_ref(), content)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Validate every gateway entry
    pub fn validate(&self) -> Result<()> {
        if self.gateways.is_empty() {
            anyhow::bail!("At least one gateway must be configured");
        }

        for (role, gateway) in &self.gateways {
            if role.trim().is_empty() {
                anyhow::bail!("Gateway role names cannot be empty");
            }
            gateway
                .validate()
                .with_context(|| format!("Invalid gateway configuration for role '{}'", role))?;
        }

        Ok(())
    }

    pub fn gateway(&self, role: &str) -> Option<&GatewayConfig> {
        self.gateways.get(role)
    }
}
