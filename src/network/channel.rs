use std::path::PathBuf;
use std::time::Duration;

use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint};
use tracing::{debug, info};

use crate::config::{GatewayConfig, DEFAULT_CONNECT_TIMEOUT};
use crate::error::{describe, GatewayError, Result};
use crate::pki::{credentials, parse_certificate_pem};

/// Builds TLS-secured gRPC channels to a gateway peer.
///
/// Trust is pinned to the single configured root certificate; neither the
/// system store nor bundled web roots are consulted. The peer certificate
/// must be valid for `gateway_peer`, which may differ from the host in
/// `peer_endpoint` (e.g. a load balancer address).
#[derive(Debug, Clone)]
pub struct SecureChannelFactory {
    tls_cert_path: PathBuf,
    peer_endpoint: String,
    gateway_peer: String,
    client_identity: Option<(PathBuf, PathBuf)>,
    connect_eagerly: bool,
    connect_timeout: Duration,
}

impl SecureChannelFactory {
    pub fn new(
        tls_cert_path: impl Into<PathBuf>,
        peer_endpoint: impl Into<String>,
        gateway_peer: impl Into<String>,
    ) -> Self {
        Self {
            tls_cert_path: tls_cert_path.into(),
            peer_endpoint: peer_endpoint.into(),
            gateway_peer: gateway_peer.into(),
            client_identity: None,
            connect_eagerly: false,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        let mut factory = Self::new(
            &config.tls_cert_path,
            &config.peer_endpoint,
            &config.gateway_peer,
        )
        .connect_eagerly(config.connect_eagerly)
        .connect_timeout(config.timeouts.connect());

        if let (Some(cert), Some(key)) = (&config.client_tls_cert_path, &config.client_tls_key_path)
        {
            factory = factory.with_client_identity(cert, key);
        }

        factory
    }

    /// Present a client certificate during the TLS handshake
    pub fn with_client_identity(
        mut self,
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
    ) -> Self {
        self.client_identity = Some((cert_path.into(), key_path.into()));
        self
    }

    /// Complete the TLS handshake in `build` rather than on first request
    pub fn connect_eagerly(mut self, eager: bool) -> Self {
        self.connect_eagerly = eager;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Build the channel.
    ///
    /// Lazy channels only resolve and connect on first use, so an unreachable
    /// peer is reported by the first transaction rather than here.
    pub async fn build(&self) -> Result<Channel> {
        let root_pem = credentials::read_file(&self.tls_cert_path).await?;
        parse_certificate_pem(&root_pem)?;

        if self.gateway_peer.trim().is_empty() {
            return Err(GatewayError::ChannelEstablishment(
                "expected server name must not be empty".into(),
            ));
        }

        let mut tls = ClientTlsConfig::new()
            .ca_certificate(Certificate::from_pem(&root_pem))
            .domain_name(self.gateway_peer.clone());

        if let Some((cert_path, key_path)) = &self.client_identity {
            let cert = credentials::read_file(cert_path).await?;
            let key = credentials::read_file(key_path).await?;
            debug!("Using client TLS certificate {}", cert_path.display());
            tls = tls.identity(tonic::transport::Identity::from_pem(cert, key));
        }

        let endpoint = Endpoint::from_shared(format!("https://{}", self.peer_endpoint))
            .map_err(|e| {
                GatewayError::ChannelEstablishment(format!(
                    "invalid peer endpoint '{}': {}",
                    self.peer_endpoint,
                    describe(&e)
                ))
            })?
            .connect_timeout(self.connect_timeout)
            .tls_config(tls)
            .map_err(|e| {
                GatewayError::ChannelEstablishment(format!(
                    "invalid TLS configuration for '{}': {}",
                    self.gateway_peer,
                    describe(&e)
                ))
            })?;

        if !self.connect_eagerly {
            debug!("Created lazy channel to {}", self.peer_endpoint);
            return Ok(endpoint.connect_lazy());
        }

        let channel = endpoint.connect().await.map_err(|e| {
            GatewayError::ChannelEstablishment(format!(
                "connection to {} ({}) failed: {}",
                self.peer_endpoint,
                self.gateway_peer,
                describe(&e)
            ))
        })?;

        info!(
            "Connected to {} as {}",
            self.peer_endpoint, self.gateway_peer
        );
        Ok(channel)
    }
}
