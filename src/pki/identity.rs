use std::path::Path;

use pem::{EncodeConfig, LineEnding, Pem};
use prost::Message;

use super::credentials;
use crate::error::{GatewayError, Result};
use crate::protos::msp::SerializedIdentity;

/// Parsed X.509 certificate with the fields a gateway client needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    pem: String,
    der: Vec<u8>,
    subject: String,
    issuer: String,
    public_key: Vec<u8>,
    not_after: i64,
}

impl Certificate {
    /// Canonical PEM encoding (LF line endings)
    pub fn pem(&self) -> &str {
        &self.pem
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Raw subject public key (SEC1 point for EC keys)
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// Expiry as a unix timestamp
    pub fn not_after(&self) -> i64 {
        self.not_after
    }

    /// SHA-256 fingerprint of the DER encoding, hex encoded
    pub fn fingerprint(&self) -> String {
        hex::encode(super::sha256(&self.der))
    }
}

/// Parse the first `CERTIFICATE` block of PEM-encoded bytes
pub fn parse_certificate_pem(bytes: &[u8]) -> Result<Certificate> {
    let blocks = pem::parse_many(bytes)
        .map_err(|e| GatewayError::CertificateParse(format!("invalid PEM: {}", e)))?;

    let block = blocks
        .into_iter()
        .find(|block| block.tag() == "CERTIFICATE")
        .ok_or_else(|| GatewayError::CertificateParse("no CERTIFICATE block found".into()))?;

    let der = block.into_contents();
    let (_, cert) = x509_parser::parse_x509_certificate(&der)
        .map_err(|e| GatewayError::CertificateParse(format!("invalid X.509 certificate: {}", e)))?;

    let subject = cert.subject().to_string();
    let issuer = cert.issuer().to_string();
    let public_key = cert.public_key().subject_public_key.data.to_vec();
    let not_after = cert.validity().not_after.timestamp();

    let pem = pem::encode_config(
        &Pem::new("CERTIFICATE", der.clone()),
        EncodeConfig::new().set_line_ending(LineEnding::LF),
    );

    Ok(Certificate {
        pem,
        der,
        subject,
        issuer,
        public_key,
        not_after,
    })
}

/// Client identity: an organization (MSP) id bound to an X.509 certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    msp_id: String,
    certificate: Certificate,
}

impl Identity {
    /// Create an identity from an organization id and a parsed certificate
    pub fn new(msp_id: impl Into<String>, certificate: Certificate) -> Result<Self> {
        let msp_id = msp_id.into();

        if msp_id.trim().is_empty() {
            return Err(GatewayError::IdentityConstruction(
                "organization id must not be empty".into(),
            ));
        }
        if certificate.subject.is_empty() {
            return Err(GatewayError::IdentityConstruction(
                "certificate has an empty subject".into(),
            ));
        }
        if certificate.public_key.is_empty() {
            return Err(GatewayError::IdentityConstruction(
                "certificate has no subject public key".into(),
            ));
        }

        Ok(Self {
            msp_id,
            certificate,
        })
    }

    /// Load the certificate at `cert_path` (file or single-file directory)
    pub async fn load<P: AsRef<Path>>(msp_id: &str, cert_path: P) -> Result<Self> {
        let pem = credentials::read_credential(cert_path).await?;
        let certificate = parse_certificate_pem(&pem)?;
        Self::new(msp_id, certificate)
    }

    pub fn msp_id(&self) -> &str {
        &self.msp_id
    }

    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    /// Serialized `msp.SerializedIdentity`, used as the creator of every request
    pub fn serialize(&self) -> Vec<u8> {
        SerializedIdentity {
            mspid: self.msp_id.clone(),
            id_bytes: self.certificate.pem.as_bytes().to_vec(),
        }
        .encode_to_vec()
    }
}
