pub mod credentials;
pub mod identity;
pub mod signer;

pub use credentials::read_credential;
pub use identity::{parse_certificate_pem, Certificate, Identity};
pub use signer::{parse_private_key_pem, PrivateKey, Signer};

use ring::digest;

/// SHA-256 digest, the hash Fabric signs over
pub fn sha256(data: &[u8]) -> Vec<u8> {
    digest::digest(&digest::SHA256, data).as_ref().to_vec()
}
