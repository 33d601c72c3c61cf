//! Shared fixtures: generated credentials and an in-memory gateway peer
//! running a small batch-tracking contract.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use p256::ecdsa::signature::hazmat::PrehashVerifier;
use p256::ecdsa::{Signature, VerifyingKey};
use prost::Message;
use rcgen::{BasicConstraints, CertificateParams, IsCa, KeyPair};
use tonic::Status;

use ledger_gateway::config::{GatewayConfig, Timeouts};
use ledger_gateway::gateway::proposal::transaction_id;
use ledger_gateway::network::GatewayTransport;
use ledger_gateway::pki::{parse_certificate_pem, parse_private_key_pem, sha256, Identity, Signer};
use ledger_gateway::protos::common::{ChannelHeader, Envelope, Header, Payload, SignatureHeader};
use ledger_gateway::protos::gateway::{
    CommitStatusRequest, CommitStatusResponse, EndorseRequest, EndorseResponse, EvaluateRequest,
    EvaluateResponse, SignedCommitStatusRequest, SubmitRequest, SubmitResponse,
};
use ledger_gateway::protos::msp::SerializedIdentity;
use ledger_gateway::protos::peer::{
    ChaincodeAction, ChaincodeActionPayload, ChaincodeEndorsedAction, ChaincodeInvocationSpec,
    ChaincodeProposalPayload, Proposal, ProposalResponsePayload, Response, SignedProposal,
    Transaction, TransactionAction, TxValidationCode,
};
use ledger_gateway::{GatewayError, GatewaySession};

pub const CHANNEL: &str = "mychannel";
pub const CHAINCODE: &str = "ayurtrace";

/// PEM certificate and PKCS#8 key for one client
pub struct Credentials {
    pub cert_pem: String,
    pub key_pem: String,
}

impl Credentials {
    pub fn generate(common_name: &str) -> Self {
        let key_pair = KeyPair::generate().unwrap();
        let cert = CertificateParams::new(vec![common_name.to_string()])
            .unwrap()
            .self_signed(&key_pair)
            .unwrap();

        Self {
            cert_pem: cert.pem(),
            key_pem: key_pair.serialize_pem(),
        }
    }

    pub fn identity(&self, msp_id: &str) -> Identity {
        Identity::new(msp_id, parse_certificate_pem(self.cert_pem.as_bytes()).unwrap()).unwrap()
    }

    pub fn signer(&self) -> Signer {
        Signer::from_private_key(parse_private_key_pem(self.key_pem.as_bytes()).unwrap()).unwrap()
    }
}

/// A CA plus a server certificate it issued, for TLS listeners
pub struct TlsMaterial {
    pub ca_pem: String,
    pub server_cert_pem: String,
    pub server_key_pem: String,
}

impl TlsMaterial {
    pub fn generate(server_name: &str) -> Self {
        let ca_key = KeyPair::generate().unwrap();
        let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params
            .distinguished_name
            .push(rcgen::DnType::CommonName, "tlsca.example.com");
        let ca_cert = ca_params.self_signed(&ca_key).unwrap();

        let server_key = KeyPair::generate().unwrap();
        let server_cert = CertificateParams::new(vec![server_name.to_string()])
            .unwrap()
            .signed_by(&server_key, &ca_cert, &ca_key)
            .unwrap();

        Self {
            ca_pem: ca_cert.pem(),
            server_cert_pem: server_cert.pem(),
            server_key_pem: server_key.serialize_pem(),
        }
    }
}

/// Lay out credentials the way Fabric MSP folders do and return a config
/// pointing at them.
pub fn write_msp(root: &Path, credentials: &Credentials, tls_ca_pem: &str) -> GatewayConfig {
    let signcerts = root.join("msp").join("signcerts");
    let keystore = root.join("msp").join("keystore");
    let tls = root.join("tls");
    for dir in [&signcerts, &keystore, &tls] {
        std::fs::create_dir_all(dir).unwrap();
    }

    std::fs::write(signcerts.join("cert.pem"), &credentials.cert_pem).unwrap();
    std::fs::write(keystore.join("priv_sk"), &credentials.key_pem).unwrap();
    std::fs::write(tls.join("ca.crt"), tls_ca_pem).unwrap();

    GatewayConfig {
        msp_id: "Org1MSP".to_string(),
        cert_path: signcerts,
        key_path: keystore,
        tls_cert_path: tls.join("ca.crt"),
        client_tls_cert_path: None,
        client_tls_key_path: None,
        peer_endpoint: "127.0.0.1:1".to_string(),
        gateway_peer: "peer0.org1.example.com".to_string(),
        channel_name: CHANNEL.to_string(),
        chaincode_name: CHAINCODE.to_string(),
        connect_eagerly: false,
        timeouts: Timeouts::default(),
    }
}

pub fn msp_path(root: &Path, folder: &str) -> PathBuf {
    root.join("msp").join(folder)
}

/// Session over an in-memory gateway with freshly generated credentials
pub fn session_with(gateway: Arc<InMemoryGateway>) -> GatewaySession {
    let credentials = Credentials::generate("farmer1");
    GatewaySession::with_transport(
        gateway,
        credentials.identity("Org1MSP"),
        credentials.signer(),
        CHANNEL,
        CHAINCODE,
        Timeouts::default(),
    )
    .unwrap()
}

#[derive(Debug, Clone)]
enum Write {
    Create { batch: String, herb: String },
    Append { batch: String, event: String },
}

impl Write {
    fn batch(&self) -> &str {
        match self {
            Write::Create { batch, .. } | Write::Append { batch, .. } => batch,
        }
    }
}

#[derive(Default)]
struct Ledger {
    batches: HashMap<String, Vec<String>>,
    endorsed: HashMap<String, Write>,
    submitted: HashMap<String, Write>,
    committed: HashMap<String, (i32, u64)>,
    height: u64,
}

/// Gateway peer backed by an in-memory ledger.
///
/// Verifies every signature it receives, so a test passing through it proves
/// the connector produced well-formed, correctly signed messages.
///
/// Contract operations:
/// - `CreateBatch(id, herb)` fails if the batch exists
/// - `AddEvent(id, event)` fails if the batch does not exist
/// - `GetBatchHistory(id)` returns the batch events as a JSON array
#[derive(Default)]
pub struct InMemoryGateway {
    ledger: Mutex<Ledger>,
    evaluate_delay: Mutex<Duration>,
    commit_delay: Mutex<Duration>,
    reject_with: Mutex<Option<i32>>,
    unavailable: AtomicBool,
    fail_close: AtomicBool,
    pub closes: AtomicUsize,
    pub evaluations: AtomicUsize,
}

impl InMemoryGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_evaluate_delay(&self, delay: Duration) {
        *self.evaluate_delay.lock().unwrap() = delay;
    }

    pub fn set_commit_delay(&self, delay: Duration) {
        *self.commit_delay.lock().unwrap() = delay;
    }

    /// Validate every later commit with `code` instead of VALID.
    ///
    /// Takes the raw wire value so codes outside `TxValidationCode` can be sent.
    pub fn reject_commits(&self, code: impl Into<i32>) {
        *self.reject_with.lock().unwrap() = Some(code.into());
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn fail_close(&self) {
        self.fail_close.store(true, Ordering::SeqCst);
    }

    pub fn batch_exists(&self, batch: &str) -> bool {
        self.ledger.lock().unwrap().batches.contains_key(batch)
    }

    pub fn height(&self) -> u64 {
        self.ledger.lock().unwrap().height
    }

    fn check_available(&self) -> Result<(), Status> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Status::unavailable("failed to connect to peer0.org1.example.com"));
        }
        Ok(())
    }

    /// Verify the proposal and run the contract against current state
    fn simulate(
        &self,
        transaction_id_field: &str,
        signed: Option<SignedProposal>,
    ) -> Result<(Proposal, Header, Vec<u8>, Option<Write>), Status> {
        let signed = signed.ok_or_else(|| Status::invalid_argument("missing proposal"))?;
        let proposal = Proposal::decode(signed.proposal_bytes.as_slice())
            .map_err(|e| Status::invalid_argument(e.to_string()))?;
        let header = Header::decode(proposal.header.as_slice())
            .map_err(|e| Status::invalid_argument(e.to_string()))?;
        let channel_header = ChannelHeader::decode(header.channel_header.as_slice())
            .map_err(|e| Status::invalid_argument(e.to_string()))?;
        let signature_header = SignatureHeader::decode(header.signature_header.as_slice())
            .map_err(|e| Status::invalid_argument(e.to_string()))?;

        if channel_header.channel_id != CHANNEL {
            return Err(Status::not_found(format!(
                "channel {} not found",
                channel_header.channel_id
            )));
        }
        if channel_header.tx_id != transaction_id_field
            || channel_header.tx_id
                != transaction_id(&signature_header.nonce, &signature_header.creator)
        {
            return Err(Status::invalid_argument("incorrect transaction id"));
        }
        verify(&signature_header.creator, &signed.proposal_bytes, &signed.signature)?;

        let payload = ChaincodeProposalPayload::decode(proposal.payload.as_slice())
            .map_err(|e| Status::invalid_argument(e.to_string()))?;
        let spec = ChaincodeInvocationSpec::decode(payload.input.as_slice())
            .map_err(|e| Status::invalid_argument(e.to_string()))?
            .chaincode_spec
            .ok_or_else(|| Status::invalid_argument("missing chaincode spec"))?;

        let chaincode = spec.chaincode_id.map(|id| id.name).unwrap_or_default();
        if chaincode != CHAINCODE {
            return Err(Status::not_found(format!("chaincode {} not found", chaincode)));
        }

        let args: Vec<String> = spec
            .input
            .map(|input| input.args)
            .unwrap_or_default()
            .into_iter()
            .map(|arg| String::from_utf8_lossy(&arg).into_owned())
            .collect();

        let (result, write) = self.execute(&args)?;
        Ok((proposal, header, result, write))
    }

    fn execute(&self, args: &[String]) -> Result<(Vec<u8>, Option<Write>), Status> {
        let ledger = self.ledger.lock().unwrap();
        let arg = |i: usize| -> Result<String, Status> {
            args.get(i).cloned().ok_or_else(|| {
                Status::unknown(format!("chaincode response 500, missing argument {}", i))
            })
        };

        match args.first().map(String::as_str) {
            Some("CreateBatch") => {
                let batch = arg(1)?;
                if ledger.batches.contains_key(&batch) {
                    return Err(Status::unknown(format!(
                        "chaincode response 500, batch {} already exists",
                        batch
                    )));
                }
                let write = Write::Create {
                    batch: batch.clone(),
                    herb: arg(2)?,
                };
                Ok((batch.into_bytes(), Some(write)))
            }
            Some("AddEvent") => {
                let batch = arg(1)?;
                if !ledger.batches.contains_key(&batch) {
                    return Err(Status::unknown(format!(
                        "chaincode response 500, batch {} does not exist",
                        batch
                    )));
                }
                let write = Write::Append {
                    batch,
                    event: arg(2)?,
                };
                Ok((Vec::new(), Some(write)))
            }
            Some("GetBatchHistory") => {
                let batch = arg(1)?;
                let history = ledger.batches.get(&batch).ok_or_else(|| {
                    Status::unknown(format!(
                        "chaincode response 500, batch {} does not exist",
                        batch
                    ))
                })?;
                let json =
                    serde_json::to_vec(history).map_err(|e| Status::internal(e.to_string()))?;
                Ok((json, None))
            }
            other => Err(Status::unknown(format!(
                "chaincode response 500, unknown function {:?}",
                other
            ))),
        }
    }
}

fn verify(creator: &[u8], message: &[u8], signature: &[u8]) -> Result<(), Status> {
    let identity = SerializedIdentity::decode(creator)
        .map_err(|e| Status::permission_denied(format!("invalid creator: {}", e)))?;
    if identity.mspid.is_empty() {
        return Err(Status::permission_denied("creator has no MSP id"));
    }

    let certificate = parse_certificate_pem(&identity.id_bytes)
        .map_err(|e| Status::permission_denied(e.to_string()))?;
    let key = VerifyingKey::from_sec1_bytes(certificate.public_key())
        .map_err(|e| Status::permission_denied(e.to_string()))?;
    let signature =
        Signature::from_der(signature).map_err(|e| Status::permission_denied(e.to_string()))?;

    if signature.normalize_s().is_some() {
        return Err(Status::permission_denied("signature is not in low-S form"));
    }
    key.verify_prehash(&sha256(message), &signature)
        .map_err(|_| Status::permission_denied("signature verification failed"))
}

#[async_trait]
impl GatewayTransport for InMemoryGateway {
    async fn evaluate(&self, request: EvaluateRequest) -> Result<EvaluateResponse, Status> {
        self.check_available()?;
        self.evaluations.fetch_add(1, Ordering::SeqCst);

        let delay = *self.evaluate_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let (_, _, result, _) =
            self.simulate(&request.transaction_id, request.proposed_transaction)?;
        Ok(EvaluateResponse {
            result: Some(Response {
                status: 200,
                message: String::new(),
                payload: result,
            }),
        })
    }

    async fn endorse(&self, request: EndorseRequest) -> Result<EndorseResponse, Status> {
        self.check_available()?;

        let (proposal, header, result, write) = self
            .simulate(&request.transaction_id, request.proposed_transaction.clone())
            .map_err(|status| Status::aborted(format!("failed to endorse: {}", status.message())))?;

        let proposal_bytes = request.proposed_transaction.unwrap_or_default().proposal_bytes;
        let chaincode_action = ChaincodeAction {
            response: Some(Response {
                status: 200,
                message: String::new(),
                payload: result,
            }),
            ..Default::default()
        };
        let action_payload = ChaincodeActionPayload {
            chaincode_proposal_payload: proposal.payload.clone(),
            action: Some(ChaincodeEndorsedAction {
                proposal_response_payload: ProposalResponsePayload {
                    proposal_hash: sha256(&proposal_bytes),
                    extension: chaincode_action.encode_to_vec(),
                }
                .encode_to_vec(),
                endorsements: Vec::new(),
            }),
        };
        let transaction = Transaction {
            actions: vec![TransactionAction {
                header: header.signature_header.clone(),
                payload: action_payload.encode_to_vec(),
            }],
        };
        let envelope = Envelope {
            payload: Payload {
                header: Some(header),
                data: transaction.encode_to_vec(),
            }
            .encode_to_vec(),
            signature: Vec::new(),
        };

        if let Some(write) = write {
            self.ledger
                .lock()
                .unwrap()
                .endorsed
                .insert(request.transaction_id, write);
        }

        Ok(EndorseResponse {
            prepared_transaction: Some(envelope),
        })
    }

    async fn submit(&self, request: SubmitRequest) -> Result<SubmitResponse, Status> {
        self.check_available()?;

        let envelope = request
            .prepared_transaction
            .ok_or_else(|| Status::invalid_argument("missing transaction"))?;
        let payload = Payload::decode(envelope.payload.as_slice())
            .map_err(|e| Status::invalid_argument(e.to_string()))?;
        let signature_header = payload
            .header
            .as_ref()
            .map(|h| SignatureHeader::decode(h.signature_header.as_slice()))
            .transpose()
            .map_err(|e| Status::invalid_argument(e.to_string()))?
            .ok_or_else(|| Status::invalid_argument("missing header"))?;
        verify(&signature_header.creator, &envelope.payload, &envelope.signature)?;

        let mut ledger = self.ledger.lock().unwrap();
        let write = ledger.endorsed.remove(&request.transaction_id).ok_or_else(|| {
            Status::failed_precondition(format!(
                "transaction {} was not endorsed",
                request.transaction_id
            ))
        })?;
        ledger.submitted.insert(request.transaction_id, write);
        Ok(SubmitResponse {})
    }

    async fn commit_status(
        &self,
        request: SignedCommitStatusRequest,
    ) -> Result<CommitStatusResponse, Status> {
        self.check_available()?;

        let inner = CommitStatusRequest::decode(request.request.as_slice())
            .map_err(|e| Status::invalid_argument(e.to_string()))?;
        verify(&inner.identity, &request.request, &request.signature)?;

        let delay = *self.commit_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let reject_with = *self.reject_with.lock().unwrap();
        let mut ledger = self.ledger.lock().unwrap();
        if let Some((code, block)) = ledger.committed.get(&inner.transaction_id) {
            return Ok(CommitStatusResponse {
                result: *code,
                block_number: *block,
            });
        }

        let write = ledger.submitted.remove(&inner.transaction_id).ok_or_else(|| {
            Status::not_found(format!("transaction {} not found", inner.transaction_id))
        })?;

        ledger.height += 1;
        let block = ledger.height;
        let code = match (reject_with, &write) {
            (Some(code), _) => code,
            (None, Write::Create { batch, .. }) if ledger.batches.contains_key(batch) => {
                TxValidationCode::MvccReadConflict as i32
            }
            (None, write) if !matches!(write, Write::Create { .. })
                && !ledger.batches.contains_key(write.batch()) =>
            {
                TxValidationCode::MvccReadConflict as i32
            }
            (None, _) => TxValidationCode::Valid as i32,
        };

        if code == TxValidationCode::Valid as i32 {
            match write {
                Write::Create { batch, herb } => {
                    ledger.batches.insert(batch, vec![format!("created: {}", herb)]);
                }
                Write::Append { batch, event } => {
                    if let Some(history) = ledger.batches.get_mut(&batch) {
                        history.push(event);
                    }
                }
            }
        }

        ledger.committed.insert(inner.transaction_id, (code, block));
        Ok(CommitStatusResponse {
            result: code,
            block_number: block,
        })
    }

    async fn close(&self) -> ledger_gateway::Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(GatewayError::ChannelEstablishment(
                "connection reset while closing".into(),
            ));
        }
        Ok(())
    }
}
