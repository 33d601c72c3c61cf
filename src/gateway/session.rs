use std::fmt;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tonic::Status;
use tracing::{debug, info, warn};

use super::proposal::{
    new_signed_commit_status_request, new_signed_proposal, sign_envelope, transaction_result,
    SignedTransactionProposal,
};
use crate::config::{GatewayConfig, Timeouts};
use crate::error::{
    certificate_rejection, classify, GatewayError, Phase, Result, SetupStep,
    TransactionErrorKind,
};
use crate::network::{GatewayTransport, GrpcTransport, SecureChannelFactory};
use crate::pki::{Identity, Signer};
use crate::protos::gateway::{EndorseRequest, EvaluateRequest, SubmitRequest};
use crate::protos::peer::TxValidationCode;

/// Validation code a peer reported for a committed transaction.
///
/// Holds the raw wire value. Codes missing from [`TxValidationCode`] stay
/// distinct from `VALID` and display as `unknown(n)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValidationCode(i32);

impl ValidationCode {
    pub fn from_raw(code: i32) -> Self {
        Self(code)
    }

    pub fn raw(&self) -> i32 {
        self.0
    }

    /// The named code, if this build knows it
    pub fn known(&self) -> Option<TxValidationCode> {
        TxValidationCode::try_from(self.0).ok()
    }

    pub fn is_valid(&self) -> bool {
        self.0 == TxValidationCode::Valid as i32
    }
}

impl From<TxValidationCode> for ValidationCode {
    fn from(code: TxValidationCode) -> Self {
        Self(code as i32)
    }
}

impl fmt::Display for ValidationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.known() {
            Some(code) => f.write_str(code.as_str_name()),
            None => write!(f, "unknown({})", self.0),
        }
    }
}

/// Outcome of a commit-status query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitStatus {
    pub code: ValidationCode,
    pub block_number: u64,
}

impl CommitStatus {
    pub fn is_successful(&self) -> bool {
        self.code.is_valid()
    }
}

/// Authenticated session with a gateway peer for one role.
///
/// Bound to a single channel and contract. A session is only ever handed out
/// fully established; once `close` has run every operation fails with
/// [`GatewayError::SessionClosed`].
pub struct GatewaySession {
    identity: Identity,
    signer: Signer,
    channel_name: String,
    chaincode_name: String,
    timeouts: Timeouts,
    transport: RwLock<Option<Arc<dyn GatewayTransport>>>,
}

impl GatewaySession {
    /// Run the setup sequence for `config`.
    ///
    /// Steps run in order and stop at the first failure, which is returned
    /// wrapped in [`GatewayError::Setup`]. Anything built by earlier steps
    /// (including the channel) is dropped before returning.
    pub async fn connect(config: &GatewayConfig) -> Result<Self> {
        info!(
            "Setting up gateway session for {} via {} ({})",
            config.msp_id, config.peer_endpoint, config.gateway_peer
        );

        let channel = SecureChannelFactory::from_config(config)
            .build()
            .await
            .map_err(|e| e.during(SetupStep::SecureChannel))?;

        let identity = Identity::load(&config.msp_id, &config.cert_path)
            .await
            .map_err(|e| e.during(SetupStep::Identity))?;

        let signer = Signer::load(&config.key_path)
            .await
            .map_err(|e| e.during(SetupStep::Signer))?;

        let transport: Arc<dyn GatewayTransport> = Arc::new(GrpcTransport::new(channel));

        Self::with_transport(
            transport,
            identity,
            signer,
            &config.channel_name,
            &config.chaincode_name,
            config.timeouts.clone(),
        )
        .map_err(|e| e.during(SetupStep::Connect))
    }

    /// Build a session over an existing transport.
    ///
    /// Fails with `IdentityConstruction` when the signer's public key does not
    /// match the identity certificate.
    pub fn with_transport(
        transport: Arc<dyn GatewayTransport>,
        identity: Identity,
        signer: Signer,
        channel_name: &str,
        chaincode_name: &str,
        timeouts: Timeouts,
    ) -> Result<Self> {
        if let Some(public_key) = signer.public_key() {
            if public_key != identity.certificate().public_key() {
                return Err(GatewayError::IdentityConstruction(format!(
                    "private key does not match certificate {}",
                    identity.certificate().subject()
                )));
            }
        }

        debug!(
            "Gateway session bound to channel {} contract {}",
            channel_name, chaincode_name
        );

        Ok(Self {
            identity,
            signer,
            channel_name: channel_name.to_string(),
            chaincode_name: chaincode_name.to_string(),
            timeouts,
            transport: RwLock::new(Some(transport)),
        })
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn channel_name(&self) -> &str {
        &self.channel_name
    }

    pub fn chaincode_name(&self) -> &str {
        &self.chaincode_name
    }

    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    pub fn is_closed(&self) -> bool {
        self.transport.read().map(|t| t.is_none()).unwrap_or(true)
    }

    /// Submit a ledger-mutating transaction and wait for it to commit.
    ///
    /// Returns the contract's result bytes. Not retried; a `CommitTimeout`
    /// means the transaction may still commit.
    pub async fn submit(&self, operation: &str, args: &[&str]) -> Result<Vec<u8>> {
        let transport = self.transport()?;
        let proposal = self.proposal(operation, args)?;
        let tx_id = proposal.transaction_id.clone();

        info!("Submitting {} ({})", operation, tx_id);

        let endorsed = with_deadline(
            self.timeouts.endorse(),
            transport.endorse(EndorseRequest {
                transaction_id: tx_id.clone(),
                channel_id: self.channel_name.clone(),
                proposed_transaction: Some(proposal.signed_proposal),
                endorsing_organizations: Vec::new(),
            }),
        )
        .await
        .map_err(|status| failure(Phase::Endorse, &tx_id, status))?;

        let prepared = endorsed.prepared_transaction.ok_or_else(|| {
            GatewayError::transaction(
                TransactionErrorKind::EndorsementFailure,
                &tx_id,
                "endorse response contained no prepared transaction",
            )
        })?;
        let result = transaction_result(&prepared, &tx_id)?;
        let envelope = sign_envelope(&self.signer, prepared)?;

        with_deadline(
            self.timeouts.submit(),
            transport.submit(SubmitRequest {
                transaction_id: tx_id.clone(),
                channel_id: self.channel_name.clone(),
                prepared_transaction: Some(envelope),
            }),
        )
        .await
        .map_err(|status| failure(Phase::Submit, &tx_id, status))?;

        debug!("Transaction {} submitted, waiting for commit", tx_id);

        let status = self.query_commit_status(transport.as_ref(), &tx_id).await?;
        if !status.is_successful() {
            warn!("Transaction {} committed with status {}", tx_id, status.code);
            return Err(GatewayError::transaction(
                TransactionErrorKind::CommitRejected(status.code),
                &tx_id,
                format!("committed in block {}", status.block_number),
            ));
        }

        info!(
            "Transaction {} committed in block {}",
            tx_id, status.block_number
        );
        Ok(result)
    }

    /// Evaluate a read-only query; the ledger is never updated
    pub async fn evaluate(&self, operation: &str, args: &[&str]) -> Result<Vec<u8>> {
        let transport = self.transport()?;
        let proposal = self.proposal(operation, args)?;
        let tx_id = proposal.transaction_id.clone();

        debug!("Evaluating {} ({})", operation, tx_id);

        let response = with_deadline(
            self.timeouts.evaluate(),
            transport.evaluate(EvaluateRequest {
                transaction_id: tx_id.clone(),
                channel_id: self.channel_name.clone(),
                proposed_transaction: Some(proposal.signed_proposal),
                target_organizations: Vec::new(),
            }),
        )
        .await
        .map_err(|status| failure(Phase::Evaluate, &tx_id, status))?;

        let result = response.result.unwrap_or_default();
        if result.status >= 400 {
            return Err(GatewayError::transaction(
                TransactionErrorKind::EvaluationFailure,
                &tx_id,
                format!("contract returned {}: {}", result.status, result.message),
            ));
        }

        Ok(result.payload)
    }

    /// Look up the commit status of a previously submitted transaction
    pub async fn commit_status(&self, transaction_id: &str) -> Result<CommitStatus> {
        let transport = self.transport()?;
        self.query_commit_status(transport.as_ref(), transaction_id)
            .await
    }

    /// Close the session and release its transport.
    ///
    /// The transport is taken out of the session, given a chance to clean
    /// up, and dropped. For [`GrpcTransport`] the connection is released by
    /// that drop once no call still holds the channel; its `close` only logs.
    /// Idempotent: later calls return `Ok(())` without touching the transport.
    pub async fn close(&self) -> Result<()> {
        let transport = {
            let mut guard = self
                .transport
                .write()
                .map_err(|e| GatewayError::LockPoisoned(e.to_string()))?;
            guard.take()
        };

        match transport {
            Some(transport) => {
                info!("Closing gateway session for {}", self.identity.msp_id());
                transport.close().await
            }
            None => Ok(()),
        }
    }

    fn transport(&self) -> Result<Arc<dyn GatewayTransport>> {
        let guard = self
            .transport
            .read()
            .map_err(|e| GatewayError::LockPoisoned(e.to_string()))?;
        guard.clone().ok_or(GatewayError::SessionClosed)
    }

    fn proposal(&self, operation: &str, args: &[&str]) -> Result<SignedTransactionProposal> {
        new_signed_proposal(
            &self.identity,
            &self.signer,
            &self.channel_name,
            &self.chaincode_name,
            operation,
            args,
        )
    }

    async fn query_commit_status(
        &self,
        transport: &dyn GatewayTransport,
        tx_id: &str,
    ) -> Result<CommitStatus> {
        let request = new_signed_commit_status_request(
            &self.identity,
            &self.signer,
            &self.channel_name,
            tx_id,
        )?;

        let response = with_deadline(
            self.timeouts.commit_status(),
            transport.commit_status(request),
        )
        .await
        .map_err(|status| failure(Phase::CommitStatus, tx_id, status))?;

        // `result()` would fold codes unknown to this build into VALID.
        Ok(CommitStatus {
            code: ValidationCode::from_raw(response.result),
            block_number: response.block_number,
        })
    }
}

impl std::fmt::Debug for GatewaySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewaySession")
            .field("msp_id", &self.identity.msp_id())
            .field("channel_name", &self.channel_name)
            .field("chaincode_name", &self.chaincode_name)
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn with_deadline<T>(
    deadline: Duration,
    call: impl Future<Output = std::result::Result<T, Status>>,
) -> std::result::Result<T, Status> {
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(Status::deadline_exceeded(format!(
            "no response within {:?}",
            deadline
        ))),
    }
}

fn failure(phase: Phase, tx_id: &str, status: Status) -> GatewayError {
    // A lazy channel runs its TLS handshake on first use.
    if let Some(reason) = certificate_rejection(&status) {
        warn!("{:?} for {} refused by TLS: {}", phase, tx_id, reason);
        return GatewayError::ChannelEstablishment(format!(
            "peer certificate rejected: {}",
            reason
        ));
    }

    let kind = classify(phase, &status);
    warn!(
        "{:?} failed for {}: {} ({:?})",
        phase,
        tx_id,
        status.message(),
        status.code()
    );
    GatewayError::transaction(kind, tx_id, status.message())
}
