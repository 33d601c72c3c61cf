//! Error types for the ledger gateway connector

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;
use tonic::{Code, Status};

use crate::gateway::ValidationCode;

/// Result type alias using GatewayError
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Errors raised while setting up a gateway session or running transactions
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Credential file or directory could not be read
    #[error("failed to read credential at {}: {reason}", .path.display())]
    CredentialRead { path: PathBuf, reason: String },

    /// PEM or DER certificate material is malformed
    #[error("failed to parse certificate: {0}")]
    CertificateParse(String),

    /// PEM or DER private key material is malformed
    #[error("failed to parse private key: {0}")]
    KeyParse(String),

    /// Certificate cannot back a client identity
    #[error("failed to create identity: {0}")]
    IdentityConstruction(String),

    /// Private key cannot back a signer
    #[error("failed to create signer: {0}")]
    SignerConstruction(String),

    /// Signing a digest or generating a nonce failed
    #[error("signing failed: {0}")]
    Signing(String),

    /// TLS or transport setup failed
    #[error("failed to establish channel: {0}")]
    ChannelEstablishment(String),

    /// A submit, evaluate or commit-status exchange failed
    #[error("{kind} (transaction {transaction_id}): {message}")]
    Transaction {
        kind: TransactionErrorKind,
        transaction_id: String,
        message: String,
    },

    /// A setup step failed; `source` holds the underlying cause
    #[error("failed to set up gateway ({step}): {source}")]
    Setup {
        step: SetupStep,
        source: Box<GatewayError>,
    },

    /// The session was closed and must not be used again
    #[error("gateway session is closed")]
    SessionClosed,

    #[error("lock poisoned: {0}")]
    LockPoisoned(String),

    /// One or more sessions failed to close during registry shutdown
    #[error("{} session(s) failed to close", .0.len())]
    CloseFailures(Vec<(String, GatewayError)>),
}

impl GatewayError {
    /// Wrap this error with the setup step that produced it
    pub fn during(self, step: SetupStep) -> Self {
        GatewayError::Setup {
            step,
            source: Box::new(self),
        }
    }

    /// Strip any setup-step wrappers
    pub fn root_cause(&self) -> &GatewayError {
        match self {
            GatewayError::Setup { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// The setup step that failed, if this is a setup error
    pub fn setup_step(&self) -> Option<SetupStep> {
        match self {
            GatewayError::Setup { step, .. } => Some(*step),
            _ => None,
        }
    }

    pub fn transaction_kind(&self) -> Option<TransactionErrorKind> {
        match self.root_cause() {
            GatewayError::Transaction { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// True when the ledger may still have committed the transaction.
    ///
    /// Callers must treat these as "unknown outcome", not as failures.
    pub fn is_outcome_unknown(&self) -> bool {
        matches!(
            self.transaction_kind(),
            Some(TransactionErrorKind::CommitTimeout | TransactionErrorKind::CommitStatusFailure)
        )
    }

    pub(crate) fn transaction(
        kind: TransactionErrorKind,
        transaction_id: &str,
        message: impl Into<String>,
    ) -> Self {
        GatewayError::Transaction {
            kind,
            transaction_id: transaction_id.to_string(),
            message: message.into(),
        }
    }
}

/// Ordered steps of gateway session setup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStep {
    SecureChannel,
    Identity,
    Signer,
    Connect,
}

impl fmt::Display for SetupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SetupStep::SecureChannel => "secure channel",
            SetupStep::Identity => "identity",
            SetupStep::Signer => "signer",
            SetupStep::Connect => "connect",
        };
        f.write_str(name)
    }
}

/// Sub-kinds of transaction failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionErrorKind {
    /// The network declined to endorse the proposal
    EndorsementFailure,
    /// The endorsed transaction could not be sent for ordering
    SubmissionFailure,
    /// No commit confirmation within the commit-status timeout
    CommitTimeout,
    /// Commit status could not be obtained
    CommitStatusFailure,
    /// The transaction was committed but marked invalid
    CommitRejected(ValidationCode),
    /// No evaluation result within the evaluate timeout
    EvaluationTimeout,
    /// The contract rejected a read-only query
    EvaluationFailure,
    /// Channel-level failure (peer unreachable, connection reset, TLS)
    TransportFailure,
}

impl fmt::Display for TransactionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionErrorKind::EndorsementFailure => f.write_str("endorsement failed"),
            TransactionErrorKind::SubmissionFailure => f.write_str("submission failed"),
            TransactionErrorKind::CommitTimeout => f.write_str("commit status timed out"),
            TransactionErrorKind::CommitStatusFailure => {
                f.write_str("commit status unavailable")
            }
            TransactionErrorKind::CommitRejected(code) => {
                write!(f, "transaction committed as invalid ({})", code)
            }
            TransactionErrorKind::EvaluationTimeout => f.write_str("evaluation timed out"),
            TransactionErrorKind::EvaluationFailure => f.write_str("evaluation failed"),
            TransactionErrorKind::TransportFailure => f.write_str("transport failure"),
        }
    }
}

/// Phase of a transaction a gRPC status was returned from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Evaluate,
    Endorse,
    Submit,
    CommitStatus,
}

/// Map a gRPC status returned during `phase` onto a transaction error kind
pub(crate) fn classify(phase: Phase, status: &Status) -> TransactionErrorKind {
    if is_transport_failure(status) {
        return TransactionErrorKind::TransportFailure;
    }

    let deadline = status.code() == Code::DeadlineExceeded;
    match phase {
        Phase::Evaluate if deadline => TransactionErrorKind::EvaluationTimeout,
        Phase::Evaluate => TransactionErrorKind::EvaluationFailure,
        Phase::Endorse => TransactionErrorKind::EndorsementFailure,
        Phase::Submit => TransactionErrorKind::SubmissionFailure,
        Phase::CommitStatus if deadline => TransactionErrorKind::CommitTimeout,
        Phase::CommitStatus => TransactionErrorKind::CommitStatusFailure,
    }
}

fn is_transport_failure(status: &Status) -> bool {
    if status.code() == Code::Unavailable {
        return true;
    }

    let mut source = std::error::Error::source(status);
    while let Some(err) = source {
        if err.is::<tonic::transport::Error>() || err.is::<std::io::Error>() {
            return true;
        }
        source = err.source();
    }
    false
}

/// Reason a TLS handshake refused the peer certificate, if `status` carries one.
///
/// tokio-rustls reports handshake failures as an `io::Error` wrapping the
/// `rustls::Error`, which `io::Error::source` does not expose.
pub(crate) fn certificate_rejection(status: &Status) -> Option<String> {
    let mut source = std::error::Error::source(status);
    while let Some(err) = source {
        let tls = err.downcast_ref::<rustls::Error>().or_else(|| {
            err.downcast_ref::<std::io::Error>()
                .and_then(|io| io.get_ref())
                .and_then(|inner| inner.downcast_ref::<rustls::Error>())
        });
        if let Some(tls @ rustls::Error::InvalidCertificate(_)) = tls {
            return Some(tls.to_string());
        }
        source = err.source();
    }
    None
}

/// Render an error with its full source chain
pub(crate) fn describe(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
