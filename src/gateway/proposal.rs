//! Construction of signed Fabric proposals, transactions and commit-status requests

use std::time::SystemTime;

use prost::Message;
use ring::rand::{SecureRandom, SystemRandom};

use crate::error::{GatewayError, Result, TransactionErrorKind};
use crate::pki::{sha256, Identity, Signer};
use crate::protos::common::{ChannelHeader, Envelope, Header, HeaderType, Payload, SignatureHeader};
use crate::protos::gateway::{CommitStatusRequest, SignedCommitStatusRequest};
use crate::protos::peer::{
    ChaincodeAction, ChaincodeActionPayload, ChaincodeHeaderExtension, ChaincodeId,
    ChaincodeInput, ChaincodeInvocationSpec, ChaincodeProposalPayload, ChaincodeSpec, Proposal,
    ProposalResponsePayload, SignedProposal, Transaction,
};

const NONCE_LENGTH: usize = 24;

/// A proposal ready to be sent for evaluation or endorsement
#[derive(Debug, Clone)]
pub struct SignedTransactionProposal {
    pub transaction_id: String,
    pub signed_proposal: SignedProposal,
}

/// Transaction id: hex SHA-256 of nonce followed by the creator bytes
pub fn transaction_id(nonce: &[u8], creator: &[u8]) -> String {
    let mut salted = Vec::with_capacity(nonce.len() + creator.len());
    salted.extend_from_slice(nonce);
    salted.extend_from_slice(creator);
    hex::encode(sha256(&salted))
}

fn new_nonce() -> Result<Vec<u8>> {
    let mut nonce = vec![0u8; NONCE_LENGTH];
    SystemRandom::new()
        .fill(&mut nonce)
        .map_err(|_| GatewayError::Signing("failed to generate nonce".into()))?;
    Ok(nonce)
}

/// Build and sign a chaincode invocation proposal
pub fn new_signed_proposal(
    identity: &Identity,
    signer: &Signer,
    channel_name: &str,
    chaincode_name: &str,
    operation: &str,
    args: &[&str],
) -> Result<SignedTransactionProposal> {
    let creator = identity.serialize();
    let nonce = new_nonce()?;
    let tx_id = transaction_id(&nonce, &creator);

    let chaincode_id = ChaincodeId {
        name: chaincode_name.to_string(),
        ..Default::default()
    };

    let channel_header = ChannelHeader {
        r#type: HeaderType::EndorserTransaction as i32,
        timestamp: Some(prost_types::Timestamp::from(SystemTime::now())),
        channel_id: channel_name.to_string(),
        tx_id: tx_id.clone(),
        extension: ChaincodeHeaderExtension {
            chaincode_id: Some(chaincode_id.clone()),
        }
        .encode_to_vec(),
        ..Default::default()
    };

    let signature_header = SignatureHeader { creator, nonce };

    let header = Header {
        channel_header: channel_header.encode_to_vec(),
        signature_header: signature_header.encode_to_vec(),
    };

    let mut input_args = Vec::with_capacity(args.len() + 1);
    input_args.push(operation.as_bytes().to_vec());
    input_args.extend(args.iter().map(|arg| arg.as_bytes().to_vec()));

    let invocation = ChaincodeInvocationSpec {
        chaincode_spec: Some(ChaincodeSpec {
            chaincode_id: Some(chaincode_id),
            input: Some(ChaincodeInput {
                args: input_args,
                ..Default::default()
            }),
            ..Default::default()
        }),
    };

    let payload = ChaincodeProposalPayload {
        input: invocation.encode_to_vec(),
        ..Default::default()
    };

    let proposal_bytes = Proposal {
        header: header.encode_to_vec(),
        payload: payload.encode_to_vec(),
        extension: Vec::new(),
    }
    .encode_to_vec();

    let signature = signer.sign(&sha256(&proposal_bytes))?;

    Ok(SignedTransactionProposal {
        transaction_id: tx_id,
        signed_proposal: SignedProposal {
            proposal_bytes,
            signature,
        },
    })
}

/// Sign the prepared transaction returned by endorsement
pub fn sign_envelope(signer: &Signer, mut envelope: Envelope) -> Result<Envelope> {
    envelope.signature = signer.sign(&sha256(&envelope.payload))?;
    Ok(envelope)
}

pub fn new_signed_commit_status_request(
    identity: &Identity,
    signer: &Signer,
    channel_name: &str,
    transaction_id: &str,
) -> Result<SignedCommitStatusRequest> {
    let request = CommitStatusRequest {
        transaction_id: transaction_id.to_string(),
        channel_id: channel_name.to_string(),
        identity: identity.serialize(),
    }
    .encode_to_vec();

    let signature = signer.sign(&sha256(&request))?;
    Ok(SignedCommitStatusRequest { request, signature })
}

/// Extract the contract's return value from an endorsed transaction envelope
pub fn transaction_result(envelope: &Envelope, transaction_id: &str) -> Result<Vec<u8>> {
    let malformed = |what: &str, detail: String| {
        GatewayError::transaction(
            TransactionErrorKind::EndorsementFailure,
            transaction_id,
            format!("malformed prepared transaction ({}): {}", what, detail),
        )
    };

    let payload = Payload::decode(envelope.payload.as_slice())
        .map_err(|e| malformed("payload", e.to_string()))?;
    let transaction = Transaction::decode(payload.data.as_slice())
        .map_err(|e| malformed("transaction", e.to_string()))?;
    let action = transaction
        .actions
        .first()
        .ok_or_else(|| malformed("transaction", "no actions".into()))?;
    let action_payload = ChaincodeActionPayload::decode(action.payload.as_slice())
        .map_err(|e| malformed("action payload", e.to_string()))?;
    let endorsed = action_payload
        .action
        .ok_or_else(|| malformed("action payload", "no endorsed action".into()))?;
    let response_payload =
        ProposalResponsePayload::decode(endorsed.proposal_response_payload.as_slice())
            .map_err(|e| malformed("proposal response", e.to_string()))?;
    let chaincode_action = ChaincodeAction::decode(response_payload.extension.as_slice())
        .map_err(|e| malformed("chaincode action", e.to_string()))?;

    Ok(chaincode_action
        .response
        .map(|response| response.payload)
        .unwrap_or_default())
}
