pub mod channel;
pub mod client;

pub use channel::SecureChannelFactory;
pub use client::GrpcTransport;

use async_trait::async_trait;
use tonic::Status;

use crate::error::Result;
use crate::protos::gateway::{
    CommitStatusResponse, EndorseRequest, EndorseResponse, EvaluateRequest, EvaluateResponse,
    SignedCommitStatusRequest, SubmitRequest, SubmitResponse,
};

/// Transport carrying signed requests to a Fabric gateway peer.
///
/// `GrpcTransport` is the network implementation; sessions only depend on
/// this trait so another transport can be substituted.
#[async_trait]
pub trait GatewayTransport: Send + Sync {
    async fn evaluate(
        &self,
        request: EvaluateRequest,
    ) -> std::result::Result<EvaluateResponse, Status>;

    async fn endorse(
        &self,
        request: EndorseRequest,
    ) -> std::result::Result<EndorseResponse, Status>;

    async fn submit(&self, request: SubmitRequest) -> std::result::Result<SubmitResponse, Status>;

    async fn commit_status(
        &self,
        request: SignedCommitStatusRequest,
    ) -> std::result::Result<CommitStatusResponse, Status>;

    /// Release the underlying connection
    async fn close(&self) -> Result<()>;
}
