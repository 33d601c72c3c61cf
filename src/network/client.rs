use async_trait::async_trait;
use tonic::transport::Channel;
use tonic::Status;
use tracing::debug;

use super::GatewayTransport;
use crate::error::Result;
use crate::protos::gateway::gateway_client::GatewayClient;
use crate::protos::gateway::{
    CommitStatusResponse, EndorseRequest, EndorseResponse, EvaluateRequest, EvaluateResponse,
    SignedCommitStatusRequest, SubmitRequest, SubmitResponse,
};

/// `GatewayTransport` over the generated `gateway.Gateway` client
#[derive(Debug, Clone)]
pub struct GrpcTransport {
    client: GatewayClient<Channel>,
}

impl GrpcTransport {
    pub fn new(channel: Channel) -> Self {
        Self {
            client: GatewayClient::new(channel),
        }
    }
}

#[async_trait]
impl GatewayTransport for GrpcTransport {
    async fn evaluate(
        &self,
        request: EvaluateRequest,
    ) -> std::result::Result<EvaluateResponse, Status> {
        let response = self.client.clone().evaluate(request).await?;
        Ok(response.into_inner())
    }

    async fn endorse(
        &self,
        request: EndorseRequest,
    ) -> std::result::Result<EndorseResponse, Status> {
        let response = self.client.clone().endorse(request).await?;
        Ok(response.into_inner())
    }

    async fn submit(&self, request: SubmitRequest) -> std::result::Result<SubmitResponse, Status> {
        let response = self.client.clone().submit(request).await?;
        Ok(response.into_inner())
    }

    async fn commit_status(
        &self,
        request: SignedCommitStatusRequest,
    ) -> std::result::Result<CommitStatusResponse, Status> {
        let response = self.client.clone().commit_status(request).await?;
        Ok(response.into_inner())
    }

    async fn close(&self) -> Result<()> {
        // Nothing to shut down here; the connection goes away with the last
        // channel handle, which the owning session drops after this call.
        debug!("Releasing gateway channel");
        Ok(())
    }
}
