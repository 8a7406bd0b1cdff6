//! Outbound delivery collaborator seam.
//!
//! The real chat transport sits behind [`OutboundDelivery`]. The core treats
//! delivery as a fire-and-forget side effect and never retries internally;
//! re-delivery of the original inbound event is the upstream's retry story.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("transport rejected message for {recipient}: {detail}")]
    Rejected { recipient: String, detail: String },
    #[error("transport unreachable: {0}")]
    Unreachable(String),
}

impl DeliveryError {
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Rejected { .. } => "delivery_rejected",
            Self::Unreachable(_) => "delivery_unreachable",
        }
    }
}

#[async_trait]
/// Trait contract for outbound chat delivery collaborators.
pub trait OutboundDelivery: Send + Sync {
    async fn deliver(&self, recipient: &str, text: &str) -> Result<(), DeliveryError>;
}
