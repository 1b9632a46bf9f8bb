//! Outbound order events.
//!
//! Publishing happens after commit and is best-effort: the coordinator logs a
//! failed publish and carries on, so subscribers must tolerate gaps.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::events::EventEnvelope;

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("event encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("transport error: {0}")]
    Transport(String),
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, envelope: &EventEnvelope) -> Result<(), PublishError>;
}

/// JSON envelopes on NATS, one subject per event kind.
#[derive(Clone)]
pub struct NatsPublisher {
    client: async_nats::Client,
}

impl NatsPublisher {
    pub fn new(client: async_nats::Client) -> Self { Self { client } }

    pub async fn connect(url: &str) -> Result<Self, PublishError> {
        let client = async_nats::connect(url).await.map_err(|e| PublishError::Transport(e.to_string()))?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl EventPublisher for NatsPublisher {
    async fn publish(&self, envelope: &EventEnvelope) -> Result<(), PublishError> {
        let payload = serde_json::to_vec(envelope)?;
        self.client
            .publish(envelope.event.subject().to_string(), payload.into())
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopPublisher;

#[async_trait]
impl EventPublisher for NoopPublisher {
    async fn publish(&self, _envelope: &EventEnvelope) -> Result<(), PublishError> { Ok(()) }
}
