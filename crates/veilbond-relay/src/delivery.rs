use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;
use veilbond_types::ContextId;

/// Transport seam. Delivery channel selection is a thin pass-through;
/// the engine does not own message transport.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    async fn deliver(&self, context_id: &ContextId, payload: &[u8]) -> Result<()>;
}

/// Accepts everything and drops it. Used in tests and when the
/// surrounding system consumes forwarding events elsewhere.
pub struct NullDelivery;

#[async_trait]
impl DeliveryChannel for NullDelivery {
    async fn deliver(&self, context_id: &ContextId, payload: &[u8]) -> Result<()> {
        debug!(
            context_id = %context_id,
            bytes = payload.len(),
            "message handed to null delivery channel"
        );
        Ok(())
    }
}
