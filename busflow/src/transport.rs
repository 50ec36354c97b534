//! The outbound dispatch capability supplied by the transport layer.

use crate::context::MediationContext;
use crate::errors::TransportError;
use async_trait::async_trait;

/// Sends a message to its destination.
///
/// When `correlation_key` is `Some`, a pending callback for that key has
/// already been registered and the transport must route the eventual
/// response back through `CallbackStore::resolve` with the same key.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Dispatches `ctx`.
    async fn send(
        &self,
        ctx: &MediationContext,
        correlation_key: Option<String>,
    ) -> Result<(), TransportError>;
}

/// Transport that accepts and discards every message.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTransport;

#[async_trait]
impl Transport for NullTransport {
    async fn send(
        &self,
        ctx: &MediationContext,
        correlation_key: Option<String>,
    ) -> Result<(), TransportError> {
        tracing::trace!(
            message_id = %ctx.message_id(),
            correlation_key = ?correlation_key,
            "Discarding outbound message"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Payload;

    #[tokio::test]
    async fn test_null_transport_accepts() {
        let ctx = MediationContext::new(Payload::text("x"));
        assert!(NullTransport.send(&ctx, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_transport_sees_key() {
        let mut mock = MockTransport::new();
        mock.expect_send()
            .withf(|_, key| key.as_deref() == Some("k-9"))
            .times(1)
            .returning(|_, _| Err(TransportError::new("refused")));

        let ctx = MediationContext::new(Payload::Empty);
        let err = mock.send(&ctx, Some("k-9".into())).await.unwrap_err();
        assert_eq!(err.message, "refused");
    }
}
