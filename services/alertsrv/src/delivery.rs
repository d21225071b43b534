//! Delivery of alert trigger messages
//!
//! The session layer that talks to alert clients sits behind
//! [`AlertDelivery`]. A failed delivery is logged by the executer and never
//! affects other recipients.

use alertr_model::AlertTriggerMessage;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("Alert client for alert {0} unreachable")]
    Unreachable(u32),

    #[error("Delivery channel closed")]
    Closed,
}

#[async_trait]
pub trait AlertDelivery: Send + Sync {
    async fn deliver(&self, message: AlertTriggerMessage) -> Result<(), DeliveryError>;
}

/// Forwards messages into a bounded channel
#[derive(Debug, Clone)]
pub struct ChannelDelivery {
    tx: mpsc::Sender<AlertTriggerMessage>,
}

impl ChannelDelivery {
    pub fn new(tx: mpsc::Sender<AlertTriggerMessage>) -> Self {
        Self { tx }
    }

    /// Delivery plus the receiving end
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<AlertTriggerMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl AlertDelivery for ChannelDelivery {
    async fn deliver(&self, message: AlertTriggerMessage) -> Result<(), DeliveryError> {
        self.tx
            .send(message)
            .await
            .map_err(|_| DeliveryError::Closed)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use alertr_model::{SensorData, SensorDataType};

    fn message() -> AlertTriggerMessage {
        AlertTriggerMessage {
            alert_id: 1,
            remote_alert_id: 0,
            node_id: 3,
            sensor_id: 7,
            state: 1,
            description: "Front door".into(),
            time_received: 10,
            optional_data: None,
            triggered_alert_levels: vec![1],
            data_type: SensorDataType::None,
            data: SensorData::None,
        }
    }

    #[tokio::test]
    async fn test_channel_delivery() {
        let (delivery, mut rx) = ChannelDelivery::channel(4);
        delivery.deliver(message()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), message());
    }

    #[tokio::test]
    async fn test_closed_channel() {
        let (delivery, rx) = ChannelDelivery::channel(1);
        drop(rx);
        assert_eq!(
            delivery.deliver(message()).await,
            Err(DeliveryError::Closed)
        );
    }
}
