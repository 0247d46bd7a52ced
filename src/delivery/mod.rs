//! Delivery rules evaluated before a message is handed to a consumer.

use crate::config::DeliveryConfig;
use crate::tracer::{MessageTracer, TraceEvent, TraceStatus};
use std::sync::Arc;

/// One delivery attempt of a message on a protocol channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryAttempt {
    pub message_id: u64,
    /// Deliveries so far on this channel, including the one being evaluated.
    pub delivery_count: u32,
    pub channel_id: String,
}

pub trait DeliveryRule: Send + Sync {
    /// `true` when the message may be delivered.
    fn evaluate(&self, attempt: &DeliveryAttempt) -> bool;
}

/// Rejects a message once it has been delivered more than
/// `max_redelivery_attempts + 1` times (the first delivery is not a redelivery).
pub struct MaxDeliveryRule {
    max_redelivery_attempts: u32,
    tracer: Option<Arc<MessageTracer>>,
}

impl MaxDeliveryRule {
    pub fn new(config: &DeliveryConfig) -> Self {
        Self {
            max_redelivery_attempts: config.max_redelivery_attempts,
            tracer: None,
        }
    }

    pub fn with_tracer(mut self, tracer: Arc<MessageTracer>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    pub fn max_deliveries(&self) -> u32 {
        self.max_redelivery_attempts.saturating_add(1)
    }
}

impl DeliveryRule for MaxDeliveryRule {
    fn evaluate(&self, attempt: &DeliveryAttempt) -> bool {
        let allowed = attempt.delivery_count <= self.max_deliveries();

        if let Some(tracer) = &self.tracer {
            let status = if allowed {
                TraceStatus::DeliveryRuleEvaluated
            } else {
                TraceStatus::DeliveryLimitReached
            };
            tracer.trace(
                TraceEvent::new(attempt.message_id.to_string(), status)
                    .with_properties(format!("channel={}", attempt.channel_id)),
            );
        }

        if !allowed {
            tracing::warn!(
                message_id = attempt.message_id,
                deliveries = attempt.delivery_count,
                channel = %attempt.channel_id,
                "Number of maximum redelivery tries has been breached"
            );
        }
        allowed
    }
}
