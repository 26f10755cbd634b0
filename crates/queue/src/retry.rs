//! Redelivery limits for failing jobs.

/// Bounds how often a failing job is delivered before it is dead-lettered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedeliveryPolicy {
    /// Deliveries allowed, counting the first one.
    pub max_deliveries: u32,
}

impl Default for RedeliveryPolicy {
    fn default() -> Self {
        Self { max_deliveries: 3 }
    }
}

impl RedeliveryPolicy {
    /// Create a policy.
    #[must_use]
    pub const fn new(max_deliveries: u32) -> Self {
        Self { max_deliveries }
    }

    /// Whether a message that failed with `retry_count` prior requeues
    /// gets another delivery.
    #[must_use]
    pub const fn should_requeue(&self, retry_count: u32) -> bool {
        retry_count.saturating_add(1) < self.max_deliveries
    }
}
