//! Channel configuration.

use std::time::Duration;

/// Default buffer limit for each inbound envelope queue.
pub const DEFAULT_BUFFER_LIMIT: usize = 1024;

/// What the receive pump does when a consumer queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Stop reading from the transport until the consumer catches up,
    /// the transport goes down or the session starts finishing.
    #[default]
    Backpressure,
    /// Discard the envelope and count it as dropped.
    Drop,
}

/// Channel configuration.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Buffered messages before the overflow policy applies (0 = unbounded).
    pub message_buffer: usize,

    /// Buffered notifications (0 = unbounded).
    pub notification_buffer: usize,

    /// Buffered inbound commands (0 = unbounded). A full command queue
    /// always drops, whatever the overflow policy, so responses to our own
    /// commands keep flowing.
    pub command_buffer: usize,

    /// Concurrent receivers per queue (0 = unbounded).
    pub promises_limit: usize,

    /// Full-queue behaviour.
    pub overflow: OverflowPolicy,

    /// How long `process_command` waits for a response.
    pub command_timeout: Option<Duration>,

    /// How long `finish` waits for the peer's `finished`.
    pub finish_timeout: Duration,

    /// Bound on the whole session negotiation.
    pub negotiation_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            message_buffer: DEFAULT_BUFFER_LIMIT,
            notification_buffer: DEFAULT_BUFFER_LIMIT,
            command_buffer: DEFAULT_BUFFER_LIMIT,
            promises_limit: 0,
            overflow: OverflowPolicy::Backpressure,
            command_timeout: None,
            finish_timeout: Duration::from_secs(30),
            negotiation_timeout: Duration::from_secs(30),
        }
    }
}

impl ChannelConfig {
    /// Builder: set the same buffer limit for every inbound queue.
    pub fn with_buffer_limit(mut self, limit: usize) -> Self {
        self.message_buffer = limit;
        self.notification_buffer = limit;
        self.command_buffer = limit;
        self
    }

    /// Builder: set the receiver limit per queue.
    pub fn with_promises_limit(mut self, limit: usize) -> Self {
        self.promises_limit = limit;
        self
    }

    /// Builder: set the overflow policy.
    pub fn with_overflow(mut self, overflow: OverflowPolicy) -> Self {
        self.overflow = overflow;
        self
    }

    /// Builder: set the command response timeout.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    /// Builder: set the finish timeout.
    pub fn with_finish_timeout(mut self, timeout: Duration) -> Self {
        self.finish_timeout = timeout;
        self
    }

    /// Builder: set the negotiation timeout.
    pub fn with_negotiation_timeout(mut self, timeout: Duration) -> Self {
        self.negotiation_timeout = timeout;
        self
    }
}
