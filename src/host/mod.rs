use core::fmt;

use crate::{name::QueueName, outcome::Outcome, timeout::Wait};

/// Linux POSIX message queues
#[cfg(target_os = "linux")]
pub mod posix;
/// In-process RTOS-style message queue kernel
pub mod sim;

/// Opaque native queue identifier. The meaning of the raw value is host-specific.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct QueueId(u32);

impl QueueId {
    /// Creates an id from its raw host representation
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }
    /// Returns the raw host representation
    pub const fn as_raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Host-side view of a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostQueueInfo {
    /// Queue name, if known by the host
    pub name: Option<QueueName>,
    /// Maximum number of buffered messages
    pub capacity: usize,
    /// Maximum message size in bytes
    pub max_message_size: usize,
    /// Number of messages currently buffered
    pub pending: usize,
    /// Number of tasks waiting to send, if known by the host
    pub waiting_senders: Option<usize>,
    /// Number of tasks waiting to receive, if known by the host
    pub waiting_receivers: Option<usize>,
}

/// Native message queue primitive.
///
/// Implementations own the queue storage, the wait lists and all locking around them. Every
/// method translates the native status into an [`Outcome`].
pub trait MessageQueueHost: Send + Sync {
    /// The host scheduler tick rate
    fn ticks_per_second(&self) -> f64;
    /// Creates a local FIFO queue
    fn create(&self, name: QueueName, capacity: usize, max_message_size: usize)
        -> Outcome<QueueId>;
    /// Deletes a queue, waking up all waiting tasks
    fn delete(&self, id: QueueId) -> Outcome<()>;
    /// Copies a message into the queue
    fn send(&self, id: QueueId, message: &[u8], wait: Wait) -> Outcome<()>;
    /// Copies the oldest message into the buffer, returns the message size
    fn receive(&self, id: QueueId, buffer: &mut [u8], wait: Wait) -> Outcome<usize>;
    /// Returns the number of pending messages
    fn pending(&self, id: QueueId) -> Outcome<usize>;
    /// Returns the host-side queue information
    fn info(&self, id: QueueId) -> Outcome<HostQueueInfo>;
    /// A unique host instance id, used to compare queue handles
    fn instance_id(&self) -> usize;
}
