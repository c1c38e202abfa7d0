#![ doc = include_str!( concat!( env!( "CARGO_MANIFEST_DIR" ), "/", "README.md" ) ) ]
#![deny(missing_docs)]
/// Status code (`0` / `-1` / byte count) queue API
pub mod compat;
/// Message queue host adapters
pub mod host;
/// Queue name allocation
pub mod name;
/// Host call outcomes
pub mod outcome;
/// Message queues and the queue factory
pub mod queue;
/// Timeouts and host ticks
pub mod timeout;

pub use host::{MessageQueueHost, QueueId};
pub use name::QueueName;
pub use queue::{MessageQueue, QueueFactory, QueueInfo};
pub use timeout::{TickRate, Wait};

/// Error type
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// the queue is full and the message can not be sent
    #[error("channel full")]
    ChannelFull,
    /// the queue has been deleted
    #[error("channel closed")]
    ChannelClosed,
    /// the queue is empty
    #[error("channel empty")]
    ChannelEmpty,
    /// Timeouts
    #[error("timed out")]
    Timeout,
    /// The handle does not name a live queue
    #[error("invalid queue handle")]
    InvalidHandle,
    /// The operation is illegal on a remote object
    #[error("illegal on remote object")]
    RemoteObject,
    /// Invalid data received / parameters provided
    #[error("invalid data: {0}")]
    InvalidData(String),
    /// All other errors
    #[error("operation failed: {0}")]
    Failed(String),
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;
