//! Error types surfaced by the bus.
//!
//! Every failure here is a caller/usage error: it fails the call, never the
//! process. Subscriber reaction failures are not part of this enum; they are
//! caught and logged by the delivery worker.

use thiserror::Error;

use crate::event::Topic;

/// Error type returned by subscriber reactions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Outcome of one subscriber reaction.
pub type Reaction = Result<(), BoxError>;

#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// A subscriber or publisher was deregistered for a topic that has no channel.
    #[error("no channel registered for topic `{topic}`")]
    NoChannel { topic: Topic },

    /// An event was published for a topic nobody registered.
    #[error("no publisher registered for topic `{topic}`; register a publisher or subscriber first")]
    NoPublisher { topic: Topic },

    /// Enqueue was attempted before the channel started.
    #[error("channel for topic `{topic}` has not started")]
    NotStarted { topic: Topic },

    /// The channel was stopped and accepts no more events.
    #[error("channel for topic `{topic}` is stopped")]
    Stopped { topic: Topic },

    /// Non-waiting enqueue found the queue at capacity.
    #[error("channel for topic `{topic}` is full")]
    Full { topic: Topic },

    /// The configured queue capacity cannot hold a single event.
    #[error("invalid queue capacity {capacity} for topic `{topic}`")]
    InvalidCapacity { topic: Topic, capacity: usize },

    /// No executor was configured and no tokio runtime is running.
    #[error("no executor available to start the delivery worker for topic `{topic}`")]
    NoRuntime { topic: Topic },
}

impl BusError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            BusError::NoChannel { .. } => "bus_no_channel",
            BusError::NoPublisher { .. } => "bus_no_publisher",
            BusError::NotStarted { .. } => "bus_not_started",
            BusError::Stopped { .. } => "bus_stopped",
            BusError::Full { .. } => "bus_full",
            BusError::InvalidCapacity { .. } => "bus_invalid_capacity",
            BusError::NoRuntime { .. } => "bus_no_runtime",
        }
    }

    /// The topic the failed call was addressed to.
    pub fn topic(&self) -> Topic {
        match self {
            BusError::NoChannel { topic }
            | BusError::NoPublisher { topic }
            | BusError::NotStarted { topic }
            | BusError::Stopped { topic }
            | BusError::Full { topic }
            | BusError::InvalidCapacity { topic, .. }
            | BusError::NoRuntime { topic } => *topic,
        }
    }
}
