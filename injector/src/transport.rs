//! Publish/subscribe transport seam.
//!
//! The session controller does not speak any broker protocol itself. An
//! integration layer implements [`Transport`] for the actual client and
//! feeds every client event back through
//! [`Session::handle_event`](crate::Session::handle_event).

use std::fmt;

/// Delivery guarantee requested for a publish or subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum Qos {
    /// Fire and forget.
    AtMostOnce,
    /// Acknowledged, may duplicate.
    #[default]
    AtLeastOnce,
    /// Acknowledged, exactly once.
    ExactlyOnce,
}

impl Qos {
    /// Numeric level as used on the wire.
    pub const fn level(self) -> u8 {
        match self {
            Self::AtMostOnce => 0,
            Self::AtLeastOnce => 1,
            Self::ExactlyOnce => 2,
        }
    }
}

/// Why a transport refused an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportError {
    /// Outbound queue is full.
    QueueFull,
    /// Any other refusal.
    Failed(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueFull => f.write_str("outbound queue full"),
            Self::Failed(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for TransportError {}

/// Client operations the session controller relies on.
///
/// Implementations must be callable from both the owning task and the
/// transport's own callback thread.
pub trait Transport: Send + Sync {
    /// Starts the client; connection progress arrives as events.
    fn start(&self) -> Result<(), TransportError>;

    /// Closes the connection.
    fn disconnect(&self) -> Result<(), TransportError>;

    /// Re-establishes a dropped connection.
    fn reconnect(&self) -> Result<(), TransportError>;

    /// Subscribes to several filters in one request.
    fn subscribe_many(&self, filters: &[(String, Qos)]) -> Result<(), TransportError>;

    /// Subscribes to one filter.
    fn subscribe(&self, filter: &str, qos: Qos) -> Result<(), TransportError>;

    /// Queues a message for publishing.
    fn enqueue(
        &self,
        topic: &str,
        payload: &[u8],
        qos: Qos,
        retain: bool,
    ) -> Result<(), TransportError>;
}

/// Event delivered by the transport to the session controller.
#[derive(Debug, Clone, Copy)]
#[non_exhaustive]
pub enum SessionEvent<'a> {
    /// About to (re)connect.
    BeforeConnect,
    /// Link established.
    Connected,
    /// Link lost or closed.
    Disconnected,
    /// Inbound message.
    Data {
        /// Topic the message was published on.
        topic: &'a str,
        /// Message body.
        payload: &'a [u8],
    },
    /// Subscription acknowledged.
    Subscribed,
    /// Unsubscription acknowledged.
    Unsubscribed,
    /// Publish acknowledged.
    Published,
    /// Client-level error.
    Error,
    /// Queued message expired before delivery.
    Deleted,
}
