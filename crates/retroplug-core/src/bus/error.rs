//! Bus error types

use thiserror::Error;

use super::NodeType;

/// Topology errors raised while configuring the bus
///
/// All of these are detected before or at `start()`/route resolution. Once
/// routes are resolved the only runtime failure left is [`CallError`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The topology was frozen by `start()`
    #[error("Bus already started, topology is frozen")]
    AlreadyStarted,

    /// Routes can only be resolved once the topology is frozen
    #[error("Bus not started yet")]
    NotStarted,

    /// A call type was registered twice
    #[error("Call {0} registered twice")]
    DuplicateCall(&'static str),

    /// A call type was used without `add_call`
    #[error("Call {0} was never registered with the bus")]
    UnknownCall(&'static str),

    /// A call was registered with a capacity of zero
    #[error("Call {0} needs a capacity of at least 1")]
    ZeroCapacity(&'static str),

    /// Two nodes of the same type were created
    #[error("Node {0} created twice")]
    DuplicateNode(NodeType),

    /// A node listed a peer that was never created
    #[error("Node {node} lists unknown peer {peer}")]
    UnknownPeer { node: NodeType, peer: NodeType },

    /// The caller is not wired to call the target
    #[error("Node {from} is not wired to call node {to}")]
    NotPeers { from: NodeType, to: NodeType },

    /// The target node has no handler for the call
    #[error("Node {node} has no receiver for call {call}")]
    NoReceiver { node: NodeType, call: &'static str },
}

/// Result type for bus configuration
pub type BusResult<T> = Result<T, BusError>;

/// Failure of a single call invocation
///
/// Owned payloads are handed back on every variant that still has them, so
/// a rejected ownership transfer never drops the instance it carried.
pub enum CallError<T> {
    /// The receiving channel is at capacity
    Full(T),
    /// A blocking call was attempted from the real-time node
    Realtime(T),
    /// The receiving node went away before answering
    Disconnected,
}

impl<T> CallError<T> {
    /// Recover the request if the call never reached a handler
    pub fn into_request(self) -> Option<T> {
        match self {
            CallError::Full(request) | CallError::Realtime(request) => Some(request),
            CallError::Disconnected => None,
        }
    }

    /// Whether this is a capacity rejection that may succeed next tick
    pub fn is_full(&self) -> bool {
        matches!(self, CallError::Full(_))
    }
}

impl<T> std::fmt::Debug for CallError<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallError::Full(_) => f.write_str("Full(..)"),
            CallError::Realtime(_) => f.write_str("Realtime(..)"),
            CallError::Disconnected => f.write_str("Disconnected"),
        }
    }
}

impl<T> std::fmt::Display for CallError<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallError::Full(_) => write!(f, "Call queue is full"),
            CallError::Realtime(_) => write!(f, "Blocking call attempted from the real-time thread"),
            CallError::Disconnected => write!(f, "Receiving node disconnected before replying"),
        }
    }
}

impl<T> std::error::Error for CallError<T> {}

/// A fire-and-forget request that did not fit in the channel
pub struct Rejected<T>(pub T);

impl<T> Rejected<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> std::fmt::Debug for Rejected<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Rejected(..)")
    }
}

impl<T> std::fmt::Display for Rejected<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Call queue is full, request rejected")
    }
}

impl<T> std::error::Error for Rejected<T> {}

impl<T> From<Rejected<T>> for CallError<T> {
    fn from(rejected: Rejected<T>) -> Self {
        CallError::Full(rejected.0)
    }
}
