//! Cross-thread message bus
//!
//! Typed, bounded call channels between thread-affine nodes. The real-time
//! node only ever enqueues and drains; cooperative nodes may additionally
//! block on a reply.
//!
//! - [`call`]: call markers and node identities
//! - [`channel`]: the bounded lock-free queue behind every call
//! - [`node`]: per-thread handler table and drain loop
//! - [`message_bus`]: topology registry and typed routes

pub mod call;
pub mod channel;
mod error;
pub mod message_bus;
pub mod node;

pub use call::{Call, NodeType};
pub use channel::CallChannel;
pub use error::{BusError, BusResult, CallError, Rejected};
pub use message_bus::{CallSender, MessageBus, Route};
pub use node::{ChannelStats, Handler, Node};
