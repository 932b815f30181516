//! Thread-affine bus endpoint
//!
//! A node owns the receive side of every call type it registered a handler
//! for. Its owning thread calls [`Node::drain_all`] once per tick; handlers
//! run synchronously on that thread with exclusive access to the node state.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use super::message_bus::{BusShared, CallSender};
use super::call::{call_id, Call, NodeType};
use super::channel::CallChannel;
use super::error::BusResult;

/// Handler for one call type, run with exclusive access to the node state
pub type Handler<C, S> =
    Box<dyn FnMut(&mut S, <C as Call>::Request) -> <C as Call>::Response + Send>;

/// Counters of one receive channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelStats {
    pub call: &'static str,
    pub capacity: usize,
    pub pending: usize,
    pub accepted: u64,
    pub rejected: u64,
}

/// Type-erased (channel, handler) pair
trait DrainEntry<S>: Send {
    fn drain(&mut self, state: &mut S) -> usize;
    fn close(&self);
    fn stats(&self) -> ChannelStats;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

struct Entry<C: Call, S> {
    channel: Arc<CallChannel<C>>,
    handler: Handler<C, S>,
}

impl<C: Call, S: 'static> DrainEntry<S> for Entry<C, S> {
    fn drain(&mut self, state: &mut S) -> usize {
        let handler = &mut self.handler;
        self.channel.drain(|request| handler(&mut *state, request))
    }

    fn close(&self) {
        self.channel.close();
    }

    fn stats(&self) -> ChannelStats {
        ChannelStats {
            call: C::NAME,
            capacity: self.channel.capacity(),
            pending: self.channel.pending(),
            accepted: self.channel.accepted(),
            rejected: self.channel.rejected(),
        }
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A bus endpoint owned by one thread
///
/// `S` is the state handlers mutate, passed in by the owning thread on each
/// drain so no handler ever holds a long-lived reference to it.
pub struct Node<S: 'static> {
    node_type: NodeType,
    shared: Arc<BusShared>,
    /// Drain table in registration order
    entries: Vec<Box<dyn DrainEntry<S>>>,
    index: HashMap<TypeId, usize>,
}

impl<S: 'static> Node<S> {
    pub(crate) fn new(node_type: NodeType, shared: Arc<BusShared>) -> Self {
        Self {
            node_type,
            shared,
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn node_type(&self) -> NodeType {
        self.node_type
    }

    /// Bind the handler for a call type
    ///
    /// The first registration creates the receive channel and must happen
    /// before the bus is started. Registering again replaces the handler and
    /// is allowed at any time; the channel and its queued requests are kept.
    pub fn on<C, F>(&mut self, handler: F) -> BusResult<()>
    where
        C: Call,
        F: FnMut(&mut S, C::Request) -> C::Response + Send + 'static,
    {
        let id = call_id::<C>();
        if let Some(&slot) = self.index.get(&id) {
            if let Some(entry) = self.entries[slot].as_any_mut().downcast_mut::<Entry<C, S>>() {
                entry.handler = Box::new(handler);
                log::debug!("Node {}: replaced handler for {}", self.node_type, C::NAME);
            }
            return Ok(());
        }

        let channel = self.shared.register_receiver::<C>(self.node_type)?;
        self.index.insert(id, self.entries.len());
        self.entries.push(Box::new(Entry::<C, S> {
            channel,
            handler: Box::new(handler),
        }));
        log::debug!("Node {}: registered handler for {}", self.node_type, C::NAME);
        Ok(())
    }

    /// Whether a handler is bound for a call type
    pub fn handles<C: Call>(&self) -> bool {
        self.index.contains_key(&call_id::<C>())
    }

    /// Drain every owned channel once, in registration order
    ///
    /// Called by the owning thread once per tick. Returns the number of
    /// requests handled.
    pub fn drain_all(&mut self, state: &mut S) -> usize {
        let mut handled = 0;
        for entry in &mut self.entries {
            handled += entry.drain(state);
        }
        handled
    }

    /// Sender that calls other nodes on behalf of this one
    pub fn sender(&self) -> CallSender {
        CallSender::new(self.node_type, self.shared.clone())
    }

    /// Per-channel counters in registration order
    pub fn stats(&self) -> Vec<ChannelStats> {
        self.entries.iter().map(|e| e.stats()).collect()
    }

    /// Total requests rejected across all owned channels
    pub fn total_rejected(&self) -> u64 {
        self.entries.iter().map(|e| e.stats().rejected).sum()
    }
}

impl<S: 'static> Drop for Node<S> {
    fn drop(&mut self) {
        // Wake blocking callers still queued on this node
        for entry in &self.entries {
            entry.close();
        }
    }
}

impl<S: 'static> std::fmt::Debug for Node<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("node_type", &self.node_type)
            .field("calls", &self.entries.len())
            .finish()
    }
}
