//! Message bus: topology registry, typed routes
//!
//! The bus is configured once at startup: call types are registered with a
//! fixed capacity, nodes are created with the peers they may call, handlers
//! are bound, then [`MessageBus::start`] freezes everything. Routes are
//! resolved against the frozen topology, so wiring mistakes surface as
//! [`BusError`]s during setup instead of mid-run.
//!
//! ```text
//! UI thread                              Audio thread
//! ─────────                              ────────────
//! Route<SwapInstance>::call(req) ─push─► CallChannel<SwapInstance>
//!   blocking_recv()                      Node::drain_all(&mut state)
//!   ◄──────────── oneshot reply ───────── handler(&mut state, req)
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use tokio::sync::oneshot;

use super::call::{call_id, Call, CallInfo, NodeType};
use super::channel::{CallChannel, Envelope};
use super::error::{BusError, BusResult, CallError, Rejected};
use super::node::Node;

/// Type-erased `Arc<CallChannel<C>>`
type AnyChannel = Arc<dyn Any + Send + Sync>;

#[derive(Default)]
struct NodeEntry {
    peers: Vec<NodeType>,
    channels: HashMap<TypeId, AnyChannel>,
}

#[derive(Default)]
struct Topology {
    calls: HashMap<TypeId, CallInfo>,
    nodes: HashMap<NodeType, NodeEntry>,
}

/// State shared by the bus, its nodes and every sender
pub(crate) struct BusShared {
    /// Topology under construction; `None` once started
    building: Mutex<Option<Topology>>,
    frozen: OnceLock<Topology>,
}

impl BusShared {
    fn lock_building(&self) -> MutexGuard<'_, Option<Topology>> {
        self.building.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create the receive channel for a call on a node
    pub(crate) fn register_receiver<C: Call>(
        &self,
        node: NodeType,
    ) -> BusResult<Arc<CallChannel<C>>> {
        let mut guard = self.lock_building();
        let topology = guard.as_mut().ok_or(BusError::AlreadyStarted)?;

        let id = call_id::<C>();
        let info = topology
            .calls
            .get(&id)
            .copied()
            .ok_or(BusError::UnknownCall(C::NAME))?;

        let channel = Arc::new(CallChannel::<C>::new(info.capacity));
        topology
            .nodes
            .entry(node)
            .or_default()
            .channels
            .insert(id, channel.clone());
        Ok(channel)
    }
}

/// Startup-time registry wiring nodes, call types and peer permissions
pub struct MessageBus {
    shared: Arc<BusShared>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(BusShared {
                building: Mutex::new(Some(Topology::default())),
                frozen: OnceLock::new(),
            }),
        }
    }

    /// Register a call type with a fixed queue capacity
    pub fn add_call<C: Call>(&self, capacity: usize) -> BusResult<()> {
        if capacity == 0 {
            return Err(BusError::ZeroCapacity(C::NAME));
        }
        let mut guard = self.shared.lock_building();
        let topology = guard.as_mut().ok_or(BusError::AlreadyStarted)?;

        let id = call_id::<C>();
        if topology.calls.contains_key(&id) {
            return Err(BusError::DuplicateCall(C::NAME));
        }
        topology.calls.insert(id, CallInfo { name: C::NAME, capacity });
        log::debug!("Registered call {} (capacity {})", C::NAME, capacity);
        Ok(())
    }

    /// Create the node for a thread role and declare which nodes it may call
    pub fn create_node<S: 'static>(
        &self,
        node_type: NodeType,
        peers: &[NodeType],
    ) -> BusResult<Node<S>> {
        let mut guard = self.shared.lock_building();
        let topology = guard.as_mut().ok_or(BusError::AlreadyStarted)?;

        if topology.nodes.contains_key(&node_type) {
            return Err(BusError::DuplicateNode(node_type));
        }
        topology.nodes.insert(
            node_type,
            NodeEntry {
                peers: peers.to_vec(),
                channels: HashMap::new(),
            },
        );
        log::info!("Created node {} (peers: {:?})", node_type, peers);
        Ok(Node::new(node_type, self.shared.clone()))
    }

    /// Freeze the topology
    ///
    /// Validates that every declared peer exists. On failure the bus stays
    /// configurable so the caller can report the error and bail out.
    pub fn start(&self) -> BusResult<()> {
        let mut guard = self.shared.lock_building();
        let topology = guard.take().ok_or(BusError::AlreadyStarted)?;

        let unknown = topology.nodes.iter().find_map(|(node, entry)| {
            entry
                .peers
                .iter()
                .find(|peer| !topology.nodes.contains_key(peer))
                .map(|peer| (*node, *peer))
        });
        if let Some((node, peer)) = unknown {
            *guard = Some(topology);
            return Err(BusError::UnknownPeer { node, peer });
        }

        for info in topology.calls.values() {
            log::debug!("  {} (capacity {})", info.name, info.capacity);
        }
        let calls = topology.calls.len();
        let nodes = topology.nodes.len();
        let receivers: usize = topology.nodes.values().map(|n| n.channels.len()).sum();
        if self.shared.frozen.set(topology).is_err() {
            return Err(BusError::AlreadyStarted);
        }
        log::info!(
            "Message bus started: {} nodes, {} calls, {} receive channels",
            nodes,
            calls,
            receivers
        );
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.shared.frozen.get().is_some()
    }

    /// Sender acting on behalf of a node type
    pub fn sender(&self, from: NodeType) -> CallSender {
        CallSender::new(from, self.shared.clone())
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("started", &self.is_started())
            .finish()
    }
}

/// Resolves typed routes on behalf of one node
///
/// Cheap to clone and `Send`, so it can be handed to whatever thread acts
/// for the node.
#[derive(Clone)]
pub struct CallSender {
    from: NodeType,
    shared: Arc<BusShared>,
}

impl CallSender {
    pub(crate) fn new(from: NodeType, shared: Arc<BusShared>) -> Self {
        Self { from, shared }
    }

    /// Node this sender acts for
    pub fn source(&self) -> NodeType {
        self.from
    }

    /// Resolve the route for a call to a target node
    ///
    /// Requires a started bus, a peer wiring from this node to the target
    /// and a handler for the call on the target.
    pub fn route<C: Call>(&self, to: NodeType) -> BusResult<Route<C>> {
        let topology = self.shared.frozen.get().ok_or(BusError::NotStarted)?;

        let wired = topology
            .nodes
            .get(&self.from)
            .is_some_and(|entry| entry.peers.contains(&to));
        if !wired {
            return Err(BusError::NotPeers { from: self.from, to });
        }

        let id = call_id::<C>();
        if !topology.calls.contains_key(&id) {
            return Err(BusError::UnknownCall(C::NAME));
        }

        let no_receiver = || BusError::NoReceiver { node: to, call: C::NAME };
        let channel = topology
            .nodes
            .get(&to)
            .and_then(|entry| entry.channels.get(&id))
            .cloned()
            .ok_or_else(no_receiver)?
            .downcast::<CallChannel<C>>()
            .map_err(|_| no_receiver())?;

        Ok(Route {
            from: self.from,
            to,
            channel,
        })
    }
}

impl std::fmt::Debug for CallSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallSender").field("from", &self.from).finish()
    }
}

/// A resolved, typed path from one node to another for a single call type
pub struct Route<C: Call> {
    from: NodeType,
    to: NodeType,
    channel: Arc<CallChannel<C>>,
}

impl<C: Call> Clone for Route<C> {
    fn clone(&self) -> Self {
        Self {
            from: self.from,
            to: self.to,
            channel: self.channel.clone(),
        }
    }
}

impl<C: Call> Route<C> {
    /// Enqueue and block until the target's drain answers
    ///
    /// Refused from the real-time node. On a full channel the request is
    /// handed back immediately; nothing is ever waited on in that case.
    pub fn call(&self, request: C::Request) -> Result<C::Response, CallError<C::Request>> {
        if self.from.is_realtime() {
            return Err(CallError::Realtime(request));
        }
        if self.channel.is_closed() {
            return Err(CallError::Disconnected);
        }
        self.channel.reap();

        let (tx, rx) = oneshot::channel();
        self.channel
            .enqueue(Envelope { request, reply: Some(tx) })
            .map_err(|envelope| CallError::Full(envelope.request))?;

        // The node may have closed between the check and the push
        if self.channel.is_closed() {
            self.channel.clear();
        }

        rx.blocking_recv().map_err(|_| CallError::Disconnected)
    }

    pub fn source(&self) -> NodeType {
        self.from
    }

    pub fn target(&self) -> NodeType {
        self.to
    }

    pub fn capacity(&self) -> usize {
        self.channel.capacity()
    }

    pub fn pending(&self) -> usize {
        self.channel.pending()
    }

    pub fn accepted(&self) -> u64 {
        self.channel.accepted()
    }

    pub fn rejected(&self) -> u64 {
        self.channel.rejected()
    }

    /// True once the target node has been dropped
    pub fn is_closed(&self) -> bool {
        self.channel.is_closed()
    }
}

impl<C: Call<Response = ()>> Route<C> {
    /// Enqueue without waiting
    ///
    /// Safe from any node, including the real-time one. Rejected when the
    /// channel is full or the target node is gone; [`Route::is_closed`]
    /// tells the two apart.
    pub fn send(&self, request: C::Request) -> Result<(), Rejected<C::Request>> {
        self.channel
            .enqueue(Envelope { request, reply: None })
            .map_err(|envelope| Rejected(envelope.request))?;

        // Lost the race with the node closing; nobody will drain this
        if self.channel.is_closed() {
            self.channel.clear();
        }
        Ok(())
    }
}

impl<C: Call> std::fmt::Debug for Route<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("call", &C::NAME)
            .field("from", &self.from)
            .field("to", &self.to)
            .finish()
    }
}
