//! Hot-swappable scripting layer
//!
//! A scripting layer mirrors instance lifecycle events so it can keep its own
//! per-instance bookkeeping. It never stores a reference to the processing
//! context: the context is lent to it for the duration of each call, and the
//! controller owns the layer. Swapping one layer for another carries the
//! bookkeeping across as an opaque blob (see `SwapLayer`).
//!
//! Every method runs on the real-time thread. Blobs are written into
//! caller-provided buffers so a layer never has to allocate there.

mod ledger;

pub use ledger::{LedgerEntry, LedgerLayer};

use basedrop::Owned;
use thiserror::Error;

use crate::context::{Instance, ProcessingContext};
use crate::gc::gc_handle;
use crate::types::{InstanceIndex, TimeInfo};

/// Errors restoring layer bookkeeping
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerError {
    /// The blob is not valid for this layer
    #[error("Malformed layer blob at line {line}, column {column}")]
    Decode { line: usize, column: usize },

    /// The blob came from an incompatible layer version
    #[error("Unsupported layer blob version {0}")]
    UnsupportedVersion(u32),

    /// The output buffer could not hold the serialized bookkeeping
    #[error("Layer blob buffer too small")]
    BufferTooSmall,
}

impl From<serde_json::Error> for LayerError {
    fn from(err: serde_json::Error) -> Self {
        LayerError::Decode {
            line: err.line(),
            column: err.column(),
        }
    }
}

/// A scripting layer that may be dropped on the real-time thread
pub type OwnedLayer = Owned<Box<dyn ScriptLayer>>;

/// Box a layer for transfer to the audio node
pub fn own_layer<L: ScriptLayer + 'static>(layer: L) -> OwnedLayer {
    let layer: Box<dyn ScriptLayer> = Box::new(layer);
    Owned::new(&gc_handle(), layer)
}

/// Scripting/automation layer driven from the audio node
pub trait ScriptLayer: Send {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Bind to the current context and transport
    fn init(&mut self, ctx: &ProcessingContext, time: &TimeInfo, sample_rate: f64);

    /// An instance was placed in an empty or replaced slot
    fn add_instance(&mut self, idx: InstanceIndex, instance: &Instance);

    /// An instance was cloned from `source` into `target`
    fn duplicate_instance(
        &mut self,
        source: InstanceIndex,
        target: InstanceIndex,
        instance: &Instance,
    );

    /// The instance in a slot is about to be detached
    fn remove_instance(&mut self, idx: InstanceIndex);

    fn set_active(&mut self, idx: InstanceIndex);

    /// A context menu entry was picked in the UI
    fn on_menu_result(&mut self, id: i32);

    /// Per-tick hook, run after the drain and before rendering
    fn update(&mut self, ctx: &mut ProcessingContext, time: &TimeInfo, frames: usize);

    /// Write the bookkeeping of one instance, returning the bytes written
    fn serialize_instance(&self, idx: InstanceIndex, out: &mut [u8]) -> Option<usize>;

    /// Bytes `serialize_instance` would write for one instance
    ///
    /// Must not allocate; called on the real-time thread.
    fn instance_size(&self, idx: InstanceIndex) -> usize;

    /// Write the bookkeeping of every instance, returning the bytes written
    fn serialize_instances(&self, out: &mut [u8]) -> Result<usize, LayerError>;

    /// Restore bookkeeping produced by `serialize_instances`
    fn deserialize_instances(&mut self, blob: &[u8]) -> Result<(), LayerError>;
}
