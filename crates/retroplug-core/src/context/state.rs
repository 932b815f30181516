//! State snapshots exchanged through `FetchState`
//!
//! The cooperative thread allocates every buffer up front and moves the
//! whole snapshot into the request. The real-time thread only fills buffers
//! up to their existing capacity and hands the snapshot back, so a fetch
//! never allocates or frees on the real-time thread.

use crate::types::{InstanceIndex, Model, MAX_INSTANCES};

/// Captured state of one slot
#[derive(Debug, Clone, Default)]
pub struct SlotSnapshot {
    /// Whether the slot held an instance when the snapshot was taken
    pub populated: bool,
    pub model: Model,
    /// Battery-backed save RAM
    pub sram: Vec<u8>,
    /// Full emulator state
    pub state: Vec<u8>,
    /// Scripting-layer bookkeeping for the instance
    pub component: Vec<u8>,
    /// Bytes the core needed for `sram`
    pub sram_size: usize,
    /// Bytes the core needed for `state`
    pub state_size: usize,
    /// Bytes the scripting layer needed for `component`
    pub component_size: usize,
    /// Set when any buffer was too small and left empty
    pub overflowed: bool,
}

impl SlotSnapshot {
    fn with_capacity(sram: usize, state: usize, component: usize) -> Self {
        Self {
            sram: Vec::with_capacity(sram),
            state: Vec::with_capacity(state),
            component: Vec::with_capacity(component),
            ..Default::default()
        }
    }

    /// Reset to an unpopulated slot, keeping buffer capacity
    pub(crate) fn clear(&mut self) {
        self.populated = false;
        self.model = Model::default();
        self.sram.clear();
        self.state.clear();
        self.component.clear();
        self.sram_size = 0;
        self.state_size = 0;
        self.component_size = 0;
        self.overflowed = false;
    }
}

/// Snapshot of every slot, used as both the `FetchState` request and reply
#[derive(Debug, Clone, Default)]
pub struct StateSnapshot {
    pub slots: [SlotSnapshot; MAX_INSTANCES],
}

impl StateSnapshot {
    /// Allocate buffers for every slot
    pub fn with_capacity(sram: usize, state: usize, component: usize) -> Self {
        Self {
            slots: std::array::from_fn(|_| SlotSnapshot::with_capacity(sram, state, component)),
        }
    }

    pub fn slot(&self, idx: InstanceIndex) -> &SlotSnapshot {
        &self.slots[idx.get()]
    }

    pub(crate) fn slot_mut(&mut self, idx: InstanceIndex) -> &mut SlotSnapshot {
        &mut self.slots[idx.get()]
    }

    /// Populated slots with their indices
    pub fn populated(&self) -> impl Iterator<Item = (InstanceIndex, &SlotSnapshot)> {
        InstanceIndex::ALL
            .into_iter()
            .map(|idx| (idx, self.slot(idx)))
            .filter(|(_, slot)| slot.populated)
    }

    /// Whether any populated slot needs bigger buffers
    pub fn overflowed(&self) -> bool {
        self.slots.iter().any(|slot| slot.overflowed)
    }
}

/// Fill a buffer up to its capacity with a writer
///
/// The writer receives the whole spare capacity and returns the bytes it
/// wrote, or `None` if that was not enough; the buffer is then left empty.
/// Never grows the allocation.
pub(crate) fn fill_within_capacity<F>(buf: &mut Vec<u8>, write: F) -> bool
where
    F: FnOnce(&mut [u8]) -> Option<usize>,
{
    buf.clear();
    buf.resize(buf.capacity(), 0);
    match write(buf.as_mut_slice()) {
        Some(len) => {
            buf.truncate(len);
            true
        }
        None => {
            buf.clear();
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_never_grows_buffer() {
        let mut buf = Vec::with_capacity(8);
        let ptr = buf.as_ptr();
        let capacity = buf.capacity();

        assert!(fill_within_capacity(&mut buf, |out| {
            out[..3].copy_from_slice(&[1, 2, 3]);
            Some(3)
        }));
        assert_eq!(buf, vec![1, 2, 3]);
        assert_eq!(buf.as_ptr(), ptr);

        assert!(!fill_within_capacity(&mut buf, |out| (out.len() >= 1024).then_some(1024)));
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), capacity);
    }

    #[test]
    fn test_populated_iterates_in_slot_order() {
        let mut snapshot = StateSnapshot::with_capacity(4, 4, 4);
        snapshot.slots[3].populated = true;
        snapshot.slots[1].populated = true;

        let indices: Vec<usize> = snapshot.populated().map(|(idx, _)| idx.get()).collect();
        assert_eq!(indices, vec![1, 3]);
    }
}
