//! Call types exchanged between the UI and audio nodes
//!
//! Payloads that carry instances, ROM images or snapshot buffers move by
//! value: the receiving side owns them until it hands them back in the
//! response, so nothing is ever aliased across threads.

use serde::{Deserialize, Serialize};

use crate::bus::{BusResult, MessageBus};
use crate::context::{CoreSettings, Instance, InstanceId, ProjectSettings, StateSnapshot};
use crate::script::{LayerError, OwnedLayer};
use crate::types::{ButtonStream, InstanceIndex, Model};

// ─────────────────────────────────────────────────────────────────────────────
// Payloads
// ─────────────────────────────────────────────────────────────────────────────

/// Place an instance in a slot
#[derive(Debug)]
pub struct InstanceSwap {
    pub idx: InstanceIndex,
    pub instance: Instance,
}

/// Clone the instance at `source` into `instance`, then place it at `target`
#[derive(Debug)]
pub struct InstanceDuplicate {
    pub source: InstanceIndex,
    pub target: InstanceIndex,
    pub instance: Instance,
    /// Scratch for the state snapshot, sized by the caller
    pub scratch: Vec<u8>,
}

/// Reply to [`DuplicateInstance`]
#[derive(Debug)]
pub struct Duplicated {
    /// Whatever occupied the target slot before
    pub previous: Option<Instance>,
    pub scratch: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetRequest {
    pub idx: InstanceIndex,
    pub model: Model,
}

/// Binary payload for a slot, handed back in the reply
#[derive(Debug)]
pub struct SetDataRequest {
    pub idx: InstanceIndex,
    pub buffer: Vec<u8>,
    pub reset: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceSettingsUpdate {
    pub idx: InstanceIndex,
    pub settings: CoreSettings,
}

/// Replace the scripting layer
pub struct LayerSwap {
    pub layer: OwnedLayer,
    /// Carries the old layer's bookkeeping to the new one
    pub scratch: Vec<u8>,
}

/// Reply to [`SwapLayer`]
pub struct LayerSwapped {
    pub previous: Option<OwnedLayer>,
    pub scratch: Vec<u8>,
    /// Bytes of bookkeeping carried across
    pub carried: usize,
    /// Why the bookkeeping could not be carried, if it could not
    pub error: Option<LayerError>,
}

impl std::fmt::Debug for LayerSwap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayerSwap")
            .field("layer", &self.layer.name())
            .field("scratch", &self.scratch.len())
            .finish()
    }
}

impl std::fmt::Debug for LayerSwapped {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayerSwapped")
            .field("previous", &self.previous.as_ref().map(|layer| layer.name()))
            .field("carried", &self.carried)
            .field("error", &self.error)
            .finish()
    }
}

/// Slot lifecycle notification sent from the audio node to the UI
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SlotEvent {
    Added {
        idx: InstanceIndex,
        id: InstanceId,
        settings: CoreSettings,
    },
    Removed {
        idx: InstanceIndex,
    },
    Reset {
        idx: InstanceIndex,
        model: Model,
    },
    SettingsChanged {
        idx: InstanceIndex,
        settings: CoreSettings,
    },
    Activated {
        idx: InstanceIndex,
    },
    /// Project settings the context now runs with
    ProjectChanged {
        settings: ProjectSettings,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Calls
// ─────────────────────────────────────────────────────────────────────────────

crate::define_call! {
    /// Replace the instance in a slot, returning the previous one
    pub SwapInstance: InstanceSwap => Option<Instance>;
    /// Duplicate an instance into another slot
    pub DuplicateInstance: InstanceDuplicate => Duplicated;
    /// Reinitialise an instance with a hardware model
    pub ResetInstance: ResetRequest => ();
    /// Detach and return the instance in a slot
    pub TakeInstance: InstanceIndex => Option<Instance>;
    /// Select the focused instance
    pub SetActive: InstanceIndex => ();
    /// Replace project settings
    pub UpdateSettings: ProjectSettings => ();
    /// Snapshot every populated slot into caller-provided buffers
    pub FetchState: StateSnapshot => StateSnapshot;
    /// Install save RAM, handing the buffer back
    pub SetSram: SetDataRequest => Vec<u8>;
    /// Install a ROM image, handing back the displaced image
    pub SetRom: SetDataRequest => Vec<u8>;
    /// Deliver button events to an instance
    pub PressButtons: ButtonStream => ();
    /// Forward a context menu pick to the scripting layer
    pub ContextMenuResult: i32 => ();
    /// Hot-swap the scripting layer
    pub SwapLayer: LayerSwap => LayerSwapped;
    /// Replace per-core settings of one instance
    pub UpdateInstanceSettings: InstanceSettingsUpdate => ();
    /// Audio to UI: slot lifecycle notification
    pub SlotChanged: SlotEvent => ();
}

/// Queue capacity of every call type
///
/// Sized by expected burst: button streams arrive in bursts, one-shot
/// operations rarely have more than a few in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallCapacities {
    pub swap_instance: usize,
    pub take_instance: usize,
    pub duplicate_instance: usize,
    pub reset_instance: usize,
    pub update_settings: usize,
    pub press_buttons: usize,
    pub fetch_state: usize,
    pub context_menu_result: usize,
    pub swap_layer: usize,
    pub set_active: usize,
    pub set_sram: usize,
    pub set_rom: usize,
    pub update_instance_settings: usize,
    pub slot_changed: usize,
}

impl Default for CallCapacities {
    fn default() -> Self {
        Self {
            swap_instance: 4,
            take_instance: 4,
            duplicate_instance: 1,
            reset_instance: 4,
            update_settings: 4,
            press_buttons: 32,
            fetch_state: 1,
            context_menu_result: 1,
            swap_layer: 4,
            set_active: 4,
            set_sram: 4,
            set_rom: 4,
            update_instance_settings: 4,
            slot_changed: 16,
        }
    }
}

/// Register every call type with the bus
pub fn register_calls(bus: &MessageBus, caps: &CallCapacities) -> BusResult<()> {
    bus.add_call::<SwapInstance>(caps.swap_instance)?;
    bus.add_call::<TakeInstance>(caps.take_instance)?;
    bus.add_call::<DuplicateInstance>(caps.duplicate_instance)?;
    bus.add_call::<ResetInstance>(caps.reset_instance)?;
    bus.add_call::<UpdateSettings>(caps.update_settings)?;
    bus.add_call::<PressButtons>(caps.press_buttons)?;
    bus.add_call::<FetchState>(caps.fetch_state)?;
    bus.add_call::<ContextMenuResult>(caps.context_menu_result)?;
    bus.add_call::<SwapLayer>(caps.swap_layer)?;
    bus.add_call::<SetActive>(caps.set_active)?;
    bus.add_call::<SetSram>(caps.set_sram)?;
    bus.add_call::<SetRom>(caps.set_rom)?;
    bus.add_call::<UpdateInstanceSettings>(caps.update_instance_settings)?;
    bus.add_call::<SlotChanged>(caps.slot_changed)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusError;

    #[test]
    fn test_default_capacities_register() {
        let bus = MessageBus::new();
        register_calls(&bus, &CallCapacities::default()).unwrap();
        assert_eq!(
            register_calls(&bus, &CallCapacities::default()),
            Err(BusError::DuplicateCall("SwapInstance"))
        );
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        let bus = MessageBus::new();
        let caps = CallCapacities {
            fetch_state: 0,
            ..Default::default()
        };
        assert_eq!(
            register_calls(&bus, &caps),
            Err(BusError::ZeroCapacity("FetchState"))
        );
    }
}
