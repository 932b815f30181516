//! Audio-side binding of the processing context
//!
//! [`AudioController`] is the state every audio-node handler mutates: the
//! processing context, the optional scripting layer and the host transport.
//! [`AudioProcessor`] pairs it with the audio node and is what the real-time
//! callback owns.
//!
//! # Real-Time Safety
//!
//! Nothing here allocates, frees, logs or waits. Instances and layers leave
//! through replies; if a caller is gone, their `basedrop` wrappers defer the
//! free to the collector thread. Slot notifications to the UI are
//! fire-and-forget and only counted when the UI queue is full.

use super::calls::{
    ContextMenuResult, DuplicateInstance, Duplicated, FetchState, InstanceDuplicate,
    InstanceSettingsUpdate, InstanceSwap, LayerSwap, LayerSwapped, PressButtons, ResetInstance,
    ResetRequest, SetActive, SetDataRequest, SetRom, SetSram, SlotChanged, SlotEvent, SwapInstance,
    SwapLayer, TakeInstance, UpdateInstanceSettings, UpdateSettings,
};
use crate::bus::{BusResult, ChannelStats, Node, Route};
use crate::context::{Instance, ProcessingContext, ProjectSettings, StateSnapshot};
use crate::context::state::fill_within_capacity;
use crate::script::OwnedLayer;
use crate::types::{ButtonStream, InstanceIndex, TimeInfo};

/// State owned by the audio node
pub struct AudioController {
    context: ProcessingContext,
    layer: Option<OwnedLayer>,
    time: TimeInfo,
    sample_rate: f64,
    /// Slot notifications to the UI, attached once the bus has started
    notify: Option<Route<SlotChanged>>,
}

impl AudioController {
    pub fn new(context: ProcessingContext, sample_rate: f64) -> Self {
        Self {
            context,
            layer: None,
            time: TimeInfo::default(),
            sample_rate,
            notify: None,
        }
    }

    /// Bind every audio-side handler on the node
    pub fn register(node: &mut Node<AudioController>) -> BusResult<()> {
        node.on::<SwapLayer, _>(Self::swap_layer)?;
        node.on::<SwapInstance, _>(Self::swap_instance)?;
        node.on::<DuplicateInstance, _>(Self::duplicate_instance)?;
        node.on::<ResetInstance, _>(Self::reset_instance)?;
        node.on::<TakeInstance, _>(Self::take_instance)?;
        node.on::<SetActive, _>(Self::set_active)?;
        node.on::<UpdateSettings, _>(Self::update_settings)?;
        node.on::<FetchState, _>(Self::fetch_state)?;
        node.on::<SetSram, _>(Self::set_sram)?;
        node.on::<SetRom, _>(Self::set_rom)?;
        node.on::<PressButtons, _>(Self::press_buttons)?;
        node.on::<ContextMenuResult, _>(Self::context_menu_result)?;
        node.on::<UpdateInstanceSettings, _>(Self::update_instance_settings)?;
        Ok(())
    }

    /// Route slot notifications to the UI node
    pub fn attach_ui(&mut self, route: Route<SlotChanged>) {
        self.notify = Some(route);
    }

    pub fn context(&self) -> &ProcessingContext {
        &self.context
    }

    pub fn layer_name(&self) -> Option<&str> {
        self.layer.as_ref().map(|layer| layer.name())
    }

    pub fn time_info(&self) -> &TimeInfo {
        &self.time
    }

    pub fn set_time_info(&mut self, time: TimeInfo) {
        self.time = time;
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Notifications dropped because the UI queue was full
    pub fn dropped_notifications(&self) -> u64 {
        self.notify.as_ref().map_or(0, Route::rejected)
    }

    fn emit(&self, event: SlotEvent) {
        if let Some(route) = &self.notify {
            // Counted by the channel; the UI reports it
            let _ = route.send(event);
        }
    }

    fn emit_added(&self, idx: InstanceIndex) {
        if let Some(instance) = self.context.get_instance(idx) {
            self.emit(SlotEvent::Added {
                idx,
                id: instance.id(),
                settings: instance.core().settings(),
            });
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Handlers
    // ─────────────────────────────────────────────────────────────────────

    /// Context hot-swap: carry the old layer's bookkeeping into the new one
    fn swap_layer(&mut self, request: LayerSwap) -> LayerSwapped {
        let LayerSwap { mut layer, mut scratch } = request;

        let carried = match self.layer.as_ref() {
            Some(old) => old.serialize_instances(&mut scratch),
            None => Ok(0),
        };

        layer.init(&self.context, &self.time, self.sample_rate);

        let (carried, error) = match carried {
            Ok(0) => (0, None),
            Ok(len) => match layer.deserialize_instances(&scratch[..len]) {
                Ok(()) => (len, None),
                Err(err) => (0, Some(err)),
            },
            Err(err) => (0, Some(err)),
        };

        LayerSwapped {
            previous: self.layer.replace(layer),
            scratch,
            carried,
            error,
        }
    }

    fn swap_instance(&mut self, request: InstanceSwap) -> Option<Instance> {
        let InstanceSwap { idx, instance } = request;
        if let Some(layer) = self.layer.as_mut() {
            layer.add_instance(idx, &instance);
        }
        let previous = self.context.swap_instance(idx, instance);
        self.emit_added(idx);
        previous
    }

    fn duplicate_instance(&mut self, request: InstanceDuplicate) -> Duplicated {
        let InstanceDuplicate {
            source,
            target,
            instance,
            mut scratch,
        } = request;

        let previous = self
            .context
            .duplicate_instance(source, target, instance, &mut scratch);
        if let (Some(layer), Some(instance)) =
            (self.layer.as_mut(), self.context.get_instance(target))
        {
            layer.duplicate_instance(source, target, instance);
        }
        self.emit_added(target);

        Duplicated { previous, scratch }
    }

    fn reset_instance(&mut self, request: ResetRequest) {
        if self.context.reset_instance(request.idx, request.model) {
            self.emit(SlotEvent::Reset {
                idx: request.idx,
                model: request.model,
            });
        }
    }

    fn take_instance(&mut self, idx: InstanceIndex) -> Option<Instance> {
        if let Some(layer) = self.layer.as_mut() {
            layer.remove_instance(idx);
        }
        let removed = self.context.remove_instance(idx);
        if removed.is_some() {
            self.emit(SlotEvent::Removed { idx });
        }
        removed
    }

    fn set_active(&mut self, idx: InstanceIndex) {
        if !self.context.set_active(idx) {
            return;
        }
        if let Some(layer) = self.layer.as_mut() {
            layer.set_active(idx);
        }
        self.emit(SlotEvent::Activated { idx });
    }

    fn update_settings(&mut self, settings: ProjectSettings) {
        self.context.set_settings(settings);
        self.emit(SlotEvent::ProjectChanged {
            settings: *self.context.settings(),
        });
    }

    fn fetch_state(&mut self, mut snapshot: StateSnapshot) -> StateSnapshot {
        self.context.fetch_state(&mut snapshot);

        if let Some(layer) = self.layer.as_ref() {
            for idx in InstanceIndex::ALL {
                let slot = snapshot.slot_mut(idx);
                if !slot.populated {
                    continue;
                }
                slot.component_size = layer.instance_size(idx);
                if !fill_within_capacity(&mut slot.component, |buf| {
                    layer.serialize_instance(idx, buf)
                }) {
                    slot.overflowed = true;
                }
            }
        }
        snapshot
    }

    fn set_sram(&mut self, request: SetDataRequest) -> Vec<u8> {
        self.context
            .load_battery(request.idx, request.buffer, request.reset)
    }

    fn set_rom(&mut self, request: SetDataRequest) -> Vec<u8> {
        let displaced = self.context.load_rom(request.idx, request.buffer, request.reset);
        if request.reset {
            if let Some(instance) = self.context.get_instance(request.idx) {
                self.emit(SlotEvent::Reset {
                    idx: request.idx,
                    model: instance.core().settings().model,
                });
            }
        }
        displaced
    }

    fn press_buttons(&mut self, stream: ButtonStream) {
        self.context.press_buttons(&stream);
    }

    fn context_menu_result(&mut self, id: i32) {
        if let Some(layer) = self.layer.as_mut() {
            layer.on_menu_result(id);
        }
    }

    fn update_instance_settings(&mut self, update: InstanceSettingsUpdate) {
        if self
            .context
            .update_instance_settings(update.idx, update.settings)
        {
            self.emit(SlotEvent::SettingsChanged {
                idx: update.idx,
                settings: update.settings,
            });
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Render
    // ─────────────────────────────────────────────────────────────────────

    /// Run the layer hook, render, then advance the transport
    pub fn process(&mut self, out: &mut [f32], channels: usize) {
        let frames = if channels == 0 { 0 } else { out.len() / channels };

        if let Some(layer) = self.layer.as_mut() {
            layer.update(&mut self.context, &self.time, frames);
        }
        self.context.process(out, channels);
        self.advance(frames);
    }

    fn advance(&mut self, frames: usize) {
        self.time.sample_pos += frames as f64;
        if self.time.playing && self.sample_rate > 0.0 {
            let seconds = frames as f64 / self.sample_rate;
            self.time.ppq_pos += seconds * self.time.tempo / 60.0;
        }
    }
}

/// Everything the real-time callback owns
///
/// One call to [`process`](Self::process) per host block: drain the audio
/// node, run the layer hook, render.
pub struct AudioProcessor {
    node: Node<AudioController>,
    controller: AudioController,
    channels: usize,
}

impl AudioProcessor {
    pub fn new(node: Node<AudioController>, controller: AudioController, channels: usize) -> Self {
        Self {
            node,
            controller,
            channels,
        }
    }

    /// Process one interleaved host block
    ///
    /// Returns the number of requests handled by the drain.
    pub fn process(&mut self, out: &mut [f32]) -> usize {
        let handled = self.node.drain_all(&mut self.controller);
        self.controller.process(out, self.channels);
        handled
    }

    /// Update the host transport before the next block
    pub fn set_time_info(&mut self, time: TimeInfo) {
        self.controller.set_time_info(time);
    }

    pub fn controller(&self) -> &AudioController {
        &self.controller
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Per-channel counters; allocates, so call from a cooperative thread
    pub fn stats(&self) -> Vec<ChannelStats> {
        self.node.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{RenderConfig, RenderReaders};
    use crate::demo::DemoCore;
    use crate::script::{own_layer, LayerError, LedgerLayer};
    use crate::types::Model;

    fn idx(i: usize) -> InstanceIndex {
        InstanceIndex::new(i).unwrap()
    }

    fn controller() -> (AudioController, RenderReaders) {
        let (ctx, readers) = ProcessingContext::new(RenderConfig::default(), ProjectSettings::default());
        (AudioController::new(ctx, 44_100.0), readers)
    }

    fn instance(name: &str) -> Instance {
        Instance::new(Box::new(DemoCore::new(name)))
    }

    fn swap_in(ctl: &mut AudioController, layer: LedgerLayer) -> LayerSwapped {
        ctl.swap_layer(LayerSwap {
            layer: own_layer(layer),
            scratch: vec![0; 4096],
        })
    }

    #[test]
    fn test_first_layer_swap_carries_nothing() {
        let (mut ctl, _readers) = controller();
        let swapped = swap_in(&mut ctl, LedgerLayer::new("first"));

        assert!(swapped.previous.is_none());
        assert_eq!(swapped.carried, 0);
        assert!(swapped.error.is_none());
        assert_eq!(ctl.layer_name(), Some("first"));
    }

    #[test]
    fn test_layer_swap_carries_bookkeeping() {
        let (mut ctl, _readers) = controller();
        swap_in(&mut ctl, LedgerLayer::new("old"));

        ctl.swap_instance(InstanceSwap { idx: idx(0), instance: instance("a") });
        ctl.swap_instance(InstanceSwap { idx: idx(2), instance: instance("b") });
        ctl.set_active(idx(2));
        ctl.context_menu_result(3);

        let swapped = swap_in(&mut ctl, LedgerLayer::new("new"));
        assert!(swapped.carried > 0);
        assert!(swapped.error.is_none());

        let old = swapped.previous.unwrap();
        assert_eq!(old.name(), "old");

        // The new layer now holds exactly the old bookkeeping
        let mut before = vec![0u8; 4096];
        let mut after = vec![0u8; 4096];
        let before_len = old.serialize_instances(&mut before).unwrap();
        let after_len = ctl
            .layer
            .as_ref()
            .unwrap()
            .serialize_instances(&mut after)
            .unwrap();
        assert_eq!(before[..before_len], after[..after_len]);
    }

    #[test]
    fn test_layer_swap_reports_small_scratch() {
        let (mut ctl, _readers) = controller();
        swap_in(&mut ctl, LedgerLayer::new("old"));
        ctl.swap_instance(InstanceSwap { idx: idx(1), instance: instance("a") });

        let swapped = ctl.swap_layer(LayerSwap {
            layer: own_layer(LedgerLayer::new("new")),
            scratch: vec![0; 4],
        });
        assert_eq!(swapped.error, Some(LayerError::BufferTooSmall));
        assert_eq!(swapped.carried, 0);
        // The new layer still starts from the live context
        assert_eq!(ctl.layer_name(), Some("new"));
    }

    #[test]
    fn test_take_instance_hands_back_owner() {
        let (mut ctl, _readers) = controller();
        let a = instance("a");
        let id = a.id();
        ctl.swap_instance(InstanceSwap { idx: idx(3), instance: a });

        assert_eq!(ctl.take_instance(idx(3)).map(|i| i.id()), Some(id));
        assert!(ctl.take_instance(idx(3)).is_none());
    }

    #[test]
    fn test_fetch_state_fills_components() {
        let (mut ctl, _readers) = controller();
        swap_in(&mut ctl, LedgerLayer::default());
        for i in [0, 1, 3] {
            ctl.swap_instance(InstanceSwap { idx: idx(i), instance: instance("rom") });
        }

        let snapshot = ctl.fetch_state(StateSnapshot::with_capacity(16 * 1024, 1024, 1024));
        let components: Vec<usize> = snapshot
            .slots
            .iter()
            .map(|slot| slot.component.len())
            .collect();
        assert_eq!(components.iter().filter(|&&len| len > 0).count(), 3);
        assert_eq!(components[2], 0);
        assert!(!snapshot.overflowed());
    }

    #[test]
    fn test_fetch_state_reports_component_size() {
        let (mut ctl, _readers) = controller();
        swap_in(&mut ctl, LedgerLayer::default());
        ctl.swap_instance(InstanceSwap { idx: idx(1), instance: instance("rom") });

        let small = ctl.fetch_state(StateSnapshot::with_capacity(16 * 1024, 1024, 4));
        let needed = small.slot(idx(1)).component_size;
        assert!(small.overflowed());
        assert!(small.slot(idx(1)).component.is_empty());
        assert!(needed > 4);

        let sized = ctl.fetch_state(StateSnapshot::with_capacity(16 * 1024, 1024, needed));
        assert!(!sized.overflowed());
        assert_eq!(sized.slot(idx(1)).component.len(), needed);
    }

    #[test]
    fn test_set_rom_with_reset() {
        let (mut ctl, _readers) = controller();
        ctl.swap_instance(InstanceSwap { idx: idx(0), instance: instance("old") });
        ctl.reset_instance(ResetRequest { idx: idx(0), model: Model::Agb });

        let displaced = ctl.set_rom(SetDataRequest {
            idx: idx(0),
            buffer: b"new".to_vec(),
            reset: true,
        });
        assert_eq!(displaced, b"old".to_vec());

        let core = ctl.context().get_instance(idx(0)).unwrap().core();
        assert_eq!(core.rom_name(), "new");
        assert_eq!(core.settings().model, Model::Agb);
    }

    #[test]
    fn test_transport_advances_while_playing() {
        let (mut ctl, _readers) = controller();
        ctl.set_time_info(TimeInfo {
            tempo: 120.0,
            playing: true,
            ..Default::default()
        });

        let mut out = vec![0.0f32; 44_100 * 2];
        ctl.process(&mut out, 2);

        assert_eq!(ctl.time_info().sample_pos, 44_100.0);
        assert!((ctl.time_info().ppq_pos - 2.0).abs() < 1e-9);
    }
}
