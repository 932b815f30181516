//! UI-side surface over the audio node
//!
//! [`AudioContextProxy`] owns the UI node, the resolved routes to the audio
//! node and a [`UiMirror`] rebuilt from slot notifications. It is the only
//! way the UI touches the processing context.
//!
//! Blocking calls (`swap_instance`, `take_instance`, `fetch_state`, ...)
//! suspend the calling thread until the next audio drain. Fire-and-forget
//! calls return at once; when the audio queue is full the request is handed
//! back, counted and logged.

use super::calls::{
    ContextMenuResult, DuplicateInstance, FetchState, InstanceDuplicate, InstanceSettingsUpdate,
    InstanceSwap, LayerSwap, LayerSwapped, PressButtons, ResetInstance, ResetRequest, SetActive,
    SetDataRequest, SetRom, SetSram, SlotChanged, SlotEvent, SwapInstance, SwapLayer, TakeInstance,
    UpdateInstanceSettings, UpdateSettings,
};
use crate::bus::{BusResult, Call, CallError, ChannelStats, Node, NodeType, Rejected, Route};
use crate::context::{
    CoreSettings, EmulatorCore, Instance, InstanceId, ProjectSettings, RenderConfig, StateSnapshot,
};
use crate::script::{own_layer, ScriptLayer};
use crate::types::{ButtonStream, InstanceIndex, Model, MAX_INSTANCES};

/// Component bytes reserved per slot for a state fetch
const COMPONENT_BUFFER_BYTES: usize = 16 * 1024;

/// Layer bookkeeping bytes reserved for a hot-swap
const LAYER_BUFFER_BYTES: usize = 64 * 1024;

// ─────────────────────────────────────────────────────────────────────────────
// Mirror
// ─────────────────────────────────────────────────────────────────────────────

/// What the UI knows about one slot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MirrorSlot {
    pub id: Option<InstanceId>,
    pub settings: CoreSettings,
}

impl MirrorSlot {
    pub fn is_populated(&self) -> bool {
        self.id.is_some()
    }
}

/// UI-side cache of slot state, written only from the UI node's drain
#[derive(Debug, Clone, Default)]
pub struct UiMirror {
    slots: [MirrorSlot; MAX_INSTANCES],
    active: Option<InstanceIndex>,
    settings: ProjectSettings,
    events: u64,
}

impl UiMirror {
    /// Bind the UI-side handlers on the node
    pub fn register(node: &mut Node<UiMirror>) -> BusResult<()> {
        node.on::<SlotChanged, _>(|mirror: &mut UiMirror, event| mirror.apply(event))
    }

    /// Fold one notification into the cache
    pub fn apply(&mut self, event: SlotEvent) {
        self.events += 1;
        match event {
            SlotEvent::Added { idx, id, settings } => {
                self.slots[idx.get()] = MirrorSlot { id: Some(id), settings };
            }
            SlotEvent::Removed { idx } => {
                self.slots[idx.get()] = MirrorSlot::default();
                if self.active == Some(idx) {
                    self.active = None;
                }
            }
            SlotEvent::Reset { idx, model } => {
                self.slots[idx.get()].settings.model = model;
            }
            SlotEvent::SettingsChanged { idx, settings } => {
                self.slots[idx.get()].settings = settings;
            }
            SlotEvent::Activated { idx } => {
                self.active = Some(idx);
            }
            SlotEvent::ProjectChanged { settings } => {
                self.settings = settings;
            }
        }
    }

    pub fn slot(&self, idx: InstanceIndex) -> &MirrorSlot {
        &self.slots[idx.get()]
    }

    /// Populated slots in order
    pub fn populated(&self) -> impl Iterator<Item = InstanceIndex> + '_ {
        InstanceIndex::ALL
            .into_iter()
            .filter(|idx| self.slot(*idx).is_populated())
    }

    /// First empty slot, if any
    pub fn first_free(&self) -> Option<InstanceIndex> {
        InstanceIndex::ALL
            .into_iter()
            .find(|idx| !self.slot(*idx).is_populated())
    }

    pub fn active(&self) -> Option<InstanceIndex> {
        self.active
    }

    /// Project settings the audio node last reported applying
    pub fn settings(&self) -> &ProjectSettings {
        &self.settings
    }

    /// Notifications applied so far
    pub fn events(&self) -> u64 {
        self.events
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Proxy
// ─────────────────────────────────────────────────────────────────────────────

/// Routes from the UI node to every audio-side call
struct AudioRoutes {
    swap_instance: Route<SwapInstance>,
    duplicate_instance: Route<DuplicateInstance>,
    reset_instance: Route<ResetInstance>,
    take_instance: Route<TakeInstance>,
    set_active: Route<SetActive>,
    update_settings: Route<UpdateSettings>,
    fetch_state: Route<FetchState>,
    set_sram: Route<SetSram>,
    set_rom: Route<SetRom>,
    press_buttons: Route<PressButtons>,
    context_menu_result: Route<ContextMenuResult>,
    swap_layer: Route<SwapLayer>,
    update_instance_settings: Route<UpdateInstanceSettings>,
}

impl AudioRoutes {
    fn resolve(node: &Node<UiMirror>) -> BusResult<Self> {
        let sender = node.sender();
        let audio = NodeType::Audio;
        Ok(Self {
            swap_instance: sender.route(audio)?,
            duplicate_instance: sender.route(audio)?,
            reset_instance: sender.route(audio)?,
            take_instance: sender.route(audio)?,
            set_active: sender.route(audio)?,
            update_settings: sender.route(audio)?,
            fetch_state: sender.route(audio)?,
            set_sram: sender.route(audio)?,
            set_rom: sender.route(audio)?,
            press_buttons: sender.route(audio)?,
            context_menu_result: sender.route(audio)?,
            swap_layer: sender.route(audio)?,
            update_instance_settings: sender.route(audio)?,
        })
    }
}

/// Typed call surface the UI thread uses to drive the audio node
pub struct AudioContextProxy {
    node: Node<UiMirror>,
    mirror: UiMirror,
    routes: AudioRoutes,
    render: RenderConfig,
    dropped: u64,
}

impl AudioContextProxy {
    /// Wrap the UI node; the bus must already be started
    pub fn new(node: Node<UiMirror>, render: RenderConfig) -> BusResult<Self> {
        let routes = AudioRoutes::resolve(&node)?;
        Ok(Self {
            node,
            mirror: UiMirror::default(),
            routes,
            render,
            dropped: 0,
        })
    }

    /// Drain notifications from the audio node into the mirror
    ///
    /// Call once per UI frame. Returns the number of notifications applied.
    pub fn update(&mut self) -> usize {
        self.node.drain_all(&mut self.mirror)
    }

    pub fn mirror(&self) -> &UiMirror {
        &self.mirror
    }

    /// Fire-and-forget requests rejected because the audio queue was full or
    /// the audio node was gone
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Requests rejected on the UI node's own queues
    pub fn notifications_dropped(&self) -> u64 {
        self.node.total_rejected()
    }

    /// Counters of every audio-bound route
    pub fn route_stats(&self) -> Vec<ChannelStats> {
        fn stats<C: Call>(route: &Route<C>) -> ChannelStats {
            ChannelStats {
                call: C::NAME,
                capacity: route.capacity(),
                pending: route.pending(),
                accepted: route.accepted(),
                rejected: route.rejected(),
            }
        }
        let r = &self.routes;
        vec![
            stats(&r.swap_layer),
            stats(&r.swap_instance),
            stats(&r.duplicate_instance),
            stats(&r.reset_instance),
            stats(&r.take_instance),
            stats(&r.set_active),
            stats(&r.update_settings),
            stats(&r.fetch_state),
            stats(&r.set_sram),
            stats(&r.set_rom),
            stats(&r.press_buttons),
            stats(&r.context_menu_result),
            stats(&r.update_instance_settings),
        ]
    }

    fn fire<C>(
        route: &Route<C>,
        dropped: &mut u64,
        request: C::Request,
    ) -> Result<(), Rejected<C::Request>>
    where
        C: Call<Response = ()>,
    {
        route.send(request).map_err(|rejected| {
            *dropped += 1;
            if route.is_closed() {
                log::warn!("{} rejected: audio node is gone", C::NAME);
            } else {
                log::warn!(
                    "{} rejected: audio queue full ({} of {} pending, {} dropped so far)",
                    C::NAME,
                    route.pending(),
                    route.capacity(),
                    route.rejected()
                );
            }
            rejected
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Ownership transfer (blocking)
    // ─────────────────────────────────────────────────────────────────────

    /// Place an instance in a slot, returning the previous occupant
    pub fn swap_instance(
        &self,
        idx: InstanceIndex,
        instance: Instance,
    ) -> Result<Option<Instance>, CallError<InstanceSwap>> {
        self.routes
            .swap_instance
            .call(InstanceSwap { idx, instance })
    }

    /// Wrap a core in a new instance and place it in a slot
    pub fn load_instance(
        &self,
        idx: InstanceIndex,
        core: Box<dyn EmulatorCore>,
    ) -> Result<Option<Instance>, CallError<InstanceSwap>> {
        self.swap_instance(idx, Instance::new(core))
    }

    /// Clone the instance at `source` into `instance` and place it at `target`
    pub fn duplicate_instance(
        &self,
        source: InstanceIndex,
        target: InstanceIndex,
        instance: Instance,
    ) -> Result<Option<Instance>, CallError<InstanceDuplicate>> {
        let request = InstanceDuplicate {
            source,
            target,
            instance,
            scratch: vec![0; self.render.state_buffer_bytes],
        };
        self.routes
            .duplicate_instance
            .call(request)
            .map(|duplicated| duplicated.previous)
    }

    /// Detach the instance in a slot
    pub fn take_instance(
        &self,
        idx: InstanceIndex,
    ) -> Result<Option<Instance>, CallError<InstanceIndex>> {
        self.routes.take_instance.call(idx)
    }

    /// Hot-swap the scripting layer, returning the previous one
    pub fn swap_layer<L: ScriptLayer + 'static>(
        &self,
        layer: L,
    ) -> Result<LayerSwapped, CallError<LayerSwap>> {
        let name = layer.name().to_string();
        let swapped = self.routes.swap_layer.call(LayerSwap {
            layer: own_layer(layer),
            scratch: vec![0; LAYER_BUFFER_BYTES],
        })?;

        match &swapped.error {
            Some(err) => log::warn!("Layer {} swapped in without bookkeeping: {}", name, err),
            None => log::info!(
                "Layer {} swapped in ({} bytes of bookkeeping carried)",
                name,
                swapped.carried
            ),
        }
        Ok(swapped)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Data (blocking, buffers handed back)
    // ─────────────────────────────────────────────────────────────────────

    /// Install save RAM; the buffer comes back once installed
    pub fn set_sram(
        &self,
        idx: InstanceIndex,
        buffer: Vec<u8>,
        reset: bool,
    ) -> Result<Vec<u8>, CallError<SetDataRequest>> {
        self.routes
            .set_sram
            .call(SetDataRequest { idx, buffer, reset })
    }

    /// Install a ROM image; the displaced image comes back
    pub fn set_rom(
        &self,
        idx: InstanceIndex,
        buffer: Vec<u8>,
        reset: bool,
    ) -> Result<Vec<u8>, CallError<SetDataRequest>> {
        self.routes
            .set_rom
            .call(SetDataRequest { idx, buffer, reset })
    }

    /// Snapshot every populated slot
    ///
    /// Buffers are sized from the render config first; if any slot did not
    /// fit, the fetch is repeated once with the sizes the cores and the
    /// scripting layer reported. A slot that still overflows (its state grew
    /// between the two fetches) comes back flagged.
    pub fn fetch_state(&self) -> Result<StateSnapshot, CallError<StateSnapshot>> {
        let size = self.render.state_buffer_bytes;
        let snapshot = self.routes.fetch_state.call(StateSnapshot::with_capacity(
            size,
            size,
            COMPONENT_BUFFER_BYTES,
        ))?;
        if !snapshot.overflowed() {
            return Ok(snapshot);
        }

        let (sram, state, component) = snapshot.slots.iter().fold(
            (size, size, COMPONENT_BUFFER_BYTES),
            |(sram, state, component), slot| {
                (
                    sram.max(slot.sram_size),
                    state.max(slot.state_size),
                    component.max(slot.component_size),
                )
            },
        );
        log::debug!(
            "fetch_state: retrying with {} byte save RAM, {} byte state and {} byte component buffers",
            sram,
            state,
            component
        );
        let snapshot = self
            .routes
            .fetch_state
            .call(StateSnapshot::with_capacity(sram, state, component))?;
        if snapshot.overflowed() {
            log::warn!("fetch_state: some slots still did not fit after resizing");
        }
        Ok(snapshot)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Fire-and-forget
    // ─────────────────────────────────────────────────────────────────────

    pub fn reset_instance(
        &mut self,
        idx: InstanceIndex,
        model: Model,
    ) -> Result<(), Rejected<ResetRequest>> {
        Self::fire(
            &self.routes.reset_instance,
            &mut self.dropped,
            ResetRequest { idx, model },
        )
    }

    pub fn set_active(&mut self, idx: InstanceIndex) -> Result<(), Rejected<InstanceIndex>> {
        Self::fire(&self.routes.set_active, &mut self.dropped, idx)
    }

    pub fn update_settings(
        &mut self,
        settings: ProjectSettings,
    ) -> Result<(), Rejected<ProjectSettings>> {
        Self::fire(&self.routes.update_settings, &mut self.dropped, settings)
    }

    pub fn press_buttons(&mut self, stream: ButtonStream) -> Result<(), Rejected<ButtonStream>> {
        Self::fire(&self.routes.press_buttons, &mut self.dropped, stream)
    }

    pub fn context_menu_result(&mut self, id: i32) -> Result<(), Rejected<i32>> {
        Self::fire(&self.routes.context_menu_result, &mut self.dropped, id)
    }

    pub fn update_instance_settings(
        &mut self,
        idx: InstanceIndex,
        settings: CoreSettings,
    ) -> Result<(), Rejected<InstanceSettingsUpdate>> {
        Self::fire(
            &self.routes.update_instance_settings,
            &mut self.dropped,
            InstanceSettingsUpdate { idx, settings },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idx(i: usize) -> InstanceIndex {
        InstanceIndex::new(i).unwrap()
    }

    #[test]
    fn test_mirror_follows_lifecycle() {
        let mut mirror = UiMirror::default();
        let instance = Instance::new(Box::new(crate::demo::DemoCore::new("x")));
        let id = instance.id();

        mirror.apply(SlotEvent::Added {
            idx: idx(1),
            id,
            settings: CoreSettings::default(),
        });
        mirror.apply(SlotEvent::Activated { idx: idx(1) });
        mirror.apply(SlotEvent::Reset { idx: idx(1), model: Model::Sgb });

        assert_eq!(mirror.slot(idx(1)).id, Some(id));
        assert_eq!(mirror.slot(idx(1)).settings.model, Model::Sgb);
        assert_eq!(mirror.active(), Some(idx(1)));
        assert_eq!(mirror.first_free(), Some(idx(0)));

        mirror.apply(SlotEvent::Removed { idx: idx(1) });
        assert_eq!(mirror.populated().count(), 0);
        assert_eq!(mirror.active(), None);
        assert_eq!(mirror.events(), 4);
    }

    #[test]
    fn test_mirror_settings_change_only_on_notification() {
        let mut mirror = UiMirror::default();
        let settings = ProjectSettings {
            zoom: 4.0,
            ..ProjectSettings::default()
        };
        assert_ne!(mirror.settings(), &settings);

        mirror.apply(SlotEvent::ProjectChanged { settings });
        assert_eq!(mirror.settings(), &settings);
    }
}
