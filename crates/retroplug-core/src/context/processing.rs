//! Processing context: instance slots and render buffers
//!
//! Single-writer owner of every instance slot. All mutation happens from call
//! handlers running on the audio node's drain, and rendering happens from the
//! same thread right after. Everything the render path touches is allocated
//! in [`ProcessingContext::new`].

use std::sync::Arc;

use super::instance::{CoreSettings, Instance, RenderTarget, StereoSample};
use super::render::{
    audio_ring, video_ring, AudioReader, AudioWriter, RenderConfig, RenderCounters, VideoReader,
    VideoWriter,
};
use super::settings::{AudioChannelRouting, ProjectSettings};
use super::state::{fill_within_capacity, StateSnapshot};
use crate::types::{ButtonStream, InstanceIndex, Model, MAX_INSTANCES, VIDEO_FRAME_SIZE};

// ─────────────────────────────────────────────────────────────────────────────
// Slots
// ─────────────────────────────────────────────────────────────────────────────

struct Slot {
    instance: Option<Instance>,
    video: VideoWriter,
    audio: AudioWriter,
    /// Frame scratch the core renders into before publishing
    video_scratch: Vec<u8>,
    audio_scratch: Vec<StereoSample>,
}

/// Consumer ends of one slot's render rings
pub struct SlotReaders {
    pub video: VideoReader,
    pub audio: AudioReader,
    pub counters: Arc<RenderCounters>,
}

/// Consumer ends of every slot's render rings, indexed by slot
pub struct RenderReaders {
    slots: Vec<SlotReaders>,
}

impl RenderReaders {
    pub fn slot(&mut self, idx: InstanceIndex) -> &mut SlotReaders {
        &mut self.slots[idx.get()]
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (InstanceIndex, &mut SlotReaders)> {
        InstanceIndex::ALL.into_iter().zip(self.slots.iter_mut())
    }

    /// Split into per-slot readers
    pub fn into_slots(self) -> Vec<SlotReaders> {
        self.slots
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Context
// ─────────────────────────────────────────────────────────────────────────────

/// Owner of the instance slot table, the render rings and project settings
pub struct ProcessingContext {
    slots: [Slot; MAX_INSTANCES],
    active: Option<InstanceIndex>,
    settings: ProjectSettings,
    config: RenderConfig,
}

impl ProcessingContext {
    /// Create an empty context, reserving every render buffer up front
    ///
    /// Returns the consumer ends of the render rings for the cooperative
    /// side (UI for video, host or recorder for audio).
    pub fn new(config: RenderConfig, settings: ProjectSettings) -> (Self, RenderReaders) {
        let block = config.max_block_frames.max(1);
        let mut readers = Vec::with_capacity(MAX_INSTANCES);

        let slots = std::array::from_fn(|_| {
            let counters = Arc::new(RenderCounters::default());
            let (video, video_reader) = video_ring(config.video_ring_frames, counters.clone());
            let (audio, audio_reader) = audio_ring(config.audio_ring_frames, counters.clone());
            readers.push(SlotReaders {
                video: video_reader,
                audio: audio_reader,
                counters,
            });
            Slot {
                instance: None,
                video,
                audio,
                video_scratch: vec![0; VIDEO_FRAME_SIZE],
                audio_scratch: vec![StereoSample::SILENCE; block],
            }
        });

        log::debug!(
            "Processing context reserved {} bytes of video scratch and {} video ring frames per slot",
            VIDEO_FRAME_SIZE * MAX_INSTANCES,
            config.video_ring_frames
        );

        let context = Self {
            slots,
            active: None,
            settings,
            config: RenderConfig {
                max_block_frames: block,
                ..config
            },
        };
        (context, RenderReaders { slots: readers })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Ownership transfer
    // ─────────────────────────────────────────────────────────────────────

    /// Replace the instance in a slot, returning the previous one
    pub fn swap_instance(&mut self, idx: InstanceIndex, instance: Instance) -> Option<Instance> {
        self.slots[idx.get()].instance.replace(instance)
    }

    /// Place a fresh instance at `target`, cloned from the one at `source`
    ///
    /// Settings and a state snapshot are copied from the source through
    /// `scratch`; an empty source leaves the fresh instance as it is. Returns
    /// whatever previously occupied the target.
    pub fn duplicate_instance(
        &mut self,
        source: InstanceIndex,
        target: InstanceIndex,
        mut instance: Instance,
        scratch: &mut [u8],
    ) -> Option<Instance> {
        if let Some(src) = self.slots[source.get()].instance.as_ref() {
            let core = instance.core_mut();
            core.set_settings(src.core().settings());
            if let Some(len) = src.core().save_state(scratch) {
                core.load_state(&scratch[..len]);
            }
        }
        self.swap_instance(target, instance)
    }

    /// Detach and return the instance in a slot, leaving it empty
    pub fn remove_instance(&mut self, idx: InstanceIndex) -> Option<Instance> {
        let removed = self.slots[idx.get()].instance.take();
        if removed.is_some() && self.active == Some(idx) {
            self.active = None;
        }
        removed
    }

    // ─────────────────────────────────────────────────────────────────────
    // In-place operations
    // ─────────────────────────────────────────────────────────────────────

    /// Borrow the instance in a slot for the duration of the current call
    pub fn get_instance(&self, idx: InstanceIndex) -> Option<&Instance> {
        self.slots[idx.get()].instance.as_ref()
    }

    pub fn get_instance_mut(&mut self, idx: InstanceIndex) -> Option<&mut Instance> {
        self.slots[idx.get()].instance.as_mut()
    }

    pub fn is_populated(&self, idx: InstanceIndex) -> bool {
        self.slots[idx.get()].instance.is_some()
    }

    /// Populated slot indices in order
    pub fn populated(&self) -> impl Iterator<Item = InstanceIndex> + '_ {
        InstanceIndex::ALL
            .into_iter()
            .filter(|idx| self.is_populated(*idx))
    }

    pub fn instance_count(&self) -> usize {
        self.populated().count()
    }

    /// Reinitialise the instance in a slot with a hardware model
    pub fn reset_instance(&mut self, idx: InstanceIndex, model: Model) -> bool {
        match self.get_instance_mut(idx) {
            Some(instance) => {
                instance.core_mut().reset(model, false);
                true
            }
            None => false,
        }
    }

    /// Install a ROM image, handing back the displaced image
    ///
    /// An empty slot hands `rom` itself back untouched.
    pub fn load_rom(&mut self, idx: InstanceIndex, rom: Vec<u8>, reset: bool) -> Vec<u8> {
        let Some(instance) = self.get_instance_mut(idx) else {
            return rom;
        };
        let core = instance.core_mut();
        let previous = core.set_rom_data(rom);
        if reset {
            let model = core.settings().model;
            core.reset(model, true);
        }
        previous
    }

    /// Install battery-backed save RAM, handing the buffer back
    pub fn load_battery(&mut self, idx: InstanceIndex, data: Vec<u8>, reset: bool) -> Vec<u8> {
        if let Some(instance) = self.get_instance_mut(idx) {
            instance.core_mut().load_battery(&data, reset);
        }
        data
    }

    /// Deliver a batch of button events in order
    pub fn press_buttons(&mut self, stream: &ButtonStream) -> bool {
        match self.get_instance_mut(stream.idx) {
            Some(instance) => {
                instance.core_mut().press_buttons(stream.presses());
                true
            }
            None => false,
        }
    }

    /// Replace per-core settings in place
    pub fn update_instance_settings(&mut self, idx: InstanceIndex, settings: CoreSettings) -> bool {
        match self.get_instance_mut(idx) {
            Some(instance) => {
                instance.core_mut().set_settings(settings);
                true
            }
            None => false,
        }
    }

    /// Select the instance receiving focus-dependent input
    ///
    /// Ignored for empty slots.
    pub fn set_active(&mut self, idx: InstanceIndex) -> bool {
        if !self.is_populated(idx) {
            return false;
        }
        self.active = Some(idx);
        true
    }

    pub fn active(&self) -> Option<InstanceIndex> {
        self.active
    }

    pub fn settings(&self) -> &ProjectSettings {
        &self.settings
    }

    /// Replace project settings; effective from the next render step
    pub fn set_settings(&mut self, settings: ProjectSettings) {
        self.settings = settings;
    }

    pub fn render_config(&self) -> &RenderConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────
    // State export
    // ─────────────────────────────────────────────────────────────────────

    /// Fill the save RAM and state buffers of every populated slot
    ///
    /// Unpopulated slots are cleared. Scripting-layer components are filled
    /// by the caller. Buffers are only filled within their capacity.
    pub fn fetch_state(&self, snapshot: &mut StateSnapshot) {
        for idx in InstanceIndex::ALL {
            let out = snapshot.slot_mut(idx);
            out.clear();
            let Some(instance) = self.get_instance(idx) else {
                continue;
            };

            let core = instance.core();
            out.populated = true;
            out.model = core.settings().model;
            out.sram_size = core.battery_size();
            out.state_size = core.state_size();
            let sram_ok = fill_within_capacity(&mut out.sram, |buf| core.save_battery(buf));
            let state_ok = fill_within_capacity(&mut out.state, |buf| core.save_state(buf));
            out.overflowed = !(sram_ok && state_ok);
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Render
    // ─────────────────────────────────────────────────────────────────────

    /// Render every populated slot into an interleaved host buffer
    ///
    /// Frames and samples are also published to the slot rings. Host blocks
    /// larger than `max_block_frames` are rendered in several steps.
    pub fn process(&mut self, out: &mut [f32], channels: usize) {
        out.fill(0.0);
        if channels == 0 {
            return;
        }

        let total = out.len() / channels;
        let routing = self.settings.audio_routing;
        let mut offset = 0;

        while offset < total {
            let frames = (total - offset).min(self.config.max_block_frames);

            for (slot_idx, slot) in self.slots.iter_mut().enumerate() {
                let Some(instance) = slot.instance.as_mut() else {
                    continue;
                };

                let audio = &mut slot.audio_scratch[..frames];
                audio.fill(StereoSample::SILENCE);
                let frame_ready = instance.core_mut().render(RenderTarget {
                    audio,
                    video: &mut slot.video_scratch,
                });
                if frame_ready {
                    slot.video.write_frame(&slot.video_scratch);
                }

                let rendered = &slot.audio_scratch[..frames];
                slot.audio.push_block(rendered);
                mix_into(out, channels, offset, rendered, routing, slot_idx);
            }

            offset += frames;
        }
    }
}

/// Add one slot's block to the host buffer according to the routing
fn mix_into(
    out: &mut [f32],
    channels: usize,
    offset: usize,
    samples: &[StereoSample],
    routing: AudioChannelRouting,
    slot: usize,
) {
    let (left, right) = match routing {
        AudioChannelRouting::StereoMixDown => (0, 1),
        AudioChannelRouting::TwoChannelsPerInstance => (slot * 2, slot * 2 + 1),
    };
    if left >= channels {
        return;
    }

    for (i, sample) in samples.iter().enumerate() {
        let frame = &mut out[(offset + i) * channels..(offset + i + 1) * channels];
        if right < channels {
            frame[left] += sample.left;
            frame[right] += sample.right;
        } else {
            // Mono host: fold the pair
            frame[left] += (sample.left + sample.right) * 0.5;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::instance::InstanceId;
    use crate::demo::DemoCore;
    use crate::types::{Button, ButtonEvent};

    fn idx(i: usize) -> InstanceIndex {
        InstanceIndex::new(i).unwrap()
    }

    fn instance(name: &str) -> Instance {
        Instance::new(Box::new(DemoCore::new(name)))
    }

    fn context() -> (ProcessingContext, RenderReaders) {
        ProcessingContext::new(RenderConfig::default(), ProjectSettings::default())
    }

    #[test]
    fn test_swap_round_trip() {
        let (mut ctx, _readers) = context();
        let a = instance("a");
        let b = instance("b");
        let (a_id, b_id) = (a.id(), b.id());

        assert!(ctx.swap_instance(idx(0), a).is_none());
        let previous = ctx.swap_instance(idx(0), b).unwrap();

        assert_eq!(previous.id(), a_id);
        assert_eq!(ctx.get_instance(idx(0)).map(Instance::id), Some(b_id));
    }

    #[test]
    fn test_remove_is_idempotent_on_empty() {
        let (mut ctx, _readers) = context();
        assert!(ctx.remove_instance(idx(2)).is_none());
        assert!(!ctx.is_populated(idx(2)));

        ctx.swap_instance(idx(2), instance("x"));
        ctx.set_active(idx(2));
        assert!(ctx.remove_instance(idx(2)).is_some());
        assert!(ctx.remove_instance(idx(2)).is_none());
        assert_eq!(ctx.active(), None);
    }

    #[test]
    fn test_duplicate_copies_settings_and_state() {
        let (mut ctx, _readers) = context();
        let mut source = instance("src");
        source.core_mut().set_settings(CoreSettings {
            model: Model::Cgb,
            color_correction: true,
            high_pass_filter: false,
        });
        source.core_mut().press_buttons(&[ButtonEvent::press(Button::Start)]);
        ctx.swap_instance(idx(0), source);
        let previous_target = instance("old");
        let old_id = previous_target.id();
        ctx.swap_instance(idx(1), previous_target);

        let mut scratch = vec![0u8; 1024];
        let returned = ctx
            .duplicate_instance(idx(0), idx(1), instance("src"), &mut scratch)
            .unwrap();
        assert_eq!(returned.id(), old_id);

        let source_core = ctx.get_instance(idx(0)).unwrap().core();
        let copy_core = ctx.get_instance(idx(1)).unwrap().core();
        assert_eq!(copy_core.settings(), source_core.settings());

        let mut a = vec![0u8; 1024];
        let mut b = vec![0u8; 1024];
        let la = source_core.save_state(&mut a).unwrap();
        let lb = copy_core.save_state(&mut b).unwrap();
        assert_eq!(a[..la], b[..lb]);
    }

    #[test]
    fn test_empty_slot_operations_are_noops() {
        let (mut ctx, _readers) = context();
        let rom = vec![1, 2, 3];
        assert_eq!(ctx.load_rom(idx(3), rom.clone(), true), rom);
        assert_eq!(ctx.load_battery(idx(3), vec![9], false), vec![9]);
        assert!(!ctx.reset_instance(idx(3), Model::Dmg));
        assert!(!ctx.press_buttons(&ButtonStream::new(idx(3))));
        assert!(!ctx.set_active(idx(3)));
        assert!(!ctx.update_instance_settings(idx(3), CoreSettings::default()));
    }

    #[test]
    fn test_load_rom_returns_displaced_image() {
        let (mut ctx, _readers) = context();
        ctx.swap_instance(idx(0), instance("first"));

        let displaced = ctx.load_rom(idx(0), b"second".to_vec(), true);
        assert_eq!(displaced, b"first".to_vec());
        assert_eq!(ctx.get_instance(idx(0)).unwrap().core().rom_name(), "second");
    }

    #[test]
    fn test_fetch_state_three_of_four() {
        let (mut ctx, _readers) = context();
        for i in [0, 1, 3] {
            ctx.swap_instance(idx(i), instance(&format!("rom{}", i)));
        }

        let mut snapshot = StateSnapshot::with_capacity(64 * 1024, 64 * 1024, 0);
        ctx.fetch_state(&mut snapshot);

        assert_eq!(snapshot.populated().count(), 3);
        assert!(!snapshot.slot(idx(2)).populated);
        assert!(snapshot.slot(idx(2)).sram.is_empty());
        for (_, slot) in snapshot.populated() {
            assert!(!slot.sram.is_empty());
            assert!(!slot.state.is_empty());
            assert!(!slot.overflowed);
        }
    }

    #[test]
    fn test_fetch_state_reports_small_buffers() {
        let (mut ctx, _readers) = context();
        ctx.swap_instance(idx(0), instance("rom"));

        let mut snapshot = StateSnapshot::with_capacity(1, 1, 0);
        ctx.fetch_state(&mut snapshot);

        let slot = snapshot.slot(idx(0));
        assert!(slot.overflowed);
        assert!(slot.sram.is_empty());
        assert!(slot.sram_size > 1);
        assert!(snapshot.overflowed());
    }

    #[test]
    fn test_process_routes_per_instance() {
        let (mut ctx, mut readers) = context();
        ctx.swap_instance(idx(1), instance("tone"));
        ctx.set_settings(ProjectSettings {
            audio_routing: AudioChannelRouting::TwoChannelsPerInstance,
            ..Default::default()
        });

        let channels = 4;
        let mut out = vec![0.0f32; 64 * channels];
        ctx.process(&mut out, channels);

        // Slot 1 lands on channels 2/3 only
        assert!(out.chunks(channels).all(|f| f[0] == 0.0 && f[1] == 0.0));
        assert!(out.chunks(channels).any(|f| f[2] != 0.0));

        let reader = readers.slot(idx(1));
        assert_eq!(reader.audio.available(), 64);
        assert_eq!(readers.slot(idx(0)).audio.available(), 0);
    }

    #[test]
    fn test_process_splits_large_blocks() {
        let config = RenderConfig {
            max_block_frames: 16,
            ..Default::default()
        };
        let (mut ctx, mut readers) = ProcessingContext::new(config, ProjectSettings::default());
        ctx.swap_instance(idx(0), instance("tone"));

        let mut out = vec![0.0f32; 100 * 2];
        ctx.process(&mut out, 2);

        assert_eq!(readers.slot(idx(0)).audio.available(), 100);
    }

    #[test]
    fn test_process_publishes_video_frames() {
        let (mut ctx, mut readers) = context();
        ctx.swap_instance(idx(0), instance("video"));

        // Enough frames for several completed video frames
        let mut out = vec![0.0f32; 4096 * 2];
        for _ in 0..8 {
            ctx.process(&mut out, 2);
        }

        let reader = readers.slot(idx(0));
        let available = reader.video.available();
        assert!(available >= 1);

        let mut frame = vec![0u8; VIDEO_FRAME_SIZE];
        assert_eq!(reader.video.read_latest(&mut frame), Some(available - 1));
        assert_eq!(reader.video.available(), 0);
    }

    #[test]
    fn test_ids_identify_instances() {
        let a = instance("a");
        let id: InstanceId = a.id();
        assert_eq!(format!("{}", id), format!("#{}", id.get()));
    }
}
