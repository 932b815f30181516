//! Emulated instances and the core contract they wrap

use std::sync::atomic::{AtomicU64, Ordering};

use basedrop::Owned;
use serde::{Deserialize, Serialize};

use crate::gc::gc_handle;
use crate::types::{ButtonEvent, Model};

/// A stereo audio sample pair
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StereoSample {
    pub left: f32,
    pub right: f32,
}

impl StereoSample {
    pub const SILENCE: Self = Self { left: 0.0, right: 0.0 };

    pub fn new(left: f32, right: f32) -> Self {
        Self { left, right }
    }
}

/// Per-core options that can be changed without recreating the instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreSettings {
    pub model: Model,
    /// "Color Correction" in the instance menu
    pub color_correction: bool,
    /// "High-pass Filter" in the instance menu
    pub high_pass_filter: bool,
}

/// Output slices for one render step
pub struct RenderTarget<'a> {
    /// One stereo sample per frame of the host block
    pub audio: &'a mut [StereoSample],
    /// Scratch for a completed video frame (RGBA, `VIDEO_FRAME_SIZE` bytes)
    pub video: &'a mut [u8],
}

impl RenderTarget<'_> {
    /// Number of audio frames to render
    pub fn frames(&self) -> usize {
        self.audio.len()
    }
}

/// The operation surface of an emulation core
///
/// Cores know nothing about threads: they are driven synchronously from the
/// real-time thread's drain and render step. None of these methods may
/// allocate, except where the buffer is handed over by value.
pub trait EmulatorCore: Send {
    /// Reinitialise with a hardware model; `fast` skips the boot animation
    fn reset(&mut self, model: Model, fast: bool);

    /// Replace the loaded ROM, handing back the displaced image
    fn set_rom_data(&mut self, rom: Vec<u8>) -> Vec<u8>;

    /// Title from the ROM header, empty if none is loaded
    fn rom_name(&self) -> &str;

    /// Install battery-backed save RAM, optionally resetting afterwards
    fn load_battery(&mut self, data: &[u8], reset: bool);

    /// Size of the battery-backed save RAM
    fn battery_size(&self) -> usize;

    /// Copy save RAM into `out`, returning the bytes written
    ///
    /// Returns `None` if `out` is too small.
    fn save_battery(&self, out: &mut [u8]) -> Option<usize>;

    /// Size of a full state snapshot
    fn state_size(&self) -> usize;

    /// Write a full state snapshot into `out`, returning the bytes written
    ///
    /// Returns `None` if `out` is too small.
    fn save_state(&self, out: &mut [u8]) -> Option<usize>;

    /// Restore a snapshot produced by `save_state`
    fn load_state(&mut self, data: &[u8]) -> bool;

    /// Apply button transitions in order
    fn press_buttons(&mut self, events: &[ButtonEvent]);

    /// Render one block, returning true if a video frame was completed
    fn render(&mut self, target: RenderTarget<'_>) -> bool;

    fn settings(&self) -> CoreSettings;

    fn set_settings(&mut self, settings: CoreSettings);
}

/// Process-unique identity of an instance
///
/// Survives moves across the bus, so callers can check that a swap handed
/// back exactly the object they expect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(u64);

impl InstanceId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An exclusively owned emulated instance
///
/// Moves between threads only by value through the bus. The core lives in a
/// `basedrop::Owned`, so dropping an instance anywhere, including the
/// real-time thread, defers the deallocation to the collector thread.
pub struct Instance {
    id: InstanceId,
    core: Owned<Box<dyn EmulatorCore>>,
}

impl Instance {
    /// Wrap a core; allocate on a cooperative thread
    pub fn new(core: Box<dyn EmulatorCore>) -> Self {
        Self {
            id: InstanceId::next(),
            core: Owned::new(&gc_handle(), core),
        }
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn core(&self) -> &dyn EmulatorCore {
        &**self.core
    }

    pub fn core_mut(&mut self) -> &mut dyn EmulatorCore {
        &mut **self.core
    }
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.id)
            .field("rom", &self.core.rom_name())
            .field("settings", &self.core.settings())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demo::DemoCore;

    #[test]
    fn test_instance_ids_are_unique() {
        let a = Instance::new(Box::new(DemoCore::new("a")));
        let b = Instance::new(Box::new(DemoCore::new("b")));
        assert_ne!(a.id(), b.id());
        assert_eq!(a.core().rom_name(), "a");
    }

    #[test]
    fn test_core_settings_default() {
        let settings = CoreSettings::default();
        assert_eq!(settings.model, Model::Auto);
        assert!(!settings.color_correction);
        assert!(!settings.high_pass_filter);
    }
}
