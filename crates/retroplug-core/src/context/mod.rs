//! Processing context and the types it owns
//!
//! The [`ProcessingContext`] is the single-writer owner of every instance
//! slot and render buffer. It is driven exclusively from handlers running on
//! the audio node's drain; nothing here knows about threads or the bus.

pub mod instance;
pub mod processing;
pub mod render;
pub mod settings;
pub mod state;

pub use instance::{CoreSettings, EmulatorCore, Instance, InstanceId, RenderTarget, StereoSample};
pub use processing::{ProcessingContext, RenderReaders, SlotReaders};
pub use render::{
    AudioReader, AudioWriter, RenderConfig, RenderCounters, VideoReader, VideoWriter,
};
pub use settings::{
    AudioChannelRouting, InstanceLayout, MidiChannelRouting, ProjectSettings, SaveStateType,
};
pub use state::{SlotSnapshot, StateSnapshot};
