//! Audio and UI endpoints over the message bus
//!
//! - [`calls`]: every call type and its queue capacity
//! - [`audio`]: handlers bound on the real-time node
//! - [`proxy`]: the UI-side call surface and slot mirror
//!
//! [`build_system`] wires both nodes and hands back the pieces each thread
//! owns.

pub mod audio;
pub mod calls;
pub mod proxy;

pub use audio::{AudioController, AudioProcessor};
pub use calls::{register_calls, CallCapacities, SlotEvent};
pub use proxy::{AudioContextProxy, MirrorSlot, UiMirror};

use crate::bus::{BusResult, MessageBus, NodeType};
use crate::config::SystemConfig;
use crate::context::{ProcessingContext, RenderReaders};
use calls::SlotChanged;

/// Everything a host needs once the system is built
///
/// The processor belongs to the real-time callback, the proxy to the UI
/// thread. The readers can live on either cooperative thread.
pub struct SystemResult {
    pub processor: AudioProcessor,
    pub proxy: AudioContextProxy,
    pub readers: RenderReaders,
}

/// Register calls, create both nodes, start the bus and bind the handlers
pub fn build_system(config: &SystemConfig) -> BusResult<SystemResult> {
    let bus = MessageBus::new();
    register_calls(&bus, &config.capacities)?;

    let mut audio_node = bus.create_node::<AudioController>(NodeType::Audio, &[NodeType::Ui])?;
    let mut ui_node = bus.create_node::<UiMirror>(NodeType::Ui, &[NodeType::Audio])?;
    AudioController::register(&mut audio_node)?;
    UiMirror::register(&mut ui_node)?;

    bus.start()?;

    let (context, readers) = ProcessingContext::new(config.render, config.project);
    let mut controller = AudioController::new(context, f64::from(config.sample_rate));
    controller.attach_ui(audio_node.sender().route::<SlotChanged>(NodeType::Ui)?);

    let proxy = AudioContextProxy::new(ui_node, config.render)?;
    let processor = AudioProcessor::new(audio_node, controller, config.output_channels);

    log::info!(
        "System built: {} Hz, {} output channels, {} frame blocks",
        config.sample_rate,
        config.output_channels,
        config.render.max_block_frames
    );

    Ok(SystemResult {
        processor,
        proxy,
        readers,
    })
}
