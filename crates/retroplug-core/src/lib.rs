//! RetroPlug Core - cross-thread messaging and instance ownership
//!
//! The plugin runs emulated handhelds inside the host's real-time audio
//! callback. The UI never touches that state directly: it sends typed calls
//! over the [`bus`], the audio node drains them between blocks, and
//! ownership of instances, ROM images and snapshot buffers travels with the
//! calls themselves.

pub mod bus;
pub mod config;
pub mod context;
pub mod controller;
pub mod demo;
pub mod gc;
pub mod script;
pub mod types;

pub use bus::{BusError, BusResult, CallError, MessageBus, NodeType, Rejected};
pub use config::SystemConfig;
pub use controller::{build_system, AudioContextProxy, AudioProcessor, SystemResult};
pub use types::*;
