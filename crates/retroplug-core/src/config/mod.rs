//! Configuration for the RetroPlug core
//!
//! Everything is loaded from a single YAML file; every field has a default
//! so partial files are fine.
//!
//! ```ignore
//! use retroplug_core::config::{default_config_path, load_config, SystemConfig};
//!
//! let config: SystemConfig = load_config(&default_config_path(CONFIG_FILE));
//! ```

mod io;
mod paths;

pub use io::{load_config, read_config, save_config};
pub use paths::{default_config_dir, default_config_path};

use serde::{Deserialize, Serialize};

use crate::context::{ProjectSettings, RenderConfig};
use crate::controller::calls::CallCapacities;

/// Default config file name
pub const CONFIG_FILE: &str = "retroplug.yaml";

/// Everything needed to build a running system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Host sample rate in Hz
    pub sample_rate: u32,
    /// Interleaved output channels the host asks for
    pub output_channels: usize,
    pub render: RenderConfig,
    pub capacities: CallCapacities,
    /// Project settings the context starts with
    pub project: ProjectSettings,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            output_channels: 2,
            render: RenderConfig::default(),
            capacities: CallCapacities::default(),
            project: ProjectSettings::default(),
        }
    }
}
