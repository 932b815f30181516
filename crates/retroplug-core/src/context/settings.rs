//! Project-wide settings applied by the processing context

use serde::{Deserialize, Serialize};

/// How instance audio reaches the host outputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AudioChannelRouting {
    /// Every instance summed into the first stereo pair
    #[default]
    StereoMixDown,
    /// Instance N on channels 2N and 2N+1
    TwoChannelsPerInstance,
}

/// How incoming MIDI is distributed to instances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MidiChannelRouting {
    #[default]
    SendToAll,
    FourChannelsPerInstance,
    OneChannelPerInstance,
}

/// Arrangement of instance views in the window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InstanceLayout {
    #[default]
    Auto,
    Column,
    Row,
    Grid,
}

/// What a project stores for each instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SaveStateType {
    /// Battery-backed save RAM only
    #[default]
    Sram,
    /// Full emulator state snapshot
    State,
}

/// Global routing, layout and persistence settings
///
/// Broadcast to the processing context as a whole value; the context applies
/// it atomically at the next drain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectSettings {
    pub audio_routing: AudioChannelRouting,
    pub midi_routing: MidiChannelRouting,
    pub layout: InstanceLayout,
    pub save_type: SaveStateType,
    /// View zoom factor
    pub zoom: f32,
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self {
            audio_routing: AudioChannelRouting::default(),
            midi_routing: MidiChannelRouting::default(),
            layout: InstanceLayout::default(),
            save_type: SaveStateType::default(),
            zoom: 2.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_settings_fill_defaults() {
        let settings: ProjectSettings =
            serde_yaml::from_str("audio_routing: TwoChannelsPerInstance\n").unwrap();
        assert_eq!(settings.audio_routing, AudioChannelRouting::TwoChannelsPerInstance);
        assert_eq!(settings.save_type, SaveStateType::Sram);
        assert_eq!(settings.zoom, 2.0);
    }
}
