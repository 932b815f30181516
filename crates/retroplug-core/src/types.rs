//! Common types for RetroPlug
//!
//! Slot indices, hardware models, button input and the render geometry shared
//! by the bus, the processing context and the UI mirror.

use serde::{Deserialize, Serialize};

/// Number of instance slots in the processing context
pub const MAX_INSTANCES: usize = 4;

/// Native video width of the emulated hardware (pixels)
pub const VIDEO_WIDTH: usize = 160;

/// Native video height of the emulated hardware (pixels)
pub const VIDEO_HEIGHT: usize = 144;

/// Bytes per pixel of a rendered frame (RGBA)
pub const VIDEO_BYTES_PER_PIXEL: usize = 4;

/// Size in bytes of one rendered video frame
pub const VIDEO_FRAME_SIZE: usize = VIDEO_WIDTH * VIDEO_HEIGHT * VIDEO_BYTES_PER_PIXEL;

/// Maximum number of button events carried by a single [`ButtonStream`]
pub const MAX_BUTTON_PRESSES: usize = 32;

/// Index of an instance slot
///
/// Can only be constructed for values below [`MAX_INSTANCES`], so every
/// operation that receives one can index the slot table without checking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub struct InstanceIndex(usize);

impl InstanceIndex {
    /// All slot indices in order
    pub const ALL: [InstanceIndex; MAX_INSTANCES] = [
        InstanceIndex(0),
        InstanceIndex(1),
        InstanceIndex(2),
        InstanceIndex(3),
    ];

    /// Create an index, returning None if it is out of range
    pub fn new(idx: usize) -> Option<Self> {
        (idx < MAX_INSTANCES).then_some(Self(idx))
    }

    /// Get the raw slot number
    #[inline]
    pub fn get(self) -> usize {
        self.0
    }
}

impl TryFrom<usize> for InstanceIndex {
    type Error = String;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| {
            format!("instance index {} out of range (max {})", value, MAX_INSTANCES - 1)
        })
    }
}

impl From<InstanceIndex> for usize {
    fn from(idx: InstanceIndex) -> Self {
        idx.0
    }
}

impl std::fmt::Display for InstanceIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hardware model variant an instance is reset into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Model {
    /// Pick the model from the ROM header
    #[default]
    Auto,
    /// Original monochrome handheld
    Dmg,
    /// Colour handheld
    Cgb,
    /// Colour handheld running in advance-compatibility mode
    Agb,
    /// Super adapter
    Sgb,
}

impl Model {
    /// Get the display name of this model
    pub fn name(&self) -> &'static str {
        match self {
            Model::Auto => "Auto",
            Model::Dmg => "DMG",
            Model::Cgb => "CGB",
            Model::Agb => "AGB",
            Model::Sgb => "SGB",
        }
    }
}

/// Controller buttons of the emulated hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Button {
    Right,
    Left,
    Up,
    Down,
    A,
    B,
    Select,
    Start,
}

impl Button {
    /// All buttons in hardware order
    pub const ALL: [Button; 8] = [
        Button::Right,
        Button::Left,
        Button::Up,
        Button::Down,
        Button::A,
        Button::B,
        Button::Select,
        Button::Start,
    ];

    /// Bit of this button in a pressed-button mask
    #[inline]
    pub fn mask(self) -> u8 {
        1 << (self as u8)
    }
}

/// A single button transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonEvent {
    pub button: Button,
    pub down: bool,
    /// Sample offset within the next rendered block
    pub offset: u32,
}

impl ButtonEvent {
    /// Button pressed at the start of the next block
    pub fn press(button: Button) -> Self {
        Self { button, down: true, offset: 0 }
    }

    /// Button released at the start of the next block
    pub fn release(button: Button) -> Self {
        Self { button, down: false, offset: 0 }
    }
}

/// Fixed-capacity batch of button events for one instance
///
/// Plain `Copy` data so it can travel through a call queue without any
/// allocation on either side.
#[derive(Debug, Clone, Copy)]
pub struct ButtonStream {
    pub idx: InstanceIndex,
    presses: [ButtonEvent; MAX_BUTTON_PRESSES],
    count: usize,
}

impl ButtonStream {
    /// Create an empty stream targeting a slot
    pub fn new(idx: InstanceIndex) -> Self {
        Self {
            idx,
            presses: [ButtonEvent::release(Button::A); MAX_BUTTON_PRESSES],
            count: 0,
        }
    }

    /// Append an event, returning false if the stream is full
    pub fn push(&mut self, event: ButtonEvent) -> bool {
        if self.count == MAX_BUTTON_PRESSES {
            return false;
        }
        self.presses[self.count] = event;
        self.count += 1;
        true
    }

    /// Events in the order they were pushed
    pub fn presses(&self) -> &[ButtonEvent] {
        &self.presses[..self.count]
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Host transport information handed to the scripting layer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeInfo {
    pub tempo: f64,
    pub sample_pos: f64,
    pub ppq_pos: f64,
    pub playing: bool,
    pub numerator: u32,
    pub denominator: u32,
}

impl Default for TimeInfo {
    fn default() -> Self {
        Self {
            tempo: 120.0,
            sample_pos: 0.0,
            ppq_pos: 0.0,
            playing: false,
            numerator: 4,
            denominator: 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_index_bounds() {
        assert!(InstanceIndex::new(0).is_some());
        assert!(InstanceIndex::new(MAX_INSTANCES - 1).is_some());
        assert!(InstanceIndex::new(MAX_INSTANCES).is_none());
        assert_eq!(InstanceIndex::ALL.len(), MAX_INSTANCES);
    }

    #[test]
    fn test_instance_index_deserialize_rejects_out_of_range() {
        let ok: InstanceIndex = serde_json::from_str("2").unwrap();
        assert_eq!(ok.get(), 2);
        assert!(serde_json::from_str::<InstanceIndex>("9").is_err());
    }

    #[test]
    fn test_button_stream_capacity() {
        let idx = InstanceIndex::new(1).unwrap();
        let mut stream = ButtonStream::new(idx);
        assert!(stream.is_empty());

        for _ in 0..MAX_BUTTON_PRESSES {
            assert!(stream.push(ButtonEvent::press(Button::Start)));
        }
        assert!(!stream.push(ButtonEvent::press(Button::Start)));
        assert_eq!(stream.len(), MAX_BUTTON_PRESSES);
    }

    #[test]
    fn test_button_stream_preserves_order() {
        let mut stream = ButtonStream::new(InstanceIndex::new(0).unwrap());
        stream.push(ButtonEvent::press(Button::A));
        stream.push(ButtonEvent::release(Button::A));
        stream.push(ButtonEvent::press(Button::B));

        let buttons: Vec<_> = stream.presses().iter().map(|e| (e.button, e.down)).collect();
        assert_eq!(
            buttons,
            vec![(Button::A, true), (Button::A, false), (Button::B, true)]
        );
    }

    #[test]
    fn test_button_masks_are_distinct() {
        let combined = Button::ALL.iter().fold(0u8, |acc, b| acc | b.mask());
        assert_eq!(combined, 0xFF);
    }
}
