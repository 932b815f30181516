//! Deterministic stand-in emulation core
//!
//! Produces a square-wave tone whose pitch follows the held buttons and a
//! flat-colour video frame roughly every 1/60 s of audio. Small enough to
//! reason about in tests and in the headless simulator, while still
//! exercising every method of [`EmulatorCore`].

use crate::context::{CoreSettings, EmulatorCore, RenderTarget, StereoSample};
use crate::types::{ButtonEvent, Model, VIDEO_BYTES_PER_PIXEL};

/// Audio frames per completed video frame (44.1 kHz / 60 Hz)
pub const SAMPLES_PER_FRAME: u32 = 735;

/// Size of the battery-backed save RAM
pub const BATTERY_SIZE: usize = 8 * 1024;

const SAMPLE_RATE: f32 = 44_100.0;
const BASE_FREQ: f32 = 220.0;
const AMPLITUDE: f32 = 0.1;
const TITLE_LEN: usize = 16;

const STATE_MAGIC: &[u8; 4] = b"RPDS";
const STATE_VERSION: u8 = 1;
/// magic + version + model/cc/hpf + buttons + frame + clock + phase
const STATE_SIZE: usize = 4 + 1 + 3 + 1 + 8 + 4 + 4;

/// A deterministic tone and colour generator
#[derive(Debug, Clone)]
pub struct DemoCore {
    rom: Vec<u8>,
    sram: Vec<u8>,
    settings: CoreSettings,
    buttons: u8,
    frame: u64,
    sample_clock: u32,
    phase: f32,
    resets: u32,
}

impl DemoCore {
    /// Create a core whose ROM image is the given title
    pub fn new(title: &str) -> Self {
        Self::with_rom(title.as_bytes().to_vec())
    }

    pub fn with_rom(rom: Vec<u8>) -> Self {
        Self {
            rom,
            sram: vec![0; BATTERY_SIZE],
            settings: CoreSettings::default(),
            buttons: 0,
            frame: 0,
            sample_clock: 0,
            phase: 0.0,
            resets: 0,
        }
    }

    /// Completed video frames since the last reset
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Currently held buttons as a mask
    pub fn buttons(&self) -> u8 {
        self.buttons
    }

    pub fn resets(&self) -> u32 {
        self.resets
    }

    fn frequency(&self) -> f32 {
        BASE_FREQ * (1 + self.buttons.count_ones()) as f32
    }

    fn draw(&self, video: &mut [u8]) {
        let shade = (self.frame % 256) as u8;
        let mut pixel = [shade, self.buttons, self.settings.model as u8 * 40, 0xFF];
        if self.settings.color_correction {
            // Crude gamma lift, enough to make the option visible
            for channel in &mut pixel[..3] {
                *channel = channel.saturating_add(*channel / 4);
            }
        }
        for chunk in video.chunks_exact_mut(VIDEO_BYTES_PER_PIXEL) {
            chunk.copy_from_slice(&pixel);
        }
    }
}

impl EmulatorCore for DemoCore {
    fn reset(&mut self, model: Model, _fast: bool) {
        self.settings.model = model;
        self.buttons = 0;
        self.frame = 0;
        self.sample_clock = 0;
        self.phase = 0.0;
        self.resets += 1;
    }

    fn set_rom_data(&mut self, rom: Vec<u8>) -> Vec<u8> {
        std::mem::replace(&mut self.rom, rom)
    }

    fn rom_name(&self) -> &str {
        let header = &self.rom[..self.rom.len().min(TITLE_LEN)];
        let end = header.iter().position(|&b| b == 0).unwrap_or(header.len());
        std::str::from_utf8(&header[..end]).unwrap_or("")
    }

    fn load_battery(&mut self, data: &[u8], reset: bool) {
        let len = data.len().min(BATTERY_SIZE);
        self.sram[..len].copy_from_slice(&data[..len]);
        self.sram[len..].fill(0);
        if reset {
            self.reset(self.settings.model, true);
        }
    }

    fn battery_size(&self) -> usize {
        BATTERY_SIZE
    }

    fn save_battery(&self, out: &mut [u8]) -> Option<usize> {
        out.get_mut(..BATTERY_SIZE)?.copy_from_slice(&self.sram);
        Some(BATTERY_SIZE)
    }

    fn state_size(&self) -> usize {
        STATE_SIZE
    }

    fn save_state(&self, out: &mut [u8]) -> Option<usize> {
        let out = out.get_mut(..STATE_SIZE)?;
        out[0..4].copy_from_slice(STATE_MAGIC);
        out[4] = STATE_VERSION;
        out[5] = self.settings.model as u8;
        out[6] = self.settings.color_correction as u8;
        out[7] = self.settings.high_pass_filter as u8;
        out[8] = self.buttons;
        out[9..17].copy_from_slice(&self.frame.to_le_bytes());
        out[17..21].copy_from_slice(&self.sample_clock.to_le_bytes());
        out[21..25].copy_from_slice(&self.phase.to_bits().to_le_bytes());
        Some(STATE_SIZE)
    }

    fn load_state(&mut self, data: &[u8]) -> bool {
        if data.len() != STATE_SIZE || &data[0..4] != STATE_MAGIC || data[4] != STATE_VERSION {
            return false;
        }
        let model = match data[5] {
            0 => Model::Auto,
            1 => Model::Dmg,
            2 => Model::Cgb,
            3 => Model::Agb,
            4 => Model::Sgb,
            _ => return false,
        };

        let mut frame = [0u8; 8];
        frame.copy_from_slice(&data[9..17]);
        let mut clock = [0u8; 4];
        clock.copy_from_slice(&data[17..21]);
        let mut phase = [0u8; 4];
        phase.copy_from_slice(&data[21..25]);

        self.settings = CoreSettings {
            model,
            color_correction: data[6] != 0,
            high_pass_filter: data[7] != 0,
        };
        self.buttons = data[8];
        self.frame = u64::from_le_bytes(frame);
        self.sample_clock = u32::from_le_bytes(clock);
        self.phase = f32::from_bits(u32::from_le_bytes(phase));
        true
    }

    fn press_buttons(&mut self, events: &[ButtonEvent]) {
        for event in events {
            if event.down {
                self.buttons |= event.button.mask();
            } else {
                self.buttons &= !event.button.mask();
            }
        }
    }

    fn render(&mut self, target: RenderTarget<'_>) -> bool {
        let step = self.frequency() / SAMPLE_RATE;
        let amplitude = if self.settings.high_pass_filter {
            AMPLITUDE * 0.8
        } else {
            AMPLITUDE
        };

        let mut frame_ready = false;
        for sample in target.audio.iter_mut() {
            let value = if self.phase < 0.5 { amplitude } else { -amplitude };
            *sample = StereoSample::new(value, value);
            self.phase = (self.phase + step).fract();

            self.sample_clock += 1;
            if self.sample_clock == SAMPLES_PER_FRAME {
                self.sample_clock = 0;
                self.frame += 1;
                frame_ready = true;
            }
        }

        if frame_ready {
            self.draw(target.video);
        }
        frame_ready
    }

    fn settings(&self) -> CoreSettings {
        self.settings
    }

    fn set_settings(&mut self, settings: CoreSettings) {
        self.settings = settings;
    }
}
