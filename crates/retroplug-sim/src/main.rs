//! RetroPlug headless simulator
//!
//! Runs the core the way a plugin host would, without a host:
//! 1. A render thread plays the real-time callback, draining the audio node
//!    and processing fixed-size blocks
//! 2. The main thread plays the UI, loading demo instances, swapping the
//!    scripting layer and pulling state through the blocking calls
//!
//! ## Command line flags
//!
//! - `--config <path>`: config file (default: `{config_dir}/retroplug/retroplug.yaml`)
//! - `--seconds <n>`: how long to run (default: 3)
//! - `--write-config`: save the effective config back to the path and exit

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};

use retroplug_core::config::{default_config_path, load_config, save_config, CONFIG_FILE};
use retroplug_core::context::{Instance, StereoSample};
use retroplug_core::demo::DemoCore;
use retroplug_core::gc::gc_sweeps;
use retroplug_core::script::LedgerLayer;
use retroplug_core::{
    build_system, AudioProcessor, Button, ButtonEvent, ButtonStream, InstanceIndex, Model,
    SystemConfig, SystemResult, VIDEO_FRAME_SIZE,
};

/// UI refresh period
const UI_TICK: Duration = Duration::from_millis(16);

struct Args {
    config_path: PathBuf,
    seconds: u64,
    write_config: bool,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        config_path: default_config_path(CONFIG_FILE),
        seconds: 3,
        write_config: false,
    };

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                args.config_path = iter.next().context("--config needs a path")?.into();
            }
            "--seconds" => {
                args.seconds = iter
                    .next()
                    .context("--seconds needs a value")?
                    .parse()
                    .context("--seconds must be a whole number")?;
            }
            "--write-config" => args.write_config = true,
            other => return Err(anyhow!("Unknown argument: {}", other)),
        }
    }
    Ok(args)
}

/// Play the host callback until told to stop, then hand the processor back
fn spawn_render_thread(
    mut processor: AudioProcessor,
    config: &SystemConfig,
    stop: Arc<AtomicBool>,
) -> Result<thread::JoinHandle<AudioProcessor>> {
    let frames = config.render.max_block_frames.min(512);
    let block = Duration::from_secs_f64(frames as f64 / f64::from(config.sample_rate));
    let channels = processor.channels();

    thread::Builder::new()
        .name("retroplug-render".to_string())
        .spawn(move || {
            let mut out = vec![0.0f32; frames * channels];
            let mut next = Instant::now();
            while !stop.load(Ordering::Acquire) {
                processor.process(&mut out);
                next += block;
                if let Some(wait) = next.checked_duration_since(Instant::now()) {
                    thread::sleep(wait);
                }
            }
            processor
        })
        .context("Failed to spawn render thread")
}

fn slot(i: usize) -> Result<InstanceIndex> {
    InstanceIndex::new(i).with_context(|| format!("Slot {} out of range", i))
}

fn main() -> Result<()> {
    // Set RUST_LOG=debug for bus and context details
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = parse_args()?;
    let config: SystemConfig = load_config(&args.config_path);
    if args.write_config {
        save_config(&config, &args.config_path)?;
        return Ok(());
    }

    log::info!("retroplug-sim starting up for {} s", args.seconds);

    let SystemResult {
        processor,
        mut proxy,
        mut readers,
    } = build_system(&config)?;
    let stop = Arc::new(AtomicBool::new(false));
    let render = spawn_render_thread(processor, &config, stop.clone())?;

    let first = slot(0)?;
    let second = slot(1)?;

    proxy
        .swap_layer(LedgerLayer::default())
        .map_err(|e| anyhow!("Layer swap failed: {}", e))?;
    proxy
        .load_instance(first, Box::new(DemoCore::new("RETROPLUG DEMO")))
        .map_err(|e| anyhow!("Loading slot {} failed: {}", first, e))?;
    proxy
        .set_rom(first, b"SIMULATED CART\0\0".to_vec(), true)
        .map_err(|e| anyhow!("ROM install failed: {}", e))?;
    proxy
        .set_active(first)
        .map_err(|_| anyhow!("Activating slot {} was rejected", first))?;

    let mut video = vec![0u8; VIDEO_FRAME_SIZE];
    let mut audio = vec![StereoSample::SILENCE; config.render.audio_ring_frames];
    let mut frames_seen = 0u64;
    let mut duplicated = false;
    let started = Instant::now();
    let deadline = started + Duration::from_secs(args.seconds);

    while Instant::now() < deadline {
        proxy.update();

        // Tap A twice a second
        let phase = started.elapsed().as_millis() / 250 % 2;
        let mut stream = ButtonStream::new(first);
        stream.push(if phase == 0 {
            ButtonEvent::press(Button::A)
        } else {
            ButtonEvent::release(Button::A)
        });
        // Rejections are counted and logged by the proxy
        let _ = proxy.press_buttons(stream);

        if !duplicated && started.elapsed() > Duration::from_secs(1) {
            let copy = Instance::new(Box::new(DemoCore::new("")));
            proxy
                .duplicate_instance(first, second, copy)
                .map_err(|e| anyhow!("Duplicate failed: {}", e))?;
            let _ = proxy.reset_instance(second, Model::Cgb);
            duplicated = true;
        }

        for (_, reader) in readers.iter_mut() {
            if reader.video.read_latest(&mut video).is_some() {
                frames_seen += 1;
            }
            reader.audio.read_into(&mut audio);
        }

        thread::sleep(UI_TICK);
    }

    let snapshot = proxy
        .fetch_state()
        .map_err(|e| anyhow!("State fetch failed: {}", e))?;
    for (idx, slot) in snapshot.populated() {
        log::info!(
            "Slot {}: {:?}, {} B save RAM, {} B state, {} B layer data",
            idx,
            slot.model,
            slot.sram.len(),
            slot.state.len(),
            slot.component.len()
        );
    }

    for idx in InstanceIndex::ALL {
        if let Some(instance) = proxy
            .take_instance(idx)
            .map_err(|e| anyhow!("Take from slot {} failed: {}", idx, e))?
        {
            log::info!("Took instance {} from slot {}", instance.id(), idx);
        }
    }

    stop.store(true, Ordering::Release);
    let processor = render
        .join()
        .map_err(|_| anyhow!("Render thread panicked"))?;

    for stats in processor.stats() {
        log::debug!(
            "{}: {} accepted, {} rejected, {} pending (capacity {})",
            stats.call,
            stats.accepted,
            stats.rejected,
            stats.pending,
            stats.capacity
        );
    }
    for (idx, reader) in readers.iter_mut() {
        let counters = &reader.counters;
        log::info!(
            "Slot {} video: {} written, {} overwritten, {} skipped; {} audio samples dropped",
            idx,
            counters.frames_written(),
            counters.frames_dropped(),
            counters.frames_skipped(),
            counters.samples_dropped()
        );
    }
    log::debug!("Instance GC swept {} times", gc_sweeps());
    log::info!(
        "Done: {} frames shown, {} UI requests dropped, {} notifications dropped",
        frames_seen,
        proxy.dropped(),
        processor.controller().dropped_notifications()
    );
    Ok(())
}
