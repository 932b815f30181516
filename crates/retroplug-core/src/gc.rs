//! Deferred deallocation for emulated instances
//!
//! Instances carry ROM images, save RAM and the emulator's own state, so
//! freeing one is a handful of large deallocations. Every instance core is
//! wrapped in `basedrop::Owned`; if the last owner drops it on the real-time
//! thread (a blocking caller that vanished before taking its reply, a slot
//! cleared during shutdown) the pointer is queued and the memory is freed by
//! the collector thread instead.
//!
//! ```ignore
//! use basedrop::Owned;
//! use retroplug_core::gc::gc_handle;
//!
//! let core: Owned<Box<dyn EmulatorCore>> = Owned::new(&gc_handle(), Box::new(core));
//! drop(core); // queued, freed on "retroplug-gc"
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Duration;

use basedrop::{Collector, Handle};

/// Pause between sweeps
const SWEEP_INTERVAL: Duration = Duration::from_millis(100);

/// Process-wide collector: the handle instances are wrapped with plus the
/// sweep counter of the thread draining it
struct InstanceGc {
    handle: Handle,
    sweeps: Arc<AtomicU64>,
}

static INSTANCE_GC: OnceLock<InstanceGc> = OnceLock::new();

impl InstanceGc {
    fn start() -> Self {
        // Built here and moved; the sweeping thread becomes its only user
        let mut collector = Collector::new();
        let handle = collector.handle();
        let sweeps = Arc::new(AtomicU64::new(0));
        let counter = sweeps.clone();

        thread::Builder::new()
            .name("retroplug-gc".to_string())
            .spawn(move || {
                log::info!("Instance GC thread started");
                let mut live = collector.alloc_count();
                loop {
                    collector.collect();
                    counter.fetch_add(1, Ordering::Relaxed);

                    let now = collector.alloc_count();
                    if now != live {
                        log::debug!("Instance GC: {} deferred allocations live", now);
                        live = now;
                    }
                    thread::sleep(SWEEP_INTERVAL);
                }
            })
            .expect("Failed to spawn instance GC thread");

        Self { handle, sweeps }
    }
}

/// Handle for wrapping values in `Owned<T>`/`Shared<T>`
///
/// The first call starts the collector thread.
pub fn gc_handle() -> Handle {
    INSTANCE_GC.get_or_init(InstanceGc::start).handle.clone()
}

/// Sweeps the collector thread has finished; zero until the first `gc_handle`
pub fn gc_sweeps() -> u64 {
    INSTANCE_GC
        .get()
        .map_or(0, |gc| gc.sweeps.load(Ordering::Relaxed))
}
