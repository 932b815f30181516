//! Built-in bookkeeping layer
//!
//! Tracks, per slot, the hardware model an instance was added with, where a
//! duplicate came from, how many frames it has rendered and which menu
//! entries were picked while it was active. Serialised as JSON.

use std::io;

use serde::{Deserialize, Serialize};

use super::{LayerError, ScriptLayer};
use crate::context::{Instance, ProcessingContext};
use crate::types::{InstanceIndex, Model, TimeInfo, MAX_INSTANCES};

const BLOB_VERSION: u32 = 1;

/// Bookkeeping for one instance
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub model: Model,
    /// Slot this instance was duplicated from
    pub origin: Option<InstanceIndex>,
    /// Audio frames rendered while tracked
    pub frames: u64,
    /// Transport position when the instance was added
    pub added_at_ppq: f64,
    pub last_menu: Option<i32>,
    pub menu_picks: u32,
}

impl LedgerEntry {
    fn new(model: Model, origin: Option<InstanceIndex>, added_at_ppq: f64) -> Self {
        Self {
            model,
            origin,
            frames: 0,
            added_at_ppq,
            last_menu: None,
            menu_picks: 0,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct LedgerBlob {
    version: u32,
    active: Option<InstanceIndex>,
    instances: [Option<LedgerEntry>; MAX_INSTANCES],
}

/// Write JSON into a fixed buffer, returning the bytes written
fn write_json<T: Serialize>(value: &T, out: &mut [u8]) -> Result<usize, LayerError> {
    let total = out.len();
    let mut cursor = out;
    match serde_json::to_writer(&mut cursor, value) {
        Ok(()) => Ok(total - cursor.len()),
        Err(err) if err.is_io() => Err(LayerError::BufferTooSmall),
        Err(err) => Err(err.into()),
    }
}

/// Sink that only counts bytes
struct ByteCount(usize);

impl io::Write for ByteCount {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0 += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Length of the JSON encoding without materializing it
fn json_len<T: Serialize>(value: &T) -> usize {
    let mut count = ByteCount(0);
    match serde_json::to_writer(&mut count, value) {
        Ok(()) => count.0,
        Err(_) => 0,
    }
}

/// Scripting layer keeping per-instance bookkeeping
#[derive(Debug, Clone)]
pub struct LedgerLayer {
    name: &'static str,
    entries: [Option<LedgerEntry>; MAX_INSTANCES],
    active: Option<InstanceIndex>,
    time: TimeInfo,
    sample_rate: f64,
}

impl LedgerLayer {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: [None; MAX_INSTANCES],
            active: None,
            time: TimeInfo::default(),
            sample_rate: 0.0,
        }
    }

    pub fn entry(&self, idx: InstanceIndex) -> Option<&LedgerEntry> {
        self.entries[idx.get()].as_ref()
    }

    /// Tracked slots in order
    pub fn tracked(&self) -> impl Iterator<Item = InstanceIndex> + '_ {
        InstanceIndex::ALL
            .into_iter()
            .filter(|idx| self.entries[idx.get()].is_some())
    }

    pub fn active(&self) -> Option<InstanceIndex> {
        self.active
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }
}

impl Default for LedgerLayer {
    fn default() -> Self {
        Self::new("ledger")
    }
}

impl ScriptLayer for LedgerLayer {
    fn name(&self) -> &str {
        self.name
    }

    fn init(&mut self, ctx: &ProcessingContext, time: &TimeInfo, sample_rate: f64) {
        self.time = *time;
        self.sample_rate = sample_rate;
        self.active = ctx.active();
        for idx in InstanceIndex::ALL {
            self.entries[idx.get()] = ctx.get_instance(idx).map(|instance| {
                LedgerEntry::new(instance.core().settings().model, None, time.ppq_pos)
            });
        }
    }

    fn add_instance(&mut self, idx: InstanceIndex, instance: &Instance) {
        self.entries[idx.get()] = Some(LedgerEntry::new(
            instance.core().settings().model,
            None,
            self.time.ppq_pos,
        ));
    }

    fn duplicate_instance(
        &mut self,
        source: InstanceIndex,
        target: InstanceIndex,
        instance: &Instance,
    ) {
        let model = self.entries[source.get()]
            .map(|entry| entry.model)
            .unwrap_or_else(|| instance.core().settings().model);
        self.entries[target.get()] = Some(LedgerEntry::new(model, Some(source), self.time.ppq_pos));
    }

    fn remove_instance(&mut self, idx: InstanceIndex) {
        self.entries[idx.get()] = None;
        if self.active == Some(idx) {
            self.active = None;
        }
    }

    fn set_active(&mut self, idx: InstanceIndex) {
        self.active = Some(idx);
    }

    fn on_menu_result(&mut self, id: i32) {
        let Some(active) = self.active else {
            return;
        };
        if let Some(entry) = self.entries[active.get()].as_mut() {
            entry.last_menu = Some(id);
            entry.menu_picks += 1;
        }
    }

    fn update(&mut self, ctx: &mut ProcessingContext, time: &TimeInfo, frames: usize) {
        self.time = *time;
        for idx in InstanceIndex::ALL {
            if !ctx.is_populated(idx) {
                continue;
            }
            if let Some(entry) = self.entries[idx.get()].as_mut() {
                entry.frames += frames as u64;
            }
        }
    }

    fn serialize_instance(&self, idx: InstanceIndex, out: &mut [u8]) -> Option<usize> {
        match self.entries[idx.get()].as_ref() {
            Some(entry) => write_json(entry, out).ok(),
            None => Some(0),
        }
    }

    fn instance_size(&self, idx: InstanceIndex) -> usize {
        self.entries[idx.get()].as_ref().map_or(0, json_len)
    }

    fn serialize_instances(&self, out: &mut [u8]) -> Result<usize, LayerError> {
        let blob = LedgerBlob {
            version: BLOB_VERSION,
            active: self.active,
            instances: self.entries,
        };
        write_json(&blob, out)
    }

    fn deserialize_instances(&mut self, blob: &[u8]) -> Result<(), LayerError> {
        let blob: LedgerBlob = serde_json::from_slice(blob)?;
        if blob.version != BLOB_VERSION {
            return Err(LayerError::UnsupportedVersion(blob.version));
        }
        self.entries = blob.instances;
        self.active = blob.active;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{CoreSettings, EmulatorCore, ProjectSettings, RenderConfig};
    use crate::demo::DemoCore;

    fn idx(i: usize) -> InstanceIndex {
        InstanceIndex::new(i).unwrap()
    }

    fn populated_context(slots: &[usize]) -> ProcessingContext {
        let (mut ctx, _readers) =
            ProcessingContext::new(RenderConfig::default(), ProjectSettings::default());
        for &i in slots {
            let mut core = DemoCore::new("rom");
            core.set_settings(CoreSettings {
                model: Model::Cgb,
                ..Default::default()
            });
            ctx.swap_instance(idx(i), Instance::new(Box::new(core)));
        }
        ctx
    }

    #[test]
    fn test_init_tracks_populated_slots() {
        let ctx = populated_context(&[0, 2]);
        let mut layer = LedgerLayer::default();
        layer.init(&ctx, &TimeInfo::default(), 48_000.0);

        let tracked: Vec<usize> = layer.tracked().map(InstanceIndex::get).collect();
        assert_eq!(tracked, vec![0, 2]);
        assert_eq!(layer.entry(idx(0)).unwrap().model, Model::Cgb);
        assert_eq!(layer.sample_rate(), 48_000.0);
    }

    #[test]
    fn test_swap_round_trip_preserves_bookkeeping() {
        let mut ctx = populated_context(&[0, 1, 3]);
        let time = TimeInfo::default();

        let mut old = LedgerLayer::new("old");
        old.init(&ctx, &time, 44_100.0);
        old.duplicate_instance(idx(0), idx(1), ctx.get_instance(idx(1)).unwrap());
        old.set_active(idx(3));
        old.on_menu_result(7);
        old.update(&mut ctx, &time, 256);

        let mut blob = vec![0u8; 4096];
        let len = old.serialize_instances(&mut blob).unwrap();

        let mut new = LedgerLayer::new("new");
        new.init(&ctx, &time, 44_100.0);
        new.deserialize_instances(&blob[..len]).unwrap();

        assert_eq!(new.active(), old.active());
        assert_eq!(
            new.tracked().collect::<Vec<_>>(),
            old.tracked().collect::<Vec<_>>()
        );
        for i in [0, 1, 3] {
            assert_eq!(new.entry(idx(i)), old.entry(idx(i)));
        }
        assert_eq!(new.entry(idx(1)).unwrap().origin, Some(idx(0)));
        assert_eq!(new.entry(idx(3)).unwrap().last_menu, Some(7));
        assert_eq!(new.entry(idx(0)).unwrap().frames, 256);
    }

    #[test]
    fn test_small_buffer_is_reported() {
        let ctx = populated_context(&[0]);
        let mut layer = LedgerLayer::default();
        layer.init(&ctx, &TimeInfo::default(), 44_100.0);

        let mut tiny = [0u8; 8];
        assert_eq!(
            layer.serialize_instances(&mut tiny),
            Err(LayerError::BufferTooSmall)
        );
        assert_eq!(layer.serialize_instance(idx(0), &mut tiny), None);
        assert_eq!(layer.serialize_instance(idx(1), &mut tiny), Some(0));
    }

    #[test]
    fn test_instance_size_matches_serialized_length() {
        let ctx = populated_context(&[0]);
        let mut layer = LedgerLayer::default();
        layer.init(&ctx, &TimeInfo::default(), 44_100.0);

        let needed = layer.instance_size(idx(0));
        let mut exact = vec![0u8; needed];
        assert_eq!(layer.serialize_instance(idx(0), &mut exact), Some(needed));
        assert_eq!(layer.serialize_instance(idx(0), &mut exact[..needed - 1]), None);
        assert_eq!(layer.instance_size(idx(1)), 0);
    }

    #[test]
    fn test_malformed_blob_is_rejected() {
        let mut layer = LedgerLayer::default();
        assert!(matches!(
            layer.deserialize_instances(b"{not json"),
            Err(LayerError::Decode { .. })
        ));

        let future = br#"{"version":9,"active":null,"instances":[null,null,null,null]}"#;
        assert_eq!(
            layer.deserialize_instances(future),
            Err(LayerError::UnsupportedVersion(9))
        );
    }

    #[test]
    fn test_remove_clears_active() {
        let ctx = populated_context(&[2]);
        let mut layer = LedgerLayer::default();
        layer.init(&ctx, &TimeInfo::default(), 44_100.0);
        layer.set_active(idx(2));
        layer.remove_instance(idx(2));

        assert_eq!(layer.active(), None);
        assert!(layer.entry(idx(2)).is_none());
    }
}
