//! Registry of physical vibrators
//!
//! Devices come and go at runtime. Attach adds a device's vibrators; detach
//! first puts the device into a detaching state (no longer resolvable), stops
//! and retires every controller of it, removes the entries and only then
//! tells observers.
//!
//! ```text
//! plug source ─► on_attach / on_detach ─► device map (RwLock)
//!                        │
//!                        ├─► ControllerPool::retire (detach only)
//!                        ▼
//!                  broadcast<PlugEvent> ─► observers
//! ```

use crate::hal::DeviceDescriptor;
use crate::model::{VibratorCapability, VibratorIdentifier, VibratorInfo, VibratorRef};
use crate::playback::ControllerPool;
use chrono::{DateTime, Local};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const PLUG_EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlugKind {
    Attached,
    Detached,
}

/// Attach/detach notification fanned out to observers
#[derive(Debug, Clone)]
pub struct PlugEvent {
    pub kind: PlugKind,
    pub device_id: i32,
    pub vibrators: Vec<VibratorRef>,
    pub at: DateTime<Local>,
}

#[derive(Debug, Clone)]
struct Entry {
    info: VibratorInfo,
    capability: VibratorCapability,
}

#[derive(Debug)]
struct DeviceRecord {
    entries: Vec<Entry>,
    detaching: bool,
}

pub struct VibratorRegistry {
    devices: RwLock<BTreeMap<i32, DeviceRecord>>,
    pool: Arc<ControllerPool>,
    events: broadcast::Sender<PlugEvent>,
    stale_lookups: AtomicU64,
}

impl VibratorRegistry {
    pub fn new(pool: Arc<ControllerPool>) -> Self {
        let (events, _) = broadcast::channel(PLUG_EVENT_CAPACITY);
        Self {
            devices: RwLock::new(BTreeMap::new()),
            pool,
            events,
            stale_lookups: AtomicU64::new(0),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<i32, DeviceRecord>> {
        self.devices.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<i32, DeviceRecord>> {
        self.devices.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn pool(&self) -> &Arc<ControllerPool> {
        &self.pool
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlugEvent> {
        self.events.subscribe()
    }

    fn notify(&self, kind: PlugKind, device_id: i32, vibrators: Vec<VibratorRef>) {
        let event = PlugEvent {
            kind,
            device_id,
            vibrators,
            at: Local::now(),
        };
        if self.events.send(event).is_err() {
            debug!("No plug observers for device {}", device_id);
        }
    }

    pub fn on_attach(&self, device: &DeviceDescriptor) {
        let entries: Vec<Entry> = device
            .vibrators
            .iter()
            .map(|slot| Entry {
                info: VibratorInfo {
                    device_id: device.device_id,
                    vibrator_id: slot.vibrator_id,
                    device_name: device.device_name.clone(),
                    supports_hd_haptic: device.capability.supports_hd_streaming,
                    is_local: device.is_local,
                    position: slot.position,
                },
                capability: device.capability,
            })
            .collect();
        let refs: Vec<VibratorRef> = entries.iter().map(|e| e.info.vibrator_ref()).collect();

        self.pool.revive(&refs);
        let replaced = self.write().insert(
            device.device_id,
            DeviceRecord {
                entries,
                detaching: false,
            },
        );
        if let Some(previous) = replaced {
            for entry in previous.entries {
                let old = entry.info.vibrator_ref();
                if !refs.contains(&old) {
                    self.pool.retire(old);
                }
            }
        }

        info!(
            "Device {} ({}) attached with {} vibrators, local={}",
            device.device_id,
            device.device_name,
            refs.len(),
            device.is_local
        );
        self.notify(PlugKind::Attached, device.device_id, refs);
    }

    /// Stops and removes every vibrator of `device_id`, then notifies observers
    pub fn on_detach(&self, device_id: i32) -> Vec<VibratorRef> {
        let refs: Vec<VibratorRef> = {
            let mut devices = self.write();
            let Some(record) = devices.get_mut(&device_id) else {
                warn!("Detach for unknown device {}", device_id);
                return Vec::new();
            };
            record.detaching = true;
            record.entries.iter().map(|e| e.info.vibrator_ref()).collect()
        };

        for target in &refs {
            self.pool.retire(*target);
        }
        self.write().remove(&device_id);

        info!("Device {} detached, {} vibrators stopped", device_id, refs.len());
        self.notify(PlugKind::Detached, device_id, refs.clone());
        refs
    }

    /// Concrete vibrators addressed by `identifier`
    pub fn resolve(&self, identifier: &VibratorIdentifier) -> Vec<VibratorRef> {
        let guard = self.read();
        let devices: &BTreeMap<i32, DeviceRecord> = &guard;
        let live = || {
            devices
                .values()
                .filter(|record| !record.detaching)
                .flat_map(|record| record.entries.iter())
        };

        let selected: Vec<VibratorRef> = match (identifier.has_device(), identifier.has_vibrator()) {
            (false, false) => live()
                .filter(|e| e.info.is_local)
                .map(|e| e.info.vibrator_ref())
                .collect(),
            (false, true) => live()
                .filter(|e| e.info.is_local && e.info.vibrator_id == identifier.vibrator_id)
                .map(|e| e.info.vibrator_ref())
                .collect(),
            (true, false) => live()
                .filter(|e| e.info.device_id == identifier.device_id)
                .map(|e| e.info.vibrator_ref())
                .collect(),
            (true, true) => live()
                .filter(|e| {
                    e.info.device_id == identifier.device_id
                        && e.info.vibrator_id == identifier.vibrator_id
                })
                .map(|e| e.info.vibrator_ref())
                .take(1)
                .collect(),
        };

        if !selected.is_empty() || !identifier.has_vibrator() {
            return selected;
        }
        if live().any(|e| e.info.vibrator_id == identifier.vibrator_id) {
            return selected;
        }

        // stale vibrator id: fall back to the whole device
        let count = self.stale_lookups.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(
            "Vibrator id {} is not tracked (stale lookup #{}), using all vibrators of the device",
            identifier.vibrator_id, count
        );
        live()
            .filter(|e| {
                if identifier.has_device() {
                    e.info.device_id == identifier.device_id
                } else {
                    e.info.is_local
                }
            })
            .map(|e| e.info.vibrator_ref())
            .collect()
    }

    fn entry<R>(&self, target: VibratorRef, f: impl FnOnce(&Entry) -> R) -> Option<R> {
        self.read()
            .get(&target.device_id)
            .and_then(|record| {
                record
                    .entries
                    .iter()
                    .find(|e| e.info.vibrator_id == target.vibrator_id)
            })
            .map(f)
    }

    pub fn capability_of(&self, target: VibratorRef) -> Option<VibratorCapability> {
        self.entry(target, |e| e.capability)
    }

    pub fn info_of(&self, target: VibratorRef) -> Option<VibratorInfo> {
        self.entry(target, |e| e.info.clone())
    }

    pub fn device_ids(&self) -> Vec<i32> {
        self.read().keys().copied().collect()
    }

    pub fn stale_lookup_count(&self) -> u64 {
        self.stale_lookups.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::{SimulatedHal, VibratorSlot};
    use crate::playback::PlaybackTiming;
    use pretty_assertions::assert_eq;

    fn descriptor(device_id: i32, is_local: bool, ids: &[i32]) -> DeviceDescriptor {
        DeviceDescriptor {
            device_id,
            device_name: format!("device-{}", device_id),
            is_local,
            vibrators: ids
                .iter()
                .map(|id| VibratorSlot {
                    vibrator_id: *id,
                    position: *id,
                })
                .collect(),
            capability: VibratorCapability::time_delay(),
        }
    }

    fn registry() -> VibratorRegistry {
        let pool = Arc::new(ControllerPool::new(
            Arc::new(SimulatedHal::new()),
            PlaybackTiming::default(),
        ));
        let registry = VibratorRegistry::new(pool);
        registry.on_attach(&descriptor(1, true, &[1, 2]));
        registry.on_attach(&descriptor(7, false, &[1, 5]));
        registry
    }

    #[test]
    fn test_resolve_all_local() {
        let registry = registry();
        assert_eq!(
            registry.resolve(&VibratorIdentifier::all_local()),
            vec![VibratorRef::new(1, 1), VibratorRef::new(1, 2)]
        );
    }

    #[test]
    fn test_resolve_local_motor() {
        let registry = registry();
        assert_eq!(
            registry.resolve(&VibratorIdentifier::local_motor(2)),
            vec![VibratorRef::new(1, 2)]
        );
        // id 5 exists only on the remote device
        assert!(registry.resolve(&VibratorIdentifier::local_motor(5)).is_empty());
        assert_eq!(registry.stale_lookup_count(), 0);
    }

    #[test]
    fn test_resolve_device_and_exact() {
        let registry = registry();
        assert_eq!(
            registry.resolve(&VibratorIdentifier::device(7)),
            vec![VibratorRef::new(7, 1), VibratorRef::new(7, 5)]
        );
        assert_eq!(
            registry.resolve(&VibratorIdentifier::exact(7, 5)),
            vec![VibratorRef::new(7, 5)]
        );
        assert!(registry.resolve(&VibratorIdentifier::exact(1, 5)).is_empty());
        assert!(registry.resolve(&VibratorIdentifier::device(42)).is_empty());
    }

    #[test]
    fn test_stale_id_falls_back_to_device() {
        let registry = registry();
        assert_eq!(
            registry.resolve(&VibratorIdentifier::exact(7, 99)),
            vec![VibratorRef::new(7, 1), VibratorRef::new(7, 5)]
        );
        assert_eq!(
            registry.resolve(&VibratorIdentifier::local_motor(99)),
            vec![VibratorRef::new(1, 1), VibratorRef::new(1, 2)]
        );
        assert_eq!(registry.stale_lookup_count(), 2);
    }

    #[test]
    fn test_capability_and_info() {
        let registry = registry();
        let target = VibratorRef::new(7, 5);
        assert_eq!(
            registry.capability_of(target),
            Some(VibratorCapability::time_delay())
        );
        let info = registry.info_of(target).unwrap();
        assert!(!info.is_local);
        assert_eq!(info.position, 5);
        assert!(registry.capability_of(VibratorRef::new(7, 6)).is_none());
    }

    #[test]
    fn test_detach_removes_and_notifies() {
        let registry = registry();
        let mut events = registry.subscribe();

        let removed = registry.on_detach(7);
        assert_eq!(removed, vec![VibratorRef::new(7, 1), VibratorRef::new(7, 5)]);
        assert!(registry.resolve(&VibratorIdentifier::device(7)).is_empty());
        assert_eq!(registry.device_ids(), vec![1]);

        let event = events.try_recv().unwrap();
        assert_eq!(event.kind, PlugKind::Detached);
        assert_eq!(event.vibrators, removed);
        assert!(registry.on_detach(7).is_empty());
    }

    #[test]
    fn test_reattach_replaces_entries() {
        let registry = registry();
        registry.on_attach(&descriptor(7, false, &[3]));
        assert_eq!(
            registry.resolve(&VibratorIdentifier::device(7)),
            vec![VibratorRef::new(7, 3)]
        );
    }

    #[test]
    fn test_detached_vibrator_gets_no_controller_until_reattach() {
        let registry = registry();
        let target = VibratorRef::new(7, 5);
        let held = registry.pool().controller(target).unwrap();

        registry.on_detach(7);
        assert!(held.is_retired());
        assert!(registry.pool().controller(target).is_none());

        registry.on_attach(&descriptor(7, false, &[5]));
        assert!(registry.pool().controller(target).is_some());
    }
}
