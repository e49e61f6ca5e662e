use super::{PlaybackController, PlaybackTiming};
use crate::hal::VibratorHal;
use crate::model::VibratorRef;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Owns the playback controllers, one per physical vibrator
///
/// The map lock is held only to look controllers up; starting and stopping
/// happen on the controller itself so vibrators never wait on each other.
///
/// A retired vibrator gets no new controller until it is revived by a later
/// attach. After `shutdown_all` the pool hands out nothing.
pub struct ControllerPool {
    hal: Arc<dyn VibratorHal>,
    timing: PlaybackTiming,
    slots: Mutex<PoolSlots>,
}

#[derive(Default)]
struct PoolSlots {
    controllers: HashMap<VibratorRef, Arc<PlaybackController>>,
    retired: HashSet<VibratorRef>,
    closed: bool,
}

impl ControllerPool {
    pub fn new(hal: Arc<dyn VibratorHal>, timing: PlaybackTiming) -> Self {
        Self {
            hal,
            timing,
            slots: Mutex::new(PoolSlots::default()),
        }
    }

    fn slots(&self) -> MutexGuard<'_, PoolSlots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn timing(&self) -> &PlaybackTiming {
        &self.timing
    }

    /// Controller for `target`, created on first use
    ///
    /// `None` once `target` was retired or the pool was shut down.
    pub fn controller(&self, target: VibratorRef) -> Option<Arc<PlaybackController>> {
        let mut slots = self.slots();
        if slots.closed || slots.retired.contains(&target) {
            debug!("No controller for retired vibrator {}", target);
            return None;
        }
        let controller = slots.controllers.entry(target).or_insert_with(|| {
            debug!("Creating playback controller for vibrator {}", target);
            Arc::new(PlaybackController::new(
                target,
                self.hal.clone(),
                self.timing.clone(),
            ))
        });
        Some(controller.clone())
    }

    pub fn get(&self, target: VibratorRef) -> Option<Arc<PlaybackController>> {
        self.slots().controllers.get(&target).cloned()
    }

    /// Makes retired `targets` eligible for controllers again
    pub fn revive(&self, targets: &[VibratorRef]) {
        let mut slots = self.slots();
        for target in targets {
            slots.retired.remove(target);
        }
    }

    /// Stops `target`, joins its thread and forgets the controller
    ///
    /// Later `controller` calls for `target` return `None` until `revive`.
    pub fn retire(&self, target: VibratorRef) -> bool {
        let controller = {
            let mut slots = self.slots();
            slots.retired.insert(target);
            slots.controllers.remove(&target)
        };
        match controller {
            Some(controller) => {
                controller.shutdown();
                info!("Playback controller for vibrator {} retired", target);
                true
            }
            None => false,
        }
    }

    pub fn targets(&self) -> Vec<VibratorRef> {
        let mut targets: Vec<VibratorRef> = self.slots().controllers.keys().copied().collect();
        targets.sort();
        targets
    }

    pub fn shutdown_all(&self) {
        let controllers: Vec<Arc<PlaybackController>> = {
            let mut slots = self.slots();
            slots.closed = true;
            slots.controllers.drain().map(|(_, c)| c).collect()
        };
        for controller in controllers {
            controller.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::SimulatedHal;

    #[test]
    fn test_controllers_are_reused() {
        let pool = ControllerPool::new(Arc::new(SimulatedHal::new()), PlaybackTiming::default());
        let a = pool.controller(VibratorRef::new(1, 0)).unwrap();
        let b = pool.controller(VibratorRef::new(1, 0)).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(pool.targets(), vec![VibratorRef::new(1, 0)]);
    }

    #[test]
    fn test_retire_forgets_controller() {
        let pool = ControllerPool::new(Arc::new(SimulatedHal::new()), PlaybackTiming::default());
        pool.controller(VibratorRef::new(1, 0));
        assert!(pool.retire(VibratorRef::new(1, 0)));
        assert!(pool.get(VibratorRef::new(1, 0)).is_none());
        assert!(!pool.retire(VibratorRef::new(1, 0)));
    }

    #[test]
    fn test_retired_vibrator_gets_no_new_controller() {
        let pool = ControllerPool::new(Arc::new(SimulatedHal::new()), PlaybackTiming::default());
        let target = VibratorRef::new(1, 0);
        let held = pool.controller(target).unwrap();
        pool.retire(target);

        assert!(held.is_retired());
        assert!(pool.controller(target).is_none());
        assert!(pool.targets().is_empty());

        pool.revive(&[target]);
        let fresh = pool.controller(target).unwrap();
        assert!(!Arc::ptr_eq(&held, &fresh));
        assert!(!fresh.is_retired());
    }

    #[test]
    fn test_shutdown_all_closes_pool() {
        let pool = ControllerPool::new(Arc::new(SimulatedHal::new()), PlaybackTiming::default());
        pool.controller(VibratorRef::new(1, 0));
        pool.shutdown_all();
        assert!(pool.targets().is_empty());
        assert!(pool.controller(VibratorRef::new(2, 0)).is_none());
    }
}
