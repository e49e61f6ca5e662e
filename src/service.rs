//! Service wiring
//!
//! ```text
//!                  ┌──────────── VibratorService ────────────┐
//! settings ─mpsc─► │ PolicySubscription ─► PolicyStore        │
//!                  │                          ▲               │
//! callers ───────► │ Dispatcher ─► AdmissionController        │
//!                  │     │                                    │
//!                  │     └─► VibratorRegistry ─► ControllerPool ─► VibratorHal
//!                  └──────────────────────────────────────────┘
//! ```

use crate::codec::TimelineTransform;
use crate::config::ServiceConfig;
use crate::dispatcher::Dispatcher;
use crate::hal::VibratorHal;
use crate::playback::ControllerPool;
use crate::policy::{
    AdmissionController, PolicyStore, PolicySubscription, SettingChange, StaticPolicySource,
};
use crate::registry::{PlugEvent, VibratorRegistry};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const SETTINGS_CHANNEL_CAPACITY: usize = 32;

pub struct VibratorService {
    dispatcher: Arc<Dispatcher>,
    settings_tx: mpsc::Sender<SettingChange>,
    cancel: CancellationToken,
    policy_task: JoinHandle<()>,
}

impl VibratorService {
    /// Builds every subsystem and attaches the devices the HAL reports
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(config: &ServiceConfig, hal: Arc<dyn VibratorHal>) -> Self {
        let pool = Arc::new(ControllerPool::new(hal.clone(), config.playback.clone()));
        let registry = Arc::new(VibratorRegistry::new(pool));

        match hal.vibrator_list() {
            Ok(devices) if devices.is_empty() => {
                warn!("No vibrators reported, waiting for attach events");
            }
            Ok(devices) => {
                for device in &devices {
                    registry.on_attach(device);
                }
            }
            Err(e) => error!("Failed to enumerate vibrators: {}", e),
        }

        let store = Arc::new(PolicyStore::new(StaticPolicySource(config.policy.clone())));
        let admission = AdmissionController::new(store.clone());
        let dispatcher = Arc::new(Dispatcher::new(
            registry,
            admission,
            hal,
            Arc::new(TimelineTransform),
            config.limits.clone(),
        ));

        let (settings_tx, settings_rx) = mpsc::channel(SETTINGS_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let policy_task = PolicySubscription::spawn(store, settings_rx, cancel.clone());

        info!("Vibrator service started");
        Self {
            dispatcher,
            settings_tx,
            cancel,
            policy_task,
        }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Sender for push notifications of the settings store
    pub fn settings(&self) -> mpsc::Sender<SettingChange> {
        self.settings_tx.clone()
    }

    pub fn subscribe_plug_events(&self) -> broadcast::Receiver<PlugEvent> {
        self.dispatcher.registry().subscribe()
    }

    /// Ends the policy subscription and stops every playback thread
    pub async fn shutdown(self) {
        info!("Shutting down vibrator service");
        self.cancel.cancel();
        if let Err(e) = self.policy_task.await {
            warn!("Policy subscription ended abnormally: {}", e);
        }

        let pool = self.dispatcher.registry().pool().clone();
        if let Err(e) = tokio::task::spawn_blocking(move || pool.shutdown_all()).await {
            warn!("Failed to stop playback threads: {}", e);
        }
        info!("Vibrator service stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::{DeviceDescriptor, SimulatedHal, VibratorSlot};
    use crate::model::{Usage, VibrateRequest, VibratorCapability, VibratorIdentifier};
    use crate::policy::{CallerContext, IgnoreReason, RingerMode};
    use crate::error::VibratorError;
    use std::time::Duration;

    fn hal() -> Arc<SimulatedHal> {
        Arc::new(SimulatedHal::new().with_device(DeviceDescriptor {
            device_id: 1,
            device_name: "builtin".to_string(),
            is_local: true,
            vibrators: vec![VibratorSlot {
                vibrator_id: 1,
                position: 0,
            }],
            capability: VibratorCapability::hd(),
        }))
    }

    #[tokio::test]
    async fn test_spawn_attaches_reported_devices() {
        let service = VibratorService::spawn(&ServiceConfig::default(), hal());
        let list = service
            .dispatcher()
            .get_vibrator_list(&VibratorIdentifier::all_local());
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].device_name, "builtin");
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_settings_reach_admission() {
        let service = VibratorService::spawn(&ServiceConfig::default(), hal());
        service
            .settings()
            .send(SettingChange::RingerMode(RingerMode::Silent))
            .await
            .unwrap();

        // the subscription applies the change asynchronously
        let store = service.dispatcher().admission().policy().clone();
        for _ in 0..100 {
            if store.snapshot().ringer_mode == RingerMode::Silent {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let result = service.dispatcher().start_vibration(
            &VibratorIdentifier::all_local(),
            VibrateRequest::once(50).with_usage(Usage::Ring),
            &CallerContext::application(),
        );
        assert!(matches!(
            result,
            Err(VibratorError::Ignored(IgnoreReason::RingerSilent))
        ));
        service.shutdown().await;
    }
}
