use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn, Level};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::FmtSubscriber;
use vibratord::hal::{DeviceDescriptor, SimulatedHal, VibratorSlot};
use vibratord::model::{Usage, VibrateRequest, VibratorCapability, VibratorIdentifier};
use vibratord::policy::CallerContext;
use vibratord::{ServiceConfig, VibratorService};

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;
    let set_level = setup_logging_env(Level::INFO)?;

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = ServiceConfig::load(config_path.as_deref())
        .await
        .map_err(|e| eyre!("Failed to load config: {}", e))?;
    set_level(config.logging.max_level())?;

    let hal = Arc::new(simulated_hal(&config));
    let service = VibratorService::spawn(&config, hal);

    let mut plug_events = service.subscribe_plug_events();
    let _plug_logger = tokio::spawn(async move {
        loop {
            match plug_events.recv().await {
                Ok(event) => info!(
                    "Plug event {:?} for device {} ({} vibrators) at {}",
                    event.kind,
                    event.device_id,
                    event.vibrators.len(),
                    event.at.format("%H:%M:%S%.3f")
                ),
                Err(RecvError::Lagged(skipped)) => warn!("Missed {} plug events", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let dispatcher = service.dispatcher().clone();
    for vibrator in dispatcher.get_vibrator_list(&VibratorIdentifier::all_local()) {
        info!(
            "Vibrator {}-{} '{}' position {} hd={}",
            vibrator.device_id,
            vibrator.vibrator_id,
            vibrator.device_name,
            vibrator.position,
            vibrator.supports_hd_haptic
        );
    }

    if config.startup_pulse_ms > 0 {
        let request = VibrateRequest::once(config.startup_pulse_ms)
            .with_usage(Usage::PhysicalFeedback)
            .with_system_usage(true);
        match dispatcher.start_vibration(
            &VibratorIdentifier::all_local(),
            request,
            &CallerContext::system(),
        ) {
            Ok(outcome) => info!("Start-up pulse on {} vibrators", outcome.admitted().len()),
            Err(e) => warn!("Start-up pulse not played: {}", e),
        }
    }

    info!("Running, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| eyre!("Failed to wait for Ctrl-C: {}", e))?;

    service.shutdown().await;
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    Ok(())
}

/// Installs the subscriber at `level`; the returned setter adjusts it once the config is read
fn setup_logging_env(level: Level) -> Result<impl Fn(Level) -> Result<()>> {
    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .with_filter_reloading();
    let handle = builder.reload_handle();
    builder
        .try_init()
        .map_err(|e| eyre!("Failed to install log subscriber: {}", e))?;

    Ok(move |level: Level| {
        handle
            .reload(LevelFilter::from_level(level))
            .map_err(|e| eyre!("Failed to set log level: {}", e))
    })
}

fn simulated_hal(config: &ServiceConfig) -> SimulatedHal {
    let hal = SimulatedHal::new();
    if config.devices.is_empty() {
        info!("No devices configured, simulating a built-in two-motor vibrator");
        hal.add_device(DeviceDescriptor {
            device_id: 1,
            device_name: "builtin".to_string(),
            is_local: true,
            vibrators: vec![
                VibratorSlot {
                    vibrator_id: 1,
                    position: 1,
                },
                VibratorSlot {
                    vibrator_id: 2,
                    position: 2,
                },
            ],
            capability: VibratorCapability::hd(),
        });
    }
    for device in &config.devices {
        hal.add_device(device.clone());
    }
    hal
}
