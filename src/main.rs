use anyhow::Context;
use ble_hal::domain::settings::SettingsService;
use ble_hal::infrastructure::logging;
use ble_hal::{BleHal, HalEvent};
use std::time::Duration;
use tracing::{error, info, warn};

fn main() -> anyhow::Result<()> {
    let settings_service = SettingsService::new()?;
    let settings = settings_service.get().clone();

    let _log_guard = logging::init_logger(&settings.log_settings)?;
    info!(settings = %settings_service.path().display(), "Starting BLE HAL demo");
    match settings_service.save_if_missing() {
        Ok(true) => info!("Wrote default settings"),
        Ok(false) => {}
        Err(e) => warn!("Could not write default settings: {:#}", e),
    }

    let config = settings.hal_config().on_event(|event| match event {
        HalEvent::ServiceUp => info!("BlueZ service is UP"),
        HalEvent::ServiceDown => info!("BlueZ service is DOWN"),
        other => info!(?other, "Received HAL event"),
    });

    let mut hal = BleHal::new();
    if let Err(e) = hal.init(config, None) {
        error!("Failed to initialize BLE HAL: {}", e);
        return Err(e).context("BLE HAL initialization failed");
    }

    info!(
        "BLE HAL initialized. Running for {} seconds (or press Ctrl+C)...",
        settings.run_seconds
    );

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;
    rt.block_on(async {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(settings.run_seconds)) => {}
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("Failed to listen for Ctrl+C: {}", e);
                } else {
                    info!("Interrupted");
                }
            }
        }
    });

    info!("Deinitializing BLE HAL...");
    hal.deinit();
    info!("Finished");
    Ok(())
}
