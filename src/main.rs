#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")] // hide console window on Windows in release

mod ui;

use std::path::Path;

use clinometer::config::{self, AppConfig, SourceKind};
use clinometer::data_provider::{AttitudeSensor, SimulatedSensor};
use clinometer::orientation::OrientationTracker;
use clinometer::serial_data_provider::SerialDataProvider;
use tokio::time::Duration;

fn attitude_sensor(config: &AppConfig) -> Box<dyn AttitudeSensor> {
    match config.source {
        SourceKind::Serial => Box::new(SerialDataProvider::new(
            config.serial.port.clone(),
            config.serial.baud_rate,
        )),
        SourceKind::Simulated => Box::new(SimulatedSensor::new()),
        #[cfg(feature = "ros")]
        SourceKind::Ros => match clinometer::ros_data_provider::RosAttitudeSensor::subscribe(
            &config.ros.topic,
        ) {
            Ok(sensor) => Box::new(sensor),
            Err(e) => {
                log::error!("cannot subscribe to {}: {e}", config.ros.topic);
                Box::new(clinometer::data_provider::ChannelSensor::unavailable(
                    &config.ros.topic,
                ))
            }
        },
        #[cfg(not(feature = "ros"))]
        SourceKind::Ros => {
            log::warn!("built without the `ros` feature, using the serial source");
            Box::new(SerialDataProvider::new(
                config.serial.port.clone(),
                config.serial.baud_rate,
            ))
        }
    }
}

fn main() -> eframe::Result {
    env_logger::init();

    let rt = tokio::runtime::Runtime::new().expect("Unable to create Runtime");
    let handle = rt.handle().clone();

    std::thread::spawn(move || {
        rt.block_on(async {
            loop {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
        })
    });
    let _enter = handle.enter();

    let config = AppConfig::load_or_default(Path::new(config::CONFIG_FILE)).unwrap_or_else(|e| {
        log::error!("{}: {e}, using defaults", config::CONFIG_FILE);
        AppConfig::default()
    });

    let tracker = OrientationTracker::new(attitude_sensor(&config));
    ui::init(config, tracker)
}
