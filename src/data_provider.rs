use std::f64::consts::FRAC_PI_2;
use std::time::Duration;

use eframe::egui;
use futures::stream::BoxStream;
use futures::StreamExt;
use nalgebra::{Quaternion, UnitQuaternion};
use serde::{Deserialize, Serialize};

/// Fused attitude as reported by the platform, in radians.
///
/// `roll` is the rotation about the device's long (y) axis, `raw_pitch` the
/// rotation about its lateral (x) axis. The attitude decomposes as
/// `Rz(yaw)·Rx(pitch)·Ry(roll)`, so pitch spans ±π/2 and roll ±π. With a
/// z-vertical reference frame a device held upright reports `raw_pitch == π/2`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AttitudeSample {
    pub roll: f64,
    pub raw_pitch: f64,
}

impl AttitudeSample {
    pub fn from_quaternion(w: f64, x: f64, y: f64, z: f64) -> Self {
        let q = UnitQuaternion::from_quaternion(Quaternion::new(w, x, y, z));
        let r = q.to_rotation_matrix();
        let m = r.matrix();
        // z-x-y order: the bottom row is [-cos(p)·sin(r), sin(p), cos(p)·cos(r)]
        Self {
            roll: (-m[(2, 0)]).atan2(m[(2, 2)]),
            raw_pitch: m[(2, 1)].clamp(-1.0, 1.0).asin(),
        }
    }
}

/// Reference frame the attitude is expressed in. Both variants have z aligned
/// with gravity; they differ in how x is anchored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceFrame {
    #[default]
    MagneticNorthZVertical,
    TrueNorthZVertical,
}

impl ReferenceFrame {
    pub fn code(&self) -> &'static str {
        match self {
            ReferenceFrame::MagneticNorthZVertical => "magnetic",
            ReferenceFrame::TrueNorthZVertical => "true",
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum SensorError {
    #[error("{0}")]
    Unavailable(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serial(#[from] tokio_serial::Error),
}

pub trait DataProviderUi {
    fn show(&mut self, ui: &mut egui::Ui);
}

/// A platform that delivers fused attitude samples.
pub trait AttitudeSensor: DataProviderUi + Send {
    fn name(&self) -> &str;

    fn is_available(&self) -> bool;

    fn set_update_interval(&mut self, interval: Duration);

    /// Opens the sample stream. The stream ends when the source goes away.
    fn start(
        &mut self,
        frame: ReferenceFrame,
    ) -> Result<BoxStream<'static, AttitudeSample>, SensorError>;
}

/// Desktop stand-in for a handheld device: sways slowly around level.
pub struct SimulatedSensor {
    interval: Duration,
}

impl SimulatedSensor {
    pub fn new() -> Self {
        Self {
            interval: Duration::from_secs_f64(1.0 / 60.0),
        }
    }

    fn sample_at(t: f64) -> AttitudeSample {
        AttitudeSample {
            roll: 0.5 * (0.4 * t).sin(),
            raw_pitch: FRAC_PI_2 + 0.3 * (0.15 * t).sin(),
        }
    }
}

impl DataProviderUi for SimulatedSensor {
    fn show(&mut self, ui: &mut egui::Ui) {
        ui.heading("Simulated");
        ui.label(format!("{:.1} Hz", 1.0 / self.interval.as_secs_f64()));
    }
}

impl AttitudeSensor for SimulatedSensor {
    fn name(&self) -> &str {
        "simulated"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn set_update_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    fn start(
        &mut self,
        _frame: ReferenceFrame,
    ) -> Result<BoxStream<'static, AttitudeSample>, SensorError> {
        let ticker = tokio::time::interval(self.interval);
        let origin = tokio::time::Instant::now();

        Ok(futures::stream::unfold(ticker, move |mut ticker| async move {
            let now = ticker.tick().await;
            let t = now.duration_since(origin).as_secs_f64();
            Some((Self::sample_at(t), ticker))
        })
        .boxed())
    }
}

/// Sensor fed from an in-process channel. The receiver can be streamed once.
#[cfg(any(test, feature = "ros"))]
pub struct ChannelSensor {
    name: String,
    receiver: Option<tokio::sync::mpsc::UnboundedReceiver<AttitudeSample>>,
}

#[cfg(any(test, feature = "ros"))]
impl ChannelSensor {
    pub fn new(name: &str) -> (tokio::sync::mpsc::UnboundedSender<AttitudeSample>, Self) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (
            tx,
            Self {
                name: name.to_owned(),
                receiver: Some(rx),
            },
        )
    }

    pub fn unavailable(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            receiver: None,
        }
    }
}

#[cfg(any(test, feature = "ros"))]
impl DataProviderUi for ChannelSensor {
    fn show(&mut self, ui: &mut egui::Ui) {
        ui.heading(&self.name);
    }
}

#[cfg(any(test, feature = "ros"))]
impl AttitudeSensor for ChannelSensor {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_available(&self) -> bool {
        self.receiver.is_some()
    }

    fn set_update_interval(&mut self, _interval: Duration) {}

    fn start(
        &mut self,
        _frame: ReferenceFrame,
    ) -> Result<BoxStream<'static, AttitudeSample>, SensorError> {
        let mut receiver = self
            .receiver
            .take()
            .ok_or_else(|| SensorError::Unavailable(format!("{} already consumed", self.name)))?;
        Ok(futures::stream::poll_fn(move |cx| receiver.poll_recv(cx)).boxed())
    }
}

/// Runs `spin` on the blocking pool until stopped or dropped.
#[cfg(any(test, feature = "ros"))]
pub struct SpinLoop {
    running: std::sync::Arc<std::sync::atomic::AtomicBool>,
    handle: tokio::task::JoinHandle<()>,
}

#[cfg(any(test, feature = "ros"))]
impl SpinLoop {
    pub fn spawn(mut spin: impl FnMut() + Send + 'static) -> Self {
        use std::sync::atomic::{AtomicBool, Ordering};

        let running = std::sync::Arc::new(AtomicBool::new(true));
        let flag = std::sync::Arc::clone(&running);
        let handle = tokio::task::spawn_blocking(move || {
            while flag.load(Ordering::Acquire) {
                spin();
            }
        });
        Self { running, handle }
    }

    pub fn stop(&self) {
        self.running
            .store(false, std::sync::atomic::Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

#[cfg(any(test, feature = "ros"))]
impl Drop for SpinLoop {
    fn drop(&mut self) {
        self.stop();
    }
}
