//! Turns fused attitude samples into a display-ready roll/pitch pair and a
//! level classification, published through a latest-value-wins channel.

use std::f64::consts::{FRAC_PI_2, PI};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use stream_cancel::StreamExt as _;
use tokio::sync::watch;

use crate::data_provider::{
    AttitudeSample, AttitudeSensor, DataProviderUi, ReferenceFrame, SensorError,
};

/// Roll tolerance around 0 and π, in radians (~22.9°).
pub const LEVEL_TOLERANCE: f64 = 0.4;

pub const DEFAULT_SAMPLE_RATE_HZ: f64 = 60.0;

/// Level when the long axis is horizontal, upright or upside-down.
pub fn is_level(roll: f64) -> bool {
    roll.abs() < LEVEL_TOLERANCE || (roll - PI).abs() < LEVEL_TOLERANCE
}

/// Raw pitch is π/2 out of phase with "pitch from horizontal"; 0° is level
/// and the value grows as the device tilts up.
pub fn pitch_degrees(raw_pitch: f64) -> f64 {
    -(raw_pitch - FRAC_PI_2) * (180.0 / PI)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrientationState {
    roll: f64,
    pitch_degrees: f64,
    is_level: bool,
}

impl OrientationState {
    pub fn new(roll: f64, pitch_degrees: f64) -> Self {
        Self {
            roll,
            pitch_degrees,
            is_level: is_level(roll),
        }
    }

    pub fn roll(&self) -> f64 {
        self.roll
    }

    pub fn pitch_degrees(&self) -> f64 {
        self.pitch_degrees
    }

    pub fn is_level(&self) -> bool {
        self.is_level
    }
}

/// What consumers of the tracker observe.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum OrientationReading {
    /// No sample has arrived yet.
    #[default]
    Pending,
    Unavailable,
    Ready(OrientationState),
}

#[derive(thiserror::Error, Debug)]
pub enum TrackerError {
    #[error("orientation sensor '{sensor}' is unavailable")]
    SensorUnavailable {
        sensor: String,
        #[source]
        source: Option<SensorError>,
    },
}

pub struct OrientationTracker {
    sensor: Box<dyn AttitudeSensor>,
    publisher: Arc<watch::Sender<OrientationReading>>,
    trigger: Option<stream_cancel::Trigger>,
    /// Cleared by `stop` or by the stream task when the source ends.
    streaming: Arc<AtomicBool>,
    unavailable_reported: bool,
}

impl OrientationTracker {
    pub fn new(sensor: Box<dyn AttitudeSensor>) -> Self {
        let (publisher, _) = watch::channel(OrientationReading::Pending);
        Self {
            sensor,
            publisher: Arc::new(publisher),
            trigger: None,
            streaming: Arc::new(AtomicBool::new(false)),
            unavailable_reported: false,
        }
    }

    /// The transform applied to every incoming sample.
    pub fn on_sample(raw: AttitudeSample) -> OrientationState {
        OrientationState::new(raw.roll, pitch_degrees(raw.raw_pitch))
    }

    /// Draws the source settings, read-only while streaming.
    pub fn show_sensor(&mut self, ui: &mut eframe::egui::Ui) {
        let running = self.is_running();
        ui.add_enabled_ui(!running, |ui| self.sensor.show(ui));
    }

    /// Swaps the attitude source. A running stream is stopped first.
    pub fn replace_sensor(&mut self, sensor: Box<dyn AttitudeSensor>) {
        self.stop();
        self.sensor = sensor;
        self.unavailable_reported = false;
        self.publisher.send_replace(OrientationReading::Pending);
    }

    pub fn subscribe(&self) -> watch::Receiver<OrientationReading> {
        self.publisher.subscribe()
    }

    pub fn latest(&self) -> OrientationReading {
        *self.publisher.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.trigger.is_some() && self.streaming.load(Ordering::Acquire)
    }

    pub fn configure(&mut self, sample_rate_hz: f64) {
        if !self.sensor.is_available() {
            self.mark_unavailable();
            return;
        }
        if !(sample_rate_hz.is_finite() && sample_rate_hz > 0.0) {
            log::warn!("ignoring sample rate {sample_rate_hz} Hz");
            return;
        }

        let interval = Duration::from_secs_f64(1.0 / sample_rate_hz);
        log::debug!(
            "{}: update interval {:.2} ms",
            self.sensor.name(),
            interval.as_secs_f64() * 1000.0
        );
        self.sensor.set_update_interval(interval);
    }

    /// Starts streaming. Must be called within a tokio runtime.
    pub fn start(&mut self, frame: ReferenceFrame) -> Result<(), TrackerError> {
        if self.is_running() {
            return Ok(());
        }
        self.trigger = None;

        let stream = if self.sensor.is_available() {
            self.sensor.start(frame).map_err(Some)
        } else {
            Err(None)
        };

        let stream = match stream {
            Ok(stream) => stream,
            Err(source) => {
                match &source {
                    Some(e) => log::error!("{}: cannot start: {e}", self.sensor.name()),
                    None => log::error!("{}: sensor not available", self.sensor.name()),
                }
                self.unavailable_reported = true;
                self.publisher.send_replace(OrientationReading::Unavailable);
                return Err(TrackerError::SensorUnavailable {
                    sensor: self.sensor.name().to_owned(),
                    source,
                });
            }
        };

        log::info!("{}: started ({frame:?})", self.sensor.name());
        self.unavailable_reported = false;
        if matches!(self.latest(), OrientationReading::Unavailable) {
            self.publisher.send_replace(OrientationReading::Pending);
        }

        let (trigger, tripwire) = stream_cancel::Tripwire::new();
        self.trigger = Some(trigger);
        self.streaming = Arc::new(AtomicBool::new(true));

        let publisher = Arc::clone(&self.publisher);
        let streaming = Arc::clone(&self.streaming);
        let name = self.sensor.name().to_owned();
        tokio::spawn(async move {
            let mut samples = stream.take_until_if(tripwire);
            let mut sample_count: u64 = 0;

            while let Some(sample) = samples.next().await {
                publisher.send_replace(OrientationReading::Ready(Self::on_sample(sample)));
                sample_count += 1;
                if sample_count % 600 == 0 {
                    log::trace!("{name}: {sample_count} samples processed");
                }
            }
            if streaming.swap(false, Ordering::AcqRel) {
                log::warn!("{name}: source closed after {sample_count} samples");
                publisher.send_replace(OrientationReading::Unavailable);
            } else {
                log::debug!("{name}: stream ended after {sample_count} samples");
            }
        });

        Ok(())
    }

    pub fn stop(&mut self) {
        self.streaming.store(false, Ordering::Release);
        if self.trigger.take().is_some() {
            log::info!("{}: stopped", self.sensor.name());
        }
    }

    fn mark_unavailable(&mut self) {
        if !self.unavailable_reported {
            log::warn!("{}: orientation sensor unavailable", self.sensor.name());
            self.unavailable_reported = true;
        }
        self.publisher.send_replace(OrientationReading::Unavailable);
    }
}

impl Drop for OrientationTracker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::data_provider::ChannelSensor;
    use approx::assert_relative_eq;

    const STEP: Duration = Duration::from_secs(5);

    fn sample(roll: f64) -> AttitudeSample {
        AttitudeSample {
            roll,
            raw_pitch: FRAC_PI_2,
        }
    }

    /// Records the interval it is configured with and whether it was dropped.
    #[derive(Default)]
    struct RecordingSensor {
        interval: Arc<std::sync::Mutex<Option<Duration>>>,
        dropped: Arc<AtomicBool>,
        shown_enabled: Arc<std::sync::Mutex<Option<bool>>>,
    }

    impl DataProviderUi for RecordingSensor {
        fn show(&mut self, ui: &mut eframe::egui::Ui) {
            *self.shown_enabled.lock().unwrap() = Some(ui.is_enabled());
        }
    }

    impl AttitudeSensor for RecordingSensor {
        fn name(&self) -> &str {
            "recording"
        }

        fn is_available(&self) -> bool {
            true
        }

        fn set_update_interval(&mut self, interval: Duration) {
            *self.interval.lock().unwrap() = Some(interval);
        }

        fn start(
            &mut self,
            _frame: ReferenceFrame,
        ) -> Result<futures::stream::BoxStream<'static, AttitudeSample>, SensorError> {
            Ok(futures::stream::pending().boxed())
        }
    }

    impl Drop for RecordingSensor {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::Release);
        }
    }

    async fn wait_for_roll(rx: &mut watch::Receiver<OrientationReading>, roll: f64) {
        tokio::time::timeout(STEP, async {
            loop {
                if let OrientationReading::Ready(state) = *rx.borrow_and_update() {
                    if state.roll() == roll {
                        return;
                    }
                }
                rx.changed().await.unwrap();
            }
        })
        .await
        .unwrap();
    }

    #[test]
    fn level_band_around_zero_and_pi() {
        for r in [0.0, 0.39, -0.39, PI, PI - 0.39, PI + 0.39] {
            assert!(is_level(r), "{r} should be level");
        }
        for r in [0.4, -0.4, 0.41, PI - 0.41, PI + 0.41, 1.0, FRAC_PI_2, 4.0, 6.0] {
            assert!(!is_level(r), "{r} should not be level");
        }
    }

    #[test]
    fn level_classification_over_a_full_turn() {
        let steps = 720;
        for i in 0..steps {
            let r = i as f64 * std::f64::consts::TAU / steps as f64;
            let expected = r.abs() < 0.4 || (r - PI).abs() < 0.4;
            assert_eq!(is_level(r), expected, "roll {r}");
        }
    }

    #[test]
    fn pitch_is_degrees_from_horizontal() {
        assert_relative_eq!(pitch_degrees(FRAC_PI_2), 0.0);
        assert_relative_eq!(pitch_degrees(0.0), 90.0, epsilon = 1e-12);
        assert_relative_eq!(pitch_degrees(PI), -90.0, epsilon = 1e-12);
    }

    #[test]
    fn on_sample_passes_roll_through() {
        let state = OrientationTracker::on_sample(AttitudeSample {
            roll: 2.9,
            raw_pitch: 0.0,
        });
        assert_eq!(state.roll(), 2.9);
        assert!(state.is_level());
        assert_relative_eq!(state.pitch_degrees(), 90.0, epsilon = 1e-12);
    }

    #[test]
    fn state_level_follows_roll() {
        assert!(OrientationState::new(0.1, 45.0).is_level());
        assert!(!OrientationState::new(1.2, 0.0).is_level());
    }

    #[tokio::test]
    async fn published_states_follow_sample_order() {
        let (tx, sensor) = ChannelSensor::new("channel");
        let mut tracker = OrientationTracker::new(Box::new(sensor));
        let mut rx = tracker.subscribe();
        tracker.configure(DEFAULT_SAMPLE_RATE_HZ);
        tracker.start(ReferenceFrame::default()).unwrap();

        for roll in [0.1, 0.2, 0.3] {
            tx.send(sample(roll)).unwrap();
        }

        tokio::time::timeout(STEP, async {
            let mut last = f64::NEG_INFINITY;
            loop {
                rx.changed().await.unwrap();
                if let OrientationReading::Ready(state) = *rx.borrow_and_update() {
                    assert!(state.roll() >= last, "{} after {last}", state.roll());
                    last = state.roll();
                    if last == 0.3 {
                        break;
                    }
                }
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let (tx, sensor) = ChannelSensor::new("channel");
        let mut tracker = OrientationTracker::new(Box::new(sensor));
        let mut rx = tracker.subscribe();

        tracker.start(ReferenceFrame::default()).unwrap();
        tracker.start(ReferenceFrame::default()).unwrap();
        assert!(tracker.is_running());

        tx.send(sample(0.25)).unwrap();
        wait_for_roll(&mut rx, 0.25).await;
    }

    #[tokio::test]
    async fn no_updates_after_stop() {
        let (tx, sensor) = ChannelSensor::new("channel");
        let mut tracker = OrientationTracker::new(Box::new(sensor));
        let mut rx = tracker.subscribe();
        tracker.start(ReferenceFrame::default()).unwrap();

        tx.send(sample(0.1)).unwrap();
        wait_for_roll(&mut rx, 0.1).await;

        tracker.stop();
        tracker.stop();
        assert!(!tracker.is_running());

        let _ = tx.send(sample(1.5));
        tokio::time::sleep(Duration::from_millis(50)).await;
        match tracker.latest() {
            OrientationReading::Ready(state) => assert_eq!(state.roll(), 0.1),
            other => panic!("unexpected reading {other:?}"),
        }
    }

    #[tokio::test]
    async fn unavailable_sensor_is_reported_not_zeroed() {
        let mut tracker = OrientationTracker::new(Box::new(ChannelSensor::unavailable("none")));
        assert_eq!(tracker.latest(), OrientationReading::Pending);

        tracker.configure(DEFAULT_SAMPLE_RATE_HZ);
        assert_eq!(tracker.latest(), OrientationReading::Unavailable);

        let err = tracker.start(ReferenceFrame::default()).unwrap_err();
        assert!(matches!(err, TrackerError::SensorUnavailable { ref sensor, .. } if sensor == "none"));
        assert!(!tracker.is_running());
        assert_eq!(tracker.latest(), OrientationReading::Unavailable);
    }

    #[tokio::test]
    async fn replacing_the_sensor_resets_the_reading() {
        let mut tracker = OrientationTracker::new(Box::new(ChannelSensor::unavailable("none")));
        assert!(tracker.start(ReferenceFrame::default()).is_err());

        let (tx, sensor) = ChannelSensor::new("channel");
        tracker.replace_sensor(Box::new(sensor));
        assert_eq!(tracker.latest(), OrientationReading::Pending);

        let mut rx = tracker.subscribe();
        tracker.start(ReferenceFrame::default()).unwrap();
        tx.send(sample(PI)).unwrap();
        wait_for_roll(&mut rx, PI).await;
        assert!(matches!(tracker.latest(), OrientationReading::Ready(s) if s.is_level()));
    }

    #[tokio::test]
    async fn closed_source_is_reported_unavailable() {
        let (tx, sensor) = ChannelSensor::new("channel");
        let mut tracker = OrientationTracker::new(Box::new(sensor));
        let mut rx = tracker.subscribe();
        tracker.start(ReferenceFrame::default()).unwrap();

        tx.send(sample(0.2)).unwrap();
        wait_for_roll(&mut rx, 0.2).await;
        drop(tx);

        tokio::time::timeout(STEP, rx.wait_for(|r| *r == OrientationReading::Unavailable))
            .await
            .unwrap()
            .unwrap();
        assert!(!tracker.is_running());
    }

    #[test]
    fn configure_sets_the_update_interval() {
        let sensor = RecordingSensor::default();
        let interval = Arc::clone(&sensor.interval);
        let mut tracker = OrientationTracker::new(Box::new(sensor));

        tracker.configure(DEFAULT_SAMPLE_RATE_HZ);
        let configured = interval.lock().unwrap().unwrap();
        assert_relative_eq!(configured.as_secs_f64(), 1.0 / 60.0, epsilon = 1e-9);
        assert_relative_eq!(configured.as_secs_f64() * 1000.0, 16.667, epsilon = 1e-3);

        tracker.configure(-5.0);
        tracker.configure(f64::INFINITY);
        assert_eq!(interval.lock().unwrap().unwrap(), configured);

        tracker.configure(10.0);
        let configured = interval.lock().unwrap().unwrap();
        assert_relative_eq!(configured.as_secs_f64(), 0.1, epsilon = 1e-9);
    }

    #[tokio::test]
    async fn replaced_sensor_is_released() {
        let sensor = RecordingSensor::default();
        let dropped = Arc::clone(&sensor.dropped);
        let mut tracker = OrientationTracker::new(Box::new(sensor));
        tracker.start(ReferenceFrame::default()).unwrap();
        assert!(tracker.is_running());

        tracker.replace_sensor(Box::new(ChannelSensor::unavailable("none")));
        assert!(dropped.load(Ordering::Acquire));
        assert!(!tracker.is_running());
    }

    fn draw_sensor(ctx: &eframe::egui::Context, tracker: &mut OrientationTracker) {
        let _ = ctx.run(Default::default(), |ctx| {
            eframe::egui::CentralPanel::default().show(ctx, |ui| tracker.show_sensor(ui));
        });
    }

    #[tokio::test]
    async fn source_settings_are_locked_while_streaming() {
        let sensor = RecordingSensor::default();
        let shown_enabled = Arc::clone(&sensor.shown_enabled);
        let mut tracker = OrientationTracker::new(Box::new(sensor));
        let ctx = eframe::egui::Context::default();

        draw_sensor(&ctx, &mut tracker);
        assert_eq!(*shown_enabled.lock().unwrap(), Some(true));

        tracker.start(ReferenceFrame::default()).unwrap();
        draw_sensor(&ctx, &mut tracker);
        assert_eq!(*shown_enabled.lock().unwrap(), Some(false));

        tracker.stop();
        draw_sensor(&ctx, &mut tracker);
        assert_eq!(*shown_enabled.lock().unwrap(), Some(true));
    }

    #[test]
    fn upright_device_with_roll_is_not_level() {
        use nalgebra::{UnitQuaternion, Vector3};

        let q = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), 1.4)
            * UnitQuaternion::from_axis_angle(&Vector3::y_axis(), 0.8);
        let state =
            OrientationTracker::on_sample(AttitudeSample::from_quaternion(q.w, q.i, q.j, q.k));
        assert!(!state.is_level());
        assert_relative_eq!(state.roll(), 0.8, epsilon = 1e-9);
        assert_relative_eq!(state.pitch_degrees(), -(1.4 - FRAC_PI_2).to_degrees(), epsilon = 1e-6);

        let q = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), PI);
        let state =
            OrientationTracker::on_sample(AttitudeSample::from_quaternion(q.w, q.i, q.j, q.k));
        assert!(state.is_level());
        assert_relative_eq!(state.pitch_degrees(), 90.0, epsilon = 1e-6);
    }

    #[test]
    fn invalid_sample_rate_is_ignored() {
        let (_tx, sensor) = ChannelSensor::new("channel");
        let mut tracker = OrientationTracker::new(Box::new(sensor));
        tracker.configure(0.0);
        tracker.configure(f64::NAN);
        assert_eq!(tracker.latest(), OrientationReading::Pending);
    }
}
