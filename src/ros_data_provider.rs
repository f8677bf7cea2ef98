use crate::data_provider::*;
use eframe::egui;
use futures::stream::BoxStream;
use futures::{future, StreamExt};
use r2r::sensor_msgs;
use r2r::QosProfile;
use std::time::Duration;

/// Orientation of a `sensor_msgs/Imu` topic. The node is spun until the
/// sensor is dropped.
pub struct RosAttitudeSensor {
    inner: ChannelSensor,
    _spin: SpinLoop,
}

impl RosAttitudeSensor {
    pub fn subscribe(topic: &str) -> Result<Self, r2r::Error> {
        let (attitude_tx, inner) = ChannelSensor::new(topic);

        let ctx = r2r::Context::create()?;
        let mut node = r2r::Node::create(ctx, "clinometer", "")?;

        let imu_sub = node.subscribe::<sensor_msgs::msg::Imu>(topic, QosProfile::default())?;
        log::info!("subscribed to {topic}");

        tokio::task::spawn(async move {
            imu_sub
                .for_each(move |msg| {
                    let q = msg.orientation;
                    // A closed receiver means the tracker stopped.
                    attitude_tx
                        .send(AttitudeSample::from_quaternion(q.w, q.x, q.y, q.z))
                        .ok();
                    future::ready(())
                })
                .await
        });

        let spin = SpinLoop::spawn(move || node.spin_once(Duration::from_millis(1)));

        Ok(Self { inner, _spin: spin })
    }
}

impl DataProviderUi for RosAttitudeSensor {
    fn show(&mut self, ui: &mut egui::Ui) {
        ui.heading("ROS");
        ui.label(self.inner.name());
    }
}

impl AttitudeSensor for RosAttitudeSensor {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn is_available(&self) -> bool {
        self.inner.is_available()
    }

    fn set_update_interval(&mut self, interval: Duration) {
        self.inner.set_update_interval(interval);
    }

    fn start(
        &mut self,
        frame: ReferenceFrame,
    ) -> Result<BoxStream<'static, AttitudeSample>, SensorError> {
        self.inner.start(frame)
    }
}
