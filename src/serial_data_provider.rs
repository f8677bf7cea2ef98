use crate::data_provider::*;
use bytes::BytesMut;
use core::str;
use eframe::egui;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_serial::{SerialPort, SerialPortBuilderExt};
use tokio_util::codec::Decoder;

pub const BAUDRATES: [u32; 9] = [
    4800, 9600, 19200, 38400, 57600, 115200, 230400, 460800, 921600,
];

/// Attitude streamed by an external device over a serial line (8-N-1).
///
/// The device sends one sample per line, either `att <roll> <pitch>` in
/// radians or `quat <w> <x> <y> <z>`. On open it receives `rate <hz>` and
/// `frame <magnetic|true>`.
pub struct SerialDataProvider {
    port_name: Option<String>,
    baud_rate: u32,
    interval: Duration,
}

impl SerialDataProvider {
    pub fn new(port_name: Option<String>, baud_rate: u32) -> Self {
        Self {
            port_name,
            baud_rate,
            interval: Duration::from_secs_f64(1.0 / 60.0),
        }
    }

    fn available_port_names() -> Vec<String> {
        match tokio_serial::available_ports() {
            Ok(ports) => ports
                .into_iter()
                .map(|p| p.port_name)
                // remove /dev/ttySx.
                .filter(|name| !name.contains("/dev/ttyS"))
                .collect(),
            Err(e) => {
                log::debug!("cannot enumerate serial ports: {e}");
                vec![]
            }
        }
    }
}

impl DataProviderUi for SerialDataProvider {
    fn show(&mut self, ui: &mut eframe::egui::Ui) {
        ui.heading("Serial");
        egui::ComboBox::new("ports", "Port")
            .selected_text(self.port_name.as_deref().unwrap_or(""))
            .show_ui(ui, |ui| {
                for port_name in Self::available_port_names() {
                    ui.selectable_value(&mut self.port_name, Some(port_name.clone()), port_name);
                }
            });

        egui::ComboBox::new("baudrates", "Baud rate")
            .selected_text(format!("{}", self.baud_rate))
            .show_ui(ui, |ui| {
                for baudrate in BAUDRATES {
                    ui.selectable_value(&mut self.baud_rate, baudrate, format!("{baudrate}"));
                }
            });

        if let Some(port_name) = &self.port_name {
            ui.label(format!("'{}' 8-N-1", port_name));
        }
    }
}

impl AttitudeSensor for SerialDataProvider {
    fn name(&self) -> &str {
        self.port_name.as_deref().unwrap_or("serial")
    }

    fn is_available(&self) -> bool {
        self.port_name
            .as_ref()
            .is_some_and(|name| Self::available_port_names().contains(name))
    }

    fn set_update_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    fn start(
        &mut self,
        frame: ReferenceFrame,
    ) -> Result<BoxStream<'static, AttitudeSample>, SensorError> {
        let port_name = self
            .port_name
            .as_ref()
            .ok_or_else(|| SensorError::Unavailable("no serial port selected".into()))?;

        let mut port = tokio_serial::new(port_name, self.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .flow_control(tokio_serial::FlowControl::None)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .open_native_async()?;
        port.write_data_terminal_ready(true)?; // dtr: required for Arduinos to send data

        let rate_hz = 1.0 / self.interval.as_secs_f64();
        log::info!("Open serial port: {} @ {} baud", port_name, self.baud_rate);

        Ok(attitude_stream(port, device_commands(rate_hz, frame)))
    }
}

/// Lines sent to the device before reading.
pub fn device_commands(rate_hz: f64, frame: ReferenceFrame) -> String {
    format!("rate {rate_hz:.2}\nframe {}\n", frame.code())
}

/// Writes `commands` from inside the stream, then decodes samples from `io`.
pub fn attitude_stream<T>(mut io: T, commands: String) -> BoxStream<'static, AttitudeSample>
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    futures::stream::once(async move {
        if let Err(e) = io.write_all(commands.as_bytes()).await {
            log::warn!("cannot send device commands: {e}");
        }
        AttitudeLineCodec.framed(io)
    })
    .flatten()
    .filter_map(|line| async move {
        match line {
            Ok(sample) => Some(sample),
            Err(e) => {
                log::error!("serial read error: {e}");
                None
            }
        }
    })
    .boxed()
}

/// Parses one device line. Returns `None` for anything that is not a sample.
pub fn parse_line(line: &str) -> Option<AttitudeSample> {
    let line = line.trim_end();

    let mut roll = 0.0;
    let mut pitch = 0.0;
    if scanf::sscanf!(line, "att {} {}", roll, pitch).is_ok() {
        return Some(AttitudeSample {
            roll,
            raw_pitch: pitch,
        });
    }

    let mut w = 0.0;
    let mut x = 0.0;
    let mut y = 0.0;
    let mut z = 0.0;
    if scanf::sscanf!(line, "quat {} {} {} {}", w, x, y, z).is_ok() {
        return Some(AttitudeSample::from_quaternion(w, x, y, z));
    }

    None
}

/// Splits the byte stream at `\n` and yields the samples among the lines.
pub struct AttitudeLineCodec;

impl Decoder for AttitudeLineCodec {
    type Item = AttitudeSample;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        while let Some(n) = src.as_ref().iter().position(|b| *b == b'\n') {
            let line = src.split_to(n + 1);
            match str::from_utf8(line.as_ref()) {
                Ok(s) => match parse_line(s) {
                    Some(sample) => return Ok(Some(sample)),
                    None => log::trace!("skipping line {s:?}"),
                },
                Err(_) => log::debug!("skipping non-utf8 line ({} bytes)", line.len()),
            }
        }
        Ok(None)
    }
}
