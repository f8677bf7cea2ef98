use tokio::sync::watch;

use clinometer::config::AppConfig;
use clinometer::height::{height_readout, HeightResult, SightingInput};
use clinometer::orientation::{OrientationReading, OrientationTracker};
use eframe::egui::{self, Color32, Stroke};
use egui::menu;
use egui_modal::Modal;
use egui_plot::{Legend, Line, PlotPoints, Points};

pub fn init(config: AppConfig, tracker: OrientationTracker) -> eframe::Result {
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default().with_inner_size(config.window_size),
        ..Default::default()
    };
    eframe::run_native(
        "Clinometer",
        options,
        Box::new(|_cc| Ok(Box::new(ClinometerApp::new(config, tracker)))),
    )
}

struct ClinometerApp {
    config: AppConfig,
    tracker: OrientationTracker,
    orientation_rx: watch::Receiver<OrientationReading>,
    sighting: SightingInput,
    height: Option<HeightResult>,
    input_error: Option<String>,
    status: Option<String>,
    show_plot: bool,
}

impl ClinometerApp {
    pub fn new(config: AppConfig, tracker: OrientationTracker) -> Self {
        let orientation_rx = tracker.subscribe();
        let mut app = Self {
            config,
            tracker,
            orientation_rx,
            sighting: SightingInput::default(),
            height: None,
            input_error: None,
            status: None,
            show_plot: true,
        };
        app.start_tracking();
        app
    }

    fn start_tracking(&mut self) {
        self.tracker.configure(self.config.sample_rate_hz);
        self.status = self
            .tracker
            .start(self.config.reference_frame)
            .err()
            .map(|e| e.to_string());
    }

    fn apply_config(&mut self, config: AppConfig) {
        let restart = self.tracker.is_running();
        let source_changed = config.source != self.config.source
            || config.serial != self.config.serial
            || config.ros != self.config.ros;
        self.config = config;

        if source_changed {
            self.tracker.replace_sensor(crate::attitude_sensor(&self.config));
        } else {
            self.tracker.stop();
        }
        if restart || source_changed {
            self.start_tracking();
        } else {
            self.tracker.configure(self.config.sample_rate_hz);
        }
    }

    fn calculate(&mut self) {
        match self.sighting.calculate() {
            Ok(result) => {
                log::info!("calculated height {:.2} units", result.height_units);
                self.height = Some(result);
                self.input_error = None;
            }
            Err(e) => {
                log::debug!("{e}");
                self.input_error = Some(e.to_string());
            }
        }
        self.sighting.clear();
    }

    fn draw_level_indicator(&self, ui: &mut egui::Ui, reading: OrientationReading) {
        let rect = ui.max_rect();
        let center = rect.center();
        let painter = ui.painter();

        let level_color = match reading {
            OrientationReading::Ready(state) if state.is_level() => Color32::GREEN,
            OrientationReading::Ready(_) => Color32::RED,
            OrientationReading::Pending | OrientationReading::Unavailable => Color32::GRAY,
        };

        // crosshair
        painter.circle(center, 12.5, Color32::RED, Stroke::new(2.0, Color32::WHITE));

        let y = center.y + 50.0;
        painter.line_segment(
            [
                egui::pos2(rect.left() + 50.0, y),
                egui::pos2(rect.right() - 50.0, y),
            ],
            Stroke::new(2.0, level_color),
        );
    }

    fn show_sighting_plot(&mut self, ctx: &egui::Context) {
        let Some(result) = self.height else {
            return;
        };
        let s = result.sighting;
        let top = s.rise_to_top();
        let bottom = -s.rise_to_bottom();

        egui::Window::new("Sighting")
            .open(&mut self.show_plot)
            .show(ctx, |ui| {
                egui_plot::Plot::new("sighting_plot")
                    .allow_zoom(true)
                    .allow_drag(true)
                    .allow_scroll(false)
                    .allow_boxed_zoom(false)
                    .data_aspect(1.0)
                    .view_aspect(1.0)
                    .x_axis_label("distance")
                    .y_axis_label("height")
                    .legend(Legend::default())
                    .show(ui, |plot_ui| {
                        plot_ui.line(
                            Line::new(PlotPoints::from(vec![[0.0, 0.0], [s.distance, top]]))
                                .name("to top"),
                        );
                        plot_ui.line(
                            Line::new(PlotPoints::from(vec![[0.0, 0.0], [s.distance, bottom]]))
                                .name("to bottom"),
                        );
                        plot_ui.line(
                            Line::new(PlotPoints::from(vec![[s.distance, bottom], [s.distance, top]]))
                                .name(format!("object ({:.2})", result.height_units)),
                        );
                        plot_ui.points(Points::new(vec![[0.0, 0.0]]).radius(4.0).name("observer"));
                    });
            });
    }
}

impl eframe::App for ClinometerApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let reading = *self.orientation_rx.borrow_and_update();

        let modal_sighting = Modal::new(ctx, "sighting");
        modal_sighting.show(|ui| {
            modal_sighting.title(ui, "Sighting");
            modal_sighting.frame(ui, |ui| {
                egui::Grid::new("sighting_grid")
                    .num_columns(2)
                    .spacing([12.0, 18.0])
                    .show(ui, |ui| {
                        ui.label("Distance from tree");
                        ui.text_edit_singleline(&mut self.sighting.distance);
                        ui.end_row();
                        ui.label("Angle to top of tree");
                        ui.text_edit_singleline(&mut self.sighting.angle_to_top);
                        ui.end_row();
                        ui.label("Angle to bottom of tree");
                        ui.text_edit_singleline(&mut self.sighting.angle_to_bottom);
                        ui.end_row();
                    });
            });
            modal_sighting.buttons(ui, |ui| {
                if modal_sighting.caution_button(ui, "Cancel").clicked() {
                    // After clicking, the modal is automatically closed
                };
                if modal_sighting.suggested_button(ui, "Calculate").clicked() {
                    self.calculate();
                    self.show_plot = true;
                };
            });
        });

        egui::SidePanel::left("left_panel").show(ctx, |ui| {
            menu::bar(ui, |ui| {
                ui.menu_button("File", |ui| {
                    if ui.button("🗁 Open config").clicked() {
                        ui.close_menu();
                        if let Some(path) = rfd::FileDialog::new()
                            .add_filter("config", &["json"])
                            .pick_file()
                        {
                            match AppConfig::load(&path) {
                                Ok(config) => self.apply_config(config),
                                Err(e) => {
                                    log::error!("{}: {e}", path.display());
                                    self.status = Some(format!("{}: {e}", path.display()));
                                }
                            }
                        }
                    }
                });
            });
            ui.separator();

            self.tracker.show_sensor(ui);
            ui.separator();

            ui.heading("Orientation");
            ui.label(format!("{:.1} Hz", self.config.sample_rate_hz));
            ui.label(format!("{:?}", self.config.reference_frame));
            if self.tracker.is_running() {
                if ui.button("Stop").clicked() {
                    self.tracker.stop();
                }
            } else if ui.button("Start").clicked() {
                self.start_tracking();
            }
            if let Some(status) = &self.status {
                ui.colored_label(Color32::RED, status.as_str());
            }
            ui.separator();
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            self.draw_level_indicator(ui, reading);

            ui.with_layout(egui::Layout::right_to_left(egui::Align::TOP), |ui| {
                if ui.button("➕").clicked() {
                    modal_sighting.open();
                }
            });

            ui.with_layout(egui::Layout::bottom_up(egui::Align::Center), |ui| {
                if let Some(error) = &self.input_error {
                    ui.colored_label(Color32::RED, error.as_str());
                }
                ui.strong(height_readout(self.height.as_ref()));
                match reading {
                    OrientationReading::Ready(state) => {
                        ui.strong(if state.is_level() {
                            "Aligned"
                        } else {
                            "Align the device"
                        });
                        ui.label(format!("Pitch: {:.1} Degrees", state.pitch_degrees()));
                    }
                    OrientationReading::Pending => {
                        ui.strong("Waiting for orientation…");
                    }
                    OrientationReading::Unavailable => {
                        ui.colored_label(Color32::RED, "Orientation unavailable");
                    }
                }
            });
        });

        self.show_sighting_plot(ctx);

        ctx.request_repaint();
    }
}
