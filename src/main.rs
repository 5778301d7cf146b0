#[cfg(feature = "gui")]
use eframe::egui;

#[cfg(feature = "gui")]
use beatgrid::{
    audio::{format_sample_name, OutputState},
    midi::write_midi_file,
    persistence::{load_pattern, remove_pattern, save_pattern, SavedPattern},
    sequencer::{MAX_TEMPO, MIN_TEMPO},
    AudioOutput, Config, DirectorySource, Grid, MidiOutputDevice, PlaybackEvent, PlayerSet,
    SampleBank, Sequencer, TransportState,
};
#[cfg(feature = "gui")]
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

#[cfg(feature = "gui")]
const AUTOSAVE_DELAY: Duration = Duration::from_millis(500);

#[cfg(feature = "gui")]
fn main() -> Result<(), eframe::Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_args().unwrap_or_else(|e| {
        log::warn!("{e}; using default settings");
        Config::default()
    });

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([900.0, 640.0])
            .with_title("beatgrid"),
        ..Default::default()
    };

    eframe::run_native(
        "beatgrid",
        options,
        Box::new(|_cc| Ok(Box::new(SequencerApp::new(config)))),
    )
}

#[cfg(not(feature = "gui"))]
fn main() {
    eprintln!("This binary requires the 'gui' feature to be enabled");
    std::process::exit(1);
}

#[cfg(feature = "gui")]
struct SequencerApp {
    config: Config,
    sequencer: Sequencer,
    // owns the cpal stream; must stay on this thread
    audio_output: AudioOutput,
    bank: Arc<SampleBank>,
    midi_output: Arc<MidiOutputDevice>,

    // UI state
    labels: Vec<String>,
    available_midi_ports: Vec<String>,
    selected_port: Option<usize>,
    last_change: Option<Instant>,
    status: Option<String>,
}

#[cfg(feature = "gui")]
impl SequencerApp {
    fn new(config: Config) -> Self {
        let audio_output = AudioOutput::open(config.volume);
        let source = DirectorySource::new(&config.sample_dir);
        let bank = SampleBank::load(&source, audio_output.handle()).unwrap_or_else(|e| {
            log::error!("no samples loaded from {}: {e:#}", config.sample_dir.display());
            SampleBank::empty(audio_output.handle())
        });
        let bank = Arc::new(bank);
        let names = bank.names();

        let midi_output = Arc::new(MidiOutputDevice::new(&names));
        let available_midi_ports = MidiOutputDevice::available_ports();
        let mut selected_port = None;
        if let Some(port) = config.midi_port {
            match midi_output.connect(port) {
                Ok(()) => selected_port = Some(port),
                Err(e) => log::warn!("{e}"),
            }
        }

        let players = PlayerSet::new().with(bank.clone()).with(midi_output.clone());
        let saved = load_pattern(&config.pattern_dir, &config.pattern_name);
        let grid = match &saved {
            Some(pattern) => pattern.to_grid(names.len()),
            None => Grid::new(names.len(), config.columns),
        };

        let mut sequencer = Sequencer::new(grid, Arc::new(players));
        sequencer.set_tempo(saved.as_ref().map_or(config.tempo, |p| p.tempo));
        sequencer.set_playback_rate(config.playback_rate);
        sequencer.set_looping(config.looping);
        sequencer.set_volume(config.volume);

        Self {
            labels: names.iter().map(|n| format_sample_name(n)).collect(),
            config,
            sequencer,
            audio_output,
            bank,
            midi_output,
            available_midi_ports,
            selected_port,
            last_change: None,
            status: None,
        }
    }

    fn handle_playback_events(&mut self) {
        for event in self.sequencer.poll_events() {
            if event == PlaybackEvent::Finished {
                log::info!("pass finished");
            }
        }
    }

    fn mark_changed(&mut self) {
        self.last_change = Some(Instant::now());
    }

    fn autosave(&mut self) {
        let Some(changed) = self.last_change else {
            return;
        };
        if changed.elapsed() < AUTOSAVE_DELAY {
            return;
        }
        self.last_change = None;
        let pattern = SavedPattern::capture(&self.sequencer.grid(), self.sequencer.tempo());
        if let Err(e) = save_pattern(&self.config.pattern_dir, &self.config.pattern_name, &pattern) {
            log::warn!("autosave failed: {e:#}");
        }
    }

    fn clear(&mut self) {
        self.sequencer.clear_all_cells();
        self.last_change = None;
        if let Err(e) = remove_pattern(&self.config.pattern_dir, &self.config.pattern_name) {
            log::warn!("could not remove saved pattern: {e:#}");
        }
    }

    fn export_midi(&mut self) {
        let path = self
            .config
            .pattern_dir
            .join(format!("{}.mid", self.config.pattern_name));
        let result = write_midi_file(
            &path,
            &self.sequencer.grid(),
            self.sequencer.tempo(),
            &self.bank.names(),
        );
        self.status = Some(match result {
            Ok(()) => format!("Exported {}", path.display()),
            Err(e) => format!("Export failed: {e:#}"),
        });
    }

    fn transport_controls(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            let label = if self.sequencer.is_playing() { "⏸ Pause" } else { "▶ Play" };
            if ui.button(label).clicked() {
                self.sequencer.toggle_play();
            }
            if ui.button("⏹ Stop").clicked() {
                self.sequencer.stop();
            }
            if ui.button("⏮ Reset").clicked() {
                self.sequencer.reset();
            }

            let mut looping = self.sequencer.looping();
            if ui.checkbox(&mut looping, "Loop").changed() {
                self.sequencer.toggle_loop();
            }

            ui.add_space(20.0);

            ui.label("BPM:");
            let mut tempo = self.sequencer.tempo();
            if ui
                .add(egui::Slider::new(&mut tempo, MIN_TEMPO..=MAX_TEMPO).step_by(1.0))
                .changed()
            {
                self.sequencer.set_tempo(tempo);
                self.mark_changed();
            }
        });

        ui.horizontal(|ui| {
            ui.label("Volume:");
            if ui.button("−").clicked() {
                self.sequencer.decrease_volume();
            }
            ui.label(format!("{:.0}%", self.sequencer.volume() * 100.0));
            if ui.button("+").clicked() {
                self.sequencer.increase_volume();
            }

            ui.add_space(20.0);

            ui.label("Speed:");
            if ui.button("−").clicked() {
                self.sequencer.decrease_speed();
            }
            ui.label(format!("{:.2}x", self.sequencer.playback_rate()));
            if ui.button("+").clicked() {
                self.sequencer.increase_speed();
            }

            ui.add_space(20.0);

            ui.label("Steps:");
            if ui
                .add_enabled(self.sequencer.can_remove_column(), egui::Button::new("−"))
                .clicked()
            {
                self.sequencer.remove_column();
                self.mark_changed();
            }
            ui.label(self.sequencer.columns().to_string());
            if ui
                .add_enabled(self.sequencer.can_add_column(), egui::Button::new("+"))
                .clicked()
            {
                self.sequencer.add_column();
                self.mark_changed();
            }

            ui.add_space(20.0);

            if ui.button("Clear").clicked() {
                self.clear();
            }
            if ui.button("Export MIDI").clicked() {
                self.export_midi();
            }
        });
    }

    fn midi_controls(&mut self, ui: &mut egui::Ui) {
        let mut selected_port_changed = None;
        ui.horizontal(|ui| {
            ui.label("MIDI Output:");
            if self.available_midi_ports.is_empty() {
                ui.label("No MIDI ports available");
            } else {
                egui::ComboBox::from_label("")
                    .selected_text(
                        self.selected_port
                            .and_then(|i| self.available_midi_ports.get(i))
                            .map_or("Select port...", String::as_str),
                    )
                    .show_ui(ui, |ui| {
                        for (i, port_name) in self.available_midi_ports.iter().enumerate() {
                            if ui
                                .selectable_label(self.selected_port == Some(i), port_name)
                                .clicked()
                            {
                                selected_port_changed = Some(i);
                            }
                        }
                    });
            }
        });

        if let Some(port_idx) = selected_port_changed {
            match self.midi_output.connect(port_idx) {
                Ok(()) => self.selected_port = Some(port_idx),
                Err(e) => self.status = Some(e.to_string()),
            }
        }
    }

    fn grid_view(&mut self, ui: &mut egui::Ui) {
        let grid = self.sequencer.grid();
        let playhead = (self.sequencer.state() == TransportState::Playing).then(|| self.sequencer.playhead());
        let mut clicked = None;

        egui::Grid::new("steps").spacing([4.0, 4.0]).show(ui, |ui| {
            for row in 0..grid.rows() {
                let loaded = self.bank.instrument(row).is_some_and(|i| i.loaded);
                let label = egui::RichText::new(&self.labels[row]);
                if loaded {
                    ui.label(label);
                } else {
                    ui.label(label.color(egui::Color32::GRAY))
                        .on_hover_text("Sample unavailable");
                }

                for col in 0..grid.columns() {
                    let is_current = playhead == Some(col);
                    let step_enabled = grid.is_active(row, col);

                    let button = egui::Button::new("")
                        .min_size(egui::vec2(28.0, 28.0))
                        .fill(match (step_enabled, is_current) {
                            (true, true) => egui::Color32::from_rgb(120, 220, 120),
                            (true, false) => egui::Color32::from_rgb(60, 60, 200),
                            (false, true) => egui::Color32::from_rgb(70, 90, 70),
                            (false, false) => egui::Color32::from_rgb(40, 40, 40),
                        });

                    if ui.add(button).clicked() {
                        clicked = Some((row, col));
                    }
                }
                ui.end_row();
            }
        });

        if let Some((row, col)) = clicked {
            self.sequencer.toggle_cell(row, col);
            self.mark_changed();
        }
    }
}

#[cfg(feature = "gui")]
impl eframe::App for SequencerApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        ctx.request_repaint_after(Duration::from_millis(16));

        self.handle_playback_events();
        self.autosave();

        if ctx.input(|i| i.key_pressed(egui::Key::Space)) {
            self.sequencer.toggle_play();
        }

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.heading("beatgrid");
            ui.add_space(10.0);

            self.midi_controls(ui);
            ui.add_space(10.0);
            self.transport_controls(ui);
            ui.add_space(20.0);

            if self.bank.is_empty() {
                ui.colored_label(
                    egui::Color32::YELLOW,
                    format!("⚠ No samples found in {}", self.config.sample_dir.display()),
                );
            } else {
                self.grid_view(ui);
            }

            // Info
            ui.separator();
            if self.audio_output.state() == OutputState::Unavailable {
                ui.colored_label(egui::Color32::YELLOW, "⚠ No audio output - playback is silent");
            }
            let unavailable = self.bank.unavailable();
            if unavailable > 0 {
                ui.colored_label(
                    egui::Color32::YELLOW,
                    format!("⚠ {unavailable} sample(s) failed to load"),
                );
            }
            if let Some(status) = &self.status {
                ui.label(status);
            }
        });
    }
}

#[cfg(feature = "gui")]
impl Drop for SequencerApp {
    fn drop(&mut self) {
        self.sequencer.stop();
        if self.last_change.is_some() {
            let pattern = SavedPattern::capture(&self.sequencer.grid(), self.sequencer.tempo());
            if let Err(e) = save_pattern(&self.config.pattern_dir, &self.config.pattern_name, &pattern) {
                log::warn!("final save failed: {e:#}");
            }
        }
    }
}
