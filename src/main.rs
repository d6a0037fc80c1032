#[cfg(feature = "gui")]
use std::path::PathBuf;
#[cfg(feature = "gui")]
use std::sync::{Arc, Mutex, PoisonError};

#[cfg(feature = "gui")]
use clap::Parser;
#[cfg(feature = "gui")]
use eframe::egui;

#[cfg(feature = "gui")]
use beatgrid::{
    lock_session, AudioOutput, CellAppearance, MidiOutputDevice, PlaybackEngine, PlaybackEvent,
    Session, SessionConfig, SharedSession, SoundTrigger,
};

/// beatgrid - step-sequencer drum machine
#[cfg(feature = "gui")]
#[derive(Parser)]
#[command(name = "beatgrid")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON session file (row_count, row_length, speed_ms, sounds)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of rows (sounds)
    #[arg(long)]
    rows: Option<usize>,

    /// Beats per row
    #[arg(long)]
    length: Option<usize>,

    /// Milliseconds per beat
    #[arg(long)]
    speed: Option<u64>,

    /// MIDI output port to connect at startup
    #[arg(long)]
    midi_port: Option<usize>,
}

#[cfg(feature = "gui")]
impl Cli {
    fn session_config(&self) -> beatgrid::Result<SessionConfig> {
        let mut config = match &self.config {
            Some(path) => SessionConfig::from_json_file(path)?,
            None => SessionConfig::default(),
        };
        if let Some(rows) = self.rows {
            config = config.with_rows(rows);
        }
        if let Some(length) = self.length {
            config = config.with_row_length(length);
        }
        if let Some(speed) = self.speed {
            config = config.with_speed_ms(speed);
        }
        config.validate()?;
        Ok(config)
    }
}

#[cfg(feature = "gui")]
fn main() -> Result<(), eframe::Error> {
    env_logger::init();
    let cli = Cli::parse();

    // Bad configuration never reaches the window.
    let app = match cli.session_config().and_then(|c| SequencerApp::new(c, cli.midi_port)) {
        Ok(app) => app,
        Err(e) => {
            eprintln!("beatgrid: {}", e);
            std::process::exit(2);
        }
    };

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([520.0, 360.0])
            .with_title("beatgrid - Drum Machine"),
        ..Default::default()
    };

    eframe::run_native(
        "beatgrid",
        options,
        Box::new(|_cc| Ok(Box::new(app))),
    )
}

#[cfg(not(feature = "gui"))]
fn main() {
    eprintln!("This binary requires the 'gui' feature to be enabled");
    std::process::exit(1);
}

#[cfg(feature = "gui")]
struct SequencerApp {
    session: SharedSession,
    playback_engine: PlaybackEngine,
    // keeps the audio stream alive; the session holds its trigger handle
    audio_output: AudioOutput,
    midi_output: Arc<Mutex<MidiOutputDevice>>,

    // UI state
    available_midi_ports: Vec<String>,
    selected_port: Option<usize>,
    status: Option<String>,
}

#[cfg(feature = "gui")]
impl SequencerApp {
    fn new(config: SessionConfig, midi_port: Option<usize>) -> beatgrid::Result<Self> {
        let audio_output = AudioOutput::default();
        let midi_output = Arc::new(Mutex::new(MidiOutputDevice::new()));

        let mut selected_port = None;
        if let Some(port) = midi_port {
            midi_output
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .connect(port)?;
            selected_port = Some(port);
        }

        let sinks: Vec<Box<dyn SoundTrigger>> = vec![
            Box::new(audio_output.trigger_handle()),
            Box::new(Arc::clone(&midi_output)),
        ];
        let session = Session::new(config, Box::new(sinks))?.into_shared();

        Ok(Self {
            session,
            playback_engine: PlaybackEngine::new(),
            audio_output,
            midi_output,
            available_midi_ports: MidiOutputDevice::available_ports(),
            selected_port,
            status: None,
        })
    }

    fn handle_playback_events(&mut self) {
        for event in self.playback_engine.poll_events() {
            match event {
                PlaybackEvent::BeatAdvanced(beat) => log::trace!("beat {}", beat),
                PlaybackEvent::Triggered { key, sound } => {
                    log::trace!("key {} played {}", key, sound)
                }
                PlaybackEvent::Stopped => self.status = None,
            }
        }
    }

    fn toggle_cell(&mut self, key: usize) {
        if let Err(e) = lock_session(&self.session).toggle(key) {
            // the UI only offers keys from the snapshot, so this is a desync
            log::error!("{}", e);
            self.status = Some(e.to_string());
        }
    }

    fn toggle_playing(&mut self) {
        if !self.playback_engine.toggle_playing(&self.session) {
            // cut ringing voices on stop
            self.audio_output.stop_all();
        }
    }

    fn connect_midi(&mut self, port_idx: usize) {
        let result = {
            let mut midi = self.midi_output.lock().unwrap_or_else(PoisonError::into_inner);
            midi.disconnect();
            midi.connect(port_idx)
        };
        match result {
            Ok(()) => self.selected_port = Some(port_idx),
            Err(e) => {
                self.selected_port = None;
                self.status = Some(e.to_string());
            }
        }
    }
}

#[cfg(feature = "gui")]
fn cell_color(appearance: CellAppearance) -> egui::Color32 {
    match appearance {
        CellAppearance::Active => egui::Color32::from_rgb(23, 162, 184),
        CellAppearance::Current => egui::Color32::from_rgb(255, 193, 7),
        CellAppearance::Idle => egui::Color32::from_rgb(108, 117, 125),
    }
}

#[cfg(feature = "gui")]
impl eframe::App for SequencerApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.handle_playback_events();

        let snapshot = lock_session(&self.session).snapshot();
        if snapshot.playing {
            ctx.request_repaint();
        }

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.vertical_centered(|ui| {
                ui.add_space(10.0);

                if ui.button(snapshot.play_label()).clicked() {
                    self.toggle_playing();
                }

                ui.add_space(10.0);

                let mut clicked = None;
                for row in &snapshot.rows {
                    ui.horizontal(|ui| {
                        for cell in row {
                            let button = egui::Button::new("")
                                .min_size(egui::vec2(25.0, 25.0))
                                .fill(cell_color(cell.appearance()));
                            let response = ui.add(button);
                            let response = match &cell.sound {
                                Some(sound) => response.on_hover_text(format!(
                                    "{} - beat {}",
                                    sound, cell.beat
                                )),
                                None => response.on_hover_text("no sound"),
                            };
                            if response.clicked() {
                                clicked = Some(cell.key);
                            }
                        }
                    });
                }
                if let Some(key) = clicked {
                    self.toggle_cell(key);
                }

                ui.add_space(10.0);
                if ui.button("Clear").clicked() {
                    lock_session(&self.session).clear();
                }

                ui.separator();

                // MIDI Port Selection
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
                                    .map(String::as_str)
                                    .unwrap_or("Select port..."),
                            )
                            .show_ui(ui, |ui| {
                                for (i, port_name) in self.available_midi_ports.iter().enumerate()
                                {
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
                    self.connect_midi(port_idx);
                }

                if self.audio_output.is_silent() {
                    ui.colored_label(
                        egui::Color32::YELLOW,
                        "⚠ No audio device - MIDI output only",
                    );
                }
                if let Some(status) = &self.status {
                    ui.colored_label(egui::Color32::YELLOW, status);
                }
            });
        });
    }
}

#[cfg(feature = "gui")]
impl Drop for SequencerApp {
    fn drop(&mut self) {
        self.playback_engine.stop(&self.session);
    }
}
