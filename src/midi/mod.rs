/// MIDI output using midir, plus Standard MIDI File export
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use midir::{MidiOutput, MidiOutputConnection};

use crate::error::MidiError;
use crate::sequencer::player::{SamplePlayer, TriggerParams};

pub mod export;

pub use export::{drum_note, encode_vlq, generate_midi_file, write_midi_file};

const CLIENT_NAME: &str = "beatgrid MIDI output";

/// How long a mirrored hit is held before its note off.
pub const NOTE_LENGTH: Duration = Duration::from_millis(100);

type SharedConnection = Arc<Mutex<Option<MidiOutputConnection>>>;

#[derive(Debug, Clone, Copy)]
struct NoteOff {
    at: Instant,
    note: u8,
}

/// Mirrors triggered rows to a MIDI port as channel-10 drum hits. Each hit is
/// held for `NOTE_LENGTH`; note offs are sent from a release thread.
pub struct MidiOutputDevice {
    connection: SharedConnection,
    notes: Vec<u8>,
    note_offs: Option<Sender<NoteOff>>,
    release_loop: Option<JoinHandle<()>>,
}

impl MidiOutputDevice {
    /// `names` are the row instruments, used to pick each row's drum note.
    pub fn new(names: &[String]) -> Self {
        let connection: SharedConnection = Arc::new(Mutex::new(None));
        let (tx, rx) = crossbeam_channel::unbounded();

        let shared = Arc::clone(&connection);
        let release_loop = thread::Builder::new()
            .name("beatgrid-midi-release".into())
            .spawn(move || {
                run_release_loop(rx, |note| {
                    if let Err(e) = send_message(&shared, &[0x89, note, 0]) {
                        log::warn!("{e}");
                    }
                })
            });
        let (note_offs, release_loop) = match release_loop {
            Ok(handle) => (Some(tx), Some(handle)),
            Err(e) => {
                log::error!("failed to spawn MIDI release thread: {e}");
                (None, None)
            }
        };

        Self {
            connection,
            notes: names
                .iter()
                .enumerate()
                .map(|(i, name)| drum_note(name, i))
                .collect(),
            note_offs,
            release_loop,
        }
    }

    pub fn available_ports() -> Vec<String> {
        match MidiOutput::new(CLIENT_NAME) {
            Ok(midi_out) => midi_out
                .ports()
                .iter()
                .filter_map(|p| midi_out.port_name(p).ok())
                .collect(),
            Err(e) => {
                log::warn!("MIDI unavailable: {e}");
                vec![]
            }
        }
    }

    pub fn connect(&self, port_index: usize) -> Result<(), MidiError> {
        let midi_out = MidiOutput::new(CLIENT_NAME)?;

        let ports = midi_out.ports();
        let port = ports.get(port_index).ok_or(MidiError::InvalidPort(port_index))?;
        let port_name = midi_out.port_name(port).unwrap_or_default();

        let connection = midi_out
            .connect(port, "beatgrid")
            .map_err(|e| MidiError::Connect(e.to_string()))?;

        *lock(&self.connection) = Some(connection);
        log::info!("MIDI connected to {port_name}");
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.connection).is_some()
    }

    pub fn disconnect(&self) {
        if let Some(conn) = lock(&self.connection).take() {
            let _ = conn.close();
        }
    }

    /// Drum note sent for `row`.
    pub fn note_for_row(&self, row: usize) -> u8 {
        self.notes.get(row).copied().unwrap_or_else(|| drum_note("", row))
    }

    pub fn send_note_on(&self, note: u8, velocity: u8) -> Result<(), MidiError> {
        send_message(&self.connection, &[0x99, note, velocity])
    }

    pub fn send_note_off(&self, note: u8) -> Result<(), MidiError> {
        send_message(&self.connection, &[0x89, note, 0])
    }
}

impl SamplePlayer for MidiOutputDevice {
    fn trigger(&self, row: usize, params: TriggerParams) {
        if !self.is_connected() {
            return;
        }
        let note = self.note_for_row(row);
        let velocity = (params.gain.clamp(0.0, 1.0) * export::VELOCITY as f32).round() as u8;
        if let Err(e) = self.send_note_on(note, velocity.max(1)) {
            log::warn!("{e}");
            return;
        }

        let off = NoteOff {
            at: Instant::now() + NOTE_LENGTH,
            note,
        };
        let queued = self
            .note_offs
            .as_ref()
            .is_some_and(|tx| tx.send(off).is_ok());
        if !queued {
            if let Err(e) = self.send_note_off(note) {
                log::warn!("{e}");
            }
        }
    }
}

impl Drop for MidiOutputDevice {
    fn drop(&mut self) {
        // closing the queue makes the release thread flush held notes
        self.note_offs.take();
        if let Some(handle) = self.release_loop.take() {
            if handle.join().is_err() {
                log::error!("MIDI release thread panicked");
            }
        }
    }
}

fn lock(connection: &Mutex<Option<MidiOutputConnection>>) -> MutexGuard<'_, Option<MidiOutputConnection>> {
    connection.lock().unwrap_or_else(PoisonError::into_inner)
}

fn send_message(connection: &Mutex<Option<MidiOutputConnection>>, message: &[u8]) -> Result<(), MidiError> {
    if let Some(conn) = lock(connection).as_mut() {
        conn.send(message)?;
    }
    Ok(())
}

/// Calls `release` for each queued note once its deadline passes. When the
/// queue closes, every held note is released at once.
fn run_release_loop<F: FnMut(u8)>(offs: Receiver<NoteOff>, mut release: F) {
    let mut pending: Vec<NoteOff> = Vec::new();
    loop {
        let received = match pending.iter().map(|off| off.at).min() {
            Some(at) => offs.recv_timeout(at.saturating_duration_since(Instant::now())),
            None => offs.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match received {
            Ok(off) => pending.push(off),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                for off in pending.drain(..) {
                    release(off.note);
                }
                return;
            }
        }

        let now = Instant::now();
        pending.retain(|off| {
            if off.at <= now {
                release(off.note);
                false
            } else {
                true
            }
        });
    }
}
