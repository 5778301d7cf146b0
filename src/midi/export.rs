//! Standard MIDI File export of a grid pattern.
use std::path::Path;

use anyhow::Context;

use crate::sequencer::Grid;

pub const TICKS_PER_QUARTER: u16 = 96;
/// One sixteenth note.
pub const TICKS_PER_STEP: u32 = TICKS_PER_QUARTER as u32 / 4;
pub const VELOCITY: u8 = 100;

const NOTE_ON: u8 = 0x99;
const NOTE_OFF: u8 = 0x89;
const END_OF_TRACK: [u8; 3] = [0xFF, 0x2F, 0x00];
const MAX_TEMPO_VALUE: u32 = 0xFF_FFFF;

/// General MIDI percussion note for a named instrument on `index`.
pub fn drum_note(name: &str, index: usize) -> u8 {
    let name = name.to_lowercase();
    if name.contains("kick") {
        36
    } else if name.contains("snare") {
        38
    } else if name.contains("hat") {
        if name.contains("open") {
            46
        } else {
            42
        }
    } else if name.contains("tom") {
        45 + (index % 4) as u8
    } else if name.contains("crash") {
        49
    } else if name.contains("ride") {
        51
    } else if name.contains("clap") {
        39
    } else {
        35 + (index % 46) as u8
    }
}

/// Variable-length quantity, most significant group first.
pub fn encode_vlq(mut value: u32) -> Vec<u8> {
    let mut bytes = vec![(value & 0x7F) as u8];
    value >>= 7;
    while value > 0 {
        bytes.push((value & 0x7F) as u8 | 0x80);
        value >>= 7;
    }
    bytes.reverse();
    bytes
}

struct NoteEvent {
    tick: u32,
    status: u8,
    note: u8,
    velocity: u8,
}

/// Renders `grid` as a two-track format 1 file: a tempo track, then a
/// channel-10 drum track with one note per active cell. Rows without a name
/// fall back to the generic percussion range.
pub fn generate_midi_file(grid: &Grid, tempo: f32, names: &[String]) -> Vec<u8> {
    let notes: Vec<u8> = (0..grid.rows())
        .map(|row| drum_note(names.get(row).map(String::as_str).unwrap_or(""), row))
        .collect();

    let mut events = Vec::with_capacity(grid.active_count() * 2);
    for col in 0..grid.columns() {
        let tick = col as u32 * TICKS_PER_STEP;
        for row in grid.active_rows(col) {
            events.push(NoteEvent {
                tick,
                status: NOTE_ON,
                note: notes[row],
                velocity: VELOCITY,
            });
            events.push(NoteEvent {
                tick: tick + TICKS_PER_STEP,
                status: NOTE_OFF,
                note: notes[row],
                velocity: 0,
            });
        }
    }
    // stable, so a note off lands before a note on at the same tick
    events.sort_by_key(|e| e.tick);

    let mut notes_track = Vec::new();
    let mut last_tick = 0;
    for event in &events {
        notes_track.extend(encode_vlq(event.tick - last_tick));
        notes_track.extend([event.status, event.note, event.velocity]);
        last_tick = event.tick;
    }
    let pattern_end = grid.columns() as u32 * TICKS_PER_STEP;
    notes_track.extend(encode_vlq(pattern_end.saturating_sub(last_tick)));
    notes_track.extend(END_OF_TRACK);

    // the tempo meta event carries 24 bits
    let micros_per_quarter = ((60_000_000.0 / tempo.max(1.0) as f64).floor() as u32).min(MAX_TEMPO_VALUE);
    let mut tempo_track = vec![0x00, 0xFF, 0x51, 0x03];
    tempo_track.extend(&micros_per_quarter.to_be_bytes()[1..]);
    tempo_track.push(0x00);
    tempo_track.extend(END_OF_TRACK);

    let mut file = Vec::with_capacity(14 + 8 + tempo_track.len() + 8 + notes_track.len());
    file.extend(b"MThd");
    file.extend(6u32.to_be_bytes());
    file.extend(1u16.to_be_bytes());
    file.extend(2u16.to_be_bytes());
    file.extend(TICKS_PER_QUARTER.to_be_bytes());
    push_track(&mut file, &tempo_track);
    push_track(&mut file, &notes_track);
    file
}

fn push_track(file: &mut Vec<u8>, data: &[u8]) {
    file.extend(b"MTrk");
    file.extend((data.len() as u32).to_be_bytes());
    file.extend(data);
}

pub fn write_midi_file(path: &Path, grid: &Grid, tempo: f32, names: &[String]) -> anyhow::Result<()> {
    let bytes = generate_midi_file(grid, tempo, names);
    std::fs::write(path, &bytes).with_context(|| format!("writing {}", path.display()))?;
    log::info!("exported {} bytes of MIDI to {}", bytes.len(), path.display());
    Ok(())
}
