/// Core sequencer logic - grid state, transport state machine, step timing
use std::sync::Arc;
use std::time::{Duration, Instant};

pub mod grid;
pub mod playback;
pub mod player;

pub use grid::{Grid, GridCell, DEFAULT_COLUMNS, MAX_COLUMNS, MIN_COLUMNS};
use playback::{PlaybackEvent, Timing, TransportClock};
use player::{SamplePlayer, TriggerParams};

pub const MIN_TEMPO: f32 = 40.0;
pub const MAX_TEMPO: f32 = 300.0;
pub const DEFAULT_TEMPO: f32 = 120.0;

pub const MIN_SPEED: f32 = 0.25;
pub const MAX_SPEED: f32 = 2.0;
pub const SPEED_STEP: f32 = 0.25;

pub const DEFAULT_VOLUME: f32 = 0.8;
pub const VOLUME_STEP: f32 = 0.1;

/// Minimum gap between preview sounds when cells are switched on.
pub const PREVIEW_THROTTLE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Stopped,
    Playing,
    Paused,
}

/// Public playback controller: owns the grid, the transport clock and the
/// user-facing settings.
pub struct Sequencer {
    grid: Arc<GridCell>,
    clock: TransportClock,
    player: Arc<dyn SamplePlayer>,
    state: TransportState,
    tempo: f32,
    playback_rate: f32,
    looping: bool,
    volume: f32,
    last_preview: Option<Instant>,
}

impl Sequencer {
    pub fn new(grid: Grid, player: Arc<dyn SamplePlayer>) -> Self {
        let grid = Arc::new(GridCell::new(grid));
        let timing = Timing::default();
        let clock = TransportClock::new(Arc::clone(&grid), Arc::clone(&player), timing);
        player.set_volume(DEFAULT_VOLUME);

        Self {
            grid,
            clock,
            player,
            state: TransportState::Stopped,
            tempo: timing.tempo,
            playback_rate: timing.playback_rate,
            looping: timing.looping,
            volume: DEFAULT_VOLUME,
            last_preview: None,
        }
    }

    /// Transport state. A non-looping pass that ran out reads as `Stopped`
    /// even before the next call that mutates the sequencer.
    pub fn state(&self) -> TransportState {
        if self.state == TransportState::Playing && !self.clock.is_running() {
            TransportState::Stopped
        } else {
            self.state
        }
    }

    pub fn is_playing(&self) -> bool {
        self.state() == TransportState::Playing
    }

    /// Next step the clock will fire; `None` when stopped.
    pub fn current_step(&self) -> Option<usize> {
        self.clock.current_step()
    }

    /// Throttled visual position.
    pub fn playhead(&self) -> usize {
        self.clock.playhead()
    }

    pub fn grid(&self) -> Arc<Grid> {
        self.grid.load()
    }

    pub fn columns(&self) -> usize {
        self.grid.load().columns()
    }

    pub fn tempo(&self) -> f32 {
        self.tempo
    }

    pub fn playback_rate(&self) -> f32 {
        self.playback_rate
    }

    pub fn looping(&self) -> bool {
        self.looping
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Duration of one step at the current tempo and speed.
    pub fn step_interval(&self) -> Duration {
        self.timing().interval()
    }

    pub fn poll_events(&mut self) -> Vec<PlaybackEvent> {
        let events = self.clock.poll_events();
        self.sync();
        events
    }

    pub fn start(&mut self) {
        self.sync();
        if self.state == TransportState::Playing {
            return;
        }
        self.player.resume();
        self.clock.set_timing(self.timing());
        if self.clock.start() {
            self.state = TransportState::Playing;
            log::info!("playing from step {:?}", self.clock.current_step());
        }
    }

    pub fn pause(&mut self) {
        self.sync();
        if self.state != TransportState::Playing {
            return;
        }
        self.clock.pause();
        self.state = TransportState::Paused;
        log::info!("paused at step {:?}", self.clock.current_step());
    }

    pub fn stop(&mut self) {
        self.clock.stop();
        self.state = TransportState::Stopped;
        log::info!("stopped");
    }

    pub fn toggle_play(&mut self) {
        if self.is_playing() {
            self.pause();
        } else {
            self.start();
        }
    }

    /// Back to step 0. While playing the clock is restarted so the pending
    /// wait does not carry over.
    pub fn reset(&mut self) {
        self.sync();
        if self.state == TransportState::Playing {
            self.clock.pause();
            self.clock.set_step(Some(0));
            self.clock.start();
        } else {
            self.clock.set_step(Some(0));
        }
    }

    pub fn toggle_loop(&mut self) {
        self.looping = !self.looping;
        self.clock.set_timing(self.timing());
    }

    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
        self.clock.set_timing(self.timing());
    }

    pub fn set_tempo(&mut self, tempo: f32) {
        self.tempo = tempo.clamp(MIN_TEMPO, MAX_TEMPO);
        self.clock.set_timing(self.timing());
    }

    pub fn set_playback_rate(&mut self, rate: f32) {
        self.playback_rate = round_to_hundredths(rate.clamp(MIN_SPEED, MAX_SPEED));
        self.clock.set_timing(self.timing());
    }

    pub fn increase_speed(&mut self) {
        self.set_playback_rate(self.playback_rate + SPEED_STEP);
    }

    pub fn decrease_speed(&mut self) {
        self.set_playback_rate(self.playback_rate - SPEED_STEP);
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = round_to_hundredths(volume.clamp(0.0, 1.0));
        self.player.set_volume(self.volume);
    }

    pub fn increase_volume(&mut self) {
        self.set_volume(self.volume + VOLUME_STEP);
    }

    pub fn decrease_volume(&mut self) {
        self.set_volume(self.volume - VOLUME_STEP);
    }

    /// Flips one cell and returns its new value. Out-of-range cells are left
    /// alone and report `false`. Switching a cell on previews its row.
    ///
    /// A toggle counts as a user gesture, so a suspended output is resumed
    /// before the preview.
    pub fn toggle_cell(&mut self, row: usize, col: usize) -> bool {
        let grid = self.grid.load();
        if row >= grid.rows() || col >= grid.columns() {
            return false;
        }
        self.player.resume();
        let active = self.grid.update(|g| g.toggled(row, col)).is_active(row, col);
        if active {
            self.preview(row);
        }
        active
    }

    fn preview(&mut self, row: usize) {
        let now = Instant::now();
        if self
            .last_preview
            .is_some_and(|last| now.saturating_duration_since(last) < PREVIEW_THROTTLE)
        {
            return;
        }
        self.last_preview = Some(now);
        self.player.trigger(
            row,
            TriggerParams {
                gain: 1.0,
                playback_rate: self.playback_rate,
            },
        );
    }

    /// Replaces the grid with an all-inactive one of the same size.
    pub fn clear_all_cells(&mut self) {
        self.grid.update(Grid::cleared);
    }

    /// Replaces the grid, e.g. with one restored from disk.
    pub fn load_grid(&mut self, grid: Grid) {
        let columns = grid.columns();
        self.grid.store(grid);
        self.clock.clamp_step(columns);
    }

    pub fn set_columns(&mut self, columns: usize) {
        let grid = self.grid.update(|g| g.resized(columns));
        self.clock.clamp_step(grid.columns());
    }

    pub fn add_column(&mut self) {
        self.set_columns(self.columns() + 1);
    }

    pub fn remove_column(&mut self) {
        self.set_columns(self.columns().saturating_sub(1));
    }

    pub fn can_add_column(&self) -> bool {
        self.columns() < MAX_COLUMNS
    }

    pub fn can_remove_column(&self) -> bool {
        self.columns() > MIN_COLUMNS
    }

    fn timing(&self) -> Timing {
        Timing {
            tempo: self.tempo,
            playback_rate: self.playback_rate,
            looping: self.looping,
        }
    }

    // picks up a pass that stopped itself
    fn sync(&mut self) {
        if self.state == TransportState::Playing && !self.clock.is_running() {
            self.clock.stop();
            self.state = TransportState::Stopped;
        }
    }
}

fn round_to_hundredths(value: f32) -> f32 {
    (value * 100.0).round() / 100.0
}
