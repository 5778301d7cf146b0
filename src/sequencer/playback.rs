/// Playback engine - coordinates timing and triggers
///
/// Two loops run while playing. The step loop polls every millisecond and
/// fires a column once the interval since the last committed step has
/// elapsed; it is the only thing that triggers audio. The visual loop wakes
/// at display rate and mirrors the last fired column into the playhead, at
/// most once per `PLAYHEAD_THROTTLE`.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use crossbeam_channel::{Receiver, Sender};

use super::grid::{Grid, GridCell};
use super::player::{SamplePlayer, TriggerParams};

pub const PLAYHEAD_THROTTLE: Duration = Duration::from_millis(100);
const STEP_POLL: Duration = Duration::from_millis(1);
const VISUAL_FRAME: Duration = Duration::from_millis(16);
const EVENT_QUEUE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// Throttled playhead position for display.
    Playhead(usize),
    /// A non-looping pass reached the end and the transport stopped itself.
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timing {
    pub tempo: f32,
    pub playback_rate: f32,
    pub looping: bool,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            tempo: 120.0,
            playback_rate: 1.0,
            looping: true,
        }
    }
}

impl Timing {
    pub fn interval(&self) -> Duration {
        step_interval(self.tempo, self.playback_rate)
    }
}

/// Length of one sixteenth-note step: `(60000 / tempo) / (4 * rate)` ms.
pub fn step_interval(tempo: f32, playback_rate: f32) -> Duration {
    let tempo = tempo.max(f32::EPSILON) as f64;
    let rate = playback_rate.max(f32::EPSILON) as f64;
    Duration::from_secs_f64(60.0 / tempo / (4.0 * rate))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Waiting,
    Fired { step: usize },
    /// `step` fired and the pass ended because looping is off.
    Finished { step: usize },
}

/// Step-loop state: which column fires next and when the last one fired.
#[derive(Debug, Default, Clone)]
pub struct StepScheduler {
    step: Option<usize>,
    last_fired: Option<usize>,
    last_commit: Option<Instant>,
    interval: Duration,
}

impl StepScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next column to fire. `None` until playback has been started.
    pub fn current_step(&self) -> Option<usize> {
        self.step
    }

    pub fn last_fired(&self) -> Option<usize> {
        self.last_fired
    }

    pub fn set_step(&mut self, step: Option<usize>) {
        self.step = step;
    }

    /// Prepares a run: starts from step 0 unless a position is already set,
    /// and makes the first poll fire immediately.
    pub fn begin(&mut self) {
        self.step.get_or_insert(0);
        self.last_commit = None;
    }

    pub fn clamp_to(&mut self, columns: usize) {
        if let Some(step) = self.step.as_mut() {
            *step %= columns.max(1);
        }
    }

    /// One step-loop callback. Reads `grid` as given, which must be the
    /// latest committed grid. The wait before the next step uses the
    /// interval in effect when this step fired.
    pub fn poll(
        &mut self,
        now: Instant,
        grid: &Grid,
        timing: &Timing,
        player: &dyn SamplePlayer,
    ) -> StepOutcome {
        if let Some(last) = self.last_commit {
            if now.saturating_duration_since(last) < self.interval {
                return StepOutcome::Waiting;
            }
        }

        let columns = grid.columns().max(1);
        let step = self.step.unwrap_or(0) % columns;

        let params = TriggerParams {
            gain: 1.0,
            playback_rate: timing.playback_rate,
        };
        for row in grid.active_rows(step) {
            player.trigger(row, params);
        }
        self.last_fired = Some(step);

        // Commit relative to the previous commit so late callbacks do not
        // accumulate drift. After a stall longer than a step, restart from now.
        let commit = match self.last_commit {
            Some(last) if now.saturating_duration_since(last) < self.interval * 2 => last + self.interval,
            _ => now,
        };
        self.last_commit = Some(commit);
        self.interval = timing.interval();

        let next = (step + 1) % columns;
        if next == 0 && !timing.looping {
            self.step = None;
            self.last_commit = None;
            return StepOutcome::Finished { step };
        }
        self.step = Some(next);
        StepOutcome::Fired { step }
    }
}

/// Rate limiter for playhead updates.
#[derive(Debug, Clone)]
pub struct VisualThrottle {
    period: Duration,
    last_publish: Option<Instant>,
    last_value: Option<usize>,
}

impl VisualThrottle {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            last_publish: None,
            last_value: None,
        }
    }

    /// Returns the value to publish, if any. Publishes only changed values
    /// and never twice within `period`.
    pub fn poll(&mut self, now: Instant, position: Option<usize>) -> Option<usize> {
        let position = position?;
        if self.last_value == Some(position) {
            return None;
        }
        if let Some(last) = self.last_publish {
            if now.saturating_duration_since(last) < self.period {
                return None;
            }
        }
        self.last_publish = Some(now);
        self.last_value = Some(position);
        Some(position)
    }
}

#[derive(Debug, Default)]
struct LoopState {
    scheduler: StepScheduler,
    active: bool,
    epoch: u64,
}

impl LoopState {
    // a loop may only act while this holds; checked under the lock
    fn owns(&self, epoch: u64) -> bool {
        self.active && self.epoch == epoch
    }
}

struct ClockShared {
    grid: Arc<GridCell>,
    timing: ArcSwap<Timing>,
    state: Mutex<LoopState>,
    playhead: AtomicUsize,
    player: Arc<dyn SamplePlayer>,
    events: Sender<PlaybackEvent>,
}

impl ClockShared {
    fn lock(&self) -> MutexGuard<'_, LoopState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, event: PlaybackEvent) {
        let _ = self.events.try_send(event);
    }
}

/// Runs the step and visual loops on their own threads.
pub struct TransportClock {
    shared: Arc<ClockShared>,
    receiver: Receiver<PlaybackEvent>,
    step_loop: Option<JoinHandle<()>>,
    visual_loop: Option<JoinHandle<()>>,
}

impl TransportClock {
    pub fn new(grid: Arc<GridCell>, player: Arc<dyn SamplePlayer>, timing: Timing) -> Self {
        let (sender, receiver) = crossbeam_channel::bounded(EVENT_QUEUE);
        Self {
            shared: Arc::new(ClockShared {
                grid,
                timing: ArcSwap::from_pointee(timing),
                state: Mutex::new(LoopState::default()),
                playhead: AtomicUsize::new(0),
                player,
                events: sender,
            }),
            receiver,
            step_loop: None,
            visual_loop: None,
        }
    }

    /// Takes effect from the next step onwards.
    pub fn set_timing(&self, timing: Timing) {
        self.shared.timing.store(Arc::new(timing));
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().active
    }

    pub fn current_step(&self) -> Option<usize> {
        self.shared.lock().scheduler.current_step()
    }

    pub fn set_step(&self, step: Option<usize>) {
        self.shared.lock().scheduler.set_step(step);
    }

    pub fn clamp_step(&self, columns: usize) {
        self.shared.lock().scheduler.clamp_to(columns);
    }

    /// Last position published by the visual loop.
    pub fn playhead(&self) -> usize {
        self.shared.playhead.load(Ordering::Relaxed)
    }

    /// Starts both loops. Returns false if they are already running.
    pub fn start(&mut self) -> bool {
        let epoch = {
            let mut state = self.shared.lock();
            if state.active {
                return false;
            }
            state.active = true;
            state.epoch += 1;
            state.scheduler.begin();
            state.epoch
        };
        // threads left over from a pass that finished on its own
        self.join_loops();

        let shared = Arc::clone(&self.shared);
        self.step_loop = spawn_loop("beatgrid-step", move || run_step_loop(shared, epoch));
        let shared = Arc::clone(&self.shared);
        self.visual_loop = spawn_loop("beatgrid-playhead", move || run_visual_loop(shared, epoch));

        if self.step_loop.is_none() {
            self.shared.lock().active = false;
            return false;
        }
        log::debug!("transport clock started at step {:?}", self.current_step());
        true
    }

    /// Stops both loops and keeps the position for a later `start`.
    pub fn pause(&mut self) {
        self.halt();
    }

    /// Stops both loops and forgets the position.
    pub fn stop(&mut self) {
        {
            let mut state = self.shared.lock();
            state.active = false;
            state.epoch += 1;
            state.scheduler = StepScheduler::new();
            self.shared.playhead.store(0, Ordering::Relaxed);
        }
        self.shared.publish(PlaybackEvent::Playhead(0));
        self.join_loops();
    }

    /// Drains pending events without blocking.
    pub fn poll_events(&self) -> Vec<PlaybackEvent> {
        self.receiver.try_iter().collect()
    }

    fn halt(&mut self) {
        {
            let mut state = self.shared.lock();
            state.active = false;
            state.epoch += 1;
        }
        self.join_loops();
    }

    fn join_loops(&mut self) {
        for handle in [self.step_loop.take(), self.visual_loop.take()].into_iter().flatten() {
            if handle.join().is_err() {
                log::error!("transport loop panicked");
            }
        }
    }
}

impl Drop for TransportClock {
    fn drop(&mut self) {
        self.halt();
    }
}

fn spawn_loop<F>(name: &str, f: F) -> Option<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    match thread::Builder::new().name(name.to_string()).spawn(f) {
        Ok(handle) => Some(handle),
        Err(e) => {
            log::error!("failed to spawn {name}: {e}");
            None
        }
    }
}

fn run_step_loop(shared: Arc<ClockShared>, epoch: u64) {
    loop {
        {
            let mut state = shared.lock();
            if !state.owns(epoch) {
                break;
            }
            let grid = shared.grid.load();
            let timing = **shared.timing.load();
            match state
                .scheduler
                .poll(Instant::now(), &grid, &timing, shared.player.as_ref())
            {
                StepOutcome::Waiting => {}
                StepOutcome::Fired { step } => log::trace!("step {step}"),
                StepOutcome::Finished { step } => {
                    log::debug!("pass finished after step {step}");
                    state.active = false;
                    shared.playhead.store(0, Ordering::Relaxed);
                    shared.publish(PlaybackEvent::Finished);
                    break;
                }
            }
        }
        thread::sleep(STEP_POLL);
    }
}

fn run_visual_loop(shared: Arc<ClockShared>, epoch: u64) {
    let mut throttle = VisualThrottle::new(PLAYHEAD_THROTTLE);
    loop {
        {
            let state = shared.lock();
            if !state.owns(epoch) {
                break;
            }
            if let Some(step) = throttle.poll(Instant::now(), state.scheduler.last_fired()) {
                shared.playhead.store(step, Ordering::Relaxed);
                shared.publish(PlaybackEvent::Playhead(step));
            }
        }
        thread::sleep(VISUAL_FRAME);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::player::testing::RecordingPlayer;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn looping(tempo: f32) -> Timing {
        Timing {
            tempo,
            playback_rate: 1.0,
            looping: true,
        }
    }

    #[test]
    fn test_step_interval() {
        assert_eq!(step_interval(120.0, 1.0), ms(125));
        assert_eq!(step_interval(120.0, 2.0), Duration::from_secs_f64(0.0625));
        assert_eq!(step_interval(60.0, 0.5), ms(500));
    }

    #[test]
    fn test_first_poll_fires_immediately() {
        let grid = Grid::new(1, 4).toggled(0, 0);
        let player = RecordingPlayer::default();
        let mut sched = StepScheduler::new();
        sched.begin();
        let t0 = Instant::now();
        assert_eq!(sched.poll(t0, &grid, &looping(120.0), &player), StepOutcome::Fired { step: 0 });
        assert_eq!(player.rows(), vec![0]);
        assert_eq!(sched.current_step(), Some(1));
    }

    #[test]
    fn test_waits_for_interval() {
        let grid = Grid::new(1, 4);
        let player = RecordingPlayer::default();
        let mut sched = StepScheduler::new();
        sched.begin();
        let t0 = Instant::now();
        let timing = looping(120.0);
        sched.poll(t0, &grid, &timing, &player);
        assert_eq!(sched.poll(t0 + ms(124), &grid, &timing, &player), StepOutcome::Waiting);
        assert_eq!(sched.poll(t0 + ms(125), &grid, &timing, &player), StepOutcome::Fired { step: 1 });
    }

    #[test]
    fn test_step_sequence_wraps_without_skipping() {
        let grid = Grid::new(1, 8);
        let player = RecordingPlayer::default();
        let mut sched = StepScheduler::new();
        sched.begin();
        let t0 = Instant::now();
        let timing = looping(120.0);

        let mut fired = Vec::new();
        for tick in 0..20u64 {
            // poll a few times per step, as the loop does
            for offset in [0, 40, 80] {
                if let StepOutcome::Fired { step } = sched.poll(t0 + ms(tick * 125 + offset), &grid, &timing, &player) {
                    fired.push(step);
                }
            }
        }
        let expected: Vec<usize> = (0..20).map(|i| i % 8).collect();
        assert_eq!(fired, expected);
    }

    #[test]
    fn test_jitter_does_not_accumulate() {
        let grid = Grid::new(1, 4);
        let player = RecordingPlayer::default();
        let mut sched = StepScheduler::new();
        sched.begin();
        let t0 = Instant::now();
        let timing = looping(120.0);
        sched.poll(t0, &grid, &timing, &player);
        // every callback arrives 3ms late; the grid of commits stays on 125ms
        for n in 1..=10u64 {
            assert!(matches!(
                sched.poll(t0 + ms(n * 125 + 3), &grid, &timing, &player),
                StepOutcome::Fired { .. }
            ));
        }
        assert_eq!(sched.poll(t0 + ms(11 * 125 - 1), &grid, &timing, &player), StepOutcome::Waiting);
        assert!(matches!(sched.poll(t0 + ms(11 * 125), &grid, &timing, &player), StepOutcome::Fired { .. }));
    }

    #[test]
    fn test_stall_does_not_burst() {
        let grid = Grid::new(1, 8);
        let player = RecordingPlayer::default();
        let mut sched = StepScheduler::new();
        sched.begin();
        let t0 = Instant::now();
        let timing = looping(120.0);
        sched.poll(t0, &grid, &timing, &player);
        assert!(matches!(sched.poll(t0 + ms(1000), &grid, &timing, &player), StepOutcome::Fired { step: 1 }));
        assert_eq!(sched.poll(t0 + ms(1001), &grid, &timing, &player), StepOutcome::Waiting);
        assert!(matches!(sched.poll(t0 + ms(1125), &grid, &timing, &player), StepOutcome::Fired { step: 2 }));
    }

    #[test]
    fn test_non_looping_finishes_after_last_column() {
        let grid = Grid::new(1, 4);
        let player = RecordingPlayer::default();
        let mut sched = StepScheduler::new();
        sched.begin();
        let t0 = Instant::now();
        let timing = Timing {
            looping: false,
            ..looping(120.0)
        };
        let outcomes: Vec<StepOutcome> = (0..4u64)
            .map(|n| sched.poll(t0 + ms(n * 125), &grid, &timing, &player))
            .collect();
        assert_eq!(
            outcomes,
            vec![
                StepOutcome::Fired { step: 0 },
                StepOutcome::Fired { step: 1 },
                StepOutcome::Fired { step: 2 },
                StepOutcome::Finished { step: 3 },
            ]
        );
        assert_eq!(sched.current_step(), None);
    }

    #[test]
    fn test_reads_latest_grid_each_step() {
        let cell = GridCell::new(Grid::new(2, 4));
        let player = RecordingPlayer::default();
        let mut sched = StepScheduler::new();
        sched.begin();
        let t0 = Instant::now();
        let timing = looping(120.0);
        sched.poll(t0, &cell.load(), &timing, &player);
        cell.update(|g| g.toggled(1, 1));
        sched.poll(t0 + ms(125), &cell.load(), &timing, &player);
        assert_eq!(player.rows(), vec![1]);
    }

    #[test]
    fn test_tempo_change_applies_to_next_wait() {
        let grid = Grid::new(1, 8);
        let player = RecordingPlayer::default();
        let mut sched = StepScheduler::new();
        sched.begin();
        let t0 = Instant::now();
        sched.poll(t0, &grid, &looping(120.0), &player);
        // doubling the tempo mid-wait leaves the pending 125ms wait alone
        let fast = looping(240.0);
        assert_eq!(sched.poll(t0 + ms(70), &grid, &fast, &player), StepOutcome::Waiting);
        assert!(matches!(sched.poll(t0 + ms(125), &grid, &fast, &player), StepOutcome::Fired { step: 1 }));
        assert!(matches!(sched.poll(t0 + ms(125 + 63), &grid, &fast, &player), StepOutcome::Fired { step: 2 }));
    }

    #[test]
    fn test_shrinking_grid_clamps_step() {
        let grid = Grid::new(1, 8);
        let player = RecordingPlayer::default();
        let mut sched = StepScheduler::new();
        sched.set_step(Some(6));
        sched.begin();
        let small = grid.resized(4);
        assert_eq!(sched.poll(Instant::now(), &small, &looping(120.0), &player), StepOutcome::Fired { step: 2 });

        sched.set_step(Some(7));
        sched.clamp_to(4);
        assert_eq!(sched.current_step(), Some(3));
    }

    #[test]
    fn test_end_to_end_trigger_times() {
        let grid = Grid::new(2, 8)
            .toggled(0, 0)
            .toggled(0, 4)
            .toggled(1, 2)
            .toggled(1, 6);
        let player = RecordingPlayer::default();
        let mut sched = StepScheduler::new();
        sched.begin();
        let t0 = Instant::now();
        let timing = looping(120.0);

        let mut hits = Vec::new();
        for t in 0..2000u64 {
            let before = player.count();
            sched.poll(t0 + ms(t), &grid, &timing, &player);
            for row in player.rows().into_iter().skip(before) {
                hits.push((row, t));
            }
        }
        let expected: Vec<(usize, u64)> = (0..8u64).map(|i| ((i % 2) as usize, i * 250)).collect();
        assert_eq!(hits, expected);
    }

    #[test]
    fn test_visual_throttle() {
        let mut throttle = VisualThrottle::new(PLAYHEAD_THROTTLE);
        let t0 = Instant::now();
        assert_eq!(throttle.poll(t0, None), None);
        assert_eq!(throttle.poll(t0, Some(0)), Some(0));
        assert_eq!(throttle.poll(t0 + ms(16), Some(1)), None);
        assert_eq!(throttle.poll(t0 + ms(99), Some(1)), None);
        assert_eq!(throttle.poll(t0 + ms(100), Some(1)), Some(1));
        // unchanged values are not republished
        assert_eq!(throttle.poll(t0 + ms(300), Some(1)), None);
        assert_eq!(throttle.poll(t0 + ms(301), Some(3)), Some(3));
    }

    #[test]
    fn test_clock_stop_leaves_no_pending_triggers() {
        let cell = Arc::new(GridCell::new(Grid::new(1, 4).toggled(0, 0).toggled(0, 1).toggled(0, 2).toggled(0, 3)));
        let player = Arc::new(RecordingPlayer::default());
        let timing = Timing {
            tempo: 300.0,
            playback_rate: 2.0,
            looping: true,
        };
        let mut clock = TransportClock::new(cell, player.clone(), timing);

        assert!(clock.start());
        assert!(!clock.start());
        thread::sleep(ms(120));
        clock.stop();
        let count = player.count();
        assert!(count >= 1);
        assert!(!clock.is_running());
        assert_eq!(clock.current_step(), None);

        thread::sleep(ms(100));
        assert_eq!(player.count(), count);
    }

    #[test]
    fn test_clock_pause_keeps_position() {
        let cell = Arc::new(GridCell::new(Grid::new(1, 8)));
        let player = Arc::new(RecordingPlayer::default());
        let mut clock = TransportClock::new(cell, player, looping(120.0));
        clock.set_step(Some(5));
        clock.start();
        clock.pause();
        // the first poll fires step 5 immediately, so the cursor is 5 or 6
        let step = clock.current_step().unwrap();
        assert!(step == 5 || step == 6);
        thread::sleep(ms(200));
        assert_eq!(clock.current_step(), Some(step));
    }
}
