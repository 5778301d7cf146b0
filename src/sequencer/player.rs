use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriggerParams {
    pub gain: f32,
    pub playback_rate: f32,
}

impl Default for TriggerParams {
    fn default() -> Self {
        Self {
            gain: 1.0,
            playback_rate: 1.0,
        }
    }
}

/// Whatever makes a row audible. Triggers are fire-and-forget: an
/// implementation that cannot play must return quietly.
pub trait SamplePlayer: Send + Sync {
    fn trigger(&self, row: usize, params: TriggerParams);

    /// Master volume in [0, 1].
    fn set_volume(&self, _volume: f32) {}

    /// Called on user-initiated playback so a suspended output can resume.
    fn resume(&self) {}
}

/// Fans every call out to several players, e.g. the sample bank and a MIDI port.
#[derive(Default)]
pub struct PlayerSet {
    players: Vec<Arc<dyn SamplePlayer>>,
}

impl PlayerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, player: Arc<dyn SamplePlayer>) -> Self {
        self.players.push(player);
        self
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}

impl SamplePlayer for PlayerSet {
    fn trigger(&self, row: usize, params: TriggerParams) {
        for player in &self.players {
            player.trigger(row, params);
        }
    }

    fn set_volume(&self, volume: f32) {
        for player in &self.players {
            player.set_volume(volume);
        }
    }

    fn resume(&self) {
        for player in &self.players {
            player.resume();
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;
    use std::time::Instant;

    /// Records every call, with the wall-clock time of each trigger.
    #[derive(Default)]
    pub struct RecordingPlayer {
        pub triggers: Mutex<Vec<(usize, TriggerParams, Instant)>>,
        pub volumes: Mutex<Vec<f32>>,
        pub resumes: Mutex<usize>,
    }

    impl RecordingPlayer {
        pub fn rows(&self) -> Vec<usize> {
            self.triggers.lock().unwrap().iter().map(|(row, _, _)| *row).collect()
        }

        pub fn count(&self) -> usize {
            self.triggers.lock().unwrap().len()
        }

        pub fn clear(&self) {
            self.triggers.lock().unwrap().clear();
        }
    }

    impl SamplePlayer for RecordingPlayer {
        fn trigger(&self, row: usize, params: TriggerParams) {
            self.triggers.lock().unwrap().push((row, params, Instant::now()));
        }

        fn set_volume(&self, volume: f32) {
            self.volumes.lock().unwrap().push(volume);
        }

        fn resume(&self) {
            *self.resumes.lock().unwrap() += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingPlayer;
    use super::*;

    #[test]
    fn test_player_set_fans_out() {
        let a = Arc::new(RecordingPlayer::default());
        let b = Arc::new(RecordingPlayer::default());
        let set = PlayerSet::new().with(a.clone()).with(b.clone());
        assert_eq!(set.len(), 2);

        set.trigger(3, TriggerParams::default());
        set.set_volume(0.4);
        set.resume();

        for player in [&a, &b] {
            assert_eq!(player.rows(), vec![3]);
            assert_eq!(*player.volumes.lock().unwrap(), vec![0.4]);
            assert_eq!(*player.resumes.lock().unwrap(), 1);
        }
    }
}
