/// Session - the single owner of the matrix, the clock and the trigger sink
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::config::SessionConfig;
use crate::error::{Result, SequencerError};
use crate::sequencer::playback::{dispatch, should_play, SoundTrigger};
use crate::sequencer::{Clock, Matrix, SoundHandle};

/// Shared handle used by the playback thread and the presentation layer.
pub type SharedSession = Arc<Mutex<Session>>;

/// Lock a shared session. Every mutation is a single-shot transition, so a
/// poisoned lock still guards consistent state.
pub fn lock_session(session: &SharedSession) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellAppearance {
    /// Active takes priority over current.
    Active,
    Current,
    Idle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellView {
    pub key: usize,
    pub row: usize,
    pub beat: usize,
    pub active: bool,
    pub current: bool,
    pub sound: Option<String>,
}

impl CellView {
    pub fn appearance(&self) -> CellAppearance {
        if self.active {
            CellAppearance::Active
        } else if self.current {
            CellAppearance::Current
        } else {
            CellAppearance::Idle
        }
    }

    pub fn sounding(&self) -> bool {
        self.active && self.current
    }
}

/// Read-only view for rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Render order: rows from the highest down, beats 1..=row_length.
    pub rows: Vec<Vec<CellView>>,
    pub current_beat: usize,
    pub playing: bool,
    pub row_count: usize,
    pub row_length: usize,
}

impl Snapshot {
    pub fn cell(&self, key: usize) -> Option<&CellView> {
        self.rows.iter().flatten().find(|c| c.key == key)
    }

    pub fn play_label(&self) -> &'static str {
        if self.playing {
            "Stop Playing"
        } else {
            "Start Playing"
        }
    }
}

pub struct Session {
    config: SessionConfig,
    matrix: Matrix,
    clock: Clock,
    trigger: Box<dyn SoundTrigger>,
}

impl Session {
    /// Build a session. Invalid configuration fails here, before any matrix
    /// exists.
    pub fn new(config: SessionConfig, trigger: Box<dyn SoundTrigger>) -> Result<Self> {
        config.validate()?;
        let matrix = Matrix::build(config.row_count, config.row_length, &config.sounds)?;
        let clock = Clock::new(config.row_length, config.speed());

        Ok(Self {
            config,
            matrix,
            clock,
            trigger,
        })
    }

    pub fn into_shared(self) -> SharedSession {
        Arc::new(Mutex::new(self))
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn matrix(&self) -> &Matrix {
        &self.matrix
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn current_beat(&self) -> usize {
        self.clock.current_beat()
    }

    pub fn is_playing(&self) -> bool {
        self.clock.is_playing()
    }

    pub fn speed(&self) -> Duration {
        self.clock.speed()
    }

    /// Flip a cell. Switching a cell on while its beat is current fires it
    /// once; no other cell is re-fired. Returns the cell's new active flag.
    pub fn toggle(&mut self, key: usize) -> Result<bool> {
        let active = self.matrix.toggle(key)?;
        let cell = self.matrix.cell(key)?;
        if should_play(cell, self.clock.current_beat()) {
            match &cell.handle {
                Some(handle) => {
                    log::debug!("trigger key {} ({}) on toggle", key, handle.sound);
                    self.trigger.trigger(handle);
                }
                None => log::warn!(
                    "skipping key {}: {}",
                    key,
                    SequencerError::UnmappedRow { row: cell.row }
                ),
            }
        }
        Ok(active)
    }

    /// Deactivate every cell.
    pub fn clear(&mut self) {
        self.matrix.clear();
    }

    // Clock transitions go through `PlaybackEngine`, which owns the timer.
    pub(crate) fn start(&mut self) -> bool {
        self.clock.start()
    }

    pub(crate) fn stop(&mut self) -> bool {
        self.clock.stop()
    }

    /// Advance one beat and fire every matching cell. `None` while idle.
    pub(crate) fn tick(&mut self) -> Option<(usize, Vec<SoundHandle>)> {
        let beat = self.clock.tick()?;
        log::debug!("beat {}", beat);
        Some((beat, self.evaluate()))
    }

    /// Fire every cell that should sound right now.
    fn evaluate(&mut self) -> Vec<SoundHandle> {
        dispatch(&self.matrix, self.clock.current_beat(), self.trigger.as_mut())
    }

    pub fn snapshot(&self) -> Snapshot {
        let current_beat = self.clock.current_beat();
        let rows = self
            .matrix
            .rows()
            .map(|row| {
                row.map(|cell| CellView {
                    key: cell.key,
                    row: cell.row,
                    beat: cell.beat,
                    active: cell.active,
                    current: cell.beat == current_beat,
                    sound: cell.sound().map(|s| s.name.clone()),
                })
                .collect()
            })
            .collect();

        Snapshot {
            rows,
            current_beat,
            playing: self.clock.is_playing(),
            row_count: self.matrix.row_count(),
            row_length: self.matrix.row_length(),
        }
    }

    /// Keys that would sound on the current beat.
    pub fn sounding_keys(&self) -> Vec<usize> {
        let current_beat = self.clock.current_beat();
        self.matrix
            .cells()
            .filter(|cell| should_play(cell, current_beat))
            .map(|cell| cell.key)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::playback::RecordingTrigger;
    use crate::sequencer::{Sound, SoundTable};

    fn session() -> (Session, RecordingTrigger) {
        let recorder = RecordingTrigger::new();
        let session = Session::new(SessionConfig::default(), Box::new(recorder.clone())).unwrap();
        (session, recorder)
    }

    #[test]
    fn test_invalid_config_builds_nothing() {
        let config = SessionConfig::default().with_rows(0);
        let err = Session::new(config, Box::new(RecordingTrigger::new())).err();
        assert!(matches!(err, Some(SequencerError::InvalidDimensions { .. })));
    }

    #[test]
    fn test_toggle_while_idle_is_silent() {
        let (mut session, recorder) = session();
        assert!(session.toggle(8).unwrap());
        assert!(recorder.hits().is_empty());
        assert!(session.sounding_keys().is_empty());
    }

    #[test]
    fn test_toggle_on_current_beat_fires() {
        let (mut session, recorder) = session();
        session.start();
        session.tick(); // beat 1
        session.toggle(8).unwrap();
        assert_eq!(recorder.keys(), vec![8]);
        assert_eq!(session.sounding_keys(), vec![8]);
    }

    #[test]
    fn test_toggle_fires_only_the_toggled_cell() {
        let (mut session, recorder) = session();
        session.toggle(8).unwrap();
        session.toggle(16).unwrap();
        session.start();
        session.tick(); // beat 1
        assert_eq!(recorder.keys(), vec![8, 16]);

        // key 1 is beat 8: neither switching it on nor off re-fires beat 1
        session.toggle(1).unwrap();
        session.toggle(1).unwrap();
        assert_eq!(recorder.keys(), vec![8, 16]);

        // switching a current cell off is silent, switching it on fires it alone
        session.toggle(8).unwrap();
        assert_eq!(recorder.keys(), vec![8, 16]);
        session.toggle(8).unwrap();
        assert_eq!(recorder.keys(), vec![8, 16, 8]);
    }

    #[test]
    fn test_plays_pattern_over_a_bar() {
        let (mut session, recorder) = session();
        // row 1 on beats 1, 3, 5, 7
        for key in [8, 6, 4, 2] {
            session.toggle(key).unwrap();
        }
        session.start();
        for _ in 0..8 {
            session.tick();
        }
        assert_eq!(recorder.keys(), vec![8, 6, 4, 2]);
        assert!(recorder.hits().iter().all(|h| h.sound.name == "D2"));
    }

    #[test]
    fn test_rows_beyond_sound_table_stay_silent() {
        let recorder = RecordingTrigger::new();
        let sounds = SoundTable::empty().with_row(1, Sound::new("kick", 36));
        let config = SessionConfig::default().with_rows(2).with_sounds(sounds);
        let mut session = Session::new(config, Box::new(recorder.clone())).unwrap();

        session.toggle(8).unwrap();
        session.toggle(16).unwrap();
        session.start();
        let (_, fired) = session.tick().unwrap();
        assert_eq!(fired.len(), 1);
        assert_eq!(recorder.keys(), vec![8]);

        // switching an unmapped cell on at its beat is skipped too
        session.toggle(16).unwrap();
        session.toggle(16).unwrap();
        assert_eq!(recorder.keys(), vec![8]);
    }

    #[test]
    fn test_toggle_unknown_key_fails() {
        let (mut session, _) = session();
        assert!(matches!(
            session.toggle(99),
            Err(SequencerError::KeyNotFound { key: 99, .. })
        ));
    }

    #[test]
    fn test_tick_fires_active_cells() {
        let (mut session, recorder) = session();
        session.toggle(8).unwrap(); // beat 1
        session.toggle(6).unwrap(); // beat 3
        session.start();

        let fired: Vec<Vec<usize>> = (0..3)
            .map(|_| {
                let (_, handles) = session.tick().unwrap();
                handles.iter().map(|h| h.key).collect()
            })
            .collect();
        assert_eq!(fired, vec![vec![8], vec![], vec![6]]);
        assert_eq!(recorder.keys(), vec![8, 6]);
    }

    #[test]
    fn test_stop_resets_and_silences() {
        let (mut session, recorder) = session();
        session.toggle(8).unwrap();
        session.start();
        session.tick();
        assert!(session.stop());
        assert_eq!(session.current_beat(), 0);
        assert!(session.tick().is_none());
        assert_eq!(recorder.keys(), vec![8]);
    }

    #[test]
    fn test_snapshot() {
        let (mut session, _) = session();
        session.toggle(8).unwrap();
        session.start();
        session.tick();
        session.tick(); // beat 2

        let snap = session.snapshot();
        assert_eq!(snap.rows.len(), 4);
        assert!(snap.rows.iter().all(|r| r.len() == 8));
        assert_eq!(snap.rows[0][0].key, 32);
        assert_eq!(snap.rows[3][7].key, 1);
        assert_eq!(snap.current_beat, 2);
        assert_eq!(snap.play_label(), "Stop Playing");

        let active = snap.cell(8).unwrap();
        assert_eq!(active.appearance(), CellAppearance::Active);
        assert!(!active.sounding());
        assert_eq!(snap.cell(7).unwrap().appearance(), CellAppearance::Current);
        assert_eq!(snap.cell(1).unwrap().appearance(), CellAppearance::Idle);
        assert_eq!(snap.cell(8).unwrap().sound.as_deref(), Some("D2"));
    }

    #[test]
    fn test_clear() {
        let (mut session, _) = session();
        session.toggle(1).unwrap();
        session.toggle(2).unwrap();
        session.clear();
        assert!(session.matrix().active_keys().is_empty());
        assert_eq!(session.snapshot().play_label(), "Start Playing");
    }
}
