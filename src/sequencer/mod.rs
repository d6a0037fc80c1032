/// Core sequencer logic - beat matrix and clock state
/// The matrix is dimension-agnostic; rows map to sounds, columns to beats
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SequencerError};
use crate::midi::midi_note_name;

pub mod playback;

/// A sound identity. Every cell in a row shares one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sound {
    pub name: String,
    /// MIDI note used by the MIDI output and as the pitch of the audio voice.
    pub note: u8,
}

impl Sound {
    pub fn new(name: impl Into<String>, note: u8) -> Self {
        Self {
            name: name.into(),
            note: note.min(127),
        }
    }

    /// A sound named after its note, e.g. `D2`.
    pub fn from_note(note: u8) -> Self {
        let note = note.min(127);
        Self::new(midi_note_name(note), note)
    }
}

impl fmt::Display for Sound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Row (1-based) to sound assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SoundTable(BTreeMap<usize, Sound>);

impl SoundTable {
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    pub fn with_row(mut self, row: usize, sound: Sound) -> Self {
        self.0.insert(row, sound);
        self
    }

    pub fn get(&self, row: usize) -> Option<&Sound> {
        self.0.get(&row)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Sound)> {
        self.0.iter().map(|(row, sound)| (*row, sound))
    }
}

impl Default for SoundTable {
    // D2, E2, A2, B2
    fn default() -> Self {
        Self::empty()
            .with_row(1, Sound::from_note(38))
            .with_row(2, Sound::from_note(40))
            .with_row(3, Sound::from_note(45))
            .with_row(4, Sound::from_note(47))
    }
}

/// A cell's own playable handle. Triggering it starts a new playback
/// instance on the output, so hits never cut each other off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoundHandle {
    pub key: usize,
    pub sound: Sound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub key: usize,
    pub row: usize,
    pub beat: usize,
    pub active: bool,
    pub handle: Option<SoundHandle>,
}

impl Cell {
    pub fn sound(&self) -> Option<&Sound> {
        self.handle.as_ref().map(|h| &h.sound)
    }
}

/// Largest grid a session will build.
pub const MAX_CELLS: usize = 4096;

/// Number of cells in a `row_count` x `row_length` grid, rejecting empty
/// grids and grids above `MAX_CELLS`.
pub fn cell_count(row_count: usize, row_length: usize) -> Result<usize> {
    row_count
        .checked_mul(row_length)
        .filter(|total| (1..=MAX_CELLS).contains(total))
        .ok_or(SequencerError::InvalidDimensions {
            row_count,
            row_length,
        })
}

/// Beat (1..=row_length) of a key. Keys count down within a row while
/// beats count up: the highest key of a row is beat 1.
pub fn beat_for_key(key: usize, row_length: usize) -> usize {
    match key % row_length {
        0 => 1,
        calc => row_length - calc + 1,
    }
}

/// Row (1..=row_count) of a key.
pub fn row_for_key(key: usize, row_length: usize) -> usize {
    let calc_row = key / row_length;
    if key % row_length == 0 {
        calc_row
    } else {
        calc_row + 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Matrix {
    // cells[key - 1]
    cells: Vec<Cell>,
    row_count: usize,
    row_length: usize,
}

impl Matrix {
    pub fn build(row_count: usize, row_length: usize, sounds: &SoundTable) -> Result<Self> {
        let total = cell_count(row_count, row_length)?;
        let mut cells = Vec::with_capacity(total);
        for key in 1..=total {
            let row = row_for_key(key, row_length);
            let handle = sounds.get(row).map(|sound| SoundHandle {
                key,
                sound: sound.clone(),
            });
            cells.push(Cell {
                key,
                row,
                beat: beat_for_key(key, row_length),
                active: false,
                handle,
            });
        }

        for row in (1..=row_count).filter(|row| sounds.get(*row).is_none()) {
            log::warn!("row {} has no assigned sound and will stay silent", row);
        }

        Ok(Self {
            cells,
            row_count,
            row_length,
        })
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn row_length(&self) -> usize {
        self.row_length
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn cell(&self, key: usize) -> Result<&Cell> {
        key.checked_sub(1)
            .and_then(|idx| self.cells.get(idx))
            .ok_or(SequencerError::KeyNotFound {
                key,
                cell_count: self.cells.len(),
            })
    }

    fn cell_mut(&mut self, key: usize) -> Result<&mut Cell> {
        let cell_count = self.cells.len();
        key.checked_sub(1)
            .and_then(|idx| self.cells.get_mut(idx))
            .ok_or(SequencerError::KeyNotFound { key, cell_count })
    }

    /// Flip a cell's active flag, returning the new value.
    pub fn toggle(&mut self, key: usize) -> Result<bool> {
        let cell = self.cell_mut(key)?;
        cell.active = !cell.active;
        Ok(cell.active)
    }

    pub fn set_active(&mut self, key: usize, active: bool) -> Result<()> {
        self.cell_mut(key)?.active = active;
        Ok(())
    }

    pub fn sound_for(&self, key: usize) -> Result<&Sound> {
        let cell = self.cell(key)?;
        cell.sound()
            .ok_or(SequencerError::UnmappedRow { row: cell.row })
    }

    /// Cells in key order.
    pub fn cells(&self) -> impl Iterator<Item = &Cell> {
        self.cells.iter()
    }

    /// Rows in render order: the highest row first, each row walked from
    /// its highest key down so beats read 1..=row_length.
    pub fn rows(&self) -> impl Iterator<Item = impl Iterator<Item = &Cell>> {
        (1..=self.row_count).rev().map(move |row| {
            let start = (row - 1) * self.row_length;
            self.cells[start..start + self.row_length].iter().rev()
        })
    }

    pub fn active_keys(&self) -> Vec<usize> {
        self.cells
            .iter()
            .filter(|cell| cell.active)
            .map(|cell| cell.key)
            .collect()
    }

    pub fn clear(&mut self) {
        for cell in &mut self.cells {
            cell.active = false;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockState {
    Idle,
    Running,
}

/// Sequencer clock state: `current_beat` is 0 while idle and cycles
/// 1..=row_length while running.
#[derive(Debug, Clone)]
pub struct Clock {
    current_beat: usize,
    playing: bool,
    row_length: usize,
    speed: Duration,
}

impl Clock {
    pub fn new(row_length: usize, speed: Duration) -> Self {
        Self {
            current_beat: 0,
            playing: false,
            row_length,
            speed,
        }
    }

    pub fn state(&self) -> ClockState {
        if self.playing {
            ClockState::Running
        } else {
            ClockState::Idle
        }
    }

    pub fn current_beat(&self) -> usize {
        self.current_beat
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn speed(&self) -> Duration {
        self.speed
    }

    pub fn row_length(&self) -> usize {
        self.row_length
    }

    /// Returns false if already running.
    pub fn start(&mut self) -> bool {
        if self.playing {
            return false;
        }
        self.playing = true;
        true
    }

    /// Returns false if already idle.
    pub fn stop(&mut self) -> bool {
        if !self.playing {
            return false;
        }
        self.playing = false;
        self.current_beat = 0;
        true
    }

    /// Flip between running and idle, returning the new playing flag.
    pub fn toggle_playing(&mut self) -> bool {
        if self.playing {
            self.stop();
        } else {
            self.start();
        }
        self.playing
    }

    /// Advance one beat. Does nothing while idle.
    pub fn tick(&mut self) -> Option<usize> {
        if !self.playing {
            return None;
        }
        if self.current_beat >= self.row_length {
            self.current_beat = 1;
        } else {
            self.current_beat += 1;
        }
        Some(self.current_beat)
    }
}
