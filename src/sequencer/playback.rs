/// Playback engine - decides which cells sound and drives the beat clock
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use super::{Cell, Matrix, Sound, SoundHandle};
use crate::error::SequencerError;
use crate::session::{lock_session, SharedSession};

/// A cell sounds when it is active and sits on the current beat.
/// Beat 0 (idle) never matches.
pub fn should_play(cell: &Cell, current_beat: usize) -> bool {
    cell.active && cell.beat == current_beat
}

/// Something that can start a new playback instance of a cell's sound.
pub trait SoundTrigger: Send {
    fn trigger(&mut self, handle: &SoundHandle);
}

/// Discards every trigger.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTrigger;

impl SoundTrigger for NullTrigger {
    fn trigger(&mut self, _handle: &SoundHandle) {}
}

/// Keeps every trigger in a shared log. Clones share the same log.
#[derive(Debug, Default, Clone)]
pub struct RecordingTrigger {
    hits: Arc<Mutex<Vec<SoundHandle>>>,
}

impl RecordingTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hits(&self) -> Vec<SoundHandle> {
        self.hits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn keys(&self) -> Vec<usize> {
        self.hits().iter().map(|h| h.key).collect()
    }

    pub fn clear(&self) {
        self.hits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl SoundTrigger for RecordingTrigger {
    fn trigger(&mut self, handle: &SoundHandle) {
        self.hits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle.clone());
    }
}

/// Shared sinks, e.g. a MIDI device the UI also reconnects.
impl<T: SoundTrigger> SoundTrigger for Arc<Mutex<T>> {
    fn trigger(&mut self, handle: &SoundHandle) {
        self.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .trigger(handle);
    }
}

/// Fan a trigger out to several sinks in order.
impl SoundTrigger for Vec<Box<dyn SoundTrigger>> {
    fn trigger(&mut self, handle: &SoundHandle) {
        for sink in self.iter_mut() {
            sink.trigger(handle);
        }
    }
}

/// Evaluate every cell against `current_beat` and fire the trigger once per
/// match. Cells in rows without a sound are skipped. Returns the handles
/// that were fired.
pub fn dispatch(
    matrix: &Matrix,
    current_beat: usize,
    trigger: &mut dyn SoundTrigger,
) -> Vec<SoundHandle> {
    let mut fired = Vec::new();
    for cell in matrix.cells().filter(|cell| should_play(cell, current_beat)) {
        match &cell.handle {
            Some(handle) => {
                log::debug!("trigger key {} ({}) on beat {}", cell.key, handle.sound, current_beat);
                trigger.trigger(handle);
                fired.push(handle.clone());
            }
            None => log::warn!(
                "skipping key {}: {}",
                cell.key,
                SequencerError::UnmappedRow { row: cell.row }
            ),
        }
    }
    fired
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    BeatAdvanced(usize),
    Triggered { key: usize, sound: Sound },
    Stopped,
}

struct Worker {
    cancel: Sender<()>,
    handle: JoinHandle<()>,
}

/// Runs the repeating tick on a background thread.
///
/// The session mutex is the single writer region: a tick is applied only
/// while holding it, and only if the clock is still running, so once
/// `stop` has reset the clock no further tick can land.
pub struct PlaybackEngine {
    sender: Sender<PlaybackEvent>,
    receiver: Receiver<PlaybackEvent>,
    worker: Option<Worker>,
}

impl PlaybackEngine {
    pub fn new() -> Self {
        let (sender, receiver) = channel();

        Self {
            sender,
            receiver,
            worker: None,
        }
    }

    /// Start the clock and its timer. Returns false if already running.
    pub fn start(&mut self, session: &SharedSession) -> bool {
        if lock_session(session).is_playing() && self.is_running() {
            return false;
        }
        // a worker left over from an earlier run must not tick the new one
        self.cancel_worker();

        let speed = {
            let mut guard = lock_session(session);
            guard.start();
            guard.speed()
        };
        log::info!("playback started, {} ms per beat", speed.as_millis());

        let (cancel, cancelled) = channel::<()>();
        let session = Arc::clone(session);
        let sender = self.sender.clone();

        let handle = thread::spawn(move || {
            let mut next_tick = Instant::now() + speed;

            loop {
                let wait = next_tick.saturating_duration_since(Instant::now());
                match cancelled.recv_timeout(wait) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }

                let outcome = lock_session(&session).tick();
                let Some((beat, fired)) = outcome else {
                    break;
                };

                let _ = sender.send(PlaybackEvent::BeatAdvanced(beat));
                for handle in fired {
                    let _ = sender.send(PlaybackEvent::Triggered {
                        key: handle.key,
                        sound: handle.sound,
                    });
                }

                next_tick += speed;
                // fell behind by more than a beat: resync instead of bursting
                let now = Instant::now();
                if next_tick + speed < now {
                    next_tick = now + speed;
                }
            }
        });

        self.worker = Some(Worker { cancel, handle });
        true
    }

    /// Stop the clock and cancel the timer. The timer thread has exited by
    /// the time this returns. Returns false if nothing was running.
    pub fn stop(&mut self, session: &SharedSession) -> bool {
        let was_playing = lock_session(session).stop();

        let had_worker = self.cancel_worker();

        if was_playing || had_worker {
            log::info!("playback stopped");
            let _ = self.sender.send(PlaybackEvent::Stopped);
        }
        was_playing
    }

    /// Start if idle, stop if running. Returns the new playing state.
    pub fn toggle_playing(&mut self, session: &SharedSession) -> bool {
        if lock_session(session).is_playing() {
            self.stop(session);
            false
        } else {
            self.start(session);
            true
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .map(|w| !w.handle.is_finished())
            .unwrap_or(false)
    }

    pub fn poll_events(&self) -> Vec<PlaybackEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }

    // Cancel the timer thread and wait for it. Returns false if there was none.
    fn cancel_worker(&mut self) -> bool {
        match self.worker.take() {
            Some(worker) => {
                let _ = worker.cancel.send(());
                if worker.handle.join().is_err() {
                    log::warn!("playback thread panicked");
                }
                true
            }
            None => false,
        }
    }
}

impl Default for PlaybackEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.cancel_worker();
    }
}
