/// MIDI output using midir
use midir::{MidiOutput, MidiOutputConnection};

use crate::error::{Result, SequencerError};
use crate::sequencer::playback::SoundTrigger;
use crate::sequencer::SoundHandle;

const CLIENT_NAME: &str = "beatgrid MIDI Output";
const NOTE_ON: u8 = 0x90;
const NOTE_OFF: u8 = 0x80;
const DEFAULT_VELOCITY: u8 = 100;

pub struct MidiOutputDevice {
    connection: Option<MidiOutputConnection>,
    channel: u8,
    velocity: u8,
}

impl MidiOutputDevice {
    pub fn new() -> Self {
        Self {
            connection: None,
            channel: 9, // GM percussion
            velocity: DEFAULT_VELOCITY,
        }
    }

    pub fn with_channel(mut self, channel: u8) -> Self {
        self.channel = channel.min(15);
        self
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn available_ports() -> Vec<String> {
        match MidiOutput::new(CLIENT_NAME) {
            Ok(midi_out) => midi_out
                .ports()
                .iter()
                .filter_map(|p| midi_out.port_name(p).ok())
                .collect(),
            Err(e) => {
                log::warn!("MIDI unavailable: {}", e);
                vec![]
            }
        }
    }

    pub fn connect(&mut self, port_index: usize) -> Result<()> {
        let midi_out = MidiOutput::new(CLIENT_NAME)
            .map_err(|e| SequencerError::Output(format!("failed to create MIDI output: {}", e)))?;

        let ports = midi_out.ports();
        let port = ports
            .get(port_index)
            .ok_or_else(|| SequencerError::Output(format!("invalid MIDI port {}", port_index)))?;

        let connection = midi_out
            .connect(port, "beatgrid")
            .map_err(|e| SequencerError::Output(format!("failed to connect: {}", e)))?;

        log::info!("connected MIDI port {}", port_index);
        self.connection = Some(connection);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn send_note_on(&mut self, note: u8, velocity: u8) -> Result<()> {
        self.send(&note_on_message(self.channel, note, velocity))
    }

    pub fn send_note_off(&mut self, note: u8) -> Result<()> {
        self.send(&note_off_message(self.channel, note))
    }

    fn send(&mut self, message: &[u8; 3]) -> Result<()> {
        if let Some(ref mut conn) = self.connection {
            conn.send(message)
                .map_err(|e| SequencerError::Output(format!("failed to send MIDI: {}", e)))?;
        }
        Ok(())
    }

    pub fn disconnect(&mut self) {
        if let Some(conn) = self.connection.take() {
            conn.close();
        }
    }
}

impl Default for MidiOutputDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SoundTrigger for MidiOutputDevice {
    // Drum hits: note-on, then an immediate note-off so the next hit on the
    // same note retriggers instead of being swallowed.
    fn trigger(&mut self, handle: &SoundHandle) {
        let note = handle.sound.note;
        if let Err(e) = self
            .send_note_on(note, self.velocity)
            .and_then(|_| self.send_note_off(note))
        {
            log::warn!("key {}: {}", handle.key, e);
        }
    }
}

fn note_on_message(channel: u8, note: u8, velocity: u8) -> [u8; 3] {
    [NOTE_ON | (channel & 0x0f), note & 0x7f, velocity & 0x7f]
}

fn note_off_message(channel: u8, note: u8) -> [u8; 3] {
    [NOTE_OFF | (channel & 0x0f), note & 0x7f, 0]
}

pub fn midi_note_name(note: u8) -> String {
    let note_names = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];
    let octave = (note / 12) as i32 - 1;
    let note_index = (note % 12) as usize;
    format!("{}{}", note_names[note_index], octave)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_names() {
        assert_eq!(midi_note_name(38), "D2");
        assert_eq!(midi_note_name(40), "E2");
        assert_eq!(midi_note_name(45), "A2");
        assert_eq!(midi_note_name(47), "B2");
        assert_eq!(midi_note_name(60), "C4");
    }

    #[test]
    fn test_messages() {
        assert_eq!(note_on_message(9, 38, 100), [0x99, 38, 100]);
        assert_eq!(note_off_message(0, 40), [0x80, 40, 0]);
        assert_eq!(note_on_message(16, 200, 200), [0x90, 72, 72]);
    }

    #[test]
    fn test_disconnected_device_is_silent() {
        let mut device = MidiOutputDevice::new().with_channel(3);
        assert_eq!(device.channel(), 3);
        assert!(!device.is_connected());
        assert!(device.send_note_on(38, 100).is_ok());
        device.trigger(&SoundHandle {
            key: 1,
            sound: crate::sequencer::Sound::from_note(38),
        });
        device.disconnect();
        assert!(!device.is_connected());
        assert!(device.send_note_off(38).is_ok());
    }
}
