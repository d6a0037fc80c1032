/// Audio output using cpal
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{Result, SequencerError};
use crate::sequencer::playback::SoundTrigger;
use crate::sequencer::SoundHandle;

const MAX_VOICES: usize = 32;
const VOICE_GAIN: f32 = 0.2;
// amplitude below which a voice is dropped
const SILENCE: f32 = 0.001;
const DECAY_SECONDS: f32 = 0.35;

/// One playback instance of a sound.
#[derive(Debug, Clone)]
struct Voice {
    key: usize,
    frequency: f32,
    phase: f32,
    amplitude: f32,
}

type Voices = Arc<Mutex<Vec<Voice>>>;

pub struct AudioOutput {
    stream: Option<cpal::Stream>,
    voices: Voices,
}

impl AudioOutput {
    pub fn new() -> Result<Self> {
        let voices: Voices = Arc::new(Mutex::new(Vec::new()));
        let stream = Self::setup_audio_stream(Arc::clone(&voices))?;

        Ok(Self {
            stream: Some(stream),
            voices,
        })
    }

    /// An output with no device behind it. Triggers are accepted and dropped
    /// once they decay out of the (unplayed) voice list.
    pub fn silent() -> Self {
        Self {
            stream: None,
            voices: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn is_silent(&self) -> bool {
        self.stream.is_none()
    }

    fn setup_audio_stream(voices: Voices) -> Result<cpal::Stream> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| SequencerError::Output("no default output device".to_string()))?;
        let config = device
            .default_output_config()
            .map_err(|e| SequencerError::Output(e.to_string()))?;

        let sample_rate = config.sample_rate().0 as f32;
        let channels = config.channels() as usize;
        let decay = decay_per_sample(sample_rate);

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => device.build_output_stream(
                &config.into(),
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut voices = voices.lock().unwrap_or_else(PoisonError::into_inner);
                    for frame in data.chunks_mut(channels.max(1)) {
                        let value = render_sample(&mut voices, sample_rate, decay);
                        for sample in frame.iter_mut() {
                            *sample = value;
                        }
                    }
                    voices.retain(|v| v.amplitude > SILENCE);
                },
                |err| log::error!("audio stream error: {}", err),
                None,
            ),
            other => {
                return Err(SequencerError::Output(format!(
                    "unsupported sample format {:?}",
                    other
                )))
            }
        }
        .map_err(|e| SequencerError::Output(e.to_string()))?;

        stream
            .play()
            .map_err(|e| SequencerError::Output(e.to_string()))?;
        Ok(stream)
    }

    /// A `Send` trigger feeding this output. Each trigger adds a new voice;
    /// voices already sounding keep going.
    pub fn trigger_handle(&self) -> VoiceTrigger {
        VoiceTrigger {
            voices: Arc::clone(&self.voices),
        }
    }

    pub fn active_voices(&self) -> usize {
        self.voices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn stop_all(&mut self) {
        self.voices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Default for AudioOutput {
    fn default() -> Self {
        Self::new().unwrap_or_else(|e| {
            log::warn!("audio output unavailable, running silent: {}", e);
            Self::silent()
        })
    }
}

#[derive(Clone)]
pub struct VoiceTrigger {
    voices: Voices,
}

impl SoundTrigger for VoiceTrigger {
    fn trigger(&mut self, handle: &SoundHandle) {
        let mut voices = self.voices.lock().unwrap_or_else(PoisonError::into_inner);
        if voices.len() >= MAX_VOICES {
            let dropped = voices.remove(0);
            log::debug!("voice limit reached, dropping voice for key {}", dropped.key);
        }
        voices.push(Voice {
            key: handle.key,
            frequency: midi_note_to_frequency(handle.sound.note),
            phase: 0.0,
            amplitude: 1.0,
        });
    }
}

fn render_sample(voices: &mut [Voice], sample_rate: f32, decay: f32) -> f32 {
    let mut mix = 0.0;
    for voice in voices.iter_mut() {
        mix += (voice.phase * 2.0 * std::f32::consts::PI).sin() * voice.amplitude * VOICE_GAIN;
        voice.phase += voice.frequency / sample_rate;
        if voice.phase >= 1.0 {
            voice.phase -= 1.0;
        }
        voice.amplitude *= decay;
    }
    mix.clamp(-1.0, 1.0)
}

// Per-sample factor that brings a voice to SILENCE after DECAY_SECONDS.
fn decay_per_sample(sample_rate: f32) -> f32 {
    SILENCE.powf(1.0 / (DECAY_SECONDS * sample_rate))
}

fn midi_note_to_frequency(note: u8) -> f32 {
    440.0 * 2.0_f32.powf((note as f32 - 69.0) / 12.0)
}
