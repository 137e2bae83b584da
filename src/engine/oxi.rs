//! Software synthesizer rendered through the default audio device.
//!
//! The cpal stream is not `Send`, so it lives on its own thread for the
//! lifetime of the engine and pulls frames from the shared synth. Rebuilding
//! the engine swaps the synth instance under the lock; the stream stays up.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};
use oxisynth::{MidiEvent, SoundFont, SoundFontId, Synth, SynthDescriptor};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use super::{EngineError, LoadedBanks, SoundBankId, SoundEngine};
use crate::config::{EngineConfig, ReverbConfig};
use crate::midi::MidiMessage;
use crate::player::{play_blocking, Timeline};

/// "All Notes Off" controller sent on every channel when playback stops
const ALL_NOTES_OFF: u8 = 123;

#[derive(Default)]
struct SynthState {
    synth: Option<Synth>,
    fonts: LoadedBanks<SoundFontId>,
}

struct Playback {
    cancel: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// Keeps the output stream thread alive; stops it on drop
struct AudioThread {
    stop: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Drop for AudioThread {
    fn drop(&mut self) {
        drop(self.stop.take());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

pub struct OxiEngine {
    state: Arc<Mutex<SynthState>>,
    sample_rate: f32,
    gain: f32,
    playback: Mutex<Option<Playback>>,
    _audio: AudioThread,
}

impl OxiEngine {
    /// Open the default output device and start streaming silence until a
    /// synth is built with [`SoundEngine::reset`]
    pub fn start(config: &EngineConfig) -> Result<Self, EngineError> {
        let state = Arc::new(Mutex::new(SynthState::default()));
        let (ready_tx, ready_rx) = mpsc::channel::<Result<u32, String>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let render = state.clone();
        let thread = std::thread::Builder::new()
            .name("audio-out".to_string())
            .spawn(move || {
                let stream = match open_stream(render) {
                    Ok((stream, rate)) => {
                        let _ = ready_tx.send(Ok(rate));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Parked until the engine is dropped
                let _ = stop_rx.recv();
                drop(stream);
                debug!("Audio stream closed");
            })
            .map_err(|e| EngineError::Audio(e.to_string()))?;

        let sample_rate = ready_rx
            .recv()
            .map_err(|_| EngineError::Audio("audio thread exited".to_string()))?
            .map_err(EngineError::Audio)?;

        info!("Audio output started at {} Hz", sample_rate);
        Ok(Self {
            state,
            sample_rate: sample_rate as f32,
            gain: config.gain,
            playback: Mutex::new(None),
            _audio: AudioThread {
                stop: Some(stop_tx),
                thread: Some(thread),
            },
        })
    }

    fn new_synth(&self) -> Result<Synth, EngineError> {
        Synth::new(SynthDescriptor {
            sample_rate: self.sample_rate,
            gain: self.gain,
            ..Default::default()
        })
        .map_err(|e| EngineError::Audio(format!("{:?}", e)))
    }
}

impl SoundEngine for OxiEngine {
    fn reset(&self) -> Result<(), EngineError> {
        let synth = self.new_synth()?;
        let mut state = self.state.lock();
        state.synth = Some(synth);
        state.fonts.clear();
        debug!("Synth rebuilt");
        Ok(())
    }

    fn load_sound_bank(&self, path: &Path) -> Result<SoundBankId, EngineError> {
        let bank_error = |reason: String| EngineError::SoundBank {
            path: path.to_path_buf(),
            reason,
        };
        {
            let state = self.state.lock();
            if state.synth.is_some() {
                if let Some(id) = state.fonts.find(path) {
                    debug!("Sound bank {} already loaded", path.display());
                    return Ok(id);
                }
            }
        }

        let mut file = std::fs::File::open(path).map_err(|e| bank_error(e.to_string()))?;
        let font = SoundFont::load(&mut file).map_err(|e| bank_error(format!("{:?}", e)))?;

        let fresh = if self.state.lock().synth.is_none() {
            Some(self.new_synth()?)
        } else {
            None
        };

        let mut state = self.state.lock();
        if let Some(synth) = fresh {
            state.synth = Some(synth);
        }
        let SynthState { synth, fonts } = &mut *state;
        let Some(synth) = synth.as_mut() else {
            return Err(EngineError::Audio("synth unavailable".to_string()));
        };
        if let Some(id) = fonts.find(path) {
            return Ok(id);
        }
        let id = fonts.insert(path, synth.add_font(font, true));
        info!("Loaded sound bank {}", path.display());
        Ok(id)
    }

    fn program_select(&self, channel: u8, bank: SoundBankId, bank_num: u32, preset: u8) -> bool {
        let mut state = self.state.lock();
        let SynthState { synth, fonts } = &mut *state;
        match (synth.as_mut(), fonts.get(bank)) {
            (Some(synth), Some(font)) => synth.program_select(channel, font, bank_num, preset).is_ok(),
            _ => false,
        }
    }

    fn set_reverb(&self, reverb: &ReverbConfig) {
        if let Some(synth) = self.state.lock().synth.as_mut() {
            synth.get_reverb_mut().set_reverb_params(
                reverb.room_size,
                reverb.damping,
                reverb.width,
                reverb.level,
            );
            debug!("Reverb set to {:?}", reverb);
        }
    }

    fn apply(&self, message: &MidiMessage) {
        send(&self.state, message);
    }

    fn play_file(&self, path: &Path) -> Result<(), EngineError> {
        let timeline = Timeline::load(path).map_err(|e| EngineError::Playback {
            path: path.to_path_buf(),
            reason: format!("{:#}", e),
        })?;
        self.stop_playback();

        let cancel = Arc::new(AtomicBool::new(false));
        let state = self.state.clone();
        let flag = cancel.clone();
        let name = path.display().to_string();
        let thread = std::thread::Builder::new()
            .name("synth-player".to_string())
            .spawn(move || {
                let finished = play_blocking(&timeline, &flag, |message| send(&state, message));
                silence(&state);
                debug!("Playback of {} {}", name, if finished { "finished" } else { "cancelled" });
            })
            .map_err(|e| EngineError::Playback {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        info!("Playing {} on the local synth", path.display());
        *self.playback.lock() = Some(Playback { cancel, thread });
        Ok(())
    }

    fn stop_playback(&self) {
        let Some(playback) = self.playback.lock().take() else {
            return;
        };
        playback.cancel.store(true, Ordering::Relaxed);
        if playback.thread.join().is_err() {
            warn!("Synth player thread panicked");
        }
    }
}

impl Drop for OxiEngine {
    fn drop(&mut self) {
        self.stop_playback();
    }
}

fn send(state: &Mutex<SynthState>, message: &MidiMessage) {
    let Some(event) = to_event(message) else {
        return;
    };
    if let Some(synth) = state.lock().synth.as_mut() {
        if let Err(e) = synth.send_event(event) {
            trace!("Synth rejected {}: {:?}", message, e);
        }
    }
}

fn silence(state: &Mutex<SynthState>) {
    for channel in 0..16 {
        send(
            state,
            &MidiMessage::ControlChange { channel, cc: ALL_NOTES_OFF, value: 0 },
        );
    }
}

fn to_event(message: &MidiMessage) -> Option<MidiEvent> {
    match *message {
        MidiMessage::NoteOn { channel, note, velocity } => Some(MidiEvent::NoteOn {
            channel,
            key: note,
            vel: velocity,
        }),
        MidiMessage::NoteOff { channel, note, .. } => Some(MidiEvent::NoteOff { channel, key: note }),
        MidiMessage::ControlChange { channel, cc, value } => Some(MidiEvent::ControlChange {
            channel,
            ctrl: cc,
            value,
        }),
        MidiMessage::ProgramChange { channel, program } => Some(MidiEvent::ProgramChange {
            channel,
            program_id: program,
        }),
        MidiMessage::PitchBend { channel, value } => Some(MidiEvent::PitchBend { channel, value }),
        MidiMessage::ChannelPressure { channel, pressure } => Some(MidiEvent::ChannelPressure {
            channel,
            value: pressure,
        }),
        _ => None,
    }
}

/// Build and start the output stream; returns it with its sample rate
fn open_stream(state: Arc<Mutex<SynthState>>) -> Result<(Stream, u32), String> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| "no default output device".to_string())?;
    let supported = device.default_output_config().map_err(|e| e.to_string())?;
    let format = supported.sample_format();
    let config: StreamConfig = supported.config();
    let channels = usize::from(config.channels);
    let rate = config.sample_rate.0;

    let on_error = |err: cpal::StreamError| error!("Audio stream error: {}", err);
    let stream = match format {
        SampleFormat::F32 => device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                render(&state, data, channels, |s| s)
            },
            on_error,
            None,
        ),
        SampleFormat::I16 => device.build_output_stream(
            &config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                render(&state, data, channels, |s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
            },
            on_error,
            None,
        ),
        other => return Err(format!("unsupported sample format {:?}", other)),
    }
    .map_err(|e| e.to_string())?;

    stream.play().map_err(|e| e.to_string())?;
    Ok((stream, rate))
}

fn render<T: Copy>(
    state: &Mutex<SynthState>,
    data: &mut [T],
    channels: usize,
    convert: impl Fn(f32) -> T,
) {
    let mut state = state.lock();
    let silence = convert(0.0);
    for frame in data.chunks_mut(channels) {
        let (left, right) = match state.synth.as_mut() {
            Some(synth) => synth.read_next(),
            None => (0.0, 0.0),
        };
        for (i, sample) in frame.iter_mut().enumerate() {
            *sample = match i {
                0 => convert(left),
                1 => convert(right),
                _ => silence,
            };
        }
    }
}
