//! Standard MIDI File playback
//!
//! A file is flattened into a [`Timeline`]: every channel or SysEx event in
//! playback order, each carrying the wall-clock delay since the previous one.
//! Tempo changes are folded into the delays, so players only sleep and send.

use anyhow::{anyhow, Context, Result};
use midly::{Format, MetaMessage, Smf, Timing, TrackEventKind};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

use crate::midi::{MidiMessage, OutputConnection};

/// Tempo in effect until the first tempo event (120 BPM)
const DEFAULT_TEMPO_US: u64 = 500_000;

/// Longest uninterrupted sleep of the blocking player, so a cancel request
/// is noticed promptly
const CANCEL_POLL: Duration = Duration::from_millis(50);

/// One message with the delay to wait before sending it
#[derive(Debug, Clone, PartialEq)]
pub struct TimedMessage {
    pub delay: Duration,
    pub message: MidiMessage,
}

/// Playable event list of one MIDI file
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    events: Vec<TimedMessage>,
}

impl Timeline {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read MIDI file: {}", path.display()))?;
        Self::parse(&bytes).with_context(|| format!("Invalid MIDI file: {}", path.display()))
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let smf = Smf::parse(bytes).map_err(|e| anyhow!("{}", e))?;
        let clock = TickClock::new(smf.header.timing)?;

        // (absolute tick, event) in playback order. Sequential files play
        // their tracks one after another, the others interleave them.
        let mut merged = Vec::new();
        let mut track_start = 0u64;
        for track in &smf.tracks {
            let mut tick = track_start;
            for event in track {
                tick += u64::from(event.delta.as_int());
                merged.push((tick, &event.kind));
            }
            if smf.header.format == Format::Sequential {
                track_start = tick;
            }
        }
        merged.sort_by_key(|(tick, _)| *tick);

        let mut events = Vec::new();
        let mut tempo = DEFAULT_TEMPO_US;
        let mut last_tick = 0u64;
        let mut pending = Duration::ZERO;
        for (tick, kind) in merged {
            pending += clock.duration(tick - last_tick, tempo);
            last_tick = tick;

            let message = match kind {
                TrackEventKind::Meta(MetaMessage::Tempo(t)) => {
                    tempo = u64::from(t.as_int());
                    None
                }
                TrackEventKind::Midi { channel, message } => {
                    Some(convert(channel.as_int(), message))
                }
                TrackEventKind::SysEx(data) => Some(MidiMessage::SysEx {
                    data: data.strip_suffix(&[0xF7]).unwrap_or(*data).to_vec(),
                }),
                _ => None,
            };

            if let Some(message) = message {
                events.push(TimedMessage { delay: pending, message });
                pending = Duration::ZERO;
            }
        }

        Ok(Self { events })
    }

    pub fn events(&self) -> &[TimedMessage] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Time from start until the last message is sent
    pub fn duration(&self) -> Duration {
        self.events.iter().map(|e| e.delay).sum()
    }
}

/// Converts delta ticks to wall-clock time for one file's timing mode
#[derive(Debug, Clone, Copy)]
enum TickClock {
    /// Ticks per quarter note; tempo-dependent
    Metrical(u64),
    /// Ticks per second; tempo is ignored
    Timecode(f64),
}

impl TickClock {
    fn new(timing: Timing) -> Result<Self> {
        match timing {
            Timing::Metrical(tpq) if tpq.as_int() == 0 => {
                Err(anyhow!("zero ticks per quarter note"))
            }
            Timing::Metrical(tpq) => Ok(TickClock::Metrical(u64::from(tpq.as_int()))),
            Timing::Timecode(fps, subframes) => {
                let per_second = f64::from(fps.as_f32()) * f64::from(subframes);
                if per_second <= 0.0 {
                    return Err(anyhow!("zero ticks per second"));
                }
                Ok(TickClock::Timecode(per_second))
            }
        }
    }

    fn duration(&self, ticks: u64, tempo_us: u64) -> Duration {
        match *self {
            TickClock::Metrical(tpq) => Duration::from_nanos(ticks * tempo_us * 1000 / tpq),
            TickClock::Timecode(per_second) => Duration::from_secs_f64(ticks as f64 / per_second),
        }
    }
}

fn convert(channel: u8, message: &midly::MidiMessage) -> MidiMessage {
    use midly::MidiMessage as M;
    match *message {
        M::NoteOff { key, vel } => MidiMessage::NoteOff {
            channel,
            note: key.as_int(),
            velocity: vel.as_int(),
        },
        // Velocity 0 stays a note-on on the wire; receivers treat it as note-off
        M::NoteOn { key, vel } => MidiMessage::NoteOn {
            channel,
            note: key.as_int(),
            velocity: vel.as_int(),
        },
        M::Aftertouch { key, vel } => MidiMessage::PolyPressure {
            channel,
            note: key.as_int(),
            pressure: vel.as_int(),
        },
        M::Controller { controller, value } => MidiMessage::ControlChange {
            channel,
            cc: controller.as_int(),
            value: value.as_int(),
        },
        M::ProgramChange { program } => MidiMessage::ProgramChange {
            channel,
            program: program.as_int(),
        },
        M::ChannelAftertouch { vel } => MidiMessage::ChannelPressure {
            channel,
            pressure: vel.as_int(),
        },
        M::PitchBend { bend } => MidiMessage::PitchBend {
            channel,
            value: bend.0.as_int(),
        },
    }
}

/// Play `timeline` to an open output port, sleeping each delay before
/// sending. Returns the number of messages sent.
pub async fn play_to_port(timeline: &Timeline, port: &mut dyn OutputConnection) -> Result<usize> {
    info!(
        "Playing {} events ({:.1}s) to '{}'",
        timeline.len(),
        timeline.duration().as_secs_f32(),
        port.port_name()
    );

    let mut due = Instant::now();
    for event in timeline.events() {
        due += event.delay;
        sleep_until(due).await;
        port.send(&event.message.encode())?;
    }

    debug!("Playback to '{}' finished", port.port_name());
    Ok(timeline.len())
}

/// Play `timeline` on the calling thread, handing each message to `sink`.
///
/// Returns false when `cancel` was raised before the end.
pub fn play_blocking(
    timeline: &Timeline,
    cancel: &AtomicBool,
    mut sink: impl FnMut(&MidiMessage),
) -> bool {
    let mut due = std::time::Instant::now();
    for event in timeline.events() {
        due += event.delay;
        loop {
            if cancel.load(Ordering::Relaxed) {
                return false;
            }
            let now = std::time::Instant::now();
            if now >= due {
                break;
            }
            std::thread::sleep((due - now).min(CANCEL_POLL));
        }
        sink(&event.message);
    }
    !cancel.load(Ordering::Relaxed)
}
