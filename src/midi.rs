//! MIDI messages and port access
//!
//! Provides MIDI message parsing and encoding, port-name matching, and the
//! `MidiBackend` seam the menu uses to enumerate and open ports. The
//! production backend is built on `midir`.

use anyhow::{anyhow, Result};
use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// MIDI message types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MidiMessage {
    /// Note Off: channel (0-15), note (0-127), velocity (0-127)
    NoteOff { channel: u8, note: u8, velocity: u8 },

    /// Note On: channel (0-15), note (0-127), velocity (1-127)
    NoteOn { channel: u8, note: u8, velocity: u8 },

    /// Polyphonic Key Pressure: channel (0-15), note (0-127), pressure (0-127)
    PolyPressure { channel: u8, note: u8, pressure: u8 },

    /// Control Change: channel (0-15), cc (0-127), value (0-127)
    ControlChange { channel: u8, cc: u8, value: u8 },

    /// Program Change: channel (0-15), program (0-127)
    ProgramChange { channel: u8, program: u8 },

    /// Channel Pressure: channel (0-15), pressure (0-127)
    ChannelPressure { channel: u8, pressure: u8 },

    /// Pitch Bend: channel (0-15), value (0-16383, 14-bit, 8192 = center)
    PitchBend { channel: u8, value: u16 },

    /// System Exclusive payload without the F0/F7 framing
    SysEx { data: Vec<u8> },

    /// System Reset
    SystemReset,
}

impl MidiMessage {
    /// Parse a MIDI message from raw bytes
    ///
    /// Note On with velocity 0 is reported as Note Off. Running status and
    /// realtime messages other than System Reset are not decoded.
    pub fn parse(data: &[u8]) -> Option<Self> {
        let (&status, rest) = data.split_first()?;

        if status < 0x80 {
            return None;
        }

        if status >= 0xF0 {
            return match status {
                0xF0 => {
                    let end = rest.iter().position(|&b| b == 0xF7)?;
                    Some(MidiMessage::SysEx { data: rest[..end].to_vec() })
                }
                0xFF => Some(MidiMessage::SystemReset),
                _ => None,
            };
        }

        let channel = status & 0x0F;
        let d1 = rest.first().map(|b| b & 0x7F);
        let d2 = rest.get(1).map(|b| b & 0x7F);

        match status & 0xF0 {
            0x80 => Some(MidiMessage::NoteOff { channel, note: d1?, velocity: d2? }),
            0x90 => {
                let (note, velocity) = (d1?, d2?);
                if velocity == 0 {
                    Some(MidiMessage::NoteOff { channel, note, velocity: 0 })
                } else {
                    Some(MidiMessage::NoteOn { channel, note, velocity })
                }
            }
            0xA0 => Some(MidiMessage::PolyPressure { channel, note: d1?, pressure: d2? }),
            0xB0 => Some(MidiMessage::ControlChange { channel, cc: d1?, value: d2? }),
            0xC0 => Some(MidiMessage::ProgramChange { channel, program: d1? }),
            0xD0 => Some(MidiMessage::ChannelPressure { channel, pressure: d1? }),
            0xE0 => {
                let value = ((d2? as u16) << 7) | d1? as u16;
                Some(MidiMessage::PitchBend { channel, value })
            }
            _ => None,
        }
    }

    /// Encode the message to MIDI bytes
    pub fn encode(&self) -> Vec<u8> {
        match *self {
            MidiMessage::NoteOff { channel, note, velocity } => {
                vec![0x80 | (channel & 0x0F), note & 0x7F, velocity & 0x7F]
            }
            MidiMessage::NoteOn { channel, note, velocity } => {
                vec![0x90 | (channel & 0x0F), note & 0x7F, velocity & 0x7F]
            }
            MidiMessage::PolyPressure { channel, note, pressure } => {
                vec![0xA0 | (channel & 0x0F), note & 0x7F, pressure & 0x7F]
            }
            MidiMessage::ControlChange { channel, cc, value } => {
                vec![0xB0 | (channel & 0x0F), cc & 0x7F, value & 0x7F]
            }
            MidiMessage::ProgramChange { channel, program } => {
                vec![0xC0 | (channel & 0x0F), program & 0x7F]
            }
            MidiMessage::ChannelPressure { channel, pressure } => {
                vec![0xD0 | (channel & 0x0F), pressure & 0x7F]
            }
            MidiMessage::PitchBend { channel, value } => {
                let lsb = (value & 0x7F) as u8;
                let msb = ((value >> 7) & 0x7F) as u8;
                vec![0xE0 | (channel & 0x0F), lsb, msb]
            }
            MidiMessage::SysEx { ref data } => {
                let mut result = Vec::with_capacity(data.len() + 2);
                result.push(0xF0);
                result.extend_from_slice(data);
                result.push(0xF7);
                result
            }
            MidiMessage::SystemReset => vec![0xFF],
        }
    }

    /// Get the channel for channel messages (0-15), None for system messages
    pub fn channel(&self) -> Option<u8> {
        match *self {
            MidiMessage::NoteOff { channel, .. }
            | MidiMessage::NoteOn { channel, .. }
            | MidiMessage::PolyPressure { channel, .. }
            | MidiMessage::ControlChange { channel, .. }
            | MidiMessage::ProgramChange { channel, .. }
            | MidiMessage::ChannelPressure { channel, .. }
            | MidiMessage::PitchBend { channel, .. } => Some(channel),
            _ => None,
        }
    }
}

impl fmt::Display for MidiMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            MidiMessage::NoteOff { channel, note, velocity } => {
                write!(f, "NoteOff ch:{} n:{} v:{}", channel + 1, note, velocity)
            }
            MidiMessage::NoteOn { channel, note, velocity } => {
                write!(f, "NoteOn ch:{} n:{} v:{}", channel + 1, note, velocity)
            }
            MidiMessage::PolyPressure { channel, note, pressure } => {
                write!(f, "PolyPressure ch:{} n:{} p:{}", channel + 1, note, pressure)
            }
            MidiMessage::ControlChange { channel, cc, value } => {
                write!(f, "CC ch:{} cc:{} v:{}", channel + 1, cc, value)
            }
            MidiMessage::ProgramChange { channel, program } => {
                write!(f, "ProgramChange ch:{} p:{}", channel + 1, program)
            }
            MidiMessage::ChannelPressure { channel, pressure } => {
                write!(f, "ChannelPressure ch:{} p:{}", channel + 1, pressure)
            }
            MidiMessage::PitchBend { channel, value } => {
                write!(f, "PitchBend ch:{} v:{}", channel + 1, value)
            }
            MidiMessage::SysEx { ref data } => write!(f, "SysEx {} bytes", data.len()),
            MidiMessage::SystemReset => write!(f, "SystemReset"),
        }
    }
}

/// Format MIDI bytes as hex string for debugging
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Direction of a port binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortRole {
    Input,
    Output,
}

impl fmt::Display for PortRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortRole::Input => write!(f, "input"),
            PortRole::Output => write!(f, "output"),
        }
    }
}

/// Index of the first port whose name contains `fragment` (case-insensitive)
pub fn find_port_by_substring(ports: &[String], fragment: &str) -> Option<usize> {
    let needle = fragment.to_lowercase();
    ports.iter().position(|name| name.to_lowercase().contains(&needle))
}

/// Index of the first port where either name contains the other.
///
/// Different MIDI layers decorate the same port differently (client prefix,
/// `client:port` numbering), so neither name is reliably the longer one.
pub fn find_port_bidirectional(ports: &[String], name: &str) -> Option<usize> {
    ports
        .iter()
        .position(|candidate| candidate.contains(name) || name.contains(candidate.as_str()))
}

/// Callback invoked on the MIDI input thread for every received message
pub type InputCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// An open input port; dropping or closing it stops the callback
pub trait InputConnection {
    fn port_name(&self) -> &str;
    fn close(self: Box<Self>);
}

/// An open output port
pub trait OutputConnection {
    fn port_name(&self) -> &str;
    fn send(&mut self, bytes: &[u8]) -> Result<()>;
    fn close(self: Box<Self>);
}

/// Access to the OS MIDI layer
pub trait MidiBackend: Send + Sync {
    /// Enumerate input port names in OS order
    fn input_ports(&self) -> Result<Vec<String>>;

    /// Enumerate output port names in OS order
    fn output_ports(&self) -> Result<Vec<String>>;

    /// Open the input port at `index` of the current enumeration
    fn open_input(&self, index: usize, on_message: InputCallback)
        -> Result<Box<dyn InputConnection>>;

    /// Open the output port at `index` of the current enumeration
    fn open_output(&self, index: usize) -> Result<Box<dyn OutputConnection>>;

    /// Enumerate ports for a role
    fn ports(&self, role: PortRole) -> Result<Vec<String>> {
        match role {
            PortRole::Input => self.input_ports(),
            PortRole::Output => self.output_ports(),
        }
    }
}

/// `midir`-backed access to ALSA / CoreMIDI / WinMM
pub struct MidirBackend {
    client_name: String,
}

impl MidirBackend {
    pub fn new(client_name: impl Into<String>) -> Self {
        Self { client_name: client_name.into() }
    }
}

impl MidiBackend for MidirBackend {
    fn input_ports(&self) -> Result<Vec<String>> {
        let midi_in = MidiInput::new(&format!("{}-scanner", self.client_name))?;
        let ports = midi_in.ports();
        Ok(ports.iter().filter_map(|p| midi_in.port_name(p).ok()).collect())
    }

    fn output_ports(&self) -> Result<Vec<String>> {
        let midi_out = MidiOutput::new(&format!("{}-scanner", self.client_name))?;
        let ports = midi_out.ports();
        Ok(ports.iter().filter_map(|p| midi_out.port_name(p).ok()).collect())
    }

    fn open_input(
        &self,
        index: usize,
        on_message: InputCallback,
    ) -> Result<Box<dyn InputConnection>> {
        let mut midi_in = MidiInput::new(&format!("{}-in", self.client_name))?;
        // Same filtering as the classic RtMidi defaults: no sysex, clock or sensing
        midi_in.ignore(Ignore::All);

        let ports = midi_in.ports();
        let port = ports
            .get(index)
            .ok_or_else(|| anyhow!("Input port index {} out of range", index))?;
        let name = midi_in.port_name(port)?;

        let connection = midi_in
            .connect(
                port,
                &format!("{}-in", self.client_name),
                move |_timestamp, data, _| on_message(data),
                (),
            )
            .map_err(|e| anyhow!("Failed to open input '{}': {}", name, e))?;

        debug!("MIDI IN opened: '{}'", name);
        Ok(Box::new(MidirInput { name, connection }))
    }

    fn open_output(&self, index: usize) -> Result<Box<dyn OutputConnection>> {
        let midi_out = MidiOutput::new(&format!("{}-out", self.client_name))?;

        let ports = midi_out.ports();
        let port = ports
            .get(index)
            .ok_or_else(|| anyhow!("Output port index {} out of range", index))?;
        let name = midi_out.port_name(port)?;

        let connection = midi_out
            .connect(port, &format!("{}-out", self.client_name))
            .map_err(|e| anyhow!("Failed to open output '{}': {}", name, e))?;

        debug!("MIDI OUT opened: '{}'", name);
        Ok(Box::new(MidirOutput { name, connection }))
    }
}

struct MidirInput {
    name: String,
    connection: MidiInputConnection<()>,
}

impl InputConnection for MidirInput {
    fn port_name(&self) -> &str {
        &self.name
    }

    fn close(self: Box<Self>) {
        debug!("MIDI IN closed: '{}'", self.name);
        self.connection.close();
    }
}

struct MidirOutput {
    name: String,
    connection: MidiOutputConnection,
}

impl OutputConnection for MidirOutput {
    fn port_name(&self) -> &str {
        &self.name
    }

    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.connection
            .send(bytes)
            .map_err(|e| anyhow!("Send to '{}' failed: {}", self.name, e))
    }

    fn close(self: Box<Self>) {
        debug!("MIDI OUT closed: '{}'", self.name);
        self.connection.close();
    }
}
