//! In-memory stand-ins for the external systems, shared by unit tests

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::bluetooth::events::parse_line;
use crate::bluetooth::{agent::AdvertisingScan, ControlPlane};
use crate::config::ReverbConfig;
use crate::display::Display;
use crate::engine::{EngineError, SoundBankId, SoundEngine};
use crate::menu::Screen;
use crate::midi::{
    InputCallback, InputConnection, MidiBackend, MidiMessage, OutputConnection, PortRole,
};

// ---------------------------------------------------------------------------
// Control plane
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Script {
    responses: HashMap<String, VecDeque<String>>,
    advertising: Vec<String>,
    calls: Vec<String>,
    scans: usize,
}

/// Agent answering each command from a script and recording every call
#[derive(Default)]
pub struct ScriptedAgent {
    script: Mutex<Script>,
}

impl ScriptedAgent {
    /// Answer `command` with `output` every time
    pub fn respond(&self, command: &str, output: &str) {
        self.respond_sequence(command, &[output]);
    }

    /// Answer `command` with each output in turn; the last one repeats
    pub fn respond_sequence(&self, command: &str, outputs: &[&str]) {
        self.script.lock().responses.insert(
            command.to_string(),
            outputs.iter().map(|s| s.to_string()).collect(),
        );
    }

    /// Lines streamed during every advertising scan
    pub fn advertise(&self, lines: &[&str]) {
        self.script.lock().advertising = lines.iter().map(|s| s.to_string()).collect();
    }

    /// Every command issued through `run`, in order
    pub fn calls(&self) -> Vec<String> {
        self.script.lock().calls.clone()
    }

    pub fn was_called(&self, command: &str) -> bool {
        self.script.lock().calls.iter().any(|c| c == command)
    }

    pub fn scan_count(&self) -> usize {
        self.script.lock().scans
    }
}

#[async_trait]
impl ControlPlane for ScriptedAgent {
    async fn run(&self, commands: &[String], _limit: Duration) -> String {
        let mut script = self.script.lock();
        let mut output = String::new();
        for command in commands {
            script.calls.push(command.clone());
            if let Some(queue) = script.responses.get_mut(command) {
                let answer = if queue.len() > 1 {
                    queue.pop_front()
                } else {
                    queue.front().cloned()
                };
                output.push_str(&answer.unwrap_or_default());
            }
        }
        output
    }

    async fn scan_advertising(&self, _window: Duration) -> AdvertisingScan {
        let mut script = self.script.lock();
        script.scans += 1;
        script.advertising.iter().filter_map(|l| parse_line(l)).collect()
    }
}

// ---------------------------------------------------------------------------
// MIDI layer
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RoleState {
    ports: Vec<String>,
    /// Ports that show up after this many more enumerations
    pending: Vec<(String, usize)>,
    enumerations: usize,
    open: usize,
    peak_open: usize,
    opened: Vec<String>,
}

#[derive(Default)]
struct MidiState {
    input: RoleState,
    output: RoleState,
    sent: Vec<Vec<u8>>,
    callbacks: Vec<(u64, InputCallback)>,
    next_id: u64,
}

impl MidiState {
    fn role(&mut self, role: PortRole) -> &mut RoleState {
        match role {
            PortRole::Input => &mut self.input,
            PortRole::Output => &mut self.output,
        }
    }
}

/// MIDI layer with scripted ports and open-handle accounting
#[derive(Clone, Default)]
pub struct FakeMidiBackend {
    state: Arc<Mutex<MidiState>>,
}

impl FakeMidiBackend {
    pub fn with_ports(inputs: &[&str], outputs: &[&str]) -> Self {
        let backend = Self::default();
        {
            let mut state = backend.state.lock();
            state.input.ports = inputs.iter().map(|s| s.to_string()).collect();
            state.output.ports = outputs.iter().map(|s| s.to_string()).collect();
        }
        backend
    }

    /// Add `name` to the `role` list once it has been enumerated
    /// `enumerations` more times
    pub fn appear_after(&self, role: PortRole, name: &str, enumerations: usize) {
        self.state
            .lock()
            .role(role)
            .pending
            .push((name.to_string(), enumerations));
    }

    pub fn enumerations(&self, role: PortRole) -> usize {
        self.state.lock().role(role).enumerations
    }

    /// Handles currently open
    pub fn open_count(&self, role: PortRole) -> usize {
        self.state.lock().role(role).open
    }

    /// Most handles ever open at the same time
    pub fn peak_open(&self, role: PortRole) -> usize {
        self.state.lock().role(role).peak_open
    }

    /// Names of every port opened, in order
    pub fn opened(&self, role: PortRole) -> Vec<String> {
        self.state.lock().role(role).opened.clone()
    }

    /// Every message sent to any output
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.state.lock().sent.clone()
    }

    /// Deliver bytes to every open input's callback
    pub fn inject(&self, bytes: &[u8]) {
        let callbacks: Vec<InputCallback> =
            self.state.lock().callbacks.iter().map(|(_, cb)| cb.clone()).collect();
        for callback in callbacks {
            callback(bytes);
        }
    }

    fn enumerate(&self, role: PortRole) -> Vec<String> {
        let mut state = self.state.lock();
        let role = state.role(role);
        role.enumerations += 1;
        for (_, remaining) in role.pending.iter_mut() {
            *remaining = remaining.saturating_sub(1);
        }
        let (ready, waiting): (Vec<_>, Vec<_>) =
            role.pending.drain(..).partition(|(_, remaining)| *remaining == 0);
        role.pending = waiting;
        role.ports.extend(ready.into_iter().map(|(name, _)| name));
        role.ports.clone()
    }

    fn open(&self, role: PortRole, index: usize) -> Result<String> {
        let mut state = self.state.lock();
        let role_state = state.role(role);
        let name = role_state
            .ports
            .get(index)
            .cloned()
            .ok_or_else(|| anyhow!("{} port index {} out of range", role, index))?;
        role_state.open += 1;
        role_state.peak_open = role_state.peak_open.max(role_state.open);
        role_state.opened.push(name.clone());
        Ok(name)
    }
}

impl MidiBackend for FakeMidiBackend {
    fn input_ports(&self) -> Result<Vec<String>> {
        Ok(self.enumerate(PortRole::Input))
    }

    fn output_ports(&self) -> Result<Vec<String>> {
        Ok(self.enumerate(PortRole::Output))
    }

    fn open_input(&self, index: usize, on_message: InputCallback) -> Result<Box<dyn InputConnection>> {
        let name = self.open(PortRole::Input, index)?;
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.callbacks.push((id, on_message));
        Ok(Box::new(FakeInput {
            name,
            id,
            state: self.state.clone(),
        }))
    }

    fn open_output(&self, index: usize) -> Result<Box<dyn OutputConnection>> {
        let name = self.open(PortRole::Output, index)?;
        Ok(Box::new(FakeOutput {
            name,
            state: self.state.clone(),
        }))
    }
}

struct FakeInput {
    name: String,
    id: u64,
    state: Arc<Mutex<MidiState>>,
}

impl InputConnection for FakeInput {
    fn port_name(&self) -> &str {
        &self.name
    }

    fn close(self: Box<Self>) {}
}

impl Drop for FakeInput {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.input.open -= 1;
        state.callbacks.retain(|(id, _)| *id != self.id);
    }
}

struct FakeOutput {
    name: String,
    state: Arc<Mutex<MidiState>>,
}

impl OutputConnection for FakeOutput {
    fn port_name(&self) -> &str {
        &self.name
    }

    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.state.lock().sent.push(bytes.to_vec());
        Ok(())
    }

    fn close(self: Box<Self>) {}
}

impl Drop for FakeOutput {
    fn drop(&mut self) {
        self.state.lock().output.open -= 1;
    }
}

// ---------------------------------------------------------------------------
// Sound engine
// ---------------------------------------------------------------------------

/// Engine operation, as recorded by [`RecordingEngine`]
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    Reset,
    LoadSoundBank(PathBuf),
    Reverb(ReverbConfig),
    PlayFile(PathBuf),
    StopPlayback,
}

struct EngineLog {
    calls: Vec<EngineCall>,
    applied: Vec<MidiMessage>,
    program_selects: usize,
    /// First `(bank, preset)` accepted; None accepts nothing
    accept_from: Option<(u32, u8)>,
    fail_loads: bool,
    loaded: usize,
}

impl Default for EngineLog {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            applied: Vec::new(),
            program_selects: 0,
            accept_from: Some((0, 0)),
            fail_loads: false,
            loaded: 0,
        }
    }
}

#[derive(Clone, Default)]
pub struct RecordingEngine {
    log: Arc<Mutex<EngineLog>>,
}

impl RecordingEngine {
    pub fn accept_from(&self, bank: u32, preset: u8) {
        self.log.lock().accept_from = Some((bank, preset));
    }

    pub fn accept_none(&self) {
        self.log.lock().accept_from = None;
    }

    pub fn fail_loads(&self) {
        self.log.lock().fail_loads = true;
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.log.lock().calls.clone()
    }

    pub fn applied(&self) -> Vec<MidiMessage> {
        self.log.lock().applied.clone()
    }

    pub fn program_selects(&self) -> usize {
        self.log.lock().program_selects
    }

    pub fn count(&self, call: &EngineCall) -> usize {
        self.log.lock().calls.iter().filter(|c| *c == call).count()
    }
}

impl SoundEngine for RecordingEngine {
    fn reset(&self) -> Result<(), EngineError> {
        self.log.lock().calls.push(EngineCall::Reset);
        Ok(())
    }

    fn load_sound_bank(&self, path: &Path) -> Result<SoundBankId, EngineError> {
        let mut log = self.log.lock();
        log.calls.push(EngineCall::LoadSoundBank(path.to_path_buf()));
        if log.fail_loads {
            return Err(EngineError::SoundBank {
                path: path.to_path_buf(),
                reason: "scripted failure".to_string(),
            });
        }
        log.loaded += 1;
        Ok(SoundBankId(log.loaded - 1))
    }

    fn program_select(&self, _channel: u8, _bank: SoundBankId, bank_num: u32, preset: u8) -> bool {
        let mut log = self.log.lock();
        log.program_selects += 1;
        log.accept_from.is_some_and(|first| (bank_num, preset) >= first)
    }

    fn set_reverb(&self, reverb: &ReverbConfig) {
        self.log.lock().calls.push(EngineCall::Reverb(*reverb));
    }

    fn apply(&self, message: &MidiMessage) {
        self.log.lock().applied.push(message.clone());
    }

    fn play_file(&self, path: &Path) -> Result<(), EngineError> {
        self.log.lock().calls.push(EngineCall::PlayFile(path.to_path_buf()));
        Ok(())
    }

    fn stop_playback(&self) {
        self.log.lock().calls.push(EngineCall::StopPlayback);
    }
}

// ---------------------------------------------------------------------------
// Display
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Render {
        screen: Screen,
        labels: Vec<String>,
        index: usize,
    },
    Busy(String),
}

/// Display keeping every frame it was asked to draw
#[derive(Clone, Default)]
pub struct RecordingDisplay {
    frames: Arc<Mutex<Vec<Frame>>>,
}

impl RecordingDisplay {
    pub fn frames(&self) -> Vec<Frame> {
        self.frames.lock().clone()
    }

    pub fn renders(&self) -> usize {
        self.frames
            .lock()
            .iter()
            .filter(|f| matches!(f, Frame::Render { .. }))
            .count()
    }

    pub fn busy_count(&self) -> usize {
        self.frames
            .lock()
            .iter()
            .filter(|f| matches!(f, Frame::Busy(_)))
            .count()
    }
}

impl Display for RecordingDisplay {
    fn render(&mut self, screen: Screen, labels: &[String], index: usize) {
        self.frames.lock().push(Frame::Render {
            screen,
            labels: labels.to_vec(),
            index,
        });
    }

    fn busy(&mut self, message: &str) {
        self.frames.lock().push(Frame::Busy(message.to_string()));
    }
}
