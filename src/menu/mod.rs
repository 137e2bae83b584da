//! Menu state machine
//!
//! The top-level controller of the front panel. All mutable menu state lives
//! in one [`MenuSession`]; [`Menu`] owns it together with the collaborators
//! (MIDI layer, Bluetooth agent, sound engine, display) and applies one
//! [`ButtonEvent`] at a time.
//!
//! Each screen is either `Populating` (its list must be built) or
//! `ReadyToCommit` (a second `Activate` commits the selection). Entering a
//! screen from the main screen populates it; activating it again commits.
//!
//! Nothing here fails outward: every error is logged and resolved to a safe
//! state so the panel stays responsive.

#[cfg(test)]
mod tests;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::bluetooth::{ControlPlane, DeviceAddress, DeviceDiscovery, PairingSequencer};
use crate::config::AppConfig;
use crate::display::{Display, BUSY_BANNER};
use crate::engine::{self, SoundEngine};
use crate::keypad::ButtonEvent;
use crate::library::list_media;
use crate::midi::{
    find_port_bidirectional, InputConnection, MidiBackend, OutputConnection, PortRole,
};
use crate::paths::AppPaths;
use crate::player::{play_to_port, Timeline};
use crate::reconcile::{await_port, resolve_port, PortMatch, PortResolution};

/// Menu screens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Screen {
    Main,
    SelectInput,
    SelectOutput,
    SelectSoundFont,
    SelectMidiFile,
    BluetoothToggle,
}

impl Screen {
    /// Entries of the main screen, in display order
    pub const MAIN_ENTRIES: [Screen; 5] = [
        Screen::SelectInput,
        Screen::SelectOutput,
        Screen::SelectSoundFont,
        Screen::SelectMidiFile,
        Screen::BluetoothToggle,
    ];

    pub fn title(&self) -> &'static str {
        match self {
            Screen::Main => "MAIN",
            Screen::SelectInput => "MIDI INPUT",
            Screen::SelectOutput => "MIDI OUTPUT",
            Screen::SelectSoundFont => "SOUND FONT",
            Screen::SelectMidiFile => "MIDI FILE",
            Screen::BluetoothToggle => "BLUETOOTH",
        }
    }
}

impl fmt::Display for Screen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

/// Sub-state of the current screen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Populating,
    ReadyToCommit,
}

/// What selecting an item means
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuValue {
    Screen(Screen),
    /// A literal port name from the current enumeration
    Port(String),
    /// The built-in synthesizer as output
    LocalSynth,
    /// A Bluetooth candidate that must be connected before its port exists
    Bluetooth { address: DeviceAddress, name: String },
    Path(PathBuf),
    Flag(bool),
}

/// A row of the current screen: display label plus underlying value.
///
/// Keeping both in one item keeps labels and values index-aligned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuItem {
    pub label: String,
    pub value: MenuValue,
}

impl MenuItem {
    pub fn new(label: impl Into<String>, value: MenuValue) -> Self {
        Self {
            label: label.into(),
            value,
        }
    }
}

/// Currently bound output
pub enum OutputBinding {
    LocalSynth,
    Port {
        name: String,
        /// None while the port is lent to file playback or could not be reopened
        connection: Option<Box<dyn OutputConnection>>,
    },
}

impl OutputBinding {
    pub fn port_name(&self) -> Option<&str> {
        match self {
            OutputBinding::LocalSynth => None,
            OutputBinding::Port { name, .. } => Some(name),
        }
    }

    fn close(&mut self) {
        if let OutputBinding::Port { connection, .. } = self {
            if let Some(connection) = connection.take() {
                connection.close();
            }
        }
    }
}

/// All mutable menu state for the process lifetime
pub struct MenuSession {
    screen: Screen,
    stage: Stage,
    items: Vec<MenuItem>,
    index: usize,
    bluetooth_enabled: bool,
    sound_bank: PathBuf,
    input: Option<Box<dyn InputConnection>>,
    output: OutputBinding,
}

impl MenuSession {
    pub fn new(bluetooth_enabled: bool, sound_bank: PathBuf) -> Self {
        Self {
            screen: Screen::Main,
            stage: Stage::ReadyToCommit,
            items: main_items(),
            index: 0,
            bluetooth_enabled,
            sound_bank,
            input: None,
            output: OutputBinding::LocalSynth,
        }
    }

    pub fn screen(&self) -> Screen {
        self.screen
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn items(&self) -> &[MenuItem] {
        &self.items
    }

    pub fn labels(&self) -> Vec<String> {
        self.items.iter().map(|item| item.label.clone()).collect()
    }

    pub fn bluetooth_enabled(&self) -> bool {
        self.bluetooth_enabled
    }

    pub fn sound_bank(&self) -> &Path {
        &self.sound_bank
    }

    pub fn input_port(&self) -> Option<&str> {
        self.input.as_ref().map(|c| c.port_name())
    }

    pub fn output(&self) -> &OutputBinding {
        &self.output
    }

    pub fn selected(&self) -> Option<&MenuItem> {
        self.items.get(self.index)
    }

    /// Move the cursor, clamped to the current list
    pub fn move_cursor(&mut self, delta: isize) {
        let last = self.items.len().saturating_sub(1);
        self.index = self.index.saturating_add_signed(delta).min(last);
    }

    fn show(&mut self, screen: Screen, stage: Stage, items: Vec<MenuItem>, index: usize) {
        self.screen = screen;
        self.stage = stage;
        self.items = items;
        self.index = index.min(self.items.len().saturating_sub(1));
    }

    fn go_main(&mut self) {
        self.show(Screen::Main, Stage::ReadyToCommit, main_items(), 0);
    }
}

fn main_items() -> Vec<MenuItem> {
    Screen::MAIN_ENTRIES
        .iter()
        .map(|screen| MenuItem::new(screen.title(), MenuValue::Screen(*screen)))
        .collect()
}

/// External systems the menu drives
pub struct Collaborators {
    pub backend: Arc<dyn MidiBackend>,
    pub agent: Arc<dyn ControlPlane>,
    pub engine: Arc<dyn SoundEngine>,
    pub display: Box<dyn Display>,
}

pub struct Menu {
    session: MenuSession,
    config: AppConfig,
    paths: AppPaths,
    backend: Arc<dyn MidiBackend>,
    agent: Arc<dyn ControlPlane>,
    engine: Arc<dyn SoundEngine>,
    display: Box<dyn Display>,
}

impl Menu {
    pub fn new(config: AppConfig, paths: AppPaths, parts: Collaborators) -> Self {
        let session = MenuSession::new(
            config.bluetooth.enabled,
            config.paths.default_sound_bank.clone(),
        );
        Self {
            session,
            config,
            paths,
            backend: parts.backend,
            agent: parts.agent,
            engine: parts.engine,
            display: parts.display,
        }
    }

    pub fn session(&self) -> &MenuSession {
        &self.session
    }

    /// Bring the panel up: build the engine, clear stale Bluetooth records,
    /// bind the most recent input port and draw the main screen
    pub async fn start(&mut self) {
        if let Err(e) = engine::rebuild(self.engine.as_ref(), &self.session.sound_bank) {
            warn!("Initial engine build: {}", e);
        }

        DeviceDiscovery::new(self.agent.as_ref(), &self.config.bluetooth)
            .revoke_all(self.session.bluetooth_enabled && self.config.bluetooth.revoke_known_devices)
            .await;

        if self.config.midi.open_last_input_on_start {
            self.bind_last_input();
        }
        self.render();
    }

    /// Handle one button press and redraw
    pub async fn handle(&mut self, event: ButtonEvent) {
        debug!("{} on {} ({:?})", event, self.session.screen, self.session.stage);
        match event {
            ButtonEvent::CursorUp => self.session.move_cursor(-1),
            ButtonEvent::CursorDown => self.session.move_cursor(1),
            ButtonEvent::Reset => self.reset(),
            ButtonEvent::Activate => self.activate().await,
        }
        self.render();
    }

    /// Stop playback and close every open port
    pub fn shutdown(&mut self) {
        self.engine.stop_playback();
        if let Some(input) = self.session.input.take() {
            input.close();
        }
        self.session.output.close();
        info!("Menu shut down");
    }

    fn render(&mut self) {
        let labels = self.session.labels();
        self.display.render(self.session.screen, &labels, self.session.index);
    }

    fn reset(&mut self) {
        if let Err(e) = engine::rebuild(self.engine.as_ref(), &self.session.sound_bank) {
            warn!("Engine reset: {}", e);
        }
        self.session.go_main();
    }

    async fn activate(&mut self) {
        let screen = self.session.screen;
        match (screen, self.session.stage) {
            (Screen::Main, _) => {
                if let Some(MenuValue::Screen(target)) = self.session.selected().map(|i| &i.value) {
                    let target = *target;
                    self.session.show(target, Stage::Populating, Vec::new(), 0);
                    self.populate(target).await;
                }
            }
            (_, Stage::Populating) => self.populate(screen).await,
            (Screen::BluetoothToggle, Stage::ReadyToCommit) => self.commit_bluetooth(),
            (Screen::SelectInput, Stage::ReadyToCommit) => self.commit_port(PortRole::Input).await,
            (Screen::SelectOutput, Stage::ReadyToCommit) => self.commit_port(PortRole::Output).await,
            (Screen::SelectSoundFont, Stage::ReadyToCommit) => self.commit_sound_font(),
            (Screen::SelectMidiFile, Stage::ReadyToCommit) => self.commit_midi_file().await,
        }
    }

    async fn populate(&mut self, screen: Screen) {
        let (items, index) = match screen {
            Screen::Main => (main_items(), 0),
            Screen::BluetoothToggle => (
                vec![
                    MenuItem::new("OFF", MenuValue::Flag(false)),
                    MenuItem::new("ON", MenuValue::Flag(true)),
                ],
                usize::from(self.session.bluetooth_enabled),
            ),
            Screen::SelectInput => (self.port_items(PortRole::Input).await, 0),
            Screen::SelectOutput => (self.port_items(PortRole::Output).await, 0),
            Screen::SelectSoundFont => (
                self.media_items(&self.paths.sound_bank_dir(), &self.config.paths.sound_bank_extension),
                0,
            ),
            Screen::SelectMidiFile => (
                self.media_items(&self.paths.midi_file_dir(), &self.config.paths.midi_extension),
                0,
            ),
        };
        debug!("{} populated with {} item(s)", screen, items.len());
        self.session.show(screen, Stage::ReadyToCommit, items, index);
    }

    /// Local ports (after the local synth for outputs), then Bluetooth
    /// candidates when the flag is on
    async fn port_items(&mut self, role: PortRole) -> Vec<MenuItem> {
        let mut items = Vec::new();
        if role == PortRole::Output {
            items.push(MenuItem::new(&self.config.midi.local_synth_label, MenuValue::LocalSynth));
        }
        match self.backend.ports(role) {
            Ok(ports) => items.extend(
                ports
                    .into_iter()
                    .map(|name| MenuItem::new(name.clone(), MenuValue::Port(name))),
            ),
            Err(e) => warn!("Enumerating {} ports failed: {}", role, e),
        }

        if self.session.bluetooth_enabled {
            self.display.busy(BUSY_BANNER);
            let bluetooth = &self.config.bluetooth;
            let discovery = DeviceDiscovery::new(self.agent.as_ref(), bluetooth);
            if bluetooth.revoke_known_devices {
                discovery.revoke_all(true).await;
            }
            for candidate in discovery.discover(true, bluetooth.discovery_scan()).await {
                items.push(MenuItem::new(
                    candidate.label(),
                    MenuValue::Bluetooth {
                        address: candidate.address,
                        name: candidate.name,
                    },
                ));
            }
        }
        items
    }

    fn media_items(&self, dir: &Path, extension: &str) -> Vec<MenuItem> {
        list_media(dir, extension)
            .into_iter()
            .map(|entry| MenuItem::new(entry.label, MenuValue::Path(entry.path)))
            .collect()
    }

    fn commit_bluetooth(&mut self) {
        if let Some(MenuValue::Flag(on)) = self.session.selected().map(|i| &i.value) {
            let on = *on;
            if on != self.session.bluetooth_enabled {
                info!("Bluetooth {}", if on { "enabled" } else { "disabled" });
            }
            self.session.bluetooth_enabled = on;
        }
        self.session.go_main();
    }

    async fn commit_port(&mut self, role: PortRole) {
        let Some(item) = self.session.selected().cloned() else {
            debug!("Nothing to commit on {} screen", role);
            self.session.go_main();
            return;
        };

        let (name, matching) = match item.value {
            MenuValue::LocalSynth => {
                self.session.output.close();
                self.session.output = OutputBinding::LocalSynth;
                info!("Output bound to the local synth");
                return;
            }
            MenuValue::Port(name) => (name, PortMatch::Exact),
            MenuValue::Bluetooth { address, name } => {
                match self.connect_bluetooth(role, address, &name).await {
                    Some(port) => (port, PortMatch::Substring),
                    None => {
                        warn!(
                            "Selection '{}' unresolved; keeping the current {} port",
                            item.label, role
                        );
                        return;
                    }
                }
            }
            other => {
                error!("Unexpected {:?} on {} screen", other, role);
                return;
            }
        };

        match resolve_port(self.backend.as_ref(), role, &name, matching) {
            PortResolution::Resolved { index, name } => self.bind(role, index, &name),
            PortResolution::Unresolved => {
                warn!("{} port '{}' is gone; keeping the current one", role, name)
            }
        }
    }

    /// Pair and connect `address`, then wait for its MIDI port.
    ///
    /// A connect failure is logged and the port is awaited anyway: agents
    /// report spurious failures for devices that are already connected.
    async fn connect_bluetooth(
        &mut self,
        role: PortRole,
        address: DeviceAddress,
        name: &str,
    ) -> Option<String> {
        self.display.busy(BUSY_BANNER);
        let bluetooth = &self.config.bluetooth;

        DeviceDiscovery::new(self.agent.as_ref(), bluetooth)
            .revoke_all(self.session.bluetooth_enabled && bluetooth.revoke_known_devices)
            .await;

        if let Err(e) = PairingSequencer::new(self.agent.as_ref(), bluetooth)
            .connect(address)
            .await
        {
            warn!("{}; waiting for the port anyway", e);
            debug!("Last agent output: {}", e.last_output.trim());
        }

        let midi = &self.config.midi;
        match await_port(self.backend.as_ref(), role, name, midi.port_timeout(), midi.port_poll()).await {
            Ok(port) => Some(port),
            Err(e) => {
                warn!("{}", e);
                None
            }
        }
    }

    /// Replace the `role` binding with the port at `index`, closing the
    /// previous one first. Rebinding the same port keeps it open.
    fn bind(&mut self, role: PortRole, index: usize, name: &str) {
        match role {
            PortRole::Input => {
                if self.session.input_port() == Some(name) {
                    debug!("Input '{}' already bound", name);
                } else {
                    if let Some(previous) = self.session.input.take() {
                        previous.close();
                    }
                    let sink = engine::input_sink(self.engine.clone());
                    match self.backend.open_input(index, sink) {
                        Ok(connection) => {
                            info!("Input bound to '{}'", connection.port_name());
                            self.session.input = Some(connection);
                        }
                        Err(e) => warn!("Opening input '{}': {:#}", name, e),
                    }
                }
                engine::reinitialize_for_input(
                    self.engine.as_ref(),
                    &self.session.sound_bank,
                    &self.config.engine.reverb,
                );
            }
            PortRole::Output => {
                if self.session.output.port_name() == Some(name) {
                    debug!("Output '{}' already bound", name);
                    return;
                }
                self.session.output.close();
                self.session.output = match self.backend.open_output(index) {
                    Ok(connection) => {
                        info!("Output bound to '{}'", connection.port_name());
                        OutputBinding::Port {
                            name: connection.port_name().to_string(),
                            connection: Some(connection),
                        }
                    }
                    Err(e) => {
                        warn!("Opening output '{}': {:#}; using the local synth", name, e);
                        OutputBinding::LocalSynth
                    }
                };
            }
        }
    }

    fn bind_last_input(&mut self) {
        match self.backend.input_ports() {
            Ok(ports) => match ports.last() {
                Some(name) => self.bind(PortRole::Input, ports.len() - 1, name),
                None => info!("No MIDI input ports found"),
            },
            Err(e) => warn!("Enumerating input ports failed: {:#}", e),
        }
    }

    fn commit_sound_font(&mut self) {
        if let Some(MenuValue::Path(path)) = self.session.selected().map(|i| i.value.clone()) {
            info!("Sound bank set to {}", path.display());
            self.session.sound_bank = path;
        }
        self.reset();
    }

    async fn commit_midi_file(&mut self) {
        let path = match self.session.selected().map(|i| &i.value) {
            Some(MenuValue::Path(path)) => Some(path.clone()),
            _ => None,
        };
        // Playback never keeps the menu away from the main screen
        self.session.go_main();
        let Some(path) = path else {
            return;
        };

        match self.session.output.port_name().map(str::to_string) {
            None => {
                if let Err(e) = engine::rebuild(self.engine.as_ref(), &self.session.sound_bank) {
                    warn!("Engine rebuild before playback: {}", e);
                }
                if let Err(e) = self.engine.play_file(&path) {
                    warn!("{}", e);
                }
            }
            Some(port) => self.play_external(&port, &path).await,
        }
    }

    /// Play a file to the bound external output, blocking the menu until it
    /// ends. The bound handle is released for the duration so only one
    /// output port is open at a time, then reopened.
    async fn play_external(&mut self, port: &str, path: &Path) {
        let timeline = match Timeline::load(path) {
            Ok(timeline) => timeline,
            Err(e) => {
                warn!("{:#}", e);
                return;
            }
        };

        self.display.busy(BUSY_BANNER);
        self.session.output.close();

        match self.open_output_matching(port) {
            Some(mut output) => {
                if let Err(e) = play_to_port(&timeline, output.as_mut()).await {
                    warn!("Playback of {} stopped: {:#}", path.display(), e);
                }
                output.close();
            }
            None => error!("No output port matches '{}'", port),
        }

        let reopened = self.open_output_matching(port);
        if let OutputBinding::Port { connection, .. } = &mut self.session.output {
            *connection = reopened;
        }
    }

    fn open_output_matching(&self, name: &str) -> Option<Box<dyn OutputConnection>> {
        let ports = match self.backend.output_ports() {
            Ok(ports) => ports,
            Err(e) => {
                warn!("Enumerating output ports failed: {:#}", e);
                return None;
            }
        };
        let index = find_port_bidirectional(&ports, name)?;
        match self.backend.open_output(index) {
            Ok(connection) => Some(connection),
            Err(e) => {
                warn!("Opening output '{}': {:#}", ports[index], e);
                None
            }
        }
    }
}
