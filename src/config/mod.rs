//! Configuration management for the MIDI player
//!
//! Handles loading, defaulting and validation of the YAML configuration file.
//! Every field has a default so that a missing or empty file still yields a
//! working front panel.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::info;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub bluetooth: BluetoothConfig,
    #[serde(default)]
    pub midi: MidiConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Filesystem layout for sound banks and MIDI files
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PathsConfig {
    /// Home directory override (auto-detected when absent)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub home: Option<PathBuf>,
    /// Symbolic link under home that points at the sound-bank directory
    #[serde(default = "default_sound_bank_link")]
    pub sound_bank_link: String,
    /// MIDI file directory under home
    #[serde(default = "default_midi_dir")]
    pub midi_dir: String,
    #[serde(default = "default_sound_bank_extension")]
    pub sound_bank_extension: String,
    #[serde(default = "default_midi_extension")]
    pub midi_extension: String,
    /// Sound bank loaded at startup and after a reset until one is chosen
    #[serde(default = "default_sound_bank")]
    pub default_sound_bank: PathBuf,
}

/// Bluetooth control-plane agent configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BluetoothConfig {
    /// Initial value of the Bluetooth flag
    #[serde(default)]
    pub enabled: bool,
    /// Agent executable
    #[serde(default = "default_agent")]
    pub agent: String,
    #[serde(default = "default_discovery_scan_secs")]
    pub discovery_scan_secs: u64,
    #[serde(default = "default_scan_pulse_secs")]
    pub scan_pulse_secs: u64,
    #[serde(default = "default_pair_retry_delay_secs")]
    pub pair_retry_delay_secs: u64,
    #[serde(default = "default_command_delay_ms")]
    pub command_delay_ms: u64,
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    /// Overall budget for one pairing/connection sequence
    #[serde(default = "default_connect_deadline_secs")]
    pub connect_deadline_secs: u64,
    /// Remove every known device before listing candidates and before connecting
    #[serde(default = "default_true")]
    pub revoke_known_devices: bool,
    /// Agent command listing paired devices
    #[serde(default = "default_paired_query")]
    pub paired_query: String,
}

/// MIDI port configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MidiConfig {
    /// Client name registered with the OS MIDI layer
    #[serde(default = "default_client_name")]
    pub client_name: String,
    /// Label of the synthetic output entry routed to the built-in engine
    #[serde(default = "default_local_synth_label")]
    pub local_synth_label: String,
    #[serde(default = "default_port_timeout_secs")]
    pub port_timeout_secs: u64,
    #[serde(default = "default_port_poll_ms")]
    pub port_poll_ms: u64,
    #[serde(default = "default_true")]
    pub open_last_input_on_start: bool,
}

/// Sound engine configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    #[serde(default = "default_gain")]
    pub gain: f32,
    #[serde(default)]
    pub reverb: ReverbConfig,
}

/// Fixed reverb applied after every input commit
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct ReverbConfig {
    #[serde(default = "default_room_size")]
    pub room_size: f32,
    #[serde(default = "default_damping")]
    pub damping: f32,
    #[serde(default = "default_width")]
    pub width: f32,
    #[serde(default = "default_level")]
    pub level: f32,
}

/// Front-panel display configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DisplayConfig {
    /// Visible rows in the scroll window
    #[serde(default = "default_rows")]
    pub rows: usize,
}

/// Log output configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Directory for a daily rolling log file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

impl AppConfig {
    /// Load configuration from file with validation
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_yaml(&contents)
            .with_context(|| format!("Failed to parse YAML config: {}", path.display()))
    }

    /// Load the file if it exists, otherwise fall back to defaults
    pub async fn load_or_default(path: &Path) -> Result<Self> {
        if fs::try_exists(path).await.unwrap_or(false) {
            Self::load(path).await
        } else {
            info!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Parse and validate a YAML document
    pub fn from_yaml(contents: &str) -> Result<Self> {
        // serde_yaml rejects an empty document for a struct
        let config: AppConfig = if contents.trim().is_empty() {
            AppConfig::default()
        } else {
            serde_yaml::from_str(contents)?
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration for correctness and consistency
    pub fn validate(&self) -> Result<()> {
        if self.display.rows == 0 {
            anyhow::bail!("display.rows must be at least 1");
        }

        let bt = &self.bluetooth;
        if bt.agent.trim().is_empty() {
            anyhow::bail!("bluetooth.agent cannot be empty");
        }
        if bt.discovery_scan_secs == 0 || bt.scan_pulse_secs == 0 {
            anyhow::bail!("bluetooth scan windows must be non-zero");
        }
        if bt.command_timeout_secs == 0 || bt.connect_deadline_secs == 0 {
            anyhow::bail!("bluetooth timeouts must be non-zero");
        }

        if self.midi.port_poll_ms == 0 {
            anyhow::bail!("midi.port_poll_ms must be non-zero");
        }
        if self.midi.local_synth_label.trim().is_empty() {
            anyhow::bail!("midi.local_synth_label cannot be empty");
        }

        if self.paths.sound_bank_extension.is_empty() || self.paths.midi_extension.is_empty() {
            anyhow::bail!("file extensions cannot be empty");
        }

        let reverb = &self.engine.reverb;
        for (name, value) in [
            ("room_size", reverb.room_size),
            ("damping", reverb.damping),
            ("width", reverb.width),
            ("level", reverb.level),
        ] {
            if !(0.0..=1.0).contains(&value) {
                anyhow::bail!("engine.reverb.{} is {} (must be 0.0-1.0)", name, value);
            }
        }

        Ok(())
    }
}

impl BluetoothConfig {
    pub fn discovery_scan(&self) -> Duration {
        Duration::from_secs(self.discovery_scan_secs)
    }

    pub fn scan_pulse(&self) -> Duration {
        Duration::from_secs(self.scan_pulse_secs)
    }

    pub fn pair_retry_delay(&self) -> Duration {
        Duration::from_secs(self.pair_retry_delay_secs)
    }

    pub fn command_delay(&self) -> Duration {
        Duration::from_millis(self.command_delay_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn connect_deadline(&self) -> Duration {
        Duration::from_secs(self.connect_deadline_secs)
    }
}

impl MidiConfig {
    pub fn port_timeout(&self) -> Duration {
        Duration::from_secs(self.port_timeout_secs)
    }

    pub fn port_poll(&self) -> Duration {
        Duration::from_millis(self.port_poll_ms)
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            home: None,
            sound_bank_link: default_sound_bank_link(),
            midi_dir: default_midi_dir(),
            sound_bank_extension: default_sound_bank_extension(),
            midi_extension: default_midi_extension(),
            default_sound_bank: default_sound_bank(),
        }
    }
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            agent: default_agent(),
            discovery_scan_secs: default_discovery_scan_secs(),
            scan_pulse_secs: default_scan_pulse_secs(),
            pair_retry_delay_secs: default_pair_retry_delay_secs(),
            command_delay_ms: default_command_delay_ms(),
            command_timeout_secs: default_command_timeout_secs(),
            connect_deadline_secs: default_connect_deadline_secs(),
            revoke_known_devices: true,
            paired_query: default_paired_query(),
        }
    }
}

impl Default for MidiConfig {
    fn default() -> Self {
        Self {
            client_name: default_client_name(),
            local_synth_label: default_local_synth_label(),
            port_timeout_secs: default_port_timeout_secs(),
            port_poll_ms: default_port_poll_ms(),
            open_last_input_on_start: true,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            gain: default_gain(),
            reverb: ReverbConfig::default(),
        }
    }
}

impl Default for ReverbConfig {
    fn default() -> Self {
        Self {
            room_size: default_room_size(),
            damping: default_damping(),
            width: default_width(),
            level: default_level(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self { rows: default_rows() }
    }
}

// Default value functions
fn default_true() -> bool { true }
fn default_sound_bank_link() -> String { "sf2".to_string() }
fn default_midi_dir() -> String { "midifiles".to_string() }
fn default_sound_bank_extension() -> String { "sf2".to_string() }
fn default_midi_extension() -> String { "mid".to_string() }
fn default_sound_bank() -> PathBuf { PathBuf::from("/usr/share/sounds/sf2/General_MIDI_64_1.6.sf2") }
fn default_agent() -> String { "bluetoothctl".to_string() }
fn default_discovery_scan_secs() -> u64 { 7 }
fn default_scan_pulse_secs() -> u64 { 5 }
fn default_pair_retry_delay_secs() -> u64 { 3 }
fn default_command_delay_ms() -> u64 { 300 }
fn default_command_timeout_secs() -> u64 { 15 }
fn default_connect_deadline_secs() -> u64 { 90 }
fn default_paired_query() -> String { "paired-devices".to_string() }
fn default_client_name() -> String { "midiplayer".to_string() }
fn default_local_synth_label() -> String { "FLUIDSYNTH".to_string() }
fn default_port_timeout_secs() -> u64 { 10 }
fn default_port_poll_ms() -> u64 { 500 }
fn default_gain() -> f32 { 0.5 }
fn default_room_size() -> f32 { 0.9 }
fn default_damping() -> f32 { 0.5 }
fn default_width() -> f32 { 0.8 }
fn default_level() -> f32 { 0.7 }
fn default_rows() -> usize { 7 }
