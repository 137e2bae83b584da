//! Application path management.
//!
//! This module resolves where the configuration file lives and where the
//! player looks for its content on disk.
//!
//! ## Config detection
//!
//! - **Dev mode**: a `config.yaml` in the current working directory wins,
//!   which keeps `cargo run` from the project directory seamless.
//! - **Installed mode** (default): `<config_dir>/midiplayer/config.yaml`
//!   (`~/.config/midiplayer/config.yaml` on Linux).
//!
//! ## Content layout
//!
//! Sound banks live behind a symbolic link (`~/sf2` by default) and MIDI
//! files under `~/midifiles`. When the process runs as root (typical for
//! GPIO access on a Pi) the home directory is mapped to `/home/pi`.

use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::config::PathsConfig;

/// Application name used for directories in installed mode
const APP_NAME: &str = "midiplayer";

/// Home used instead of `/root` so content is found when running as root
const ROOT_HOME_FALLBACK: &str = "/home/pi";

/// Resolved application paths
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Path to the configuration file
    pub config: PathBuf,
    /// Home directory content is resolved against
    pub home: PathBuf,
    /// Name of the sound-bank symlink under home
    pub sound_bank_link: String,
    /// Name of the MIDI file directory under home
    pub midi_dir: String,
}

impl AppPaths {
    /// Detect the configuration file location.
    ///
    /// Called before logging is initialized, so nothing here logs.
    pub fn detect_config(explicit: Option<&Path>) -> PathBuf {
        if let Some(path) = explicit {
            return path.to_path_buf();
        }

        let cwd_config = std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join("config.yaml");
        if cwd_config.exists() {
            return cwd_config;
        }

        dirs::config_dir()
            .map(|dir| dir.join(APP_NAME).join("config.yaml"))
            .unwrap_or(cwd_config)
    }

    /// Build the content paths from the loaded configuration
    pub fn new(config_path: PathBuf, paths: &PathsConfig) -> Self {
        let home = paths.home.clone().unwrap_or_else(detect_home);
        debug!("Content home: {}", home.display());

        Self {
            config: config_path,
            home,
            sound_bank_link: paths.sound_bank_link.clone(),
            midi_dir: paths.midi_dir.clone(),
        }
    }

    /// Resolve the sound-bank directory through its symbolic link.
    ///
    /// A relative link target is resolved against the home directory. When
    /// the entry is a plain directory instead of a link it is used as is.
    pub fn sound_bank_dir(&self) -> PathBuf {
        let link = self.home.join(&self.sound_bank_link);
        match std::fs::read_link(&link) {
            Ok(target) if target.is_absolute() => target,
            Ok(target) => self.home.join(target),
            Err(e) => {
                if !link.is_dir() {
                    warn!("Sound bank link {} unusable: {}", link.display(), e);
                }
                link
            }
        }
    }

    /// Directory scanned for MIDI files
    pub fn midi_file_dir(&self) -> PathBuf {
        self.home.join(&self.midi_dir)
    }
}

fn detect_home() -> PathBuf {
    map_root_home(dirs::home_dir().unwrap_or_else(|| PathBuf::from(ROOT_HOME_FALLBACK)))
}

fn map_root_home(home: PathBuf) -> PathBuf {
    if home == Path::new("/root") {
        PathBuf::from(ROOT_HOME_FALLBACK)
    } else {
        home
    }
}
