//! Sound engine
//!
//! The menu drives the synthesizer through the [`SoundEngine`] trait: rebuild
//! it, load a sound bank, pick a preset, set reverb, feed it live MIDI and
//! play files on it. Two implementations exist: [`OxiEngine`] renders through
//! the default audio device, [`SilentEngine`] accepts everything and renders
//! nothing (headless boxes and `--no-audio`).

mod oxi;
mod silent;

pub use oxi::OxiEngine;
pub use silent::SilentEngine;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::config::ReverbConfig;
use crate::midi::{InputCallback, MidiMessage};

/// Highest bank number tried when looking for a usable preset
pub const MAX_BANK: u32 = 127;

/// Highest preset number tried in every bank
pub const MAX_PRESET: u8 = 127;

/// Handle of a sound bank loaded into the current synth instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SoundBankId(pub usize);

/// Sound banks loaded into one synth instance, keyed by path.
///
/// Reloading a path hands back the existing id instead of adding another copy
/// of the bank; `clear` goes with every synth rebuild.
#[derive(Debug)]
pub(crate) struct LoadedBanks<T> {
    entries: Vec<(PathBuf, T)>,
}

impl<T> Default for LoadedBanks<T> {
    fn default() -> Self {
        Self { entries: Vec::new() }
    }
}

impl<T: Copy> LoadedBanks<T> {
    pub(crate) fn find(&self, path: &Path) -> Option<SoundBankId> {
        self.entries.iter().position(|(p, _)| p == path).map(SoundBankId)
    }

    pub(crate) fn insert(&mut self, path: &Path, handle: T) -> SoundBankId {
        if let Some(id) = self.find(path) {
            return id;
        }
        self.entries.push((path.to_path_buf(), handle));
        SoundBankId(self.entries.len() - 1)
    }

    pub(crate) fn get(&self, id: SoundBankId) -> Option<T> {
        self.entries.get(id.0).map(|(_, handle)| *handle)
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to load sound bank {path}: {reason}")]
    SoundBank { path: PathBuf, reason: String },

    #[error("no presets found in the sound bank")]
    NoPresets,

    #[error("audio output unavailable: {0}")]
    Audio(String),

    #[error("playback of {path} failed: {reason}")]
    Playback { path: PathBuf, reason: String },
}

/// Synthesizer operations consumed by the menu and the MIDI input thread.
///
/// Methods take `&self`; implementations keep their state behind interior
/// mutexes so one instance can be shared with the input callback.
pub trait SoundEngine: Send + Sync {
    /// Tear the synth down and start a fresh one with no sound bank
    fn reset(&self) -> Result<(), EngineError>;

    /// Load `path` into the current synth. A bank already loaded since the
    /// last reset is not loaded again; its existing id is returned.
    fn load_sound_bank(&self, path: &Path) -> Result<SoundBankId, EngineError>;

    /// Select `(bank_num, preset)` from `bank` on `channel`; false when the
    /// sound bank has no such preset
    fn program_select(&self, channel: u8, bank: SoundBankId, bank_num: u32, preset: u8) -> bool;

    fn set_reverb(&self, reverb: &ReverbConfig);

    /// Apply one live message (notes, controllers, program change, pitch bend)
    fn apply(&self, message: &MidiMessage);

    /// Start playing a MIDI file in the background
    fn play_file(&self, path: &Path) -> Result<(), EngineError>;

    /// Cancel background playback, if any
    fn stop_playback(&self);
}

/// Select the first preset the engine accepts, scanning banks and presets in
/// ascending order
pub fn select_first_preset(
    engine: &dyn SoundEngine,
    bank: SoundBankId,
) -> Result<(u32, u8), EngineError> {
    for bank_num in 0..=MAX_BANK {
        for preset in 0..=MAX_PRESET {
            if engine.program_select(0, bank, bank_num, preset) {
                debug!("Selected bank {}, preset {}", bank_num, preset);
                return Ok((bank_num, preset));
            }
        }
    }
    Err(EngineError::NoPresets)
}

/// Rebuild the engine from `sound_bank`: cancel playback, reset and reload.
///
/// A missing preset is logged and leaves the engine loaded but silent.
pub fn rebuild(engine: &dyn SoundEngine, sound_bank: &Path) -> Result<SoundBankId, EngineError> {
    engine.stop_playback();
    engine.reset()?;
    let bank = engine.load_sound_bank(sound_bank)?;
    if let Err(e) = select_first_preset(engine, bank) {
        warn!("{}: {}", sound_bank.display(), e);
    }
    info!("Sound engine rebuilt with {}", sound_bank.display());
    Ok(bank)
}

/// Prepare the engine for a newly bound input: reload the active sound
/// bank, select its first preset and apply the fixed reverb.
///
/// Never fails; every problem is logged and the engine is left in a
/// best-effort state.
pub fn reinitialize_for_input(engine: &dyn SoundEngine, sound_bank: &Path, reverb: &ReverbConfig) {
    match engine.load_sound_bank(sound_bank) {
        Ok(bank) => {
            if let Err(e) = select_first_preset(engine, bank) {
                warn!("{}: {}", sound_bank.display(), e);
            }
        }
        Err(e) => warn!("Engine reinitialisation: {}", e),
    }
    engine.set_reverb(reverb);
}

/// Input callback that decodes raw bytes and applies them to `engine`
pub fn input_sink(engine: Arc<dyn SoundEngine>) -> InputCallback {
    Arc::new(move |bytes: &[u8]| match MidiMessage::parse(bytes) {
        Some(message) => {
            trace!("MIDI in: {}", message);
            engine.apply(&message);
        }
        None => trace!("Ignored MIDI bytes: {}", crate::midi::format_hex(bytes)),
    })
}
