use parking_lot::Mutex;
use std::path::Path;
use tracing::{debug, info};

use super::{EngineError, LoadedBanks, SoundBankId, SoundEngine};
use crate::config::ReverbConfig;
use crate::midi::MidiMessage;
use crate::player::Timeline;

/// Engine without audio output.
///
/// Sound banks must exist and MIDI files must parse, so the menu behaves as
/// it does on real hardware; nothing is rendered.
#[derive(Default)]
pub struct SilentEngine {
    banks: Mutex<LoadedBanks<()>>,
}

impl SilentEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SoundEngine for SilentEngine {
    fn reset(&self) -> Result<(), EngineError> {
        self.banks.lock().clear();
        Ok(())
    }

    fn load_sound_bank(&self, path: &Path) -> Result<SoundBankId, EngineError> {
        if !path.is_file() {
            return Err(EngineError::SoundBank {
                path: path.to_path_buf(),
                reason: "not a file".to_string(),
            });
        }
        let id = self.banks.lock().insert(path, ());
        debug!("Silent engine loaded {}", path.display());
        Ok(id)
    }

    fn program_select(&self, _channel: u8, bank: SoundBankId, bank_num: u32, preset: u8) -> bool {
        self.banks.lock().get(bank).is_some() && bank_num == 0 && preset == 0
    }

    fn set_reverb(&self, _reverb: &ReverbConfig) {}

    fn apply(&self, _message: &MidiMessage) {}

    fn play_file(&self, path: &Path) -> Result<(), EngineError> {
        let timeline = Timeline::load(path).map_err(|e| EngineError::Playback {
            path: path.to_path_buf(),
            reason: format!("{:#}", e),
        })?;
        info!("Silent engine skipping {} events of {}", timeline.len(), path.display());
        Ok(())
    }

    fn stop_playback(&self) {}
}
