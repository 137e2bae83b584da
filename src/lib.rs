//! MIDI Player front panel
//!
//! Menu-driven controller for a small MIDI box: pick MIDI inputs and outputs
//! (including Bluetooth LE MIDI peripherals paired through `bluetoothctl`),
//! choose a sound bank, and play MIDI files through the built-in synth or an
//! external port.

pub mod bluetooth;
pub mod config;
pub mod diagnostics;
pub mod display;
pub mod engine;
pub mod keypad;
pub mod library;
pub mod menu;
pub mod midi;
pub mod paths;
pub mod player;
pub mod reconcile;

#[cfg(test)]
pub(crate) mod testing;
