//! Bluetooth MIDI device selection
//!
//! Everything here drives an external control-plane agent (`bluetoothctl`)
//! as a black box: the agent client and its output parser, discovery of
//! candidate peripherals, and the pairing/connection sequence.

pub mod address;
pub mod agent;
pub mod discovery;
pub mod events;
pub mod pairing;

pub use address::{CandidateDevice, DeviceAddress};
pub use agent::{Bluetoothctl, ControlPlane};
pub use discovery::DeviceDiscovery;
pub use pairing::{ConnectError, ConnectFailure, PairingSequencer};
