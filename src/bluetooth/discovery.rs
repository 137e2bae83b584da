//! Device discovery reconciler
//!
//! Merges two views of the radio neighbourhood into one candidate list:
//! devices advertising during a live scan, and paired devices that report
//! an active connection (a connected peripheral usually stops advertising).

use std::time::Duration;
use tracing::{debug, info};

use super::address::{CandidateDevice, DeviceAddress};
use super::agent::{AdvertisingScan, ControlPlane};
use super::events::{parse_device_listing, reports_connected};
use crate::config::BluetoothConfig;

/// Discovery and housekeeping queries against the agent
pub struct DeviceDiscovery<'a> {
    agent: &'a dyn ControlPlane,
    config: &'a BluetoothConfig,
}

impl<'a> DeviceDiscovery<'a> {
    pub fn new(agent: &'a dyn ControlPlane, config: &'a BluetoothConfig) -> Self {
        Self { agent, config }
    }

    /// List candidate devices.
    ///
    /// Read-only with respect to pairing state. Returns immediately with no
    /// agent spawned when Bluetooth is disabled.
    pub async fn discover(&self, enabled: bool, scan_window: Duration) -> Vec<CandidateDevice> {
        if !enabled {
            return Vec::new();
        }

        let (advertising, connected) = tokio::join!(
            self.agent.scan_advertising(scan_window),
            self.connected_paired()
        );
        let candidates = merge_candidates(&advertising, &connected);

        info!(
            "Discovery: {} advertising, {} connected, {} candidate(s)",
            advertising.len(),
            connected.len(),
            candidates.len()
        );
        candidates
    }

    /// Paired devices whose status query reports `Connected: yes`
    pub async fn connected_paired(&self) -> Vec<(DeviceAddress, String)> {
        let timeout = self.config.command_timeout();
        let listing = self
            .agent
            .run(&[self.config.paired_query.clone()], timeout)
            .await;

        let mut connected = Vec::new();
        for (address, name) in parse_device_listing(&listing) {
            let info = self.agent.run(&[format!("info {}", address)], timeout).await;
            if reports_connected(&info) {
                debug!("Paired device {} ({}) is connected", address, name);
                connected.push((address, name));
            }
        }
        connected
    }

    /// Remove every device the agent knows about.
    ///
    /// Returns the addresses a removal was issued for. No-op when Bluetooth
    /// is disabled.
    pub async fn revoke_all(&self, enabled: bool) -> Vec<DeviceAddress> {
        if !enabled {
            return Vec::new();
        }

        let timeout = self.config.command_timeout();
        let listing = self.agent.run(&["devices".to_string()], timeout).await;
        let addresses: Vec<DeviceAddress> = parse_device_listing(&listing)
            .into_iter()
            .map(|(address, _)| address)
            .collect();

        for address in &addresses {
            debug!("Removing {}", address);
            self.agent.run(&[format!("remove {}", address)], timeout).await;
        }
        if !addresses.is_empty() {
            info!("Removed {} known Bluetooth device(s)", addresses.len());
        }
        addresses
    }
}

/// Union of both provenance sets keyed by address.
///
/// Advertising devices come first in first-seen order, then connected
/// devices that were not advertising. A non-empty advertised name wins over
/// the paired name.
pub fn merge_candidates(
    advertising: &AdvertisingScan,
    connected: &[(DeviceAddress, String)],
) -> Vec<CandidateDevice> {
    let paired_name = |address: &DeviceAddress| {
        connected
            .iter()
            .find(|(a, _)| a == address)
            .map(|(_, n)| n.trim())
            .unwrap_or("")
    };

    let mut candidates: Vec<CandidateDevice> = advertising
        .iter()
        .map(|(address, name)| {
            let name = match name.trim() {
                "" => paired_name(address),
                advertised => advertised,
            };
            CandidateDevice::new(name, *address)
        })
        .collect();

    for (address, name) in connected {
        if !candidates.iter().any(|c| c.address == *address) {
            candidates.push(CandidateDevice::new(name.trim(), *address));
        }
    }

    candidates
}
