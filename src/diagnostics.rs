//! One-shot diagnostic commands (`--list-ports`, `--scan`)

use colored::*;

use crate::bluetooth::{CandidateDevice, ControlPlane, DeviceDiscovery};
use crate::config::BluetoothConfig;
use crate::midi::{MidiBackend, PortRole};

/// Print every MIDI input and output port
pub fn list_ports_formatted(backend: &dyn MidiBackend) {
    println!("\n{}", "=== Available MIDI Ports ===".bold().cyan());

    for (role, title) in [(PortRole::Input, "Input Ports:"), (PortRole::Output, "Output Ports:")] {
        println!("\n{}", title.bold());
        match backend.ports(role) {
            Ok(ports) if ports.is_empty() => {
                println!("  {}", format!("No {} ports found", role).dimmed())
            }
            Ok(ports) => {
                for (index, name) in ports.iter().enumerate() {
                    println!("  {} {}", format!("[{}]", index).yellow(), name);
                }
            }
            Err(e) => println!("  {} {}", "[ERROR]".red(), e),
        }
    }

    println!();
}

/// Run one discovery pass and print the candidates
pub async fn scan_formatted(agent: &dyn ControlPlane, config: &BluetoothConfig) -> Vec<CandidateDevice> {
    println!(
        "\n{} ({}s)",
        "=== Bluetooth MIDI Discovery ===".bold().cyan(),
        config.discovery_scan_secs
    );

    let candidates = DeviceDiscovery::new(agent, config)
        .discover(true, config.discovery_scan())
        .await;

    if candidates.is_empty() {
        println!("  {}", "No candidate devices".dimmed());
    }
    for device in &candidates {
        println!("  {} {}", device.address.to_string().green(), device.label().bright_white());
    }

    println!();
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedAgent;

    #[tokio::test]
    async fn test_scan_forces_discovery_on() {
        let agent = ScriptedAgent::default();
        agent.advertise(&["[NEW] Device AA:BB:CC:DD:EE:FF Pads"]);
        let config = BluetoothConfig {
            enabled: false,
            ..BluetoothConfig::default()
        };

        let found = scan_formatted(&agent, &config).await;

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].label(), "Pads");
        assert_eq!(agent.scan_count(), 1);
    }
}
