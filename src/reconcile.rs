//! Port reconciliation
//!
//! A Bluetooth MIDI peripheral's port is created by the OS MIDI layer some
//! time after the radio-level connect returns. [`await_port`] polls the live
//! enumeration until the port shows up, and [`resolve_port`] maps a name
//! back to an index in the current enumeration before opening.

use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::midi::{find_port_by_substring, MidiBackend, PortRole};

/// No port matching the fragment appeared before the deadline
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no {role} port matching '{fragment}' after {waited:?}")]
pub struct PortTimeout {
    pub role: PortRole,
    pub fragment: String,
    pub waited: Duration,
}

/// Outcome of mapping a port name onto the live enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortResolution {
    Resolved { index: usize, name: String },
    /// Nothing matched; no port may be opened for this selection
    Unresolved,
}

/// Poll the `role` enumeration every `poll` until a port whose name contains
/// `fragment` (case-insensitive) appears, or `timeout` elapses.
///
/// An empty fragment never matches: it fails immediately.
pub async fn await_port(
    backend: &dyn MidiBackend,
    role: PortRole,
    fragment: &str,
    timeout: Duration,
    poll: Duration,
) -> Result<String, PortTimeout> {
    let started = Instant::now();
    let deadline = started + timeout;
    let fail = || PortTimeout {
        role,
        fragment: fragment.to_string(),
        waited: started.elapsed(),
    };

    if fragment.trim().is_empty() {
        warn!("No name to wait for on {} ports", role);
        return Err(fail());
    }

    info!("Waiting for {} port '{}'", role, fragment);
    loop {
        match backend.ports(role) {
            Ok(ports) => {
                if let Some(index) = find_port_by_substring(&ports, fragment) {
                    let name = ports[index].clone();
                    info!("{} port '{}' appeared after {:?}", role, name, started.elapsed());
                    return Ok(name);
                }
            }
            Err(e) => warn!("Enumerating {} ports failed: {}", role, e),
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(fail());
        }
        sleep(poll.min(deadline - now)).await;
    }
}

/// How a name is matched against the live enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortMatch {
    /// The name was taken from an enumeration and must match verbatim
    Exact,
    /// Case-insensitive containment, for names derived from a device
    Substring,
}

/// Locate `name` in the live `role` enumeration
pub fn resolve_port(
    backend: &dyn MidiBackend,
    role: PortRole,
    name: &str,
    matching: PortMatch,
) -> PortResolution {
    if name.trim().is_empty() {
        return PortResolution::Unresolved;
    }
    let ports = match backend.ports(role) {
        Ok(ports) => ports,
        Err(e) => {
            warn!("Enumerating {} ports failed: {}", role, e);
            return PortResolution::Unresolved;
        }
    };

    let found = match matching {
        PortMatch::Exact => ports.iter().position(|p| p == name),
        PortMatch::Substring => find_port_by_substring(&ports, name),
    };
    match found {
        Some(index) => {
            debug!("'{}' resolved to {} port {}", name, role, index);
            PortResolution::Resolved {
                index,
                name: ports[index].clone(),
            }
        }
        None => PortResolution::Unresolved,
    }
}
