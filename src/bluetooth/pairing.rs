//! Pairing/connection sequencer
//!
//! Drives the agent through a fixed protocol for one chosen candidate:
//! prepare the adapter, drop any stale record, scan so the device object is
//! cached, pair (with one bounded retry when the device is not reachable),
//! then trust and connect. A fresh connect and an idempotent reconnect of an
//! already trusted device are both success.

use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use super::address::DeviceAddress;
use super::agent::ControlPlane;
use super::events::{reports_connection_success, reports_not_available};
use crate::config::BluetoothConfig;

/// Upper bound on `pair` attempts for one commit
pub const MAX_PAIR_ATTEMPTS: u32 = 2;

/// Adapter preparation issued before every sequence
const PREPARE_COMMANDS: [&str; 4] = ["power on", "pairable on", "agent on", "default-agent"];

/// Why a connection sequence failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectFailure {
    /// The device stayed unreachable through every pair attempt and connect
    NotReachable,
    /// The final connect produced no success marker
    NoConnectAck,
    /// The overall budget ran out before the sequence finished
    DeadlineExceeded,
}

impl fmt::Display for ConnectFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectFailure::NotReachable => write!(f, "device not reachable"),
            ConnectFailure::NoConnectAck => write!(f, "no connection acknowledgement"),
            ConnectFailure::DeadlineExceeded => write!(f, "deadline exceeded"),
        }
    }
}

/// Terminal failure of a pairing/connection sequence, with the raw agent
/// output of the last step for diagnostics
#[derive(Debug, Clone, Error)]
#[error("connecting {address} failed: {reason}")]
pub struct ConnectError {
    pub address: DeviceAddress,
    pub reason: ConnectFailure,
    pub last_output: String,
}

/// State of one commit attempt; dropped once the sequence ends
#[derive(Debug)]
struct PairingSession {
    address: DeviceAddress,
    pair_attempts: u32,
    last_output: String,
    deadline: Instant,
}

impl PairingSession {
    fn new(address: DeviceAddress, budget: Duration) -> Self {
        Self {
            address,
            pair_attempts: 0,
            last_output: String::new(),
            deadline: Instant::now() + budget,
        }
    }

    /// Budget for the next step, capped by what is left of the deadline
    fn budget(&self, step: Duration) -> Result<Duration, ConnectError> {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(self.fail(ConnectFailure::DeadlineExceeded));
        }
        Ok(step.min(remaining))
    }

    fn fail(&self, reason: ConnectFailure) -> ConnectError {
        ConnectError {
            address: self.address,
            reason,
            last_output: self.last_output.clone(),
        }
    }
}

/// Runs the pairing protocol against a control plane
pub struct PairingSequencer<'a> {
    agent: &'a dyn ControlPlane,
    config: &'a BluetoothConfig,
}

impl<'a> PairingSequencer<'a> {
    pub fn new(agent: &'a dyn ControlPlane, config: &'a BluetoothConfig) -> Self {
        Self { agent, config }
    }

    /// Pair, trust and connect `address`.
    ///
    /// Makes at most [`MAX_PAIR_ATTEMPTS`] `pair` attempts with a single
    /// scan-pulse retry in between. Every step is bounded by the command
    /// timeout and by the overall connect deadline.
    pub async fn connect(&self, address: DeviceAddress) -> Result<(), ConnectError> {
        let mut session = PairingSession::new(address, self.config.connect_deadline());
        info!("Connecting to {}", address);

        let prepare: Vec<String> = PREPARE_COMMANDS.iter().map(|c| c.to_string()).collect();
        self.step(&mut session, &prepare).await?;

        // Absence of a prior record is not an error
        self.step(&mut session, &[format!("remove {}", address)]).await?;

        self.pulse(&session).await?;
        let mut paired_output = self.pair(&mut session).await?;

        if reports_not_available(&paired_output) && session.pair_attempts < MAX_PAIR_ATTEMPTS {
            debug!("{} not available, rescanning once", address);
            sleep(session.budget(self.config.pair_retry_delay())?).await;
            self.pulse(&session).await?;
            paired_output = self.pair(&mut session).await?;
        }
        let unreachable = reports_not_available(&paired_output);

        self.step(&mut session, &[format!("trust {}", address)]).await?;
        let output = self.step(&mut session, &[format!("connect {}", address)]).await?;

        if reports_connection_success(&output) {
            info!(
                "Connected to {} after {} pair attempt(s)",
                address, session.pair_attempts
            );
            return Ok(());
        }

        let reason = if unreachable || reports_not_available(&output) {
            ConnectFailure::NotReachable
        } else {
            ConnectFailure::NoConnectAck
        };
        warn!("Connect to {} failed: {}", address, reason);
        Err(session.fail(reason))
    }

    async fn step(
        &self,
        session: &mut PairingSession,
        commands: &[String],
    ) -> Result<String, ConnectError> {
        let limit = session.budget(self.config.command_timeout())?;
        let output = self.agent.run(commands, limit).await;
        session.last_output = output.clone();
        Ok(output)
    }

    async fn pair(&self, session: &mut PairingSession) -> Result<String, ConnectError> {
        session.pair_attempts += 1;
        let address = session.address;
        self.step(session, &[format!("pair {}", address)]).await
    }

    async fn pulse(&self, session: &PairingSession) -> Result<(), ConnectError> {
        let window = session.budget(self.config.scan_pulse())?;
        self.agent.scan_pulse(window).await;
        Ok(())
    }
}
