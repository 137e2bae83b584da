//! External control-plane client
//!
//! Every call launches one `bluetoothctl` process, feeds it commands on
//! stdin and collects what it prints. No process outlives the call that
//! spawned it. A timeout never surfaces as an error: callers get whatever
//! output was collected (possibly nothing) and decide at a higher level
//! whether to retry.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, timeout, Instant};
use tracing::{debug, trace, warn};

use super::address::DeviceAddress;
use super::events::{parse_line, AgentEvent};

/// Grace period for the agent to exit after `exit` before it is killed
const EXIT_GRACE: Duration = Duration::from_secs(2);

/// Time allowed for output readers to drain after the process ended
const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Devices seen advertising during a live scan, in first-seen order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdvertisingScan {
    entries: Vec<(DeviceAddress, String)>,
}

impl AdvertisingScan {
    /// Fold one agent event into the running map.
    ///
    /// A named sighting sets the name; a sighting without a name, an RSSI
    /// update or a property change only registers the address and keeps any
    /// name seen earlier.
    pub fn apply(&mut self, event: &AgentEvent) {
        let (address, name) = match event {
            AgentEvent::DeviceSeen { address, name } => (*address, name.as_deref()),
            AgentEvent::RssiUpdate { address }
            | AgentEvent::PropertyChanged { address, .. } => (*address, None),
            AgentEvent::DeviceLost { .. } | AgentEvent::CommandAck(_) => return,
        };
        let name = name.map(str::trim).filter(|n| !n.is_empty());

        match self.entries.iter_mut().find(|(a, _)| *a == address) {
            Some((_, known)) => {
                if let Some(name) = name {
                    *known = name.to_string();
                }
            }
            None => self
                .entries
                .push((address, name.unwrap_or_default().to_string())),
        }
    }

    pub fn name(&self, address: &DeviceAddress) -> Option<&str> {
        self.entries
            .iter()
            .find(|(a, _)| a == address)
            .map(|(_, n)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DeviceAddress, &str)> {
        self.entries.iter().map(|(a, n)| (a, n.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<AgentEvent> for AdvertisingScan {
    fn from_iter<I: IntoIterator<Item = AgentEvent>>(iter: I) -> Self {
        let mut scan = Self::default();
        for event in iter {
            scan.apply(&event);
        }
        scan
    }
}

/// Line-oriented Bluetooth management agent
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Run a batch of commands in one agent session and return the combined
    /// output collected before the agent exited or `limit` elapsed.
    async fn run(&self, commands: &[String], limit: Duration) -> String;

    /// Keep one session scanning for `window` and report every advertising
    /// device.
    async fn scan_advertising(&self, window: Duration) -> AdvertisingScan;

    /// Scan briefly so the agent caches device objects for pairing
    async fn scan_pulse(&self, window: Duration) {
        let seen = self.scan_advertising(window).await;
        debug!("Scan pulse saw {} device(s)", seen.len());
    }
}

/// `bluetoothctl` driven through its interactive stdin
pub struct Bluetoothctl {
    program: String,
    command_delay: Duration,
}

impl Bluetoothctl {
    /// # Arguments
    /// * `program` - agent executable (usually `bluetoothctl`)
    /// * `command_delay` - pause after each command so the agent settles
    pub fn new(program: impl Into<String>, command_delay: Duration) -> Self {
        Self {
            program: program.into(),
            command_delay,
        }
    }

    fn spawn(&self, capture_stderr: bool) -> std::io::Result<Child> {
        Command::new(&self.program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(if capture_stderr { Stdio::piped() } else { Stdio::null() })
            .kill_on_drop(true)
            .spawn()
    }

    async fn send(stdin: &mut ChildStdin, command: &str) -> std::io::Result<()> {
        trace!("agent <- {}", command);
        stdin.write_all(command.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await
    }
}

/// Append every line of `stream` to `sink` until it closes
fn collect_lines<R>(stream: R, sink: Arc<Mutex<String>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let mut buffer = sink.lock();
            buffer.push_str(&line);
            buffer.push('\n');
        }
    })
}

#[async_trait]
impl ControlPlane for Bluetoothctl {
    async fn run(&self, commands: &[String], limit: Duration) -> String {
        let mut child = match self.spawn(true) {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to start {}: {}", self.program, e);
                return String::new();
            }
        };

        let collected = Arc::new(Mutex::new(String::new()));
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(collect_lines(stdout, collected.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(collect_lines(stderr, collected.clone()));
        }
        let stdin = child.stdin.take();

        let session = async {
            if let Some(mut stdin) = stdin {
                for command in commands {
                    Self::send(&mut stdin, command).await?;
                    sleep(self.command_delay).await;
                }
                // EOF on stdin makes the agent quit once it is idle
            }
            child.wait().await
        };
        let result = timeout(limit, session).await;

        match result {
            Ok(Ok(status)) => debug!("{} {:?} exited with {}", self.program, commands, status),
            Ok(Err(e)) => warn!("{} session {:?} failed: {}", self.program, commands, e),
            Err(_) => {
                warn!("{} {:?} timed out after {:?}, killing", self.program, commands, limit);
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill {}: {}", self.program, e);
                }
            }
        }

        for reader in readers {
            let _ = timeout(DRAIN_GRACE, reader).await;
        }

        let output = collected.lock().clone();
        trace!("agent -> {:?}", output);
        output
    }

    async fn scan_advertising(&self, window: Duration) -> AdvertisingScan {
        let mut scan = AdvertisingScan::default();

        let mut child = match self.spawn(false) {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to start {} for scanning: {}", self.program, e);
                return scan;
            }
        };
        let (Some(mut stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            warn!("{} started without pipes", self.program);
            return scan;
        };

        if let Err(e) = Self::send(&mut stdin, "scan on").await {
            warn!("Failed to start scan: {}", e);
            return scan;
        }

        let deadline = Instant::now() + window;
        let mut lines = BufReader::new(stdout).lines();
        loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if let Some(event) = parse_line(&line) {
                            trace!("scan event: {:?}", event);
                            scan.apply(&event);
                        }
                    }
                    Ok(None) => {
                        debug!("{} closed its output during scan", self.program);
                        break;
                    }
                    Err(e) => {
                        warn!("Scan read failed: {}", e);
                        break;
                    }
                },
                _ = sleep_until(deadline) => break,
            }
        }

        // The agent may already be gone; stopping is best effort
        let _ = Self::send(&mut stdin, "scan off").await;
        let _ = Self::send(&mut stdin, "exit").await;
        drop(stdin);

        let exited = timeout(EXIT_GRACE, child.wait()).await;
        if exited.is_err() {
            debug!("{} ignored exit, killing", self.program);
            let _ = child.kill().await;
        }

        debug!("Live scan over {:?} saw {} device(s)", window, scan.len());
        scan
    }
}
