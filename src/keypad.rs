//! Button input
//!
//! The panel has four buttons. On a terminal they are typed at a prompt;
//! the prompt runs on its own thread and hands commands to the menu task one
//! at a time over a channel.

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::fmt;
use std::str::FromStr;
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A physical button press
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ButtonEvent {
    CursorUp,
    CursorDown,
    /// Enter the selected screen or commit the selection
    Activate,
    /// Rebuild the sound engine and return to the main screen
    Reset,
}

impl fmt::Display for ButtonEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ButtonEvent::CursorUp => write!(f, "up"),
            ButtonEvent::CursorDown => write!(f, "down"),
            ButtonEvent::Activate => write!(f, "ok"),
            ButtonEvent::Reset => write!(f, "reset"),
        }
    }
}

/// One line typed at the keypad prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeypadCommand {
    Press(ButtonEvent),
    Quit,
}

impl FromStr for KeypadCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let command = match s.trim().to_lowercase().as_str() {
            "w" | "k" | "up" => KeypadCommand::Press(ButtonEvent::CursorUp),
            "s" | "j" | "down" => KeypadCommand::Press(ButtonEvent::CursorDown),
            "" | "ok" | "enter" => KeypadCommand::Press(ButtonEvent::Activate),
            "r" | "reset" => KeypadCommand::Press(ButtonEvent::Reset),
            "q" | "quit" | "exit" => KeypadCommand::Quit,
            other => return Err(format!("unknown key '{}'", other)),
        };
        Ok(command)
    }
}

/// Help line printed for unknown input
pub const KEYPAD_HELP: &str = "w/up, s/down, <enter>/ok, r/reset, q/quit";

/// Run the keypad prompt on a dedicated thread.
///
/// Sends [`KeypadCommand::Quit`] when the user quits or the terminal closes;
/// the thread ends once the receiver is gone.
pub fn spawn_keypad(tx: mpsc::Sender<KeypadCommand>) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("keypad".to_string())
        .spawn(move || {
            let mut rl = match DefaultEditor::new() {
                Ok(rl) => rl,
                Err(e) => {
                    warn!("Keypad unavailable: {}", e);
                    let _ = tx.blocking_send(KeypadCommand::Quit);
                    return;
                }
            };

            loop {
                let command = match rl.readline("panel> ") {
                    Ok(line) => match line.parse::<KeypadCommand>() {
                        Ok(command) => command,
                        Err(e) => {
                            println!("{} ({})", e, KEYPAD_HELP);
                            continue;
                        }
                    },
                    Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => KeypadCommand::Quit,
                    Err(e) => {
                        warn!("Keypad read failed: {}", e);
                        KeypadCommand::Quit
                    }
                };

                debug!("Keypad: {:?}", command);
                if tx.blocking_send(command).is_err() || command == KeypadCommand::Quit {
                    break;
                }
            }
        })
}
