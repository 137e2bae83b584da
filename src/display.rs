//! Front-panel display
//!
//! The menu calls [`Display::render`] after every transition and
//! [`Display::busy`] before a blocking operation. Only a window of rows is
//! visible; it starts scrolling once the selection moves past the last row.

use colored::*;
use std::io::Write;
use std::ops::Range;

use crate::menu::Screen;

/// Banner shown while discovery, pairing or playback blocks the menu
pub const BUSY_BANNER: &str = "Please Wait";

pub trait Display {
    fn render(&mut self, screen: Screen, labels: &[String], index: usize);
    fn busy(&mut self, message: &str);
}

/// Indices of the rows visible for a selection `index` in a list of `len`
/// labels with `rows` visible rows
pub fn visible_window(len: usize, index: usize, rows: usize) -> Range<usize> {
    let rows = rows.max(1);
    let start = index.saturating_sub(rows - 1).min(len);
    start..(start + rows).min(len)
}

/// Terminal rendition of the panel
pub struct ConsoleDisplay {
    rows: usize,
}

impl ConsoleDisplay {
    pub fn new(rows: usize) -> Self {
        Self { rows }
    }

    fn frame(&self, screen: Screen, labels: &[String], index: usize) -> String {
        let mut frame = format!("{}\n", screen.title().bold().cyan());
        if labels.is_empty() {
            frame.push_str(&format!("  {}\n", "(empty)".dimmed()));
        }
        for i in visible_window(labels.len(), index, self.rows) {
            let line = format!(" {:<28}", labels[i]);
            if i == index {
                frame.push_str(&format!("{}\n", line.black().on_white()));
            } else {
                frame.push_str(&format!("{}\n", line.white()));
            }
        }
        frame
    }

    fn show(&self, text: &str) {
        let mut stdout = std::io::stdout().lock();
        // Clear screen and home the cursor
        let _ = write!(stdout, "\x1B[2J\x1B[H{}", text);
        let _ = stdout.flush();
    }
}

impl Display for ConsoleDisplay {
    fn render(&mut self, screen: Screen, labels: &[String], index: usize) {
        let frame = self.frame(screen, labels, index);
        self.show(&frame);
    }

    fn busy(&mut self, message: &str) {
        self.show(&format!("\n {}\n", message.red().bold().on_bright_white()));
    }
}
