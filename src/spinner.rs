//! Single-line status indicator.
//!
//! Draws a spinner frame followed by the latest message on the current
//! terminal line. It never owns a thread or timer: the caller advances it.

use crossterm::{
    cursor::MoveToColumn,
    queue,
    style::Print,
    terminal::{self, Clear, ClearType},
};
use std::io::{self, Write};
use std::time::Duration;

/// Frame interval for the spinner animation.
pub const TICK: Duration = Duration::from_millis(100);

const FRAMES: &[char] = &['⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏'];

/// Something that shows progress while an answer streams in.
pub trait StatusIndicator {
    /// Replace the text shown next to the spinner.
    fn set_message(&mut self, message: &str);
    /// Advance the animation by one frame.
    fn tick(&mut self);
    /// Clear the status line. Further calls are ignored.
    fn stop(&mut self);
}

pub struct Spinner<W: Write> {
    out: W,
    enabled: bool,
    stopped: bool,
    frame: usize,
    message: String,
}

impl Spinner<io::Stderr> {
    /// Spinner on stderr, drawn only when stderr is a terminal.
    pub fn stderr() -> Self {
        Self::new(io::stderr(), atty::is(atty::Stream::Stderr))
    }
}

impl<W: Write> Spinner<W> {
    pub fn new(out: W, enabled: bool) -> Self {
        Self {
            out,
            enabled,
            stopped: false,
            frame: 0,
            message: String::new(),
        }
    }

    fn render(&mut self) {
        if !self.enabled || self.stopped {
            return;
        }
        let width = terminal::size().map(|(w, _)| w as usize).unwrap_or(80);
        let line = status_line(FRAMES[self.frame], &self.message, width);
        // Drawing failures only affect the animation.
        let _ = queue!(
            self.out,
            MoveToColumn(0),
            Clear(ClearType::CurrentLine),
            Print(line)
        )
        .and_then(|_| self.out.flush());
    }
}

impl<W: Write> StatusIndicator for Spinner<W> {
    fn set_message(&mut self, message: &str) {
        self.message.clear();
        self.message.push_str(message);
        self.render();
    }

    fn tick(&mut self) {
        self.frame = (self.frame + 1) % FRAMES.len();
        self.render();
    }

    fn stop(&mut self) {
        if self.stopped {
            return;
        }
        if self.enabled {
            let _ = queue!(self.out, MoveToColumn(0), Clear(ClearType::CurrentLine))
                .and_then(|_| self.out.flush());
        }
        self.stopped = true;
    }
}

/// Fit `frame message` on one line of `width` columns. Line breaks become
/// spaces and, when the text is too long, its tail is kept.
fn status_line(frame: char, message: &str, width: usize) -> String {
    let flat: String = message
        .chars()
        .map(|c| if c == '\n' || c == '\r' || c == '\t' { ' ' } else { c })
        .collect();
    let room = width.saturating_sub(3);
    let count = flat.chars().count();
    let tail: String = flat.chars().skip(count.saturating_sub(room)).collect();
    format!("{} {}", frame, tail)
}
