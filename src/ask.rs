//! The ask pipeline.
//!
//! One invocation moves through
//! `Idle -> Streaming -> {Complete, TimedOut, Errored}` and, only from
//! `Complete`, on to `Extracting -> Done`. Whatever was received is printed
//! in every case; commands are only extracted from a complete answer.

use crate::backend::Backend;
use crate::clipboard::ClipboardSink;
use crate::commands::{extract_commands, join_commands};
use crate::config::AskSettings;
use crate::error::{Error, Result};
use crate::request::Part;
use crate::spinner::{StatusIndicator, TICK};
use crate::stream::{accumulate, status_ticker, Accumulated, AnswerBuffer, StreamEnd};
use std::io::Write;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Streaming,
    Complete,
    TimedOut,
    Errored,
    Extracting,
    Done,
}

impl Phase {
    /// Whether `self -> next` is a legal transition.
    pub fn can_advance(self, next: Phase) -> bool {
        matches!(
            (self, next),
            (Phase::Idle, Phase::Streaming)
                | (Phase::Streaming, Phase::Complete)
                | (Phase::Streaming, Phase::TimedOut)
                | (Phase::Streaming, Phase::Errored)
                | (Phase::Complete, Phase::Extracting)
                | (Phase::Extracting, Phase::Done)
        )
    }

    fn advance(&mut self, next: Phase) {
        debug_assert!(self.can_advance(next), "illegal transition {:?} -> {:?}", self, next);
        debug!("ask: {:?} -> {:?}", self, next);
        *self = next;
    }
}

/// What happened to the extracted commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyStatus {
    /// The answer contained no commands; the clipboard was not touched.
    NoCommands,
    Copied,
    /// Copying failed; the message was shown to the user.
    Failed(String),
}

/// Result of a complete ask.
#[derive(Debug)]
pub struct AskOutcome {
    /// Raw answer, markers included.
    pub answer: String,
    pub commands: Vec<String>,
    pub copy: CopyStatus,
}

/// Ask `backend` and print the streamed answer to `out`.
///
/// The indicator ticks from the moment the request is sent, including the
/// wait for the response to open.
///
/// Returns an error when the stream fails or the deadline in `settings`
/// passes. Consumption stops at the failing fragment: the indicator is
/// cleared, the partial answer is written to `out`, and the error is returned
/// with nothing else read or printed in between. Clipboard failures are
/// reported on `out` and do not fail the ask.
pub async fn ask(
    backend: &dyn Backend,
    settings: &AskSettings,
    parts: &[Part],
    indicator: &mut dyn StatusIndicator,
    clipboard: &mut dyn ClipboardSink,
    out: &mut dyn Write,
) -> Result<AskOutcome> {
    let mut phase = Phase::Idle;
    let deadline = Instant::now() + settings.timeout;
    debug!("Asking {} ({})", backend.name(), backend.model());

    phase.advance(Phase::Streaming);
    let mut ticker = status_ticker(TICK);
    let open = tokio::time::timeout_at(
        deadline,
        backend.stream(&settings.system_instruction, parts),
    );
    tokio::pin!(open);
    let opened = loop {
        tokio::select! {
            biased;
            opened = &mut open => break opened,
            _ = ticker.tick() => indicator.tick(),
        }
    };
    let fragments = match opened {
        Ok(Ok(fragments)) => fragments,
        Ok(Err(e)) => {
            indicator.stop();
            phase.advance(Phase::Errored);
            return Err(e);
        }
        Err(_) => {
            indicator.stop();
            phase.advance(Phase::TimedOut);
            return Err(Error::Timeout(settings.timeout));
        }
    };

    let Accumulated { buffer, end } = accumulate(fragments, indicator, deadline, &mut ticker).await;
    indicator.stop();

    match end {
        StreamEnd::Complete => phase.advance(Phase::Complete),
        StreamEnd::Errored(e) => {
            phase.advance(Phase::Errored);
            print_partial(out, &buffer)?;
            return Err(e);
        }
        StreamEnd::TimedOut => {
            phase.advance(Phase::TimedOut);
            print_partial(out, &buffer)?;
            return Err(Error::Timeout(settings.timeout));
        }
    }

    writeln!(out, "{}", buffer.display()).map_err(Error::Output)?;

    phase.advance(Phase::Extracting);
    let commands = extract_commands(buffer.answer());
    let copy = copy_commands(&commands, clipboard, out)?;
    phase.advance(Phase::Done);

    Ok(AskOutcome {
        answer: buffer.answer().to_string(),
        commands,
        copy,
    })
}

fn print_partial(out: &mut dyn Write, buffer: &AnswerBuffer) -> Result<()> {
    if !buffer.display().is_empty() {
        writeln!(out, "{}", buffer.display()).map_err(Error::Output)?;
    }
    Ok(())
}

fn copy_commands(
    commands: &[String],
    clipboard: &mut dyn ClipboardSink,
    out: &mut dyn Write,
) -> Result<CopyStatus> {
    if commands.is_empty() {
        return Ok(CopyStatus::NoCommands);
    }

    debug!("Extracted {} command(s)", commands.len());
    let status = match clipboard.copy(&join_commands(commands)) {
        Ok(()) => {
            writeln!(out, "\nExtracted commands copied to clipboard!").map_err(Error::Output)?;
            CopyStatus::Copied
        }
        Err(e) => {
            warn!("Clipboard copy failed: {}", e);
            writeln!(out, "Error copying to clipboard: {}", e).map_err(Error::Output)?;
            CopyStatus::Failed(e.to_string())
        }
    };
    Ok(status)
}
