//! Streaming accumulator.
//!
//! Consumes the fragment stream from a backend, keeps the running answer and
//! its marker-free display form, and keeps the status line in sync with it.

use crate::backend::Fragment;
use crate::commands::{COMMAND_CLOSE, COMMAND_OPEN};
use crate::error::Error;
use crate::spinner::StatusIndicator;
use futures::{Stream, StreamExt};
use std::time::Duration;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, warn};

/// Remove every command marker from `text`.
pub fn strip_markers(text: &str) -> String {
    text.replace(COMMAND_OPEN, "").replace(COMMAND_CLOSE, "")
}

/// The answer received so far and the text shown for it.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AnswerBuffer {
    answer: String,
    display: String,
}

impl AnswerBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment and recompute the display text.
    pub fn push(&mut self, fragment: &str) {
        self.answer.push_str(fragment);
        self.display = strip_markers(&self.answer);
    }

    /// Raw answer, markers included.
    pub fn answer(&self) -> &str {
        &self.answer
    }

    /// Answer with markers removed.
    pub fn display(&self) -> &str {
        &self.display
    }
}

/// How consumption of the fragment stream ended.
#[derive(Debug)]
pub enum StreamEnd {
    /// The stream ran out normally.
    Complete,
    /// A fragment carried an error; nothing after it was read.
    Errored(Error),
    /// The deadline passed first.
    TimedOut,
}

/// Result of [`accumulate`]: what was received and why it stopped.
#[derive(Debug)]
pub struct Accumulated {
    pub buffer: AnswerBuffer,
    pub end: StreamEnd,
}

/// Interval that drives the status indicator. Late ticks are skipped.
pub fn status_ticker(tick: Duration) -> Interval {
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

/// Drain `fragments` into an [`AnswerBuffer`] until the stream ends, a
/// fragment fails, or `deadline` passes.
///
/// The indicator is advanced on every `ticker` tick on this same task and is
/// updated with the display text after each fragment. It is left running;
/// stopping it is up to the caller.
pub async fn accumulate<S>(
    fragments: S,
    indicator: &mut dyn StatusIndicator,
    deadline: Instant,
    ticker: &mut Interval,
) -> Accumulated
where
    S: Stream<Item = Fragment>,
{
    let mut fragments = std::pin::pin!(fragments);
    let expired = tokio::time::sleep_until(deadline);
    tokio::pin!(expired);

    let mut buffer = AnswerBuffer::new();
    let mut count = 0usize;

    let end = loop {
        tokio::select! {
            biased;
            _ = &mut expired => {
                warn!("Deadline reached after {} fragments", count);
                break StreamEnd::TimedOut;
            }
            next = fragments.next() => match next {
                Some(Ok(text)) => {
                    count += 1;
                    buffer.push(&text);
                    indicator.set_message(buffer.display());
                }
                Some(Err(e)) => {
                    debug!("Fragment {} carried an error: {}", count + 1, e);
                    break StreamEnd::Errored(e);
                }
                None => {
                    debug!("Stream complete after {} fragments", count);
                    break StreamEnd::Complete;
                }
            },
            _ = ticker.tick() => indicator.tick(),
        }
    };

    Accumulated { buffer, end }
}
