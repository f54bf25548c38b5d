//! Generation backends.
//!
//! A backend takes the system instruction and the user's parts and answers
//! with a lazy stream of text fragments. Fragments are produced by a task
//! reading the HTTP body and handed over through a bounded channel, so the
//! consumer sees them strictly in generation order.

pub mod gemini;
pub mod sse;

pub use gemini::GeminiBackend;

use crate::error::Result;
use crate::request::Part;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::mpsc;

/// One streamed text delta, or the error that ended the stream.
pub type Fragment = Result<String>;

pub type FragmentStream = BoxStream<'static, Fragment>;

/// Number of fragments buffered between the reader task and the consumer.
pub const FRAGMENT_BUFFER: usize = 32;

#[async_trait]
pub trait Backend: Send + Sync {
    /// Backend name, for logs.
    fn name(&self) -> &'static str;

    fn model(&self) -> &str;

    /// Start a generation and return its fragments.
    async fn stream(&self, system_instruction: &str, parts: &[Part]) -> Result<FragmentStream>;
}

/// Adapt the receiving half of a fragment channel into a stream that ends
/// when every sender is gone.
pub fn receiver_stream(rx: mpsc::Receiver<Fragment>) -> FragmentStream {
    stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|fragment| (fragment, rx))
    })
    .boxed()
}
