//! System clipboard access.

use crate::error::{Error, Result};
use tracing::debug;

/// Destination for extracted commands.
pub trait ClipboardSink {
    fn copy(&mut self, text: &str) -> Result<()>;
}

/// The OS clipboard. The handle is opened on first use so a machine without
/// a clipboard only fails when there is something to copy.
#[derive(Default)]
pub struct SystemClipboard {
    clipboard: Option<arboard::Clipboard>,
}

impl std::fmt::Debug for SystemClipboard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemClipboard")
            .field("open", &self.clipboard.is_some())
            .finish()
    }
}

impl SystemClipboard {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ClipboardSink for SystemClipboard {
    fn copy(&mut self, text: &str) -> Result<()> {
        debug!("Copying {} characters to system clipboard", text.len());

        let clipboard = match &mut self.clipboard {
            Some(clipboard) => clipboard,
            slot => slot.insert(
                arboard::Clipboard::new().map_err(|e| Error::Clipboard(e.to_string()))?,
            ),
        };

        clipboard
            .set_text(text.to_string())
            .map_err(|e| Error::Clipboard(e.to_string()))
    }
}
