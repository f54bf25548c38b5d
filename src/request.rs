//! Request content assembly.
//!
//! Turns the CLI inputs (an optional attached file and an optional question)
//! into the ordered list of [`Part`]s sent to the generation API.

use crate::error::{Error, Result};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One unit of user content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    Text(String),
    /// Raw bytes the model reads natively (images, audio, video, PDF).
    Blob { mime_type: String, data: Vec<u8> },
}

/// MIME types the API accepts as inline binary data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaTypes {
    blob: BTreeSet<String>,
}

impl Default for MediaTypes {
    fn default() -> Self {
        Self::new([
            "application/pdf",
            "audio/mpeg",
            "audio/mp3",
            "audio/wav",
            "image/png",
            "image/jpeg",
            "image/webp",
            "video/mov",
            "video/mpeg",
            "video/mp4",
            "video/mpg",
            "video/avi",
            "video/wmv",
            "video/mpegps",
            "video/flv",
        ])
    }
}

impl MediaTypes {
    pub fn new<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            blob: types.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether content of this type is sent as a binary blob.
    pub fn is_blob(&self, mime_type: &str) -> bool {
        self.blob.contains(mime_type)
    }
}

/// Guess a MIME type from the file extension. Unknown extensions are text.
pub fn mime_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "pdf" => "application/pdf",
        "json" => "application/json",
        "xml" => "application/xml",
        "js" | "mjs" => "text/javascript",
        "wasm" => "application/wasm",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "flac" => "audio/flac",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "avif" => "image/avif",
        "mov" => "video/mov",
        "mpeg" => "video/mpeg",
        "mpg" => "video/mpg",
        "mp4" => "video/mp4",
        "avi" => "video/avi",
        "wmv" => "video/wmv",
        "flv" => "video/flv",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "md" => "text/markdown",
        _ => "text/plain",
    }
}

/// A file the user attached with `--file`.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub path: PathBuf,
    pub mime_type: &'static str,
    pub data: Vec<u8>,
}

impl Attachment {
    /// Read the file and classify it.
    pub fn read(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data = std::fs::read(&path).map_err(|source| Error::Attachment {
            path: path.clone(),
            source,
        })?;
        let mime_type = mime_type_for(&path);
        debug!(
            "Read {} bytes from {} ({})",
            data.len(),
            path.display(),
            mime_type
        );

        Ok(Self {
            path,
            mime_type,
            data,
        })
    }

    /// File name without directories, as shown to the model.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    /// Convert into a request part: a blob for allow-listed media, otherwise
    /// a `file - [name], [content]` text block.
    pub fn into_part(self, media_types: &MediaTypes) -> Part {
        if media_types.is_blob(self.mime_type) {
            return Part::Blob {
                mime_type: self.mime_type.to_string(),
                data: self.data,
            };
        }

        let name = self.file_name();
        let content = String::from_utf8_lossy(&self.data);
        Part::Text(format!("file - [{}], [{}]", name, content))
    }
}

/// Assemble the request parts. The file comes first, then the question.
/// Blank questions are dropped.
pub fn build_parts(
    attachment: Option<Attachment>,
    question: Option<String>,
    media_types: &MediaTypes,
) -> Vec<Part> {
    let mut parts = Vec::with_capacity(2);
    if let Some(attachment) = attachment {
        parts.push(attachment.into_part(media_types));
    }
    if let Some(question) = question.filter(|q| !q.trim().is_empty()) {
        parts.push(Part::Text(question));
    }
    parts
}
