//! Google Gemini backend.
//!
//! Uses the `streamGenerateContent` endpoint with `alt=sse`, which answers with
//! one `GenerateContentResponse` JSON object per server-sent event.

use super::sse::SseDecoder;
use super::{receiver_stream, Backend, Fragment, FragmentStream, FRAGMENT_BUFFER};
use crate::error::{Error, Result};
use crate::request::Part;
use async_trait::async_trait;
use base64::Engine;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com";

/// Gemini backend for the Generative Language API.
pub struct GeminiBackend {
    model: String,
    api_key: String,
    base_url: String,
    client: Client,
}

impl GeminiBackend {
    /// Create a new Gemini backend. `timeout` bounds each HTTP request.
    pub fn new(model: String, api_key: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            model,
            api_key,
            base_url: GEMINI_API_BASE.to_string(),
            client,
        })
    }

    /// Point the backend at another API host.
    #[cfg(test)]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }
}

#[async_trait]
impl Backend for GeminiBackend {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn stream(&self, system_instruction: &str, parts: &[Part]) -> Result<FragmentStream> {
        let request = GenerateContentRequest::new(system_instruction, parts);
        info!("Sending {} part(s) to {}", parts.len(), self.model);

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Backend(format!(
                "Gemini API request failed with status {}: {}",
                status,
                api_error_message(&body)
            )));
        }

        let (tx, rx) = mpsc::channel(FRAGMENT_BUFFER);
        tokio::spawn(read_events(response, tx));
        Ok(receiver_stream(rx))
    }
}

/// Decode the event stream of `response` into fragments on `tx`. Stops after
/// the first error or once the receiver is dropped.
async fn read_events(response: reqwest::Response, tx: mpsc::Sender<Fragment>) {
    let mut body = response.bytes_stream();
    let mut decoder = SseDecoder::new();

    while let Some(chunk) = body.next().await {
        let payloads = match chunk {
            Ok(bytes) => decoder.feed(&bytes),
            Err(e) => {
                let _ = tx.send(Err(e.into())).await;
                return;
            }
        };
        if !forward(&tx, payloads).await {
            return;
        }
    }
    forward(&tx, decoder.finish()).await;
    debug!("Response body finished");
}

/// Send the text of each payload. Returns false when reading should stop.
async fn forward(tx: &mpsc::Sender<Fragment>, payloads: Vec<String>) -> bool {
    for payload in payloads {
        match parse_chunk(&payload) {
            Ok(Some(text)) => {
                if tx.send(Ok(text)).await.is_err() {
                    debug!("Fragment receiver dropped, stopping");
                    return false;
                }
            }
            Ok(None) => {}
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                return false;
            }
        }
    }
    true
}

/// Extract the text delta from one response chunk. Chunks without text
/// (usage-only, finish markers) yield `None`.
fn parse_chunk(data: &str) -> Result<Option<String>> {
    let chunk: GenerateContentResponse = serde_json::from_str(data)
        .map_err(|e| Error::backend(format!("malformed response chunk: {}", e)))?;

    if let Some(error) = chunk.error {
        return Err(Error::Backend(error.message));
    }
    if let Some(reason) = chunk.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(Error::Backend(format!("prompt blocked: {}", reason)));
    }

    let text: String = chunk
        .candidates
        .first()
        .and_then(|c| c.content.as_ref())
        .map(|c| c.parts.iter().filter_map(|p| p.text.as_deref()).collect())
        .unwrap_or_default();

    Ok((!text.is_empty()).then_some(text))
}

/// Pull the human-readable message out of an error body.
fn api_error_message(body: &str) -> String {
    match serde_json::from_str::<ApiErrorEnvelope>(body) {
        Ok(envelope) => envelope.error.message,
        Err(_) if body.trim().is_empty() => "Unknown error".to_string(),
        Err(_) => body.trim().to_string(),
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    system_instruction: WireContent<'a>,
    contents: Vec<WireContent<'a>>,
}

impl<'a> GenerateContentRequest<'a> {
    fn new(system_instruction: &'a str, parts: &'a [Part]) -> Self {
        Self {
            system_instruction: WireContent {
                role: None,
                parts: vec![WirePart::Text {
                    text: system_instruction,
                }],
            },
            contents: vec![WireContent {
                role: Some("user"),
                parts: parts.iter().map(WirePart::from).collect(),
            }],
        }
    }
}

#[derive(Debug, Serialize)]
struct WireContent<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<WirePart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum WirePart<'a> {
    Text {
        text: &'a str,
    },
    #[serde(rename_all = "camelCase")]
    InlineData {
        inline_data: WireBlob<'a>,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireBlob<'a> {
    mime_type: &'a str,
    /// Base64 of the raw bytes.
    data: String,
}

impl<'a> From<&'a Part> for WirePart<'a> {
    fn from(part: &'a Part) -> Self {
        match part {
            Part::Text(text) => WirePart::Text { text },
            Part::Blob { mime_type, data } => WirePart::InlineData {
                inline_data: WireBlob {
                    mime_type,
                    data: base64::engine::general_purpose::STANDARD.encode(data),
                },
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_request_serialization() {
        let parts = vec![
            Part::Blob {
                mime_type: "image/png".to_string(),
                data: b"png".to_vec(),
            },
            Part::Text("what is this?".to_string()),
        ];
        let request = GenerateContentRequest::new("be brief", &parts);
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "systemInstruction": { "parts": [{ "text": "be brief" }] },
                "contents": [{
                    "role": "user",
                    "parts": [
                        { "inlineData": { "mimeType": "image/png", "data": "cG5n" } },
                        { "text": "what is this?" }
                    ]
                }]
            })
        );
    }

    #[test]
    fn test_parse_text_chunk() {
        let data = r#"{"candidates":[{"content":{"parts":[{"text":"Use "},{"text":"ls"}],"role":"model"}}]}"#;
        assert_eq!(parse_chunk(data).unwrap(), Some("Use ls".to_string()));
    }

    #[test]
    fn test_parse_chunk_without_text() {
        let data = r#"{"candidates":[{"finishReason":"STOP"}],"usageMetadata":{"totalTokenCount":12}}"#;
        assert_eq!(parse_chunk(data).unwrap(), None);
    }

    #[test]
    fn test_parse_blocked_prompt() {
        let data = r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#;
        let err = parse_chunk(data).unwrap_err();
        assert_eq!(err.to_string(), "prompt blocked: SAFETY");
    }

    #[test]
    fn test_parse_error_chunk() {
        let data = r#"{"error":{"code":503,"message":"The model is overloaded.","status":"UNAVAILABLE"}}"#;
        assert_eq!(parse_chunk(data).unwrap_err().to_string(), "The model is overloaded.");
    }

    #[test]
    fn test_parse_malformed_chunk() {
        assert!(matches!(parse_chunk("{not json"), Err(Error::Backend(_))));
    }

    #[test]
    fn test_api_error_message() {
        let body = r#"{"error":{"code":400,"message":"API key not valid.","status":"INVALID_ARGUMENT"}}"#;
        assert_eq!(api_error_message(body), "API key not valid.");
        assert_eq!(api_error_message(""), "Unknown error");
        assert_eq!(api_error_message("bad gateway"), "bad gateway");
    }

    #[test]
    fn test_endpoint() {
        let backend = test_backend("gemini-x", "k", "http://localhost:1234/");
        assert_eq!(
            backend.endpoint(),
            "http://localhost:1234/v1beta/models/gemini-x:streamGenerateContent?alt=sse"
        );
    }

    fn test_backend(model: &str, api_key: &str, base_url: impl Into<String>) -> GeminiBackend {
        GeminiBackend::new(model.to_string(), api_key.to_string(), Duration::from_secs(5))
            .unwrap()
            .with_base_url(base_url)
    }

    /// Serve one canned HTTP response and return the request head it saw.
    async fn serve_once(response: String) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            let body_start = loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                if let Some(pos) = request.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
            };
            let head = String::from_utf8_lossy(&request[..body_start]).to_string();
            let content_length = head
                .lines()
                .find_map(|l| {
                    let (name, value) = l.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            while request.len() < body_start + content_length {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            head
        });
        (format!("http://{}", addr), handle)
    }

    #[tokio::test]
    async fn test_stream_against_local_server() {
        let events = concat!(
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Run <command>pw\"}]}}]}\r\n\r\n",
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"d</command>\"}]}}]}\r\n\r\n",
            "data: {\"candidates\":[{\"finishReason\":\"STOP\"}]}\r\n\r\n",
        );
        let response = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n{}",
            events
        );
        let (base_url, server) = serve_once(response).await;

        let backend = test_backend("gemini-test", "secret", base_url);
        let parts = vec![Part::Text("where am I?".to_string())];
        let fragments: Vec<Fragment> =
            backend.stream("sys", &parts).await.unwrap().collect().await;

        let texts: Vec<String> = fragments.into_iter().map(|f| f.unwrap()).collect();
        assert_eq!(texts, vec!["Run <command>pw", "d</command>"]);

        let head = server.await.unwrap();
        assert!(head.starts_with("POST /v1beta/models/gemini-test:streamGenerateContent?alt=sse"));
        assert!(head.to_ascii_lowercase().contains("x-goog-api-key: secret"));
    }

    #[tokio::test]
    async fn test_error_status_is_backend_error() {
        let body = r#"{"error":{"code":400,"message":"API key not valid.","status":"INVALID_ARGUMENT"}}"#;
        let response = format!(
            concat!(
                "HTTP/1.1 400 Bad Request\r\n",
                "content-type: application/json\r\n",
                "content-length: {}\r\n",
                "connection: close\r\n\r\n{}",
            ),
            body.len(),
            body
        );
        let (base_url, _server) = serve_once(response).await;

        let backend = test_backend("gemini-test", "bad", base_url);
        let err = match backend.stream("sys", &[Part::Text("hi".to_string())]).await {
            Ok(_) => panic!("expected an error"),
            Err(e) => e,
        };
        let message = err.to_string();
        assert!(message.contains("400"));
        assert!(message.contains("API key not valid."));
    }
}
