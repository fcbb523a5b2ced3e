use base64::{engine::general_purpose, Engine};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::models::{AnalysisResult, Role, Source};

pub const ANALYSIS_FAILED_MESSAGE: &str =
    "Failed to analyze image. The AI model may be unable to process this specific image.";

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("Could not read image data.")]
    UnreadableImage,
    #[error("Unsupported image type: {0}")]
    UnsupportedImage(String),
    /// Anything that went wrong after the request was built. The cause is
    /// only logged; callers show the fixed user-facing message.
    #[error("{}", ANALYSIS_FAILED_MESSAGE)]
    Failed { cause: String },
}

impl AnalysisError {
    pub fn failed(cause: impl std::fmt::Display) -> Self {
        AnalysisError::Failed {
            cause: cause.to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Stream closed before completion")]
    Interrupted,
}

/// Base64 image data plus its MIME type, ready to inline into a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub mime_type: String,
    pub data: String,
}

impl ImagePayload {
    pub fn from_bytes(bytes: &[u8], mime_type: &str) -> Result<Self, AnalysisError> {
        if bytes.is_empty() {
            return Err(AnalysisError::UnreadableImage);
        }
        Self::new(mime_type, general_purpose::STANDARD.encode(bytes))
    }

    /// Parse a `data:<mime>;base64,<data>` URL as produced by a browser file reader.
    pub fn from_data_url(url: &str) -> Result<Self, AnalysisError> {
        let (header, data) = url
            .split_once(',')
            .ok_or(AnalysisError::UnreadableImage)?;

        let mime_type = header
            .strip_prefix("data:")
            .and_then(|h| h.split(';').next())
            .unwrap_or_default();

        Self::new(mime_type, data.trim().to_string())
    }

    fn new(mime_type: &str, data: String) -> Result<Self, AnalysisError> {
        if data.is_empty() {
            return Err(AnalysisError::UnreadableImage);
        }
        if !mime_type.starts_with("image/") {
            return Err(AnalysisError::UnsupportedImage(mime_type.to_string()));
        }
        Ok(Self {
            mime_type: mime_type.to_string(),
            data,
        })
    }
}

/// One completed exchange entry in a chat session's history.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct ChatTurnRequest {
    pub system_instruction: String,
    pub search_grounding: bool,
    pub history: Vec<Turn>,
    pub message: String,
}

/// One streamed fragment. `sources` carries the latest non-empty citation
/// list seen so far in this message, if any.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChatChunk {
    pub text: String,
    pub sources: Option<Vec<Source>>,
}

/// Lazily consumed fragments of one model response. Dropping the stream
/// aborts the task feeding it.
pub struct FragmentStream {
    rx: mpsc::Receiver<Result<ChatChunk, ChatError>>,
    task: Option<JoinHandle<()>>,
}

impl FragmentStream {
    pub fn new(rx: mpsc::Receiver<Result<ChatChunk, ChatError>>, task: Option<JoinHandle<()>>) -> Self {
        Self { rx, task }
    }

    pub async fn next(&mut self) -> Option<Result<ChatChunk, ChatError>> {
        self.rx.recv().await
    }
}

impl Drop for FragmentStream {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Trait for the hosted model backing both views
#[async_trait::async_trait]
pub trait AIService: Send + Sync {
    async fn analyze_food_image(&self, image: &ImagePayload) -> Result<AnalysisResult, AnalysisError>;
    async fn stream_chat(&self, request: ChatTurnRequest) -> Result<FragmentStream, ChatError>;
}
