use serde::Serialize;
use std::sync::Arc;

use crate::models::AnalysisResult;
use crate::services::{AIService, ImagePayload};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ViewState {
    Idle,
    Loading,
    Success { result: AnalysisResult },
    Failure { message: String },
}

/// The image the user picked, kept as the preview data URL the page shows.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedImage {
    pub mime_type: String,
    pub preview: String,
}

impl SelectedImage {
    /// Build from a browser data URL; the MIME type comes from its header.
    pub fn from_data_url(preview: impl Into<String>) -> Self {
        let preview = preview.into();
        let mime_type = preview
            .strip_prefix("data:")
            .and_then(|rest| rest.split([';', ',']).next())
            .unwrap_or_default()
            .to_string();
        Self { mime_type, preview }
    }

    /// Build from an already-encoded payload, e.g. a raw upload.
    pub fn from_payload(payload: &ImagePayload) -> Self {
        Self {
            mime_type: payload.mime_type.clone(),
            preview: format!("data:{};base64,{}", payload.mime_type, payload.data),
        }
    }
}

pub struct PhotoAnalyzer {
    ai: Arc<dyn AIService>,
    image: Option<SelectedImage>,
    state: ViewState,
}

impl PhotoAnalyzer {
    pub fn new(ai: Arc<dyn AIService>) -> Self {
        Self {
            ai,
            image: None,
            state: ViewState::Idle,
        }
    }

    pub fn state(&self) -> &ViewState {
        &self.state
    }

    pub fn image(&self) -> Option<&SelectedImage> {
        self.image.as_ref()
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.state, ViewState::Loading)
    }

    pub fn can_analyze(&self) -> bool {
        self.image.is_some() && !self.is_loading()
    }

    /// A new image discards any previous result or error.
    pub fn select_image(&mut self, image: SelectedImage) {
        log::debug!("🖼️ Image selected: {} ({} chars)", image.mime_type, image.preview.len());
        self.image = Some(image);
        self.state = ViewState::Idle;
    }

    pub fn clear_image(&mut self) {
        self.image = None;
        self.state = ViewState::Idle;
    }

    pub async fn analyze(&mut self) -> &ViewState {
        if !self.can_analyze() {
            log::warn!("⚠️ Analyze requested without an image or while loading");
            return &self.state;
        }
        let Some(image) = self.image.clone() else {
            return &self.state;
        };

        self.state = ViewState::Loading;

        let payload = match payload_from_preview(&image) {
            Ok(payload) => payload,
            Err(e) => {
                log::warn!("⚠️ Unreadable image, not sending request: {}", e);
                self.state = ViewState::Failure {
                    message: e.to_string(),
                };
                return &self.state;
            }
        };

        self.state = match self.ai.analyze_food_image(&payload).await {
            Ok(result) => ViewState::Success { result },
            Err(e) => ViewState::Failure {
                message: e.to_string(),
            },
        };

        &self.state
    }
}

fn payload_from_preview(image: &SelectedImage) -> Result<ImagePayload, crate::services::AnalysisError> {
    let payload = ImagePayload::from_data_url(&image.preview)?;
    if image.mime_type.is_empty() {
        Ok(payload)
    } else {
        Ok(ImagePayload {
            mime_type: image.mime_type.clone(),
            ..payload
        })
    }
}
