pub mod ai_service;
pub mod chat;
pub mod gemini; // Google Gemini REST client
pub mod schema; // Analysis response schema

pub use ai_service::{AIService, AnalysisError, ChatError, ImagePayload};
pub use chat::ChatSession;
pub use gemini::GeminiClient;
