use std::sync::Arc;

use crate::models::Role;
use crate::services::ai_service::{AIService, ChatChunk, ChatError, ChatTurnRequest, FragmentStream, Turn};

pub const SYSTEM_INSTRUCTION: &str = "You are Nutri-Chat, an expert AI nutritionist. \
    Provide helpful, safe, and evidence-based advice. \
    Use Google Search to find up-to-date information when needed. \
    You are not a medical doctor and should always advise users to consult a professional for medical advice.";

/// A conversation with the nutrition assistant. Creating one is free; the
/// model is only contacted when a message is sent.
pub struct ChatSession {
    ai: Arc<dyn AIService>,
    system_instruction: String,
    search_grounding: bool,
    history: Vec<Turn>,
}

impl ChatSession {
    pub fn new(ai: Arc<dyn AIService>) -> Self {
        Self {
            ai,
            system_instruction: SYSTEM_INSTRUCTION.to_string(),
            search_grounding: true,
            history: Vec::new(),
        }
    }

    pub async fn send_message_stream(&mut self, text: &str) -> Result<MessageStream<'_>, ChatError> {
        let request = ChatTurnRequest {
            system_instruction: self.system_instruction.clone(),
            search_grounding: self.search_grounding,
            history: self.history.clone(),
            message: text.to_string(),
        };

        let fragments = self.ai.stream_chat(request).await?;

        Ok(MessageStream {
            session: self,
            fragments,
            message: text.to_string(),
            reply: String::new(),
            finished: false,
        })
    }
}

/// Reply fragments for one message, in arrival order. The exchange is added
/// to the session history once the stream ends without error.
pub struct MessageStream<'a> {
    session: &'a mut ChatSession,
    fragments: FragmentStream,
    message: String,
    reply: String,
    finished: bool,
}

impl MessageStream<'_> {
    pub async fn next(&mut self) -> Option<Result<ChatChunk, ChatError>> {
        if self.finished {
            return None;
        }

        match self.fragments.next().await {
            Some(Ok(chunk)) => {
                self.reply.push_str(&chunk.text);
                Some(Ok(chunk))
            }
            Some(Err(e)) => {
                self.finished = true;
                Some(Err(e))
            }
            None => {
                self.finished = true;
                self.session.history.push(Turn {
                    role: Role::User,
                    text: std::mem::take(&mut self.message),
                });
                self.session.history.push(Turn {
                    role: Role::Assistant,
                    text: self.reply.clone(),
                });
                None
            }
        }
    }
}
