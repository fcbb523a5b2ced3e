use serde::Serialize;
use std::sync::Arc;

use crate::models::{ChatMessage, Role};
use crate::services::{AIService, ChatError, ChatSession};

pub const GREETING: &str = "Hello! I am Nutri-Chat. How can I help you with your nutrition questions today?";
pub const ERROR_REPLY: &str = "Sorry, I encountered an error. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SendOutcome {
    /// Blank input; nothing was sent.
    Ignored,
    Completed,
    /// The reply placeholder now holds `ERROR_REPLY`.
    Failed,
}

/// Chat view: an append-only transcript whose last assistant message grows
/// in place while a reply streams.
pub struct NutritionChatbot {
    session: ChatSession,
    messages: Vec<ChatMessage>,
    loading: bool,
}

impl NutritionChatbot {
    pub fn new(ai: Arc<dyn AIService>) -> Self {
        Self {
            session: ChatSession::new(ai),
            messages: vec![ChatMessage::assistant(GREETING)],
            loading: false,
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Send `input` and stream the reply into the transcript. `on_update` sees
    /// the assistant message after every change to it.
    pub async fn send_message<F>(&mut self, input: &str, mut on_update: F) -> SendOutcome
    where
        F: FnMut(&ChatMessage),
    {
        if input.trim().is_empty() || self.loading {
            return SendOutcome::Ignored;
        }

        log::info!("📨 Chat message: '{}'", input);

        self.messages.push(ChatMessage::user(input));
        self.messages.push(ChatMessage::assistant(""));
        // cleared on drop, even if this future is abandoned mid-stream
        let _loading = LoadingFlag::raise(&mut self.loading);

        match stream_reply(&mut self.session, &mut self.messages, input, &mut on_update).await {
            Ok(()) => SendOutcome::Completed,
            Err(e) => {
                log::error!("❌ Chat error: {}", e);
                if let Some(last) = self.messages.last_mut() {
                    last.content = ERROR_REPLY.to_string();
                    on_update(last);
                }
                SendOutcome::Failed
            }
        }
    }
}

struct LoadingFlag<'a>(&'a mut bool);

impl<'a> LoadingFlag<'a> {
    fn raise(flag: &'a mut bool) -> Self {
        *flag = true;
        Self(flag)
    }
}

impl Drop for LoadingFlag<'_> {
    fn drop(&mut self) {
        *self.0 = false;
    }
}

async fn stream_reply<F>(
    session: &mut ChatSession,
    messages: &mut [ChatMessage],
    input: &str,
    on_update: &mut F,
) -> Result<(), ChatError>
where
    F: FnMut(&ChatMessage),
{
    let mut stream = session.send_message_stream(input).await?;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if let Some(last) = messages.last_mut().filter(|m| m.role == Role::Assistant) {
            last.content.push_str(&chunk.text);
            if let Some(sources) = chunk.sources {
                last.sources = Some(sources);
            }
            on_update(last);
        }
    }

    Ok(())
}
