use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::payloads::SendMessageSetters;
use teloxide::types::ParseMode;
use teloxide::RequestError;

use crate::delivery::{MessageSender, SendError};
use crate::model::Destination;

/// Sends notifications through the Bot API in HTML parse mode.
#[derive(Clone)]
pub struct TelegramSender {
    bot: Bot,
}

impl TelegramSender {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

fn classify(err: RequestError) -> SendError {
    match err {
        RequestError::RetryAfter(wait) => SendError::RetryAfter(wait),
        err @ (RequestError::Network(_) | RequestError::Io(_)) => SendError::Network(err.to_string()),
        other => SendError::Rejected(other.to_string()),
    }
}

#[async_trait]
impl MessageSender for TelegramSender {
    async fn send_message(&self, destination: &Destination, html: &str) -> Result<(), SendError> {
        let mut request = self
            .bot
            .send_message(ChatId(destination.chat_id), html)
            .parse_mode(ParseMode::Html);
        if let Some(thread_id) = destination.thread_id {
            request = request.message_thread_id(thread_id);
        }
        request.await.map(|_| ()).map_err(classify)
    }
}
