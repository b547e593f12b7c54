//! Typing indicator — refreshes `sendChatAction` every 4 seconds.
//!
//! Telegram's typing status expires after ~5 seconds, so 4 s keeps it alive.
//! `TypingHandle::stop()` aborts the loop immediately.

use std::time::Duration;

use teloxide::prelude::*;
use teloxide::types::ChatAction;

pub struct TypingHandle(tokio::task::JoinHandle<()>);

impl TypingHandle {
    pub fn start(bot: Bot, chat_id: ChatId) -> Self {
        let handle = tokio::spawn(async move {
            loop {
                let _ = bot.send_chat_action(chat_id, ChatAction::Typing).await;
                tokio::time::sleep(Duration::from_secs(4)).await;
            }
        });
        TypingHandle(handle)
    }

    pub fn stop(self) {
        self.0.abort();
    }
}

impl Drop for TypingHandle {
    fn drop(&mut self) {
        self.0.abort();
    }
}
