// SPDX-FileCopyrightText: 2026 Opengram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Telegram transport for the opengram bridge.
//!
//! Wraps the teloxide Bot API behind the channel-agnostic
//! [`Messenger`] trait: chunked sends with markdown-then-plain fallback,
//! in-place edits, callback acknowledgement, typing actions, forum topic
//! management, file downloads, and update long polling.

pub mod incoming;
pub mod markdown;
pub mod proxy;
pub mod split;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use teloxide::prelude::*;
use teloxide::types::{
    AllowedUpdate, BotCommand, ChatAction, ChatId,
    InlineKeyboardButton, InlineKeyboardMarkup, MessageId, ParseMode, ReplyParameters, ThreadId,
    Update,
};
use tracing::{debug, warn};

use opengram_core::error::BridgeError;
use opengram_core::messenger::Messenger;
use opengram_core::types::{EditOutcome, Keyboard, SendOptions, SendOutcome, ThreadKey};

pub use incoming::normalize_update;
pub use proxy::ProxyClient;

/// Teloxide-backed implementation of [`Messenger`].
pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    /// Creates the transport. `send_url` overrides the Telegram API base
    /// URL when a relay is configured.
    pub fn new(token: &str, send_url: Option<&str>) -> Result<Self, BridgeError> {
        let mut bot = Bot::new(token);
        if let Some(url) = send_url {
            let url = reqwest::Url::parse(url)
                .map_err(|e| BridgeError::Config(format!("invalid sendUrl {url:?}: {e}")))?;
            bot = bot.set_api_url(url);
        }
        Ok(Self { bot })
    }

    /// Long-polls for updates after `since`, restricted to messages and
    /// callback queries.
    pub async fn long_poll(&self, since: i64, timeout_secs: u32) -> Result<Vec<Update>, BridgeError> {
        self.bot
            .get_updates()
            .offset((since + 1) as i32)
            .timeout(timeout_secs)
            .allowed_updates([AllowedUpdate::Message, AllowedUpdate::CallbackQuery])
            .await
            .map_err(|e| classify("getUpdates", e))
    }

    /// Publishes the bot command menu. Idempotent.
    pub async fn set_commands(&self, commands: &[(&str, &str)]) -> Result<(), BridgeError> {
        let list: Vec<BotCommand> = commands
            .iter()
            .map(|(cmd, desc)| BotCommand::new(*cmd, *desc))
            .collect();
        self.bot
            .set_my_commands(list)
            .await
            .map_err(|e| classify("setMyCommands", e))?;
        Ok(())
    }

    /// Verifies the token by calling getMe. Fatal on 401.
    pub async fn check_auth(&self) -> Result<(), BridgeError> {
        self.bot
            .get_me()
            .await
            .map_err(|e| classify("getMe", e))?;
        Ok(())
    }

    async fn send_chunk(
        &self,
        dest: ThreadKey,
        chunk: &str,
        keyboard: Option<&Keyboard>,
        reply_to: Option<i32>,
    ) -> Result<(i32, bool), BridgeError> {
        let escaped = markdown::escape_markdown(chunk);

        let mut request = self
            .bot
            .send_message(ChatId(dest.chat_id), &escaped)
            .parse_mode(ParseMode::MarkdownV2);
        if let Some(thread) = dest.thread_id {
            request = request.message_thread_id(ThreadId(MessageId(thread as i32)));
        }
        if let Some(kb) = keyboard {
            request = request.reply_markup(to_inline_markup(kb));
        }
        if let Some(reply) = reply_to {
            request = request.reply_parameters(ReplyParameters::new(MessageId(reply)));
        }

        match request.await {
            Ok(sent) => Ok((sent.id.0, true)),
            Err(e) => {
                warn!(error = %e, "MarkdownV2 send failed, retrying as plain text");
                let mut plain = self.bot.send_message(ChatId(dest.chat_id), chunk);
                if let Some(thread) = dest.thread_id {
                    plain = plain.message_thread_id(ThreadId(MessageId(thread as i32)));
                }
                if let Some(kb) = keyboard {
                    plain = plain.reply_markup(to_inline_markup(kb));
                }
                if let Some(reply) = reply_to {
                    plain = plain.reply_parameters(ReplyParameters::new(MessageId(reply)));
                }
                let sent = plain.await.map_err(|e| classify("sendMessage", e))?;
                Ok((sent.id.0, false))
            }
        }
    }
}

#[async_trait]
impl Messenger for TelegramTransport {
    async fn send(
        &self,
        dest: ThreadKey,
        text: &str,
        opts: SendOptions,
    ) -> Result<SendOutcome, BridgeError> {
        if text.is_empty() {
            return Err(BridgeError::telegram("refusing to send empty message"));
        }

        let chunks = split::split_message(text);
        let last = chunks.len() - 1;
        let mut message_id = 0;
        let mut used_markdown = true;

        for (i, chunk) in chunks.iter().enumerate() {
            let keyboard = (i == last).then_some(opts.keyboard.as_ref()).flatten();
            let reply_to = (i == 0).then_some(opts.reply_to).flatten();
            let (id, markdown_ok) = self.send_chunk(dest, chunk, keyboard, reply_to).await?;
            message_id = id;
            used_markdown &= markdown_ok;
        }

        Ok(SendOutcome {
            message_id,
            used_markdown,
        })
    }

    async fn edit(
        &self,
        chat_id: i64,
        message_id: i32,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<EditOutcome, BridgeError> {
        let escaped = markdown::escape_markdown(text);

        let mut request = self
            .bot
            .edit_message_text(ChatId(chat_id), MessageId(message_id), &escaped)
            .parse_mode(ParseMode::MarkdownV2);
        if let Some(ref kb) = keyboard {
            request = request.reply_markup(to_inline_markup(kb));
        }

        match request.await {
            Ok(_) => Ok(EditOutcome {
                ok: true,
                used_markdown: true,
            }),
            Err(e) if is_not_modified(&e) => Ok(EditOutcome {
                ok: true,
                used_markdown: true,
            }),
            Err(e) => {
                warn!(error = %e, message_id, "MarkdownV2 edit failed, retrying as plain text");
                let mut plain =
                    self.bot
                        .edit_message_text(ChatId(chat_id), MessageId(message_id), text);
                if let Some(ref kb) = keyboard {
                    plain = plain.reply_markup(to_inline_markup(kb));
                }
                match plain.await {
                    Ok(_) => Ok(EditOutcome {
                        ok: true,
                        used_markdown: false,
                    }),
                    Err(e) if is_not_modified(&e) => Ok(EditOutcome {
                        ok: true,
                        used_markdown: false,
                    }),
                    Err(e) => {
                        let err = classify("editMessageText", e);
                        if matches!(err, BridgeError::TelegramFatal(_)) {
                            Err(err)
                        } else {
                            debug!(error = %err, message_id, "edit failed");
                            Ok(EditOutcome {
                                ok: false,
                                used_markdown: false,
                            })
                        }
                    }
                }
            }
        }
    }

    async fn answer_callback(&self, callback_id: &str, text: Option<&str>, show_alert: bool) {
        let mut request = self
            .bot
            .answer_callback_query(callback_id.to_string());
        if let Some(text) = text {
            request = request.text(text);
        }
        if show_alert {
            request = request.show_alert(true);
        }
        if let Err(e) = request.await {
            debug!(error = %e, callback_id, "answerCallbackQuery failed");
        }
    }

    async fn typing_once(&self, dest: ThreadKey) -> Result<(), BridgeError> {
        let mut request = self
            .bot
            .send_chat_action(ChatId(dest.chat_id), ChatAction::Typing);
        if let Some(thread) = dest.thread_id {
            request = request.message_thread_id(ThreadId(MessageId(thread as i32)));
        }
        request
            .await
            .map_err(|e| classify("sendChatAction", e))?;
        Ok(())
    }

    async fn create_topic(&self, chat_id: i64, name: &str) -> Result<i64, BridgeError> {
        let topic = self
            .bot
            .create_forum_topic(
                ChatId(chat_id),
                split::truncate_topic_name(name),
                7322096u32,
                String::new(),
            )
            .await
            .map_err(|e| classify("createForumTopic", e))?;
        Ok(i64::from(topic.thread_id.0 .0))
    }

    async fn rename_topic(
        &self,
        chat_id: i64,
        thread_id: i64,
        name: &str,
    ) -> Result<(), BridgeError> {
        self.bot
            .edit_forum_topic(ChatId(chat_id), ThreadId(MessageId(thread_id as i32)))
            .name(split::truncate_topic_name(name))
            .await
            .map_err(|e| classify("editForumTopic", e))?;
        Ok(())
    }

    async fn download_bytes(&self, file_id: &str) -> Result<Vec<u8>, BridgeError> {
        use teloxide::net::Download;

        let file = self
            .bot
            .get_file(file_id.to_string())
            .await
            .map_err(|e| classify("getFile", e))?;

        let mut buf = Vec::new();
        self.bot
            .download_file(&file.path, &mut buf)
            .await
            .map_err(|e| BridgeError::Telegram {
                message: format!("failed to download file {file_id}: {e}"),
                source: Some(Box::new(e)),
            })?;

        debug!(file_id, size = buf.len(), "downloaded file from Telegram");
        Ok(buf)
    }

    async fn download_data_url(&self, file_id: &str, mime: &str) -> Result<String, BridgeError> {
        let buf = self.download_bytes(file_id).await?;
        Ok(format!("data:{mime};base64,{}", BASE64.encode(&buf)))
    }
}

fn to_inline_markup(keyboard: &Keyboard) -> InlineKeyboardMarkup {
    use opengram_core::types::ButtonAction;

    InlineKeyboardMarkup::new(keyboard.rows.iter().map(|row| {
        row.iter()
            .map(|b| match &b.action {
                ButtonAction::Callback(data) => {
                    InlineKeyboardButton::callback(b.label.clone(), data.clone())
                }
                ButtonAction::Url(url) => match reqwest::Url::parse(url) {
                    Ok(parsed) => InlineKeyboardButton::url(b.label.clone(), parsed),
                    Err(_) => InlineKeyboardButton::callback(b.label.clone(), "noop".to_string()),
                },
            })
            .collect::<Vec<_>>()
    }))
}

fn is_not_modified(err: &teloxide::RequestError) -> bool {
    err.to_string().contains("message is not modified")
}

/// Sorts Telegram API failures into fatal (401, 409, chat not found) and
/// transient (everything else).
fn classify(context: &str, err: teloxide::RequestError) -> BridgeError {
    let text = err.to_string();
    let lower = text.to_ascii_lowercase();
    let fatal = lower.contains("unauthorized")
        || lower.contains("invalid bot token")
        || lower.contains("chat not found")
        || lower.contains("terminated by other getupdates")
        || lower.contains("conflict");

    if fatal {
        BridgeError::TelegramFatal(format!("{context}: {text}"))
    } else {
        BridgeError::Telegram {
            message: format!("{context}: {text}"),
            source: Some(Box::new(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use teloxide::ApiError;
    use teloxide::RequestError;

    #[test]
    fn unauthorized_is_fatal() {
        let err = classify(
            "getMe",
            RequestError::Api(ApiError::Unknown("Unauthorized".into())),
        );
        assert!(matches!(err, BridgeError::TelegramFatal(_)));
    }

    #[test]
    fn chat_not_found_is_fatal() {
        let err = classify("sendMessage", RequestError::Api(ApiError::ChatNotFound));
        assert!(matches!(err, BridgeError::TelegramFatal(_)));
    }

    #[test]
    fn poll_conflict_is_fatal() {
        let err = classify(
            "getUpdates",
            RequestError::Api(ApiError::TerminatedByOtherGetUpdates),
        );
        assert!(matches!(err, BridgeError::TelegramFatal(_)));
    }

    #[test]
    fn other_api_errors_are_transient() {
        let err = classify(
            "sendMessage",
            RequestError::Api(ApiError::Unknown("Too Many Requests: retry after 5".into())),
        );
        assert!(matches!(err, BridgeError::Telegram { .. }));
    }

    #[test]
    fn not_modified_detection() {
        let err = RequestError::Api(ApiError::MessageNotModified);
        assert!(is_not_modified(&err));
    }

    #[test]
    fn keyboard_converts_to_inline_markup() {
        let kb = Keyboard::single_row(vec![
            opengram_core::types::Button::callback("Accept", "p:1:-:once"),
            opengram_core::types::Button::callback("Deny", "p:1:-:reject"),
        ]);
        let markup = to_inline_markup(&kb);
        assert_eq!(markup.inline_keyboard.len(), 1);
        assert_eq!(markup.inline_keyboard[0].len(), 2);
        assert_eq!(markup.inline_keyboard[0][0].text, "Accept");
    }

    #[test]
    fn transport_rejects_invalid_send_url() {
        let result = TelegramTransport::new("123:abc", Some("not a url"));
        assert!(matches!(result, Err(BridgeError::Config(_))));
    }
}
