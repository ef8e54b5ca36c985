// SPDX-FileCopyrightText: 2026 Opengram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Prompt assembly and submission.
//!
//! Photos become data-URL file parts, voice becomes transcribed text when
//! a transcriber is configured, video is rejected outright. The first user
//! message of a nameless session kicks off the asynchronous title RPC.

use std::sync::Arc;

use tracing::{debug, warn};

use opengram_agent::client::{PromptPart, TitleReply};
use opengram_core::types::{IncomingMessage, ThreadKey};

use crate::Router;

impl Router {
    /// Step 5 of classification: turn the message into agent prompt parts
    /// and submit them.
    pub(crate) async fn submit_prompt(&self, key: ThreadKey, msg: &IncomingMessage) {
        if msg.has_video {
            self.reply(key, "Video messages are not supported.").await;
            return;
        }

        let mut parts = Vec::new();

        if let Some(photo) = &msg.photo {
            let mime = photo.mime.as_deref().unwrap_or("image/jpeg");
            match self.messenger.download_data_url(&photo.file_id, mime).await {
                Ok(url) => parts.push(PromptPart::File {
                    mime: mime.to_string(),
                    url,
                }),
                Err(e) => {
                    warn!(error = %e, "photo download failed");
                    self.reply(key, "Failed to download the photo.").await;
                    return;
                }
            }
        }

        if let Some(voice) = &msg.voice {
            let Some(transcriber) = &self.transcriber else {
                self.reply(key, "Voice transcription is not configured.").await;
                return;
            };
            let mime = voice.mime.as_deref().unwrap_or("audio/ogg");
            let transcript = match self.messenger.download_bytes(&voice.file_id).await {
                Ok(bytes) => transcriber.transcribe(bytes, mime).await,
                Err(e) => Err(e),
            };
            match transcript {
                Ok(text) => parts.push(PromptPart::Text { text }),
                Err(e) => {
                    warn!(error = %e, "voice transcription failed");
                    self.reply(key, "Could not transcribe the voice message.").await;
                    return;
                }
            }
        }

        let text = msg.effective_text().map(str::trim).filter(|t| !t.is_empty());
        if let Some(text) = text {
            parts.push(PromptPart::Text {
                text: text.to_string(),
            });
        }

        if parts.is_empty() {
            debug!("message produced no prompt parts, ignoring");
            return;
        }

        let session = match self.ensure_session().await {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "session creation failed");
                self.reply(key, "Failed to reach the agent.").await;
                return;
            }
        };

        if let Err(e) = self
            .agent
            .prompt(&session.id, &parts, session.selected_model.as_ref())
            .await
        {
            warn!(error = %e, "prompt submission failed");
            self.reply(key, "Failed to submit the prompt.").await;
            return;
        }

        if !session.title_known {
            if let Some(text) = text {
                self.kick_off_title(key, &session.id, text).await;
            }
        }
    }

    /// Generates a session title in the background and applies it to the
    /// session and the forum topic.
    async fn kick_off_title(&self, key: ThreadKey, session_id: &str, text: &str) {
        // Mark immediately so later messages don't race a second RPC.
        if let Some(session) = self.session.lock().await.as_mut() {
            if session.id == session_id {
                session.title_known = true;
            }
        }

        let agent = Arc::clone(&self.agent);
        let messenger = Arc::clone(&self.messenger);
        let session_id = session_id.to_string();
        let text = text.to_string();
        let topic_thread = key.thread_id.or(self.config.thread_id);
        let chat_id = key.chat_id;

        tokio::spawn(async move {
            match agent.generate_title(&session_id, &text).await {
                Ok(TitleReply::Title(title)) => {
                    if let Err(e) = agent.rename_session(&session_id, &title).await {
                        warn!(error = %e, "applying generated title failed");
                    }
                    if let Some(thread) = topic_thread {
                        if let Err(e) = messenger.rename_topic(chat_id, thread, &title).await {
                            warn!(error = %e, "topic rename failed");
                        }
                    }
                    debug!(session_id, title, "session titled");
                }
                Ok(TitleReply::Unknown(value)) => {
                    debug!(session_id, value, "title generation came back unknown");
                }
                Err(e) => warn!(error = %e, "title generation failed"),
            }
        });
    }
}
