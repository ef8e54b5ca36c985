// SPDX-FileCopyrightText: 2026 Opengram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Normalization of raw Telegram updates.
//!
//! The router and pending registry never see teloxide types; every polled
//! update is reduced to an [`Incoming`] value here. Unsupported update
//! kinds normalize to `None` and are skipped upstream.

use teloxide::types::{Update, UpdateKind};

use opengram_core::pending::{parse_callback, CallbackToken};
use opengram_core::types::{Incoming, IncomingCallback, IncomingMessage, MediaRef};

/// Converts a raw update into the bridge's channel-agnostic form.
pub fn normalize_update(update: &Update) -> Option<Incoming> {
    let update_id = i64::from(update.id.0);
    match &update.kind {
        UpdateKind::Message(msg) => Some(Incoming::Message(IncomingMessage {
            update_id,
            chat_id: msg.chat.id.0,
            thread_id: msg.thread_id.map(|t| i64::from(t.0 .0)),
            message_id: msg.id.0,
            date: msg.date.timestamp(),
            from_is_bot: msg.from.as_ref().map(|u| u.is_bot).unwrap_or(false),
            text: msg.text().map(str::to_owned),
            caption: msg.caption().map(str::to_owned),
            photo: msg
                .photo()
                // Telegram orders sizes ascending; the last one is the largest.
                .and_then(|sizes| sizes.last())
                .map(|p| MediaRef {
                    file_id: p.file.id.clone(),
                    mime: Some("image/jpeg".to_string()),
                }),
            voice: msg.voice().map(|v| MediaRef {
                file_id: v.file.id.clone(),
                mime: v.mime_type.as_ref().map(|m| m.to_string()),
            }),
            has_video: msg.video().is_some(),
        })),
        UpdateKind::CallbackQuery(q) => {
            let data = q.data.clone()?;
            let msg = q.regular_message();

            // The callback token itself carries the thread key, so a
            // callback remains routable even when Telegram withholds the
            // originating message.
            let (chat_id, thread_id) = match msg {
                Some(m) => (m.chat.id.0, m.thread_id.map(|t| i64::from(t.0 .0))),
                None => match parse_callback(&data) {
                    Some(CallbackToken::Question { key, .. })
                    | Some(CallbackToken::Permission { key, .. }) => (key.chat_id, key.thread_id),
                    None => return None,
                },
            };

            Some(Incoming::Callback(IncomingCallback {
                update_id,
                callback_id: q.id.clone(),
                chat_id,
                thread_id,
                date: msg.map(|m| m.date.timestamp()),
                data,
                message_id: msg.map(|m| m.id.0),
            }))
        }
        _ => None,
    }
}
