//! Message pipeline: every message mutation goes through here.
//!
//! Each operation validates the caller against the store, persists the
//! change, and only then publishes the matching [`ServerEvent`]. Events for a
//! chat are published while its [`ChatSequencer`] guard is held, so delivery
//! order always equals commit order. Failed operations publish nothing.
//!
//! The request deadline covers validation and the wait for the sequencer.
//! Once the guard is taken, persist and publish always finish together.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use courier_config::{MessageConfig, RealtimeConfig};
use courier_database::{
    timestamp, Message, MessageCursor, MessageRepository, NewMessage, ParticipantRepository,
    ReceiptRepository,
};
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::publisher::EventPublisher;
use crate::services::retry::RetryPolicy;
use crate::services::sequencer::{ChatSequencer, SequenceGuard};
use crate::types::{ChatError, ChatResult, DeleteScope, MessagePage, MessageView, ServerEvent};
use crate::utils::PermissionChecker;

/// Client-generated ids for optimistic messages that never reached the store.
const TEMPORARY_ID_PREFIX: &str = "temp-";

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub unsend_window: Duration,
    pub request_timeout: Duration,
    pub max_content_length: usize,
    pub typing_ttl: Duration,
    pub read_retry: RetryPolicy,
    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl PipelineSettings {
    pub fn from_config(realtime: &RealtimeConfig, messages: &MessageConfig) -> Self {
        Self {
            unsend_window: realtime.unsend_window(),
            request_timeout: realtime.request_timeout(),
            max_content_length: messages.max_content_length,
            typing_ttl: Duration::from_millis(realtime.typing_ttl_ms),
            read_retry: RetryPolicy::new(realtime.read_retry_attempts, realtime.read_retry_backoff()),
            default_page_size: messages.default_page_size,
            max_page_size: messages.max_page_size,
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&RealtimeConfig::default(), &MessageConfig::default())
    }
}

#[derive(Debug, Clone, Default)]
pub struct SendMessage {
    pub chat_id: String,
    pub sender_id: String,
    pub content: Option<String>,
    pub media_ref: Option<String>,
    pub reply_to: Option<String>,
    /// Echoed on the `message_created` event so the sender can reconcile.
    pub temp_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PageRequest {
    pub limit: Option<u32>,
    pub before: Option<String>,
}

/// Whether an idempotent operation changed anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    Unchanged,
}

impl From<bool> for Outcome {
    fn from(changed: bool) -> Self {
        if changed {
            Outcome::Applied
        } else {
            Outcome::Unchanged
        }
    }
}

pub struct MessagePipeline {
    messages: MessageRepository,
    participants: ParticipantRepository,
    receipts: ReceiptRepository,
    publisher: Arc<dyn EventPublisher>,
    sequencer: ChatSequencer,
    settings: PipelineSettings,
}

impl MessagePipeline {
    pub fn new(pool: SqlitePool, publisher: Arc<dyn EventPublisher>, settings: PipelineSettings) -> Self {
        Self {
            messages: MessageRepository::new(pool.clone()),
            participants: ParticipantRepository::new(pool.clone()),
            receipts: ReceiptRepository::new(pool),
            publisher,
            sequencer: ChatSequencer::new(),
            settings,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub async fn send(&self, request: SendMessage) -> ChatResult<Message> {
        let (sequence, new_message) = self
            .with_deadline(self.prepare_send(&request))
            .await?;

        let messages = self.messages.clone();
        let publisher = self.publisher.clone();
        let temp_id = request.temp_id;
        run_to_completion(sequence, async move {
            let message = messages.insert(&new_message).await?;

            publisher.publish(
                &message.chat_id,
                &ServerEvent::MessageCreated {
                    message: MessageView::from(message.clone()),
                    temp_id,
                },
            );

            info!(chat_id = %message.chat_id, message_id = %message.id, "message sent");
            Ok(message)
        })
        .await
    }

    pub async fn unsend(&self, chat_id: &str, message_id: &str, user_id: &str) -> ChatResult<Outcome> {
        let Some(sequence) = self
            .with_deadline(self.prepare_unsend(chat_id, message_id, user_id))
            .await?
        else {
            return Ok(Outcome::Unchanged);
        };

        let messages = self.messages.clone();
        let publisher = self.publisher.clone();
        let chat_id = chat_id.to_string();
        let message_id = message_id.to_string();
        run_to_completion(sequence, async move {
            if !messages.mark_unsent(&message_id, &timestamp::now()).await? {
                return Ok(Outcome::Unchanged);
            }

            publisher.publish(
                &chat_id,
                &ServerEvent::MessageUnsent {
                    chat_id: chat_id.clone(),
                    message_id: message_id.clone(),
                },
            );

            info!(%chat_id, %message_id, "message unsent");
            Ok(Outcome::Applied)
        })
        .await
    }

    pub async fn delete(
        &self,
        chat_id: &str,
        message_id: &str,
        user_id: &str,
        scope: DeleteScope,
    ) -> ChatResult<Outcome> {
        if scope == DeleteScope::ForSelf {
            return self
                .with_deadline(self.hide_for_self(chat_id, message_id, user_id))
                .await;
        }

        let sequence = self
            .with_deadline(self.prepare_delete_for_all(chat_id, message_id, user_id))
            .await?;

        let messages = self.messages.clone();
        let publisher = self.publisher.clone();
        let chat_id = chat_id.to_string();
        let message_id = message_id.to_string();
        let user_id = user_id.to_string();
        run_to_completion(sequence, async move {
            let changed = messages
                .mark_deleted_for_all(&message_id, &timestamp::now())
                .await?;
            if changed {
                publisher.publish(
                    &chat_id,
                    &ServerEvent::MessageDeleted {
                        chat_id: chat_id.clone(),
                        message_id: message_id.clone(),
                        scope,
                    },
                );
                info!(%chat_id, %message_id, %user_id, "message deleted for everyone");
            }
            Ok(changed.into())
        })
        .await
    }

    pub async fn edit(
        &self,
        chat_id: &str,
        message_id: &str,
        user_id: &str,
        content: &str,
    ) -> ChatResult<Message> {
        let (sequence, message) = self
            .with_deadline(self.prepare_edit(chat_id, message_id, user_id, content))
            .await?;

        let messages = self.messages.clone();
        let publisher = self.publisher.clone();
        let content = content.to_string();
        run_to_completion(sequence, async move {
            let edited_at = timestamp::now();
            if !messages
                .update_content_if_live(&message.id, &content, &edited_at)
                .await?
            {
                return Err(ChatError::tombstoned(message.id));
            }

            publisher.publish(
                &message.chat_id,
                &ServerEvent::MessageEdited {
                    chat_id: message.chat_id.clone(),
                    message_id: message.id.clone(),
                    content: content.clone(),
                    edited_at,
                },
            );

            Ok(Message {
                content: Some(content),
                is_edited: true,
                edited_at: Some(edited_at),
                version: message.version + 1,
                ..message
            })
        })
        .await
    }

    pub async fn mark_read(&self, chat_id: &str, message_id: &str, user_id: &str) -> ChatResult<Outcome> {
        let Some(sequence) = self
            .with_deadline(self.prepare_mark_read(chat_id, message_id, user_id))
            .await?
        else {
            return Ok(Outcome::Unchanged);
        };

        let receipts = self.receipts.clone();
        let publisher = self.publisher.clone();
        let retry = self.settings.read_retry;
        let chat_id = chat_id.to_string();
        let message_id = message_id.to_string();
        let user_id = user_id.to_string();
        run_to_completion(sequence, async move {
            let read_at = timestamp::now();
            let (receipts, message_id_ref, user_id_ref, read_at_ref) =
                (&receipts, message_id.as_str(), user_id.as_str(), &read_at);
            let created = retry
                .run("mark_read", move || async move {
                    receipts
                        .insert_if_absent(message_id_ref, user_id_ref, read_at_ref)
                        .await
                        .map_err(ChatError::from)
                })
                .await?;

            if created {
                publisher.publish(
                    &chat_id,
                    &ServerEvent::ReadReceipt {
                        chat_id: chat_id.clone(),
                        message_id,
                        user_id,
                        read_at,
                    },
                );
            }

            Ok(created.into())
        })
        .await
    }

    pub async fn list_messages(
        &self,
        chat_id: &str,
        viewer_id: &str,
        page: PageRequest,
    ) -> ChatResult<MessagePage> {
        self.with_deadline(self.list_inner(chat_id, viewer_id, page))
            .await
    }

    /// Ephemeral typing indicator; never persisted.
    pub async fn typing(&self, chat_id: &str, user_id: &str) -> ChatResult<()> {
        self.with_deadline(async {
            self.require_participant(chat_id, user_id).await?;
            let event = ServerEvent::Typing {
                chat_id: chat_id.to_string(),
                user_id: user_id.to_string(),
                expires_in_ms: self.settings.typing_ttl.as_millis() as u64,
            };
            self.publisher.publish_except(chat_id, &event, user_id);
            Ok(())
        })
        .await
    }

    /// Bounds the read-only part of an operation: validation and the wait for
    /// the chat's sequencer. A [`ChatError::Timeout`] therefore means nothing
    /// was written.
    async fn with_deadline<T>(&self, operation: impl Future<Output = ChatResult<T>>) -> ChatResult<T> {
        let limit = self.settings.request_timeout;
        tokio::time::timeout(limit, operation)
            .await
            .map_err(|_| ChatError::Timeout {
                after_ms: limit.as_millis() as u64,
            })?
    }

    async fn prepare_send(&self, request: &SendMessage) -> ChatResult<(SequenceGuard, NewMessage)> {
        self.require_participant(&request.chat_id, &request.sender_id)
            .await?;

        let content = request.content.clone().filter(|c| !c.trim().is_empty());
        let media_ref = request.media_ref.clone().filter(|m| !m.trim().is_empty());
        if content.is_none() && media_ref.is_none() {
            return Err(ChatError::EmptyMessage);
        }
        if let Some(content) = &content {
            self.check_length(content)?;
        }

        if let Some(reply_to) = &request.reply_to {
            let target = self.messages.find_by_id(reply_to).await?;
            let in_chat = target.is_some_and(|t| t.chat_id == request.chat_id);
            if !in_chat || self.messages.is_hidden_for(reply_to, &request.sender_id).await? {
                return Err(ChatError::invalid_reply_target(reply_to.as_str()));
            }
        }

        let sequence = self.sequencer.enter(&request.chat_id).await;
        Ok((
            sequence,
            NewMessage {
                chat_id: request.chat_id.clone(),
                sender_id: request.sender_id.clone(),
                content,
                media_ref,
                reply_to: request.reply_to.clone(),
            },
        ))
    }

    /// `None` when there is nothing to tombstone.
    async fn prepare_unsend(
        &self,
        chat_id: &str,
        message_id: &str,
        user_id: &str,
    ) -> ChatResult<Option<SequenceGuard>> {
        if message_id.starts_with(TEMPORARY_ID_PREFIX) {
            debug!(chat_id, message_id, "unsend of unpersisted message");
            return Ok(None);
        }

        let Some(message) = self.messages.find_by_id(message_id).await? else {
            debug!(chat_id, message_id, "unsend of unknown message");
            return Ok(None);
        };
        if message.chat_id != chat_id {
            return Err(ChatError::message_not_found(message_id));
        }

        PermissionChecker::is_sender(&message, user_id).inspect_err(|_| {
            warn!(chat_id, message_id, user_id, "rejected unsend by non-sender");
        })?;

        if message.is_tombstoned() {
            return Ok(None);
        }

        let age = (timestamp::now() - message.sent_at).to_std().unwrap_or_default();
        if age > self.settings.unsend_window {
            return Err(ChatError::UnsendWindowExpired {
                window_seconds: self.settings.unsend_window.as_secs(),
            });
        }

        Ok(Some(self.sequencer.enter(chat_id).await))
    }

    async fn hide_for_self(&self, chat_id: &str, message_id: &str, user_id: &str) -> ChatResult<Outcome> {
        self.require_participant(chat_id, user_id).await?;
        self.message_in_chat(chat_id, message_id).await?;

        let hidden = self.messages.hide_for_user(message_id, user_id).await?;
        debug!(chat_id, message_id, user_id, hidden, "message hidden for user");
        Ok(hidden.into())
    }

    async fn prepare_delete_for_all(
        &self,
        chat_id: &str,
        message_id: &str,
        user_id: &str,
    ) -> ChatResult<SequenceGuard> {
        let requester = self
            .participants
            .find(chat_id, user_id)
            .await?
            .ok_or_else(|| self.reject_non_participant(chat_id, user_id))?;
        let message = self.message_in_chat(chat_id, message_id).await?;
        PermissionChecker::can_delete_for_all(&message, &requester)?;

        Ok(self.sequencer.enter(chat_id).await)
    }

    async fn prepare_edit(
        &self,
        chat_id: &str,
        message_id: &str,
        user_id: &str,
        content: &str,
    ) -> ChatResult<(SequenceGuard, Message)> {
        if content.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        self.check_length(content)?;

        self.require_participant(chat_id, user_id).await?;
        let message = self.message_in_chat(chat_id, message_id).await?;
        PermissionChecker::is_sender(&message, user_id)?;

        if message.is_tombstoned() {
            return Err(ChatError::tombstoned(message_id));
        }

        Ok((self.sequencer.enter(chat_id).await, message))
    }

    /// `None` when the reader sent the message themselves.
    async fn prepare_mark_read(
        &self,
        chat_id: &str,
        message_id: &str,
        user_id: &str,
    ) -> ChatResult<Option<SequenceGuard>> {
        self.require_participant(chat_id, user_id).await?;
        let message = self.message_in_chat(chat_id, message_id).await?;

        if message.sender_id == user_id {
            return Ok(None);
        }

        Ok(Some(self.sequencer.enter(chat_id).await))
    }

    async fn list_inner(&self, chat_id: &str, viewer_id: &str, page: PageRequest) -> ChatResult<MessagePage> {
        self.require_participant(chat_id, viewer_id).await?;

        let limit = page
            .limit
            .unwrap_or(self.settings.default_page_size)
            .clamp(1, self.settings.max_page_size.max(1));

        let before = match page.before.as_deref() {
            Some(token) => Some(
                MessageCursor::decode(token).ok_or_else(|| ChatError::validation("Invalid cursor"))?,
            ),
            None => None,
        };

        let mut rows = self
            .messages
            .page(chat_id, viewer_id, i64::from(limit) + 1, before.as_ref())
            .await?;

        let has_more = rows.len() > limit as usize;
        rows.truncate(limit as usize);

        let next_cursor = if has_more {
            rows.last().map(|m| m.cursor().encode())
        } else {
            None
        };

        Ok(MessagePage {
            messages: rows.into_iter().map(MessageView::from).collect(),
            next_cursor,
        })
    }

    async fn require_participant(&self, chat_id: &str, user_id: &str) -> ChatResult<()> {
        if self.participants.is_participant(chat_id, user_id).await? {
            Ok(())
        } else {
            Err(self.reject_non_participant(chat_id, user_id))
        }
    }

    fn reject_non_participant(&self, chat_id: &str, user_id: &str) -> ChatError {
        warn!(chat_id, user_id, "rejected request from non-participant");
        ChatError::not_participant(chat_id)
    }

    async fn message_in_chat(&self, chat_id: &str, message_id: &str) -> ChatResult<Message> {
        match self.messages.find_by_id(message_id).await? {
            Some(message) if message.chat_id == chat_id => Ok(message),
            _ => Err(ChatError::message_not_found(message_id)),
        }
    }

    fn check_length(&self, content: &str) -> ChatResult<()> {
        let max = self.settings.max_content_length;
        if content.chars().count() > max {
            return Err(ChatError::validation(format!(
                "Message content exceeds {max} characters"
            )));
        }
        Ok(())
    }
}

/// Persists and publishes while `sequence` is held. The work runs on its own
/// task, so a caller that stops waiting cannot split a commit from its event.
async fn run_to_completion<T>(
    sequence: SequenceGuard,
    work: impl Future<Output = ChatResult<T>> + Send + 'static,
) -> ChatResult<T>
where
    T: Send + 'static,
{
    tokio::spawn(async move {
        let result = work.await;
        drop(sequence);
        result
    })
    .await
    .map_err(|error| ChatError::internal(format!("commit task failed: {error}")))?
}
