//! Chat Directory: resolves and creates chats and owns their membership.
//!
//! Direct chats are keyed by a channel id derived from the sorted participant
//! pair.  The store's unique constraint on that id is the only thing that
//! serialises concurrent creators; whoever loses the insert re-reads the
//! winner's row.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use courier_shared::constants::MAX_GROUP_NAME_CHARS;
use courier_shared::{ChannelId, ChatId, ChatKind, UserId};
use courier_store::{timestamp_now, Chat, Database, ParticipantFlag, StoreError};

use crate::error::ChatError;

/// A direct chat and whether this call created it.
#[derive(Debug, Clone, Serialize)]
pub struct Resolved {
    pub chat: Chat,
    pub created: bool,
}

#[derive(Clone)]
pub struct ChatDirectory {
    db: Arc<Database>,
}

impl ChatDirectory {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Return the direct chat between `user_a` and `user_b`, creating it on
    /// first use with `user_a` as creator.
    pub fn resolve_or_create_direct(
        &self,
        user_a: &UserId,
        user_b: &UserId,
    ) -> Result<Resolved, ChatError> {
        if user_a == user_b {
            return Err(ChatError::InvalidArgument(
                "a direct chat needs two distinct users".into(),
            ));
        }
        self.require_users([user_a, user_b])?;

        let channel_id = ChannelId::direct(user_a, user_b);
        if let Some(chat) = self.db.find_chat_by_channel(&channel_id)? {
            return Ok(Resolved {
                chat,
                created: false,
            });
        }

        let now = timestamp_now();
        let chat = Chat {
            id: ChatId::new(),
            channel_id: channel_id.clone(),
            kind: ChatKind::Direct,
            name: None,
            participants: vec![user_a.clone(), user_b.clone()],
            created_by: user_a.clone(),
            last_activity: now,
            created_at: now,
            muted_by: Vec::new(),
            archived_by: Vec::new(),
        };

        match self.db.insert_chat(&chat) {
            Ok(()) => {
                info!(chat_id = %chat.id, channel = %channel_id, "Direct chat created");
                Ok(Resolved {
                    chat,
                    created: true,
                })
            }
            Err(StoreError::Duplicate { .. }) => {
                debug!(channel = %channel_id, "Lost direct chat creation race, reading winner");
                let chat = self
                    .db
                    .find_chat_by_channel(&channel_id)?
                    .ok_or(ChatError::NotFound("Chat"))?;
                Ok(Resolved {
                    chat,
                    created: false,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Create a group chat.  The creator comes first, then `participant_ids`
    /// in input order with duplicates dropped.  Identical calls create
    /// distinct chats.
    pub fn create_group(
        &self,
        creator_id: &UserId,
        participant_ids: &[UserId],
        name: &str,
    ) -> Result<Chat, ChatError> {
        let name = name.trim();
        let name_len = name.chars().count();
        if name_len == 0 || name_len > MAX_GROUP_NAME_CHARS {
            return Err(ChatError::InvalidArgument(format!(
                "group name must be 1 to {MAX_GROUP_NAME_CHARS} characters"
            )));
        }
        if participant_ids.is_empty() {
            return Err(ChatError::InvalidArgument(
                "a group needs at least one other participant".into(),
            ));
        }

        let mut participants = vec![creator_id.clone()];
        for id in participant_ids {
            if !participants.contains(id) {
                participants.push(id.clone());
            }
        }
        if participants.len() < 2 {
            return Err(ChatError::InvalidArgument(
                "a group needs at least two distinct participants".into(),
            ));
        }
        self.require_users(&participants)?;

        let now = timestamp_now();
        let chat = Chat {
            id: ChatId::new(),
            channel_id: ChannelId::group(),
            kind: ChatKind::Group,
            name: Some(name.to_string()),
            participants,
            created_by: creator_id.clone(),
            last_activity: now,
            created_at: now,
            muted_by: Vec::new(),
            archived_by: Vec::new(),
        };
        self.db.insert_chat(&chat)?;

        info!(
            chat_id = %chat.id,
            channel = %chat.channel_id,
            members = chat.participants.len(),
            "Group chat created"
        );
        Ok(chat)
    }

    /// Chats the user takes part in, most recently active first.
    pub fn get_for_user(&self, user_id: &UserId) -> Result<Vec<Chat>, ChatError> {
        Ok(self.db.list_chats_for_user(user_id)?)
    }

    pub fn get_by_id(&self, chat_id: ChatId) -> Result<Chat, ChatError> {
        self.db.get_chat(chat_id).map_err(ChatError::lookup("Chat"))
    }

    pub fn get_by_channel(&self, channel_id: &ChannelId) -> Result<Chat, ChatError> {
        self.db
            .find_chat_by_channel(channel_id)?
            .ok_or(ChatError::NotFound("Chat"))
    }

    pub fn channel_ids(&self) -> Result<Vec<ChannelId>, ChatError> {
        Ok(self.db.list_channel_ids()?)
    }

    /// Returns the chat's activity time after the bump.
    pub fn bump_activity(&self, chat_id: ChatId) -> Result<DateTime<Utc>, ChatError> {
        self.db
            .touch_chat_activity(chat_id, timestamp_now())
            .map_err(ChatError::lookup("Chat"))
    }

    pub fn add_participant(&self, chat_id: ChatId, user_id: &UserId) -> Result<Chat, ChatError> {
        let chat = self.get_by_id(chat_id)?;
        require_group(&chat)?;
        self.require_users([user_id])?;

        if self.db.add_participant(chat_id, user_id)? {
            info!(chat_id = %chat_id, user_id = %user_id, "Participant added");
        }
        self.get_by_id(chat_id)
    }

    /// Drop a participant from a group.  Removing a non-member is a no-op;
    /// a group never shrinks below two members.
    pub fn remove_participant(&self, chat_id: ChatId, user_id: &UserId) -> Result<Chat, ChatError> {
        let chat = self.get_by_id(chat_id)?;
        require_group(&chat)?;

        if !chat.is_participant(user_id) {
            return Ok(chat);
        }
        if chat.participants.len() <= 2 {
            return Err(ChatError::InvalidArgument(
                "a group cannot have fewer than two participants".into(),
            ));
        }

        self.db.remove_participant(chat_id, user_id)?;
        info!(chat_id = %chat_id, user_id = %user_id, "Participant removed");
        self.get_by_id(chat_id)
    }

    pub fn set_muted(&self, chat_id: ChatId, user_id: &UserId, muted: bool) -> Result<Chat, ChatError> {
        self.set_flag(chat_id, user_id, ParticipantFlag::Muted, muted)
    }

    pub fn set_archived(
        &self,
        chat_id: ChatId,
        user_id: &UserId,
        archived: bool,
    ) -> Result<Chat, ChatError> {
        self.set_flag(chat_id, user_id, ParticipantFlag::Archived, archived)
    }

    fn set_flag(
        &self,
        chat_id: ChatId,
        user_id: &UserId,
        flag: ParticipantFlag,
        value: bool,
    ) -> Result<Chat, ChatError> {
        let chat = self.get_by_id(chat_id)?;
        if !chat.is_participant(user_id)
            || !self.db.set_participant_flag(chat_id, user_id, flag, value)?
        {
            return Err(ChatError::PermissionDenied(format!(
                "user {user_id} is not a participant of chat {chat_id}"
            )));
        }
        debug!(chat_id = %chat_id, user_id = %user_id, ?flag, value, "Participant flag set");
        self.get_by_id(chat_id)
    }

    fn require_users<'a>(&self, ids: impl IntoIterator<Item = &'a UserId>) -> Result<(), ChatError> {
        for id in ids {
            if !self.db.user_exists(id)? {
                return Err(ChatError::InvalidArgument(format!("user {id} does not exist")));
            }
        }
        Ok(())
    }
}

fn require_group(chat: &Chat) -> Result<(), ChatError> {
    if chat.kind != ChatKind::Group {
        return Err(ChatError::InvalidArgument(
            "membership of a direct chat is fixed".into(),
        ));
    }
    Ok(())
}
