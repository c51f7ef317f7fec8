//! User registry: creation with uniqueness, status and presence updates.

use std::sync::Arc;

use tracing::info;

use courier_shared::constants::{MAX_USERNAME_CHARS, MIN_USERNAME_CHARS};
use courier_shared::{UserId, UserStatus};
use courier_store::{timestamp_now, Database, User};

use crate::error::ChatError;

#[derive(Clone)]
pub struct UserRegistry {
    db: Arc<Database>,
}

impl UserRegistry {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Register a user.  Username and email are normalised first; either one
    /// already in use yields [`ChatError::Conflict`].
    pub fn create(&self, username: &str, email: &str) -> Result<User, ChatError> {
        let username = normalize_username(username)?;
        let email = normalize_email(email)?;

        let now = timestamp_now();
        let user = User {
            id: UserId::generate(),
            username,
            email,
            status: UserStatus::Offline,
            last_seen: now,
            created_at: now,
        };
        self.db.insert_user(&user)?;

        info!(user_id = %user.id, username = %user.username, "User created");
        Ok(user)
    }

    pub fn get(&self, id: &UserId) -> Result<User, ChatError> {
        self.db.get_user(id).map_err(ChatError::lookup("User"))
    }

    pub fn list(&self) -> Result<Vec<User>, ChatError> {
        Ok(self.db.list_users()?)
    }

    pub fn list_online(&self) -> Result<Vec<User>, ChatError> {
        Ok(self.db.list_users_by_status(UserStatus::Online)?)
    }

    /// Set the status; `last_seen` moves to now as well.
    pub fn update_status(&self, id: &UserId, status: UserStatus) -> Result<User, ChatError> {
        self.db
            .update_user_status(id, status, timestamp_now())
            .map_err(ChatError::lookup("User"))
    }

    pub fn touch_last_seen(&self, id: &UserId) -> Result<User, ChatError> {
        self.db
            .touch_user_last_seen(id, timestamp_now())
            .map_err(ChatError::lookup("User"))
    }

    /// Username for envelopes, `None` when the sender is unknown.
    pub fn display_name(&self, id: &UserId) -> Option<String> {
        self.db.get_user(id).ok().map(|u| u.username)
    }
}

fn normalize_username(raw: &str) -> Result<String, ChatError> {
    let username = raw.trim();
    let len = username.chars().count();
    if !(MIN_USERNAME_CHARS..=MAX_USERNAME_CHARS).contains(&len) {
        return Err(ChatError::InvalidArgument(format!(
            "username must be {MIN_USERNAME_CHARS} to {MAX_USERNAME_CHARS} characters"
        )));
    }
    if !username.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ChatError::InvalidArgument(
            "username must be alphanumeric".into(),
        ));
    }
    Ok(username.to_string())
}

fn normalize_email(raw: &str) -> Result<String, ChatError> {
    let email = raw.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if !valid {
        return Err(ChatError::InvalidArgument(format!("invalid email: {raw}")));
    }
    Ok(email)
}
