//! CRUD operations for [`User`] records.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use courier_shared::{UserId, UserStatus};

use crate::codec::{decode_enum, decode_ts, encode_ts};
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::User;

const USER_COLUMNS: &str = "id, username, email, status, last_seen, created_at";

impl Database {
    /// Insert a new user.  Fails with [`StoreError::Duplicate`] when the
    /// username or email is already taken.
    pub fn insert_user(&self, user: &User) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO users (id, username, email, status, last_seen, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    user.id.as_str(),
                    user.username,
                    user.email,
                    user.status.as_str(),
                    encode_ts(&user.last_seen),
                    encode_ts(&user.created_at),
                ],
            )
            .map_err(StoreError::from_write)?;
        Ok(())
    }

    pub fn get_user(&self, id: &UserId) -> Result<User> {
        self.conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id.as_str()],
                row_to_user,
            )
            .map_err(StoreError::from_lookup)
    }

    pub fn user_exists(&self, id: &UserId) -> Result<bool> {
        let found: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM users WHERE id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// List all users ordered by username.
    pub fn list_users(&self) -> Result<Vec<User>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY username ASC"))?;

        let rows = stmt.query_map([], row_to_user)?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }

    /// List users with the given status, ordered by username.
    pub fn list_users_by_status(&self, status: UserStatus) -> Result<Vec<User>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE status = ?1 ORDER BY username ASC"
        ))?;

        let rows = stmt.query_map(params![status.as_str()], row_to_user)?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }

    /// Set a user's status; `last_seen` moves to `at` as well.
    pub fn update_user_status(&self, id: &UserId, status: UserStatus, at: DateTime<Utc>) -> Result<User> {
        let affected = self.conn().execute(
            "UPDATE users SET status = ?1, last_seen = ?2 WHERE id = ?3",
            params![status.as_str(), encode_ts(&at), id.as_str()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        self.get_user(id)
    }

    pub fn touch_user_last_seen(&self, id: &UserId, at: DateTime<Utc>) -> Result<User> {
        let affected = self.conn().execute(
            "UPDATE users SET last_seen = ?1 WHERE id = ?2",
            params![encode_ts(&at), id.as_str()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        self.get_user(id)
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id: String = row.get(0)?;
    let username: String = row.get(1)?;
    let email: String = row.get(2)?;
    let status_str: String = row.get(3)?;
    let last_seen_str: String = row.get(4)?;
    let created_str: String = row.get(5)?;

    Ok(User {
        id: UserId(id),
        username,
        email,
        status: decode_enum(3, &status_str)?,
        last_seen: decode_ts(4, &last_seen_str)?,
        created_at: decode_ts(5, &created_str)?,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::codec::timestamp_now;

    pub(crate) fn sample_user(id: &str, username: &str) -> User {
        let now = timestamp_now();
        User {
            id: UserId::from(id),
            username: username.to_string(),
            email: format!("{username}@example.com"),
            status: UserStatus::Offline,
            last_seen: now,
            created_at: now,
        }
    }

    #[test]
    fn insert_and_get() {
        let db = Database::open_in_memory().unwrap();
        let user = sample_user("1", "alice");
        db.insert_user(&user).unwrap();

        assert_eq!(db.get_user(&user.id).unwrap(), user);
        assert!(db.user_exists(&user.id).unwrap());
        assert!(!db.user_exists(&UserId::from("nobody")).unwrap());
    }

    #[test]
    fn missing_user_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(
            db.get_user(&UserId::from("ghost")),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn duplicate_username_and_email_rejected() {
        let db = Database::open_in_memory().unwrap();
        db.insert_user(&sample_user("1", "alice")).unwrap();

        let same_name = sample_user("2", "alice");
        match db.insert_user(&same_name) {
            Err(StoreError::Duplicate { field }) => assert_eq!(field, "users.username"),
            other => panic!("expected duplicate username, got {other:?}"),
        }

        let mut same_email = sample_user("3", "bob");
        same_email.email = "alice@example.com".into();
        match db.insert_user(&same_email) {
            Err(StoreError::Duplicate { field }) => assert_eq!(field, "users.email"),
            other => panic!("expected duplicate email, got {other:?}"),
        }
    }

    #[test]
    fn status_updates_and_listing() {
        let db = Database::open_in_memory().unwrap();
        db.insert_user(&sample_user("1", "carol")).unwrap();
        db.insert_user(&sample_user("2", "alice")).unwrap();

        let names: Vec<_> = db.list_users().unwrap().into_iter().map(|u| u.username).collect();
        assert_eq!(names, vec!["alice", "carol"]);

        let later = timestamp_now() + chrono::Duration::seconds(5);
        let updated = db
            .update_user_status(&UserId::from("1"), UserStatus::Online, later)
            .unwrap();
        assert_eq!(updated.status, UserStatus::Online);
        assert_eq!(updated.last_seen, later);

        let online = db.list_users_by_status(UserStatus::Online).unwrap();
        assert_eq!(online.len(), 1);
        assert_eq!(online[0].username, "carol");

        assert!(matches!(
            db.update_user_status(&UserId::from("9"), UserStatus::Away, later),
            Err(StoreError::NotFound)
        ));
    }
}
