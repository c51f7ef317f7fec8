//! # courier-store
//!
//! Persistent storage for Courier, backed by SQLite.
//!
//! The crate exposes a `Database` handle that wraps a `rusqlite::Connection`
//! and provides typed CRUD helpers for the three collections: users, chats
//! (with their participants) and messages (with their read receipts).
//! Uniqueness of `users.username`, `users.email` and `chats.channel_id` is
//! enforced by the schema and surfaced as [`StoreError::Duplicate`].

pub mod chats;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod users;

mod codec;
mod error;

pub use chats::ParticipantFlag;
pub use codec::timestamp_now;
pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
