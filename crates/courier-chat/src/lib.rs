//! # courier-chat
//!
//! The chat core.  [`ChatDirectory`] resolves and creates chats,
//! [`MessageLedger`] stores messages and read receipts, and
//! [`DeliveryRelay`] mirrors both onto broker topics.  [`ChatService`] wires
//! them together for callers and reports delivery separately from
//! persistence.

pub mod directory;
pub mod error;
pub mod ledger;
pub mod relay;
pub mod service;
pub mod users;

pub use directory::{ChatDirectory, Resolved};
pub use error::ChatError;
pub use ledger::{Appended, ChatRead, MessageLedger};
pub use relay::{DeliveryRelay, InboundEvent};
pub use service::{log_delivery, ChatService, Relayed};
pub use users::UserRegistry;
