//! # courier-shared
//!
//! Types shared by every Courier crate: identifiers, enums persisted by the
//! store, the JSON envelopes carried over the broker, and the topic contract.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod topics;
pub mod types;

pub use error::ParseError;
pub use protocol::{MessageEnvelope, ReadReceipt, ReceiptEnvelope, ReceiptScope};
pub use topics::TopicKind;
pub use types::{ChannelId, ChatId, ChatKind, MessageId, MessageType, UserId, UserStatus};
