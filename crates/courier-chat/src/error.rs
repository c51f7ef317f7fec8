use thiserror::Error;

use courier_net::BrokerError;
use courier_store::StoreError;

/// Failure taxonomy of the chat core.
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// Publishing to the broker failed.  Whatever was persisted stays.
    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl ChatError {
    /// Classify a store error, naming the entity a missing row refers to.
    pub(crate) fn lookup(entity: &'static str) -> impl FnOnce(StoreError) -> ChatError {
        move |err| match err {
            StoreError::NotFound => ChatError::NotFound(entity),
            other => other.into(),
        }
    }

    pub fn is_delivery(&self) -> bool {
        matches!(self, ChatError::DeliveryFailed(_))
    }
}

impl From<StoreError> for ChatError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ChatError::NotFound("Record"),
            StoreError::Duplicate { field } => {
                let column = field.rsplit('.').next().unwrap_or(&field).to_string();
                ChatError::Conflict(format!("{column} already exists"))
            }
            other => ChatError::Unavailable(other.to_string()),
        }
    }
}

impl From<BrokerError> for ChatError {
    fn from(err: BrokerError) -> Self {
        ChatError::DeliveryFailed(err.to_string())
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::DeliveryFailed(format!("envelope encoding: {err}"))
    }
}
