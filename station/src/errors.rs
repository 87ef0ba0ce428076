use crate::property::ValueKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    #[error("Property {0} is already registered")]
    DuplicateProperty(String),

    #[error("Unknown property: {0}")]
    UnknownProperty(String),

    #[error("Property {0} is read-only")]
    ReadOnly(String),

    #[error("Property {name} expects {expected}, got {found}")]
    TypeMismatch {
        name: String,
        expected: ValueKind,
        found: ValueKind,
    },

    #[error("Epoch {0} is not a valid timestamp")]
    InvalidEpoch(i64),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Channel send error")]
    ChannelSend,
}

pub type Result<T> = std::result::Result<T, Error>;
