use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What the station publishes for each property
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyUpdate {
    pub value: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Cloud-side write to a read-write property
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyWrite {
    pub value: serde_json::Value,
}
