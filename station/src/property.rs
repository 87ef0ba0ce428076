use crate::errors::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Scalar value carried by a cloud property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Float(f64),
    Text(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Int,
    Float,
    Text,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKind::Int => write!(f, "integer"),
            ValueKind::Float => write!(f, "float"),
            ValueKind::Text => write!(f, "text"),
        }
    }
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::Text(_) => ValueKind::Text,
        }
    }

    /// Convert to `kind` when the conversion is lossless enough for the wire.
    /// Integers widen to floats; nothing else converts.
    pub fn coerce(self, kind: ValueKind) -> Option<Value> {
        match (self, kind) {
            (v, k) if v.kind() == k => Some(v),
            (Value::Int(i), ValueKind::Float) => Some(Value::Float(i as f64)),
            _ => None,
        }
    }

    /// Equality used for change detection. NaN equals NaN so a stuck
    /// sensor does not republish forever.
    pub fn same_as(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Float(a), Value::Float(b)) => a == b || (a.is_nan() && b.is_nan()),
            (a, b) => a == b,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            Value::Text(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

/// Who may write the property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Device writes, cloud only reads
    Read,
    /// Cloud may write back
    ReadWrite,
}

/// When a property is pushed to the cloud
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePolicy {
    /// At most once per interval, latest value at flush time
    Every(Duration),
    /// Only when the value differs from the last one sent
    OnChange,
}

impl fmt::Display for UpdatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdatePolicy::Every(d) => write!(f, "every {}ms", d.as_millis()),
            UpdatePolicy::OnChange => write!(f, "on change"),
        }
    }
}

/// Invoked after an inbound write has stored the new value
pub type ChangeCallback = Arc<dyn Fn(&Value) -> Result<()> + Send + Sync>;

pub struct Property {
    name: String,
    value: Value,
    permission: Permission,
    policy: UpdatePolicy,
    on_change: Option<ChangeCallback>,
    last_sent: Option<Value>,
    last_sent_at: Option<Instant>,
}

impl Property {
    pub fn new(
        name: impl Into<String>,
        value: Value,
        permission: Permission,
        policy: UpdatePolicy,
        on_change: Option<ChangeCallback>,
    ) -> Self {
        Self {
            name: name.into(),
            value,
            permission,
            policy,
            on_change,
            last_sent: None,
            last_sent_at: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn kind(&self) -> ValueKind {
        self.value.kind()
    }

    pub fn permission(&self) -> Permission {
        self.permission
    }

    pub fn policy(&self) -> UpdatePolicy {
        self.policy
    }

    pub fn has_callback(&self) -> bool {
        self.on_change.is_some()
    }

    pub(crate) fn callback(&self) -> Option<ChangeCallback> {
        self.on_change.clone()
    }

    pub(crate) fn store(&mut self, value: Value) {
        self.value = value;
    }

    /// Treat the current value as already known to the cloud
    pub(crate) fn mark_synced(&mut self, now: Instant) {
        self.mark_sent(self.value.clone(), now);
    }

    /// Record what the cloud actually received, which may be older than
    /// the current value
    pub(crate) fn mark_sent(&mut self, value: Value, now: Instant) {
        self.last_sent = Some(value);
        self.last_sent_at = Some(now);
    }

    pub fn is_due(&self, now: Instant) -> bool {
        let (Some(last), Some(at)) = (&self.last_sent, self.last_sent_at) else {
            return true;
        };

        match self.policy {
            UpdatePolicy::Every(interval) => now.saturating_duration_since(at) >= interval,
            UpdatePolicy::OnChange => !self.value.same_as(last),
        }
    }
}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("name", &self.name)
            .field("value", &self.value)
            .field("permission", &self.permission)
            .field("policy", &self.policy)
            .field("has_callback", &self.on_change.is_some())
            .finish()
    }
}
