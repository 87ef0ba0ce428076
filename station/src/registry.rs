use crate::errors::{Error, Result};
use crate::metrics::{CALLBACK_FAILURES_TOTAL, INBOUND_REJECTED_TOTAL, INBOUND_WRITES_TOTAL};
use crate::property::{ChangeCallback, Permission, Property, UpdatePolicy, Value};
use std::collections::HashMap;
use tokio::time::Instant;
use tracing::{debug, warn};

/// A value that has to be pushed to the cloud
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundUpdate {
    pub name: String,
    pub value: Value,
}

/// Result of applying a cloud-side write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InboundOutcome {
    pub callback_invoked: bool,
    pub callback_failed: bool,
}

/// Properties in registration order, each registered exactly once.
///
/// Registration is rejected for a name that already exists; the first
/// registration stays in place untouched.
#[derive(Debug, Default)]
pub struct PropertyRegistry {
    properties: Vec<Property>,
    index: HashMap<String, usize>,
}

impl PropertyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: &str,
        default: impl Into<Value>,
        permission: Permission,
        policy: UpdatePolicy,
        on_change: Option<ChangeCallback>,
    ) -> Result<()> {
        if self.index.contains_key(name) {
            return Err(Error::DuplicateProperty(name.to_string()));
        }

        let property = Property::new(name, default.into(), permission, policy, on_change);
        debug!("Registered property {:?}", property);

        self.index.insert(name.to_string(), self.properties.len());
        self.properties.push(property);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Property> {
        self.index.get(name).map(|&i| &self.properties[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Property> {
        self.properties.iter()
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    fn get_mut(&mut self, name: &str) -> Result<&mut Property> {
        match self.index.get(name) {
            Some(&i) => Ok(&mut self.properties[i]),
            None => Err(Error::UnknownProperty(name.to_string())),
        }
    }

    /// Device-side write from sensor acquisition. Allowed for every
    /// permission; the callback is reserved for inbound writes.
    pub fn set_local(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        let property = self.get_mut(name)?;
        let value = coerce_for(property, value.into())?;
        property.store(value);
        Ok(())
    }

    /// Cloud-side write. Read-only properties are never touched.
    ///
    /// The callback runs after the value is stored. A failing callback is
    /// logged and counted but the stored value stays.
    pub fn apply_inbound(
        &mut self,
        name: &str,
        value: Value,
        now: Instant,
    ) -> Result<InboundOutcome> {
        let property = match self.get_mut(name) {
            Ok(p) => p,
            Err(e) => {
                INBOUND_REJECTED_TOTAL.inc();
                return Err(e);
            }
        };

        if property.permission() == Permission::Read {
            INBOUND_REJECTED_TOTAL.inc();
            return Err(Error::ReadOnly(name.to_string()));
        }

        let value = match coerce_for(property, value) {
            Ok(v) => v,
            Err(e) => {
                INBOUND_REJECTED_TOTAL.inc();
                return Err(e);
            }
        };

        property.store(value.clone());
        // Came from the cloud, so no need to echo it back
        property.mark_synced(now);
        INBOUND_WRITES_TOTAL.inc();

        let Some(callback) = property.callback() else {
            return Ok(InboundOutcome {
                callback_invoked: false,
                callback_failed: false,
            });
        };

        let callback_failed = match callback(&value) {
            Ok(()) => false,
            Err(e) => {
                warn!("Change callback for {} failed: {}", name, e);
                CALLBACK_FAILURES_TOTAL.inc();
                true
            }
        };

        Ok(InboundOutcome {
            callback_invoked: true,
            callback_failed,
        })
    }

    /// Every property due at `now`. Nothing is recorded until the caller
    /// confirms delivery with `mark_sent`, so a failed publish stays due.
    pub fn due(&self, now: Instant) -> Vec<OutboundUpdate> {
        self.properties
            .iter()
            .filter(|p| p.is_due(now))
            .map(|p| OutboundUpdate {
                name: p.name().to_string(),
                value: p.value().clone(),
            })
            .collect()
    }

    /// Record `update` as delivered at `now`
    pub fn mark_sent(&mut self, update: &OutboundUpdate, now: Instant) -> Result<()> {
        let property = self.get_mut(&update.name)?;
        property.mark_sent(update.value.clone(), now);
        Ok(())
    }
}

fn coerce_for(property: &Property, value: Value) -> Result<Value> {
    let found = value.kind();
    value.coerce(property.kind()).ok_or_else(|| Error::TypeMismatch {
        name: property.name().to_string(),
        expected: property.kind(),
        found,
    })
}
