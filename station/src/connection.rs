use crate::errors::{Error, Result};
use rumqttc::MqttOptions;
use std::fmt;
use std::time::Duration;

const KEEP_ALIVE_SECS: u64 = 30;

/// Network identifier and secret, immutable once built
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    identifier: String,
    secret: String,
}

impl Credentials {
    pub fn new(identifier: impl Into<String>, secret: impl Into<String>) -> Result<Self> {
        let identifier = identifier.into();
        let secret = secret.into();

        if identifier.trim().is_empty() {
            return Err(Error::Validation("Network identifier cannot be empty".to_string()));
        }
        if secret.is_empty() {
            return Err(Error::Validation("Network secret cannot be empty".to_string()));
        }

        Ok(Self { identifier, secret })
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("identifier", &self.identifier)
            .field("secret", &"***")
            .finish()
    }
}

/// Hands the broker address and credentials to the cloud transport.
/// Reconnection and keep-alive are left to rumqttc.
#[derive(Debug, Clone)]
pub struct ConnectionProvider {
    broker: String,
    port: u16,
    client_id: String,
    credentials: Credentials,
}

impl ConnectionProvider {
    pub fn new(
        broker: impl Into<String>,
        port: u16,
        client_id: impl Into<String>,
        credentials: Credentials,
    ) -> Self {
        Self {
            broker: broker.into(),
            port,
            client_id: client_id.into(),
            credentials,
        }
    }

    pub fn broker(&self) -> &str {
        &self.broker
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn mqtt_options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.broker, self.port);
        options.set_keep_alive(Duration::from_secs(KEEP_ALIVE_SECS));
        options.set_clean_session(false);
        options.set_credentials(self.credentials.identifier(), self.credentials.secret());
        options
    }
}
