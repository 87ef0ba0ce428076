use crate::connection::{ConnectionProvider, Credentials};
use crate::errors::Result;
use clap::Parser;
use std::time::Duration;

#[derive(Debug, Clone, Parser)]
#[command(name = "station", about = "Weather station cloud property sync")]
pub struct Config {
    /// MQTT broker host
    #[arg(long, env = "MQTT_BROKER", default_value = "localhost")]
    pub mqtt_broker: String,

    #[arg(long, env = "MQTT_PORT", default_value_t = 1883)]
    pub mqtt_port: u16,

    /// Thing the properties belong to
    #[arg(long, env = "THING_ID", default_value = "weather-station")]
    pub thing_id: String,

    #[arg(long, env = "TOPIC_PREFIX", default_value = "things")]
    pub topic_prefix: String,

    #[arg(long, env = "STATION_NETWORK_ID")]
    pub network_id: String,

    #[arg(long, env = "STATION_NETWORK_SECRET", hide_env_values = true)]
    pub network_secret: String,

    #[arg(long, env = "HTTP_ADDR", default_value = "0.0.0.0:8080")]
    pub http_addr: String,

    /// How often the sensors are sampled
    #[arg(long, env = "SAMPLE_INTERVAL_MS", default_value_t = 1000)]
    pub sample_interval_ms: u64,

    /// How often due properties are pushed to the cloud
    #[arg(long, env = "FLUSH_INTERVAL_MS", default_value_t = 500)]
    pub flush_interval_ms: u64,

    #[arg(long, env = "CHANNEL_CAPACITY", default_value_t = 64)]
    pub channel_capacity: usize,
}

impl Config {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms.max(1))
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.max(1))
    }

    /// Client id is stable across restarts so the broker resumes the
    /// persistent session instead of orphaning it
    pub fn client_id(&self) -> String {
        format!("station-{}", self.thing_id)
    }

    pub fn connection(&self) -> Result<ConnectionProvider> {
        let credentials = Credentials::new(&self.network_id, &self.network_secret)?;
        Ok(ConnectionProvider::new(
            &self.mqtt_broker,
            self.mqtt_port,
            self.client_id(),
            credentials,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_defaults() {
        let config = Config::try_parse_from([
            "station",
            "--network-id",
            "station",
            "--network-secret",
            "s3cret",
        ])
        .unwrap();

        assert_eq!(config.mqtt_port, 1883);
        assert_eq!(config.topic_prefix, "things");
        assert_eq!(config.flush_interval(), Duration::from_millis(500));

        let provider = config.connection().unwrap();
        assert_eq!(provider.credentials().identifier(), "station");
        assert_eq!(provider.client_id(), "station-weather-station");
    }

    #[test]
    fn test_client_id_stable_across_restarts() {
        let args = [
            "station",
            "--thing-id",
            "roof",
            "--network-id",
            "station",
            "--network-secret",
            "s3cret",
        ];
        let first = Config::try_parse_from(args).unwrap().connection().unwrap();
        let second = Config::try_parse_from(args).unwrap().connection().unwrap();
        assert_eq!(first.client_id(), "station-roof");
        assert_eq!(first.client_id(), second.client_id());
    }

    #[test]
    fn test_empty_secret_rejected() {
        let config = Config::try_parse_from([
            "station",
            "--network-id",
            "station",
            "--network-secret",
            "",
        ])
        .unwrap();

        assert!(config.connection().is_err());
    }
}
