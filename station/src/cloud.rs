use crate::clock::StationClock;
use crate::connection::ConnectionProvider;
use crate::errors::{Error, Result};
use crate::metrics::{
    INBOUND_REJECTED_TOTAL, PENDING_UPDATES, PROPERTIES_PUBLISHED_TOTAL, PUBLISH_FAILURES_TOTAL,
    SNAPSHOTS_TOTAL,
};
use crate::properties::apply_snapshot;
use crate::property::Value;
use crate::registry::{InboundOutcome, OutboundUpdate, PropertyRegistry};
use crate::weather::WeatherSnapshot;
use chrono::{DateTime, Utc};
use rumqttc::{AsyncClient, ClientError, Event, EventLoop, Packet, Publish, QoS};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 100;
const MAX_BACKOFF_MS: u64 = 2000;
const REQUEST_CAPACITY: usize = 100;
const INBOUND_CAPACITY: usize = 64;

pub type SharedRegistry = Arc<Mutex<PropertyRegistry>>;

/// Topic layout: `{prefix}/{thing}/properties/{name}` for updates and
/// `{prefix}/{thing}/properties/{name}/set` for cloud writes
#[derive(Debug, Clone)]
pub struct Topics {
    base: String,
}

impl Topics {
    pub fn new(prefix: &str, thing_id: &str) -> Self {
        Self {
            base: format!("{}/{}/properties", prefix.trim_end_matches('/'), thing_id),
        }
    }

    pub fn property(&self, name: &str) -> String {
        format!("{}/{}", self.base, name)
    }

    pub fn write_filter(&self) -> String {
        format!("{}/+/set", self.base)
    }

    /// Property name addressed by a write topic
    pub fn parse_write<'a>(&self, topic: &'a str) -> Option<&'a str> {
        let name = topic
            .strip_prefix(self.base.as_str())?
            .strip_prefix('/')?
            .strip_suffix("/set")?;
        if name.is_empty() || name.contains('/') {
            return None;
        }
        Some(name)
    }
}

/// Outbound payload
#[derive(Debug, Serialize, Deserialize)]
pub struct PropertyUpdate {
    pub value: Value,
    pub timestamp: DateTime<Utc>,
}

/// Inbound payload
#[derive(Debug, Serialize, Deserialize)]
pub struct PropertyWrite {
    pub value: Value,
}

/// Connect, then run the sync loop until the snapshot channel closes.
pub async fn run_cloud(
    connection: ConnectionProvider,
    topics: Topics,
    registry: SharedRegistry,
    clock: StationClock,
    snapshots: mpsc::Receiver<WeatherSnapshot>,
    flush_interval: Duration,
) -> Result<()> {
    info!(
        "Connecting to MQTT broker at {}:{} as {}",
        connection.broker(),
        connection.port(),
        connection.client_id()
    );

    let (client, eventloop) = AsyncClient::new(connection.mqtt_options(), REQUEST_CAPACITY);
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);

    let poller = tokio::spawn(run_eventloop(
        eventloop,
        client.clone(),
        topics.write_filter(),
        inbound_tx,
    ));

    let result = run_sync(
        &client,
        &topics,
        registry,
        clock,
        inbound_rx,
        snapshots,
        flush_interval,
    )
    .await;

    if let Err(e) = client.try_disconnect() {
        debug!("Disconnect request not delivered: {}", e);
    }
    poller.abort();
    result
}

/// Drive rumqttc and forward cloud writes. Subscribes again after every
/// fresh connection because the broker may not keep the session.
async fn run_eventloop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    write_filter: String,
    inbound_tx: mpsc::Sender<Publish>,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                info!("Connected to broker (session present: {})", ack.session_present);
                if !ack.session_present {
                    match client.try_subscribe(write_filter.as_str(), QoS::AtLeastOnce) {
                        Ok(()) => info!("Subscribed to {} with QoS 1", write_filter),
                        Err(e) => error!("Failed to subscribe to {}: {}", write_filter, e),
                    }
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                debug!(
                    "Received write on topic {}, size: {} bytes",
                    publish.topic,
                    publish.payload.len()
                );
                if inbound_tx.send(publish).await.is_err() {
                    info!("Inbound channel closed, stopping event loop");
                    break;
                }
            }
            Ok(_) => {}
            Err(e) => {
                error!("MQTT error: {}", e);
                // rumqttc reconnects on the next poll
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

async fn run_sync(
    client: &AsyncClient,
    topics: &Topics,
    registry: SharedRegistry,
    clock: StationClock,
    mut inbound: mpsc::Receiver<Publish>,
    mut snapshots: mpsc::Receiver<WeatherSnapshot>,
    flush_interval: Duration,
) -> Result<()> {
    info!("Starting cloud sync with flush interval {:?}", flush_interval);

    let mut ticker = tokio::time::interval(flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            publish = inbound.recv() => {
                let Some(publish) = publish else {
                    error!("MQTT event loop terminated");
                    return Err(Error::ChannelSend);
                };
                let mut registry = registry.lock().await;
                match process_write(&mut registry, topics, &publish.topic, &publish.payload, Instant::now()) {
                    Ok((name, outcome)) => {
                        info!("Applied cloud write to {} (callback failed: {})", name, outcome.callback_failed);
                    }
                    Err(e) => warn!("Rejected cloud write on {}: {}", publish.topic, e),
                }
            }

            snapshot = snapshots.recv() => {
                match snapshot {
                    Some(snapshot) => {
                        let mut registry = registry.lock().await;
                        if let Err(e) = apply_snapshot(&mut registry, &snapshot) {
                            error!("Failed to apply snapshot: {}", e);
                        } else {
                            SNAPSHOTS_TOTAL.inc();
                        }
                    }
                    None => {
                        info!("Snapshot channel closed, flushing remaining updates");
                        flush(client, topics, &registry, &clock).await;
                        break;
                    }
                }
            }

            _ = ticker.tick() => {
                flush(client, topics, &registry, &clock).await;
            }
        }
    }

    info!("Cloud sync stopped");
    Ok(())
}

async fn flush(
    client: &AsyncClient,
    topics: &Topics,
    registry: &SharedRegistry,
    clock: &StationClock,
) {
    // Lock only long enough to collect what is due
    let now = Instant::now();
    let updates = registry.lock().await.due(now);
    if updates.is_empty() {
        return;
    }

    PENDING_UPDATES.set(updates.len() as f64);
    debug!("Publishing {} property updates", updates.len());

    let timestamp = clock.now();
    let mut delivered = Vec::with_capacity(updates.len());
    for update in updates {
        let topic = topics.property(&update.name);
        let payload = match encode_update(&update, timestamp) {
            Ok(p) => p,
            Err(e) => {
                error!("Failed to serialize {}: {}", update.name, e);
                continue;
            }
        };

        match publish_with_retry(client, &topic, payload).await {
            Ok(()) => {
                PROPERTIES_PUBLISHED_TOTAL.inc();
                delivered.push(update);
            }
            Err(e) => {
                // Left unmarked so the next flush tries again
                error!("Failed to publish {}, will retry: {}", update.name, e);
                PUBLISH_FAILURES_TOTAL.inc();
            }
        }
    }

    let mut registry = registry.lock().await;
    for update in &delivered {
        if let Err(e) = registry.mark_sent(update, now) {
            error!("Failed to record delivery of {}: {}", update.name, e);
        }
    }
    PENDING_UPDATES.set(0.0);
}

/// Publish with exponential backoff while the request queue is full
async fn publish_with_retry(client: &AsyncClient, topic: &str, payload: Vec<u8>) -> Result<()> {
    let mut attempt = 0;
    let mut backoff_ms = INITIAL_BACKOFF_MS;

    loop {
        attempt += 1;

        match client.try_publish(topic, QoS::AtLeastOnce, true, payload.clone()) {
            Ok(()) => {
                if attempt > 1 {
                    info!("Published {} on attempt {}", topic, attempt);
                }
                return Ok(());
            }
            Err(e) => {
                let e = Error::Mqtt(e);
                if attempt >= MAX_RETRIES {
                    return Err(e);
                }

                if !is_retryable_error(&e) {
                    warn!("Non-retryable error: {}", e);
                    return Err(e);
                }

                warn!(
                    "Publish to {} failed (attempt {}/{}): {}. Retrying in {}ms...",
                    topic, attempt, MAX_RETRIES, e, backoff_ms
                );

                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
            }
        }
    }
}

pub fn encode_update(update: &OutboundUpdate, timestamp: DateTime<Utc>) -> Result<Vec<u8>> {
    let payload = PropertyUpdate {
        value: update.value.clone(),
        timestamp,
    };
    Ok(serde_json::to_vec(&payload)?)
}

/// Apply one cloud write. Every rejection is counted.
pub fn process_write(
    registry: &mut PropertyRegistry,
    topics: &Topics,
    topic: &str,
    payload: &[u8],
    now: Instant,
) -> Result<(String, InboundOutcome)> {
    let Some(name) = topics.parse_write(topic) else {
        INBOUND_REJECTED_TOTAL.inc();
        return Err(Error::Validation(format!("Unexpected topic {}", topic)));
    };

    let write = match serde_json::from_slice::<PropertyWrite>(payload) {
        Ok(w) => w,
        Err(e) => {
            INBOUND_REJECTED_TOTAL.inc();
            return Err(Error::Json(e));
        }
    };

    let outcome = registry.apply_inbound(name, write.value, now)?;
    Ok((name.to_string(), outcome))
}

/// Determine if an error is retryable
fn is_retryable_error(error: &Error) -> bool {
    match error {
        // Request queue full, the event loop will drain it
        Error::Mqtt(ClientError::TryRequest(_)) => true,
        Error::ChannelSend => true,

        Error::Mqtt(_) => false, // Event loop is gone
        Error::Validation(_) => false,
        Error::Json(_) => false,
        Error::DuplicateProperty(_) => false,
        Error::UnknownProperty(_) => false,
        Error::ReadOnly(_) => false,
        Error::TypeMismatch { .. } => false,
        Error::InvalidEpoch(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::{init_properties, BME_TEMP, EPOCH_TIME, RAIN_DAYS_AGO};
    use rumqttc::MqttOptions;

    fn station_registry(clock: &StationClock) -> PropertyRegistry {
        let mut registry = PropertyRegistry::new();
        init_properties(&mut registry, clock.epoch_callback()).unwrap();
        registry
    }

    #[test]
    fn test_topics() {
        let topics = Topics::new("things/", "ws-1");
        assert_eq!(topics.property("lux"), "things/ws-1/properties/lux");
        assert_eq!(topics.write_filter(), "things/ws-1/properties/+/set");
        assert_eq!(
            topics.parse_write("things/ws-1/properties/epoch_time/set"),
            Some("epoch_time")
        );
        assert_eq!(topics.parse_write("things/ws-1/properties/epoch_time"), None);
        assert_eq!(topics.parse_write("things/ws-2/properties/epoch_time/set"), None);
        assert_eq!(topics.parse_write("things/ws-1/properties//set"), None);
    }

    #[test]
    fn test_retryable_errors() {
        assert!(is_retryable_error(&Error::ChannelSend));
        assert!(!is_retryable_error(&Error::Validation("test".to_string())));
        assert!(!is_retryable_error(&Error::ReadOnly("lux".to_string())));
    }

    #[test]
    fn test_encode_update() {
        let update = OutboundUpdate {
            name: "temp_f".to_string(),
            value: Value::Float(71.5),
        };
        let timestamp = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let payload = encode_update(&update, timestamp).unwrap();

        let json: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(json["value"], 71.5);
        assert_eq!(json["timestamp"], "2023-11-14T22:13:20Z");
    }

    #[test]
    fn test_process_write_syncs_clock() {
        let clock = StationClock::new();
        let mut registry = station_registry(&clock);
        let topics = Topics::new("things", "ws-1");

        let (name, outcome) = process_write(
            &mut registry,
            &topics,
            "things/ws-1/properties/epoch_time/set",
            br#"{"value": 1700000000}"#,
            Instant::now(),
        )
        .unwrap();

        assert_eq!(name, EPOCH_TIME);
        assert!(outcome.callback_invoked);
        assert!(!outcome.callback_failed);
        assert!(clock.is_synced());
    }

    #[test]
    fn test_process_write_bad_epoch_keeps_value() {
        let clock = StationClock::new();
        let mut registry = station_registry(&clock);
        let topics = Topics::new("things", "ws-1");

        let (_, outcome) = process_write(
            &mut registry,
            &topics,
            "things/ws-1/properties/epoch_time/set",
            br#"{"value": -20}"#,
            Instant::now(),
        )
        .unwrap();

        assert!(outcome.callback_failed);
        assert!(!clock.is_synced());
        assert_eq!(registry.get(EPOCH_TIME).unwrap().value(), &Value::Int(-20));
    }

    #[test]
    fn test_process_write_rejects_read_only_and_garbage() {
        let clock = StationClock::new();
        let mut registry = station_registry(&clock);
        let topics = Topics::new("things", "ws-1");

        let result = process_write(
            &mut registry,
            &topics,
            "things/ws-1/properties/bme_temp/set",
            br#"{"value": 40.0}"#,
            Instant::now(),
        );
        assert!(matches!(result, Err(Error::ReadOnly(_))));
        assert_eq!(registry.get(BME_TEMP).unwrap().value(), &Value::Float(0.0));

        let result = process_write(
            &mut registry,
            &topics,
            "things/ws-1/properties/epoch_time/set",
            b"invalid json",
            Instant::now(),
        );
        assert!(matches!(result, Err(Error::Json(_))));
    }

    fn synced_registry(clock: &StationClock) -> SharedRegistry {
        let mut registry = station_registry(clock);
        let now = Instant::now();
        for update in registry.due(now) {
            registry.mark_sent(&update, now).unwrap();
        }
        Arc::new(Mutex::new(registry))
    }

    #[test]
    fn test_failed_publish_stays_due() {
        tokio_test::block_on(async {
            let clock = StationClock::new();
            let registry = synced_registry(&clock);
            registry
                .lock()
                .await
                .set_local(RAIN_DAYS_AGO[0], 0.7)
                .unwrap();

            let (client, eventloop) =
                AsyncClient::new(MqttOptions::new("flush-test", "localhost", 1883), 10);
            // Every try_publish fails once the event loop is gone
            drop(eventloop);

            let topics = Topics::new("things", "ws-1");
            flush(&client, &topics, &registry, &clock).await;

            let pending = registry
                .lock()
                .await
                .due(Instant::now() + Duration::from_secs(100));
            let rain: Vec<_> = pending
                .iter()
                .filter(|u| u.name == RAIN_DAYS_AGO[0])
                .collect();
            assert_eq!(rain.len(), 1);
            assert_eq!(rain[0].value, Value::Float(0.7));
        });
    }

    #[test]
    fn test_published_update_is_marked_sent() {
        tokio_test::block_on(async {
            let clock = StationClock::new();
            let registry = synced_registry(&clock);
            registry
                .lock()
                .await
                .set_local(RAIN_DAYS_AGO[0], 0.7)
                .unwrap();

            // Event loop kept alive but never polled, so requests just queue
            let (client, _eventloop) =
                AsyncClient::new(MqttOptions::new("flush-test", "localhost", 1883), 10);

            let topics = Topics::new("things", "ws-1");
            flush(&client, &topics, &registry, &clock).await;

            let pending = registry
                .lock()
                .await
                .due(Instant::now() + Duration::from_secs(100));
            assert!(pending.iter().all(|u| u.name != RAIN_DAYS_AGO[0]));
        });
    }
}
