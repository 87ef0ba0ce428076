mod wire;

use chrono::Utc;
use clap::Parser;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use wire::{PropertyUpdate, PropertyWrite};

/// Plays the cloud side: watches station properties and pushes the clock
#[derive(Debug, Parser)]
#[command(name = "cloud-sim")]
struct Args {
    #[arg(long, env = "MQTT_BROKER", default_value = "localhost")]
    mqtt_broker: String,

    #[arg(long, env = "MQTT_PORT", default_value_t = 1883)]
    mqtt_port: u16,

    #[arg(long, env = "THING_ID", default_value = "weather-station")]
    thing_id: String,

    #[arg(long, env = "TOPIC_PREFIX", default_value = "things")]
    topic_prefix: String,

    /// Seconds between epoch_time writes
    #[arg(long, env = "EPOCH_INTERVAL_SECS", default_value_t = 60)]
    epoch_interval_secs: u64,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt::init();

    let base = format!("{}/{}/properties", args.topic_prefix, args.thing_id);
    info!("Starting cloud simulator");
    info!(
        "Broker: {}:{}, Thing: {}, clock push every {}s",
        args.mqtt_broker, args.mqtt_port, args.thing_id, args.epoch_interval_secs
    );

    let client_id = format!("cloud-sim-{}", uuid::Uuid::new_v4());
    let mut mqtt_options = MqttOptions::new(&client_id, &args.mqtt_broker, args.mqtt_port);
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    mqtt_options.set_clean_session(true);

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 100);

    let updates_filter = format!("{}/+", base);
    if let Err(e) = client.subscribe(&updates_filter, QoS::AtLeastOnce).await {
        error!("Failed to subscribe to {}: {}", updates_filter, e);
        return;
    }

    // Spawn eventloop handler
    let listener_base = base.clone();
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    log_update(&listener_base, &publish.topic, &publish.payload);
                }
                Ok(_) => {}
                Err(e) => {
                    error!("MQTT eventloop error: {}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    });

    let epoch_topic = format!("{}/epoch_time/set", base);
    let mut ticker = tokio::time::interval(Duration::from_secs(args.epoch_interval_secs.max(1)));
    let mut pushed = 0u64;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let write = PropertyWrite {
                    value: Utc::now().timestamp().into(),
                };
                let payload = match serde_json::to_string(&write) {
                    Ok(p) => p,
                    Err(e) => {
                        error!("Failed to serialize epoch write: {}", e);
                        continue;
                    }
                };

                match client.publish(&epoch_topic, QoS::AtLeastOnce, false, payload).await {
                    Ok(_) => {
                        pushed += 1;
                        debug!("Pushed epoch_time ({} so far)", pushed);
                    }
                    Err(e) => warn!("Failed to publish: {}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal after {} clock pushes", pushed);
                break;
            }
        }
    }
}

fn log_update(base: &str, topic: &str, payload: &[u8]) {
    let Some(name) = topic.strip_prefix(base).and_then(|t| t.strip_prefix('/')) else {
        return;
    };

    match serde_json::from_slice::<PropertyUpdate>(payload) {
        Ok(update) => info!("{} = {} at {}", name, update.value, update.timestamp),
        Err(e) => warn!("Malformed update on {}: {}", topic, e),
    }
}
