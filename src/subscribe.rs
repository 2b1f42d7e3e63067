//! MQTT broker integration.
//!
//! Subscribes to the configured topic filter and forwards every delivery,
//! with its retained flag, into a [`ChannelSource`] as [`FeedEvent`]s. The
//! subscription is renewed on every ConnAck so reconnects resume the feed.
//!
//! # Configuration
//!
//! ```toml
//! [broker]
//! host = "broker.local"
//! port = 1883
//! username = "dashboard"
//! password = "secret"
//! topic_filter = "#"
//! ```
//!
//! # Usage
//!
//! ```bash
//! nodewatch --broker broker.local:1883
//! ```

use std::time::Duration;

use rumqttc::{AsyncClient, Event as MqttEvent, MqttOptions, Packet, QoS};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::BrokerConfig;
use crate::source::{ChannelSource, FeedEvent, FeedMessage};

/// Delay before polling again after a connection error.
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Build client options from the broker settings.
pub fn mqtt_options(config: &BrokerConfig) -> MqttOptions {
    let client_id = if config.client_id.trim().is_empty() {
        format!("nodewatch-{}", std::process::id())
    } else {
        config.client_id.trim().to_string()
    };
    let mut options = MqttOptions::new(client_id, config.host.clone(), config.port);
    options.set_keep_alive(config.keep_alive.max(Duration::from_secs(5)));
    options.set_clean_session(true);
    if let (Some(user), Some(pass)) = (&config.username, &config.password) {
        options.set_credentials(user.clone(), pass.clone());
    }
    options
}

/// Connect to the broker in the background.
///
/// # Returns
///
/// A tuple of (source, handle) where:
/// - source is a ChannelSource for the dashboard
/// - handle is the background task driving the MQTT event loop
pub fn create_subscriber(config: &BrokerConfig) -> (ChannelSource, tokio::task::JoinHandle<()>) {
    let description = format!("mqtt://{}:{}", config.host, config.port);
    let (tx, source) = ChannelSource::create(&description);
    let options = mqtt_options(config);
    let filter = config.topic_filter.clone();

    let handle = tokio::spawn(run_event_loop(options, filter, tx));
    (source, handle)
}

async fn run_event_loop(
    options: MqttOptions,
    filter: String,
    tx: mpsc::UnboundedSender<FeedEvent>,
) {
    let (client, mut eventloop) = AsyncClient::new(options, 100);
    let mut connected = false;

    loop {
        let event = match eventloop.poll().await {
            Ok(MqttEvent::Incoming(Packet::ConnAck(_))) => {
                info!(filter = %filter, "connected to broker");
                connected = true;
                if let Err(e) = client.try_subscribe(filter.as_str(), QoS::AtMostOnce) {
                    warn!(error = %e, "subscribe request failed");
                }
                FeedEvent::Connected
            }
            Ok(MqttEvent::Incoming(Packet::Publish(publish))) => FeedEvent::Message(FeedMessage {
                topic: publish.topic.clone(),
                payload: publish.payload.to_vec(),
                retained: publish.retain,
            }),
            Ok(MqttEvent::Incoming(Packet::Disconnect)) => {
                info!("broker closed the connection");
                connected = false;
                FeedEvent::Closed
            }
            Ok(other) => {
                debug!(event = ?other, "mqtt event");
                continue;
            }
            Err(e) => {
                if connected {
                    warn!(error = %e, "broker connection lost");
                } else {
                    debug!(error = %e, "broker connection attempt failed");
                }
                connected = false;
                if tx.send(FeedEvent::Error(e.to_string())).is_err() {
                    break;
                }
                tokio::time::sleep(RETRY_DELAY).await;
                continue;
            }
        };

        if tx.send(event).is_err() {
            // Dashboard dropped the source
            break;
        }
    }

    let _ = client.try_disconnect();
}
