pub mod ha_interface;
pub mod publisher;

use std::time::Duration;
use crate::config::MqttConfig;
use crate::models::{ChannelSchema, MeterRecord, ReadingSet};
use crate::mqtt::publisher::Publisher;
use log::{debug, error, info};
use tokio::sync::mpsc::{Receiver, Sender};
use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, LastWill, MqttOptions, Packet, QoS, Transport};
use thiserror::Error;


/// Time to wait before the event loop is polled again after a connection error
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub enum MqttConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Error, Debug)]
pub enum MqttSetupError {
    #[error("Unable to read CA certificate {path}: {source}")]
    Certificate { path: String, source: std::io::Error },
}

/// Topic names used by the bridge
#[derive(Debug, Clone, PartialEq)]
pub struct TopicLayout {
    topic_root: String,
    ha_prefix: String,
    unique_id_prefix: String,
}

impl TopicLayout {
    pub fn new(topic_root: &str, ha_prefix: &str, unique_id_prefix: &str) -> Self {
        return TopicLayout {
            topic_root: topic_root.to_string(),
            ha_prefix: ha_prefix.to_string(),
            unique_id_prefix: unique_id_prefix.to_string(),
        };
    }

    pub fn from_config(config: &MqttConfig) -> Self {
        return TopicLayout::new(&config.topic_root, &config.ha_discovery_prefix, &config.unique_id_prefix);
    }

    /// Liveness of the bridge, doubles as the last will topic
    pub fn lwt(&self) -> String {
        return format!("{}/_internal/lwt", self.topic_root);
    }

    /// Home Assistant announces its restarts here
    pub fn ha_status(&self) -> String {
        return format!("{}/status", self.ha_prefix);
    }

    pub fn device(&self, serial: &str) -> String {
        return format!("{}/{}", self.topic_root, serial);
    }

    pub fn info(&self, serial: &str) -> String {
        return format!("{}/info", self.device(serial));
    }

    pub fn channel(&self, serial: &str, index: usize) -> String {
        return format!("{}/{}", self.device(serial), index);
    }

    pub fn last_update(&self, serial: &str) -> String {
        return format!("{}/ts", self.device(serial));
    }

    pub fn channel_unique_id(&self, serial: &str, index: usize) -> String {
        return format!("{}_{}_{}", self.unique_id_prefix, serial, index);
    }

    pub fn last_update_unique_id(&self, serial: &str) -> String {
        return format!("{}_{}_last_update", self.unique_id_prefix, serial);
    }

    pub fn discovery(&self, serial: &str, unique_id: &str) -> String {
        return format!("{}/sensor/{}/{}/config", self.ha_prefix, serial, unique_id);
    }
}

/// Work handed from the device pollers to the MQTT task
pub enum Transmission {
    RegisterDevice { meter: MeterRecord, channels: ChannelSchema },
    Readings { meter: MeterRecord, readings: ReadingSet },
}

pub struct MqttManager {
    rx: Receiver<Transmission>,
    eventloop: EventLoop,
    publisher: Publisher<AsyncClient>,
}

impl MqttManager {
    pub fn new(config: &MqttConfig) -> Result<(Self, Sender<Transmission>), MqttSetupError> {
        let (mtx, mrx) = tokio::sync::mpsc::channel(100);

        info!("MQTT connection to {}:{} starting up", config.host, config.port);
        let topics = TopicLayout::from_config(config);
        let mut mqttoptions = MqttOptions::new(config.client_name.clone(), config.host.clone(), config.port);
        mqttoptions.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        if let Some(user) = &config.user {
            mqttoptions.set_credentials(user.clone(), config.pass.clone().unwrap_or_default());
        }
        mqttoptions.set_last_will(LastWill::new(topics.lwt(), "offline", QoS::AtLeastOnce, true));

        if let Some(path) = &config.tls_ca_path {
            let ca = std::fs::read(path)
                .map_err(|source| MqttSetupError::Certificate { path: path.clone(), source })?;
            mqttoptions.set_transport(Transport::tls(ca, None, None));
            info!("Using TLS with CA certificate {path}");
        }

        let (client, eventloop) = AsyncClient::new(mqttoptions, config.queue_capacity);

        return Ok((MqttManager {
            rx: mrx,
            eventloop,
            publisher: Publisher::new(client, topics),
        }, mtx));
    }

    pub async fn start_thread(&mut self) {
        info!("MQTT Eventloop started");
        let MqttManager { rx, eventloop, publisher } = self;
        publisher.on_connecting();

        loop {
            tokio::select! {
                event = eventloop.poll() => {
                    handle_event(publisher, event).await;
                },
                transmission = rx.recv() => {
                    match transmission {
                        Some(t) => handle_transmission(publisher, t),
                        None => {
                            debug!("All senders are gone, we exit now");
                            break;
                        }
                    }
                },
            }
            /* every poll frees room in the request queue */
            publisher.flush();
        }

        info!("MQTT thread exit");
    }
}

async fn handle_event(publisher: &mut Publisher<AsyncClient>, event: Result<Event, ConnectionError>) {
    match event {
        Ok(Event::Incoming(Packet::ConnAck(_))) => {
            publisher.on_connected();
        },
        Ok(Event::Incoming(Packet::Publish(p))) => {
            let payload = String::from_utf8_lossy(&p.payload);
            publisher.on_message(&p.topic, &payload);
        },
        Ok(_) => {},
        Err(e) => {
            error!("Error in MQTT {:?}, reconnecting", e);
            publisher.on_disconnected();
            tokio::time::sleep(RECONNECT_DELAY).await;
            publisher.on_connecting();
        }
    }
}

fn handle_transmission(publisher: &mut Publisher<AsyncClient>, transmission: Transmission) {
    match transmission {
        Transmission::RegisterDevice { meter, channels } => {
            let serial = meter.serial().to_string();
            match publisher.register_device(meter, channels) {
                Ok(_) => info!("Device {serial} registered"),
                Err(e) => error!("Unable to register device {serial}: {e}"),
            }
        },
        Transmission::Readings { meter, readings } => {
            match publisher.publish_readings(&meter, &readings) {
                Ok(_) => info!("Published readings for meter {}", meter.serial()),
                Err(e) => error!("Unable to publish readings of {}: {e}", meter.serial()),
            }
        },
    }
}
