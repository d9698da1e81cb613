use std::collections::VecDeque;
use chrono::SecondsFormat;
use log::{debug, error, info, warn};
use rumqttc::{valid_topic, AsyncClient, QoS};
use thiserror::Error;
use crate::db::{DeviceEntry, DeviceRegistry, RegistryError};
use crate::models::{AlignmentError, ChannelSchema, MeterRecord, ReadingSet};
use crate::mqtt::ha_interface::HaSensorConfig;
use crate::mqtt::{MqttConnectionStatus, TopicLayout};


#[derive(Error, Debug)]
pub enum PublishError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("Readings of device {serial} are misaligned: {source}")]
    Misaligned { serial: String, source: AlignmentError },
    #[error("Unable to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("MQTT request queue is full")]
    QueueFull,
    #[error("MQTT client rejected the request: {0}")]
    Client(String),
}

/// Where retained messages end up, the MQTT client in production.
///
/// A sink answers `QueueFull` when it cannot take more requests right now,
/// the message is then kept and offered again on the next flush.
pub trait MessageSink {
    fn publish_retained(&mut self, topic: &str, payload: &str) -> Result<(), PublishError>;
    fn subscribe(&mut self, topic: &str) -> Result<(), PublishError>;
}

/* Never wait for the event loop, it runs on the same task as we do */
impl MessageSink for AsyncClient {
    fn publish_retained(&mut self, topic: &str, payload: &str) -> Result<(), PublishError> {
        if !valid_topic(topic) {
            return Err(PublishError::Client(format!("invalid topic {topic}")));
        }
        return self.try_publish(topic, QoS::AtLeastOnce, true, payload)
            .map_err(|_| PublishError::QueueFull);
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), PublishError> {
        return self.try_subscribe(topic, QoS::AtLeastOnce)
            .map_err(|_| PublishError::QueueFull);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub topic: String,
    pub payload: String,
}

/// Discovery messages of one device: one per channel plus the last update sensor
pub fn discovery_messages(topics: &TopicLayout, meter: &MeterRecord, channels: &ChannelSchema) -> Result<Vec<OutgoingMessage>, PublishError> {
    let mut configs: Vec<HaSensorConfig> = channels
        .iter()
        .enumerate()
        .map(|(index, channel)| HaSensorConfig::new_channel(topics, meter, index, channel))
        .collect();
    configs.push(HaSensorConfig::new_last_update(topics, meter));

    let mut messages = Vec::with_capacity(configs.len());
    for config in configs {
        messages.push(OutgoingMessage {
            payload: serde_json::to_string(&config)?,
            topic: config.discover_topic,
        });
    }
    return Ok(messages);
}

/// Discovery messages for every registered device, in registration order
pub fn replay_messages(topics: &TopicLayout, devices: &DeviceRegistry) -> Result<Vec<OutgoingMessage>, PublishError> {
    let mut messages = Vec::new();
    for DeviceEntry { meter, channels } in devices.list_all() {
        messages.extend(discovery_messages(topics, meter, channels)?);
    }
    return Ok(messages);
}

/// Owns the device registry and turns devices and readings into MQTT messages.
///
/// Messages the sink cannot take yet wait in a backlog. Everything published
/// is retained, so a newer payload replaces a queued one for the same topic.
pub struct Publisher<S: MessageSink> {
    sink: S,
    topics: TopicLayout,
    devices: DeviceRegistry,
    status: MqttConnectionStatus,
    backlog: VecDeque<OutgoingMessage>,
    subscribe_pending: bool,
}

impl<S: MessageSink> Publisher<S> {
    pub fn new(sink: S, topics: TopicLayout) -> Self {
        return Publisher {
            sink,
            topics,
            devices: DeviceRegistry::new(),
            status: MqttConnectionStatus::Disconnected,
            backlog: VecDeque::new(),
            subscribe_pending: false,
        };
    }

    pub fn status(&self) -> &MqttConnectionStatus {
        return &self.status;
    }

    pub fn devices(&self) -> &DeviceRegistry {
        return &self.devices;
    }

    pub fn topics(&self) -> &TopicLayout {
        return &self.topics;
    }

    /// Number of messages still waiting for room in the sink
    pub fn pending(&self) -> usize {
        return self.backlog.len();
    }

    pub fn on_connecting(&mut self) {
        debug!("MQTT connection is being established");
        self.status = MqttConnectionStatus::Connecting;
    }

    /// Broker accepted us: mark as online and listen for Home Assistant restarts
    pub fn on_connected(&mut self) {
        info!("Connected, marking bridge as online");
        self.status = MqttConnectionStatus::Connected;
        self.subscribe_pending = true;
        self.send(OutgoingMessage { topic: self.topics.lwt(), payload: "online".to_string() });
    }

    pub fn on_disconnected(&mut self) {
        if self.status == MqttConnectionStatus::Connected {
            warn!("Lost connection to the MQTT broker");
        }
        self.status = MqttConnectionStatus::Disconnected;
    }

    pub fn on_message(&mut self, topic: &str, payload: &str) {
        debug!("Received message on {topic}: {payload}");
        if topic == self.topics.ha_status() && payload == "online" {
            info!("Home Assistant came online, replaying discovery of {} devices", self.devices.len());
            if let Err(e) = self.replay_discovery() {
                error!("Replaying discovery failed: {e}");
            }
        }
    }

    pub fn register_device(&mut self, meter: MeterRecord, channels: ChannelSchema) -> Result<(), PublishError> {
        let entry = self.devices.put(meter, channels)?;
        let info = OutgoingMessage {
            topic: self.topics.info(entry.meter.serial()),
            payload: serde_json::to_string(&entry.meter)?,
        };
        info!("Publishing HA discovery for device {}", entry.meter.serial());
        let discovery = discovery_messages(&self.topics, &entry.meter, &entry.channels)?;

        self.send(info);
        self.send_all(discovery);
        return Ok(());
    }

    pub fn replay_discovery(&mut self) -> Result<(), PublishError> {
        let messages = replay_messages(&self.topics, &self.devices)?;
        self.send_all(messages);
        return Ok(());
    }

    pub fn publish_readings(&mut self, meter: &MeterRecord, readings: &ReadingSet) -> Result<(), PublishError> {
        let serial = meter.serial();
        if let Some(entry) = self.devices.get(serial) {
            if entry.channels.len() != readings.len() {
                return Err(PublishError::Misaligned {
                    serial: serial.to_string(),
                    source: AlignmentError { channels: entry.channels.len(), readings: readings.len() },
                });
            }
        }

        let mut messages = Vec::with_capacity(readings.len() + 1);
        for reading in readings.readings() {
            messages.push(OutgoingMessage {
                topic: self.topics.channel(serial, reading.channel_index),
                payload: serde_json::to_string(reading)?,
            });
        }
        messages.push(OutgoingMessage {
            topic: self.topics.last_update(serial),
            payload: readings.ts().to_rfc3339_opts(SecondsFormat::Millis, true),
        });

        self.send_all(messages);
        return Ok(());
    }

    /// Hand queued work to the sink until it is full or the backlog is empty
    pub fn flush(&mut self) {
        if self.subscribe_pending {
            let ha_status = self.topics.ha_status();
            match self.sink.subscribe(&ha_status) {
                Ok(_) => debug!("Subscribed to {ha_status}"),
                Err(PublishError::QueueFull) => return,
                Err(e) => error!("Unable to subscribe to {ha_status}: {e}"),
            }
            self.subscribe_pending = false;
        }

        while let Some(message) = self.backlog.front() {
            match self.sink.publish_retained(&message.topic, &message.payload) {
                Ok(_) => {},
                Err(PublishError::QueueFull) => {
                    debug!("{} messages wait for the MQTT queue", self.backlog.len());
                    return;
                },
                Err(e) => error!("Error publishing to {}: {}", message.topic, e),
            }
            self.backlog.pop_front();
        }
    }

    fn send_all(&mut self, messages: Vec<OutgoingMessage>) {
        for message in messages {
            self.enqueue(message);
        }
        self.flush();
    }

    fn send(&mut self, message: OutgoingMessage) {
        self.enqueue(message);
        self.flush();
    }

    fn enqueue(&mut self, message: OutgoingMessage) {
        match self.backlog.iter_mut().find(|queued| queued.topic == message.topic) {
            Some(queued) => queued.payload = message.payload,
            None => self.backlog.push_back(message),
        }
    }
}
