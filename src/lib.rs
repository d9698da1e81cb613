//! Bridge for Caleffi DataEasy meter concentrators
//!
//! This library reads the meter registry, the channel databases and the last
//! log lines of a DataEasy over HTTP and publishes them to MQTT together with
//! Home Assistant discovery messages.

pub mod db;
pub mod models;
pub mod mqtt;
pub mod config;
pub mod dataeasy;

// Re-export common types for easier access
pub use models::{ChannelDefinition, ChannelSchema, MeterRecord, Reading, ReadingSet, ReadingValue};
pub use db::DeviceRegistry;
pub use mqtt::{MqttManager, Transmission};
pub use config::Config;
pub use dataeasy::{client::DataEasyClient, DataEasyError, DevicePoller, MeterSource};
