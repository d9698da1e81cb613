use std::collections::HashMap;
use log::debug;
use thiserror::Error;
use crate::models::{ChannelSchema, MeterRecord};


#[derive(Error, Debug, PartialEq)]
pub enum RegistryError {
    #[error("Device {0} is already registered")]
    AlreadyRegistered(String),
}

/// Everything we learned about a device during discovery
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceEntry {
    pub meter: MeterRecord,
    pub channels: ChannelSchema,
}

/// DeviceRegistry keeps the discovered devices for the lifetime of the process.
///
/// Entries are written once and never changed afterwards, iteration follows the
/// order in which the devices were registered.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    entries: Vec<DeviceEntry>,
    index: HashMap<String, usize>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        return DeviceRegistry {
            entries: Vec::new(),
            index: HashMap::new(),
        };
    }

    pub fn put(&mut self, meter: MeterRecord, channels: ChannelSchema) -> Result<&DeviceEntry, RegistryError> {
        let serial = meter.serial().to_string();
        if self.index.contains_key(&serial) {
            return Err(RegistryError::AlreadyRegistered(serial));
        }

        debug!("Storing device {serial} with {} channels", channels.len());
        let pos = self.entries.len();
        self.entries.push(DeviceEntry { meter, channels });
        self.index.insert(serial, pos);
        return Ok(&self.entries[pos]);
    }

    pub fn get(&self, serial: &str) -> Option<&DeviceEntry> {
        return self.index.get(serial).map(|pos| &self.entries[*pos]);
    }

    pub fn list_all(&self) -> &[DeviceEntry] {
        return &self.entries;
    }

    pub fn len(&self) -> usize {
        return self.entries.len();
    }

    pub fn is_empty(&self) -> bool {
        return self.entries.is_empty();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChannelDefinition;

    fn meter(serial: &str) -> MeterRecord {
        MeterRecord { id_device: serial.to_string(), ..Default::default() }
    }

    #[test]
    fn test_put_and_get() {
        let mut registry = DeviceRegistry::new();
        let schema = ChannelSchema::new(vec![ChannelDefinition::default()]);
        registry.put(meter("1"), schema.clone()).unwrap();

        let entry = registry.get("1").unwrap();
        assert_eq!(entry.channels, schema);
        assert!(registry.get("2").is_none());
    }

    #[test]
    fn test_second_put_is_rejected() {
        let mut registry = DeviceRegistry::new();
        registry.put(meter("1"), ChannelSchema::default()).unwrap();

        let other = ChannelSchema::new(vec![ChannelDefinition::default()]);
        let err = registry.put(meter("1"), other).unwrap_err();
        assert_eq!(err, RegistryError::AlreadyRegistered("1".to_string()));
        assert!(registry.get("1").unwrap().channels.is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_list_all_keeps_insertion_order() {
        let mut registry = DeviceRegistry::new();
        for serial in ["30", "10", "20"] {
            registry.put(meter(serial), ChannelSchema::default()).unwrap();
        }

        let serials: Vec<&str> = registry.list_all().iter().map(|e| e.meter.serial()).collect();
        assert_eq!(serials, vec!["30", "10", "20"]);
    }
}
