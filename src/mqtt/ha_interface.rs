use std::collections::HashMap;
use lazy_static::lazy_static;
use serde::Serialize;
use crate::models::{ChannelDefinition, MeterRecord};
use crate::mqtt::TopicLayout;



#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum HaDeviceClass {
    Temperature,
    Energy,
    Power,
    VolumeFlowRate,
    Water,
    Timestamp,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum HaStateClass {
    TotalIncreasing,
}

/// How Home Assistant should treat the values of a unit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HaUnitClass {
    pub device_class: Option<HaDeviceClass>,
    pub state_class: Option<HaStateClass>,
    /// Unit shown in Home Assistant, None keeps the unit of the meter
    pub unit: Option<&'static str>,
    /// Applied by the value template, never to the published value
    pub scaling_factor: Option<f64>,
}

impl HaUnitClass {
    fn new(device_class: HaDeviceClass) -> Self {
        return HaUnitClass { device_class: Some(device_class), ..Default::default() };
    }

    fn unit(mut self, unit: &'static str) -> Self {
        self.unit = Some(unit);
        return self;
    }

    fn total_increasing(mut self) -> Self {
        self.state_class = Some(HaStateClass::TotalIncreasing);
        return self;
    }

    fn scaled(mut self, factor: f64) -> Self {
        self.scaling_factor = Some(factor);
        return self;
    }
}

lazy_static! {
    static ref UNIT_CLASSES: HashMap<&'static str, HaUnitClass> = {
        let mut map = HashMap::new();
        map.insert("C", HaUnitClass::new(HaDeviceClass::Temperature).unit("°C"));
        map.insert("F", HaUnitClass::new(HaDeviceClass::Temperature).unit("°F"));
        map.insert("K", HaUnitClass::new(HaDeviceClass::Temperature));
        map.insert("mK", HaUnitClass::new(HaDeviceClass::Temperature).unit("K").scaled(0.001));
        map.insert("kWh", HaUnitClass::new(HaDeviceClass::Energy).total_increasing());
        map.insert("kW", HaUnitClass::new(HaDeviceClass::Power));
        map.insert("m3/h", HaUnitClass::new(HaDeviceClass::VolumeFlowRate).unit("m³/h"));
        map.insert("m3", HaUnitClass::new(HaDeviceClass::Water).unit("m³").total_increasing());
        map
    };
}

/// Map a DataEasy unit to its Home Assistant classes, unknown units get a plain sensor
pub fn classify_unit(unit: Option<&str>) -> HaUnitClass {
    return unit
        .and_then(|u| UNIT_CLASSES.get(u))
        .cloned()
        .unwrap_or_default();
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct HaDevice {
    pub identifiers: String,
    pub name: String,
    pub serial_number: String,
    pub manufacturer: String,
    pub model: String,
}

impl HaDevice {
    pub fn new(meter: &MeterRecord) -> Self {
        return HaDevice {
            identifiers: meter.serial().to_string(),
            name: format!("Caleffi DataEasy {}", meter.name_customer),
            serial_number: meter.serial().to_string(),
            manufacturer: "Caleffi".to_string(),
            model: "DataEasy".to_string(),
        };
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct HaOrigin {
    pub name: String,
    pub sw_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub support_url: Option<String>,
}

impl HaOrigin {
    pub fn new() -> Self {
        return HaOrigin::with_homepage(env!("CARGO_PKG_HOMEPAGE"));
    }

    /* cargo hands us an empty string when no homepage is declared */
    fn with_homepage(homepage: &str) -> Self {
        return HaOrigin {
            name: env!("CARGO_PKG_NAME").to_string(),
            sw_version: env!("CARGO_PKG_VERSION").to_string(),
            support_url: Some(homepage.to_string()).filter(|url| !url.is_empty()),
        };
    }
}

/// Discovery document for a single sensor
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct HaSensorConfig {
    pub name: String,
    pub unique_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<HaDeviceClass>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_class: Option<HaStateClass>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_of_measurement: Option<String>,
    pub state_topic: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_template: Option<String>,
    pub availability_topic: String,
    pub device: HaDevice,
    pub origin: HaOrigin,
    #[serde(skip_serializing)]
    pub discover_topic: String,
}

impl HaSensorConfig {
    pub fn new_channel(topics: &TopicLayout, meter: &MeterRecord, index: usize, channel: &ChannelDefinition) -> Self {
        let serial = meter.serial();
        let source_unit = channel.display_unit();
        let class = classify_unit(source_unit.as_deref());
        let unique_id = topics.channel_unique_id(serial, index);

        let value_template = match class.scaling_factor {
            None => "{{ value_json.value }}".to_string(),
            Some(factor) => format!("{{{{ value_json.value | float(0) * {factor} }}}}"),
        };

        return HaSensorConfig {
            name: channel.display_label(),
            discover_topic: topics.discovery(serial, &unique_id),
            unique_id,
            device_class: class.device_class,
            state_class: class.state_class,
            unit_of_measurement: class.unit.map(str::to_string).or(source_unit),
            state_topic: topics.channel(serial, index),
            value_template: Some(value_template),
            availability_topic: topics.lwt(),
            device: HaDevice::new(meter),
            origin: HaOrigin::new(),
        };
    }

    pub fn new_last_update(topics: &TopicLayout, meter: &MeterRecord) -> Self {
        let serial = meter.serial();
        let unique_id = topics.last_update_unique_id(serial);

        return HaSensorConfig {
            name: "Last Update".to_string(),
            discover_topic: topics.discovery(serial, &unique_id),
            unique_id,
            device_class: Some(HaDeviceClass::Timestamp),
            state_class: None,
            unit_of_measurement: None,
            state_topic: topics.last_update(serial),
            value_template: None,
            availability_topic: topics.lwt(),
            device: HaDevice::new(meter),
            origin: HaOrigin::new(),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topics() -> TopicLayout {
        TopicLayout::new("caleffi-dataeasy", "homeassistant", "caleffi_dataeasy")
    }

    fn meter() -> MeterRecord {
        MeterRecord {
            id_device: "12345678".to_string(),
            name_customer: "Flat 3".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_classify_known_units() {
        let mk = classify_unit(Some("mK"));
        assert_eq!(mk.unit, Some("K"));
        assert_eq!(mk.device_class, Some(HaDeviceClass::Temperature));
        assert_eq!(mk.scaling_factor, Some(0.001));
        assert_eq!(mk.state_class, None);

        let m3 = classify_unit(Some("m3"));
        assert_eq!(m3.unit, Some("m³"));
        assert_eq!(m3.device_class, Some(HaDeviceClass::Water));
        assert_eq!(m3.state_class, Some(HaStateClass::TotalIncreasing));

        let kwh = classify_unit(Some("kWh"));
        assert_eq!(kwh.device_class, Some(HaDeviceClass::Energy));
        assert_eq!(kwh.unit, None);
    }

    #[test]
    fn test_classify_unknown_units() {
        assert_eq!(classify_unit(Some("xyz")), HaUnitClass::default());
        assert_eq!(classify_unit(None), HaUnitClass::default());
        /* lookup is case sensitive */
        assert_eq!(classify_unit(Some("kwh")), HaUnitClass::default());
    }

    #[test]
    fn test_channel_config_with_scaling() {
        let channel = ChannelDefinition {
            label: Some("Flow temperature".to_string()),
            t: Some("0".to_string()),
            su: Some("0".to_string()),
            st: Some("0".to_string()),
            units: Some("mK".to_string()),
            ..Default::default()
        };
        let cfg = HaSensorConfig::new_channel(&topics(), &meter(), 3, &channel);
        let json = serde_json::to_value(&cfg).unwrap();

        assert_eq!(cfg.discover_topic, "homeassistant/sensor/12345678/caleffi_dataeasy_12345678_3/config");
        assert_eq!(json["unique_id"], "caleffi_dataeasy_12345678_3");
        assert_eq!(json["name"], "Flow temperature");
        assert_eq!(json["device_class"], "temperature");
        assert_eq!(json["unit_of_measurement"], "K");
        assert_eq!(json["state_topic"], "caleffi-dataeasy/12345678/3");
        assert_eq!(json["value_template"], "{{ value_json.value | float(0) * 0.001 }}");
        assert_eq!(json["availability_topic"], "caleffi-dataeasy/_internal/lwt");
        assert_eq!(json["device"]["name"], "Caleffi DataEasy Flat 3");
        assert!(json.get("state_class").is_none());
        assert!(json.get("discover_topic").is_none());
    }

    #[test]
    fn test_channel_config_keeps_unknown_unit() {
        let channel = ChannelDefinition {
            label: Some("Pressure".to_string()),
            units: Some("bar".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_value(HaSensorConfig::new_channel(&topics(), &meter(), 0, &channel)).unwrap();

        assert_eq!(json["unit_of_measurement"], "bar");
        assert_eq!(json["value_template"], "{{ value_json.value }}");
        assert!(json.get("device_class").is_none());
    }

    #[test]
    fn test_last_update_config() {
        let json = serde_json::to_value(HaSensorConfig::new_last_update(&topics(), &meter())).unwrap();

        assert_eq!(json["unique_id"], "caleffi_dataeasy_12345678_last_update");
        assert_eq!(json["device_class"], "timestamp");
        assert_eq!(json["state_topic"], "caleffi-dataeasy/12345678/ts");
        assert!(json.get("value_template").is_none());
    }

    #[test]
    fn test_device_and_origin_blocks() {
        let json = serde_json::to_value(HaSensorConfig::new_last_update(&topics(), &meter())).unwrap();

        assert_eq!(json["device"]["identifiers"], "12345678");
        assert_eq!(json["device"]["serial_number"], "12345678");
        assert_eq!(json["device"]["manufacturer"], "Caleffi");
        assert_eq!(json["device"]["model"], "DataEasy");
        assert_eq!(json["origin"]["name"], env!("CARGO_PKG_NAME"));
        assert_eq!(json["origin"]["sw_version"], env!("CARGO_PKG_VERSION"));

        let origin = serde_json::to_value(HaOrigin::with_homepage("https://example.org/dataeasy2mqtt")).unwrap();
        assert_eq!(origin["support_url"], "https://example.org/dataeasy2mqtt");
        let origin = serde_json::to_value(HaOrigin::with_homepage("")).unwrap();
        assert!(origin.get("support_url").is_none());
    }
}
