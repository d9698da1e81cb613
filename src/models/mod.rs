use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use chrono::{DateTime, Utc};
use thiserror::Error;


/// One line of the meter registry, keyed by the registry header names
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "SCREAMING_SNAKE_CASE")]
pub struct MeterRecord {
    pub pkey: String,
    /// Serial number of the meter, identifies the device
    pub id_device: String,
    pub name_customer: String,
    pub label1: String,
    pub label2: String,
    pub state: String,
    pub date_install: String,
    pub primary_id: String,
    pub type_req: String,
    pub scan_tmo: String,
    pub baudrate: String,
    /// Manufacturer code, part of the device path on the DataEasy
    pub manf_code: String,
    pub version: String,
    pub medium: String,
    pub dbnum: String,
    pub interval: String,
    pub format: String,
    pub email: String,
    pub mod_id: String,
    /// Columns the firmware added which we do not know about
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

impl MeterRecord {
    /// Build a record out of (header, value) pairs, unknown headers end up in `extra`
    pub fn from_fields<'a, I>(fields: I) -> Result<Self, serde_json::Error>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let map: serde_json::Map<String, serde_json::Value> = fields
            .into_iter()
            .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
            .collect();
        return serde_json::from_value(serde_json::Value::Object(map));
    }

    pub fn serial(&self) -> &str {
        return &self.id_device;
    }

    /// Path of the device database on the DataEasy web server
    pub fn device_path(&self) -> String {
        return format!("DB/{}-{}{}{}", self.id_device, self.manf_code, self.medium, self.version);
    }
}

/// Definition of a single measurement channel as found in `alldb.dbs`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelDefinition {
    #[serde(rename = "SU", skip_serializing_if = "Option::is_none")]
    pub su: Option<String>,
    #[serde(rename = "ST", skip_serializing_if = "Option::is_none")]
    pub st: Option<String>,
    #[serde(rename = "T", skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
    #[serde(rename = "TV", skip_serializing_if = "Option::is_none")]
    pub tv: Option<String>,
    #[serde(rename = "Description", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "Units", skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
    #[serde(rename = "LABEL", skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(rename = "TOLOG", skip_serializing_if = "Option::is_none")]
    pub tolog: Option<String>,
    #[serde(rename = "MAINDB", skip_serializing_if = "Option::is_none")]
    pub maindb: Option<String>,
    #[serde(rename = "TYPELOG", skip_serializing_if = "Option::is_none")]
    pub typelog: Option<String>,
    #[serde(rename = "Multiplier", skip_serializing_if = "Option::is_none")]
    pub multiplier: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

/// Unit text the firmware uses for the timestamp channel
const DATE_TIME_UNIT: &str = "date e time";

impl ChannelDefinition {
    pub fn from_fields<'a, I>(fields: I) -> Result<Self, serde_json::Error>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let map: serde_json::Map<String, serde_json::Value> = fields
            .into_iter()
            .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
            .collect();
        return serde_json::from_value(serde_json::Value::Object(map));
    }

    /// LABEL followed by every non zero T, SU and ST qualifier (in this order)
    pub fn display_label(&self) -> String {
        let mut label = self.label.clone().unwrap_or_default();
        for qualifier in [&self.t, &self.su, &self.st] {
            if let Some(q) = qualifier {
                if q != "0" {
                    label.push_str(" - ");
                    label.push_str(q);
                }
            }
        }
        return label;
    }

    /// Trimmed unit, None for empty units and the date/time pseudo unit
    pub fn display_unit(&self) -> Option<String> {
        match &self.units {
            Some(u) if !u.is_empty() && u != DATE_TIME_UNIT => Some(u.trim().to_string()),
            _ => None,
        }
    }

    /// Multiplier of the channel, 1.0 when the firmware does not send one.
    /// An empty multiplier counts as 0 which disables scaling.
    pub fn scale(&self) -> f64 {
        match &self.multiplier {
            None => 1.0,
            Some(m) if m.trim().is_empty() => 0.0,
            Some(m) => m.trim().parse::<f64>().unwrap_or(1.0),
        }
    }
}

/// Ordered channels of one device, the order matches the values in `LOG/last.txt`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ChannelSchema {
    channels: Vec<ChannelDefinition>,
}

impl ChannelSchema {
    pub fn new(channels: Vec<ChannelDefinition>) -> Self {
        return ChannelSchema { channels };
    }

    pub fn len(&self) -> usize {
        return self.channels.len();
    }

    pub fn is_empty(&self) -> bool {
        return self.channels.is_empty();
    }

    pub fn get(&self, index: usize) -> Option<&ChannelDefinition> {
        return self.channels.get(index);
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChannelDefinition> {
        return self.channels.iter();
    }
}

/// Decoded value of a channel
#[derive(Debug, Clone, PartialEq)]
pub enum ReadingValue {
    Number(f64),
    /// Anything the meter sends which is not a number, e.g. error markers
    Text(String),
}

/* Integral numbers go out as `7` instead of `7.0` */
impl Serialize for ReadingValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ReadingValue::Number(n) if n.fract() == 0.0 && n.abs() < 9.0e15 => serializer.serialize_i64(*n as i64),
            ReadingValue::Number(n) => serializer.serialize_f64(*n),
            ReadingValue::Text(t) => serializer.serialize_str(t),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    #[serde(rename = "channelIdx")]
    pub channel_index: usize,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub value: Option<ReadingValue>,
    pub unit: Option<String>,
}

#[derive(Error, Debug, PartialEq)]
#[error("{readings} readings do not line up with {channels} schema channels")]
pub struct AlignmentError {
    pub channels: usize,
    pub readings: usize,
}

/// All readings of one poll, one reading per schema channel
#[derive(Debug, Clone, PartialEq)]
pub struct ReadingSet {
    ts: DateTime<Utc>,
    readings: Vec<Reading>,
}

impl ReadingSet {
    /// Pair readings with the schema they were decoded with
    pub fn aligned(schema: &ChannelSchema, ts: DateTime<Utc>, readings: Vec<Reading>) -> Result<Self, AlignmentError> {
        if schema.len() != readings.len() {
            return Err(AlignmentError { channels: schema.len(), readings: readings.len() });
        }
        return Ok(ReadingSet { ts, readings });
    }

    pub fn ts(&self) -> DateTime<Utc> {
        return self.ts;
    }

    pub fn readings(&self) -> &[Reading] {
        return &self.readings;
    }

    pub fn len(&self) -> usize {
        return self.readings.len();
    }

    pub fn is_empty(&self) -> bool {
        return self.readings.is_empty();
    }
}
