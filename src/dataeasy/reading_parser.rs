use super::{DataEasyError, ERROR_MARKER};
use crate::models::{ChannelDefinition, ChannelSchema, Reading, ReadingSet, ReadingValue};
use chrono::{DateTime, Local, Utc};
use log::debug;

/// Fields in front of the channel values: timestamp and a reserved one
const LEADING_FIELDS: usize = 2;

/// Parse `LOG/last.txt` using the UTC offset of this host.
///
/// The DataEasy logs local wall clock time as epoch seconds. The offset of the
/// machine running the bridge is used to get back to UTC, not the one of the
/// DataEasy.
pub fn parse_readings(payload: &str, channels: &ChannelSchema) -> Result<ReadingSet, DataEasyError> {
    let local_minus_utc = Local::now().offset().local_minus_utc() as i64;
    return parse_readings_with_offset(payload, channels, local_minus_utc);
}

pub fn parse_readings_with_offset(payload: &str, channels: &ChannelSchema, local_minus_utc: i64) -> Result<ReadingSet, DataEasyError> {
    if payload.trim().is_empty() {
        return Err(DataEasyError::ReadingsFetch("log is empty".to_string()));
    }
    if payload.contains(ERROR_MARKER) {
        return Err(DataEasyError::ReadingsFetch("server reported an error".to_string()));
    }

    let line = payload.lines().next().unwrap_or_default();
    let fields: Vec<&str> = line.split('$').collect();

    let raw_ts = fields[0].trim();
    let local_ts: i64 = raw_ts
        .parse()
        .map_err(|_| DataEasyError::ReadingsFetch(format!("invalid timestamp {raw_ts:?}")))?;
    let ts = DateTime::<Utc>::from_timestamp(local_ts - local_minus_utc, 0)
        .ok_or_else(|| DataEasyError::ReadingsFetch(format!("timestamp {local_ts} out of range")))?;

    let readings: Vec<Reading> = channels
        .iter()
        .enumerate()
        .map(|(index, channel)| decode_reading(index, fields.get(index + LEADING_FIELDS).copied(), channel))
        .collect();
    debug!("Decoded {} readings from {} fields", readings.len(), fields.len());

    return Ok(ReadingSet::aligned(channels, ts, readings)?);
}

pub fn decode_reading(index: usize, raw: Option<&str>, channel: &ChannelDefinition) -> Reading {
    return Reading {
        channel_index: index,
        label: channel.display_label(),
        description: channel.description.clone(),
        value: decode_value(raw, channel),
        unit: channel.display_unit(),
    };
}

/// Scale numeric values by the channel multiplier, everything else is kept as sent
pub fn decode_value(raw: Option<&str>, channel: &ChannelDefinition) -> Option<ReadingValue> {
    let raw = raw?;
    let value = match parse_number(raw) {
        Some(number) => {
            let multiplier = channel.scale();
            if multiplier != 0.0 {
                ReadingValue::Number(round_cents(multiplier * number))
            } else {
                ReadingValue::Number(number)
            }
        },
        None => ReadingValue::Text(raw.to_string()),
    };
    return Some(value);
}

fn parse_number(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    return raw.parse::<f64>().ok().filter(|n| n.is_finite());
}

/* two decimals, halves round up */
fn round_cents(value: f64) -> f64 {
    return (value * 100.0 + 0.5).floor() / 100.0;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(multiplier: Option<&str>) -> ChannelDefinition {
        ChannelDefinition {
            label: Some("Temp".to_string()),
            t: Some("0".to_string()),
            su: Some("1".to_string()),
            st: Some("0".to_string()),
            description: Some("Flow temperature".to_string()),
            units: Some(" C ".to_string()),
            multiplier: multiplier.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_decode_value() {
        assert_eq!(decode_value(Some("10"), &channel(Some("2.5"))), Some(ReadingValue::Number(25.0)));
        assert_eq!(decode_value(Some("7"), &channel(None)), Some(ReadingValue::Number(7.0)));
        assert_eq!(decode_value(Some("ABC"), &channel(Some("2.5"))), Some(ReadingValue::Text("ABC".to_string())));
        assert_eq!(decode_value(None, &channel(Some("2.5"))), None);
        /* only plain decimals count as numbers */
        assert_eq!(decode_value(Some("Infinity"), &channel(None)), Some(ReadingValue::Text("Infinity".to_string())));
        assert_eq!(decode_value(Some("0x1A"), &channel(None)), Some(ReadingValue::Text("0x1A".to_string())));
    }

    #[test]
    fn test_decode_value_rounds_to_two_decimals() {
        assert_eq!(decode_value(Some("12346"), &channel(Some("0.001"))), Some(ReadingValue::Number(12.35)));
        assert_eq!(decode_value(Some("1"), &channel(Some("0.333"))), Some(ReadingValue::Number(0.33)));
    }

    #[test]
    fn test_zero_multiplier_keeps_raw_value() {
        assert_eq!(decode_value(Some("1.23456"), &channel(Some("0"))), Some(ReadingValue::Number(1.23456)));
    }

    #[test]
    fn test_decode_reading() {
        let reading = decode_reading(4, Some("10"), &channel(Some("2.5")));

        assert_eq!(reading.channel_index, 4);
        assert_eq!(reading.label, "Temp - 1");
        assert_eq!(reading.description, Some("Flow temperature".to_string()));
        assert_eq!(reading.unit, Some("C".to_string()));
    }

    #[test]
    fn test_parse_readings() {
        let schema = ChannelSchema::new(vec![channel(Some("2.5")), channel(None), channel(None)]);
        let set = parse_readings_with_offset("1709296200$x$10$--$\n1709290000$x$1$2$3\n", &schema, 3600).unwrap();

        assert_eq!(set.ts().timestamp(), 1709296200 - 3600);
        assert_eq!(set.len(), 3);
        assert_eq!(set.readings()[0].value, Some(ReadingValue::Number(25.0)));
        assert_eq!(set.readings()[1].value, Some(ReadingValue::Text("--".to_string())));
        assert_eq!(set.readings()[2].value, Some(ReadingValue::Text("".to_string())));
    }

    #[test]
    fn test_short_log_line_leaves_values_absent() {
        let schema = ChannelSchema::new(vec![channel(None), channel(None)]);
        let set = parse_readings_with_offset("1709296200$x$5", &schema, 0).unwrap();

        assert_eq!(set.readings()[0].value, Some(ReadingValue::Number(5.0)));
        assert_eq!(set.readings()[1].value, None);
        assert_eq!(set.readings()[1].channel_index, 1);
    }

    #[test]
    fn test_parse_readings_failures() {
        let schema = ChannelSchema::new(vec![channel(None)]);

        assert!(matches!(parse_readings_with_offset("", &schema, 0), Err(DataEasyError::ReadingsFetch(_))));
        assert!(matches!(parse_readings_with_offset("ERROR", &schema, 0), Err(DataEasyError::ReadingsFetch(_))));
        assert!(matches!(parse_readings_with_offset("yesterday$x$1", &schema, 0), Err(DataEasyError::ReadingsFetch(_))));
    }
}
