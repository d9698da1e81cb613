use super::{DataEasyError, ERROR_MARKER};
use crate::models::MeterRecord;
use log::debug;

/// Parse `REGISTRY_METER.dbs`.
///
/// The first line is a title, the second one holds the column names and every
/// following line describes one meter. Lines are separated by CRLF.
pub fn parse_registry(payload: &str) -> Result<Vec<MeterRecord>, DataEasyError> {
    if payload.contains(ERROR_MARKER) {
        return Err(DataEasyError::RegistryFormat("server reported an error".to_string()));
    }

    /* only the end is trimmed, the title line may be blank */
    let lines: Vec<&str> = payload.trim_end().split("\r\n").collect();
    let headers: Vec<&str> = lines
        .get(1)
        .ok_or_else(|| DataEasyError::RegistryFormat("header line is missing".to_string()))?
        .split(';')
        .collect();

    let mut meters = Vec::new();
    for line in lines.iter().skip(2) {
        if line.is_empty() {
            continue;
        }

        let record = MeterRecord::from_fields(headers.iter().copied().zip(line.split(';')))
            .map_err(|e| DataEasyError::RegistryFormat(e.to_string()))?;
        debug!("Registry lists meter {}", record.serial());
        meters.push(record);
    }

    return Ok(meters);
}
