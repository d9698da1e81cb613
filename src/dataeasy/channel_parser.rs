use super::{DataEasyError, ERROR_MARKER};
use crate::models::{ChannelDefinition, ChannelSchema};
use log::debug;

/// Parse `alldb.dbs` of a device.
///
/// The dump is a sequence of line pairs, the first line of a pair names the
/// fields and the second one carries the values. Both are framed by a leading
/// and a trailing delimiter field which are not part of the channel. Pairs
/// without values are dropped and do not take up a channel index.
pub fn parse_channels(payload: &str) -> Result<ChannelSchema, DataEasyError> {
    if payload.contains(ERROR_MARKER) {
        return Err(DataEasyError::ChannelFetch("server reported an error".to_string()));
    }

    let lines: Vec<&str> = payload.split('\n').collect();
    let mut channels = Vec::new();

    for pair in lines.chunks_exact(2) {
        let keys: Vec<&str> = pair[0].split(';').collect();
        let values: Vec<&str> = pair[1].split(';').collect();

        if values.len() <= 2 {
            debug!("Skipping channel without values");
            continue;
        }

        let fields = (1..values.len() - 1)
            .filter_map(|j| keys.get(j).map(|key| (*key, values[j])));
        let channel = ChannelDefinition::from_fields(fields)
            .map_err(|e| DataEasyError::ChannelFetch(e.to_string()))?;
        channels.push(channel);
    }

    return Ok(ChannelSchema::new(channels));
}
