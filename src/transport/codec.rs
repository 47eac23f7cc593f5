//! NDJSON codec for message serialization

use super::TransportError;
use crate::protocol::{ControlMessage, Status};

/// Encode a status record into NDJSON format (JSON + newline)
pub fn encode_status(status: &Status) -> Result<String, TransportError> {
    let mut json = serde_json::to_string(status)?;
    json.push('\n');
    Ok(json)
}

/// Decode a line of JSON into a ControlMessage
pub fn decode_control_message(line: &str) -> Result<ControlMessage, TransportError> {
    let message: ControlMessage = serde_json::from_str(line.trim())?;
    Ok(message)
}
