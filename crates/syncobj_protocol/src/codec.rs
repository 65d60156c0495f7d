//! JSON codec for message batches.

use crate::error::{ProtocolError, ProtocolResult};
use crate::messages::{ClientMessage, ServerMessage};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A client batch decoded item by item.
///
/// Items that fail to decode land in `rejected` together with their position
/// in the batch; they never prevent the remaining items from being decoded.
#[derive(Debug)]
pub struct DecodedBatch<C> {
    /// Successfully decoded messages, in batch order.
    pub messages: Vec<ClientMessage<C>>,
    /// Index and error of every item that could not be decoded.
    pub rejected: Vec<(usize, ProtocolError)>,
}

impl<C> DecodedBatch<C> {
    /// Returns true if every item decoded.
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Encodes a client batch as a JSON array.
pub fn encode_client_batch<C: Serialize>(batch: &[ClientMessage<C>]) -> ProtocolResult<String> {
    Ok(serde_json::to_string(batch)?)
}

/// Decodes a client batch.
///
/// Fails as a whole only if `raw` is not a JSON array.
pub fn decode_client_batch<C: DeserializeOwned>(raw: &str) -> ProtocolResult<DecodedBatch<C>> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    let items = match value {
        serde_json::Value::Array(items) => items,
        other => {
            return Err(ProtocolError::malformed(format!(
                "expected a JSON array of client messages, got {}",
                json_kind(&other)
            )))
        }
    };

    let mut messages = Vec::with_capacity(items.len());
    let mut rejected = Vec::new();
    for (index, item) in items.into_iter().enumerate() {
        match serde_json::from_value::<ClientMessage<C>>(item) {
            Ok(message) => messages.push(message),
            Err(e) => rejected.push((index, ProtocolError::from(e))),
        }
    }

    Ok(DecodedBatch { messages, rejected })
}

/// Encodes a single server message.
pub fn encode_server_message<S: Serialize, C: Serialize>(
    message: &ServerMessage<S, C>,
) -> ProtocolResult<String> {
    Ok(serde_json::to_string(message)?)
}

/// Decodes a single server message.
pub fn decode_server_message<S: DeserializeOwned, C: DeserializeOwned>(
    raw: &str,
) -> ProtocolResult<ServerMessage<S, C>> {
    Ok(serde_json::from_str(raw)?)
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Action;

    #[test]
    fn client_batch_roundtrip() {
        let batch = vec![
            ClientMessage::init("c1", "doc"),
            ClientMessage::update("doc", Action::pending("c1", 0, "hello".to_string())),
        ];

        let raw = encode_client_batch(&batch).unwrap();
        assert!(raw.starts_with('['));

        let decoded = decode_client_batch::<String>(&raw).unwrap();
        assert!(decoded.is_clean());
        assert_eq!(decoded.messages, batch);
    }

    #[test]
    fn bad_item_does_not_poison_batch() {
        let raw = r#"[
            {"type":"c:init","clientId":"c1","idObj":"doc"},
            {"type":"c:bogus"},
            {"type":"c:update","idObj":"doc","action":{"clientId":"c1","counter":1,"command":"x"}}
        ]"#;

        let decoded = decode_client_batch::<String>(raw).unwrap();
        assert_eq!(decoded.messages.len(), 2);
        assert_eq!(decoded.rejected.len(), 1);
        assert_eq!(decoded.rejected[0].0, 1);
    }

    #[test]
    fn non_array_batch_is_malformed() {
        let err = decode_client_batch::<String>(r#"{"type":"c:init"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
        assert!(err.to_string().contains("an object"));

        let err = decode_client_batch::<String>("not json").unwrap_err();
        assert!(matches!(err, ProtocolError::Json(_)));
    }

    #[test]
    fn server_message_roundtrip() {
        let msg: ServerMessage<Vec<u32>, u32> = ServerMessage::snapshot("doc", vec![1, 2], 2);
        let raw = encode_server_message(&msg).unwrap();
        let decoded: ServerMessage<Vec<u32>, u32> = decode_server_message(&raw).unwrap();
        assert_eq!(decoded, msg);
    }
}
