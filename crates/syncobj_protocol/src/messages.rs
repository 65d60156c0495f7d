//! Protocol messages for shared object replication.
//!
//! Client messages travel as a batch (one JSON array per flush). Server
//! messages travel one at a time, per listener per object.

use crate::action::Action;
use serde::{Deserialize, Serialize};

/// A message sent from a client replica to the object store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage<C> {
    /// Asks the store for the current value of an object and subscribes to it.
    #[serde(rename = "c:init")]
    Init(InitRequest),
    /// Submits one action against an object.
    #[serde(rename = "c:update")]
    Update(UpdateRequest<C>),
    /// Reports the confirmed version the client holds for every object.
    #[serde(rename = "c:reset")]
    Reset(ResetRequest),
}

impl<C> ClientMessage<C> {
    /// Creates an init request.
    pub fn init(client_id: impl Into<String>, id_obj: impl Into<String>) -> Self {
        ClientMessage::Init(InitRequest {
            client_id: client_id.into(),
            id_obj: id_obj.into(),
        })
    }

    /// Creates an update request.
    pub fn update(id_obj: impl Into<String>, action: Action<C>) -> Self {
        ClientMessage::Update(UpdateRequest {
            id_obj: id_obj.into(),
            action,
        })
    }

    /// Creates a reset request.
    pub fn reset(client_id: impl Into<String>, payload: Vec<ObjectVersion>) -> Self {
        ClientMessage::Reset(ResetRequest {
            client_id: client_id.into(),
            payload,
        })
    }

    /// Returns the wire type tag.
    pub fn type_name(&self) -> &'static str {
        match self {
            ClientMessage::Init(_) => "c:init",
            ClientMessage::Update(_) => "c:update",
            ClientMessage::Reset(_) => "c:reset",
        }
    }

    /// Returns the target object, if the message addresses a single one.
    pub fn id_obj(&self) -> Option<&str> {
        match self {
            ClientMessage::Init(req) => Some(&req.id_obj),
            ClientMessage::Update(req) => Some(&req.id_obj),
            ClientMessage::Reset(_) => None,
        }
    }
}

/// `c:init` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitRequest {
    /// Requesting client session.
    pub client_id: String,
    /// Object to observe.
    pub id_obj: String,
}

/// `c:update` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRequest<C> {
    /// Target object.
    pub id_obj: String,
    /// The uncommitted action.
    pub action: Action<C>,
}

/// `c:reset` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetRequest {
    /// Reporting client session.
    pub client_id: String,
    /// Confirmed version per observed object.
    pub payload: Vec<ObjectVersion>,
}

/// One `{idObj, version}` entry of a reset request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectVersion {
    /// Object id.
    pub id_obj: String,
    /// Confirmed version held by the client.
    pub version: u64,
}

impl ObjectVersion {
    /// Creates a new entry.
    pub fn new(id_obj: impl Into<String>, version: u64) -> Self {
        Self {
            id_obj: id_obj.into(),
            version,
        }
    }
}

/// A message sent from the object store to one listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage<S, C> {
    /// Full snapshot of an object.
    #[serde(rename = "s:init")]
    Init(SnapshotMessage<S>),
    /// Committed actions the listener has not received yet.
    #[serde(rename = "s:update")]
    Update(SliceMessage<C>),
}

impl<S, C> ServerMessage<S, C> {
    /// Creates a snapshot message.
    pub fn snapshot(id_obj: impl Into<String>, data: S, version: u64) -> Self {
        ServerMessage::Init(SnapshotMessage {
            id_obj: id_obj.into(),
            data,
            version,
        })
    }

    /// Creates an update slice message.
    pub fn slice(id_obj: impl Into<String>, actions: Vec<Action<C>>) -> Self {
        ServerMessage::Update(SliceMessage {
            id_obj: id_obj.into(),
            actions,
        })
    }

    /// Returns the wire type tag.
    pub fn type_name(&self) -> &'static str {
        match self {
            ServerMessage::Init(_) => "s:init",
            ServerMessage::Update(_) => "s:update",
        }
    }

    /// Returns the object this message refers to.
    pub fn id_obj(&self) -> &str {
        match self {
            ServerMessage::Init(msg) => &msg.id_obj,
            ServerMessage::Update(msg) => &msg.id_obj,
        }
    }

    /// Returns true for a full snapshot.
    pub fn is_snapshot(&self) -> bool {
        matches!(self, ServerMessage::Init(_))
    }
}

/// `s:init` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMessage<S> {
    /// Object id.
    pub id_obj: String,
    /// Current authoritative value.
    pub data: S,
    /// Version corresponding to `data`.
    pub version: u64,
}

/// `s:update` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SliceMessage<C> {
    /// Object id.
    pub id_obj: String,
    /// Committed actions in version order.
    pub actions: Vec<Action<C>>,
}

impl<C> SliceMessage<C> {
    /// Version of the newest action in the slice.
    pub fn last_version(&self) -> Option<u64> {
        self.actions.last().and_then(|a| a.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_message_tags() {
        let init: ClientMessage<u8> = ClientMessage::init("c1", "doc");
        assert_eq!(
            serde_json::to_value(&init).unwrap(),
            json!({ "type": "c:init", "clientId": "c1", "idObj": "doc" })
        );

        let update = ClientMessage::update("doc", Action::pending("c1", 0, 5u8));
        assert_eq!(
            serde_json::to_value(&update).unwrap(),
            json!({
                "type": "c:update",
                "idObj": "doc",
                "action": { "clientId": "c1", "counter": 0, "command": 5 }
            })
        );

        let reset: ClientMessage<u8> =
            ClientMessage::reset("c1", vec![ObjectVersion::new("doc", 3)]);
        assert_eq!(
            serde_json::to_value(&reset).unwrap(),
            json!({
                "type": "c:reset",
                "clientId": "c1",
                "payload": [{ "idObj": "doc", "version": 3 }]
            })
        );
    }

    #[test]
    fn server_message_tags() {
        let snapshot: ServerMessage<Vec<String>, u8> =
            ServerMessage::snapshot("doc", vec!["a".into()], 2);
        assert_eq!(
            serde_json::to_value(&snapshot).unwrap(),
            json!({ "type": "s:init", "idObj": "doc", "data": ["a"], "version": 2 })
        );
        assert!(snapshot.is_snapshot());

        let slice: ServerMessage<Vec<String>, u8> = ServerMessage::slice(
            "doc",
            vec![Action::pending("c1", 0, 1u8).committed(1).echo()],
        );
        assert_eq!(
            serde_json::to_value(&slice).unwrap(),
            json!({
                "type": "s:update",
                "idObj": "doc",
                "actions": [{ "clientId": "c1", "counter": 0, "command": null, "version": 1 }]
            })
        );
        assert_eq!(slice.id_obj(), "doc");
    }

    #[test]
    fn decode_server_update() {
        let raw = r#"{"type":"s:update","idObj":"d","actions":[
            {"clientId":"a","counter":1,"command":"x","version":3},
            {"clientId":"b","counter":4,"command":null,"version":4}]}"#;
        let msg: ServerMessage<String, String> = serde_json::from_str(raw).unwrap();
        match msg {
            ServerMessage::Update(slice) => {
                assert_eq!(slice.actions.len(), 2);
                assert_eq!(slice.actions[0].command.as_deref(), Some("x"));
                assert_eq!(slice.actions[1].command, None);
                assert_eq!(slice.last_version(), Some(4));
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn id_obj_accessor() {
        let init: ClientMessage<u8> = ClientMessage::init("c1", "doc");
        assert_eq!(init.id_obj(), Some("doc"));
        assert_eq!(init.type_name(), "c:init");

        let reset: ClientMessage<u8> = ClientMessage::reset("c1", vec![]);
        assert_eq!(reset.id_obj(), None);
    }
}
