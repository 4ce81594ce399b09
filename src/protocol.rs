// MIT License - Copyright (c) 2026 Peter Wright
// JSON-RPC requests, incoming message classification and payload decoding

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::codec::{Address, format_word, parse_word};
use crate::constants::{DeviceKind, method, rpc_code};
use crate::error::{DoozError, Result, RpcErrorObject};
use crate::groups::GroupKind;

/// Value written by a `set` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetPayload {
    /// Plain 0-100 level (lights and shutters).
    Level(u8),
    /// `"on"` / `"off"` switch without touching the dimmer level.
    Switch(bool),
    /// 16-bit heater command word, sent as 4 hex digits.
    Raw(u16),
}

/// Requests the bridge sends to the hub.
///
/// # Session
///
/// After connect the bridge sends `authenticate`, then `discover`,
/// `discover_groups` and `discover_scenes`. From then on the hub pushes
/// `notify_state` for every output change and the bridge issues `get`/`set`
/// on demand.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// `authenticate {login, password}`: the hub answers a status value.
    Authenticate { login: String, password: String },
    /// `discover`: full mesh tree.
    Discover,
    /// `discover_groups`: group addresses and their members.
    DiscoverGroups,
    /// `discover_scenes`: configured scenarios.
    DiscoverScenes,
    /// `get {address}`: current state report of one output.
    Get { address: Address },
    /// `set {address, level|raw}`.
    Set { address: Address, payload: SetPayload },
    /// `set_scenario {request: {command: "start scenario", scenario_id}}`.
    StartScenario { scenario_id: u32 },
}

impl Request {
    pub fn method(&self) -> &'static str {
        match self {
            Request::Authenticate { .. } => method::AUTHENTICATE,
            Request::Discover => method::DISCOVER,
            Request::DiscoverGroups => method::DISCOVER_GROUPS,
            Request::DiscoverScenes => method::DISCOVER_SCENES,
            Request::Get { .. } => method::GET,
            Request::Set { .. } => method::SET,
            Request::StartScenario { .. } => method::SET_SCENARIO,
        }
    }

    pub fn params(&self) -> Value {
        match self {
            Request::Authenticate { login, password } => {
                json!({ "login": login, "password": password })
            }
            Request::Discover | Request::DiscoverGroups | Request::DiscoverScenes => Value::Null,
            Request::Get { address } => json!({ "address": address.to_string() }),
            Request::Set { address, payload } => {
                let mut params = Map::new();
                params.insert("address".into(), Value::String(address.to_string()));
                match payload {
                    SetPayload::Level(level) => {
                        params.insert("level".into(), json!(level));
                    }
                    SetPayload::Switch(on) => {
                        params.insert("level".into(), json!(if *on { "on" } else { "off" }));
                    }
                    SetPayload::Raw(word) => {
                        params.insert("raw".into(), Value::String(format_word(*word)));
                    }
                }
                Value::Object(params)
            }
            Request::StartScenario { scenario_id } => json!({
                "request": { "command": "start scenario", "scenario_id": scenario_id }
            }),
        }
    }
}

/// Serialize an outbound JSON-RPC 2.0 request envelope.
pub fn encode_request(id: u64, method: &str, params: &Value) -> String {
    let envelope = if params.is_null() {
        json!({ "jsonrpc": "2.0", "method": method, "id": id })
    } else {
        json!({ "jsonrpc": "2.0", "method": method, "params": params, "id": id })
    };
    envelope.to_string()
}

fn hex_word<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u16, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Word {
        Text(String),
        Number(u16),
    }
    match Word::deserialize(deserializer)? {
        Word::Text(s) => parse_word(&s).map_err(serde::de::Error::custom),
        Word::Number(n) => Ok(n),
    }
}

/// State payload reported for one output.
///
/// Variants are tried in order: a `raw` word wins over levels, and a
/// `target` makes the report a shutter position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum StateReport {
    Raw {
        #[serde(deserialize_with = "hex_word")]
        raw: u16,
    },
    Position { level: u32, target: u32 },
    Level { level: u32 },
}

impl StateReport {
    pub fn decode(value: &Value) -> Result<Self> {
        if let Ok(report) = Self::deserialize(value) {
            return Ok(report);
        }
        // Heaters answer with the word as a hex string in `level`.
        value
            .get("level")
            .and_then(Value::as_str)
            .and_then(|s| parse_word(s).ok())
            .map(|raw| StateReport::Raw { raw })
            .ok_or_else(|| DoozError::Decode {
                details: format!("state report without raw/level: {}", value),
            })
    }
}

/// Parameters of a `notify_state` notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyState {
    pub address: Address,
    pub report: StateReport,
}

impl NotifyState {
    pub fn decode(params: &Value) -> Result<Self> {
        let address = params
            .get("address")
            .and_then(Value::as_str)
            .ok_or_else(|| DoozError::Decode {
                details: format!("notify_state without address: {}", params),
            })?;
        Ok(Self {
            address: Address::parse(address)?,
            report: StateReport::decode(params)?,
        })
    }
}

/// A server-pushed message with no correlation id.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub method: String,
    pub params: Value,
}

/// Outcome of classifying one framed JSON text.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// Array of messages, each classified on its own.
    Batch(Vec<Value>),
    Notification(Notification),
    /// Error response; `id` is `None` when the hub could not attribute it.
    Error { id: Option<u64>, error: RpcErrorObject },
    Response { id: u64, result: Value },
    /// Locally detected protocol problem (bad shape, unknown message).
    Invalid(RpcErrorObject),
}

impl Incoming {
    /// Parse and classify a framed text.
    pub fn parse(text: &str) -> Self {
        match serde_json::from_str::<Value>(text) {
            Ok(value) => Self::classify(value),
            Err(e) => {
                debug!("Unparseable frame: {}", e);
                Incoming::Invalid(RpcErrorObject::new(
                    rpc_code::PARSE_ERROR,
                    format!("Unable to parse message: '{}'", text),
                ))
            }
        }
    }

    /// Classify an already-parsed value, in priority order: batch, non-object,
    /// missing id, error, result, method, unknown.
    pub fn classify(value: Value) -> Self {
        let mut obj = match value {
            Value::Array(items) => return Incoming::Batch(items),
            Value::Object(obj) => obj,
            other => {
                return Incoming::Invalid(RpcErrorObject::new(
                    rpc_code::PARSE_ERROR,
                    format!("Unable to parse message: '{}'", other),
                ));
            }
        };

        if !obj.contains_key("id") {
            return Incoming::Notification(take_notification(&mut obj));
        }

        let id = obj.get("id").and_then(Value::as_u64);

        if let Some(error) = obj.get("error").filter(|e| !e.is_null()) {
            let error = RpcErrorObject::deserialize(error).unwrap_or_else(|_| {
                RpcErrorObject::new(rpc_code::UNKNOWN, format!("Malformed error object: {}", error))
            });
            return Incoming::Error { id, error };
        }

        if let Some(result) = obj.remove("result") {
            return match id {
                Some(id) => Incoming::Response { id, result },
                None => Incoming::Invalid(RpcErrorObject::new(
                    rpc_code::INVALID_REQUEST,
                    "Response without a numeric id",
                )),
            };
        }

        if obj.contains_key("method") {
            return Incoming::Notification(take_notification(&mut obj));
        }

        Incoming::Invalid(RpcErrorObject::new(rpc_code::UNKNOWN, "Unknown message"))
    }
}

fn take_notification(obj: &mut Map<String, Value>) -> Notification {
    let method = match obj.remove("method") {
        Some(Value::String(m)) => m,
        _ => String::new(),
    };
    Notification {
        method,
        params: obj.remove("params").unwrap_or(Value::Null),
    }
}

/// One controllable output found by `discover`.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceDescriptor {
    pub address: Address,
    pub name: String,
    pub room: Option<String>,
    pub mac: Option<String>,
    pub kind: DeviceKind,
}

/// A group found by `discover_groups`.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupDescriptor {
    pub address: Address,
    pub name: String,
    pub room: Option<String>,
    pub kind: GroupKind,
    pub members: Vec<Address>,
}

/// A scenario found by `discover_scenes`.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneDescriptor {
    pub id: u32,
    pub name: String,
    pub address: Option<Address>,
}

#[derive(Deserialize)]
struct RoomRef {
    name: String,
}

#[derive(Deserialize)]
struct RawEquipment {
    address: Address,
    name: String,
    #[serde(rename = "output conf")]
    output_conf: u8,
    room: Option<RoomRef>,
}

#[derive(Deserialize)]
struct RawGroup {
    address: Address,
    name: String,
    #[serde(rename = "output conf")]
    output_conf: u8,
    room: Option<RoomRef>,
    #[serde(default)]
    equipments: Vec<Address>,
}

#[derive(Deserialize)]
struct RawScene {
    id: u32,
    name: String,
    address: Option<Address>,
}

fn envelope<'a>(result: &'a Value, key: &str) -> Result<&'a Value> {
    result.get(key).ok_or_else(|| DoozError::Decode {
        details: format!("discovery result has no '{}' field", key),
    })
}

/// Decode the mesh tree returned by `discover`.
///
/// Only nodes in `CONFIGURED` state contribute. A shutter node drives one
/// motor from several outputs, so only its first equipment is kept.
pub fn decode_mesh(result: &Value) -> Result<Vec<DeviceDescriptor>> {
    let mesh = envelope(result, "mesh")?
        .as_object()
        .ok_or_else(|| DoozError::Decode {
            details: "'mesh' is not an object".into(),
        })?;

    let mut devices = Vec::new();
    for (node_id, node) in mesh {
        if node.get("conf state").and_then(Value::as_str) != Some("CONFIGURED") {
            debug!("Skipping unconfigured mesh node {}", node_id);
            continue;
        }
        let Some(equipments) = node.get("nodes").and_then(Value::as_array) else {
            warn!("Mesh node {} has no equipment list", node_id);
            continue;
        };
        let mac = node
            .get("mac_address")
            .and_then(Value::as_str)
            .map(str::to_string);

        for entry in equipments {
            let equipment = match RawEquipment::deserialize(entry) {
                Ok(e) => e,
                Err(e) => {
                    warn!("Skipping malformed equipment on node {}: {}", node_id, e);
                    continue;
                }
            };
            let Some(kind) = DeviceKind::from_u8(equipment.output_conf) else {
                warn!(
                    "Skipping equipment {} with unknown output conf {}",
                    equipment.address, equipment.output_conf
                );
                continue;
            };
            devices.push(DeviceDescriptor {
                address: equipment.address,
                name: equipment.name,
                room: equipment.room.map(|r| r.name),
                mac: mac.clone(),
                kind,
            });
            if kind == DeviceKind::Shutter {
                break;
            }
        }
    }
    Ok(devices)
}

/// Decode the result of `discover_groups`.
pub fn decode_groups(result: &Value) -> Result<Vec<GroupDescriptor>> {
    let entries = envelope(result, "groups")?
        .as_array()
        .ok_or_else(|| DoozError::Decode {
            details: "'groups' is not an array".into(),
        })?;

    let mut groups = Vec::new();
    for entry in entries {
        let group = match RawGroup::deserialize(entry) {
            Ok(g) => g,
            Err(e) => {
                warn!("Skipping malformed group: {}", e);
                continue;
            }
        };
        let Some(kind) = DeviceKind::from_u8(group.output_conf).and_then(GroupKind::for_device_kind)
        else {
            warn!(
                "Skipping group {} with unsupported output conf {}",
                group.address, group.output_conf
            );
            continue;
        };
        groups.push(GroupDescriptor {
            address: group.address,
            name: group.name,
            room: group.room.map(|r| r.name),
            kind,
            members: group.equipments,
        });
    }
    Ok(groups)
}

/// Decode the result of `discover_scenes`.
pub fn decode_scenes(result: &Value) -> Result<Vec<SceneDescriptor>> {
    let entries = envelope(result, "scenes")?
        .as_array()
        .ok_or_else(|| DoozError::Decode {
            details: "'scenes' is not an array".into(),
        })?;

    Ok(entries
        .iter()
        .filter_map(|entry| match RawScene::deserialize(entry) {
            Ok(s) => Some(SceneDescriptor {
                id: s.id,
                name: s.name,
                address: s.address,
            }),
            Err(e) => {
                warn!("Skipping malformed scene: {}", e);
                None
            }
        })
        .collect())
}

/// Status word carried by the answer to a heater `set`.
///
/// The hub echoes the command word in `raw`. Only an answer without the echo
/// carries the heater's current word, as hex in `level`.
pub fn heater_status(result: &Value) -> Option<u16> {
    if result.get("raw").is_some() {
        return None;
    }
    result
        .get("level")
        .and_then(Value::as_str)
        .and_then(|s| parse_word(s).ok())
}

/// Whether an `authenticate` result means the hub accepted the credentials.
///
/// The hub answers either a status string or a numeric session value;
/// only `false` and non-"ok" strings are rejections.
pub fn authentication_accepted(result: &Value) -> bool {
    match result {
        Value::Bool(b) => *b,
        Value::String(s) => s.eq_ignore_ascii_case("ok"),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_params() {
        let addr = Address::new(2);
        assert_eq!(
            Request::Set { address: addr, payload: SetPayload::Level(40) }.params(),
            json!({"address": "0002", "level": 40})
        );
        assert_eq!(
            Request::Set { address: addr, payload: SetPayload::Switch(false) }.params(),
            json!({"address": "0002", "level": "off"})
        );
        assert_eq!(
            Request::Set { address: addr, payload: SetPayload::Raw(0x6560) }.params(),
            json!({"address": "0002", "raw": "6560"})
        );
        assert_eq!(
            Request::StartScenario { scenario_id: 7 }.params(),
            json!({"request": {"command": "start scenario", "scenario_id": 7}})
        );
        assert_eq!(Request::Get { address: addr }.method(), "get");
    }

    #[test]
    fn test_encode_request() {
        let text = encode_request(3, "get", &json!({"address": "0002"}));
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["jsonrpc"], "2.0");
        assert_eq!(v["id"], 3);
        assert_eq!(v["params"]["address"], "0002");

        let text = encode_request(4, "discover", &Value::Null);
        let v: Value = serde_json::from_str(&text).unwrap();
        assert!(v.get("params").is_none());
    }

    #[test]
    fn test_state_report_variants() {
        assert_eq!(
            StateReport::decode(&json!({"level": 30})).unwrap(),
            StateReport::Level { level: 30 }
        );
        assert_eq!(
            StateReport::decode(&json!({"level": 30, "target": 80})).unwrap(),
            StateReport::Position { level: 30, target: 80 }
        );
        assert_eq!(
            StateReport::decode(&json!({"raw": "8000", "level": 0})).unwrap(),
            StateReport::Raw { raw: 0x8000 }
        );
        assert_eq!(
            StateReport::decode(&json!({"address": "0004", "level": "6560"})).unwrap(),
            StateReport::Raw { raw: 0x6560 }
        );
        assert!(matches!(
            StateReport::decode(&json!({"level": "off"})),
            Err(DoozError::Decode { .. })
        ));
        assert!(matches!(
            StateReport::decode(&json!({"status": "ok"})),
            Err(DoozError::Decode { .. })
        ));
    }

    #[test]
    fn test_notify_state_decode() {
        let n = NotifyState::decode(&json!({"address": "000A", "level": 55})).unwrap();
        assert_eq!(n.address, Address::new(0x0A));
        assert_eq!(n.report, StateReport::Level { level: 55 });
        assert!(NotifyState::decode(&json!({"level": 55})).is_err());
        assert!(matches!(
            NotifyState::decode(&json!({"address": "XYZ!", "level": 55})),
            Err(DoozError::InvalidAddress { .. })
        ));
    }

    #[test]
    fn test_classify_order() {
        assert!(matches!(Incoming::parse("[1,2]"), Incoming::Batch(v) if v.len() == 2));
        assert!(matches!(
            Incoming::parse("42"),
            Incoming::Invalid(e) if e.code == rpc_code::PARSE_ERROR
        ));
        assert!(matches!(
            Incoming::parse(r#"{"method":"notify_state","params":{}}"#),
            Incoming::Notification(n) if n.method == "notify_state"
        ));
        assert!(matches!(
            Incoming::parse(r#"{"id":5,"error":{"code":-32601,"message":"nope"},"result":1}"#),
            Incoming::Error { id: Some(5), error } if error.code == -32601
        ));
        assert!(matches!(
            Incoming::parse(r#"{"id":6,"result":{"level":1}}"#),
            Incoming::Response { id: 6, .. }
        ));
        assert!(matches!(
            Incoming::parse(r#"{"id":7,"method":"ping"}"#),
            Incoming::Notification(n) if n.method == "ping"
        ));
        assert!(matches!(
            Incoming::parse(r#"{"id":8}"#),
            Incoming::Invalid(e) if e.code == rpc_code::UNKNOWN
        ));
        assert!(matches!(
            Incoming::parse(r#"{"id":"#),
            Incoming::Invalid(e) if e.code == rpc_code::PARSE_ERROR
        ));
    }

    #[test]
    fn test_null_result_is_still_a_response() {
        assert!(matches!(
            Incoming::parse(r#"{"id":9,"result":null,"error":null}"#),
            Incoming::Response { id: 9, result: Value::Null }
        ));
    }

    #[test]
    fn test_decode_mesh() {
        let result = json!({
            "mesh": {
                "node1": {
                    "conf state": "CONFIGURED",
                    "mac_address": "AA:BB",
                    "nodes": [
                        {"address": "0002", "name": "Ceiling", "output conf": 1, "room": {"name": "Kitchen"}},
                        {"address": "0003", "name": "Bad"},
                        {"address": "0004", "name": "Spot", "output conf": 0}
                    ]
                },
                "node2": {
                    "conf state": "CONFIGURED",
                    "nodes": [
                        {"address": "0010", "name": "Blind", "output conf": 3, "room": {"name": "Bedroom"}},
                        {"address": "0011", "name": "Blind B", "output conf": 3}
                    ]
                },
                "node3": {
                    "conf state": "UNCONFIGURED",
                    "nodes": [{"address": "0020", "name": "X", "output conf": 1}]
                }
            }
        });
        let devices = decode_mesh(&result).unwrap();
        let addrs: Vec<String> = devices.iter().map(|d| d.address.to_string()).collect();
        assert_eq!(addrs, vec!["0002", "0004", "0010"]);
        assert_eq!(devices[0].room.as_deref(), Some("Kitchen"));
        assert_eq!(devices[0].mac.as_deref(), Some("AA:BB"));
        assert_eq!(devices[1].room, None);
        assert_eq!(devices[2].kind, DeviceKind::Shutter);
    }

    #[test]
    fn test_decode_mesh_bad_envelope() {
        assert!(matches!(decode_mesh(&json!({})), Err(DoozError::Decode { .. })));
        assert!(matches!(decode_mesh(&json!({"mesh": []})), Err(DoozError::Decode { .. })));
    }

    #[test]
    fn test_decode_groups_and_scenes() {
        let groups = decode_groups(&json!({
            "groups": [
                {"address": "C001", "name": "All lights", "output conf": 1, "equipments": ["0002", "0004"]},
                {"address": "C002", "name": "Blinds", "output conf": 3, "room": {"name": "Up"}, "equipments": ["0010"]},
                {"address": "C003", "name": "Heaters", "output conf": 4, "equipments": []},
                {"address": "zz", "name": "Broken", "output conf": 1}
            ]
        }))
        .unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].kind, GroupKind::Light);
        assert_eq!(groups[0].members, vec![Address::new(2), Address::new(4)]);
        assert_eq!(groups[1].kind, GroupKind::Shutter);

        let scenes = decode_scenes(&json!({
            "scenes": [{"id": 3, "name": "Movie", "address": "0030"}, {"name": "no id"}]
        }))
        .unwrap();
        assert_eq!(scenes.len(), 1);
        assert_eq!(scenes[0].address, Some(Address::new(0x30)));
    }

    #[test]
    fn test_heater_status() {
        assert_eq!(heater_status(&json!({"level": "8041"})), Some(0x8041));
        assert_eq!(heater_status(&json!({"raw": "8000", "level": "8041"})), None);
        assert_eq!(heater_status(&json!({"level": 4})), None);
        assert_eq!(heater_status(&json!("ok")), None);
    }

    #[test]
    fn test_authentication_accepted() {
        assert!(authentication_accepted(&json!("ok")));
        assert!(authentication_accepted(&json!("OK")));
        assert!(authentication_accepted(&json!(3)));
        assert!(authentication_accepted(&json!(true)));
        assert!(!authentication_accepted(&json!(false)));
        assert!(!authentication_accepted(&json!("denied")));
    }
}
