//! Component payload values.
//!
//! Component data is a tree of [`Value`]s rooted in a string-keyed map
//! ([`ComponentData`]). The set of kinds is closed, so every payload can be
//! serialized, compared and hashed without knowing which gameplay type it
//! belongs to. Nesting is bounded by [`MAX_DEPTH`]; the root map counts as
//! depth 1 and every nested list or map adds one level.
//!
//! # JSON encoding
//!
//! Scalars, lists and maps map onto their JSON counterparts. Vectors and
//! colours have no JSON equivalent, so they are written as single-key objects:
//!
//! ```
//! use bastion_ecs::value::Value;
//!
//! let v = Value::Vec2([1.0, 2.0]);
//! assert_eq!(v.to_json(), serde_json::json!({"$vec2": [1.0, 2.0]}));
//! assert_eq!(Value::from_json(&v.to_json()).unwrap(), v);
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::EcsError;

/// Maximum nesting depth of component data, root map included.
pub const MAX_DEPTH: usize = 10;

/// The root of every component payload.
pub type ComponentData = BTreeMap<String, Value>;

const VEC2_TAG: &str = "$vec2";
const VEC3_TAG: &str = "$vec3";
const COLOR_TAG: &str = "$color";

// ---------------------------------------------------------------------------
// ValueKind
// ---------------------------------------------------------------------------

/// The kind of a [`Value`], used by schemas to declare field types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Null,
    Bool,
    Int,
    Float,
    String,
    Vec2,
    Vec3,
    Color,
    List,
    Map,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Null => "null",
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::String => "string",
            ValueKind::Vec2 => "vec2",
            ValueKind::Vec3 => "vec3",
            ValueKind::Color => "color",
            ValueKind::List => "list",
            ValueKind::Map => "map",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// A single serializable datum inside component data.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Vec2([f64; 2]),
    Vec3([f64; 3]),
    /// RGBA, each channel nominally in `0.0..=1.0`.
    Color([f32; 4]),
    List(Vec<Value>),
    Map(ComponentData),
}

impl Value {
    /// The kind of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::String(_) => ValueKind::String,
            Value::Vec2(_) => ValueKind::Vec2,
            Value::Vec3(_) => ValueKind::Vec3,
            Value::Color(_) => ValueKind::Color,
            Value::List(_) => ValueKind::List,
            Value::Map(_) => ValueKind::Map,
        }
    }

    /// Whether this value is acceptable where `kind` is expected.
    ///
    /// Int-to-float is the only implicit widening.
    pub fn matches_kind(&self, kind: ValueKind) -> bool {
        let own = self.kind();
        own == kind || (own == ValueKind::Int && kind == ValueKind::Float)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view of the value; ints are widened.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&ComponentData> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut ComponentData> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Nesting depth of this value: scalars are 0, containers add one level
    /// on top of their deepest child.
    pub fn depth(&self) -> usize {
        match self {
            Value::List(items) => 1 + items.iter().map(Value::depth).max().unwrap_or(0),
            Value::Map(map) => 1 + map.values().map(Value::depth).max().unwrap_or(0),
            _ => 0,
        }
    }

    /// Encode as JSON. Non-finite floats become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::from(*i),
            Value::Float(f) => float_to_json(*f),
            Value::String(s) => Json::String(s.clone()),
            Value::Vec2(v) => tagged(VEC2_TAG, v.iter().map(|c| float_to_json(*c))),
            Value::Vec3(v) => tagged(VEC3_TAG, v.iter().map(|c| float_to_json(*c))),
            Value::Color(c) => tagged(COLOR_TAG, c.iter().map(|c| float_to_json(f64::from(*c)))),
            Value::List(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(map) => data_to_json(map),
        }
    }

    /// Decode a JSON value, enforcing [`MAX_DEPTH`] with the value itself
    /// counted as sitting directly under a root map.
    pub fn from_json(json: &serde_json::Value) -> Result<Value, EcsError> {
        decode(json, 2)
    }
}

fn float_to_json(f: f64) -> serde_json::Value {
    serde_json::Number::from_f64(f)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

fn tagged(
    tag: &str,
    components: impl Iterator<Item = serde_json::Value>,
) -> serde_json::Value {
    let mut obj = serde_json::Map::new();
    obj.insert(tag.to_owned(), serde_json::Value::Array(components.collect()));
    serde_json::Value::Object(obj)
}

/// Recognise the single-key vector/colour encodings.
fn decode_tagged(obj: &serde_json::Map<String, serde_json::Value>) -> Option<Value> {
    if obj.len() != 1 {
        return None;
    }
    let (tag, payload) = obj.iter().next()?;
    let numbers: Vec<f64> = payload
        .as_array()?
        .iter()
        .map(serde_json::Value::as_f64)
        .collect::<Option<_>>()?;
    match (tag.as_str(), numbers.as_slice()) {
        (VEC2_TAG, [x, y]) => Some(Value::Vec2([*x, *y])),
        (VEC3_TAG, [x, y, z]) => Some(Value::Vec3([*x, *y, *z])),
        (COLOR_TAG, [r, g, b, a]) => Some(Value::Color([*r as f32, *g as f32, *b as f32, *a as f32])),
        _ => None,
    }
}

fn decode(json: &serde_json::Value, depth: usize) -> Result<Value, EcsError> {
    use serde_json::Value as Json;
    match json {
        Json::Null => Ok(Value::Null),
        Json::Bool(b) => Ok(Value::Bool(*b)),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Int(i))
            } else if n.is_u64() {
                Err(EcsError::MalformedData {
                    details: format!("integer {n} does not fit in i64"),
                })
            } else {
                n.as_f64().map(Value::Float).ok_or_else(|| EcsError::MalformedData {
                    details: format!("number {n} is not representable"),
                })
            }
        }
        Json::String(s) => Ok(Value::String(s.clone())),
        Json::Array(items) => {
            check_depth(depth)?;
            items
                .iter()
                .map(|item| decode(item, depth + 1))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List)
        }
        Json::Object(obj) => {
            if let Some(v) = decode_tagged(obj) {
                return Ok(v);
            }
            check_depth(depth)?;
            decode_map(obj, depth).map(Value::Map)
        }
    }
}

fn decode_map(
    obj: &serde_json::Map<String, serde_json::Value>,
    depth: usize,
) -> Result<ComponentData, EcsError> {
    obj.iter()
        .map(|(k, v)| Ok((k.clone(), decode(v, depth + 1)?)))
        .collect()
}

fn check_depth(depth: usize) -> Result<(), EcsError> {
    if depth > MAX_DEPTH {
        return Err(EcsError::MalformedData {
            details: format!("nesting exceeds maximum depth of {MAX_DEPTH}"),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// ComponentData helpers
// ---------------------------------------------------------------------------

/// Depth of a component payload; an empty payload has depth 1.
pub fn data_depth(data: &ComponentData) -> usize {
    1 + data.values().map(Value::depth).max().unwrap_or(0)
}

/// Path of the first nested map key that starts with `$`.
///
/// Such keys collide with the tagged vector/colour encodings, so a payload
/// holding one would not decode back to the same kinds.
pub fn find_reserved_key(data: &ComponentData) -> Option<String> {
    data.iter()
        .find_map(|(key, value)| reserved_in(value).map(|rest| format!("{key}{rest}")))
}

fn reserved_in(value: &Value) -> Option<String> {
    match value {
        Value::Map(map) => map.iter().find_map(|(key, inner)| {
            if key.starts_with('$') {
                Some(format!(".{key}"))
            } else {
                reserved_in(inner).map(|rest| format!(".{key}{rest}"))
            }
        }),
        Value::List(items) => items
            .iter()
            .enumerate()
            .find_map(|(i, item)| reserved_in(item).map(|rest| format!("[{i}]{rest}"))),
        _ => None,
    }
}

/// Encode a payload as a JSON object. Keys come out sorted.
pub fn data_to_json(data: &ComponentData) -> serde_json::Value {
    serde_json::Value::Object(
        data.iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect(),
    )
}

/// Decode a JSON object into a payload.
///
/// # Errors
///
/// [`EcsError::MalformedData`] if `json` is not an object, nests deeper than
/// [`MAX_DEPTH`], or holds an integer outside the `i64` range.
pub fn data_from_json(json: &serde_json::Value) -> Result<ComponentData, EcsError> {
    match json {
        serde_json::Value::Object(obj) => decode_map(obj, 1),
        other => Err(EcsError::MalformedData {
            details: format!("component data must be an object, got {}", json_kind(other)),
        }),
    }
}

pub(crate) fn json_kind(json: &serde_json::Value) -> &'static str {
    match json {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<f32> for Value {
    fn from(f: f32) -> Self {
        Value::Float(f64::from(f))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<ComponentData> for Value {
    fn from(map: ComponentData) -> Self {
        Value::Map(map)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reserved_keys_are_located_in_nested_maps() {
        let mut inner = ComponentData::new();
        inner.insert("$vec2".into(), Value::List(vec![Value::Int(1), Value::Int(2)]));
        let mut data = ComponentData::new();
        data.insert("$root_is_fine".into(), Value::Int(0));
        data.insert(
            "m".into(),
            Value::List(vec![Value::Null, Value::Map(inner.clone())]),
        );
        assert_eq!(find_reserved_key(&data), Some("m[1].$vec2".to_owned()));

        // The collision it guards against: the map comes back as a vector.
        let decoded = data_from_json(&data_to_json(&data)).unwrap();
        assert_eq!(
            decoded["m"].as_list().unwrap()[1],
            Value::Vec2([1.0, 2.0])
        );

        data.remove("m");
        assert_eq!(find_reserved_key(&data), None);
    }

    #[test]
    fn int_widens_to_float_only() {
        assert!(Value::Int(3).matches_kind(ValueKind::Float));
        assert!(!Value::Float(3.0).matches_kind(ValueKind::Int));
        assert!(!Value::String("3".into()).matches_kind(ValueKind::Int));
    }

    #[test]
    fn json_roundtrip_preserves_special_kinds() {
        let json = json!({
            "pos": {"$vec3": [1.0, 2.5, -3.0]},
            "tint": {"$color": [1.0, 0.5, 0.25, 1.0]},
            "hp": 40,
            "speed": 1.5,
            "tags": ["a", "b"],
            "nested": {"x": null}
        });
        let data = data_from_json(&json).unwrap();
        assert_eq!(data["pos"], Value::Vec3([1.0, 2.5, -3.0]));
        assert_eq!(data["tint"], Value::Color([1.0, 0.5, 0.25, 1.0]));
        assert_eq!(data["hp"], Value::Int(40));
        assert_eq!(data["speed"], Value::Float(1.5));
        assert_eq!(data_to_json(&data), json);
    }

    #[test]
    fn tag_lookalike_with_extra_keys_stays_a_map() {
        let data = data_from_json(&json!({"v": {"$vec2": [1.0, 2.0], "other": 1}})).unwrap();
        assert_eq!(data["v"].kind(), ValueKind::Map);
    }

    #[test]
    fn depth_limit_is_enforced() {
        // Ten maps, root included, reach the limit exactly.
        let mut ok = json!(1);
        for _ in 0..10 {
            ok = json!({ "n": ok });
        }
        let data = data_from_json(&ok).unwrap();
        assert_eq!(data_depth(&data), MAX_DEPTH);

        let too_deep = json!({ "n": ok });
        assert!(matches!(
            data_from_json(&too_deep),
            Err(EcsError::MalformedData { .. })
        ));
    }

    #[test]
    fn non_object_payload_is_rejected() {
        assert!(data_from_json(&json!([1, 2, 3])).is_err());
    }

    #[test]
    fn oversized_integer_is_rejected() {
        assert!(data_from_json(&json!({ "big": u64::MAX })).is_err());
    }

    #[test]
    fn nan_encodes_as_null() {
        assert_eq!(Value::Float(f64::NAN).to_json(), serde_json::Value::Null);
    }
}
