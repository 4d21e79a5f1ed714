//! Scilla values: the recursive form contract params take on the wire.
//!
//! ```text
//! "0x1234…"                                         → Value::Str
//! 42                                                → Value::Number
//! ["1", "2"]                                        → Value::StrList
//! [{"constructor": "Pair", …}, …]                   → Value::List
//! {"constructor": "Pair",
//!  "argtypes": ["ByStr20", "String"],
//!  "arguments": ["0xabc…", "ipfs://…"]}             → Value::Adt
//! ```
//!
//! Anything else is a [`DecodeError`]; absence of a value is `None` on the
//! owning [`Param`], never an empty tree.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value as Json};

use crate::error::DecodeError;

// ─── Value ────────────────────────────────────────────────────────────────────

/// A decoded contract value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// String leaf: addresses, integers, URIs, hashes.
    Str(String),
    /// Numeric leaf.
    Number(serde_json::Number),
    /// A list of primitive strings.
    StrList(Vec<String>),
    /// A list of nested values.
    List(Vec<Value>),
    /// An algebraic data type constructor node.
    Adt(Adt),
}

/// An ADT constructor node, e.g. `Pair ByStr20 String`.
#[derive(Debug, Clone, PartialEq)]
pub struct Adt {
    /// Constructor name; never empty.
    pub constructor: String,
    /// Declared argument types, copied verbatim. `None` when the node sent
    /// no `argtypes` key.
    pub arg_types: Option<Vec<String>>,
    /// Arguments, in declaration order.
    pub arguments: Vec<Value>,
}

impl Value {
    /// Decode a value from its chain JSON form.
    pub fn from_json(json: &Json) -> Result<Self, DecodeError> {
        match json {
            Json::String(s) => Ok(Self::Str(s.clone())),
            Json::Number(n) => Ok(Self::Number(n.clone())),
            Json::Array(items) => match items.first() {
                Some(Json::String(_)) => items
                    .iter()
                    .map(|item| match item {
                        Json::String(s) => Ok(s.clone()),
                        other => Err(DecodeError::UnexpectedShape {
                            expected: "string list element",
                            found: shape_of(other),
                        }),
                    })
                    .collect::<Result<_, _>>()
                    .map(Self::StrList),
                _ => items
                    .iter()
                    .map(Self::from_json)
                    .collect::<Result<_, _>>()
                    .map(Self::List),
            },
            Json::Object(map) => Adt::from_map(map).map(Self::Adt),
            other => Err(DecodeError::UnexpectedShape {
                expected: "string, number, list or constructor",
                found: shape_of(other),
            }),
        }
    }

    /// Re-encode into the chain JSON form.
    pub fn to_json(&self) -> Json {
        match self {
            Self::Str(s) => Json::String(s.clone()),
            Self::Number(n) => Json::Number(n.clone()),
            Self::StrList(items) => {
                Json::Array(items.iter().cloned().map(Json::String).collect())
            }
            Self::List(items) => Json::Array(items.iter().map(Self::to_json).collect()),
            Self::Adt(adt) => adt.to_json(),
        }
    }

    /// Returns the string if this is a string leaf.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the constructor node if this is an ADT.
    pub fn as_adt(&self) -> Option<&Adt> {
        match self {
            Self::Adt(adt) => Some(adt),
            _ => None,
        }
    }

    /// Returns the primitive strings of a list value.
    ///
    /// Number leaves are rendered in decimal so `[1, 2]` and `["1", "2"]`
    /// read the same.
    pub fn as_str_list(&self) -> Option<Vec<String>> {
        match self {
            Self::StrList(items) => Some(items.clone()),
            Self::List(items) => items
                .iter()
                .map(|v| match v {
                    Self::Str(s) => Some(s.clone()),
                    Self::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect(),
            _ => None,
        }
    }

    /// Returns the elements of a list value.
    pub fn as_list(&self) -> Option<Vec<Value>> {
        match self {
            Self::List(items) => Some(items.clone()),
            Self::StrList(items) => Some(items.iter().cloned().map(Self::Str).collect()),
            _ => None,
        }
    }
}

impl Adt {
    fn from_map(map: &Map<String, Json>) -> Result<Self, DecodeError> {
        let arguments = match map.get("arguments") {
            Some(Json::Array(args)) => args,
            Some(other) => {
                return Err(DecodeError::UnexpectedShape {
                    expected: "arguments array",
                    found: shape_of(other),
                })
            }
            None => {
                return Err(DecodeError::MissingField {
                    field: "arguments".into(),
                })
            }
        };

        let constructor = match map.get("constructor") {
            Some(Json::String(name)) if !name.is_empty() => name.clone(),
            _ => {
                return Err(DecodeError::MissingField {
                    field: "constructor".into(),
                })
            }
        };

        let arg_types = match map.get("argtypes") {
            None => None,
            Some(Json::Array(types)) => Some(
                types
                    .iter()
                    .map(|t| match t {
                        Json::String(s) => Ok(s.clone()),
                        other => Err(DecodeError::UnexpectedShape {
                            expected: "argtype string",
                            found: shape_of(other),
                        }),
                    })
                    .collect::<Result<_, _>>()?,
            ),
            Some(other) => {
                return Err(DecodeError::UnexpectedShape {
                    expected: "argtypes array",
                    found: shape_of(other),
                })
            }
        };

        Ok(Self {
            constructor,
            arg_types,
            arguments: arguments
                .iter()
                .map(Value::from_json)
                .collect::<Result<_, _>>()?,
        })
    }

    /// Re-encode into the chain JSON form.
    pub fn to_json(&self) -> Json {
        let mut map = Map::new();
        map.insert("constructor".into(), Json::String(self.constructor.clone()));
        if let Some(types) = &self.arg_types {
            map.insert(
                "argtypes".into(),
                Json::Array(types.iter().cloned().map(Json::String).collect()),
            );
        }
        map.insert(
            "arguments".into(),
            Json::Array(self.arguments.iter().map(Value::to_json).collect()),
        );
        Json::Object(map)
    }

    /// Returns the argument at `index` as a string leaf.
    pub fn str_arg(&self, index: usize) -> Option<&str> {
        self.arguments.get(index).and_then(Value::as_str)
    }
}

fn shape_of(json: &Json) -> &'static str {
    match json {
        Json::Null => "null",
        Json::Bool(_) => "bool",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = Json::deserialize(deserializer)?;
        Value::from_json(&json).map_err(D::Error::custom)
    }
}

// ─── Param ────────────────────────────────────────────────────────────────────

/// A named, typed contract parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub vname: String,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub value: Option<Value>,
}

impl Param {
    /// Decode a param from its raw name, type and JSON value.
    ///
    /// A JSON `null` value decodes to `None`.
    pub fn decode(vname: &str, ty: &str, value: &Json) -> Result<Self, DecodeError> {
        let value = match value {
            Json::Null => None,
            other => Some(Value::from_json(other).map_err(|e| e.in_param(vname))?),
        };
        Ok(Self {
            vname: vname.to_string(),
            ty: ty.to_string(),
            value,
        })
    }
}

/// Lookup helpers over a param list.
pub trait Params {
    /// Find a param by name.
    fn param(&self, name: &str) -> Option<&Param>;

    /// The string leaf of the named param.
    fn str_value(&self, name: &str) -> Option<&str> {
        self.param(name)?.value.as_ref()?.as_str()
    }

    /// The string leaf of the first of `names` that is present.
    fn first_str_value(&self, names: &[&str]) -> Option<&str> {
        names.iter().find_map(|name| self.str_value(name))
    }

    /// The value of the named param.
    fn value(&self, name: &str) -> Option<&Value> {
        self.param(name)?.value.as_ref()
    }
}

impl Params for [Param] {
    fn param(&self, name: &str) -> Option<&Param> {
        self.iter().find(|p| p.vname == name)
    }
}

impl Params for Vec<Param> {
    fn param(&self, name: &str) -> Option<&Param> {
        self.as_slice().param(name)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_and_number_are_leaves() {
        assert_eq!(Value::from_json(&json!("7")).unwrap(), Value::Str("7".into()));
        assert!(matches!(Value::from_json(&json!(7)).unwrap(), Value::Number(_)));
    }

    #[test]
    fn string_first_array_is_primitive_list() {
        let v = Value::from_json(&json!(["1", "2", "3"])).unwrap();
        assert_eq!(v, Value::StrList(vec!["1".into(), "2".into(), "3".into()]));
    }

    #[test]
    fn primitive_list_rejects_mixed_elements() {
        let err = Value::from_json(&json!(["1", {"constructor": "None"}])).unwrap_err();
        assert!(matches!(err, DecodeError::UnexpectedShape { .. }));
    }

    #[test]
    fn object_array_is_nested_list() {
        let v = Value::from_json(&json!([
            {"constructor": "Pair", "argtypes": ["ByStr20", "String"], "arguments": ["0xabc", "ipfs://1"]},
            {"constructor": "Pair", "argtypes": ["ByStr20", "String"], "arguments": ["0xdef", "ipfs://2"]}
        ]))
        .unwrap();
        let items = v.as_list().unwrap();
        assert_eq!(items.len(), 2);
        let pair = items[1].as_adt().unwrap();
        assert_eq!(pair.constructor, "Pair");
        assert_eq!(pair.str_arg(0), Some("0xdef"));
        assert_eq!(pair.str_arg(1), Some("ipfs://2"));
    }

    #[test]
    fn nested_constructor_decodes_recursively() {
        let v = Value::from_json(&json!({
            "constructor": "Some",
            "argtypes": ["Pair ByStr20 Uint256"],
            "arguments": [
                {"constructor": "Pair", "argtypes": ["ByStr20", "Uint256"], "arguments": ["0xabc", "1"]}
            ]
        }))
        .unwrap();
        let some = v.as_adt().unwrap();
        assert_eq!(some.constructor, "Some");
        let pair = some.arguments[0].as_adt().unwrap();
        assert_eq!(pair.arg_types, Some(vec!["ByStr20".to_string(), "Uint256".to_string()]));
        assert_eq!(pair.str_arg(1), Some("1"));
    }

    #[test]
    fn object_without_arguments_is_an_error() {
        let err = Value::from_json(&json!({"constructor": "True", "argtypes": []})).unwrap_err();
        assert!(matches!(err, DecodeError::MissingField { ref field } if field == "arguments"));
    }

    #[test]
    fn constructor_name_must_be_present() {
        let err = Value::from_json(&json!({"argtypes": [], "arguments": []})).unwrap_err();
        assert!(matches!(err, DecodeError::MissingField { ref field } if field == "constructor"));

        let err = Value::from_json(&json!({"constructor": "", "arguments": []})).unwrap_err();
        assert!(matches!(err, DecodeError::MissingField { .. }));
    }

    #[test]
    fn bool_and_null_are_rejected() {
        assert!(Value::from_json(&json!(true)).is_err());
        assert!(Value::from_json(&json!(null)).is_err());
        assert!(Value::from_json(&json!([null])).is_err());
    }

    #[test]
    fn constructor_reencodes_in_order() {
        let raw = json!({
            "constructor": "Pair",
            "argtypes": ["ByStr20", "List (Uint256)"],
            "arguments": ["0xabc", ["1", "2"]]
        });
        let v = Value::from_json(&raw).unwrap();
        assert_eq!(v.to_json(), raw);
    }

    #[test]
    fn missing_argtypes_stay_missing() {
        let raw = json!({"constructor": "True", "arguments": []});
        let v = Value::from_json(&raw).unwrap();
        assert_eq!(v.as_adt().unwrap().arg_types, None);
        assert_eq!(v.to_json(), raw);

        let raw = json!({"constructor": "False", "argtypes": [], "arguments": []});
        assert_eq!(Value::from_json(&raw).unwrap().to_json(), raw);
    }

    #[test]
    fn null_param_value_is_absent() {
        let p = Param::decode("token_uri", "String", &Json::Null).unwrap();
        assert!(p.value.is_none());
    }

    #[test]
    fn param_error_names_the_param() {
        let err = Param::decode("flag", "Bool", &json!(true)).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidParam { ref param, .. } if param == "flag"));
    }

    #[test]
    fn params_lookup() {
        let params = vec![
            Param::decode("to", "ByStr20", &json!("0xabc")).unwrap(),
            Param::decode("token_id", "Uint256", &json!("7")).unwrap(),
        ];
        assert_eq!(params.str_value("token_id"), Some("7"));
        assert_eq!(params.first_str_value(&["recipient", "to"]), Some("0xabc"));
        assert!(params.str_value("missing").is_none());
    }

    #[test]
    fn param_serde_uses_chain_form() {
        let p = Param::decode("to", "ByStr20", &json!("0xabc")).unwrap();
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json, json!({"vname": "to", "type": "ByStr20", "value": "0xabc"}));
        let back: Param = serde_json::from_value(json).unwrap();
        assert_eq!(back, p);
    }
}
