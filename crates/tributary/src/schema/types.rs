//! Avro-style record schemas expressed in JSON.
//!
//! Only the subset the pipelines need is understood: primitives, enums,
//! arrays, nested records and unions. Values are validated as JSON.

use crate::TributaryError;
use serde_json::{Map, Value};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    Null,
    Boolean,
    Int,
    Long,
    Float,
    Double,
    String,
    Enum { name: String, symbols: Vec<String> },
    Array(Box<FieldType>),
    Record { name: String, fields: Vec<Field> },
    Union(Vec<FieldType>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub field_type: FieldType,
    pub default: Option<Value>,
}

/// A parsed schema together with its canonical JSON text.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    name: String,
    root: FieldType,
    canonical: String,
}

impl Schema {
    pub fn parse(definition: &str) -> Result<Self, TributaryError> {
        let json: Value = serde_json::from_str(definition).map_err(|e| TributaryError::Schema {
            schema: "<unparsed>".to_string(),
            reason: e.to_string(),
        })?;
        Self::from_json(&json)
    }

    pub fn from_json(json: &Value) -> Result<Self, TributaryError> {
        let root = parse_type(json).map_err(|reason| TributaryError::Schema {
            schema: "<unparsed>".to_string(),
            reason,
        })?;
        let name = match (&root, json.get("namespace").and_then(Value::as_str)) {
            (FieldType::Record { name, .. }, Some(namespace)) => format!("{namespace}.{name}"),
            (FieldType::Record { name, .. }, None) | (FieldType::Enum { name, .. }, _) => name.clone(),
            (other, _) => other.to_string(),
        };
        Ok(Self {
            name,
            root,
            canonical: json.to_string(),
        })
    }

    /// Schema of a bare string, the usual key type.
    pub fn string() -> Self {
        Self {
            name: "string".to_string(),
            root: FieldType::String,
            canonical: "\"string\"".to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &FieldType {
        &self.root
    }

    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    pub fn validate(&self, value: &Value) -> Result<(), TributaryError> {
        check(&self.root, value, "$").map_err(|reason| TributaryError::Schema {
            schema: self.name.clone(),
            reason,
        })
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Null => f.write_str("null"),
            FieldType::Boolean => f.write_str("boolean"),
            FieldType::Int => f.write_str("int"),
            FieldType::Long => f.write_str("long"),
            FieldType::Float => f.write_str("float"),
            FieldType::Double => f.write_str("double"),
            FieldType::String => f.write_str("string"),
            FieldType::Enum { name, .. } => write!(f, "enum {name}"),
            FieldType::Array(items) => write!(f, "array<{items}>"),
            FieldType::Record { name, .. } => write!(f, "record {name}"),
            FieldType::Union(types) => {
                let names: Vec<String> = types.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", names.join(", "))
            }
        }
    }
}

fn primitive(name: &str) -> Option<FieldType> {
    Some(match name {
        "null" => FieldType::Null,
        "boolean" => FieldType::Boolean,
        "int" => FieldType::Int,
        "long" => FieldType::Long,
        "float" => FieldType::Float,
        "double" => FieldType::Double,
        "string" => FieldType::String,
        _ => return None,
    })
}

fn required_str<'a>(map: &'a Map<String, Value>, key: &str) -> Result<&'a str, String> {
    map.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("missing string attribute '{key}'"))
}

fn parse_type(json: &Value) -> Result<FieldType, String> {
    match json {
        Value::String(name) => primitive(name).ok_or_else(|| format!("unknown type '{name}'")),
        Value::Array(branches) => branches
            .iter()
            .map(parse_type)
            .collect::<Result<Vec<_>, _>>()
            .map(FieldType::Union),
        Value::Object(map) => match required_str(map, "type")? {
            "record" => {
                let name = required_str(map, "name")?.to_string();
                let fields = map
                    .get("fields")
                    .and_then(Value::as_array)
                    .ok_or_else(|| format!("record '{name}' has no fields array"))?
                    .iter()
                    .map(parse_field)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(FieldType::Record { name, fields })
            }
            "enum" => {
                let name = required_str(map, "name")?.to_string();
                let symbols = map
                    .get("symbols")
                    .and_then(Value::as_array)
                    .ok_or_else(|| format!("enum '{name}' has no symbols"))?
                    .iter()
                    .map(|s| s.as_str().map(str::to_string))
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(|| format!("enum '{name}' has a non-string symbol"))?;
                Ok(FieldType::Enum { name, symbols })
            }
            "array" => {
                let items = map
                    .get("items")
                    .ok_or_else(|| "array without items".to_string())?;
                Ok(FieldType::Array(Box::new(parse_type(items)?)))
            }
            other => primitive(other).ok_or_else(|| format!("unknown type '{other}'")),
        },
        other => Err(format!("unexpected type definition {other}")),
    }
}

fn parse_field(json: &Value) -> Result<Field, String> {
    let map = json
        .as_object()
        .ok_or_else(|| "field definition must be an object".to_string())?;
    let name = required_str(map, "name")?.to_string();
    let field_type = map
        .get("type")
        .ok_or_else(|| format!("field '{name}' has no type"))
        .and_then(parse_type)?;
    Ok(Field {
        name,
        field_type,
        default: map.get("default").cloned(),
    })
}

fn check(ty: &FieldType, value: &Value, path: &str) -> Result<(), String> {
    let ok = match ty {
        FieldType::Null => value.is_null(),
        FieldType::Boolean => value.is_boolean(),
        FieldType::Int => value
            .as_i64()
            .is_some_and(|n| i32::try_from(n).is_ok()),
        FieldType::Long => value.as_i64().is_some(),
        FieldType::Float | FieldType::Double => value.is_number(),
        FieldType::String => value.is_string(),
        FieldType::Enum { symbols, .. } => value
            .as_str()
            .is_some_and(|s| symbols.iter().any(|symbol| symbol == s)),
        FieldType::Array(items) => {
            let array = value
                .as_array()
                .ok_or_else(|| format!("{path}: expected array, found {value}"))?;
            for (index, item) in array.iter().enumerate() {
                check(items, item, &format!("{path}[{index}]"))?;
            }
            true
        }
        FieldType::Union(branches) => branches.iter().any(|b| check(b, value, path).is_ok()),
        FieldType::Record { fields, .. } => {
            let object = value
                .as_object()
                .ok_or_else(|| format!("{path}: expected object, found {value}"))?;
            for field in fields {
                let field_path = format!("{path}.{}", field.name);
                match (object.get(&field.name), &field.default) {
                    (Some(field_value), _) => check(&field.field_type, field_value, &field_path)?,
                    (None, Some(_)) => {}
                    (None, None) => check(&field.field_type, &Value::Null, &field_path)
                        .map_err(|_| format!("missing field '{}'", field.name))?,
                }
            }
            true
        }
    };

    if ok {
        Ok(())
    } else {
        Err(format!("{path}: expected {ty}, found {value}"))
    }
}
