//! Resource - Representing resources and their state

use std::collections::HashMap;

use crate::schema::TypeError;

/// Unique identifier for a resource
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceId {
    /// Resource type (e.g., "dedicated_host", "disk_access")
    pub resource_type: String,
    /// Resource name (identifier specified in configuration)
    pub name: String,
}

impl ResourceId {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
        }
    }
}

/// Attribute value of a resource
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    List(Vec<Value>),
    Map(HashMap<String, Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Integers widen to floats so `50` is accepted where `50.0` is expected
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&HashMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "String",
            Value::Int(_) => "Int",
            Value::Float(_) => "Float",
            Value::Bool(_) => "Bool",
            Value::List(_) => "List",
            Value::Map(_) => "Map",
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// Typed read access to a flat attribute map.
///
/// Shared by desired configuration ([`Resource`]) and nested blocks, so
/// typed config structs can be built without runtime casts scattered around.
pub trait Attributes {
    fn attribute(&self, key: &str) -> Option<&Value>;

    fn get_str(&self, key: &str) -> Option<&str> {
        self.attribute(key).and_then(Value::as_str)
    }

    fn get_int(&self, key: &str) -> Option<i64> {
        self.attribute(key).and_then(Value::as_int)
    }

    fn get_float(&self, key: &str) -> Option<f64> {
        self.attribute(key).and_then(Value::as_float)
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        self.attribute(key).and_then(Value::as_bool)
    }

    fn get_bool_or(&self, key: &str, default: bool) -> bool {
        self.get_bool(key).unwrap_or(default)
    }

    fn get_list(&self, key: &str) -> Option<&[Value]> {
        self.attribute(key).and_then(Value::as_list)
    }

    fn get_map(&self, key: &str) -> Option<&HashMap<String, Value>> {
        self.attribute(key).and_then(Value::as_map)
    }

    /// Map of string values (e.g. tags); non-string entries are skipped
    fn get_string_map(&self, key: &str) -> Option<HashMap<String, String>> {
        self.get_map(key).map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
    }

    fn require_str(&self, key: &str) -> Result<&str, TypeError> {
        match self.attribute(key) {
            Some(Value::String(s)) => Ok(s.as_str()),
            Some(other) => Err(TypeError::TypeMismatch {
                expected: format!("String for '{}'", key),
                got: other.type_name().to_string(),
            }),
            None => Err(TypeError::MissingRequired {
                name: key.to_string(),
            }),
        }
    }

    fn require_int(&self, key: &str) -> Result<i64, TypeError> {
        match self.attribute(key) {
            Some(Value::Int(i)) => Ok(*i),
            Some(other) => Err(TypeError::TypeMismatch {
                expected: format!("Int for '{}'", key),
                got: other.type_name().to_string(),
            }),
            None => Err(TypeError::MissingRequired {
                name: key.to_string(),
            }),
        }
    }

    fn require_map(&self, key: &str) -> Result<&HashMap<String, Value>, TypeError> {
        match self.attribute(key) {
            Some(Value::Map(map)) => Ok(map),
            Some(other) => Err(TypeError::TypeMismatch {
                expected: format!("Map for '{}'", key),
                got: other.type_name().to_string(),
            }),
            None => Err(TypeError::MissingRequired {
                name: key.to_string(),
            }),
        }
    }
}

impl Attributes for HashMap<String, Value> {
    fn attribute(&self, key: &str) -> Option<&Value> {
        self.get(key)
    }
}

/// Desired state declared in configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub id: ResourceId,
    pub attributes: HashMap<String, Value>,
}

impl Resource {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: ResourceId::new(resource_type, name),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

impl Attributes for Resource {
    fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }
}

/// Current state fetched from actual infrastructure
#[derive(Debug, Clone, PartialEq)]
pub struct State {
    pub id: ResourceId,
    /// Provider-side identifier (an ARM resource path or a composite of two)
    pub identifier: Option<String>,
    pub attributes: HashMap<String, Value>,
    /// Whether this state exists
    pub exists: bool,
}

impl State {
    pub fn not_found(id: ResourceId) -> Self {
        Self {
            id,
            identifier: None,
            attributes: HashMap::new(),
            exists: false,
        }
    }

    pub fn existing(id: ResourceId, attributes: HashMap<String, Value>) -> Self {
        Self {
            id,
            identifier: None,
            attributes,
            exists: true,
        }
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }
}

impl Attributes for State {
    fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }
}
