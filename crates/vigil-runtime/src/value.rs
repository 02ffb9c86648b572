//! Runtime value types.

#![allow(missing_docs)]

use indexmap::IndexMap;
use smol_str::SmolStr;

/// How an object produces its display representation.
#[derive(Debug, Clone, PartialEq)]
pub enum Repr {
    /// Derive the representation from the object's fields.
    Auto,
    /// Use a fixed representation string.
    Literal(String),
    /// Producing the representation fails with this message.
    Raises(String),
}

/// An object instance with a named type and originating namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectValue {
    /// Type name, e.g. `Request`.
    pub type_name: SmolStr,
    /// Originating namespace, e.g. `http.server`.
    pub qualifier: SmolStr,
    /// Field values in declaration order.
    pub fields: IndexMap<SmolStr, Value>,
    /// Display behavior for this instance.
    pub repr: Repr,
}

impl ObjectValue {
    /// Create an object with an automatic representation.
    #[must_use]
    pub fn new(type_name: impl Into<SmolStr>, qualifier: impl Into<SmolStr>) -> Self {
        Self {
            type_name: type_name.into(),
            qualifier: qualifier.into(),
            fields: IndexMap::new(),
            repr: Repr::Auto,
        }
    }

    /// Add a field, builder style.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<SmolStr>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Override the representation, builder style.
    #[must_use]
    pub fn with_repr(mut self, repr: Repr) -> Self {
        self.repr = repr;
        self
    }
}

/// A value observed in the debugged runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Object(ObjectValue),
}

impl Value {
    /// The value's type name as the runtime reports it.
    #[must_use]
    pub fn type_name(&self) -> SmolStr {
        match self {
            Value::Nil => SmolStr::new_static("NoneType"),
            Value::Bool(_) => SmolStr::new_static("bool"),
            Value::Int(_) => SmolStr::new_static("int"),
            Value::Float(_) => SmolStr::new_static("float"),
            Value::Str(_) => SmolStr::new_static("str"),
            Value::List(_) => SmolStr::new_static("list"),
            Value::Map(_) => SmolStr::new_static("dict"),
            Value::Object(obj) => obj.type_name.clone(),
        }
    }

    /// The namespace the value's type originates from, if not builtin.
    #[must_use]
    pub fn type_qualifier(&self) -> Option<SmolStr> {
        match self {
            Value::Object(obj) if !obj.qualifier.is_empty() => Some(obj.qualifier.clone()),
            _ => None,
        }
    }

    /// Whether the value is truthy under the runtime's rules.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Nil => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Map(entries) => !entries.is_empty(),
            Value::Object(_) => true,
        }
    }

    /// Number of direct children, if the value is a container.
    #[must_use]
    pub fn len(&self) -> Option<usize> {
        match self {
            Value::List(items) => Some(items.len()),
            Value::Map(entries) => Some(entries.len()),
            Value::Object(obj) => Some(obj.fields.len()),
            _ => None,
        }
    }

    /// A scalar literal rendering, without container traversal.
    ///
    /// Returns `Err` with the failure text when the value's own
    /// representation raises.
    pub fn scalar_repr(&self) -> Result<String, String> {
        match self {
            Value::Nil => Ok("None".to_string()),
            Value::Bool(true) => Ok("True".to_string()),
            Value::Bool(false) => Ok("False".to_string()),
            Value::Int(n) => Ok(n.to_string()),
            Value::Float(f) => Ok(format!("{f:?}")),
            Value::Str(s) => Ok(format!("'{s}'")),
            Value::List(items) => Ok(format!("<list, len {}>", items.len())),
            Value::Map(entries) => Ok(format!("<dict, len {}>", entries.len())),
            Value::Object(obj) => match &obj.repr {
                Repr::Auto => Ok(format!("<{} object>", obj.type_name)),
                Repr::Literal(text) => Ok(text.clone()),
                Repr::Raises(message) => Err(message.clone()),
            },
        }
    }
}
