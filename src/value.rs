use indexmap::IndexMap;
use serde::{
    Deserialize, Deserializer, Serialize, Serializer,
    de::{self, Visitor},
    ser::{SerializeMap, SerializeSeq},
};
use std::fmt;

use crate::u29::{INT_MAX, INT_MIN};

/// Insertion-ordered string-keyed members of an array or object.
pub type Map = IndexMap<String, Value>;

/// Dynamic AMF3 value
///
/// A decoded message is a tree of `Value`s. Building one by hand and passing
/// it to [`encode`](crate::encode) produces the matching wire bytes.
///
/// # Example
/// ```
/// use amf3_codec::{Object, Value, decode, encode};
///
/// let mut object = Object::anonymous();
/// object.dynamic.insert("name".to_string(), Value::Str("Alice".to_string()));
/// object.dynamic.insert("level".to_string(), Value::Int(30));
/// let value = Value::Object(object);
///
/// let bytes = encode(&value).unwrap();
/// let decoded = decode(&bytes).unwrap();
/// assert_eq!(value, decoded);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// `undefined` (0x00)
    Undefined,
    /// `null` (0x01)
    Null,
    /// `false` / `true` (0x02 / 0x03)
    Bool(bool),
    /// 29-bit signed integer (0x04)
    Int(i32),
    /// IEEE-754 double (0x05)
    Double(f64),
    /// UTF-8 string (0x06)
    Str(String),
    /// Milliseconds since the Unix epoch (0x08)
    Date(f64),
    /// Array with a dense part and an associative part (0x09)
    Array(Array),
    /// Typed, anonymous or externalizable object (0x0A)
    Object(Object),
    /// Raw bytes (0x0C)
    ByteArray(Vec<u8>),
    /// Typed vector (0x0D - 0x10)
    Vector(Vector),
    /// Dictionary with arbitrary keys (0x11)
    Dictionary(Dictionary),
    /// E4X XML text (0x0B)
    Xml(String),
    /// Legacy XMLDocument text (0x07)
    XmlDocument(String),
}

/// Array value: an integer-indexed run plus string-keyed members.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Array {
    /// Elements `0..dense.len()`.
    pub dense: Vec<Value>,
    /// Named members, written before the dense part on the wire.
    pub assoc: Map,
}

impl Array {
    /// Array with only a dense part.
    pub fn dense(values: Vec<Value>) -> Self {
        Array {
            dense: values,
            assoc: Map::new(),
        }
    }
}

/// Object value.
///
/// `class_name`, `is_dynamic`, `is_externalizable` and the ordered names of
/// `sealed` form the object's trait, which is shared on the wire by every
/// object of the same shape inside one message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Object {
    /// Registered class alias; `None` for anonymous objects.
    pub class_name: Option<String>,
    /// Members declared by the trait, in trait order.
    pub sealed: Map,
    /// Extra members of a dynamic object.
    pub dynamic: Map,
    /// Whether dynamic members follow the sealed ones.
    pub is_dynamic: bool,
    /// Whether the body is a single opaque value instead of members.
    pub is_externalizable: bool,
    /// Body of an externalizable object.
    pub externalized: Option<Box<Value>>,
}

impl Object {
    /// Anonymous dynamic object, the shape of an ActionScript `{}` literal.
    pub fn anonymous() -> Self {
        Object {
            is_dynamic: true,
            ..Default::default()
        }
    }

    /// Sealed object of the given class.
    pub fn typed(class_name: impl Into<String>) -> Self {
        Object {
            class_name: Some(class_name.into()),
            ..Default::default()
        }
    }

    /// Externalizable object whose body is `payload`.
    pub fn externalizable(class_name: impl Into<String>, payload: Value) -> Self {
        Object {
            class_name: Some(class_name.into()),
            is_externalizable: true,
            externalized: Some(Box::new(payload)),
            ..Default::default()
        }
    }

    /// Look up a member, sealed members first.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.sealed.get(name).or_else(|| self.dynamic.get(name))
    }
}

/// Element type of a [`Vector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VectorKind {
    /// `Vector.<int>`, 4-byte signed elements
    Int,
    /// `Vector.<uint>`, 4-byte unsigned elements
    UInt,
    /// `Vector.<Number>`, 8-byte double elements
    Double,
    /// `Vector.<T>` for any object type, elements are full values
    Object,
}

/// Typed vector value.
#[derive(Debug, Clone, PartialEq)]
pub struct Vector {
    pub kind: VectorKind,
    pub fixed_length: bool,
    /// Element class name of an object vector; `None` when empty on the wire.
    pub element_type: Option<String>,
    pub elements: Vec<Value>,
}

impl Vector {
    /// Empty, growable vector of `kind`.
    pub fn new(kind: VectorKind) -> Self {
        Vector {
            kind,
            fixed_length: false,
            element_type: None,
            elements: Vec::new(),
        }
    }
}

/// Dictionary value; keys are full values and order is preserved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dictionary {
    pub weak_keys: bool,
    pub entries: Vec<(Value, Value)>,
}

impl Value {
    /// Returns true for `null` and `undefined`
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null | Value::Undefined)
    }

    /// Returns true if the value takes a slot in the object reference table
    pub fn is_complex(&self) -> bool {
        matches!(
            self,
            Value::Date(_)
                | Value::Array(_)
                | Value::Object(_)
                | Value::ByteArray(_)
                | Value::Vector(_)
                | Value::Dictionary(_)
                | Value::Xml(_)
                | Value::XmlDocument(_)
        )
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric value of an `Int`, `Double` or `Date`
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(f64::from(*i)),
            Value::Double(f) | Value::Date(f) => Some(*f),
            _ => None,
        }
    }

    /// Text of a string or XML value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) | Value::Xml(s) | Value::XmlDocument(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::ByteArray(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<&Vector> {
        match self {
            Value::Vector(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_dictionary(&self) -> Option<&Dictionary> {
        match self {
            Value::Dictionary(d) => Some(d),
            _ => None,
        }
    }

    /// Strict structural identity.
    ///
    /// Unlike `==`, member order matters and doubles compare by bit pattern,
    /// so two identical values always encode to the same bytes.
    pub fn identical(&self, other: &Value) -> bool {
        fn maps(a: &Map, b: &Map) -> bool {
            a.len() == b.len()
                && a.iter()
                    .zip(b.iter())
                    .all(|((ka, va), (kb, vb))| ka == kb && va.identical(vb))
        }
        fn seqs(a: &[Value], b: &[Value]) -> bool {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.identical(y))
        }

        match (self, other) {
            (Value::Double(a), Value::Double(b)) | (Value::Date(a), Value::Date(b)) => {
                a.to_bits() == b.to_bits()
            }
            (Value::Array(a), Value::Array(b)) => seqs(&a.dense, &b.dense) && maps(&a.assoc, &b.assoc),
            (Value::Object(a), Value::Object(b)) => {
                a.class_name == b.class_name
                    && a.is_dynamic == b.is_dynamic
                    && a.is_externalizable == b.is_externalizable
                    && maps(&a.sealed, &b.sealed)
                    && maps(&a.dynamic, &b.dynamic)
                    && match (&a.externalized, &b.externalized) {
                        (Some(x), Some(y)) => x.identical(y),
                        (None, None) => true,
                        _ => false,
                    }
            }
            (Value::Vector(a), Value::Vector(b)) => {
                a.kind == b.kind
                    && a.fixed_length == b.fixed_length
                    && a.element_type == b.element_type
                    && seqs(&a.elements, &b.elements)
            }
            (Value::Dictionary(a), Value::Dictionary(b)) => {
                a.weak_keys == b.weak_keys
                    && a.entries.len() == b.entries.len()
                    && a.entries
                        .iter()
                        .zip(&b.entries)
                        .all(|((ka, va), (kb, vb))| ka.identical(kb) && va.identical(vb))
            }
            _ => self == other,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Double(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

/// `Int` when `v` fits the 29-bit wire range, `Double` otherwise.
pub(crate) fn integer(v: i64) -> Value {
    if (i64::from(INT_MIN)..=i64::from(INT_MAX)).contains(&v) {
        Value::Int(v as i32)
    } else {
        Value::Double(v as f64)
    }
}

/// JSON-like rendering, used by tools that print decoded traffic.
impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::Undefined => serializer.serialize_unit(),
            Value::Null => serializer.serialize_none(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i32(*i),
            Value::Double(f) | Value::Date(f) => serializer.serialize_f64(*f),
            Value::Str(s) | Value::Xml(s) | Value::XmlDocument(s) => serializer.serialize_str(s),
            Value::ByteArray(b) => serializer.serialize_bytes(b),
            Value::Array(a) if a.assoc.is_empty() => a.dense.serialize(serializer),
            Value::Array(a) => {
                let mut map = serializer.serialize_map(Some(a.dense.len() + a.assoc.len()))?;
                for (i, v) in a.dense.iter().enumerate() {
                    map.serialize_entry(&i.to_string(), v)?;
                }
                for (k, v) in &a.assoc {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
            Value::Object(o) => match &o.externalized {
                Some(payload) if o.is_externalizable => payload.serialize(serializer),
                _ => {
                    let mut map = serializer.serialize_map(Some(o.sealed.len() + o.dynamic.len()))?;
                    for (k, v) in o.sealed.iter().chain(&o.dynamic) {
                        map.serialize_entry(k, v)?;
                    }
                    map.end()
                }
            },
            Value::Vector(v) => v.elements.serialize(serializer),
            Value::Dictionary(d) => {
                let mut seq = serializer.serialize_seq(Some(d.entries.len()))?;
                for entry in &d.entries {
                    seq.serialize_element(entry)?;
                }
                seq.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ValueVisitor;

        impl<'de> Visitor<'de> for ValueVisitor {
            type Value = Value;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("any value representable in AMF3")
            }

            fn visit_bool<E>(self, value: bool) -> Result<Value, E> {
                Ok(Value::Bool(value))
            }

            fn visit_i64<E>(self, value: i64) -> Result<Value, E> {
                Ok(integer(value))
            }

            fn visit_u64<E>(self, value: u64) -> Result<Value, E> {
                Ok(i64::try_from(value).map_or(Value::Double(value as f64), integer))
            }

            fn visit_f64<E>(self, value: f64) -> Result<Value, E> {
                Ok(Value::Double(value))
            }

            fn visit_str<E>(self, value: &str) -> Result<Value, E>
            where
                E: de::Error,
            {
                Ok(Value::Str(value.to_owned()))
            }

            fn visit_string<E>(self, value: String) -> Result<Value, E> {
                Ok(Value::Str(value))
            }

            fn visit_bytes<E>(self, value: &[u8]) -> Result<Value, E>
            where
                E: de::Error,
            {
                Ok(Value::ByteArray(value.to_vec()))
            }

            fn visit_byte_buf<E>(self, value: Vec<u8>) -> Result<Value, E> {
                Ok(Value::ByteArray(value))
            }

            fn visit_none<E>(self) -> Result<Value, E> {
                Ok(Value::Null)
            }

            fn visit_some<D>(self, deserializer: D) -> Result<Value, D::Error>
            where
                D: Deserializer<'de>,
            {
                Deserialize::deserialize(deserializer)
            }

            fn visit_unit<E>(self) -> Result<Value, E> {
                Ok(Value::Null)
            }

            fn visit_seq<V>(self, mut visitor: V) -> Result<Value, V::Error>
            where
                V: de::SeqAccess<'de>,
            {
                let mut vec = Vec::new();
                while let Some(elem) = visitor.next_element()? {
                    vec.push(elem);
                }
                Ok(Value::Array(Array::dense(vec)))
            }

            fn visit_map<V>(self, mut visitor: V) -> Result<Value, V::Error>
            where
                V: de::MapAccess<'de>,
            {
                let mut entries = Vec::new();
                while let Some(entry) = visitor.next_entry::<Value, Value>()? {
                    entries.push(entry);
                }
                Ok(map_value(entries))
            }
        }

        deserializer.deserialize_any(ValueVisitor)
    }
}

/// Object for all-string keys, dictionary otherwise.
pub(crate) fn map_value(entries: Vec<(Value, Value)>) -> Value {
    if entries
        .iter()
        .all(|(k, _)| matches!(k, Value::Str(s) if !s.is_empty()))
    {
        let mut object = Object::anonymous();
        for (k, v) in entries {
            if let Value::Str(k) = k {
                object.dynamic.insert(k, v);
            }
        }
        Value::Object(object)
    } else {
        Value::Dictionary(Dictionary {
            weak_keys: false,
            entries,
        })
    }
}
