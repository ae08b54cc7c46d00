use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::sync::Arc;

use crate::refs::{ComplexIndex, EncodeTables, Lookup, TraitKey};
use crate::u29::{U29_MAX, to_u29_bits, write_u29};
use crate::value::{Array, Dictionary, Object, Value, Vector, VectorKind};
use crate::*;

/// Caller-supplied identity token for a complex value.
pub type IdentityFn = dyn Fn(&Value) -> Option<u64> + Send + Sync;

/// How the encoder decides that a complex value was already written.
///
/// A [`Value`] is a tree, so it carries no notion of two members being the
/// same instance. The wire format does; this picks what counts as "same".
#[derive(Clone, Default)]
pub enum ObjectIdentity {
    /// Every complex value is written in full.
    #[default]
    None,
    /// Strictly identical values (see [`Value::identical`]) share one entry.
    Structural,
    /// Values mapped to the same token share one entry; `None` means unique.
    Custom(Arc<IdentityFn>),
}

impl fmt::Debug for ObjectIdentity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ObjectIdentity::None => f.write_str("None"),
            ObjectIdentity::Structural => f.write_str("Structural"),
            ObjectIdentity::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Encoding behaviour switches.
#[derive(Debug, Clone, Default)]
pub struct EncodeOptions {
    pub identity: ObjectIdentity,
}

fn unsupported(msg: impl Into<String>) -> Amf3Error {
    Amf3Error::UnsupportedValue(msg.into())
}

// Encoder
pub struct Encoder<W: Write> {
    writer: W,
    options: EncodeOptions,
}

impl<W: Write> Encoder<W> {
    pub fn new(writer: W) -> Self {
        Self::with_options(writer, EncodeOptions::default())
    }

    pub fn with_options(writer: W, options: EncodeOptions) -> Self {
        Encoder { writer, options }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    /// Encode one top-level value with fresh reference tables.
    ///
    /// If an error is returned the writer may hold a partial value.
    pub fn encode(&mut self, value: &Value) -> Result<()> {
        let complex = match &self.options.identity {
            ObjectIdentity::None => ComplexIndex::Off,
            ObjectIdentity::Structural => ComplexIndex::Structural(Vec::new()),
            ObjectIdentity::Custom(_) => ComplexIndex::Tokens(HashMap::new()),
        };
        let mut writer = Writer {
            out: &mut self.writer,
            tables: EncodeTables::new(complex),
            identity: &self.options.identity,
        };
        writer.write_value(value)
    }
}

/// State of one top-level encode call.
struct Writer<'w, 'a, W: Write> {
    out: &'w mut W,
    tables: EncodeTables<'a>,
    identity: &'w ObjectIdentity,
}

impl<'a, W: Write> Writer<'_, 'a, W> {
    fn write_marker(&mut self, marker: u8) -> Result<()> {
        self.out.write_all(&[marker])?;
        Ok(())
    }

    fn write_u29(&mut self, value: u32) -> Result<()> {
        write_u29(&mut *self.out, value)
    }

    /// Back-reference header: `index` shifted past `shift` flag bits, with
    /// the lowest flag bits as given.
    fn write_reference(&mut self, index: u32, shift: u32, flags: u32) -> Result<()> {
        let header = (u64::from(index) << shift) | u64::from(flags);
        if header > u64::from(U29_MAX) {
            return Err(unsupported(format!("reference index {} is too large", index)));
        }
        self.write_u29(header as u32)
    }

    /// Inline header: `len << 1 | 1`.
    fn write_length(&mut self, len: usize) -> Result<()> {
        match u32::try_from(len) {
            Ok(len) if len <= U29_MAX >> 1 => self.write_u29((len << 1) | 1),
            _ => Err(unsupported(format!("length {} does not fit in a U29", len))),
        }
    }

    fn write_string(&mut self, s: &'a str) -> Result<()> {
        match self.tables.lookup_or_register_string(s) {
            Lookup::Existing(index) => self.write_reference(index, 1, 0),
            Lookup::New => {
                self.write_length(s.len())?;
                self.out.write_all(s.as_bytes())?;
                Ok(())
            }
        }
    }

    fn write_value(&mut self, value: &'a Value) -> Result<()> {
        match value {
            Value::Undefined => self.write_marker(UNDEFINED_MARKER),
            Value::Null => self.write_marker(NULL_MARKER),
            Value::Bool(false) => self.write_marker(FALSE_MARKER),
            Value::Bool(true) => self.write_marker(TRUE_MARKER),
            Value::Int(i) => match to_u29_bits(*i) {
                Some(bits) => {
                    self.write_marker(INTEGER_MARKER)?;
                    self.write_u29(bits)
                }
                // no wider integer on the wire
                None => self.write_double(f64::from(*i)),
            },
            Value::Double(f) => self.write_double(*f),
            Value::Str(s) => {
                self.write_marker(STRING_MARKER)?;
                self.write_string(s)
            }
            Value::Date(ms) => self.write_complex(DATE_MARKER, value, |w| {
                w.write_u29(1)?;
                w.out.write_all(&ms.to_be_bytes())?;
                Ok(())
            }),
            Value::Array(array) => self.write_complex(ARRAY_MARKER, value, |w| w.write_array(array)),
            Value::Object(object) => self.write_complex(OBJECT_MARKER, value, |w| w.write_object(object)),
            Value::ByteArray(bytes) => self.write_complex(BYTE_ARRAY_MARKER, value, |w| w.write_bytes(bytes)),
            Value::Vector(vector) => {
                let marker = match vector.kind {
                    VectorKind::Int => VECTOR_INT_MARKER,
                    VectorKind::UInt => VECTOR_UINT_MARKER,
                    VectorKind::Double => VECTOR_DOUBLE_MARKER,
                    VectorKind::Object => VECTOR_OBJECT_MARKER,
                };
                self.write_complex(marker, value, |w| w.write_vector(vector))
            }
            Value::Dictionary(dict) => self.write_complex(DICTIONARY_MARKER, value, |w| w.write_dictionary(dict)),
            Value::Xml(text) => self.write_complex(XML_MARKER, value, |w| w.write_bytes(text.as_bytes())),
            Value::XmlDocument(text) => {
                self.write_complex(XML_DOC_MARKER, value, |w| w.write_bytes(text.as_bytes()))
            }
        }
    }

    fn write_double(&mut self, f: f64) -> Result<()> {
        self.write_marker(DOUBLE_MARKER)?;
        self.out.write_all(&f.to_be_bytes())?;
        Ok(())
    }

    /// Marker, then either a back-reference or the full body.
    fn write_complex<F>(&mut self, marker: u8, value: &'a Value, body: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        self.write_marker(marker)?;
        let token = match self.identity {
            ObjectIdentity::Custom(identify) => identify(value),
            _ => None,
        };
        let index = self.tables.next_complex_index();
        match self.tables.lookup_or_register_complex(value, token, marker) {
            Lookup::Existing(index) => {
                tracing::trace!(index, marker, "amf3 object back-reference");
                self.write_reference(index, 1, 0)
            }
            Lookup::New => {
                body(self)?;
                self.tables.complete_complex(index, token);
                Ok(())
            }
        }
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.write_length(bytes.len())?;
        self.out.write_all(bytes)?;
        Ok(())
    }

    fn write_member(&mut self, name: &'a str, value: &'a Value) -> Result<()> {
        if name.is_empty() {
            return Err(unsupported("member names of arrays and dynamic objects cannot be empty"));
        }
        self.write_string(name)?;
        self.write_value(value)
    }

    fn write_array(&mut self, array: &'a Array) -> Result<()> {
        self.write_length(array.dense.len())?;
        for (name, value) in &array.assoc {
            self.write_member(name, value)?;
        }
        self.write_string("")?;
        for value in &array.dense {
            self.write_value(value)?;
        }
        Ok(())
    }

    fn write_object(&mut self, object: &'a Object) -> Result<()> {
        if object.class_name.as_deref() == Some("") {
            return Err(unsupported("empty class name; anonymous objects use None"));
        }
        if object.is_externalizable {
            if object.externalized.is_none() {
                return Err(unsupported("externalizable object without a body"));
            }
            if object.is_dynamic || !object.sealed.is_empty() || !object.dynamic.is_empty() {
                return Err(unsupported("externalizable object cannot carry members"));
            }
        } else {
            if object.externalized.is_some() {
                return Err(unsupported("externalized body on an object that is not externalizable"));
            }
            if !object.is_dynamic && !object.dynamic.is_empty() {
                return Err(unsupported("dynamic members on a sealed object"));
            }
        }

        let class_name = object.class_name.as_deref().unwrap_or("");
        let key = TraitKey {
            class_name,
            is_dynamic: object.is_dynamic,
            is_externalizable: object.is_externalizable,
            sealed_names: object.sealed.keys().map(String::as_str).collect(),
        };
        match self.tables.lookup_or_register_trait(key) {
            Lookup::Existing(index) => self.write_reference(index, 2, 0b01)?,
            Lookup::New => {
                if object.is_externalizable {
                    self.write_u29(0b0111)?;
                } else {
                    let count = object.sealed.len();
                    if count > (U29_MAX >> 4) as usize {
                        return Err(unsupported(format!("{} sealed members do not fit in a trait", count)));
                    }
                    let dynamic = if object.is_dynamic { 0b1000 } else { 0 };
                    self.write_u29(((count as u32) << 4) | dynamic | 0b011)?;
                }
                self.write_string(class_name)?;
                for name in object.sealed.keys() {
                    self.write_string(name)?;
                }
            }
        }

        if let Some(body) = &object.externalized {
            return self.write_value(body);
        }
        for value in object.sealed.values() {
            self.write_value(value)?;
        }
        if object.is_dynamic {
            for (name, value) in &object.dynamic {
                self.write_member(name, value)?;
            }
            self.write_string("")?;
        }
        Ok(())
    }

    fn write_vector(&mut self, vector: &'a Vector) -> Result<()> {
        self.write_length(vector.elements.len())?;
        self.out.write_all(&[u8::from(vector.fixed_length)])?;
        match (vector.kind, &vector.element_type) {
            (VectorKind::Object, Some(name)) if name.is_empty() => {
                return Err(unsupported("empty vector element type; untyped vectors use None"));
            }
            (VectorKind::Object, name) => self.write_string(name.as_deref().unwrap_or(""))?,
            (_, None) => {}
            (kind, Some(_)) => {
                return Err(unsupported(format!("{:?} vector cannot name an element type", kind)));
            }
        }

        for element in &vector.elements {
            match (vector.kind, element) {
                (VectorKind::Int, Value::Int(i)) => self.out.write_all(&i.to_be_bytes())?,
                (VectorKind::UInt, Value::Int(i)) if *i >= 0 => {
                    self.out.write_all(&(*i as u32).to_be_bytes())?
                }
                // values that fit an i32 decode as Int, so only larger ones may be Double
                (VectorKind::UInt, Value::Double(f))
                    if f.fract() == 0.0 && *f > f64::from(i32::MAX) && *f <= f64::from(u32::MAX) =>
                {
                    self.out.write_all(&(*f as u32).to_be_bytes())?
                }
                (VectorKind::Double, Value::Double(f)) => self.out.write_all(&f.to_be_bytes())?,
                (VectorKind::Object, value) => self.write_value(value)?,
                (kind, value) => {
                    return Err(unsupported(format!("{:?} is not a valid {:?} vector element", value, kind)));
                }
            }
        }
        Ok(())
    }

    fn write_dictionary(&mut self, dict: &'a Dictionary) -> Result<()> {
        self.write_length(dict.entries.len())?;
        self.out.write_all(&[u8::from(dict.weak_keys)])?;
        for (key, value) in &dict.entries {
            self.write_value(key)?;
            self.write_value(value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Map;

    fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }

    #[test]
    fn test_encode_scalars() {
        assert_eq!(encode(&Value::Int(5)).unwrap(), [0x04, 0x05]);
        assert_eq!(encode(&Value::Bool(true)).unwrap(), [0x03]);
        assert_eq!(encode(&Value::Bool(false)).unwrap(), [0x02]);
        assert_eq!(encode(&Value::Undefined).unwrap(), [0x00]);
        assert_eq!(encode(&Value::Int(-1)).unwrap(), [0x04, 0xff, 0xff, 0xff, 0xff]);
        assert_eq!(hex(&encode(&Value::Double(-4.1)).unwrap()), "05c010666666666666");
    }

    #[test]
    fn test_wide_int_becomes_double() {
        let bytes = encode(&Value::Int(1 << 28)).unwrap();
        assert_eq!(bytes[0], DOUBLE_MARKER);
        assert_eq!(decode(&bytes).unwrap(), Value::Double(268435456.0));
    }

    #[test]
    fn test_date_layout() {
        let bytes = encode(&Value::Date(0.0)).unwrap();
        assert_eq!(hex(&bytes), "08010000000000000000");
    }

    #[test]
    fn test_sealed_object_layout() {
        let mut object = Object::typed("P");
        object.sealed.insert("x".into(), Value::Int(1));
        assert_eq!(hex(&encode(&Value::Object(object)).unwrap()), "0a13035003780401");
    }

    #[test]
    fn test_externalizable_layout() {
        let object = Object::externalizable("E", Value::Int(3));
        assert_eq!(hex(&encode(&Value::Object(object)).unwrap()), "0a0703450403");
    }

    #[test]
    fn test_invalid_objects_are_rejected() {
        let mut sealed_with_dynamic = Object::typed("S");
        sealed_with_dynamic.dynamic.insert("x".into(), Value::Null);

        let mut external_with_members = Object::externalizable("E", Value::Null);
        external_with_members.sealed.insert("x".into(), Value::Null);

        let external_without_body = Object {
            class_name: Some("E".into()),
            is_externalizable: true,
            ..Default::default()
        };

        let mut empty_key = Object::anonymous();
        empty_key.dynamic.insert(String::new(), Value::Null);

        for object in [sealed_with_dynamic, external_with_members, external_without_body, empty_key] {
            assert!(
                matches!(encode(&Value::Object(object.clone())), Err(Amf3Error::UnsupportedValue(_))),
                "{:?}",
                object
            );
        }
    }

    #[test]
    fn test_empty_assoc_key_is_rejected() {
        let mut assoc = Map::new();
        assoc.insert(String::new(), Value::Int(1));
        let array = Value::Array(Array {
            dense: Vec::new(),
            assoc,
        });
        assert!(matches!(encode(&array), Err(Amf3Error::UnsupportedValue(_))));
    }

    #[test]
    fn test_empty_names_are_rejected() {
        let mut object = Object::typed("");
        object.sealed.insert("x".into(), Value::Int(1));
        assert!(matches!(
            encode(&Value::Object(object)),
            Err(Amf3Error::UnsupportedValue(_))
        ));

        let mut vector = Vector::new(VectorKind::Object);
        vector.element_type = Some(String::new());
        assert!(matches!(
            encode(&Value::Vector(vector)),
            Err(Amf3Error::UnsupportedValue(_))
        ));
    }

    #[test]
    fn test_uint_vector_elements_must_be_canonical() {
        let mut vector = Vector::new(VectorKind::UInt);
        vector.elements.push(Value::Double(5.0));
        assert!(matches!(
            encode(&Value::Vector(vector)),
            Err(Amf3Error::UnsupportedValue(_))
        ));

        let mut vector = Vector::new(VectorKind::UInt);
        vector.elements = vec![Value::Int(5), Value::Double(2147483648.0)];
        let value = Value::Vector(vector);
        assert_eq!(decode(&encode(&value).unwrap()).unwrap(), value);
    }

    #[test]
    fn test_vector_element_mismatch() {
        let mut vector = Vector::new(VectorKind::Int);
        vector.elements.push(Value::Double(1.5));
        assert!(matches!(
            encode(&Value::Vector(vector)),
            Err(Amf3Error::UnsupportedValue(_))
        ));

        let mut vector = Vector::new(VectorKind::UInt);
        vector.elements.push(Value::Int(-1));
        assert!(matches!(
            encode(&Value::Vector(vector)),
            Err(Amf3Error::UnsupportedValue(_))
        ));

        let mut vector = Vector::new(VectorKind::Double);
        vector.element_type = Some("Number".into());
        assert!(matches!(
            encode(&Value::Vector(vector)),
            Err(Amf3Error::UnsupportedValue(_))
        ));
    }

    #[test]
    fn test_default_identity_writes_repeats_in_full() {
        let blob = Value::ByteArray(vec![1, 2, 3]);
        let array = Value::Array(Array::dense(vec![blob.clone(), blob]));
        assert_eq!(hex(&encode(&array).unwrap()), "0905010c070102030c07010203");
    }

    #[test]
    fn test_structural_identity_emits_references() {
        let blob = Value::ByteArray(vec![1, 2, 3]);
        let array = Value::Array(Array::dense(vec![blob.clone(), blob]));
        let options = EncodeOptions {
            identity: ObjectIdentity::Structural,
        };
        let bytes = encode_with(&array, &options).unwrap();
        // second blob is a reference to complex index 1
        assert_eq!(hex(&bytes), "0905010c070102030c02");
        assert_eq!(decode(&bytes).unwrap(), array);
    }

    #[test]
    fn test_custom_identity() {
        let a = Value::Date(1.0);
        let b = Value::Date(2.0);
        let array = Value::Array(Array::dense(vec![a, b]));
        // every date shares one identity
        let options = EncodeOptions {
            identity: ObjectIdentity::Custom(Arc::new(|v: &Value| matches!(v, Value::Date(_)).then_some(7))),
        };
        let bytes = encode_with(&array, &options).unwrap();
        assert_eq!(hex(&bytes), "09050108013ff00000000000000802");
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.as_array().unwrap().dense[1], Value::Date(1.0));
    }

    #[test]
    fn test_custom_identity_never_references_an_open_ancestor() {
        // every value claims the same identity
        let options = EncodeOptions {
            identity: ObjectIdentity::Custom(Arc::new(|_: &Value| Some(1))),
        };
        let nested = Value::Array(Array::dense(vec![Value::Array(Array::dense(vec![Value::Int(1)]))]));
        let bytes = encode_with(&nested, &options).unwrap();
        assert_eq!(hex(&bytes), "0903010903010401");
        assert_eq!(decode(&bytes).unwrap(), nested);
    }

    #[test]
    fn test_custom_identity_never_crosses_kinds() {
        let empty = Value::Array(Array::dense(Vec::new()));
        let blob = Value::ByteArray(vec![0xaa]);
        let value = Value::Array(Array::dense(vec![empty.clone(), blob.clone(), empty]));
        let options = EncodeOptions {
            identity: ObjectIdentity::Custom(Arc::new(|v: &Value| match v {
                Value::Array(a) if a.dense.is_empty() => Some(2),
                Value::ByteArray(_) => Some(2),
                _ => None,
            })),
        };
        let bytes = encode_with(&value, &options).unwrap();
        // the blob is written inline, the second empty array references index 1
        assert_eq!(hex(&bytes), "0907010901010c03aa0902");
        assert_eq!(decode(&bytes).unwrap(), value);
    }

    #[test]
    fn test_encoder_writes_consecutive_values() {
        let mut encoder = Encoder::new(Vec::new());
        encoder.encode(&Value::Str("ab".into())).unwrap();
        encoder.encode(&Value::Str("ab".into())).unwrap();
        // tables do not carry over, so both strings are inline
        assert_eq!(hex(&encoder.into_inner()), "0605616206056162");
    }
}
