//! `Value` as a serde deserializer.
//!
//! Lets a decoded tree populate any `T: Deserialize`, or be transcoded into
//! another self-describing format.

use serde::de::{self, Deserializer, IntoDeserializer, Visitor};

use crate::typed::{CLASS_FIELD, TYPED_TOKEN, VALUE_FIELD};
use crate::value::{Object, Value};
use crate::{Amf3Error, Result};

/// Sealed then dynamic members of an object.
fn object_entries(object: Object) -> Vec<(Value, Value)> {
    object
        .sealed
        .into_iter()
        .chain(object.dynamic)
        .map(|(k, v)| (Value::Str(k), v))
        .collect()
}

fn visit_entries<'de, V: Visitor<'de>>(entries: Vec<(Value, Value)>, visitor: V) -> Result<V::Value> {
    visitor.visit_map(MapAccess {
        iter: entries.into_iter(),
        value: None,
    })
}

fn visit_elements<'de, V: Visitor<'de>>(elements: Vec<Value>, visitor: V) -> Result<V::Value> {
    visitor.visit_seq(SeqAccess {
        iter: elements.into_iter(),
    })
}

/// Integral doubles are offered to integer visitors as integers, so values
/// that `to_value` widened to `Double` come back into their integer fields.
macro_rules! deserialize_integer {
    ($method:ident, $visit:ident, $ty:ty) => {
        fn $method<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
            match self {
                // MAX + 1 is exact or a power of two, so the bound stays strict
                Value::Double(f) if f.fract() == 0.0 && f >= <$ty>::MIN as f64 && f < <$ty>::MAX as f64 + 1.0 => {
                    visitor.$visit(f as $ty)
                }
                other => other.deserialize_any(visitor),
            }
        }
    };
}

impl<'de> Deserializer<'de> for Value {
    type Error = Amf3Error;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self {
            Value::Undefined | Value::Null => visitor.visit_unit(),
            Value::Bool(b) => visitor.visit_bool(b),
            Value::Int(i) => visitor.visit_i32(i),
            Value::Double(f) | Value::Date(f) => visitor.visit_f64(f),
            Value::Str(s) | Value::Xml(s) | Value::XmlDocument(s) => visitor.visit_string(s),
            Value::ByteArray(b) => visitor.visit_byte_buf(b),
            Value::Array(array) if array.assoc.is_empty() => visit_elements(array.dense, visitor),
            Value::Array(array) => {
                let entries = array
                    .dense
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| (Value::Str(i.to_string()), v))
                    .chain(array.assoc.into_iter().map(|(k, v)| (Value::Str(k), v)))
                    .collect();
                visit_entries(entries, visitor)
            }
            Value::Object(mut object) => match object.externalized.take() {
                Some(body) if object.is_externalizable => (*body).deserialize_any(visitor),
                _ => visit_entries(object_entries(object), visitor),
            },
            Value::Vector(vector) => visit_elements(vector.elements, visitor),
            Value::Dictionary(dict) => visit_entries(dict.entries, visitor),
        }
    }

    deserialize_integer!(deserialize_i8, visit_i8, i8);
    deserialize_integer!(deserialize_i16, visit_i16, i16);
    deserialize_integer!(deserialize_i32, visit_i32, i32);
    deserialize_integer!(deserialize_i64, visit_i64, i64);
    deserialize_integer!(deserialize_u8, visit_u8, u8);
    deserialize_integer!(deserialize_u16, visit_u16, u16);
    deserialize_integer!(deserialize_u32, visit_u32, u32);
    deserialize_integer!(deserialize_u64, visit_u64, u64);

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self {
            Value::Undefined | Value::Null => visitor.visit_none(),
            other => visitor.visit_some(other),
        }
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(self, _name: &'static str, visitor: V) -> Result<V::Value> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        name: &'static str,
        _fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value> {
        if name != TYPED_TOKEN {
            return self.deserialize_any(visitor);
        }
        let (class_name, value) = match self {
            Value::Object(mut object) if !object.is_externalizable => {
                let class_name = object.class_name.take().map_or(Value::Null, Value::Str);
                let mut untyped = Object::anonymous();
                untyped.dynamic = object.sealed;
                untyped.dynamic.extend(object.dynamic);
                (class_name, Value::Object(untyped))
            }
            Value::Object(mut object) => {
                let class_name = object.class_name.take().map_or(Value::Null, Value::Str);
                let body = object.externalized.map_or(Value::Null, |body| *body);
                (class_name, body)
            }
            other => (Value::Null, other),
        };
        visit_entries(
            vec![
                (Value::Str(CLASS_FIELD.to_owned()), class_name),
                (Value::Str(VALUE_FIELD.to_owned()), value),
            ],
            visitor,
        )
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value> {
        match self {
            Value::Str(variant) => visitor.visit_enum(variant.into_deserializer()),
            Value::Object(object) => {
                let mut entries = object_entries(object);
                if entries.len() != 1 {
                    return Err(Amf3Error::Serde(format!(
                        "enum object must have exactly one member, found {}",
                        entries.len()
                    )));
                }
                let (variant, value) = entries.remove(0);
                visitor.visit_enum(EnumAccess { variant, value })
            }
            other => Err(Amf3Error::Serde(format!("expected an enum, found {:?}", other))),
        }
    }

    fn deserialize_ignored_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        drop(self);
        visitor.visit_unit()
    }

    serde::forward_to_deserialize_any! {
        bool f32 f64 char str string bytes byte_buf unit unit_struct seq tuple
        tuple_struct map identifier
    }
}

impl<'de> IntoDeserializer<'de, Amf3Error> for Value {
    type Deserializer = Value;

    fn into_deserializer(self) -> Value {
        self
    }
}

struct SeqAccess {
    iter: std::vec::IntoIter<Value>,
}

impl<'de> de::SeqAccess<'de> for SeqAccess {
    type Error = Amf3Error;

    fn next_element_seed<T: de::DeserializeSeed<'de>>(&mut self, seed: T) -> Result<Option<T::Value>> {
        match self.iter.next() {
            Some(value) => seed.deserialize(value).map(Some),
            None => Ok(None),
        }
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.iter.len())
    }
}

struct MapAccess {
    iter: std::vec::IntoIter<(Value, Value)>,
    value: Option<Value>,
}

impl<'de> de::MapAccess<'de> for MapAccess {
    type Error = Amf3Error;

    fn next_key_seed<K: de::DeserializeSeed<'de>>(&mut self, seed: K) -> Result<Option<K::Value>> {
        match self.iter.next() {
            Some((key, value)) => {
                self.value = Some(value);
                seed.deserialize(key).map(Some)
            }
            None => Ok(None),
        }
    }

    fn next_value_seed<V: de::DeserializeSeed<'de>>(&mut self, seed: V) -> Result<V::Value> {
        match self.value.take() {
            Some(value) => seed.deserialize(value),
            None => Err(Amf3Error::Serde("map value requested before its key".to_string())),
        }
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.iter.len())
    }
}

struct EnumAccess {
    variant: Value,
    value: Value,
}

impl<'de> de::EnumAccess<'de> for EnumAccess {
    type Error = Amf3Error;
    type Variant = VariantAccess;

    fn variant_seed<V: de::DeserializeSeed<'de>>(self, seed: V) -> Result<(V::Value, VariantAccess)> {
        let variant = seed.deserialize(self.variant)?;
        Ok((variant, VariantAccess { value: self.value }))
    }
}

struct VariantAccess {
    value: Value,
}

impl<'de> de::VariantAccess<'de> for VariantAccess {
    type Error = Amf3Error;

    fn unit_variant(self) -> Result<()> {
        Ok(())
    }

    fn newtype_variant_seed<T: de::DeserializeSeed<'de>>(self, seed: T) -> Result<T::Value> {
        seed.deserialize(self.value)
    }

    fn tuple_variant<V: Visitor<'de>>(self, _len: usize, visitor: V) -> Result<V::Value> {
        self.value.deserialize_seq(visitor)
    }

    fn struct_variant<V: Visitor<'de>>(self, _fields: &'static [&'static str], visitor: V) -> Result<V::Value> {
        self.value.deserialize_map(visitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Array, Dictionary};
    use crate::{from_value, to_value};
    use serde::Deserialize;
    use std::collections::HashMap;

    #[derive(Debug, Deserialize, serde::Serialize, PartialEq)]
    struct Reward {
        item: String,
        count: u32,
        gold: u64,
        note: Option<String>,
        #[serde(with = "serde_bytes")]
        blob: Vec<u8>,
    }

    #[derive(Debug, Deserialize, serde::Serialize, PartialEq)]
    enum Command {
        Ping,
        Move(i32, i32),
        Say { text: String },
        Wrap(u8),
    }

    #[test]
    fn test_struct_round_trip() {
        let reward = Reward {
            item: "sword".into(),
            count: 2,
            gold: 1 << 40,
            note: None,
            blob: vec![1, 2],
        };
        let value = to_value(&reward).unwrap();
        assert_eq!(from_value::<Reward>(value).unwrap(), reward);
    }

    #[test]
    fn test_enum_round_trip() {
        for command in [
            Command::Ping,
            Command::Move(3, -4),
            Command::Say { text: "hey".into() },
            Command::Wrap(7),
        ] {
            let value = to_value(&command).unwrap();
            assert_eq!(from_value::<Command>(value).unwrap(), command);
        }
    }

    #[test]
    fn test_integral_double_bounds() {
        let two_63 = 9_223_372_036_854_775_808.0;
        assert!(matches!(from_value::<i64>(Value::Double(two_63)), Err(Amf3Error::Serde(_))));
        assert_eq!(from_value::<i64>(Value::Double(-two_63)).unwrap(), i64::MIN);
        assert!(matches!(
            from_value::<u64>(Value::Double(two_63 * 2.0)),
            Err(Amf3Error::Serde(_))
        ));
        assert_eq!(from_value::<u64>(Value::Double(two_63)).unwrap(), 1 << 63);
        assert_eq!(from_value::<u32>(Value::Double(4294967295.0)).unwrap(), u32::MAX);
        assert!(from_value::<u32>(Value::Double(4294967296.0)).is_err());
        assert!(from_value::<i8>(Value::Double(128.0)).is_err());
    }

    #[test]
    fn test_undefined_is_none() {
        assert_eq!(from_value::<Option<i32>>(Value::Undefined).unwrap(), None);
        assert_eq!(from_value::<Option<i32>>(Value::Int(4)).unwrap(), Some(4));
    }

    #[test]
    fn test_mixed_array_reads_as_map() {
        let mut array = Array::dense(vec![Value::Int(10)]);
        array.assoc.insert("name".into(), Value::Str("x".into()));
        let map: HashMap<String, Value> = from_value(Value::Array(array)).unwrap();
        assert_eq!(map.get("0"), Some(&Value::Int(10)));
        assert_eq!(map.get("name"), Some(&Value::Str("x".into())));
    }

    #[test]
    fn test_dictionary_reads_as_map() {
        let dict = Dictionary {
            weak_keys: true,
            entries: vec![(Value::Int(1), Value::Str("one".into()))],
        };
        let map: HashMap<u32, String> = from_value(Value::Dictionary(dict)).unwrap();
        assert_eq!(map.get(&1).map(String::as_str), Some("one"));
    }

    #[test]
    fn test_externalized_body_is_transparent() {
        let object = Object::externalizable(
            "flex.messaging.io.ArrayCollection",
            Value::Array(Array::dense(vec![Value::Int(1), Value::Int(2)])),
        );
        let items: Vec<i32> = from_value(Value::Object(object)).unwrap();
        assert_eq!(items, vec![1, 2]);
    }

    #[test]
    fn test_enum_object_with_two_members_is_rejected() {
        let mut object = Object::anonymous();
        object.dynamic.insert("Ping".into(), Value::Null);
        object.dynamic.insert("Move".into(), Value::Null);
        assert!(matches!(
            from_value::<Command>(Value::Object(object)),
            Err(Amf3Error::Serde(_))
        ));
    }
}
