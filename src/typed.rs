use serde::de::{self, Visitor};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::marker::PhantomData;

/// Struct name the AMF3 serializer recognises as a [`Typed`] wrapper.
pub(crate) const TYPED_TOKEN: &str = "$amf3_codec::Typed";
pub(crate) const CLASS_FIELD: &str = "class_name";
pub(crate) const VALUE_FIELD: &str = "value";

/// A value serialized as a typed (class-aliased) AMF3 object
///
/// Through this crate, `value`'s fields become the sealed members of an
/// object whose trait carries `class_name`. Other serde formats see a plain
/// `{ "class_name": ..., "value": ... }` struct.
#[derive(Debug, Clone, PartialEq)]
pub struct Typed<T> {
    /// The registered class alias (optional for compatibility)
    pub class_name: Option<String>,
    /// The object's members
    pub value: T,
}

impl<T> Typed<T> {
    /// Create a new typed value
    pub fn new(class_name: Option<String>, value: T) -> Self {
        Typed { class_name, value }
    }
}

impl<T: Serialize> Serialize for Typed<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct(TYPED_TOKEN, 2)?;
        state.serialize_field(CLASS_FIELD, &self.class_name)?;
        state.serialize_field(VALUE_FIELD, &self.value)?;
        state.end()
    }
}

// Decoded AMF3 values present themselves in the wrapper form; an untyped
// value arrives with no class name.
impl<'de, T> Deserialize<'de> for Typed<T>
where
    T: Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct TypedVisitor<T> {
            marker: PhantomData<T>,
        }

        impl<'de, T> Visitor<'de> for TypedVisitor<T>
        where
            T: Deserialize<'de>,
        {
            type Value = Typed<T>;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a typed object")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Typed<T>, A::Error>
            where
                A: de::MapAccess<'de>,
            {
                let mut class_name = None;
                let mut value = None;
                while let Some(key) = map.next_key::<String>()? {
                    match key.as_str() {
                        CLASS_FIELD => class_name = map.next_value::<Option<String>>()?,
                        VALUE_FIELD => value = Some(map.next_value::<T>()?),
                        _ => {
                            map.next_value::<de::IgnoredAny>()?;
                        }
                    }
                }
                let value = value.ok_or_else(|| <A::Error as de::Error>::missing_field(VALUE_FIELD))?;
                Ok(Typed { class_name, value })
            }
        }

        deserializer.deserialize_struct(
            TYPED_TOKEN,
            &[CLASS_FIELD, VALUE_FIELD],
            TypedVisitor {
                marker: PhantomData,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Value;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Point {
        x: i32,
        y: i32,
    }

    #[test]
    fn test_typed_serializes_as_sealed_object() {
        let typed = Typed::new(Some("geom.Point".to_string()), Point { x: 1, y: 2 });
        let value = crate::to_value(&typed).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object.class_name.as_deref(), Some("geom.Point"));
        assert!(!object.is_dynamic);
        assert!(object.dynamic.is_empty());
        let names: Vec<_> = object.sealed.keys().map(String::as_str).collect();
        assert_eq!(names, ["x", "y"]);
    }

    #[test]
    fn test_typed_round_trip_through_amf3() {
        let typed = Typed::new(Some("geom.Point".to_string()), Point { x: -5, y: 9 });
        let bytes = crate::to_vec(&typed).unwrap();
        let decoded: Typed<Point> = crate::from_slice(&bytes).unwrap();
        assert_eq!(decoded, typed);
    }

    #[test]
    fn test_typed_from_anonymous_object() {
        let bytes = crate::to_vec(&Point { x: 3, y: 4 }).unwrap();
        let decoded: Typed<Point> = crate::from_slice(&bytes).unwrap();
        assert_eq!(decoded.class_name, None);
        assert_eq!(decoded.value, Point { x: 3, y: 4 });
    }

    #[test]
    fn test_typed_non_object_is_rejected() {
        let typed = Typed::new(Some("Boxed".to_string()), 5);
        assert!(crate::to_value(&typed).is_err());
    }

    #[test]
    fn test_typed_deserialize_from_json_object() {
        let json = r#"{"class_name": "geom.Point", "value": {"x": 1, "y": 2}}"#;
        let typed: Typed<Point> = serde_json::from_str(json).unwrap();
        assert_eq!(typed.class_name.as_deref(), Some("geom.Point"));
        assert_eq!(typed.value, Point { x: 1, y: 2 });
    }

    #[test]
    fn test_typed_from_untyped_value() {
        let typed: Typed<String> = crate::from_value(Value::Str("plain".into())).unwrap();
        assert_eq!(typed.class_name, None);
        assert_eq!(typed.value, "plain");
    }

    #[test]
    fn test_typed_serializes_to_json_as_wrapper() {
        let typed = Typed::new(Some("A".to_string()), Value::Int(1));
        let json = serde_json::to_string(&typed).unwrap();
        assert_eq!(json, r#"{"class_name":"A","value":1}"#);
    }
}
