use std::rc::Rc;

use indexmap::IndexSet;

use crate::cursor::Cursor;
use crate::refs::{DecodeTables, Trait};
use crate::u29::sign_extend;
use crate::value::{Array, Dictionary, Map, Object, Value, Vector, VectorKind};
use crate::*;

/// Limits and behaviour switches for decoding.
#[derive(Debug, Clone)]
pub struct DecodeOptions {
    /// Maximum container nesting depth.
    pub max_depth: usize,
    /// Maximum number of values materialised by one top-level decode,
    /// counting every copy produced by expanding a back-reference.
    pub max_values: usize,
    /// Accept input that continues after the first value in [`decode_with`].
    pub allow_trailing_bytes: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            max_depth: 256,
            max_values: 4_000_000,
            allow_trailing_bytes: false,
        }
    }
}

// Decoder
pub struct Decoder<'a> {
    cursor: Cursor<'a>,
    options: DecodeOptions,
}

impl<'a> Decoder<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self::with_options(bytes, DecodeOptions::default())
    }

    pub fn with_options(bytes: &'a [u8], options: DecodeOptions) -> Self {
        Decoder {
            cursor: Cursor::new(bytes),
            options,
        }
    }

    /// Byte offset of the next value.
    pub fn position(&self) -> usize {
        self.cursor.pos()
    }

    /// Bytes left after the current position.
    pub fn remaining(&self) -> usize {
        self.cursor.remaining()
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Decode one top-level value.
    ///
    /// Every call starts with empty reference tables. On error the position
    /// is left where the call started.
    pub fn decode_value(&mut self) -> Result<Value> {
        let start = self.cursor.pos();
        let mut tables = DecodeTables::default();
        let mut reader = Reader {
            cursor: self.cursor.clone(),
            tables: &mut tables,
            options: &self.options,
            depth: 0,
            nodes: 0,
            replay: false,
        };
        match reader.read_value() {
            Ok(value) => {
                self.cursor = reader.cursor;
                Ok(value)
            }
            Err(e) => {
                tracing::debug!(offset = start, error = %e, "amf3 decode failed");
                Err(e)
            }
        }
    }
}

/// State of one top-level decode call.
///
/// A replaying reader re-reads a span that was already decoded once, to
/// materialise a back-reference. It registers nothing and counts nothing:
/// the tables already hold every entry the span created, and the span's
/// size was charged when the reference was resolved.
struct Reader<'r, 'a> {
    cursor: Cursor<'a>,
    tables: &'r mut DecodeTables,
    options: &'r DecodeOptions,
    depth: usize,
    nodes: usize,
    replay: bool,
}

impl Reader<'_, '_> {
    fn count(&mut self, n: usize) -> Result<()> {
        if self.replay {
            return Ok(());
        }
        self.nodes = self.nodes.saturating_add(n);
        if self.nodes > self.options.max_values {
            return Err(Amf3Error::ValueLimitExceeded {
                limit: self.options.max_values,
            });
        }
        Ok(())
    }

    /// Capacity hint that a hostile length prefix cannot inflate.
    fn capacity(&self, len: usize) -> usize {
        len.min(self.cursor.remaining())
    }

    fn read_value(&mut self) -> Result<Value> {
        let offset = self.cursor.pos();
        let marker = self.cursor.read_u8()?;
        let value = match marker {
            UNDEFINED_MARKER => Value::Undefined,
            NULL_MARKER => Value::Null,
            FALSE_MARKER => Value::Bool(false),
            TRUE_MARKER => Value::Bool(true),
            INTEGER_MARKER => Value::Int(sign_extend(self.cursor.read_u29()?)),
            DOUBLE_MARKER => Value::Double(self.cursor.read_f64()?),
            STRING_MARKER => Value::Str(self.read_string()?),
            DATE_MARKER => {
                return self.read_complex(offset, |r, _| Ok(Value::Date(r.cursor.read_f64()?)));
            }
            ARRAY_MARKER => return self.read_complex(offset, Self::read_array),
            OBJECT_MARKER => return self.read_complex(offset, Self::read_object),
            BYTE_ARRAY_MARKER => {
                return self.read_complex(offset, |r, len| {
                    Ok(Value::ByteArray(r.cursor.read_exact(len as usize)?.to_vec()))
                });
            }
            XML_MARKER => {
                return self.read_complex(offset, |r, len| Ok(Value::Xml(r.cursor.read_utf8(len as usize)?)));
            }
            XML_DOC_MARKER => {
                return self.read_complex(offset, |r, len| {
                    Ok(Value::XmlDocument(r.cursor.read_utf8(len as usize)?))
                });
            }
            VECTOR_INT_MARKER => return self.read_complex(offset, |r, len| r.read_vector(VectorKind::Int, len)),
            VECTOR_UINT_MARKER => return self.read_complex(offset, |r, len| r.read_vector(VectorKind::UInt, len)),
            VECTOR_DOUBLE_MARKER => {
                return self.read_complex(offset, |r, len| r.read_vector(VectorKind::Double, len));
            }
            VECTOR_OBJECT_MARKER => {
                return self.read_complex(offset, |r, len| r.read_vector(VectorKind::Object, len));
            }
            DICTIONARY_MARKER => return self.read_complex(offset, Self::read_dictionary),
            _ => return Err(Amf3Error::UnknownType { marker, offset }),
        };
        self.count(1)?;
        Ok(value)
    }

    /// String in ref-or-inline form; inline non-empty strings are interned.
    fn read_string(&mut self) -> Result<String> {
        let header = self.cursor.read_u29()?;
        if header & 1 == 0 {
            return self.tables.resolve_string_ref(header >> 1);
        }
        let s = self.cursor.read_utf8((header >> 1) as usize)?;
        if self.replay {
            return Ok(s);
        }
        Ok(self.tables.intern_string(s))
    }

    /// Shared ref-or-inline handling for every complex type. `read` gets the
    /// header with the inline flag shifted out.
    fn read_complex<F>(&mut self, offset: usize, read: F) -> Result<Value>
    where
        F: FnOnce(&mut Self, u32) -> Result<Value>,
    {
        let header = self.cursor.read_u29()?;
        if header & 1 == 0 {
            return self.read_reference(header >> 1);
        }

        if self.depth >= self.options.max_depth {
            return Err(Amf3Error::DepthLimitExceeded {
                limit: self.options.max_depth,
                offset,
            });
        }
        self.depth += 1;

        let index = (!self.replay).then(|| self.tables.push_complex(offset));
        let before = self.nodes;
        self.count(1)?;
        let value = read(self, header >> 1)?;
        if let Some(index) = index {
            self.tables.complete_complex(index, self.nodes - before);
        }

        self.depth -= 1;
        Ok(value)
    }

    /// Materialise a complex back-reference by reading its span again.
    fn read_reference(&mut self, index: u32) -> Result<Value> {
        let (start, nodes) = self.tables.resolve_complex_ref(index)?;
        self.count(nodes)?;
        let mut cursor = self.cursor.clone();
        cursor.seek(start);
        let mut replay = Reader {
            cursor,
            tables: &mut *self.tables,
            options: self.options,
            depth: self.depth,
            nodes: 0,
            replay: true,
        };
        replay.read_value()
    }

    /// Members terminated by an empty name.
    fn read_members(&mut self, into: &mut Map) -> Result<()> {
        loop {
            let offset = self.cursor.pos();
            let key = self.read_string()?;
            if key.is_empty() {
                return Ok(());
            }
            if into.contains_key(&key) {
                return Err(Amf3Error::DuplicateMember { name: key, offset });
            }
            let value = self.read_value()?;
            into.insert(key, value);
        }
    }

    fn read_array(&mut self, len: u32) -> Result<Value> {
        let mut assoc = Map::new();
        self.read_members(&mut assoc)?;
        let len = len as usize;
        let mut dense = Vec::with_capacity(self.capacity(len));
        for _ in 0..len {
            dense.push(self.read_value()?);
        }
        Ok(Value::Array(Array { dense, assoc }))
    }

    fn read_object(&mut self, flags: u32) -> Result<Value> {
        let t = if flags & 1 == 0 {
            self.tables.resolve_trait_ref(flags >> 1)?
        } else {
            let is_externalizable = flags & 0b10 != 0;
            let (is_dynamic, count) = if is_externalizable {
                (false, 0)
            } else {
                (flags & 0b100 != 0, (flags >> 3) as usize)
            };
            let class_name = self.read_string()?;
            let mut sealed_names = IndexSet::with_capacity(self.capacity(count));
            for _ in 0..count {
                let offset = self.cursor.pos();
                let name = self.read_string()?;
                if sealed_names.contains(&name) {
                    return Err(Amf3Error::DuplicateMember { name, offset });
                }
                sealed_names.insert(name);
            }
            let t = Trait {
                class_name: (!class_name.is_empty()).then_some(class_name),
                is_dynamic,
                is_externalizable,
                sealed_names: sealed_names.into_iter().collect(),
            };
            if self.replay {
                Rc::new(t)
            } else {
                self.tables.push_trait(t)
            }
        };

        let mut object = Object {
            class_name: t.class_name.clone(),
            is_dynamic: t.is_dynamic,
            is_externalizable: t.is_externalizable,
            ..Default::default()
        };
        if t.is_externalizable {
            object.externalized = Some(Box::new(self.read_value()?));
            return Ok(Value::Object(object));
        }
        for name in &t.sealed_names {
            let value = self.read_value()?;
            object.sealed.insert(name.clone(), value);
        }
        if t.is_dynamic {
            self.read_members(&mut object.dynamic)?;
        }
        Ok(Value::Object(object))
    }

    fn read_vector(&mut self, kind: VectorKind, len: u32) -> Result<Value> {
        let fixed_length = self.cursor.read_u8()? != 0;
        let element_type = match kind {
            VectorKind::Object => {
                let name = self.read_string()?;
                (!name.is_empty()).then_some(name)
            }
            _ => None,
        };

        let len = len as usize;
        let mut elements = Vec::with_capacity(self.capacity(len));
        for _ in 0..len {
            let element = match kind {
                VectorKind::Int => Value::Int(self.cursor.read_i32()?),
                VectorKind::UInt => {
                    let u = self.cursor.read_u32()?;
                    i32::try_from(u).map_or(Value::Double(f64::from(u)), Value::Int)
                }
                VectorKind::Double => Value::Double(self.cursor.read_f64()?),
                VectorKind::Object => {
                    elements.push(self.read_value()?);
                    continue;
                }
            };
            self.count(1)?;
            elements.push(element);
        }

        Ok(Value::Vector(Vector {
            kind,
            fixed_length,
            element_type,
            elements,
        }))
    }

    fn read_dictionary(&mut self, len: u32) -> Result<Value> {
        let weak_keys = self.cursor.read_u8()? != 0;
        let len = len as usize;
        let mut entries = Vec::with_capacity(self.capacity(len));
        for _ in 0..len {
            let key = self.read_value()?;
            let value = self.read_value()?;
            entries.push((key, value));
        }
        Ok(Value::Dictionary(Dictionary { weak_keys, entries }))
    }
}
