//! Per-call reference tables.
//!
//! AMF3 deduplicates strings, complex values and object traits by writing a
//! back-reference index in place of a repeat. Both directions keep three
//! append-only tables whose indices are assigned in first-occurrence order.
//! A table set lives exactly as long as one top-level decode or encode call.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::value::Value;
use crate::{Amf3Error, Result};

/// Which reference table an index points into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    String,
    Complex,
    Trait,
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TableKind::String => f.write_str("string"),
            TableKind::Complex => f.write_str("object"),
            TableKind::Trait => f.write_str("trait"),
        }
    }
}

/// Shape shared by objects of one class inside a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Trait {
    pub(crate) class_name: Option<String>,
    pub(crate) is_dynamic: bool,
    pub(crate) is_externalizable: bool,
    pub(crate) sealed_names: Vec<String>,
}

fn bad_reference(table: TableKind, index: u32, len: usize) -> Amf3Error {
    Amf3Error::BadReference { table, index, len }
}

/// Complex-table slot: where the value starts in the input, and the size of
/// its finished subtree. `nodes` is `None` while the value is still being read.
#[derive(Debug)]
struct Slot {
    start: usize,
    nodes: Option<usize>,
}

/// Decode-side tables.
///
/// Complex values are not stored. A back-reference is materialised by reading
/// the referenced value again from `start`; every string, trait and complex
/// entry that span refers to is already in the tables at the same index.
#[derive(Debug, Default)]
pub(crate) struct DecodeTables {
    strings: Vec<String>,
    complex: Vec<Slot>,
    traits: Vec<Rc<Trait>>,
}

impl DecodeTables {
    /// Record an inline string. Empty strings are never referenced.
    pub(crate) fn intern_string(&mut self, raw: String) -> String {
        if !raw.is_empty() {
            self.strings.push(raw.clone());
        }
        raw
    }

    pub(crate) fn resolve_string_ref(&self, index: u32) -> Result<String> {
        self.strings
            .get(index as usize)
            .cloned()
            .ok_or_else(|| bad_reference(TableKind::String, index, self.strings.len()))
    }

    /// Reserve the next complex slot before the value's children are read,
    /// so nested back-references see the same numbering as the writer.
    /// `start` is the offset of the value's type marker.
    pub(crate) fn push_complex(&mut self, start: usize) -> usize {
        self.complex.push(Slot { start, nodes: None });
        self.complex.len() - 1
    }

    /// Mark a reserved slot finished; `nodes` is the size of its subtree.
    pub(crate) fn complete_complex(&mut self, index: usize, nodes: usize) {
        if let Some(slot) = self.complex.get_mut(index) {
            slot.nodes = Some(nodes);
        }
    }

    /// Resolve a complex back-reference to the value's start offset and
    /// subtree size.
    pub(crate) fn resolve_complex_ref(&self, index: u32) -> Result<(usize, usize)> {
        let slot = self
            .complex
            .get(index as usize)
            .ok_or_else(|| bad_reference(TableKind::Complex, index, self.complex.len()))?;
        match slot.nodes {
            Some(nodes) => Ok((slot.start, nodes)),
            None => Err(Amf3Error::CyclicReference { index }),
        }
    }

    pub(crate) fn push_trait(&mut self, t: Trait) -> Rc<Trait> {
        let t = Rc::new(t);
        self.traits.push(Rc::clone(&t));
        t
    }

    pub(crate) fn resolve_trait_ref(&self, index: u32) -> Result<Rc<Trait>> {
        self.traits
            .get(index as usize)
            .cloned()
            .ok_or_else(|| bad_reference(TableKind::Trait, index, self.traits.len()))
    }
}

/// Result of an encode-side table lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lookup {
    /// Already written; emit this index.
    Existing(u32),
    /// First occurrence; it has been registered and must be written inline.
    New,
}

/// Encode-side trait key: class, flags and ordered sealed names.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct TraitKey<'a> {
    pub(crate) class_name: &'a str,
    pub(crate) is_dynamic: bool,
    pub(crate) is_externalizable: bool,
    pub(crate) sealed_names: Vec<&'a str>,
}

/// Complex value registered under a caller-supplied identity token.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TokenEntry {
    index: u32,
    marker: u8,
    done: bool,
}

/// How complex values are matched against earlier ones on the encode side.
#[derive(Debug, Default)]
pub(crate) enum ComplexIndex<'a> {
    /// Count only; every complex value is new.
    #[default]
    Off,
    /// Match strictly identical values.
    Structural(Vec<&'a Value>),
    /// Match caller-supplied identity tokens.
    Tokens(HashMap<u64, TokenEntry>),
}

/// Encode-side tables, borrowing keys from the value being written.
#[derive(Debug, Default)]
pub(crate) struct EncodeTables<'a> {
    strings: HashMap<&'a str, u32>,
    complex_len: u32,
    complex: ComplexIndex<'a>,
    traits: HashMap<TraitKey<'a>, u32>,
}

impl<'a> EncodeTables<'a> {
    pub(crate) fn new(complex: ComplexIndex<'a>) -> Self {
        EncodeTables {
            complex,
            ..Default::default()
        }
    }

    pub(crate) fn lookup_or_register_string(&mut self, s: &'a str) -> Lookup {
        if s.is_empty() {
            return Lookup::New;
        }
        if let Some(&index) = self.strings.get(s) {
            return Lookup::Existing(index);
        }
        let index = self.strings.len() as u32;
        self.strings.insert(s, index);
        Lookup::New
    }

    /// Index the next newly registered complex value will get.
    pub(crate) fn next_complex_index(&self) -> u32 {
        self.complex_len
    }

    /// Look up a complex value by identity. `token` is only consulted in
    /// token mode; a `None` token always registers a fresh entry.
    ///
    /// A token only matches an entry that is fully written and carries the
    /// same `marker`. Otherwise the value is registered as new and the token
    /// keeps pointing at its first entry.
    pub(crate) fn lookup_or_register_complex(
        &mut self,
        value: &'a Value,
        token: Option<u64>,
        marker: u8,
    ) -> Lookup {
        let next = self.complex_len;
        let found = match &mut self.complex {
            ComplexIndex::Off => None,
            ComplexIndex::Structural(seen) => {
                let found = seen
                    .iter()
                    .position(|earlier| earlier.identical(value))
                    .map(|i| i as u32);
                if found.is_none() {
                    seen.push(value);
                }
                found
            }
            ComplexIndex::Tokens(seen) => match token {
                Some(token) => match seen.get(&token) {
                    Some(entry) if entry.done && entry.marker == marker => Some(entry.index),
                    Some(_) => None,
                    None => {
                        seen.insert(token, TokenEntry {
                            index: next,
                            marker,
                            done: false,
                        });
                        None
                    }
                },
                None => None,
            },
        };
        match found {
            Some(index) => Lookup::Existing(index),
            None => {
                self.complex_len += 1;
                Lookup::New
            }
        }
    }

    /// Mark the complex value registered at `index` as fully written.
    pub(crate) fn complete_complex(&mut self, index: u32, token: Option<u64>) {
        if let (ComplexIndex::Tokens(seen), Some(token)) = (&mut self.complex, token) {
            if let Some(entry) = seen.get_mut(&token) {
                if entry.index == index {
                    entry.done = true;
                }
            }
        }
    }

    pub(crate) fn lookup_or_register_trait(&mut self, key: TraitKey<'a>) -> Lookup {
        if let Some(&index) = self.traits.get(&key) {
            return Lookup::Existing(index);
        }
        let index = self.traits.len() as u32;
        self.traits.insert(key, index);
        Lookup::New
    }
}
