//
// Copyright 2020 Fleece Developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//

//! Mutable overlay tree (§3.8/§4.7): a copy-on-write layer over immutable
//! Fleece data. A node starts out simply pointing at an immutable `Value`;
//! editing it (or any descendant) marks it dirty, and only dirty nodes are
//! re-emitted on encode -- everything else is copied through as-is, or, when
//! encoding into an amending [`Encoder`], written as a backward pointer into
//! the base document instead of being duplicated at all.

pub mod array;
pub mod dict;

pub use array::MArray;
pub use dict::MDict;

use std::rc::Weak;

use crate::encoder::Encoder;
use crate::error::Result;
use crate::shared_keys::SharedKeys;
use crate::value::{Value, ValueType};

/// A weak back-reference from a child `MArray`/`MDict` to whichever
/// collection's slot materialized it, used only to propagate `mutate()`
/// toward the root (§3.8 "Mutation ... propagates dirtiness toward the
/// root"). Weak to avoid a reference cycle with the parent's strong
/// ownership of the child through its slot/override map.
#[derive(Clone)]
pub(crate) enum ParentHandle<'a> {
    Array(Weak<std::cell::RefCell<array::Inner<'a>>>),
    Dict(Weak<std::cell::RefCell<dict::Inner<'a>>>),
}

impl<'a> ParentHandle<'a> {
    pub(crate) fn mark_dirty(&self) {
        match self {
            ParentHandle::Array(w) => {
                if let Some(rc) = w.upgrade() {
                    array::mark_dirty_and_propagate(&rc);
                }
            }
            ParentHandle::Dict(w) => {
                if let Some(rc) = w.upgrade() {
                    dict::mark_dirty_and_propagate(&rc);
                }
            }
        }
    }
}

/// A native-side scalar or nested mutable collection.
#[derive(Clone)]
pub enum Native<'a> {
    Null,
    Undefined,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float32(f32),
    Float64(f64),
    String(String),
    Data(Vec<u8>),
    Array(MArray<'a>),
    Dict(MDict<'a>),
}

impl<'a> Native<'a> {
    fn encode_to(&self, enc: &mut Encoder, shared_keys: Option<&'a SharedKeys>) -> Result<()> {
        match self {
            Native::Null => enc.write_null(),
            Native::Undefined => enc.write_undefined(),
            Native::Bool(b) => enc.write_bool(*b),
            Native::Int(i) => enc.write_i64(*i),
            Native::UInt(u) => enc.write_u64(*u),
            Native::Float32(f) => enc.write_f32(*f),
            Native::Float64(f) => enc.write_f64(*f),
            Native::String(s) => enc.write_string(s),
            Native::Data(d) => enc.write_data(d),
            Native::Array(a) => a.encode_to(enc, shared_keys),
            Native::Dict(d) => d.encode_to(enc, shared_keys),
        }
    }
}

/// One slot of the mutable tree: either untouched (still bound to the
/// immutable document) or replaced with a native value. Matches `MValue`'s
/// two-state design (the `toNative`-cached third state is folded into
/// `Native::Array`/`Native::Dict`, which are themselves cheap `Rc` handles).
#[derive(Clone)]
pub enum MValue<'a> {
    Immutable(Value<'a>),
    Native(Native<'a>),
}

impl<'a> MValue<'a> {
    pub fn undefined() -> Self {
        MValue::Native(Native::Undefined)
    }

    pub fn null() -> Self {
        MValue::Native(Native::Null)
    }

    pub fn from_value(value: Value<'a>) -> Self {
        MValue::Immutable(value)
    }

    pub fn is_undefined(&self) -> bool {
        match self {
            MValue::Immutable(v) => v.value_type() == ValueType::Undefined,
            MValue::Native(Native::Undefined) => true,
            _ => false,
        }
    }

    /// Materializes this slot as a mutable array, caching the result in
    /// place so a second call (through the same overlay node) returns the
    /// identical `MArray` handle rather than a fresh overlay with its own
    /// edit history. Returns `None` if the slot isn't an array.
    pub fn as_mutable_array(&mut self) -> Option<MArray<'a>> {
        if let MValue::Native(Native::Array(a)) = self {
            return Some(a.clone());
        }
        if let MValue::Immutable(v) = self {
            let arr = v.as_array()?;
            let marr = MArray::from_array(arr);
            *self = MValue::Native(Native::Array(marr.clone()));
            return Some(marr);
        }
        None
    }

    /// As [`MValue::as_mutable_array`], for dicts.
    pub fn as_mutable_dict(&mut self) -> Option<MDict<'a>> {
        if let MValue::Native(Native::Dict(d)) = self {
            return Some(d.clone());
        }
        if let MValue::Immutable(v) = self {
            let dict = v.as_dict()?;
            let mdict = MDict::from_dict(dict);
            *self = MValue::Native(Native::Dict(mdict.clone()));
            return Some(mdict);
        }
        None
    }

    pub fn encode_to(&self, enc: &mut Encoder, shared_keys: Option<&'a SharedKeys>) -> Result<()> {
        match self {
            MValue::Immutable(v) => enc.write_raw_value(v, shared_keys),
            MValue::Native(n) => n.encode_to(enc, shared_keys),
        }
    }
}

impl<'a> From<bool> for MValue<'a> {
    fn from(b: bool) -> Self {
        MValue::Native(Native::Bool(b))
    }
}

impl<'a> From<i64> for MValue<'a> {
    fn from(i: i64) -> Self {
        MValue::Native(Native::Int(i))
    }
}

impl<'a> From<u64> for MValue<'a> {
    fn from(u: u64) -> Self {
        MValue::Native(Native::UInt(u))
    }
}

impl<'a> From<f64> for MValue<'a> {
    fn from(f: f64) -> Self {
        MValue::Native(Native::Float64(f))
    }
}

impl<'a> From<String> for MValue<'a> {
    fn from(s: String) -> Self {
        MValue::Native(Native::String(s))
    }
}

impl<'a> From<&str> for MValue<'a> {
    fn from(s: &str) -> Self {
        MValue::Native(Native::String(s.to_string()))
    }
}

/// A host-native collection: either an array or a dict of native values,
/// mirroring this crate's own `MArray`/`MDict` shape but generic over the
/// embedding host's own value representation `T`.
pub enum MCollection<T> {
    Array(Vec<T>),
    Dict(Vec<(String, T)>),
}

/// Three hooks a host-language binding supplies to interoperate with the
/// mutable tree, generalizing `MValue.hh`'s `toNative`/`collectionFromNative`/
/// `encodeNative` protected-virtual hook triple (the original's
/// Objective-C/CoreFoundation bridge point) into a plain trait. This crate's
/// own `MArray`/`MDict` bake their native representation in directly and
/// never go through a binding; `IdentityBinding` below exists only to show
/// the trait is implementable end-to-end.
pub trait NativeBinding<T> {
    fn to_native(&self, value: &Value<'_>) -> T;
    fn collection_for_native(&self, native: &T) -> Option<MCollection<T>>;
    fn encode_native(&self, native: &T, enc: &mut Encoder) -> Result<()>;
}

/// A scalar-only native representation: decoded values are cloned as
/// themselves rather than interned into some richer host object model.
#[derive(Clone, Debug, PartialEq)]
pub enum PlainNative {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
    Data(Vec<u8>),
}

/// The trivial [`NativeBinding`] this crate ships: every decoded scalar
/// round-trips through [`PlainNative`] unchanged; arrays and dicts are left
/// to the mutable tree's own `MArray`/`MDict` rather than bridged.
pub struct IdentityBinding;

impl NativeBinding<PlainNative> for IdentityBinding {
    fn to_native(&self, value: &Value<'_>) -> PlainNative {
        match value.value_type() {
            ValueType::Bool => PlainNative::Bool(value.to_bool()),
            ValueType::Int => PlainNative::Int(value.to_i64()),
            ValueType::UInt => PlainNative::UInt(value.to_u64()),
            ValueType::Float32 | ValueType::Float64 => PlainNative::Float(value.to_f64()),
            ValueType::String => PlainNative::String(value.to_str().to_string()),
            ValueType::Data => PlainNative::Data(value.to_data().to_vec()),
            _ => PlainNative::Null,
        }
    }

    fn collection_for_native(&self, _native: &PlainNative) -> Option<MCollection<PlainNative>> {
        None
    }

    fn encode_native(&self, native: &PlainNative, enc: &mut Encoder) -> Result<()> {
        match native {
            PlainNative::Null => enc.write_null(),
            PlainNative::Bool(b) => enc.write_bool(*b),
            PlainNative::Int(i) => enc.write_i64(*i),
            PlainNative::UInt(u) => enc.write_u64(*u),
            PlainNative::Float(f) => enc.write_f64(*f),
            PlainNative::String(s) => enc.write_string(s),
            PlainNative::Data(d) => enc.write_data(d),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_binding_round_trips_scalars_through_encoder() {
        let binding = IdentityBinding;
        let mut enc = Encoder::new();
        enc.write_i64(7).unwrap();
        let bytes = enc.finish().unwrap().to_vec();
        let value = Value::from_bytes_trusted(&bytes);
        let native = binding.to_native(&value);
        assert_eq!(native, PlainNative::Int(7));

        let mut enc2 = Encoder::new();
        binding.encode_native(&native, &mut enc2).unwrap();
        let bytes2 = enc2.finish().unwrap().to_vec();
        assert_eq!(Value::from_bytes_trusted(&bytes2).to_i64(), 7);
    }
}
