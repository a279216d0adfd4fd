//
// Copyright 2020 Fleece Developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//

//! Streaming encoder (§4.5): a collection stack plus an append-only output
//! buffer. Scalars that fit a 2-byte slot are written inline; everything
//! else is written out-of-line and referenced by a backward pointer fixed up
//! once the enclosing Array/Dict's final layout (and therefore every slot's
//! final offset) is known, at `end_array`/`end_dict` time.
//!
//! The first error encountered poisons the encoder: every later call is
//! rejected with the same error, and `finish` surfaces it. This mirrors the
//! collection-stack design in `other_examples/…callumbirks-fleece-rs…`
//! (`CollectionStack`, deferred pointer fixup, `dict_key_cmp`-ordered close),
//! adapted so width promotion and pointer-offset fixup happen in one pass at
//! `end_array`/`end_dict` rather than via a separate two-pass fixup step.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::shared_keys::SharedKeys;
use crate::slice::AllocSlice;
use crate::value::tag::{self, constants, extra_flags, tag as tagmod};
use crate::value::{pointer, Value, ValueType};

/// Largest count an Array/Dict header can hold inline: 11 bits split across
/// the tag byte's low 3 bits and the second byte, matching
/// [`crate::value::Value::container_header`]'s fixed decode -- there is no
/// varint long-form fallback for container counts in this crate's tag
/// layout (unlike String/Data), so this is a hard ceiling.
const MAX_INLINE_COUNT: usize = 0x7FF;

/// Tunable knobs for an [`Encoder`], grounded in `FLEncoder.h`'s
/// `FLEncoderFormat` + `NewWithOptions` (cited by `SPEC_FULL.md` §1).
#[derive(Clone, Debug)]
pub struct EncoderOptions {
    /// Bytes to reserve in the output buffer up front.
    pub reserve_size: usize,
    /// Deduplicate repeated out-of-line strings (dict keys and values)
    /// against a table of already-written offsets.
    pub unique_strings: bool,
}

impl Default for EncoderOptions {
    fn default() -> Self {
        EncoderOptions {
            reserve_size: 256,
            unique_strings: true,
        }
    }
}

/// A value pushed into the currently-open collection, or about to become the
/// document's sole root value.
enum Slot {
    /// A complete 2-byte encoding, stored directly in the parent slot.
    Inline([u8; 2]),
    /// A pointer to a value already written to `out`, at this local offset.
    Ptr(u32),
    /// A pointer to a value living in an amended-against base document, at
    /// this offset within the base (§4.5/§6.1's amend mode).
    BaseRef(u32),
}

enum Frame {
    Array(ArrayFrame),
    Dict(DictFrame),
}

struct ArrayFrame {
    values: Vec<Slot>,
}

/// The sort key used to order dict entries exactly as
/// [`crate::value::Value::dict_key_cmp`] orders them on read: SharedKeys
/// integers first (numeric order), then strings (lexicographic order).
#[derive(Clone, PartialEq, Eq)]
enum KeySort {
    Int(i64),
    Str(String),
}

struct DictEntry {
    key_sort: KeySort,
    key_slot: Slot,
    value_slot: Slot,
}

struct DictFrame {
    entries: Vec<DictEntry>,
    pending_key: Option<(KeySort, Slot)>,
}

/// Appends Fleece-encoded bytes to an in-memory buffer via a stack of
/// open Array/Dict collections. Not thread-safe (§5); one encoder produces
/// one document.
pub struct Encoder {
    out: Vec<u8>,
    /// Length of an external base document this encoder amends, or `0` for
    /// an ordinary from-scratch encoder. See [`Encoder::new_amending`].
    base_len: usize,
    /// Whether backward references into the base use the `extern` pointer
    /// flag (base stays a separate buffer) rather than plain addressing
    /// (base is physically concatenated by the caller after `finish`).
    extern_pointers: bool,
    options: EncoderOptions,
    shared_keys: Option<SharedKeys>,
    unique_strings: HashMap<String, u32>,
    stack: Vec<Frame>,
    root_value: Option<Slot>,
    error: Option<Error>,
}

impl Encoder {
    pub fn new() -> Self {
        Self::with_options(EncoderOptions::default())
    }

    pub fn with_options(options: EncoderOptions) -> Self {
        Encoder {
            out: Vec::with_capacity(options.reserve_size),
            base_len: 0,
            extern_pointers: false,
            unique_strings: HashMap::new(),
            options,
            shared_keys: None,
            stack: Vec::new(),
            root_value: None,
            error: None,
        }
    }

    /// An amending encoder whose output is meant to be physically
    /// concatenated after `base_len` bytes of an already-encoded document
    /// (the "snip" / incremental-append mode, §4.5/§6.1). Backward
    /// references into the base are plain pointers, biased internally by
    /// `base_len` so they resolve correctly only once concatenated.
    pub fn new_amending(base_len: usize) -> Self {
        let mut enc = Self::new();
        enc.base_len = base_len;
        enc
    }

    /// Like [`Encoder::new_amending`], but backward references into the
    /// base use the `extern` pointer flag, anchored to the end of the base
    /// buffer exactly as [`crate::value::Value::deref_pointer_sized`]'s
    /// extern branch expects. This lets the base remain a separate buffer,
    /// attached at read time via [`crate::doc::Doc::with_extern`], instead
    /// of requiring physical concatenation.
    pub fn new_amending_extern(base_len: usize) -> Self {
        let mut enc = Self::new_amending(base_len);
        enc.extern_pointers = true;
        enc
    }

    pub fn with_shared_keys(mut self, shared_keys: SharedKeys) -> Self {
        self.shared_keys = Some(shared_keys);
        self
    }

    pub fn shared_keys(&self) -> Option<&SharedKeys> {
        self.shared_keys.as_ref()
    }

    /// Whether this encoder is amending an existing document (§4.5/§4.7),
    /// i.e. `write_base_ref` is available. Used by the mutable tree
    /// (`mtree`) to decide whether an unmodified subtree can be re-emitted
    /// as a backward pointer instead of copied.
    pub fn is_amending(&self) -> bool {
        self.base_len > 0
    }

    /// Length in bytes of the base document this encoder amends, or `0`.
    pub fn base_len(&self) -> usize {
        self.base_len
    }

    /// Takes back the SharedKeys registry (possibly grown by newly-interned
    /// keys during encoding) for reuse by the next encoder or a reader.
    pub fn into_shared_keys(self) -> Option<SharedKeys> {
        self.shared_keys
    }

    /// Runs `f`, poisoning the encoder if it errors; a poisoned encoder
    /// rejects every subsequent call with the same error (§7: "encoder
    /// errors latch").
    fn op<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if let Some(e) = &self.error {
            return Err(e.clone());
        }
        let result = f(self);
        if let Err(e) = &result {
            self.error = Some(e.clone());
        }
        result
    }

    pub fn write_null(&mut self) -> Result<()> {
        self.op(|enc| enc.push_or_root(Slot::Inline(constants::NULL)))
    }

    pub fn write_undefined(&mut self) -> Result<()> {
        self.op(|enc| enc.push_or_root(Slot::Inline(constants::UNDEFINED)))
    }

    pub fn write_bool(&mut self, value: bool) -> Result<()> {
        self.op(|enc| {
            let bytes = if value { constants::TRUE } else { constants::FALSE };
            enc.push_or_root(Slot::Inline(bytes))
        })
    }

    /// Signed 64-bit write. Values in `-2048..=2047` are inlined as a
    /// 12-bit `Short`; everything else is written as a minimal-width `Int`
    /// payload out-of-line.
    pub fn write_i64(&mut self, value: i64) -> Result<()> {
        self.op(|enc| {
            if (-2048..=2047).contains(&value) {
                enc.push_or_root(Slot::Inline(encode_short(value)))
            } else {
                enc.push_value(encode_int_bytes(value, false))
            }
        })
    }

    /// Unsigned 64-bit write, for values needing the full `u64` range that
    /// [`Encoder::write_i64`] cannot represent exactly.
    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.op(|enc| {
            if value <= 2047 {
                enc.push_or_root(Slot::Inline(encode_short(value as i64)))
            } else {
                enc.push_value(encode_int_bytes(value as i64, true))
            }
        })
    }

    pub fn write_f32(&mut self, value: f32) -> Result<()> {
        self.op(|enc| {
            let mut bytes = vec![tagmod::FLOAT, 0];
            bytes.extend_from_slice(&value.to_le_bytes());
            enc.push_value(bytes)
        })
    }

    pub fn write_f64(&mut self, value: f64) -> Result<()> {
        self.op(|enc| {
            let mut bytes = vec![tagmod::FLOAT | 0x08, 0];
            bytes.extend_from_slice(&value.to_le_bytes());
            enc.push_value(bytes)
        })
    }

    pub fn write_string(&mut self, s: &str) -> Result<()> {
        self.op(|enc| {
            let slot = enc.intern_string(s);
            enc.push_or_root(slot)
        })
    }

    pub fn write_data(&mut self, data: &[u8]) -> Result<()> {
        self.op(|enc| {
            let bytes = encode_length_prefixed(tagmod::DATA, data);
            enc.push_value(bytes)
        })
    }

    /// Opens a new Array as the next value in whatever's currently open (or
    /// as the sole root value, if nothing is). `reserve` is a size hint.
    pub fn begin_array(&mut self, reserve: Option<usize>) -> Result<()> {
        self.op(|enc| {
            if enc.root_value.is_some() {
                return Err(Error::EncodeError("top-level value already written"));
            }
            enc.stack.push(Frame::Array(ArrayFrame {
                values: Vec::with_capacity(reserve.unwrap_or(0)),
            }));
            Ok(())
        })
    }

    pub fn end_array(&mut self) -> Result<()> {
        self.op(|enc| {
            let frame = match enc.stack.pop() {
                Some(Frame::Array(a)) => a,
                Some(other) => {
                    enc.stack.push(other);
                    return Err(Error::EncodeError(
                        "end_array called without a matching begin_array",
                    ));
                }
                None => {
                    return Err(Error::EncodeError(
                        "end_array called without a matching begin_array",
                    ))
                }
            };
            let slot = enc.write_array_container(frame.values)?;
            enc.push_or_root(slot)
        })
    }

    /// Opens a new Dict, symmetric to [`Encoder::begin_array`].
    pub fn begin_dict(&mut self, reserve: Option<usize>) -> Result<()> {
        self.op(|enc| {
            if enc.root_value.is_some() {
                return Err(Error::EncodeError("top-level value already written"));
            }
            enc.stack.push(Frame::Dict(DictFrame {
                entries: Vec::with_capacity(reserve.unwrap_or(0)),
                pending_key: None,
            }));
            Ok(())
        })
    }

    /// Writes the key half of the next entry in the innermost open Dict.
    /// Must be followed by exactly one value write before the next
    /// `write_key` or `end_dict`.
    pub fn write_key(&mut self, key: &str) -> Result<()> {
        self.op(|enc| {
            match enc.stack.last() {
                Some(Frame::Dict(d)) => {
                    if d.pending_key.is_some() {
                        return Err(Error::EncodeError(
                            "write_key called before writing the previous key's value",
                        ));
                    }
                }
                _ => return Err(Error::EncodeError("write_key called without an open dict")),
            }
            let (key_sort, slot) = match enc
                .shared_keys
                .as_mut()
                .and_then(|sk| sk.encode(key, true))
            {
                Some(id) => (
                    KeySort::Int(i64::from(id)),
                    Slot::Inline(encode_short(i64::from(id))),
                ),
                None => (KeySort::Str(key.to_string()), enc.intern_string(key)),
            };
            if let Some(Frame::Dict(d)) = enc.stack.last_mut() {
                d.pending_key = Some((key_sort, slot));
            }
            Ok(())
        })
    }

    pub fn end_dict(&mut self) -> Result<()> {
        self.op(|enc| {
            let mut frame = match enc.stack.pop() {
                Some(Frame::Dict(d)) => d,
                Some(other) => {
                    enc.stack.push(other);
                    return Err(Error::EncodeError(
                        "end_dict called without a matching begin_dict",
                    ));
                }
                None => {
                    return Err(Error::EncodeError(
                        "end_dict called without a matching begin_dict",
                    ))
                }
            };
            if frame.pending_key.is_some() {
                return Err(Error::EncodeError(
                    "end_dict called with a key waiting for its value",
                ));
            }
            frame
                .entries
                .sort_by(|a, b| dict_entry_cmp(&a.key_sort, &b.key_sort));
            let count = frame.entries.len();
            let mut flat = Vec::with_capacity(count * 2);
            for e in frame.entries {
                flat.push(e.key_slot);
                flat.push(e.value_slot);
            }
            let slot = enc.write_dict_container(flat, count)?;
            enc.push_or_root(slot)
        })
    }

    /// Pushes a pointer to `base_offset` (an offset within the amended-
    /// against base document) as the next value. Used by the mutable tree
    /// (§4.7) to re-emit an unchanged subtree as a plain back-reference
    /// rather than copying its bytes.
    pub fn write_base_ref(&mut self, base_offset: usize) -> Result<()> {
        self.op(|enc| {
            if enc.base_len == 0 {
                return Err(Error::EncodeError(
                    "write_base_ref called on a non-amending encoder",
                ));
            }
            enc.push_or_root(Slot::BaseRef(base_offset as u32))
        })
    }

    /// Recursively re-emits an already-decoded [`Value`] (from any
    /// document) as the next value in this encoder, recursing into
    /// Array/Dict contents. `source_shared_keys` resolves SharedKeys
    /// integer keys in `value`'s own document -- generally
    /// `value`'s originating `Doc::shared_keys()`, which may differ from
    /// this encoder's own registry.
    pub fn write_raw_value<'a>(
        &mut self,
        value: &Value<'a>,
        source_shared_keys: Option<&'a SharedKeys>,
    ) -> Result<()> {
        match value.value_type() {
            ValueType::Undefined => self.write_undefined(),
            ValueType::Null => self.write_null(),
            ValueType::Bool => self.write_bool(value.to_bool()),
            ValueType::Int => self.write_i64(value.to_i64()),
            ValueType::UInt => self.write_u64(value.to_u64()),
            ValueType::Float32 => self.write_f32(value.to_f32()),
            ValueType::Float64 => self.write_f64(value.to_f64()),
            ValueType::String => self.write_string(value.to_str()),
            ValueType::Data => self.write_data(value.to_data()),
            ValueType::Array => {
                let arr = value.as_array().expect("value_type() reported Array");
                self.begin_array(Some(arr.len()))?;
                for item in arr.iter() {
                    self.write_raw_value(&item, source_shared_keys)?;
                }
                self.end_array()
            }
            ValueType::Dict => {
                let dict = value.as_dict().expect("value_type() reported Dict");
                let pairs: Vec<(&'a str, Value<'a>)> =
                    dict.iter_with_keys(source_shared_keys).collect();
                self.begin_dict(Some(dict.len()))?;
                for (k, v) in pairs {
                    self.write_key(k)?;
                    self.write_raw_value(&v, source_shared_keys)?;
                }
                self.end_dict()
            }
        }
    }

    /// Closes the document: writes the 2-byte root trailer and returns the
    /// finished buffer. Errors if any collection is still open, no value
    /// was ever written, or the encoder was already poisoned.
    pub fn finish(mut self) -> Result<AllocSlice> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        if !self.stack.is_empty() {
            return Err(Error::EncodeError("finish called with an open array or dict"));
        }
        let root = self
            .root_value
            .take()
            .ok_or(Error::EncodeError("finish called before any value was written"))?;
        self.write_root_trailer(root)?;
        Ok(AllocSlice::from(self.out))
    }

    fn push_or_root(&mut self, slot: Slot) -> Result<()> {
        match self.stack.last_mut() {
            Some(Frame::Array(a)) => {
                a.values.push(slot);
                Ok(())
            }
            Some(Frame::Dict(d)) => match d.pending_key.take() {
                Some((key_sort, key_slot)) => {
                    d.entries.push(DictEntry {
                        key_sort,
                        key_slot,
                        value_slot: slot,
                    });
                    Ok(())
                }
                None => Err(Error::EncodeError(
                    "dict value written without a preceding key",
                )),
            },
            None => {
                if self.root_value.is_some() {
                    return Err(Error::EncodeError("top-level value already written"));
                }
                self.root_value = Some(slot);
                Ok(())
            }
        }
    }

    fn push_value(&mut self, bytes: Vec<u8>) -> Result<()> {
        let slot = if bytes.len() == 2 {
            Slot::Inline([bytes[0], bytes[1]])
        } else {
            let offset = self.out.len() as u32;
            self.out.extend_from_slice(&bytes);
            Slot::Ptr(offset)
        };
        self.push_or_root(slot)
    }

    fn intern_string(&mut self, s: &str) -> Slot {
        let bytes = encode_length_prefixed(tagmod::STRING, s.as_bytes());
        if bytes.len() == 2 {
            return Slot::Inline([bytes[0], bytes[1]]);
        }
        if self.options.unique_strings {
            if let Some(&offset) = self.unique_strings.get(s) {
                return Slot::Ptr(offset);
            }
        }
        let offset = self.out.len() as u32;
        self.out.extend_from_slice(&bytes);
        if self.options.unique_strings {
            self.unique_strings.insert(s.to_string(), offset);
        }
        Slot::Ptr(offset)
    }

    fn base_ref_distance(&self, base_offset: u32, slot_offset: u32) -> u32 {
        if self.extern_pointers {
            self.base_len as u32 - base_offset
        } else {
            (self.base_len as u32 + slot_offset) - base_offset
        }
    }

    /// Scans `slots` as if laid out narrowly (2 bytes each) starting right
    /// after a 2-byte header at `header_offset`, and reports whether any
    /// contained pointer would overflow a narrow slot -- the whole
    /// container must then use 4-byte (wide) slots instead (§3.4).
    fn container_needs_wide(&self, header_offset: usize, slots: &[Slot]) -> bool {
        for (i, slot) in slots.iter().enumerate() {
            let slot_offset = (header_offset + 2 + i * 2) as u32;
            let distance = match slot {
                Slot::Ptr(target) => Some(slot_offset - target),
                Slot::BaseRef(base_offset) => Some(self.base_ref_distance(*base_offset, slot_offset)),
                Slot::Inline(_) => None,
            };
            if let Some(d) = distance {
                if d > pointer::MAX_NARROW_DISTANCE {
                    return true;
                }
            }
        }
        false
    }

    fn write_container_header(&mut self, tag_byte: u8, count: u16, wide: bool) {
        let mut header0 = tag_byte | ((count >> 8) as u8 & 0x07);
        if wide {
            header0 |= extra_flags::WIDE;
        }
        self.out.push(header0);
        self.out.push(count as u8);
    }

    fn write_container_slots(&mut self, header_offset: usize, slots: &[Slot], wide: bool) {
        let width = if wide { 4 } else { 2 };
        for (i, slot) in slots.iter().enumerate() {
            let slot_offset = (header_offset + 2 + i * width) as u32;
            match slot {
                Slot::Inline(bytes) => {
                    self.out.push(bytes[0]);
                    self.out.push(bytes[1]);
                    if wide {
                        self.out.push(0);
                        self.out.push(0);
                    }
                }
                Slot::Ptr(target) => {
                    let distance = slot_offset - target;
                    self.write_pointer_bytes(distance, false, wide);
                }
                Slot::BaseRef(base_offset) => {
                    let distance = self.base_ref_distance(*base_offset, slot_offset);
                    self.write_pointer_bytes(distance, self.extern_pointers, wide);
                }
            }
        }
    }

    fn write_pointer_bytes(&mut self, distance: u32, is_extern: bool, wide: bool) {
        if wide {
            let bytes = pointer::encode_wide(distance, is_extern)
                .expect("pointer distance fits a wide slot (checked by container_needs_wide)");
            self.out.extend_from_slice(&bytes);
        } else {
            let bytes = pointer::encode_narrow(distance, is_extern)
                .expect("pointer distance fits a narrow slot (checked by container_needs_wide)");
            self.out.extend_from_slice(&bytes);
        }
    }

    fn write_array_container(&mut self, values: Vec<Slot>) -> Result<Slot> {
        if values.len() > MAX_INLINE_COUNT {
            return Err(Error::EncodeError(
                "array exceeds maximum inline element count (2047)",
            ));
        }
        let header_offset = self.out.len();
        let wide = self.container_needs_wide(header_offset, &values);
        self.write_container_header(tagmod::ARRAY, values.len() as u16, wide);
        self.write_container_slots(header_offset, &values, wide);
        Ok(Slot::Ptr(header_offset as u32))
    }

    fn write_dict_container(&mut self, slots: Vec<Slot>, pair_count: usize) -> Result<Slot> {
        if pair_count > MAX_INLINE_COUNT {
            return Err(Error::EncodeError(
                "dict exceeds maximum inline entry count (2047)",
            ));
        }
        let header_offset = self.out.len();
        let wide = self.container_needs_wide(header_offset, &slots);
        self.write_container_header(tagmod::DICT, pair_count as u16, wide);
        self.write_container_slots(header_offset, &slots, wide);
        Ok(Slot::Ptr(header_offset as u32))
    }

    fn write_root_trailer(&mut self, slot: Slot) -> Result<()> {
        match slot {
            Slot::Inline(bytes) => {
                self.out.extend_from_slice(&bytes);
                Ok(())
            }
            Slot::Ptr(target) => {
                let trailer_offset = self.out.len() as u32;
                let distance = trailer_offset - target;
                if let Some(bytes) = pointer::encode_narrow(distance, false) {
                    self.out.extend_from_slice(&bytes);
                    return Ok(());
                }
                // The top-level value sits too far back for a narrow
                // trailer: write a wide indirection pointer, then a narrow
                // (always fits, distance 4) pointer to *that*.
                let wide_offset = self.out.len() as u32;
                let wide_distance = wide_offset - target;
                let wide_bytes = pointer::encode_wide(wide_distance, false)
                    .ok_or(Error::EncodeError("root value offset too large to address"))?;
                self.out.extend_from_slice(&wide_bytes);
                let narrow_bytes = pointer::encode_narrow(4, false)
                    .expect("distance of 4 always fits a narrow pointer");
                self.out.extend_from_slice(&narrow_bytes);
                Ok(())
            }
            Slot::BaseRef(base_offset) => {
                let trailer_offset = self.out.len() as u32;
                let distance = self.base_ref_distance(base_offset, trailer_offset);
                if let Some(bytes) = pointer::encode_narrow(distance, self.extern_pointers) {
                    self.out.extend_from_slice(&bytes);
                    return Ok(());
                }
                let wide_bytes = pointer::encode_wide(distance, self.extern_pointers)
                    .ok_or(Error::EncodeError("root base reference too large to address"))?;
                self.out.extend_from_slice(&wide_bytes);
                let narrow_bytes = pointer::encode_narrow(4, false)
                    .expect("distance of 4 always fits a narrow pointer");
                self.out.extend_from_slice(&narrow_bytes);
                Ok(())
            }
        }
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

fn dict_entry_cmp(a: &KeySort, b: &KeySort) -> Ordering {
    match (a, b) {
        (KeySort::Int(x), KeySort::Int(y)) => x.cmp(y),
        (KeySort::Int(_), KeySort::Str(_)) => Ordering::Less,
        (KeySort::Str(_), KeySort::Int(_)) => Ordering::Greater,
        (KeySort::Str(x), KeySort::Str(y)) => x.cmp(y),
    }
}

fn encode_short(v: i64) -> [u8; 2] {
    let raw = (v as u16) & 0x0FFF;
    [tagmod::SHORT | ((raw >> 8) as u8 & 0x0F), raw as u8]
}

fn minimal_signed_byte_count(v: i64) -> usize {
    for n in 1..8 {
        let bits = (n * 8) as u32;
        let min = -(1i64 << (bits - 1));
        let max = (1i64 << (bits - 1)) - 1;
        if v >= min && v <= max {
            return n;
        }
    }
    8
}

fn minimal_unsigned_byte_count(v: u64) -> usize {
    for n in 1..8 {
        let bits = (n * 8) as u32;
        if v <= (1u64 << bits) - 1 {
            return n;
        }
    }
    8
}

/// Builds a minimal-width `Int`/`UInt` payload: tag byte, a second byte
/// encoding `byte_count - 1` plus the unsigned flag, then 1-8 little-endian
/// payload bytes, padded to even length.
fn encode_int_bytes(v: i64, unsigned: bool) -> Vec<u8> {
    let raw = v as u64;
    let count = if unsigned {
        minimal_unsigned_byte_count(raw)
    } else {
        minimal_signed_byte_count(v)
    };
    let mut second = (count as u8 - 1) & 0x07;
    if unsigned {
        second |= extra_flags::UNSIGNED_INT;
    }
    let mut out = vec![tagmod::INT, second];
    for i in 0..count {
        out.push((raw >> (8 * i)) as u8);
    }
    if out.len() % 2 != 0 {
        out.push(0);
    }
    out
}

/// Builds a length-prefixed String/Data payload: direct length in the low
/// nibble for `payload.len() <= 14`, else a varint length prefix after the
/// `0x0F` long-form marker. Padded to even length.
fn encode_length_prefixed(tag_byte: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 3);
    if payload.len() < tag::LONG_FORM_MARKER as usize {
        out.push(tag_byte | payload.len() as u8);
    } else {
        out.push(tag_byte | tag::LONG_FORM_MARKER);
        tag::write_varint(payload.len() as u64, &mut out);
    }
    out.extend_from_slice(payload);
    if out.len() % 2 != 0 {
        out.push(0);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn root_scalar_round_trips() {
        let mut enc = Encoder::new();
        enc.write_i64(1000).unwrap();
        let bytes = enc.finish().unwrap().to_vec();
        let root = Value::from_bytes_trusted(&bytes);
        assert_eq!(root.to_i64(), 1000);
    }

    #[test]
    fn negative_and_large_integers_round_trip() {
        let mut enc = Encoder::new();
        enc.begin_array(None).unwrap();
        enc.write_i64(-2048).unwrap();
        enc.write_i64(2047).unwrap();
        enc.write_i64(-1_000_000_000_000).unwrap();
        enc.write_u64(u64::MAX).unwrap();
        enc.end_array().unwrap();
        let bytes = enc.finish().unwrap().to_vec();
        let root = Value::from_bytes_trusted(&bytes);
        let arr = root.as_array().unwrap();
        assert_eq!(arr.get(0).to_i64(), -2048);
        assert_eq!(arr.get(1).to_i64(), 2047);
        assert_eq!(arr.get(2).to_i64(), -1_000_000_000_000);
        assert_eq!(arr.get(3).to_u64(), u64::MAX);
    }

    #[test]
    fn floats_round_trip() {
        let mut enc = Encoder::new();
        enc.begin_array(None).unwrap();
        enc.write_f32(1.5).unwrap();
        enc.write_f64(std::f64::consts::PI).unwrap();
        enc.end_array().unwrap();
        let bytes = enc.finish().unwrap().to_vec();
        let root = Value::from_bytes_trusted(&bytes);
        let arr = root.as_array().unwrap();
        assert_eq!(arr.get(0).to_f32(), 1.5);
        assert_eq!(arr.get(1).to_f64(), std::f64::consts::PI);
    }

    #[test]
    fn strings_and_data_round_trip() {
        let mut enc = Encoder::new();
        enc.begin_array(None).unwrap();
        enc.write_string("").unwrap();
        enc.write_string("a").unwrap();
        enc.write_string("a rather longer string than fourteen bytes").unwrap();
        enc.write_data(&[1, 2, 3, 4, 5]).unwrap();
        enc.end_array().unwrap();
        let bytes = enc.finish().unwrap().to_vec();
        let root = Value::from_bytes_trusted(&bytes);
        let arr = root.as_array().unwrap();
        assert_eq!(arr.get(0).to_str(), "");
        assert_eq!(arr.get(1).to_str(), "a");
        assert_eq!(arr.get(2).to_str(), "a rather longer string than fourteen bytes");
        assert_eq!(arr.get(3).to_data(), &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn dict_entries_come_back_sorted_with_ints_before_strings() {
        let mut enc = Encoder::new();
        enc.begin_dict(None).unwrap();
        enc.write_key("zebra").unwrap();
        enc.write_i64(1).unwrap();
        enc.write_key("apple").unwrap();
        enc.write_i64(2).unwrap();
        enc.end_dict().unwrap();
        let bytes = enc.finish().unwrap().to_vec();
        let root = Value::from_bytes_trusted(&bytes);
        let dict = root.as_dict().unwrap();
        let keys: Vec<&str> = dict.iter_with_keys(None).map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["apple", "zebra"]);
        assert_eq!(dict.get("apple", None).to_i64(), 2);
    }

    #[test]
    fn shared_keys_encode_dict_keys_as_short_ints() {
        let sk = SharedKeys::new();
        let mut enc = Encoder::new().with_shared_keys(sk);
        enc.begin_dict(None).unwrap();
        enc.write_key("name").unwrap();
        enc.write_string("Alice").unwrap();
        enc.end_dict().unwrap();
        let shared_keys = enc.shared_keys().cloned().unwrap();
        let bytes = enc.finish().unwrap().to_vec();
        let root = Value::from_bytes_trusted(&bytes);
        let dict = root.as_dict().unwrap();
        assert_eq!(dict.get("name", Some(&shared_keys)).to_str(), "Alice");
    }

    #[test]
    fn wide_promotion_kicks_in_for_far_backward_pointers() {
        let mut enc = Encoder::new();
        enc.begin_array(None).unwrap();
        // Write enough bulky out-of-line strings that the first element's
        // pointer distance exceeds a narrow pointer's 0x3FFE byte range.
        enc.write_string("first, referenced from very far away").unwrap();
        for i in 0..2000 {
            enc.write_string(&format!("padding value number {i}")).unwrap();
        }
        enc.end_array().unwrap();
        let bytes = enc.finish().unwrap().to_vec();
        let root = Value::from_bytes_trusted(&bytes);
        let arr = root.as_array().unwrap();
        assert_eq!(arr.get(0).to_str(), "first, referenced from very far away");
        assert_eq!(arr.len(), 2001);
    }

    #[test]
    fn nested_arrays_and_dicts_round_trip() {
        let mut enc = Encoder::new();
        enc.begin_dict(None).unwrap();
        enc.write_key("items").unwrap();
        enc.begin_array(None).unwrap();
        enc.begin_dict(None).unwrap();
        enc.write_key("id").unwrap();
        enc.write_i64(1).unwrap();
        enc.end_dict().unwrap();
        enc.begin_dict(None).unwrap();
        enc.write_key("id").unwrap();
        enc.write_i64(2).unwrap();
        enc.end_dict().unwrap();
        enc.end_array().unwrap();
        enc.end_dict().unwrap();
        let bytes = enc.finish().unwrap().to_vec();
        let root = Value::from_bytes_trusted(&bytes);
        let items = root.as_dict().unwrap().get("items", None).as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items.get(0).as_dict().unwrap().get("id", None).to_i64(), 1);
        assert_eq!(items.get(1).as_dict().unwrap().get("id", None).to_i64(), 2);
    }

    #[test]
    fn unmatched_end_array_is_an_error() {
        let mut enc = Encoder::new();
        assert!(enc.end_array().is_err());
    }

    #[test]
    fn dict_value_without_key_is_rejected() {
        let mut enc = Encoder::new();
        enc.begin_dict(None).unwrap();
        assert!(enc.write_i64(1).is_err());
    }

    #[test]
    fn errors_latch_until_finish() {
        let mut enc = Encoder::new();
        assert!(enc.end_dict().is_err());
        // Every subsequent call sees the same latched error.
        assert!(enc.write_i64(1).is_err());
        assert!(enc.finish().is_err());
    }

    #[test]
    fn write_raw_value_copies_an_existing_tree() {
        let mut src = Encoder::new();
        src.begin_dict(None).unwrap();
        src.write_key("a").unwrap();
        src.write_i64(1).unwrap();
        src.write_key("b").unwrap();
        src.begin_array(None).unwrap();
        src.write_string("x").unwrap();
        src.end_array().unwrap();
        src.end_dict().unwrap();
        let src_bytes = src.finish().unwrap().to_vec();
        let src_root = Value::from_bytes_trusted(&src_bytes);

        let mut dst = Encoder::new();
        dst.write_raw_value(&src_root, None).unwrap();
        let dst_bytes = dst.finish().unwrap().to_vec();
        let dst_root = Value::from_bytes_trusted(&dst_bytes);

        assert_eq!(dst_root.as_dict().unwrap().get("a", None).to_i64(), 1);
        let inner = dst_root.as_dict().unwrap().get("b", None).as_array().unwrap();
        assert_eq!(inner.get(0).to_str(), "x");
    }

    #[test]
    fn amending_encoder_addresses_back_into_a_concatenated_base() {
        let mut base_enc = Encoder::new();
        base_enc.begin_array(None).unwrap();
        base_enc.write_string("shared").unwrap();
        base_enc.end_array().unwrap();
        let base_bytes = base_enc.finish().unwrap().to_vec();

        let mut amend = Encoder::new_amending(base_bytes.len());
        // Locate the array's header offset within `base_bytes`: its root is
        // a trailer pointer at the very end.
        let base_root = Value::from_bytes_trusted(&base_bytes);
        let base_array_offset = base_root.offset();
        amend.begin_array(None).unwrap();
        amend.write_base_ref(base_array_offset).unwrap();
        amend.end_array().unwrap();
        let amended_bytes = amend.finish().unwrap().to_vec();

        let mut full = base_bytes.clone();
        full.extend_from_slice(&amended_bytes);
        let root = Value::from_bytes_trusted(&full);
        let outer = root.as_array().unwrap();
        let inner = outer.get(0).as_array().unwrap();
        assert_eq!(inner.get(0).to_str(), "shared");
    }
}
