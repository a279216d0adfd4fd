//
// Copyright 2020 Fleece Developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//

use std::cmp::Ordering;

use super::tag::tag as tagmod;
use super::Value;
use crate::shared_keys::SharedKeys;

/// A read-only view of an encoded Dict. Slots are `(key, value)` pairs kept
/// sorted: SharedKeys integer keys first (numeric order), then string keys
/// (lexicographic order) — see [`Value::dict_key_cmp`].
#[derive(Clone, Copy)]
pub struct Dict<'a> {
    value: Value<'a>,
    count: u32,
    wide: bool,
}

impl<'a> Dict<'a> {
    pub(crate) fn new(value: Value<'a>) -> Dict<'a> {
        let (count, wide) = value.container_header();
        Dict { value, count, wide }
    }

    pub fn len(&self) -> usize {
        self.count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn slot_width(&self) -> usize {
        if self.wide {
            4
        } else {
            2
        }
    }

    fn slot_at(&self, pair_index: usize, which: usize) -> Value<'a> {
        let base = self.value.container_first_slot_offset()
            + (pair_index * 2 + which) * self.slot_width();
        let data = self.value.doc_bytes();
        let slot = Value::at(data, base, self.value.extern_bytes());
        if self.wide {
            slot.deref_pointer_wide_or_self()
        } else {
            slot
        }
    }

    fn key_at(&self, i: usize) -> Value<'a> {
        self.slot_at(i, 0)
    }

    fn value_at(&self, i: usize) -> Value<'a> {
        self.slot_at(i, 1)
    }

    fn is_int_key(&self, i: usize) -> bool {
        let k = self.key_at(i).deref_pointer();
        tagmod::of(k.raw_header()) == tagmod::SHORT
    }

    /// Index one past the last SharedKeys-integer-keyed entry; entries before
    /// it are integer-keyed (ascending), entries from it onward are
    /// string-keyed (ascending).
    fn int_string_boundary(&self) -> usize {
        let (mut lo, mut hi) = (0usize, self.count as usize);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.is_int_key(mid) {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// Binary search over `[lo, hi)`, comparing the key at each candidate
    /// index against `target` via `cmp`. Avoids materializing the index
    /// range, unlike `(lo..hi).collect::<Vec<_>>().binary_search_by(..)`.
    fn binary_search_range(
        &self,
        lo: usize,
        hi: usize,
        mut cmp: impl FnMut(usize) -> Ordering,
    ) -> Option<usize> {
        let (mut lo, mut hi) = (lo, hi);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match cmp(mid) {
                Ordering::Equal => return Some(mid),
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid,
            }
        }
        None
    }

    /// Binary-searches for `key`, consulting `shared_keys` (if given) to
    /// check the integer-keyed partition first, then falling back to the
    /// string-keyed partition. Returns `Undefined` if not found, per §4.4.
    pub fn get(&self, key: &str, shared_keys: Option<&'a SharedKeys>) -> Value<'a> {
        let boundary = self.int_string_boundary();
        if let Some(sk) = shared_keys {
            if let Some(id) = sk.encode(key, false) {
                let found = self.binary_search_range(0, boundary, |i| {
                    self.key_at(i).deref_pointer().to_i64().cmp(&i64::from(id))
                });
                return match found {
                    Some(idx) => self.value_at(idx),
                    None => Value::at(&super::tag::constants::UNDEFINED, 0, None),
                };
            }
        }
        let found = self.binary_search_range(boundary, self.count as usize, |i| {
            self.key_at(i).to_str().cmp(key)
        });
        match found {
            Some(idx) => self.value_at(idx),
            None => Value::at(&super::tag::constants::UNDEFINED, 0, None),
        }
    }

    pub fn iter(&self) -> DictIter<'a> {
        DictIter { dict: *self, index: 0 }
    }

    /// Iterates yielding `(key_string, value)`, resolving SharedKeys integer
    /// keys against `shared_keys`.
    pub fn iter_with_keys(&self, shared_keys: Option<&'a SharedKeys>) -> DictKeyIter<'a> {
        DictKeyIter {
            dict: *self,
            shared_keys,
            index: 0,
        }
    }

    /// The underlying container value, e.g. for exposing as a `DeepIterator` parent.
    pub fn value(&self) -> Value<'a> {
        self.value
    }

    /// Positional access to the `i`th pair's resolved key string, for callers
    /// walking by index rather than via `iter_with_keys` (e.g. `DeepIterator`).
    pub(crate) fn key_string_at(&self, i: usize, shared_keys: Option<&'a SharedKeys>) -> &'a str {
        self.key_at(i).key_string(shared_keys)
    }

    /// Positional access to the `i`th pair's value.
    pub(crate) fn value_at_index(&self, i: usize) -> Value<'a> {
        self.value_at(i)
    }
}

impl<'a> Value<'a> {
    pub(crate) fn raw_header(&self) -> u8 {
        self.doc_bytes()[self.byte_offset()]
    }
}

pub struct DictIter<'a> {
    dict: Dict<'a>,
    index: usize,
}

impl<'a> Iterator for DictIter<'a> {
    type Item = (Value<'a>, Value<'a>);

    fn next(&mut self) -> Option<(Value<'a>, Value<'a>)> {
        if self.index >= self.dict.len() {
            return None;
        }
        let pair = (self.dict.key_at(self.index), self.dict.value_at(self.index));
        self.index += 1;
        Some(pair)
    }
}

pub struct DictKeyIter<'a> {
    dict: Dict<'a>,
    shared_keys: Option<&'a SharedKeys>,
    index: usize,
}

impl<'a> Iterator for DictKeyIter<'a> {
    type Item = (&'a str, Value<'a>);

    fn next(&mut self) -> Option<(&'a str, Value<'a>)> {
        if self.index >= self.dict.len() {
            return None;
        }
        let key = self.dict.key_at(self.index).key_string(self.shared_keys);
        let value = self.dict.value_at(self.index);
        self.index += 1;
        Some((key, value))
    }
}

impl<'a> IntoIterator for Dict<'a> {
    type Item = (Value<'a>, Value<'a>);
    type IntoIter = DictIter<'a>;
    fn into_iter(self) -> DictIter<'a> {
        self.iter()
    }
}

/// A cached lookup hint: remembers the last slot index a key was found at,
/// to accelerate repeated lookups of the same key (§4.4).
pub struct DictKeyHint<'a> {
    key: &'a str,
    last_index: std::cell::Cell<Option<usize>>,
}

impl<'a> DictKeyHint<'a> {
    pub fn new(key: &'a str) -> Self {
        DictKeyHint {
            key,
            last_index: std::cell::Cell::new(None),
        }
    }

    pub fn get(&self, dict: &Dict<'a>, shared_keys: Option<&'a SharedKeys>) -> Value<'a> {
        if let Some(idx) = self.last_index.get() {
            if idx < dict.len() {
                let k = dict.key_at(idx).key_string(shared_keys);
                if k == self.key {
                    return dict.value_at(idx);
                }
            }
        }
        let boundary = dict.int_string_boundary();
        let found = (boundary..dict.count as usize)
            .collect::<Vec<_>>()
            .binary_search_by(|&i| dict.key_at(i).to_str().cmp(self.key));
        if let Ok(idx) = found {
            self.last_index.set(Some(idx));
            return dict.value_at(idx);
        }
        Value::at(&super::tag::constants::UNDEFINED, 0, None)
    }
}
