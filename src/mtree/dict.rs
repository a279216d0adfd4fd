//
// Copyright 2020 Fleece Developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//

//! Mutable dict overlay (§4.7 "MDict"): an immutable base plus a
//! `key -> override` map, where an override of `Undefined` records a
//! deletion. A read from the base is cached into the map (so a caller
//! holding onto the returned handle sees it stay stable across further
//! edits elsewhere in the dict), and `count` is kept up to date incrementally
//! rather than recomputed by scanning.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::encoder::Encoder;
use crate::error::Result;
use crate::shared_keys::SharedKeys;
use crate::value::{Dict, ValueType};

use super::{MValue, ParentHandle};

pub(crate) struct Inner<'a> {
    base: Option<Dict<'a>>,
    overrides: HashMap<String, Option<MValue<'a>>>,
    count: usize,
    dirty: bool,
    parent: Option<ParentHandle<'a>>,
}

/// See `array::mark_dirty_and_propagate`.
pub(crate) fn mark_dirty_and_propagate<'a>(rc: &Rc<RefCell<Inner<'a>>>) {
    let parent = {
        let mut inner = rc.borrow_mut();
        if inner.dirty {
            return;
        }
        inner.dirty = true;
        inner.parent.clone()
    };
    if let Some(p) = parent {
        p.mark_dirty();
    }
}

/// A mutable dict. Cloning an `MDict` is cheap and shares the same
/// underlying node.
#[derive(Clone)]
pub struct MDict<'a>(Rc<RefCell<Inner<'a>>>);

impl<'a> MDict<'a> {
    /// A brand-new, empty, unbacked dict.
    pub fn new() -> Self {
        MDict(Rc::new(RefCell::new(Inner {
            base: None,
            overrides: HashMap::new(),
            count: 0,
            dirty: false,
            parent: None,
        })))
    }

    /// A dict overlaying an existing immutable dict, initially clean.
    pub fn from_dict(base: Dict<'a>) -> Self {
        let count = base.len();
        MDict(Rc::new(RefCell::new(Inner {
            base: Some(base),
            overrides: HashMap::new(),
            count,
            dirty: false,
            parent: None,
        })))
    }

    pub(crate) fn weak_handle(&self) -> ParentHandle<'a> {
        ParentHandle::Dict(Rc::downgrade(&self.0))
    }

    pub(crate) fn set_parent(&self, parent: ParentHandle<'a>) {
        self.0.borrow_mut().parent = Some(parent);
    }

    fn mark_dirty(&self) {
        mark_dirty_and_propagate(&self.0);
    }

    pub fn count(&self) -> usize {
        self.0.borrow().count
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub fn is_dirty(&self) -> bool {
        self.0.borrow().dirty
    }

    /// Ensures `overrides` has an entry for `key`, pulling the value from
    /// `base` on first touch. A key absent from both the overrides and the
    /// base is left with no entry at all.
    fn ensure_slot(&self, key: &str, shared_keys: Option<&'a SharedKeys>) {
        let mut inner = self.0.borrow_mut();
        if inner.overrides.contains_key(key) {
            return;
        }
        let base = match inner.base {
            Some(base) => base,
            None => return,
        };
        let value = base.get(key, shared_keys);
        if value.value_type() == ValueType::Undefined {
            return;
        }
        inner
            .overrides
            .insert(key.to_string(), Some(MValue::Immutable(value)));
    }

    pub fn contains_key(&self, key: &str, shared_keys: Option<&'a SharedKeys>) -> bool {
        self.ensure_slot(key, shared_keys);
        matches!(self.0.borrow().overrides.get(key), Some(Some(_)))
    }

    /// The value for `key`, or `Undefined` if absent or deleted.
    pub fn get(&self, key: &str, shared_keys: Option<&'a SharedKeys>) -> MValue<'a> {
        self.ensure_slot(key, shared_keys);
        self.0
            .borrow()
            .overrides
            .get(key)
            .and_then(|slot| slot.clone())
            .unwrap_or_else(MValue::undefined)
    }

    /// Materializes `key` as a mutable array, if it holds one, caching the
    /// result so repeated calls return the same handle.
    pub fn get_mutable_array(
        &self,
        key: &str,
        shared_keys: Option<&'a SharedKeys>,
    ) -> Option<super::MArray<'a>> {
        self.ensure_slot(key, shared_keys);
        let child = {
            let mut inner = self.0.borrow_mut();
            inner
                .overrides
                .get_mut(key)
                .and_then(|slot| slot.as_mut())
                .and_then(|mv| mv.as_mutable_array())
        };
        if let Some(child) = &child {
            child.set_parent(self.weak_handle());
        }
        child
    }

    /// As [`MDict::get_mutable_array`], for dicts.
    pub fn get_mutable_dict(
        &self,
        key: &str,
        shared_keys: Option<&'a SharedKeys>,
    ) -> Option<MDict<'a>> {
        self.ensure_slot(key, shared_keys);
        let child = {
            let mut inner = self.0.borrow_mut();
            inner
                .overrides
                .get_mut(key)
                .and_then(|slot| slot.as_mut())
                .and_then(|mv| mv.as_mutable_dict())
        };
        if let Some(child) = &child {
            child.set_parent(self.weak_handle());
        }
        child
    }

    /// Stores `value` for `key`, adjusting `count` eagerly so it stays O(1).
    pub fn set(&self, key: &str, value: MValue<'a>, shared_keys: Option<&'a SharedKeys>) {
        self.ensure_slot(key, shared_keys);
        {
            let mut inner = self.0.borrow_mut();
            let was_present = matches!(inner.overrides.get(key), Some(Some(_)));
            let is_present = !value.is_undefined();
            if was_present && !is_present {
                inner.count -= 1;
            } else if !was_present && is_present {
                inner.count += 1;
            }
            let slot = if is_present {
                Some(value)
            } else {
                Some(MValue::undefined())
            };
            inner.overrides.insert(key.to_string(), slot);
        }
        self.mark_dirty();
    }

    pub fn remove(&self, key: &str, shared_keys: Option<&'a SharedKeys>) {
        self.set(key, MValue::undefined(), shared_keys);
    }

    /// Removes every entry, base-backed or not.
    pub fn clear(&self, shared_keys: Option<&'a SharedKeys>) {
        {
            let mut inner = self.0.borrow_mut();
            if inner.count == 0 {
                return;
            }
            inner.overrides.clear();
            let base = inner.base;
            if let Some(base) = base {
                for (k, _) in base.iter_with_keys(shared_keys) {
                    inner.overrides.insert(k.to_string(), None);
                }
            }
            inner.count = 0;
        }
        self.mark_dirty();
    }

    /// Writes this dict to `enc`: a clean node copies its backing bytes (or,
    /// when `enc` is amending the same base document, a back-pointer to
    /// them); a dirty node re-emits, writing overridden keys first and then
    /// any base entries untouched by an override (the encoder itself sorts
    /// at `end_dict`, so emission order here doesn't matter).
    pub fn encode_to(&self, enc: &mut Encoder, shared_keys: Option<&'a SharedKeys>) -> Result<()> {
        let inner = self.0.borrow();
        if !inner.dirty {
            return match inner.base {
                Some(base) if enc.is_amending() => enc.write_base_ref(base.value().offset()),
                Some(base) => enc.write_raw_value(&base.value(), shared_keys),
                None => {
                    enc.begin_dict(Some(0))?;
                    enc.end_dict()
                }
            };
        }
        enc.begin_dict(Some(inner.count))?;
        for (k, v) in inner.overrides.iter() {
            if let Some(v) = v {
                enc.write_key(k)?;
                v.encode_to(enc, shared_keys)?;
            }
        }
        if let Some(base) = inner.base {
            for (k, v) in base.iter_with_keys(shared_keys) {
                if inner.overrides.contains_key(k) {
                    continue;
                }
                enc.write_key(k)?;
                enc.write_raw_value(&v, shared_keys)?;
            }
        }
        enc.end_dict()
    }
}

impl<'a> Default for MDict<'a> {
    fn default() -> Self {
        MDict::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::Encoder;
    use crate::value::Value;

    fn encode_dict(bytes: &[u8]) -> Dict<'_> {
        Value::from_bytes_trusted(bytes)
            .as_dict()
            .expect("encoded a dict")
    }

    #[test]
    fn clean_dict_re_encodes_identically() {
        let mut src = Encoder::new();
        src.begin_dict(Some(2)).unwrap();
        src.write_key("a").unwrap();
        src.write_i64(1).unwrap();
        src.write_key("b").unwrap();
        src.write_i64(2).unwrap();
        src.end_dict().unwrap();
        let base_bytes = src.finish().unwrap().to_vec();
        let base = encode_dict(&base_bytes);

        let mdict = MDict::from_dict(base);
        assert!(!mdict.is_dirty());
        let mut enc = Encoder::new();
        mdict.encode_to(&mut enc, None).unwrap();
        let out = enc.finish().unwrap().to_vec();
        let dict = Value::from_bytes_trusted(&out).as_dict().unwrap();
        assert_eq!(dict.get("a", None).to_i64(), 1);
        assert_eq!(dict.get("b", None).to_i64(), 2);
    }

    #[test]
    fn set_and_remove_track_count_and_survive_encode() {
        let mut src = Encoder::new();
        src.begin_dict(Some(2)).unwrap();
        src.write_key("a").unwrap();
        src.write_i64(1).unwrap();
        src.write_key("b").unwrap();
        src.write_i64(2).unwrap();
        src.end_dict().unwrap();
        let base_bytes = src.finish().unwrap().to_vec();
        let base = encode_dict(&base_bytes);

        let mdict = MDict::from_dict(base);
        mdict.set("c", MValue::from(3i64), None);
        assert_eq!(mdict.count(), 3);
        mdict.remove("a", None);
        assert_eq!(mdict.count(), 2);

        let mut enc = Encoder::new();
        mdict.encode_to(&mut enc, None).unwrap();
        let out = enc.finish().unwrap().to_vec();
        let dict = Value::from_bytes_trusted(&out).as_dict().unwrap();
        assert_eq!(dict.len(), 2);
        assert!(dict.get("a", None).value_type() == ValueType::Undefined);
        assert_eq!(dict.get("b", None).to_i64(), 2);
        assert_eq!(dict.get("c", None).to_i64(), 3);
    }

    #[test]
    fn nested_mutable_dict_stays_the_same_handle() {
        let mut src = Encoder::new();
        src.begin_dict(Some(1)).unwrap();
        src.write_key("inner").unwrap();
        src.begin_dict(Some(1)).unwrap();
        src.write_key("x").unwrap();
        src.write_i64(1).unwrap();
        src.end_dict().unwrap();
        src.end_dict().unwrap();
        let base_bytes = src.finish().unwrap().to_vec();
        let base = encode_dict(&base_bytes);

        let mdict = MDict::from_dict(base);
        let inner1 = mdict.get_mutable_dict("inner", None).unwrap();
        inner1.set("y", MValue::from(2i64), None);
        let inner2 = mdict.get_mutable_dict("inner", None).unwrap();
        assert_eq!(inner2.count(), 2);
        assert!(mdict.is_dirty());
    }
}
