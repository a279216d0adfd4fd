//
// Copyright 2020 Fleece Developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//

//! Mutable array overlay (§4.7 "MArray"): an immutable base plus a parallel
//! vector of slot overrides, the same length as the base. A slot of `None`
//! means "use the underlying immutable element"; `insert`/`remove` first
//! materialize every `None` slot to its underlying value (so indices stay
//! meaningful across the splice) before touching the vector.

use std::cell::RefCell;
use std::rc::Rc;

use crate::encoder::Encoder;
use crate::error::Result;
use crate::shared_keys::SharedKeys;
use crate::value::Array;

use super::{MValue, ParentHandle};

pub(crate) struct Inner<'a> {
    base: Option<Array<'a>>,
    slots: Vec<Option<MValue<'a>>>,
    dirty: bool,
    parent: Option<ParentHandle<'a>>,
}

/// Marks `rc` dirty and, the first time it transitions from clean to dirty,
/// propagates the same mark to its parent -- mirroring `MCollection::mutate`
/// calling `_parent->mutate()`.
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

/// A mutable array. Cloning an `MArray` is cheap and shares the same
/// underlying node -- the same way holding onto an `MCollection*` kept one
/// logical array reachable from multiple places in the original.
#[derive(Clone)]
pub struct MArray<'a>(Rc<RefCell<Inner<'a>>>);

impl<'a> MArray<'a> {
    /// A brand-new, empty, unbacked array.
    pub fn new() -> Self {
        MArray(Rc::new(RefCell::new(Inner {
            base: None,
            slots: Vec::new(),
            dirty: false,
            parent: None,
        })))
    }

    /// An array overlaying an existing immutable array, initially clean.
    pub fn from_array(base: Array<'a>) -> Self {
        let len = base.len();
        MArray(Rc::new(RefCell::new(Inner {
            base: Some(base),
            slots: vec![None; len],
            dirty: false,
            parent: None,
        })))
    }

    pub(crate) fn weak_handle(&self) -> ParentHandle<'a> {
        ParentHandle::Array(Rc::downgrade(&self.0))
    }

    pub(crate) fn set_parent(&self, parent: ParentHandle<'a>) {
        self.0.borrow_mut().parent = Some(parent);
    }

    fn mark_dirty(&self) {
        mark_dirty_and_propagate(&self.0);
    }

    pub fn count(&self) -> usize {
        self.0.borrow().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub fn is_dirty(&self) -> bool {
        self.0.borrow().dirty
    }

    fn base_value(inner: &Inner<'a>, i: usize) -> MValue<'a> {
        match &inner.base {
            Some(arr) => MValue::Immutable(arr.get(i)),
            None => MValue::undefined(),
        }
    }

    /// Ensures `slots[i]` is populated (pulling from `base` on first touch).
    /// Returns `false` if `i` is out of range.
    fn ensure_slot(&self, i: usize) -> bool {
        let mut inner = self.0.borrow_mut();
        if i >= inner.slots.len() {
            return false;
        }
        if inner.slots[i].is_none() {
            let v = Self::base_value(&inner, i);
            inner.slots[i] = Some(v);
        }
        true
    }

    /// The value at index `i`, or `Undefined` if out of range.
    pub fn get(&self, i: usize) -> MValue<'a> {
        if !self.ensure_slot(i) {
            return MValue::undefined();
        }
        let inner = self.0.borrow();
        inner.slots[i].clone().expect("ensure_slot populated this index")
    }

    /// Materializes index `i` as a mutable array, if it holds one, caching
    /// the result so repeated calls return the same handle.
    pub fn get_mutable_array(&self, i: usize) -> Option<MArray<'a>> {
        if !self.ensure_slot(i) {
            return None;
        }
        let child = {
            let mut inner = self.0.borrow_mut();
            inner.slots[i].as_mut().and_then(|mv| mv.as_mutable_array())
        };
        if let Some(child) = &child {
            child.set_parent(self.weak_handle());
        }
        child
    }

    /// As [`MArray::get_mutable_array`], for dicts.
    pub fn get_mutable_dict(&self, i: usize) -> Option<super::MDict<'a>> {
        if !self.ensure_slot(i) {
            return None;
        }
        let child = {
            let mut inner = self.0.borrow_mut();
            inner.slots[i].as_mut().and_then(|mv| mv.as_mutable_dict())
        };
        if let Some(child) = &child {
            child.set_parent(self.weak_handle());
        }
        child
    }

    /// Overwrites index `i`. Returns `false` if out of range.
    pub fn set(&self, i: usize, value: MValue<'a>) -> bool {
        {
            let mut inner = self.0.borrow_mut();
            if i >= inner.slots.len() {
                return false;
            }
            inner.slots[i] = Some(value);
        }
        self.mark_dirty();
        true
    }

    fn populate(inner: &mut Inner<'a>) {
        for i in 0..inner.slots.len() {
            if inner.slots[i].is_none() {
                let v = Self::base_value(inner, i);
                inner.slots[i] = Some(v);
            }
        }
    }

    /// Inserts `value` at index `i`, shifting later elements up. `i` may
    /// equal `count()` (append). Returns `false` if `i` is out of range.
    pub fn insert(&self, i: usize, value: MValue<'a>) -> bool {
        {
            let mut inner = self.0.borrow_mut();
            let count = inner.slots.len();
            if i > count {
                return false;
            }
            if i < count {
                Self::populate(&mut inner);
            }
            inner.slots.insert(i, Some(value));
        }
        self.mark_dirty();
        true
    }

    pub fn append(&self, value: MValue<'a>) -> bool {
        self.insert(self.count(), value)
    }

    /// Removes `n` values starting at index `i`. Returns `false` if the
    /// range is invalid.
    pub fn remove(&self, i: usize, n: usize) -> bool {
        {
            let mut inner = self.0.borrow_mut();
            let end = i + n;
            if end == i {
                return true;
            }
            let count = inner.slots.len();
            if end > count {
                return false;
            }
            if end < count {
                Self::populate(&mut inner);
            }
            inner.slots.drain(i..end);
        }
        self.mark_dirty();
        true
    }

    pub fn clear(&self) {
        {
            let mut inner = self.0.borrow_mut();
            if inner.slots.is_empty() {
                return;
            }
            inner.slots.clear();
        }
        self.mark_dirty();
    }

    /// Writes this array to `enc`: a clean node copies its backing bytes (or,
    /// when `enc` is amending the same base document, a back-pointer to
    /// them) as a single value; a dirty node re-emits, recursing only into
    /// slots that were actually touched.
    pub fn encode_to(&self, enc: &mut Encoder, shared_keys: Option<&'a SharedKeys>) -> Result<()> {
        let inner = self.0.borrow();
        if !inner.dirty {
            return match &inner.base {
                Some(base) if enc.is_amending() => enc.write_base_ref(base.value().offset()),
                Some(base) => enc.write_raw_value(&base.value(), shared_keys),
                None => {
                    enc.begin_array(Some(0))?;
                    enc.end_array()
                }
            };
        }
        enc.begin_array(Some(inner.slots.len()))?;
        for i in 0..inner.slots.len() {
            match &inner.slots[i] {
                Some(v) => v.encode_to(enc, shared_keys)?,
                None => Self::base_value(&inner, i).encode_to(enc, shared_keys)?,
            }
        }
        enc.end_array()
    }
}

impl<'a> Default for MArray<'a> {
    fn default() -> Self {
        MArray::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::Encoder;
    use crate::value::Value;

    fn encode_array(bytes: &[u8]) -> Array<'_> {
        Value::from_bytes_trusted(bytes)
            .as_array()
            .expect("encoded an array")
    }

    #[test]
    fn clean_array_re_encodes_identically() {
        let mut src = Encoder::new();
        src.begin_array(Some(3)).unwrap();
        src.write_i64(1).unwrap();
        src.write_i64(2).unwrap();
        src.write_i64(3).unwrap();
        src.end_array().unwrap();
        let base_bytes = src.finish().unwrap().to_vec();
        let base = encode_array(&base_bytes);

        let marr = MArray::from_array(base);
        assert!(!marr.is_dirty());
        let mut enc = Encoder::new();
        marr.encode_to(&mut enc, None).unwrap();
        let out = enc.finish().unwrap().to_vec();
        let arr = Value::from_bytes_trusted(&out).as_array().unwrap();
        assert_eq!(arr.len(), 3);
        assert_eq!(arr.get(1).to_i64(), 2);
    }

    #[test]
    fn set_marks_dirty_and_overrides_only_that_slot() {
        let mut src = Encoder::new();
        src.begin_array(Some(2)).unwrap();
        src.write_string("a").unwrap();
        src.write_string("b").unwrap();
        src.end_array().unwrap();
        let base_bytes = src.finish().unwrap().to_vec();
        let base = encode_array(&base_bytes);

        let marr = MArray::from_array(base);
        assert!(marr.set(1, MValue::from("z")));
        assert!(marr.is_dirty());

        let mut enc = Encoder::new();
        marr.encode_to(&mut enc, None).unwrap();
        let out = enc.finish().unwrap().to_vec();
        let arr = Value::from_bytes_trusted(&out).as_array().unwrap();
        assert_eq!(arr.get(0).to_str(), "a");
        assert_eq!(arr.get(1).to_str(), "z");
    }

    #[test]
    fn insert_and_remove_shift_indices() {
        let marr = MArray::<'static>::new();
        assert!(marr.append(MValue::from(1i64)));
        assert!(marr.append(MValue::from(3i64)));
        assert!(marr.insert(1, MValue::from(2i64)));
        assert_eq!(marr.count(), 3);
        assert!(marr.remove(0, 1));
        assert_eq!(marr.count(), 2);

        let mut enc = Encoder::new();
        marr.encode_to(&mut enc, None).unwrap();
        let out = enc.finish().unwrap().to_vec();
        let arr = Value::from_bytes_trusted(&out).as_array().unwrap();
        assert_eq!(arr.get(0).to_i64(), 2);
        assert_eq!(arr.get(1).to_i64(), 3);
    }
}
