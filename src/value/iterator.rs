//
// Copyright 2020 Fleece Developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//

//! A stackless, depth-first pre-order iterator over an entire Fleece subtree
//! (§4.4 "Deep iterator"). At each step it exposes the value, its parent, its
//! key-in-parent, and the full path from the root; [`DeepIterator::skip_children`]
//! prunes the subtree rooted at the value just returned.

use super::{Array, Dict};
use crate::shared_keys::SharedKeys;
use crate::value::Value;

/// One segment of a path from the root: a dict key or an array index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathComponent<'a> {
    Key(&'a str),
    Index(usize),
}

impl<'a> PathComponent<'a> {
    fn write_dotted(&self, out: &mut String) {
        match self {
            PathComponent::Key(k) => {
                if !out.is_empty() {
                    out.push('.');
                }
                out.push_str(k);
            }
            PathComponent::Index(i) => {
                out.push('[');
                out.push_str(&i.to_string());
                out.push(']');
            }
        }
    }

    fn write_json_pointer(&self, out: &mut String) {
        out.push('/');
        match self {
            // RFC 6901 escaping: '~' -> '~0', '/' -> '~1'.
            PathComponent::Key(k) => {
                for c in k.chars() {
                    match c {
                        '~' => out.push_str("~0"),
                        '/' => out.push_str("~1"),
                        _ => out.push(c),
                    }
                }
            }
            PathComponent::Index(i) => out.push_str(&i.to_string()),
        }
    }
}

/// Renders a path as a JavaScript-style dotted string (`foo.bar[2]`).
pub fn path_to_dotted_string(path: &[PathComponent<'_>]) -> String {
    let mut out = String::new();
    for component in path {
        component.write_dotted(&mut out);
    }
    out
}

/// Renders a path as an RFC 6901 JSON Pointer (`/foo/bar/2`).
pub fn path_to_json_pointer(path: &[PathComponent<'_>]) -> String {
    let mut out = String::new();
    for component in path {
        component.write_json_pointer(&mut out);
    }
    out
}

enum Container<'a> {
    Array(Array<'a>),
    Dict(Dict<'a>),
}

impl<'a> Container<'a> {
    fn len(&self) -> usize {
        match self {
            Container::Array(a) => a.len(),
            Container::Dict(d) => d.len(),
        }
    }

    fn child(&self, i: usize, shared_keys: Option<&'a SharedKeys>) -> (PathComponent<'a>, Value<'a>) {
        match self {
            Container::Array(a) => (PathComponent::Index(i), a.get(i)),
            Container::Dict(d) => (
                PathComponent::Key(d.key_string_at(i, shared_keys)),
                d.value_at_index(i),
            ),
        }
    }

    fn value(&self) -> Value<'a> {
        match self {
            Container::Array(a) => a.value(),
            Container::Dict(d) => d.value(),
        }
    }
}

struct Frame<'a> {
    container: Container<'a>,
    index: usize,
    /// The key/index used to reach `container` itself from its parent;
    /// `None` only for the root.
    key_component: Option<PathComponent<'a>>,
}

/// One step of a [`DeepIterator`] traversal.
pub struct Step<'a> {
    pub value: Value<'a>,
    pub key: Option<PathComponent<'a>>,
    pub parent: Option<Value<'a>>,
    pub path: Vec<PathComponent<'a>>,
}

/// Depth-first pre-order traversal of an entire Fleece subtree.
pub struct DeepIterator<'a> {
    root: Value<'a>,
    shared_keys: Option<&'a SharedKeys>,
    stack: Vec<Frame<'a>>,
    started: bool,
    /// Deferred push: the (value, key) just returned by `next`, pushed as a
    /// new frame at the *start* of the following call unless
    /// `skip_children` clears it first. This ordering is what lets
    /// `skip_children` take effect after the caller has already seen the
    /// value but before its descendants are visited.
    deferred: Option<(Value<'a>, Option<PathComponent<'a>>)>,
}

impl<'a> DeepIterator<'a> {
    pub fn new(root: Value<'a>) -> Self {
        DeepIterator::with_shared_keys(root, None)
    }

    pub fn with_shared_keys(root: Value<'a>, shared_keys: Option<&'a SharedKeys>) -> Self {
        DeepIterator {
            root,
            shared_keys,
            stack: Vec::new(),
            started: false,
            deferred: None,
        }
    }

    fn push_frame_for(&mut self, v: Value<'a>, key_component: Option<PathComponent<'a>>) {
        if let Some(arr) = v.as_array() {
            if !arr.is_empty() {
                self.stack.push(Frame {
                    container: Container::Array(arr),
                    index: 0,
                    key_component,
                });
            }
        } else if let Some(d) = v.as_dict() {
            if !d.is_empty() {
                self.stack.push(Frame {
                    container: Container::Dict(d),
                    index: 0,
                    key_component,
                });
            }
        }
    }

    /// Prunes the subtree rooted at the value most recently returned by
    /// `next`. Has no effect if called more than once per step, or before
    /// the first call to `next`.
    pub fn skip_children(&mut self) {
        self.deferred = None;
    }

    fn ancestors_path(&self) -> Vec<PathComponent<'a>> {
        self.stack
            .iter()
            .filter_map(|f| f.key_component.clone())
            .collect()
    }

    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<Step<'a>> {
        if let Some((v, key)) = self.deferred.take() {
            self.push_frame_for(v, key);
        }

        if !self.started {
            self.started = true;
            self.deferred = Some((self.root, None));
            return Some(Step {
                value: self.root,
                key: None,
                parent: None,
                path: Vec::new(),
            });
        }

        loop {
            let exhausted = match self.stack.last() {
                Some(frame) => frame.index >= frame.container.len(),
                None => return None,
            };
            if exhausted {
                self.stack.pop();
                continue;
            }
            let parent_value = self.stack.last().unwrap().container.value();
            let mut path = self.ancestors_path();
            let frame = self.stack.last_mut().unwrap();
            let idx = frame.index;
            frame.index += 1;
            let (key, value) = frame.container.child(idx, self.shared_keys);
            path.push(key.clone());
            self.deferred = Some((value, Some(key.clone())));
            return Some(Step {
                value,
                key: Some(key),
                parent: Some(parent_value),
                path,
            });
        }
    }
}

impl<'a> Iterator for DeepIterator<'a> {
    type Item = Step<'a>;
    fn next(&mut self) -> Option<Step<'a>> {
        DeepIterator::next(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::Encoder;
    use crate::value::Value;

    fn sample_bytes() -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.begin_dict(None).unwrap();
        enc.write_key("a").unwrap();
        enc.write_i64(1).unwrap();
        enc.write_key("b").unwrap();
        enc.begin_array(None).unwrap();
        enc.write_i64(2).unwrap();
        enc.write_i64(3).unwrap();
        enc.end_array().unwrap();
        enc.end_dict().unwrap();
        enc.finish().unwrap().to_vec()
    }

    #[test]
    fn visits_every_descendant_in_pre_order_with_paths() {
        let bytes = sample_bytes();
        let root = Value::from_bytes_trusted(&bytes);
        let mut it = DeepIterator::new(root);
        let mut seen = Vec::new();
        while let Some(step) = it.next() {
            seen.push(path_to_dotted_string(&step.path));
        }
        assert_eq!(seen, vec!["", "a", "b", "b[0]", "b[1]"]);
    }

    #[test]
    fn skip_children_prunes_subtree() {
        let bytes = sample_bytes();
        let root = Value::from_bytes_trusted(&bytes);
        let mut it = DeepIterator::new(root);
        let mut seen = Vec::new();
        while let Some(step) = it.next() {
            let p = path_to_dotted_string(&step.path);
            if p == "b" {
                it.skip_children();
            }
            seen.push(p);
        }
        assert_eq!(seen, vec!["", "a", "b"]);
    }

    #[test]
    fn json_pointer_rendering() {
        let bytes = sample_bytes();
        let root = Value::from_bytes_trusted(&bytes);
        let mut it = DeepIterator::new(root);
        let mut pointers = Vec::new();
        while let Some(step) = it.next() {
            pointers.push(path_to_json_pointer(&step.path));
        }
        assert_eq!(pointers, vec!["", "/a", "/b", "/b/0", "/b/1"]);
    }
}
