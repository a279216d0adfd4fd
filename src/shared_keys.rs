//
// Copyright 2020 Fleece Developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//

//! Bidirectional `string <-> small-integer` interning registry (§3.6/§4.3).
//!
//! Encoders holding a [`SharedKeys`] write short integer keys instead of
//! string keys for eligible dict keys; readers carrying the same registry
//! resolve them back. The registry grows monotonically within a session and
//! can be checkpointed with [`SharedKeys::count`] and rolled back with
//! [`SharedKeys::revert_to_count`].

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

/// Largest id a shared key may be assigned (2048 slots, 0..=2047).
pub const MAX_COUNT: usize = 2048;

/// Largest eligible string length, in bytes.
pub const MAX_KEY_LENGTH: usize = 16;

/// A string is eligible for interning if it is short and looks like an
/// identifier (ASCII alphanumeric, `_` or `$`, not starting with a digit).
pub fn is_eligible(s: &str) -> bool {
    if s.is_empty() || s.len() > MAX_KEY_LENGTH {
        return false;
    }
    let mut chars = s.chars();
    let first = chars.next().unwrap();
    if !(first.is_ascii_alphabetic() || first == '_' || first == '$') {
        return false;
    }
    s.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// A `string <-> u16` interning registry.
///
/// Storage is `Arc<str>` (rather than borrowing from caller input) so that a
/// previously-decoded key string stays valid after a [`SharedKeys::revert_to_count`]
/// shrinks the table underneath it -- the Open Question `spec.md` §9 flags
/// for `revertToCount`, resolved here by copying key storage instead of
/// failing reverts in the presence of outstanding readers.
#[derive(Clone, Debug, Default)]
pub struct SharedKeys {
    by_id: Vec<Arc<str>>,
    by_string: HashMap<Arc<str>, u16>,
}

impl SharedKeys {
    pub fn new() -> Self {
        SharedKeys {
            by_id: Vec::new(),
            by_string: HashMap::new(),
        }
    }

    /// Number of strings currently registered; a checkpoint for [`SharedKeys::revert_to_count`].
    pub fn count(&self) -> usize {
        self.by_id.len()
    }

    /// Looks up `s`, assigning a new id if `add` is true, eligible, and
    /// there is room. Returns `None` if `s` is ineligible or the table is
    /// full and `s` isn't already present.
    pub fn encode(&mut self, s: &str, add: bool) -> Option<u16> {
        if let Some(&id) = self.by_string.get(s) {
            return Some(id);
        }
        if !add || !is_eligible(s) || self.by_id.len() >= MAX_COUNT {
            return None;
        }
        let id = self.by_id.len() as u16;
        let owned: Arc<str> = Arc::from(s);
        self.by_id.push(owned.clone());
        self.by_string.insert(owned, id);
        Some(id)
    }

    /// Read-only lookup; never assigns a new id.
    pub fn encode_existing(&self, s: &str) -> Option<u16> {
        self.by_string.get(s).copied()
    }

    /// Resolves an id back to its string, or `None` if out of range.
    pub fn decode(&self, id: u16) -> Option<&str> {
        self.by_id.get(id as usize).map(|s| s.as_ref())
    }

    /// Truncates the table back to `n` entries. Previously-cloned `Arc<str>`
    /// handles held by a caller (e.g. via [`crate::value::Value::key_string`]
    /// returning a borrow tied to the document, not the registry) remain
    /// valid -- the backing allocation is kept alive by the `Arc`, only the
    /// registry's own index into it is discarded.
    pub fn revert_to_count(&mut self, n: usize) {
        if n >= self.by_id.len() {
            return;
        }
        debug!(from = self.by_id.len(), to = n, "SharedKeys::revert_to_count truncating live entries");
        for s in self.by_id.drain(n..) {
            self.by_string.remove(&*s);
        }
    }

    /// Serializes the registry as an ordered list of strings (the preferred
    /// state-serialization form per §4.3).
    pub fn to_strings(&self) -> Vec<String> {
        self.by_id.iter().map(|s| s.to_string()).collect()
    }

    /// Rebuilds a registry from an ordered list of strings (inverse of
    /// [`SharedKeys::to_strings`]). Ids are assigned in order, so this is
    /// only correct if the caller provides an unmodified dump.
    pub fn from_strings<I, S>(strings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut sk = SharedKeys::new();
        for s in strings {
            sk.encode(s.as_ref(), true);
        }
        sk
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_decode_round_trips() {
        let mut sk = SharedKeys::new();
        let id = sk.encode("foo", true).unwrap();
        assert_eq!(sk.decode(id), Some("foo"));
    }

    #[test]
    fn repeated_encode_returns_same_id() {
        let mut sk = SharedKeys::new();
        let a = sk.encode("foo", true).unwrap();
        let b = sk.encode("bar", true).unwrap();
        let c = sk.encode("foo", true).unwrap();
        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert_eq!(c, 0);
        assert_eq!(sk.count(), 2);
    }

    #[test]
    fn ineligible_strings_are_rejected() {
        let mut sk = SharedKeys::new();
        assert_eq!(sk.encode("", true), None);
        assert_eq!(sk.encode("this-is-too-long-for-a-key", true), None);
        assert_eq!(sk.encode("1abc", true), None);
        assert_eq!(sk.encode("has space", true), None);
    }

    #[test]
    fn revert_to_count_truncates() {
        let mut sk = SharedKeys::new();
        sk.encode("a", true);
        let checkpoint = sk.count();
        sk.encode("b", true);
        sk.encode("c", true);
        sk.revert_to_count(checkpoint);
        assert_eq!(sk.count(), checkpoint);
        assert_eq!(sk.encode_existing("b"), None);
        assert_eq!(sk.encode_existing("a"), Some(0));
    }

    #[test]
    fn state_serialization_round_trips() {
        let mut sk = SharedKeys::new();
        sk.encode("foo", true);
        sk.encode("bar", true);
        let strings = sk.to_strings();
        let restored = SharedKeys::from_strings(strings);
        assert_eq!(restored.encode_existing("foo"), Some(0));
        assert_eq!(restored.encode_existing("bar"), Some(1));
    }
}
