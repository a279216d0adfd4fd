//
// Copyright 2020 Fleece Developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//

//! Document ownership (§3.7).
//!
//! A [`Doc`] owns the encoded byte buffer (or references a foreign "extern"
//! range another `Doc` owns), optionally carries a [`SharedKeys`] registry,
//! and is the unit of reference counting: cloning a `Doc` is `O(1)` and every
//! [`Value`] handed out from it borrows from the clone that produced it.

use std::sync::Arc;

use crate::error::Result;
use crate::shared_keys::SharedKeys;
use crate::slice::AllocSlice;
use crate::value::Value;

const MAX_VALIDATION_DEPTH: usize = 10_000;

struct DocInner {
    bytes: AllocSlice,
    extern_bytes: Option<AllocSlice>,
    shared_keys: Option<SharedKeys>,
}

/// An immutable, reference-counted handle onto a Fleece-encoded byte buffer.
///
/// Safe to share for concurrent read from many threads once constructed
/// (§5); construction itself (`untrusted`, which validates) is not
/// thread-safe with concurrent mutation of the same buffer, but there is
/// none -- `Doc` never exposes a mutable view of its bytes.
#[derive(Clone)]
pub struct Doc(Arc<DocInner>);

impl Doc {
    /// Wraps `bytes` without validating. The caller is asserting the data
    /// was produced by a trusted encoder (or previously validated).
    pub fn trusted(bytes: AllocSlice) -> Self {
        Doc(Arc::new(DocInner {
            bytes,
            extern_bytes: None,
            shared_keys: None,
        }))
    }

    /// Wraps `bytes`, validating the trailer and the whole reachable value
    /// graph before returning. Per §4.2/§7: corruption is reported as
    /// `InvalidData` rather than panicking or reading out of bounds.
    pub fn untrusted(bytes: AllocSlice) -> Result<Self> {
        let doc = Doc::trusted(bytes);
        doc.root().validate(MAX_VALIDATION_DEPTH)?;
        Ok(doc)
    }

    /// Attaches a SharedKeys registry dict keys in this document may be
    /// encoded against.
    pub fn with_shared_keys(mut self, shared_keys: SharedKeys) -> Self {
        let inner = Arc::make_mut(&mut self.0);
        inner.shared_keys = Some(shared_keys);
        self
    }

    /// Designates `extern_bytes` as the base a backward `extern` pointer in
    /// this document resolves against (the amend-mode base, §4.5/§6.1).
    pub fn with_extern(mut self, extern_bytes: AllocSlice) -> Self {
        let inner = Arc::make_mut(&mut self.0);
        inner.extern_bytes = Some(extern_bytes);
        self
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0.bytes
    }

    pub fn extern_bytes(&self) -> Option<&[u8]> {
        self.0.extern_bytes.as_deref()
    }

    pub fn shared_keys(&self) -> Option<&SharedKeys> {
        self.0.shared_keys.as_ref()
    }

    /// The root value, found via the 2-byte trailer pointer at the end of
    /// the buffer (§3.3): the last two bytes of the document, read as a
    /// pointer, always locate the root.
    pub fn root(&self) -> Value<'_> {
        let bytes: &[u8] = &self.0.bytes;
        let extern_bytes: Option<&[u8]> = self.0.extern_bytes.as_deref();
        if bytes.len() < 2 {
            return Value::at(&crate::value::tag::constants::UNDEFINED, 0, None);
        }
        let trailer_offset = bytes.len() - 2;
        Value::at(bytes, trailer_offset, extern_bytes).deref_pointer()
    }
}

impl Clone for DocInner {
    fn clone(&self) -> Self {
        DocInner {
            bytes: self.bytes.clone(),
            extern_bytes: self.extern_bytes.clone(),
            shared_keys: self.shared_keys.clone(),
        }
    }
}

/// Registers a memory range + registry in a process-global lookup table so
/// that an `extern` pointer crossing into a foreign base document can be
/// resolved without every reader threading the base through explicitly
/// (§5 "External-pointer scopes"). Scopes nest and must deregister in LIFO
/// order; registration/deregistration/lookup are all mutex-guarded.
pub mod scope {
    use std::sync::Mutex;

    use once_cell::sync::Lazy;

    use super::Doc;

    struct ScopeEntry {
        range_start: usize,
        range_end: usize,
        doc: Doc,
    }

    static SCOPES: Lazy<Mutex<Vec<ScopeEntry>>> = Lazy::new(|| Mutex::new(Vec::new()));

    /// An RAII registration; dropping it deregisters the scope. Scopes must
    /// be dropped in LIFO order relative to other currently-registered
    /// scopes, matching the spec's "nest but must deregister in LIFO order".
    pub struct SharedKeyScope {
        range_start: usize,
        range_end: usize,
    }

    impl SharedKeyScope {
        /// Registers `doc`'s bytes as resolvable for pointers claiming the
        /// `[range_start, range_end)` extern address range.
        pub fn register(range_start: usize, range_end: usize, doc: Doc) -> Self {
            tracing::debug!(range_start, range_end, "SharedKeyScope registered");
            let mut scopes = SCOPES.lock().expect("SharedKeyScope mutex poisoned");
            scopes.push(ScopeEntry {
                range_start,
                range_end,
                doc,
            });
            SharedKeyScope {
                range_start,
                range_end,
            }
        }

        /// Looks up the `Doc` registered for an address falling in
        /// `[range_start, range_end)`, searching the most recently
        /// registered (innermost) scope first.
        pub fn find(address: usize) -> Option<Doc> {
            let scopes = SCOPES.lock().expect("SharedKeyScope mutex poisoned");
            scopes
                .iter()
                .rev()
                .find(|e| address >= e.range_start && address < e.range_end)
                .map(|e| e.doc.clone())
        }
    }

    impl Drop for SharedKeyScope {
        fn drop(&mut self) {
            tracing::debug!(
                range_start = self.range_start,
                range_end = self.range_end,
                "SharedKeyScope deregistered"
            );
            let mut scopes = SCOPES.lock().expect("SharedKeyScope mutex poisoned");
            if let Some(pos) = scopes
                .iter()
                .rposition(|e| e.range_start == self.range_start && e.range_end == self.range_end)
            {
                scopes.remove(pos);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::Encoder;

    #[test]
    fn root_resolves_through_trailer_pointer() {
        let mut enc = Encoder::new();
        enc.write_i64(42).unwrap();
        let bytes = enc.finish().unwrap();
        let doc = Doc::trusted(AllocSlice::from(bytes.to_vec()));
        assert_eq!(doc.root().to_i64(), 42);
    }

    #[test]
    fn untrusted_rejects_truncated_input() {
        let err = Doc::untrusted(AllocSlice::from(vec![0x80, 0x00]));
        assert!(err.is_err());
    }
}
