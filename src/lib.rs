//
// Copyright 2020 Fleece Developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//

//! Fleece: a binary interchange format and library for JSON-equivalent data
//! with zero-parse random access. See `SPEC_FULL.md` at the repository root
//! for the full component breakdown; modules below are named after that
//! breakdown's letters (A-K).

pub mod builder;
pub mod delta;
pub mod doc;
pub mod encoder;
pub mod error;
pub mod json;
pub mod mtree;
pub mod shared_keys;
pub mod slice;
pub mod value;

pub use builder::Builder;
pub use doc::Doc;
pub use encoder::{Encoder, EncoderOptions};
pub use error::{Error, Result};
pub use shared_keys::SharedKeys;
pub use slice::{AllocSlice, Slice};
pub use value::{Array, Dict, DeepIterator, Value, ValueType};
