//
// Copyright 2020 Fleece Developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//

use std::fmt::Display;

use serde::{de, ser};

pub type Result<T> = std::result::Result<T, Error>;

/// Fleece encoding/decoding error.
///
/// Decode paths report these via a side channel (see [`crate::doc::Doc`]); the
/// encoder never returns one directly, it latches the first error and surfaces
/// it from [`crate::encoder::Encoder::finish`].
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum Error {
    /// Constructed from serialization and deserialization errors.
    #[error("{0}")]
    Message(String),

    /// A heap allocation failed.
    #[error("memory allocation failed")]
    MemoryError,

    /// An index, byte offset, or pointer target fell outside the document.
    #[error("index or offset {0} out of range")]
    OutOfRange(usize),

    /// The document is not well-formed Fleece (bad tag, truncated container,
    /// dangling pointer, missing trailer, ...).
    #[error("invalid Fleece data: {0}")]
    InvalidData(&'static str),

    /// The encoder was called in the wrong state, or asked to write a value it
    /// cannot represent.
    #[error("encoder error: {0}")]
    EncodeError(&'static str),

    /// A JSON or JSON5 syntax error, with the byte offset it occurred at.
    #[error("JSON error at byte {offset}: {message}")]
    JSONError { offset: usize, message: String },

    /// A key-path specifier (e.g. `foo.bar[2]`) was malformed.
    #[error("invalid key path: {0}")]
    PathError(String),

    /// The operation is not valid in the current mode (e.g. `finish_doc` while
    /// encoding JSON).
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
}

impl ser::Error for Error {
    fn custom<T: Display>(msg: T) -> Self {
        Error::Message(msg.to_string())
    }
}

impl de::Error for Error {
    fn custom<T: Display>(msg: T) -> Self {
        Error::Message(msg.to_string())
    }
}
