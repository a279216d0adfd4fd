//
// Copyright 2020 Fleece Developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//

//! Printf-style value builder (§4.9), ported from `Builder.hh`'s format-
//! specifier documentation. A template is a JSON5 literal with `%`-holes;
//! each hole consumes the next [`Arg`] in order. `%.*s`'s C signature
//! (length, then pointer) collapses into a single [`Arg::Bytes`] since a
//! Rust slice already carries its own length.
//!
//! The result can become a fresh standalone document ([`Builder::build`]),
//! a new element appended to an existing [`MArray`], or a set of entries
//! merged into an existing [`MDict`] -- the three destinations `Builder.hh`
//! documents for its own output.

use crate::encoder::Encoder;
use crate::error::{Error, Result};
use crate::mtree::{MArray, MDict, MValue, Native};
use crate::shared_keys::SharedKeys;
use crate::slice::AllocSlice;
use crate::value::Value;

/// One argument consumed by a `%`-hole, in the order the holes appear.
///
/// `%.*s`'s C-side `(length, pointer)` pair is represented as a single
/// [`Arg::Bytes`] -- a Rust slice already knows its own length, so there is
/// nothing left for a second argument to carry.
#[derive(Clone, Copy, Debug)]
pub enum Arg<'a> {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(&'a str),
    Bytes(&'a [u8]),
    Value(Value<'a>),
}

/// Consumes [`Arg`]s left-to-right as the template's holes are scanned.
struct ArgCursor<'a, 'b> {
    args: &'b [Arg<'a>],
    next: usize,
}

impl<'a, 'b> ArgCursor<'a, 'b> {
    fn new(args: &'b [Arg<'a>]) -> Self {
        ArgCursor { args, next: 0 }
    }

    fn take(&mut self) -> Result<Arg<'a>> {
        let arg = self
            .args
            .get(self.next)
            .copied()
            .ok_or(Error::EncodeError("builder template has more holes than arguments"))?;
        self.next += 1;
        Ok(arg)
    }
}

/// Printf-style constructor for Fleece values, driven by a JSON5 template
/// with `%`-holes (§4.9).
pub struct Builder;

impl Builder {
    /// Builds a fresh, standalone document from `template` and `args`.
    pub fn build(template: &str, args: &[Arg]) -> Result<AllocSlice> {
        let mut cursor = ArgCursor::new(args);
        let mut scanner = Scanner::new(template);
        let value = scanner
            .parse_value(&mut cursor)?
            .unwrap_or(MValue::Native(Native::Null));
        scanner.finish()?;
        let mut enc = Encoder::new();
        value.encode_to(&mut enc, None)?;
        enc.finish()
    }

    /// Parses `template` as a single value and appends it to `array`.
    /// Returns `false` (without mutating `array`) if the template's top
    /// level turned out suppressed (a lone `%-...` hole whose argument was
    /// the type's default).
    pub fn append_to_array<'a>(
        array: &MArray<'a>,
        template: &str,
        args: &[Arg<'a>],
    ) -> Result<bool> {
        let mut cursor = ArgCursor::new(args);
        let mut scanner = Scanner::new(template);
        let value = scanner.parse_value(&mut cursor)?;
        scanner.finish()?;
        match value {
            Some(v) => Ok(array.append(v)),
            None => Ok(false),
        }
    }

    /// Parses `template` as a `{ ... }` object and merges its entries into
    /// `dict` (an existing key is overwritten; a suppressed `%-...` entry
    /// value is skipped entirely, neither inserted nor deleted).
    pub fn merge_into_dict<'a>(
        dict: &MDict<'a>,
        template: &str,
        args: &[Arg<'a>],
        shared_keys: Option<&'a SharedKeys>,
    ) -> Result<()> {
        let mut cursor = ArgCursor::new(args);
        let mut scanner = Scanner::new(template);
        scanner.expect_byte(b'{')?;
        scanner.skip_ws_and_commas()?;
        while scanner.peek() != Some(b'}') {
            let key = scanner.parse_key()?;
            scanner.skip_ws()?;
            scanner.expect_byte(b':')?;
            scanner.skip_ws()?;
            if let Some(value) = scanner.parse_value(&mut cursor)? {
                dict.set(&key, value, shared_keys);
            }
            scanner.skip_ws_and_commas()?;
        }
        scanner.advance();
        scanner.finish()?;
        Ok(())
    }
}

/// A byte-oriented cursor over the template text, tracking a position for
/// caret-style error reporting (§4.9: "malformed format -> error with a
/// caret pointing at the offending byte").
struct Scanner<'t> {
    bytes: &'t [u8],
    pos: usize,
}

impl<'t> Scanner<'t> {
    fn new(template: &'t str) -> Self {
        Scanner {
            bytes: template.as_bytes(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let b = self.peek();
        if b.is_some() {
            self.pos += 1;
        }
        b
    }

    fn error(&self, message: &str) -> Error {
        let mut caret = String::new();
        caret.push_str(message);
        caret.push_str(&format!(" at byte {}: ", self.pos));
        let context_start = self.pos.saturating_sub(8);
        caret.push_str(&String::from_utf8_lossy(
            &self.bytes[context_start..self.pos.min(self.bytes.len())],
        ));
        caret.push_str(" ^ ");
        let context_end = (self.pos + 8).min(self.bytes.len());
        caret.push_str(&String::from_utf8_lossy(&self.bytes[self.pos.min(self.bytes.len())..context_end]));
        Error::Message(caret)
    }

    fn expect_byte(&mut self, expected: u8) -> Result<()> {
        if self.peek() == Some(expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", expected as char)))
        }
    }

    fn skip_ws(&mut self) -> Result<()> {
        loop {
            match self.peek() {
                Some(b) if b.is_ascii_whitespace() => {
                    self.pos += 1;
                }
                Some(b'/') if self.peek_at(1) == Some(b'/') => {
                    while self.peek().is_some() && self.peek() != Some(b'\n') {
                        self.pos += 1;
                    }
                }
                Some(b'/') if self.peek_at(1) == Some(b'*') => {
                    self.pos += 2;
                    while self.peek().is_some()
                        && !(self.peek() == Some(b'*') && self.peek_at(1) == Some(b'/'))
                    {
                        self.pos += 1;
                    }
                    if self.peek().is_none() {
                        return Err(self.error("unterminated block comment"));
                    }
                    self.pos += 2;
                }
                _ => return Ok(()),
            }
        }
    }

    fn skip_ws_and_commas(&mut self) -> Result<()> {
        loop {
            self.skip_ws()?;
            if self.peek() == Some(b',') {
                self.pos += 1;
            } else {
                return Ok(());
            }
        }
    }

    /// Leaves the scanner at end-of-input after any trailing whitespace, or
    /// errors on trailing garbage -- the whole template must be consumed.
    fn finish(&mut self) -> Result<()> {
        self.skip_ws()?;
        if self.pos != self.bytes.len() {
            return Err(self.error("unexpected trailing content after template value"));
        }
        Ok(())
    }

    /// Parses an object key: a quoted string, or a bare identifier
    /// (`[A-Za-z_$][A-Za-z0-9_$]*`), per §4.6's unquoted-key JSON5 rule.
    fn parse_key(&mut self) -> Result<String> {
        match self.peek() {
            Some(b'"') | Some(b'\'') => self.parse_quoted_string(),
            Some(b) if is_ident_start(b) => {
                let start = self.pos;
                while matches!(self.peek(), Some(b) if is_ident_continue(b)) {
                    self.pos += 1;
                }
                Ok(String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned())
            }
            _ => Err(self.error("expected an object key")),
        }
    }

    fn parse_quoted_string(&mut self) -> Result<String> {
        let quote = self.advance().expect("caller checked a quote is present");
        let mut out = String::new();
        loop {
            match self.advance() {
                None => return Err(self.error("unterminated string")),
                Some(b) if b == quote => break,
                Some(b'\\') => match self.advance() {
                    Some(b'"') => out.push('"'),
                    Some(b'\'') => out.push('\''),
                    Some(b'\\') => out.push('\\'),
                    Some(b'/') => out.push('/'),
                    Some(b'b') => out.push('\u{8}'),
                    Some(b'f') => out.push('\u{c}'),
                    Some(b'n') => out.push('\n'),
                    Some(b'r') => out.push('\r'),
                    Some(b't') => out.push('\t'),
                    Some(b'\n') => {} // line continuation
                    Some(b'u') => {
                        let cp = self.parse_unicode_escape()?;
                        out.push(cp);
                    }
                    Some(other) => out.push(other as char),
                    None => return Err(self.error("unterminated escape sequence")),
                },
                Some(b) if b < 0x80 => out.push(b as char),
                Some(b) => {
                    // Multi-byte UTF-8 lead byte: copy through verbatim.
                    let start = self.pos - 1;
                    let len = utf8_len(b);
                    let end = (start + len).min(self.bytes.len());
                    out.push_str(&String::from_utf8_lossy(&self.bytes[start..end]));
                    self.pos = end;
                }
            }
        }
        Ok(out)
    }

    fn parse_unicode_escape(&mut self) -> Result<char> {
        let mut v: u32 = 0;
        for _ in 0..4 {
            let b = self
                .advance()
                .ok_or_else(|| self.error("truncated \\u escape"))?;
            let digit = (b as char)
                .to_digit(16)
                .ok_or_else(|| self.error("invalid \\u escape digit"))?;
            v = v * 16 + digit;
        }
        char::from_u32(v).ok_or_else(|| self.error("invalid unicode code point"))
    }

    /// Parses one value: an object, array, string, number, literal, or a
    /// `%`-hole. Returns `None` when a `%-...` hole was suppressed (its
    /// argument equaled the type's default) -- callers in a dict/array
    /// context must omit the entry entirely; [`Builder::build`] treats
    /// `None` as `null`.
    fn parse_value<'a, 'b>(&mut self, args: &mut ArgCursor<'a, 'b>) -> Result<Option<MValue<'a>>> {
        self.skip_ws()?;
        match self.peek() {
            Some(b'{') => self.parse_object(args).map(Some),
            Some(b'[') => self.parse_array(args).map(Some),
            Some(b'"') | Some(b'\'') => {
                let s = self.parse_quoted_string()?;
                Ok(Some(MValue::from(s)))
            }
            Some(b'%') => self.parse_hole(args),
            Some(b't') if self.bytes[self.pos..].starts_with(b"true") => {
                self.pos += 4;
                Ok(Some(MValue::Native(Native::Bool(true))))
            }
            Some(b'f') if self.bytes[self.pos..].starts_with(b"false") => {
                self.pos += 5;
                Ok(Some(MValue::Native(Native::Bool(false))))
            }
            Some(b'n') if self.bytes[self.pos..].starts_with(b"null") => {
                self.pos += 4;
                Ok(Some(MValue::Native(Native::Null)))
            }
            Some(b) if b == b'-' || b == b'+' || b == b'.' || b.is_ascii_digit() => {
                self.parse_number().map(Some)
            }
            _ => Err(self.error("expected a value")),
        }
    }

    fn parse_object<'a, 'b>(&mut self, args: &mut ArgCursor<'a, 'b>) -> Result<MValue<'a>> {
        self.expect_byte(b'{')?;
        let dict: MDict<'a> = MDict::new();
        self.skip_ws_and_commas()?;
        while self.peek() != Some(b'}') {
            let key = self.parse_key()?;
            self.skip_ws()?;
            self.expect_byte(b':')?;
            self.skip_ws()?;
            if let Some(value) = self.parse_value(args)? {
                dict.set(&key, value, None);
            }
            self.skip_ws_and_commas()?;
            if self.peek().is_none() {
                return Err(self.error("unterminated object"));
            }
        }
        self.advance();
        Ok(MValue::Native(Native::Dict(dict)))
    }

    fn parse_array<'a, 'b>(&mut self, args: &mut ArgCursor<'a, 'b>) -> Result<MValue<'a>> {
        self.expect_byte(b'[')?;
        let array: MArray<'a> = MArray::new();
        self.skip_ws_and_commas()?;
        while self.peek() != Some(b']') {
            if let Some(value) = self.parse_value(args)? {
                array.append(value);
            }
            self.skip_ws_and_commas()?;
            if self.peek().is_none() {
                return Err(self.error("unterminated array"));
            }
        }
        self.advance();
        Ok(MValue::Native(Native::Array(array)))
    }

    fn parse_number<'a>(&mut self) -> Result<MValue<'a>> {
        let start = self.pos;
        if matches!(self.peek(), Some(b'+') | Some(b'-')) {
            self.pos += 1;
        }
        let mut is_float = false;
        while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.peek() == Some(b'.') {
            is_float = true;
            self.pos += 1;
            while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        if matches!(self.peek(), Some(b'e') | Some(b'E')) {
            is_float = true;
            self.pos += 1;
            if matches!(self.peek(), Some(b'+') | Some(b'-')) {
                self.pos += 1;
            }
            while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        let text = std::str::from_utf8(&self.bytes[start..self.pos])
            .map_err(|_| self.error("invalid number"))?;
        if is_float {
            let f: f64 = text.parse().map_err(|_| self.error("invalid float literal"))?;
            Ok(MValue::Native(Native::Float64(f)))
        } else {
            let i: i64 = text.parse().map_err(|_| self.error("invalid integer literal"))?;
            Ok(MValue::Native(Native::Int(i)))
        }
    }

    /// Parses one `%`-hole, consuming the next argument. Returns `None` if
    /// `-` was present and the argument was the type's default (§4.9:
    /// "a leading `-` ... suppresses the output if the argument is the
    /// type's default").
    fn parse_hole<'a, 'b>(&mut self, args: &mut ArgCursor<'a, 'b>) -> Result<Option<MValue<'a>>> {
        self.expect_byte(b'%')?;
        let suppress_if_default = if self.peek() == Some(b'-') {
            self.pos += 1;
            true
        } else {
            false
        };

        // Length-prefixed string: %.*s
        if self.peek() == Some(b'.') && self.peek_at(1) == Some(b'*') && self.peek_at(2) == Some(b's') {
            self.pos += 3;
            let arg = args.take()?;
            return match arg {
                Arg::Bytes(b) => {
                    if suppress_if_default && b.is_empty() {
                        Ok(None)
                    } else {
                        Ok(Some(MValue::Native(Native::Data(b.to_vec()))))
                    }
                }
                _ => Err(self.error("%.*s requires an Arg::Bytes argument")),
            };
        }

        // Optional C size prefixes, syntactically accepted and otherwise
        // irrelevant -- Arg::Int/Arg::UInt already carry full width.
        while matches!(self.peek(), Some(b'l') | Some(b'z') | Some(b'h')) {
            self.pos += 1;
        }

        let spec = self
            .advance()
            .ok_or_else(|| self.error("truncated format specifier"))?;
        let arg = args.take()?;
        match (spec, arg) {
            (b'c', Arg::Bool(b)) => {
                if suppress_if_default && !b {
                    Ok(None)
                } else {
                    Ok(Some(MValue::Native(Native::Bool(b))))
                }
            }
            (b'd', Arg::Int(i)) | (b'i', Arg::Int(i)) => {
                if suppress_if_default && i == 0 {
                    Ok(None)
                } else {
                    Ok(Some(MValue::Native(Native::Int(i))))
                }
            }
            (b'u', Arg::UInt(u)) => {
                if suppress_if_default && u == 0 {
                    Ok(None)
                } else {
                    Ok(Some(MValue::Native(Native::UInt(u))))
                }
            }
            (b'f', Arg::Float(f)) => {
                if suppress_if_default && f == 0.0 {
                    Ok(None)
                } else {
                    Ok(Some(MValue::Native(Native::Float64(f))))
                }
            }
            (b's', Arg::Str(s)) => {
                if suppress_if_default && s.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(MValue::from(s)))
                }
            }
            (b'p', Arg::Value(v)) => {
                if suppress_if_default && v.value_type() == crate::value::ValueType::Null {
                    Ok(None)
                } else {
                    Ok(Some(MValue::Immutable(v)))
                }
            }
            (other, _) => Err(self.error(&format!(
                "format specifier '%{}' does not match the supplied argument's type",
                other as char
            ))),
        }
    }
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b == b'$'
}

fn is_ident_continue(b: u8) -> bool {
    is_ident_start(b) || b.is_ascii_digit()
}

fn utf8_len(lead: u8) -> usize {
    if lead & 0xE0 == 0xC0 {
        2
    } else if lead & 0xF0 == 0xE0 {
        3
    } else if lead & 0xF8 == 0xF0 {
        4
    } else {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn decode(bytes: &AllocSlice) -> Value<'_> {
        Value::from_bytes_trusted(&bytes[..])
    }

    #[test]
    fn builds_scalar_from_hole() {
        let bytes = Builder::build("%d", &[Arg::Int(42)]).unwrap();
        assert_eq!(decode(&bytes).to_i64(), 42);
    }

    #[test]
    fn builds_object_with_mixed_literals_and_holes() {
        let bytes = Builder::build(
            r#"{ name: %s, age: %d, active: %c }"#,
            &[Arg::Str("Alice"), Arg::Int(30), Arg::Bool(true)],
        )
        .unwrap();
        let root = decode(&bytes);
        let dict = root.as_dict().unwrap();
        assert_eq!(dict.get("name", None).to_str(), "Alice");
        assert_eq!(dict.get("age", None).to_i64(), 30);
        assert!(dict.get("active", None).to_bool());
    }

    #[test]
    fn suppresses_default_valued_holes_in_dict() {
        let bytes = Builder::build(
            r#"{ "a": %-d, "b": %-d }"#,
            &[Arg::Int(0), Arg::Int(7)],
        )
        .unwrap();
        let root = decode(&bytes);
        let dict = root.as_dict().unwrap();
        assert_eq!(dict.len(), 1);
        assert_eq!(dict.get("b", None).to_i64(), 7);
    }

    #[test]
    fn builds_nested_array() {
        let bytes = Builder::build("[1, %d, [true, %s]]", &[Arg::Int(2), Arg::Str("x")]).unwrap();
        let root = decode(&bytes);
        let arr = root.as_array().unwrap();
        assert_eq!(arr.get(0).to_i64(), 1);
        assert_eq!(arr.get(1).to_i64(), 2);
        let inner = arr.get(2).as_array().unwrap();
        assert!(inner.get(0).to_bool());
        assert_eq!(inner.get(1).to_str(), "x");
    }

    #[test]
    fn appends_to_existing_mutable_array() {
        let array: MArray = MArray::new();
        assert!(Builder::append_to_array(&array, "%d", &[Arg::Int(5)]).unwrap());
        assert!(Builder::append_to_array(&array, r#""six""#, &[]).unwrap());
        assert_eq!(array.count(), 2);

        let mut enc = Encoder::new();
        array.encode_to(&mut enc, None).unwrap();
        let bytes = enc.finish().unwrap();
        let decoded = decode(&bytes);
        let arr = decoded.as_array().unwrap();
        assert_eq!(arr.get(0).to_i64(), 5);
        assert_eq!(arr.get(1).to_str(), "six");
    }

    #[test]
    fn merges_into_existing_mutable_dict() {
        let dict: MDict = MDict::new();
        dict.set("x", MValue::from(1i64), None);
        Builder::merge_into_dict(&dict, r#"{ y: %d, x: %d }"#, &[Arg::Int(2), Arg::Int(99)], None)
            .unwrap();
        assert_eq!(dict.count(), 2);

        let mut enc = Encoder::new();
        dict.encode_to(&mut enc, None).unwrap();
        let bytes = enc.finish().unwrap();
        let decoded = decode(&bytes);
        let d = decoded.as_dict().unwrap();
        assert_eq!(d.get("x", None).to_i64(), 99);
        assert_eq!(d.get("y", None).to_i64(), 2);
    }

    #[test]
    fn malformed_template_reports_an_error() {
        let err = Builder::build("{ a: }", &[]).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("byte"));
    }

    #[test]
    fn missing_argument_is_an_error() {
        assert!(Builder::build("%d", &[]).is_err());
    }

    #[test]
    fn mismatched_specifier_type_is_an_error() {
        assert!(Builder::build("%d", &[Arg::Str("nope")]).is_err());
    }
}
