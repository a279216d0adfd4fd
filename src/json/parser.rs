//
// Copyright 2020 Fleece Developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//

//! Conventional recursive-descent JSON parser (§4.6) that drives an
//! [`Encoder`] one token at a time. Object/array/string structure is
//! hand-rolled (so every syntax error carries an exact byte offset);
//! number-literal recognition is delegated to `nom` (the teacher's parsing
//! dependency, otherwise unused once this crate moves off `bplist`'s
//! fixed-table binary parsing).

use nom::branch::alt;
use nom::character::complete::{char as nom_char, digit0, digit1, one_of};
use nom::combinator::{opt, recognize};
use nom::sequence::{pair, tuple};
use nom::IResult;

use crate::encoder::Encoder;
use crate::error::{Error, Result};

/// A parsed JSON value, kept only long enough to drive the encoder; not a
/// public type (callers want Fleece bytes, not a JSON AST).
enum JsonValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
    Array(Vec<JsonValue>),
    Object(Vec<(String, JsonValue)>),
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

/// Parses `input` as a single JSON document and drives `enc`.
pub fn parse_into(input: &str, enc: &mut Encoder) -> Result<()> {
    let mut p = Parser { input, pos: 0 };
    let value = p.parse_value()?;
    p.skip_ws();
    if p.pos != p.input.len() {
        return Err(p.err("unexpected trailing characters after JSON value"));
    }
    write_value(&value, enc)
}

fn write_value(value: &JsonValue, enc: &mut Encoder) -> Result<()> {
    match value {
        JsonValue::Null => enc.write_null(),
        JsonValue::Bool(b) => enc.write_bool(*b),
        JsonValue::Int(i) => enc.write_i64(*i),
        JsonValue::UInt(u) => enc.write_u64(*u),
        JsonValue::Float(f) => enc.write_f64(*f),
        JsonValue::String(s) => enc.write_string(s),
        JsonValue::Array(items) => {
            enc.begin_array(Some(items.len()))?;
            for item in items {
                write_value(item, enc)?;
            }
            enc.end_array()
        }
        JsonValue::Object(entries) => {
            enc.begin_dict(Some(entries.len()))?;
            for (k, v) in entries {
                enc.write_key(k)?;
                write_value(v, enc)?;
            }
            enc.end_dict()
        }
    }
}

impl<'a> Parser<'a> {
    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn err(&self, message: &str) -> Error {
        Error::JSONError {
            offset: self.pos,
            message: message.to_string(),
        }
    }

    fn skip_ws(&mut self) {
        let trimmed = self.rest().trim_start_matches(|c: char| c.is_whitespace());
        self.pos = self.input.len() - trimmed.len();
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_ws();
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.rest().chars().next()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn expect(&mut self, expected: char) -> Result<()> {
        self.skip_ws();
        match self.bump() {
            Some(c) if c == expected => Ok(()),
            _ => Err(self.err(&format!("expected '{}'", expected))),
        }
    }

    fn parse_value(&mut self) -> Result<JsonValue> {
        match self.peek() {
            Some('{') => self.parse_object(),
            Some('[') => self.parse_array(),
            Some('"') => Ok(JsonValue::String(self.parse_string()?)),
            Some('t') => self.parse_literal("true", JsonValue::Bool(true)),
            Some('f') => self.parse_literal("false", JsonValue::Bool(false)),
            Some('n') => self.parse_literal("null", JsonValue::Null),
            Some(c) if c == '-' || c.is_ascii_digit() => self.parse_number(),
            Some(_) => Err(self.err("invalid start of JSON value")),
            None => Err(self.err("unexpected end of JSON input")),
        }
    }

    fn parse_literal(&mut self, word: &str, value: JsonValue) -> Result<JsonValue> {
        if self.rest().starts_with(word) {
            self.pos += word.len();
            Ok(value)
        } else {
            Err(self.err(&format!("expected '{}'", word)))
        }
    }

    fn parse_object(&mut self) -> Result<JsonValue> {
        self.expect('{')?;
        let mut entries = Vec::new();
        if self.peek() == Some('}') {
            self.bump();
            return Ok(JsonValue::Object(entries));
        }
        loop {
            self.skip_ws();
            if self.peek() != Some('"') {
                return Err(self.err("expected a string key"));
            }
            let key = self.parse_string()?;
            self.expect(':')?;
            let value = self.parse_value()?;
            entries.push((key, value));
            match self.peek() {
                Some(',') => {
                    self.bump();
                }
                Some('}') => {
                    self.bump();
                    break;
                }
                _ => return Err(self.err("expected ',' or '}'")),
            }
        }
        Ok(JsonValue::Object(entries))
    }

    fn parse_array(&mut self) -> Result<JsonValue> {
        self.expect('[')?;
        let mut items = Vec::new();
        if self.peek() == Some(']') {
            self.bump();
            return Ok(JsonValue::Array(items));
        }
        loop {
            items.push(self.parse_value()?);
            match self.peek() {
                Some(',') => {
                    self.bump();
                }
                Some(']') => {
                    self.bump();
                    break;
                }
                _ => return Err(self.err("expected ',' or ']'")),
            }
        }
        Ok(JsonValue::Array(items))
    }

    fn parse_string(&mut self) -> Result<String> {
        self.expect('"')?;
        let mut out = String::new();
        loop {
            let c = self
                .bump()
                .ok_or_else(|| self.err("unterminated string"))?;
            match c {
                '"' => break,
                '\\' => {
                    let esc = self.bump().ok_or_else(|| self.err("unterminated escape"))?;
                    match esc {
                        '"' => out.push('"'),
                        '\\' => out.push('\\'),
                        '/' => out.push('/'),
                        'b' => out.push('\u{0008}'),
                        'f' => out.push('\u{000C}'),
                        'n' => out.push('\n'),
                        'r' => out.push('\r'),
                        't' => out.push('\t'),
                        'u' => out.push(self.parse_unicode_escape()?),
                        _ => return Err(self.err("invalid escape sequence")),
                    }
                }
                c => out.push(c),
            }
        }
        Ok(out)
    }

    fn parse_hex4(&mut self) -> Result<u32> {
        let mut value = 0u32;
        for _ in 0..4 {
            let c = self.bump().ok_or_else(|| self.err("truncated \\u escape"))?;
            let digit = c
                .to_digit(16)
                .ok_or_else(|| self.err("invalid hex digit in \\u escape"))?;
            value = value * 16 + digit;
        }
        Ok(value)
    }

    fn parse_unicode_escape(&mut self) -> Result<char> {
        let first = self.parse_hex4()?;
        if (0xD800..=0xDBFF).contains(&first) {
            if self.rest().starts_with("\\u") {
                self.pos += 2;
                let second = self.parse_hex4()?;
                if (0xDC00..=0xDFFF).contains(&second) {
                    let c = 0x10000 + ((first - 0xD800) << 10) + (second - 0xDC00);
                    return char::from_u32(c).ok_or_else(|| self.err("invalid surrogate pair"));
                }
            }
            return Err(self.err("unpaired UTF-16 surrogate in \\u escape"));
        }
        char::from_u32(first).ok_or_else(|| self.err("invalid \\u escape"))
    }

    fn parse_number(&mut self) -> Result<JsonValue> {
        let start = self.pos;
        let (remaining, text) =
            number_literal(self.rest()).map_err(|_| self.err("invalid number"))?;
        self.pos = self.input.len() - remaining.len();
        let _ = start;
        if text.contains('.') || text.contains('e') || text.contains('E') {
            let f: f64 = text
                .parse()
                .map_err(|_| self.err("malformed floating-point number"))?;
            Ok(JsonValue::Float(f))
        } else if let Ok(i) = text.parse::<i64>() {
            Ok(JsonValue::Int(i))
        } else {
            let u: u64 = text
                .parse()
                .map_err(|_| self.err("integer literal too large"))?;
            Ok(JsonValue::UInt(u))
        }
    }
}

fn number_literal(input: &str) -> IResult<&str, &str> {
    recognize(tuple((
        opt(nom_char('-')),
        alt((
            recognize(nom_char('0')),
            recognize(pair(one_of("123456789"), digit0)),
        )),
        opt(pair(nom_char('.'), digit1)),
        opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
    )))(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn encode(json: &str) -> Vec<u8> {
        let mut enc = Encoder::new();
        parse_into(json, &mut enc).unwrap();
        enc.finish().unwrap().to_vec()
    }

    #[test]
    fn parses_scalars_and_containers() {
        let bytes = encode(r#"{"a":1,"b":[2,3.5,"x",true,null]}"#);
        let root = Value::from_bytes_trusted(&bytes);
        let dict = root.as_dict().unwrap();
        assert_eq!(dict.get("a", None).to_i64(), 1);
        let arr = dict.get("b", None).as_array().unwrap();
        assert_eq!(arr.get(0).to_i64(), 2);
        assert_eq!(arr.get(1).to_f64(), 3.5);
        assert_eq!(arr.get(2).to_str(), "x");
        assert!(arr.get(3).to_bool());
        assert_eq!(arr.get(4).value_type(), crate::value::ValueType::Null);
    }

    #[test]
    fn parses_escaped_and_unicode_strings() {
        let bytes = encode(r#""line\nbreak é""#);
        let root = Value::from_bytes_trusted(&bytes);
        assert_eq!(root.to_str(), "line\nbreak \u{00e9}");
    }

    #[test]
    fn reports_byte_offset_on_syntax_error() {
        let mut enc = Encoder::new();
        let err = parse_into("{\"a\": }", &mut enc).unwrap_err();
        match err {
            Error::JSONError { offset, .. } => assert_eq!(offset, 6),
            other => panic!("expected JSONError, got {:?}", other),
        }
    }

    #[test]
    fn large_unsigned_integers_round_trip() {
        let bytes = encode("18446744073709551615");
        let root = Value::from_bytes_trusted(&bytes);
        assert_eq!(root.to_u64(), u64::MAX);
    }
}
