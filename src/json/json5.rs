//
// Copyright 2020 Fleece Developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//

//! Character-level JSON5 -> JSON rewriter (§4.6), ported algorithm-for-
//! algorithm from `examples/original_source/Fleece/JSON5.cc`: single forward
//! pass, one character of lookahead, no AST. It does not validate
//! number/string body correctness beyond what affects JSON tokenization,
//! matching the source's explicit non-goal.

use std::iter::Peekable;
use std::str::CharIndices;

use crate::error::{Error, Result};

struct Converter<'a> {
    input: &'a str,
    chars: Peekable<CharIndices<'a>>,
    out: String,
}

/// Rewrites JSON5 `input` into conforming JSON text.
pub fn convert_json5_to_json(input: &str) -> Result<String> {
    let mut conv = Converter {
        input,
        chars: input.char_indices().peekable(),
        out: String::with_capacity(input.len()),
    };
    conv.parse_value()?;
    if conv.peek_token()?.is_some() {
        return Err(conv.fail("unexpected characters after end of value"));
    }
    Ok(conv.out)
}

impl<'a> Converter<'a> {
    fn pos(&mut self) -> usize {
        self.chars.peek().map(|&(i, _)| i).unwrap_or(self.input.len())
    }

    fn fail(&mut self, message: &str) -> Error {
        Error::JSONError {
            offset: self.pos(),
            message: message.to_string(),
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().map(|&(_, c)| c)
    }

    fn get(&mut self) -> Result<char> {
        match self.chars.next() {
            Some((_, c)) => Ok(c),
            None => Err(Error::JSONError {
                offset: self.input.len(),
                message: "unexpected end of JSON5 input".to_string(),
            }),
        }
    }

    /// Skips whitespace and `//`/`/* */` comments, returning the next
    /// significant character without consuming it (or `None` at EOF).
    fn peek_token(&mut self) -> Result<Option<char>> {
        loop {
            match self.peek() {
                None => return Ok(None),
                Some(c) if c.is_whitespace() => {
                    self.get()?;
                }
                Some('/') => self.skip_comment()?,
                Some(c) => return Ok(Some(c)),
            }
        }
    }

    fn skip_comment(&mut self) -> Result<()> {
        self.get()?; // leading '/'
        match self.get()? {
            '/' => {
                while let Some(c) = self.peek() {
                    if c == '\n' || c == '\r' {
                        break;
                    }
                    self.get()?;
                }
                Ok(())
            }
            '*' => {
                let mut prev_was_star = false;
                loop {
                    let c = self.get()?;
                    if prev_was_star && c == '/' {
                        return Ok(());
                    }
                    prev_was_star = c == '*';
                }
            }
            _ => Err(self.fail("syntax error after '/'")),
        }
    }

    fn parse_value(&mut self) -> Result<()> {
        match self.peek_token()? {
            Some('n') => self.parse_constant("null"),
            Some('t') => self.parse_constant("true"),
            Some('f') => self.parse_constant("false"),
            Some('-') | Some('+') | Some('.') => self.parse_number(),
            Some(c) if c.is_ascii_digit() => self.parse_number(),
            Some('"') | Some('\'') => self.parse_string(),
            Some('[') => self.parse_sequence(false),
            Some('{') => self.parse_sequence(true),
            _ => Err(self.fail("invalid start of JSON5 value")),
        }
    }

    fn parse_constant(&mut self, ident: &str) -> Result<()> {
        for expected in ident.chars() {
            let c = self.get()?;
            if c != expected {
                return Err(self.fail("unknown identifier"));
            }
        }
        if let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '$' || c == '_' {
                return Err(self.fail("unknown identifier"));
            }
        }
        self.out.push_str(ident);
        Ok(())
    }

    fn parse_number(&mut self) -> Result<()> {
        let c = self.get()?;
        if c == '.' {
            self.out.push_str("0.");
        } else if c != '+' {
            self.out.push(c);
        }
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '-' | '+') {
                self.out.push(self.get()?);
            } else {
                break;
            }
        }
        Ok(())
    }

    fn parse_string(&mut self) -> Result<()> {
        self.out.push('"');
        let quote = self.get()?;
        loop {
            let c = self.get()?;
            if c == quote {
                break;
            }
            if c == '"' {
                // Escape a double-quote appearing inside a single-quoted string.
                self.out.push_str("\\\"");
            } else if c == '\\' {
                let esc = self.get()?;
                if esc == '\n' || esc == '\r' {
                    // Line-continuation backslash: drop both characters.
                } else {
                    if esc != '\'' {
                        self.out.push('\\');
                    }
                    self.out.push(esc);
                }
            } else {
                self.out.push(c);
            }
        }
        self.out.push('"');
        Ok(())
    }

    fn parse_sequence(&mut self, is_object: bool) -> Result<()> {
        self.out.push(self.get()?); // opening bracket/brace
        let close = if is_object { '}' } else { ']' };
        let mut first = true;
        loop {
            match self.peek_token()? {
                Some(c) if c == close => break,
                None => return Err(self.fail("unterminated array/object")),
                _ => {}
            }
            if first {
                first = false;
            } else {
                self.out.push(',');
            }

            if is_object {
                self.parse_key()?;
                match self.peek_token()? {
                    Some(':') => self.out.push(self.get()?),
                    _ => return Err(self.fail("expected ':' after key")),
                };
            }

            self.parse_value()?;

            match self.peek_token()? {
                Some(',') => {
                    self.get()?;
                }
                Some(c) if c == close => {}
                _ => return Err(self.fail("unexpected token after array/object item")),
            }
        }
        self.out.push(self.get()?); // closing bracket/brace
        Ok(())
    }

    /// An object key: a quoted string, or a bare identifier (rewritten as a
    /// quoted string).
    fn parse_key(&mut self) -> Result<()> {
        match self.peek_token()? {
            Some('"') | Some('\'') => self.parse_string(),
            Some(c) if c.is_alphabetic() || c == '_' || c == '$' => {
                self.out.push('"');
                self.out.push(self.get()?);
                while let Some(c) = self.peek() {
                    if c.is_alphanumeric() || c == '_' {
                        self.out.push(self.get()?);
                    } else {
                        break;
                    }
                }
                self.out.push('"');
                Ok(())
            }
            _ => Err(self.fail("invalid key")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_doubled_single_quotes_as_malformed() {
        // 'it''s here' isn't valid JSON5 (no doubled-quote escaping): the
        // string ends at the first doubled quote, leaving trailing garbage.
        let err = convert_json5_to_json("{foo: 'it''s here'}").unwrap_err();
        assert!(matches!(err, Error::JSONError { .. }));
    }

    #[test]
    fn rewrites_single_quoted_strings_and_bare_keys() {
        let json = convert_json5_to_json("{foo: 'bar', baz: 1}").unwrap();
        assert_eq!(json, r#"{"foo":"bar","baz":1}"#);
    }

    #[test]
    fn handles_comments_and_trailing_commas() {
        let json = convert_json5_to_json("[1, 2, /* trailing */ 3,]").unwrap();
        assert_eq!(json, "[1,2,3]");
    }

    #[test]
    fn handles_leading_plus_and_bare_dot_numbers() {
        let json = convert_json5_to_json("[+1, .5]").unwrap();
        assert_eq!(json, "[1,0.5]");
    }

    #[test]
    fn line_comment_and_identifier_values() {
        let json = convert_json5_to_json("// a comment\n{a: true, b: null}").unwrap();
        assert_eq!(json, r#"{"a":true,"b":null}"#);
    }
}
