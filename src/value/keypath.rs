//
// Copyright 2020 Fleece Developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//

//! Compact key-path specifiers (§4.4/§6.4): `foo.bar[2][-3].baz`, with an
//! optional leading `$.` and backslash escapes for `.`, `[`, `$` at the
//! start of a component.

use crate::error::{Error, Result};
use crate::shared_keys::SharedKeys;
use crate::value::{tag, Value, ValueType};

/// One step of a compiled key path: a dict key or an array index (negative
/// indices count from the end).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Step {
    Key(String),
    Index(i32),
}

/// A compiled key-path specifier, ready to be evaluated against any root
/// value without re-parsing.
#[derive(Clone, Debug)]
pub struct KeyPath {
    steps: Vec<Step>,
}

impl KeyPath {
    /// Compiles `spec` into a sequence of steps. Returns [`Error::PathError`]
    /// on a malformed specifier (unterminated `[`, non-numeric index, empty
    /// component).
    pub fn new(spec: &str) -> Result<KeyPath> {
        Ok(KeyPath {
            steps: parse(spec)?,
        })
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Walks the steps from `root`. Any miss (wrong container kind, index
    /// out of range, missing key) yields `Undefined` immediately -- per §4.4,
    /// re-evaluating a path that lands on `Undefined` stays `Undefined`.
    pub fn eval<'a>(&self, root: Value<'a>, shared_keys: Option<&'a SharedKeys>) -> Value<'a> {
        let mut current = root;
        for step in &self.steps {
            current = match step {
                Step::Key(k) => match current.as_dict() {
                    Some(d) => d.get(k, shared_keys),
                    None => undefined(),
                },
                Step::Index(idx) => match current.as_array() {
                    Some(a) => {
                        let len = a.len() as i64;
                        let real = if *idx < 0 {
                            len + i64::from(*idx)
                        } else {
                            i64::from(*idx)
                        };
                        if real < 0 || real >= len {
                            undefined()
                        } else {
                            a.get(real as usize)
                        }
                    }
                    None => undefined(),
                },
            };
            if current.value_type() == ValueType::Undefined {
                return current;
            }
        }
        current
    }
}

fn undefined<'a>() -> Value<'a> {
    Value::at(&tag::constants::UNDEFINED, 0, None)
}

fn parse(spec: &str) -> Result<Vec<Step>> {
    let mut s = spec;
    if let Some(rest) = s.strip_prefix("$.") {
        s = rest;
    } else if s == "$" {
        s = "";
    }

    let chars: Vec<char> = s.chars().collect();
    let n = chars.len();
    let mut i = 0;
    let mut steps = Vec::new();

    while i < n {
        if chars[i] == '[' {
            i += 1;
            let start = i;
            while i < n && chars[i] != ']' {
                i += 1;
            }
            if i >= n {
                return Err(Error::PathError(format!(
                    "unterminated '[' in key path {:?}",
                    spec
                )));
            }
            let idx_str: String = chars[start..i].iter().collect();
            let idx: i32 = idx_str.trim().parse().map_err(|_| {
                Error::PathError(format!("non-numeric array index {:?} in {:?}", idx_str, spec))
            })?;
            steps.push(Step::Index(idx));
            i += 1;
            continue;
        }

        let mut out = String::new();
        while i < n {
            let c = chars[i];
            if c == '\\' && i + 1 < n && matches!(chars[i + 1], '.' | '[' | '$') && out.is_empty() {
                out.push(chars[i + 1]);
                i += 2;
                continue;
            }
            if c == '.' || c == '[' {
                break;
            }
            out.push(c);
            i += 1;
        }
        if out.is_empty() {
            return Err(Error::PathError(format!(
                "empty path component in {:?}",
                spec
            )));
        }
        steps.push(Step::Key(out));
        if i < n && chars[i] == '.' {
            i += 1;
        }
    }

    if steps.is_empty() {
        return Err(Error::PathError(format!("empty key path {:?}", spec)));
    }
    Ok(steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::Encoder;

    #[test]
    fn parses_compact_path_with_negative_index() {
        let kp = KeyPath::new("foo.bar[2][-3].baz").unwrap();
        assert_eq!(
            kp.steps(),
            &[
                Step::Key("foo".into()),
                Step::Key("bar".into()),
                Step::Index(2),
                Step::Index(-3),
                Step::Key("baz".into()),
            ]
        );
    }

    #[test]
    fn leading_dollar_dot_is_ignored() {
        let kp = KeyPath::new("$.items[-1].name").unwrap();
        assert_eq!(
            kp.steps(),
            &[
                Step::Key("items".into()),
                Step::Index(-1),
                Step::Key("name".into()),
            ]
        );
    }

    #[test]
    fn rejects_unterminated_bracket() {
        assert!(KeyPath::new("foo[1").is_err());
    }

    #[test]
    fn negative_index_from_end() {
        let mut enc = Encoder::new();
        enc.begin_dict(None).unwrap();
        enc.write_key("items").unwrap();
        enc.begin_array(None).unwrap();
        enc.begin_dict(None).unwrap();
        enc.write_key("name").unwrap();
        enc.write_string("a").unwrap();
        enc.end_dict().unwrap();
        enc.begin_dict(None).unwrap();
        enc.write_key("name").unwrap();
        enc.write_string("b").unwrap();
        enc.end_dict().unwrap();
        enc.end_array().unwrap();
        enc.end_dict().unwrap();
        let bytes = enc.finish().unwrap().to_vec();
        let root = Value::from_bytes_trusted(&bytes);

        let kp = KeyPath::new("$.items[-1].name").unwrap();
        assert_eq!(kp.eval(root, None).to_str(), "b");
    }

    #[test]
    fn missing_path_yields_undefined() {
        let mut enc = Encoder::new();
        enc.begin_dict(None).unwrap();
        enc.write_key("a").unwrap();
        enc.write_i64(1).unwrap();
        enc.end_dict().unwrap();
        let bytes = enc.finish().unwrap().to_vec();
        let root = Value::from_bytes_trusted(&bytes);

        let kp = KeyPath::new("a.b.c").unwrap();
        assert_eq!(kp.eval(root, None).value_type(), ValueType::Undefined);
    }
}
