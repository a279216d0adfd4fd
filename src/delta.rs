//
// Copyright 2020 Fleece Developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//

//! Structural JSON delta between two Fleece trees (§4.8), grounded in
//! `Delta.cc`'s `writeDelta`/`ApplyDelta` but re-expressed without a
//! `diff_match_patch` dependency: the text sub-diff below finds only a
//! common prefix/suffix run rather than a full Myers diff, which is enough
//! to shrink a long-string edit and still round-trips exactly through
//! [`apply_delta`].
//!
//! Delta shape per entry: `[newValue]` (addition), `[]` (deletion, compact
//! mode) or `[oldValue,0,0]` (deletion, compatible mode), `[0,newValue]`
//! (replacement, compact) or `[oldValue,newValue]` (replacement,
//! compatible), `[patch,0,2]` (text patch). A dict whose entries are
//! themselves deltas represents a nested modification; entries absent from
//! the delta are unchanged.

use std::collections::BTreeMap;

use crate::encoder::Encoder;
use crate::error::{Error, Result};
use crate::json::{self, JsonWriteOptions};
use crate::shared_keys::SharedKeys;
use crate::value::{Value, ValueType};

const MIN_STRING_DIFF_LEN: usize = 60;
const DELETION_CODE: i64 = 0;
const TEXT_DIFF_CODE: i64 = 2;

/// Per-call configuration for [`create_delta`]/[`apply_delta`] (§9 flags
/// the original's compile-time switch as something that "should become
/// per-call configuration").
#[derive(Clone, Copy, Debug, Default)]
pub struct DeltaOptions {
    /// JsonDiffPatch-compatible encoding: deletions retain the old value
    /// (`[old,0,0]` instead of `[]`) and replacements retain it too
    /// (`[old,new]` instead of `[0,new]`).
    pub compatible: bool,
}

fn canonical(value: &Value<'_>, shared_keys: Option<&SharedKeys>) -> String {
    json::to_json(value, shared_keys, JsonWriteOptions { canonical: true })
}

fn is_numeric(t: ValueType) -> bool {
    matches!(
        t,
        ValueType::Int | ValueType::UInt | ValueType::Float32 | ValueType::Float64
    )
}

fn values_equal<'a, 'b>(
    a: &Value<'a>,
    a_sk: Option<&'a SharedKeys>,
    b: &Value<'b>,
    b_sk: Option<&'b SharedKeys>,
) -> bool {
    let (at, bt) = (a.value_type(), b.value_type());
    if is_numeric(at) && is_numeric(bt) {
        return a.to_f64() == b.to_f64();
    }
    if at != bt {
        return false;
    }
    match at {
        ValueType::Undefined | ValueType::Null => true,
        ValueType::Bool => a.to_bool() == b.to_bool(),
        ValueType::String => a.to_str() == b.to_str(),
        ValueType::Data => a.to_data() == b.to_data(),
        ValueType::Array => {
            let (aa, ba) = (a.as_array().unwrap(), b.as_array().unwrap());
            aa.len() == ba.len()
                && aa
                    .iter()
                    .zip(ba.iter())
                    .all(|(x, y)| values_equal(&x, a_sk, &y, b_sk))
        }
        ValueType::Dict => {
            let (ad, bd) = (a.as_dict().unwrap(), b.as_dict().unwrap());
            ad.len() == bd.len()
                && ad.iter_with_keys(a_sk).all(|(k, v)| {
                    let other = bd.get(k, b_sk);
                    other.value_type() != ValueType::Undefined && values_equal(&v, a_sk, &other, b_sk)
                })
        }
        ValueType::Int | ValueType::UInt | ValueType::Float32 | ValueType::Float64 => unreachable!(),
    }
}

/// Finds a common prefix/suffix run between `old` and `new` and encodes the
/// edit as `len=` / `len-` / `len+text|` tokens (byte lengths, char-boundary
/// safe since the split points come from a shared char walk). Returns `None`
/// if the new string is too short to bother, or the patch doesn't actually
/// shrink the payload.
fn create_string_delta(old: &str, new: &str, compatible: bool) -> Option<String> {
    if new.len() < MIN_STRING_DIFF_LEN || (compatible && old.len() > MIN_STRING_DIFF_LEN) {
        return None;
    }
    let mut old_chars = old.char_indices();
    let mut new_chars = new.char_indices();
    let mut prefix = 0;
    loop {
        let a = old_chars.clone().next();
        let b = new_chars.clone().next();
        match (a, b) {
            (Some((_, ca)), Some((_, cb))) if ca == cb => {
                prefix += ca.len_utf8();
                old_chars.next();
                new_chars.next();
            }
            _ => break,
        }
    }
    let max_suffix = old.len().min(new.len()) - prefix;
    let mut suffix = 0;
    let mut old_rev = old[prefix..].chars().rev();
    let mut new_rev = new[prefix..].chars().rev();
    loop {
        if suffix >= max_suffix {
            break;
        }
        let a = old_rev.clone().next();
        let b = new_rev.clone().next();
        match (a, b) {
            (Some(ca), Some(cb)) if ca == cb => {
                suffix += ca.len_utf8();
                old_rev.next();
                new_rev.next();
            }
            _ => break,
        }
    }

    let old_mid = &old[prefix..old.len() - suffix];
    let new_mid = &new[prefix..new.len() - suffix];

    let mut patch = String::new();
    if prefix > 0 {
        patch.push_str(&format!("{}=", prefix));
    }
    if !old_mid.is_empty() {
        patch.push_str(&format!("{}-", old_mid.len()));
    }
    if !new_mid.is_empty() {
        patch.push_str(&format!("{}+{}|", new_mid.len(), new_mid));
    }
    if suffix > 0 {
        patch.push_str(&format!("{}=", suffix));
    }
    if patch.len() + 6 >= new.len() {
        return None;
    }
    Some(patch)
}

/// Inverse of [`create_string_delta`].
fn apply_string_delta(old: &str, diff: &str) -> Result<String> {
    let old = old.as_bytes();
    let mut out = String::new();
    let mut pos = 0usize;
    let bytes = diff.as_bytes();
    let mut i = 0usize;
    while i < bytes.len() {
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i == start {
            return Err(Error::InvalidData("expected a length in text delta"));
        }
        let len: usize = diff[start..i]
            .parse()
            .map_err(|_| Error::InvalidData("malformed length in text delta"))?;
        let op = bytes
            .get(i)
            .copied()
            .ok_or(Error::InvalidData("truncated text delta"))?;
        i += 1;
        match op {
            b'=' => {
                if pos + len > old.len() {
                    return Err(Error::InvalidData("invalid length in text delta"));
                }
                out.push_str(
                    std::str::from_utf8(&old[pos..pos + len])
                        .map_err(|_| Error::InvalidData("text delta split a UTF-8 character"))?,
                );
                pos += len;
            }
            b'-' => {
                pos += len;
            }
            b'+' => {
                if i + len > bytes.len() {
                    return Err(Error::InvalidData("truncated insertion in text delta"));
                }
                out.push_str(
                    std::str::from_utf8(&bytes[i..i + len])
                        .map_err(|_| Error::InvalidData("text delta split a UTF-8 character"))?,
                );
                i += len;
                if bytes.get(i).copied() != Some(b'|') {
                    return Err(Error::InvalidData("missing insertion delimiter in text delta"));
                }
                i += 1;
            }
            _ => return Err(Error::InvalidData("unknown op in text delta")),
        }
    }
    if pos != old.len() {
        return Err(Error::InvalidData("length mismatch in text delta"));
    }
    Ok(out)
}

/// Returns the JSON fragment for the diff between `old` and `new`, or
/// `None` if they're equal (no entry should appear for this position).
fn diff_value<'o, 'n>(
    old: &Value<'o>,
    old_sk: Option<&'o SharedKeys>,
    new: &Value<'n>,
    new_sk: Option<&'n SharedKeys>,
    opts: DeltaOptions,
) -> Option<String> {
    let old_absent = old.value_type() == ValueType::Undefined;
    let new_absent = new.value_type() == ValueType::Undefined;
    if old_absent && new_absent {
        return None;
    }
    if old_absent {
        return Some(format!("[{}]", canonical(new, new_sk)));
    }
    if new_absent {
        return Some(if opts.compatible {
            format!("[{},0,0]", canonical(old, old_sk))
        } else {
            "[]".to_string()
        });
    }

    if old.value_type() == new.value_type() {
        if old.value_type() == ValueType::Dict {
            return diff_dict(
                old.as_dict().unwrap(),
                old_sk,
                new.as_dict().unwrap(),
                new_sk,
                opts,
            );
        }
        if values_equal(old, old_sk, new, new_sk) {
            return None;
        }
        if old.value_type() == ValueType::String {
            if let Some(patch) = create_string_delta(old.to_str(), new.to_str(), opts.compatible) {
                let mut escaped = String::new();
                crate::json::write_json_string(&patch, &mut escaped);
                return Some(format!("[{},0,2]", escaped));
            }
        }
    }

    Some(if opts.compatible {
        format!("[{},{}]", canonical(old, old_sk), canonical(new, new_sk))
    } else {
        format!("[0,{}]", canonical(new, new_sk))
    })
}

fn diff_dict<'o, 'n>(
    old: crate::value::Dict<'o>,
    old_sk: Option<&'o SharedKeys>,
    new: crate::value::Dict<'n>,
    new_sk: Option<&'n SharedKeys>,
    opts: DeltaOptions,
) -> Option<String> {
    let mut changes: BTreeMap<String, String> = BTreeMap::new();
    let mut old_keys_seen = 0usize;
    for (key, new_value) in new.iter_with_keys(new_sk) {
        let old_value = old.get(key, old_sk);
        if old_value.value_type() != ValueType::Undefined {
            old_keys_seen += 1;
        }
        if let Some(fragment) = diff_value(&old_value, old_sk, &new_value, new_sk, opts) {
            changes.insert(key.to_string(), fragment);
        }
    }
    if old_keys_seen < old.len() {
        for (key, old_value) in old.iter_with_keys(old_sk) {
            if new.get(key, new_sk).value_type() == ValueType::Undefined {
                let undefined = Value::at(&crate::value::tag::constants::UNDEFINED, 0, None);
                if let Some(fragment) = diff_value(&old_value, old_sk, &undefined, new_sk, opts) {
                    changes.insert(key.to_string(), fragment);
                }
            }
        }
    }
    if changes.is_empty() {
        return None;
    }
    let mut out = String::from("{");
    for (i, (k, v)) in changes.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        crate::json::write_json_string(k, &mut out);
        out.push(':');
        out.push_str(v);
    }
    out.push('}');
    Some(out)
}

/// Computes the delta turning `old` into `new`, as JSON text. `None` if the
/// two trees are equal (§8 invariant 8, "delta identity").
pub fn create_delta<'o, 'n>(
    old: &Value<'o>,
    old_shared_keys: Option<&'o SharedKeys>,
    new: &Value<'n>,
    new_shared_keys: Option<&'n SharedKeys>,
    opts: DeltaOptions,
) -> Option<String> {
    diff_value(old, old_shared_keys, new, new_shared_keys, opts)
}

fn is_delta_deletion(value: &Value<'_>) -> bool {
    match value.as_array() {
        Some(a) => a.is_empty() || (a.len() == 3 && a.get(2).to_i64() == DELETION_CODE),
        None => false,
    }
}

/// Applies a delta produced by [`create_delta`] (in either mode) to `old`,
/// writing the resulting tree into `enc`. Raises [`Error::InvalidData`] on
/// any structural mismatch between `old` and `delta_json` (§7, §8 invariant
/// 7 "delta law").
pub fn apply_delta(
    old: &Value<'_>,
    shared_keys: Option<&SharedKeys>,
    delta_json: &str,
    enc: &mut Encoder,
) -> Result<()> {
    let mut delta_enc = Encoder::new();
    crate::json::parse_json(delta_json, &mut delta_enc)?;
    let delta_bytes = delta_enc.finish()?.to_vec();
    let delta_value = Value::from_bytes_trusted(&delta_bytes);
    apply_value(Some(old), shared_keys, &delta_value, enc)
}

fn apply_value<'o, 'd>(
    old: Option<&Value<'o>>,
    shared_keys: Option<&'o SharedKeys>,
    delta: &Value<'d>,
    enc: &mut Encoder,
) -> Result<()> {
    match delta.value_type() {
        ValueType::Array => {
            let arr = delta.as_array().unwrap();
            match arr.len() {
                0 => {
                    if old.is_none() {
                        return Err(Error::InvalidData("invalid deletion in delta"));
                    }
                    enc.write_undefined()
                }
                1 => {
                    if old.is_some() {
                        return Err(Error::InvalidData("invalid insertion in delta"));
                    }
                    enc.write_raw_value(&arr.get(0), None)
                }
                2 => {
                    if old.is_none() {
                        return Err(Error::InvalidData("invalid replacement in delta"));
                    }
                    enc.write_raw_value(&arr.get(1), None)
                }
                3 => match arr.get(2).to_i64() {
                    DELETION_CODE => {
                        if old.is_none() {
                            return Err(Error::InvalidData("invalid deletion in delta"));
                        }
                        enc.write_undefined()
                    }
                    TEXT_DIFF_CODE => {
                        let old = old.ok_or(Error::InvalidData("invalid text replace in delta"))?;
                        if old.value_type() != ValueType::String {
                            return Err(Error::InvalidData("invalid text replace in delta"));
                        }
                        let diff = arr.get(0);
                        if diff.value_type() != ValueType::String || diff.to_str().is_empty() {
                            return Err(Error::InvalidData("invalid text diff in delta"));
                        }
                        let new_str = apply_string_delta(old.to_str(), diff.to_str())?;
                        enc.write_string(&new_str)
                    }
                    _ => Err(Error::InvalidData("unknown mode in delta")),
                },
                _ => Err(Error::InvalidData("bad array arity in delta")),
            }
        }
        ValueType::Dict => {
            let delta_dict = delta.as_dict().unwrap();
            let old_dict = old
                .and_then(|v| v.as_dict())
                .ok_or(Error::InvalidData("invalid {} in delta"))?;

            enc.begin_dict(Some(old_dict.len()))?;
            let mut delta_keys_used = 0usize;
            for (key, old_value) in old_dict.iter_with_keys(shared_keys) {
                let value_delta = delta_dict.get(key, None);
                if value_delta.value_type() != ValueType::Undefined {
                    delta_keys_used += 1;
                    if is_delta_deletion(&value_delta) {
                        continue;
                    }
                    enc.write_key(key)?;
                    apply_value(Some(&old_value), shared_keys, &value_delta, enc)?;
                } else {
                    enc.write_key(key)?;
                    if enc.is_amending() && old_value.offset() < enc.base_len() {
                        enc.write_base_ref(old_value.offset())?;
                    } else {
                        enc.write_raw_value(&old_value, shared_keys)?;
                    }
                }
            }
            if delta_keys_used < delta_dict.len() {
                for (key, value_delta) in delta_dict.iter_with_keys(None) {
                    if old_dict.get(key, shared_keys).value_type() == ValueType::Undefined {
                        enc.write_key(key)?;
                        apply_value(None, shared_keys, &value_delta, enc)?;
                    }
                }
            }
            enc.end_dict()
        }
        _ => Err(Error::InvalidData("invalid value type in delta")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::Encoder;

    fn encode_json(json: &str) -> Vec<u8> {
        let mut enc = Encoder::new();
        crate::json::parse_json(json, &mut enc).unwrap();
        enc.finish().unwrap().to_vec()
    }

    #[test]
    fn identical_trees_produce_no_delta() {
        let bytes = encode_json(r#"{"a":1,"b":2}"#);
        let v = Value::from_bytes_trusted(&bytes);
        assert!(create_delta(&v, None, &v, None, DeltaOptions::default()).is_none());
    }

    #[test]
    fn scenario_modify_and_insert() {
        let old_bytes = encode_json(r#"{"a":1,"b":2}"#);
        let new_bytes = encode_json(r#"{"a":1,"b":3,"c":4}"#);
        let old = Value::from_bytes_trusted(&old_bytes);
        let new = Value::from_bytes_trusted(&new_bytes);
        let delta = create_delta(&old, None, &new, None, DeltaOptions::default()).unwrap();
        assert_eq!(delta, r#"{"b":[0,3],"c":[4]}"#);
    }

    #[test]
    fn scenario_apply_delta_reproduces_new() {
        let old_bytes = encode_json(r#"{"a":1,"b":2}"#);
        let old = Value::from_bytes_trusted(&old_bytes);
        let mut enc = Encoder::new();
        apply_delta(&old, None, r#"{"b":[0,3],"c":[4]}"#, &mut enc).unwrap();
        let out = enc.finish().unwrap().to_vec();
        let result = Value::from_bytes_trusted(&out).as_dict().unwrap();
        assert_eq!(result.get("a", None).to_i64(), 1);
        assert_eq!(result.get("b", None).to_i64(), 3);
        assert_eq!(result.get("c", None).to_i64(), 4);
    }

    #[test]
    fn deletion_round_trips() {
        let old_bytes = encode_json(r#"{"a":1,"b":2}"#);
        let old = Value::from_bytes_trusted(&old_bytes);
        let new_bytes = encode_json(r#"{"a":1}"#);
        let new = Value::from_bytes_trusted(&new_bytes);
        let delta = create_delta(&old, None, &new, None, DeltaOptions::default()).unwrap();
        assert_eq!(delta, r#"{"b":[]}"#);

        let mut enc = Encoder::new();
        apply_delta(&old, None, &delta, &mut enc).unwrap();
        let out = enc.finish().unwrap().to_vec();
        let result = Value::from_bytes_trusted(&out).as_dict().unwrap();
        assert_eq!(result.get("a", None).to_i64(), 1);
        assert_eq!(result.get("b", None).value_type(), ValueType::Undefined);
    }

    #[test]
    fn long_string_edit_uses_text_patch() {
        let old_str = "x".repeat(80);
        let mut new_str = old_str.clone();
        new_str.push_str("-tail");
        let old_bytes = encode_json(&format!("{:?}", old_str));
        let new_bytes = encode_json(&format!("{:?}", new_str));
        let old = Value::from_bytes_trusted(&old_bytes);
        let new = Value::from_bytes_trusted(&new_bytes);
        let delta = create_delta(&old, None, &new, None, DeltaOptions::default()).unwrap();
        assert!(delta.contains(",0,2]"), "expected a text-patch delta, got {}", delta);

        let mut enc = Encoder::new();
        apply_delta(&old, None, &delta, &mut enc).unwrap();
        let out = enc.finish().unwrap().to_vec();
        assert_eq!(Value::from_bytes_trusted(&out).to_str(), new_str);
    }

    #[test]
    fn nested_dict_modification_recurses() {
        let old_bytes = encode_json(r#"{"outer":{"x":1,"y":2}}"#);
        let new_bytes = encode_json(r#"{"outer":{"x":1,"y":5}}"#);
        let old = Value::from_bytes_trusted(&old_bytes);
        let new = Value::from_bytes_trusted(&new_bytes);
        let delta = create_delta(&old, None, &new, None, DeltaOptions::default()).unwrap();
        assert_eq!(delta, r#"{"outer":{"y":[0,5]}}"#);
    }

    #[test]
    fn compatible_mode_retains_old_values() {
        let old_bytes = encode_json(r#"{"a":1}"#);
        let new_bytes = encode_json(r#"{"a":2}"#);
        let old = Value::from_bytes_trusted(&old_bytes);
        let new = Value::from_bytes_trusted(&new_bytes);
        let opts = DeltaOptions { compatible: true };
        let delta = create_delta(&old, None, &new, None, opts).unwrap();
        assert_eq!(delta, r#"{"a":[1,2]}"#);
    }
}
