use fleece::builder::{Arg, Builder};
use fleece::delta::{apply_delta, create_delta, DeltaOptions};
use fleece::encoder::Encoder;
use fleece::json;
use fleece::mtree::MDict;
use fleece::value::Value;

fn encode_json(text: &str) -> Vec<u8> {
    let mut enc = Encoder::new();
    json::parse_json(text, &mut enc).unwrap();
    enc.finish().unwrap().to_vec()
}

#[test]
fn create_delta_produces_the_documented_compact_shape() {
    let old_bytes = encode_json(r#"{"a":1,"b":2}"#);
    let new_bytes = encode_json(r#"{"a":1,"b":3,"c":4}"#);
    let old = Value::from_bytes_trusted(&old_bytes);
    let new = Value::from_bytes_trusted(&new_bytes);
    let delta = create_delta(&old, None, &new, None, DeltaOptions::default()).unwrap();
    let delta_bytes = encode_json(&delta);
    let delta_value = Value::from_bytes_trusted(&delta_bytes);
    let delta_dict = delta_value.as_dict().unwrap();
    assert_eq!(delta_dict.get("c", None).as_array().unwrap().get(0).to_i64(), 4);
    assert_eq!(delta_dict.get("b", None).as_array().unwrap().get(1).to_i64(), 3);
}

#[test]
fn apply_delta_reconstructs_the_new_tree() {
    let old_bytes = encode_json(r#"{"a":1,"b":2}"#);
    let old = Value::from_bytes_trusted(&old_bytes);
    let delta_json = r#"{"b":[0,3],"c":[4]}"#;

    let mut enc = Encoder::new();
    apply_delta(&old, None, delta_json, &mut enc).unwrap();
    let result_bytes = enc.finish().unwrap().to_vec();
    let result = Value::from_bytes_trusted(&result_bytes);
    let dict = result.as_dict().unwrap();
    assert_eq!(dict.get("a", None).to_i64(), 1);
    assert_eq!(dict.get("b", None).to_i64(), 3);
    assert_eq!(dict.get("c", None).to_i64(), 4);
}

#[test]
fn delta_of_identical_trees_is_empty() {
    let bytes = encode_json(r#"{"a":1,"b":[2,3]}"#);
    let value = Value::from_bytes_trusted(&bytes);
    assert!(create_delta(&value, None, &value, None, DeltaOptions::default()).is_none());
}

#[test]
fn mutable_dict_amends_over_its_immutable_base() {
    let base_bytes = encode_json(r#"{"x":1}"#);
    let base_root = Value::from_bytes_trusted(&base_bytes);
    let base_dict = base_root.as_dict().unwrap();

    let mdict = MDict::from_dict(base_dict);
    mdict.set("y", fleece::mtree::MValue::from(2i64), None);

    let mut amend = Encoder::new_amending(base_bytes.len());
    mdict.encode_to(&mut amend, None).unwrap();
    let amended_bytes = amend.finish().unwrap().to_vec();

    let mut full = base_bytes.clone();
    full.extend_from_slice(&amended_bytes);
    let root = Value::from_bytes_trusted(&full);
    let dict = root.as_dict().unwrap();
    assert_eq!(dict.get("x", None).to_i64(), 1);
    assert_eq!(dict.get("y", None).to_i64(), 2);
}

#[test]
fn builder_merges_format_holes_into_an_existing_mutable_dict() {
    let dict: MDict = MDict::new();
    dict.set("x", fleece::mtree::MValue::from(1i64), None);
    Builder::merge_into_dict(&dict, "{ y: %d }", &[Arg::Int(2)], None).unwrap();

    let mut enc = Encoder::new();
    dict.encode_to(&mut enc, None).unwrap();
    let bytes = enc.finish().unwrap().to_vec();
    let root = Value::from_bytes_trusted(&bytes);
    let d = root.as_dict().unwrap();
    assert_eq!(d.get("x", None).to_i64(), 1);
    assert_eq!(d.get("y", None).to_i64(), 2);
}
