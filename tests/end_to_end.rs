use fleece::encoder::Encoder;
use fleece::json;
use fleece::value::keypath::KeyPath;
use fleece::value::Value;
use fleece::SharedKeys;

fn encode_json(text: &str) -> Vec<u8> {
    let mut enc = Encoder::new();
    json::parse_json(text, &mut enc).unwrap();
    enc.finish().unwrap().to_vec()
}

#[test]
fn json_round_trip_preserves_floats_and_nesting() {
    let bytes = encode_json(r#"{"a":1,"b":[2,3.5,"x"]}"#);
    let root = Value::from_bytes_trusted(&bytes);
    let dict = root.as_dict().unwrap();
    let b = dict.get("b", None).as_array().unwrap();
    assert_eq!(b.get(1).to_f64(), 3.5);
}

#[test]
fn dict_keys_decode_in_sorted_order() {
    let bytes = encode_json(r#"{"z":1,"a":2}"#);
    let root = Value::from_bytes_trusted(&bytes);
    let keys: Vec<&str> = root
        .as_dict()
        .unwrap()
        .iter_with_keys(None)
        .map(|(k, _)| k)
        .collect();
    assert_eq!(keys, vec!["a", "z"]);
}

#[test]
fn json5_template_with_comments_and_trailing_commas_parses() {
    let text = r#"{
        // a comment
        name: 'Alice',
        tags: ["x", "y",],
    }"#;
    let mut enc = Encoder::new();
    json::parse_json5(text, &mut enc).unwrap();
    let bytes = enc.finish().unwrap().to_vec();
    let root = Value::from_bytes_trusted(&bytes);
    let dict = root.as_dict().unwrap();
    assert_eq!(dict.get("name", None).to_str(), "Alice");
    assert_eq!(dict.get("tags", None).as_array().unwrap().len(), 2);
}

#[test]
fn key_path_evaluates_negative_array_index() {
    let bytes = encode_json(r#"{"items":[{"name":"a"},{"name":"b"}]}"#);
    let root = Value::from_bytes_trusted(&bytes);
    let path = KeyPath::new("$.items[-1].name").unwrap();
    assert_eq!(path.eval(root, None).to_str(), "b");
}

#[test]
fn shared_keys_round_trip_and_dedupe() {
    let mut sk = SharedKeys::new();
    let id_foo = sk.encode("foo", true).unwrap();
    let id_bar = sk.encode("bar", true).unwrap();
    let id_foo_again = sk.encode("foo", true).unwrap();
    assert_eq!(id_foo, id_foo_again);
    assert_ne!(id_foo, id_bar);
    assert_eq!(sk.count(), 2);
    assert_eq!(sk.decode(id_foo), Some("foo"));
}

#[test]
fn canonical_json_output_sorts_keys_and_omits_whitespace() {
    let bytes = encode_json(r#"{"z":1,"a":2}"#);
    let root = Value::from_bytes_trusted(&bytes);
    let text = json::to_json(&root, None, json::JsonWriteOptions { canonical: true });
    assert_eq!(text, r#"{"a":2,"z":1}"#);
}
