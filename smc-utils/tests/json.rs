use serde::{Deserialize, Serialize};
use serde_json::json;
use smc_utils::*;

#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct Record {
    zeta: u32,
    alpha: Vec<f32>,
    nested: Nested,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct Nested {
    b: bool,
    a: String,
}

fn record() -> Record {
    Record {
        zeta: 7,
        alpha: vec![0.25, 0.5],
        nested: Nested {
            b: true,
            a: "x".to_string(),
        },
    }
}

#[test]
fn test_jsonify_sorts_keys() {
    assert_eq!(
        jsonify(&record()).unwrap(),
        r#"{"alpha":[0.25,0.5],"nested":{"a":"x","b":true},"zeta":7}"#
    );
}

#[test]
fn test_sort_keys_inside_arrays() {
    let value = json!([{"b": 1, "a": 2}]);
    assert_eq!(
        serde_json::to_string(&sort_keys(&value)).unwrap(),
        r#"[{"a":2,"b":1}]"#
    );
}

#[test]
fn test_compress_obj() {
    let compressed = compress_obj(&record()).unwrap();
    assert_eq!(decompress_obj::<Record>(&compressed).unwrap(), record());
}

#[test]
fn test_load_json_inline() {
    let loaded: Record = load_json(&jsonify(&record()).unwrap()).unwrap();
    assert_eq!(loaded, record());
    assert!(load_json::<Record>("{not json").is_err());
}

#[test]
fn test_load_json_missing_file() {
    assert!(load_json::<Record>("/nonexistent/settings.json").is_err());
}

#[test]
fn test_seed_or_clock() {
    assert_eq!(seed_or_clock(Some(42)), 42);
    assert!(seed_or_clock(None) > 0);
}
