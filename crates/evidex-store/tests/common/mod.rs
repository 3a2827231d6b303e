use evidex_store::transaction::ProcessLiveness;
use proptest::prelude::*;
use serde_json::Value as JsonValue;

/// Arbitrary JSON: finite floats, 64-bit integers, unicode strings, nested
/// arrays and objects
#[allow(dead_code)]
pub fn json_value() -> impl Strategy<Value = JsonValue> {
    let leaf = prop_oneof![
        Just(JsonValue::Null),
        any::<bool>().prop_map(JsonValue::Bool),
        any::<i64>().prop_map(JsonValue::from),
        any::<u64>().prop_map(JsonValue::from),
        any::<f64>()
            .prop_filter("JSON has no NaN or infinity", |f| f.is_finite())
            .prop_map(JsonValue::from),
        "\\PC{0,16}".prop_map(JsonValue::String),
    ];
    leaf.prop_recursive(3, 48, 6, |inner| {
        prop_oneof![
            proptest::collection::vec(inner.clone(), 0..6).prop_map(JsonValue::Array),
            proptest::collection::btree_map("\\PC{0,8}", inner, 0..6)
                .prop_map(|m| JsonValue::Object(m.into_iter().collect())),
        ]
    })
}

/// Only the test process itself counts as alive
#[allow(dead_code)]
pub struct OnlySelf;

impl ProcessLiveness for OnlySelf {
    fn is_alive(&self, pid: u32) -> bool {
        pid == std::process::id()
    }
}
