//! Fuzz target for the metadata leakage scan
//!
//! # Strategy
//!
//! - Arbitrary field names: tokenizer must handle any UTF-8
//! - Nested records: objects inside arrays inside objects, up to a bounded depth
//! - Raw JSON: whatever `serde_json` accepts from the input bytes
//!
//! # Invariants
//!
//! - Tokenizing and scanning NEVER panic
//! - Tokens are non-empty
//! - A reported leak is a key that `is_forbidden` rejects
//! - Wrapping a leaky record in more structure keeps it leaky

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use serde_json::{Map, Value};
use shroud_server::router::{ScanPolicy, find_leak, is_forbidden, strip_and_verify, tokenize};

#[derive(Debug, Arbitrary)]
enum Input {
    Name(String),
    Nested { keys: Vec<String>, depth: u8 },
    Raw(Vec<u8>),
}

fn nest(keys: &[String], depth: usize) -> Value {
    let mut value = Value::Null;
    for level in 0..depth {
        let mut object = Map::new();
        for key in keys {
            object.insert(key.clone(), value.clone());
        }
        value = if level % 2 == 0 { Value::Object(object) } else { Value::Array(vec![Value::Object(object)]) };
    }
    value
}

fn check(value: &Value) {
    let leak = find_leak(value);
    if let Some(field) = &leak {
        assert!(is_forbidden(field), "reported non-forbidden field {field:?}");
        assert!(strip_and_verify(value, ScanPolicy::DenyList).is_err());

        let wrapped = Value::Array(vec![value.clone()]);
        assert!(find_leak(&wrapped).is_some());
    }
    let _ = strip_and_verify(value, ScanPolicy::Strict);
}

fuzz_target!(|input: Input| {
    match input {
        Input::Name(name) => {
            for token in tokenize(&name) {
                assert!(!token.is_empty());
            }
            let _ = is_forbidden(&name);
        },
        Input::Nested { keys, depth } => {
            let keys: Vec<String> = keys.into_iter().take(4).collect();
            check(&nest(&keys, usize::from(depth % 6)));
        },
        Input::Raw(bytes) => {
            if let Ok(value) = serde_json::from_slice::<Value>(&bytes) {
                check(&value);
            }
        },
    }
});
