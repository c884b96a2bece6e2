//! Fuzz target for decoding records read back from the expiring store
//!
//! A shared store can hold values written by other processes, so decoding
//! must treat them as untrusted.
//!
//! # Invariants
//!
//! - Decoding NEVER panics on arbitrary bytes
//! - A decoded record re-encodes and decodes to the same value

#![no_main]

use libfuzzer_sys::fuzz_target;
use shroud_server::{
    router::{AnonymousChannel, RoutingRecord},
    session::{AnonymousSession, RotationAudit},
    storage::{decode, encode},
};

fn roundtrips<T>(data: &[u8])
where
    T: serde::Serialize + serde::de::DeserializeOwned + PartialEq + std::fmt::Debug,
{
    if let Ok(value) = decode::<T>(data) {
        let bytes = encode(&value).expect("decoded value must encode");
        assert_eq!(decode::<T>(&bytes).ok(), Some(value));
    }
}

fuzz_target!(|data: &[u8]| {
    roundtrips::<AnonymousSession>(data);
    roundtrips::<RotationAudit>(data);
    roundtrips::<AnonymousChannel>(data);
    roundtrips::<Vec<RoutingRecord>>(data);
});
