//! Fuzz target for envelope parsing
//!
//! Envelopes arrive from untrusted clients in transport encoding and are
//! parsed again by every recipient.
//!
//! # Invariants
//!
//! - Parsing NEVER panics, on raw bytes or on arbitrary strings
//! - Accepted bytes re-serialize to exactly the input
//! - Accepted transport strings survive a transport roundtrip

#![no_main]

use libfuzzer_sys::fuzz_target;
use shroud_crypto::Envelope;

fuzz_target!(|data: &[u8]| {
    if let Ok(envelope) = Envelope::from_bytes(data) {
        assert_eq!(envelope.to_bytes(), data);
        assert_eq!(envelope.len(), data.len());

        let reparsed = Envelope::from_transport(&envelope.to_transport());
        assert_eq!(reparsed.ok(), Some(envelope));
    }

    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(envelope) = Envelope::from_transport(text) {
            let again = Envelope::from_transport(&envelope.to_transport());
            assert_eq!(again.ok(), Some(envelope));
        }
    }
});
