//! Field-name leakage scan.
//!
//! Every record the router writes or returns is serialized and every field
//! name in it (recursively) is checked against identifying-metadata patterns.
//! Names are tokenized before matching, so `timestamp` or `ciphertext` never
//! trip the `ip` pattern while `ipAddress`, `ip_address` and `IPAddress` all
//! do.

use std::str::FromStr;

use serde_json::Value;
use shroud_core::ShroudError;

/// Top-level fields a message record may carry under [`ScanPolicy::Strict`].
pub const ALLOWED_FIELDS: [&str; 6] =
    ["id", "chatId", "encryptedContent", "messageType", "timestamp", "size"];

/// How strictly message records are scanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanPolicy {
    /// Deny-list scan plus an allow-list on top-level fields
    #[default]
    Strict,
    /// Deny-list scan only; client extension fields are accepted if clean
    DenyList,
}

impl FromStr for ScanPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "strict" => Ok(Self::Strict),
            "deny-list" => Ok(Self::DenyList),
            other => Err(format!("unknown scan policy {other:?} (expected strict or deny-list)")),
        }
    }
}

/// Split a field name into lowercase word tokens.
///
/// Splits on any non-alphanumeric character and on camelCase boundaries.
/// An uppercase run followed by a lowercase letter ends one letter early, so
/// `IPAddress` yields `ip`, `address`.
pub fn tokenize(name: &str) -> Vec<String> {
    let chars: Vec<char> = name.chars().collect();
    let mut tokens = Vec::new();
    let mut current = String::new();

    for (index, &c) in chars.iter().enumerate() {
        if !c.is_alphanumeric() {
            flush(&mut tokens, &mut current);
            continue;
        }

        if c.is_uppercase() && !current.is_empty() {
            let prev = chars[index - 1];
            let next_is_lower = chars.get(index + 1).is_some_and(|next| next.is_lowercase());
            if prev.is_lowercase() || prev.is_numeric() || (prev.is_uppercase() && next_is_lower) {
                flush(&mut tokens, &mut current);
            }
        }

        current.extend(c.to_lowercase());
    }

    flush(&mut tokens, &mut current);
    tokens
}

fn flush(tokens: &mut Vec<String>, current: &mut String) {
    if !current.is_empty() {
        tokens.push(std::mem::take(current));
    }
}

/// Tokens that identify a person, device or place on their own.
const FORBIDDEN_TOKENS: &[&str] = &[
    "ip",
    "ipaddr",
    "ipaddress",
    "ipv4",
    "ipv6",
    "useragent",
    "device",
    "deviceid",
    "location",
    "geo",
    "geolocation",
    "gps",
    "address",
    "coordinate",
    "coordinates",
    "coords",
    "lat",
    "latitude",
    "lon",
    "lng",
    "longitude",
    "fingerprint",
    "session",
    "sessionid",
    "user",
    "userid",
    "uid",
    "sender",
    "email",
    "phone",
    "msisdn",
];

/// Whether a field name matches any identifying-metadata pattern.
pub fn is_forbidden(name: &str) -> bool {
    tokenize(name).iter().any(|token| {
        FORBIDDEN_TOKENS.contains(&token.as_str()) || token.ends_with("name")
    })
}

/// Find the first forbidden field name in `value`, descending into nested
/// objects and arrays.
pub fn find_leak(value: &Value) -> Option<String> {
    match value {
        Value::Object(map) => map.iter().find_map(|(name, nested)| {
            if is_forbidden(name) { Some(name.clone()) } else { find_leak(nested) }
        }),
        Value::Array(items) => items.iter().find_map(find_leak),
        _ => None,
    }
}

/// Verify a serialized record carries no identifying metadata.
///
/// # Errors
///
/// - `LeakageDetected` naming the first offending field. Also logged as a
///   security event.
pub fn strip_and_verify(record: &Value, policy: ScanPolicy) -> Result<(), ShroudError> {
    let leak = find_leak(record).or_else(|| match (policy, record) {
        (ScanPolicy::Strict, Value::Object(map)) => {
            map.keys().find(|name| !ALLOWED_FIELDS.contains(&name.as_str())).cloned()
        },
        _ => None,
    });

    match leak {
        Some(field) => {
            tracing::warn!(target: "shroud::security", field = %field, ?policy, "metadata leakage blocked");
            Err(ShroudError::LeakageDetected { field })
        },
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    #[test]
    fn tokenize_mixed_styles() {
        assert_eq!(tokenize("ip_address"), vec!["ip", "address"]);
        assert_eq!(tokenize("ipAddress"), vec!["ip", "address"]);
        assert_eq!(tokenize("IPAddress"), vec!["ip", "address"]);
        assert_eq!(tokenize("user-agent"), vec!["user", "agent"]);
        assert_eq!(tokenize("geo.lat"), vec!["geo", "lat"]);
        assert_eq!(tokenize("chatId"), vec!["chat", "id"]);
        assert_eq!(tokenize("ipv6Addr"), vec!["ipv6", "addr"]);
    }

    #[test]
    fn substrings_do_not_match() {
        for name in ["timestamp", "ciphertext", "encryptedContent", "messageType", "size", "chatId"] {
            assert!(!is_forbidden(name), "{name} flagged");
        }
    }

    #[test]
    fn identifying_names_match() {
        for name in [
            "ip_address",
            "clientIP",
            "userAgent",
            "device_id",
            "location",
            "latitude",
            "fingerprint",
            "sessionId",
            "user_id",
            "email",
            "phoneNumber",
            "displayName",
            "username",
        ] {
            assert!(is_forbidden(name), "{name} not flagged");
        }
    }

    #[test]
    fn nested_fields_are_scanned() {
        let record = json!({"id": "m", "extra": [{"inner": {"gpsFix": true}}]});
        assert_eq!(find_leak(&record), Some("gpsFix".to_string()));
    }

    #[test]
    fn strict_rejects_unknown_top_level_field() {
        let record = json!({"id": "m", "chatId": "c", "emoji": "ok"});

        assert_eq!(
            strip_and_verify(&record, ScanPolicy::Strict),
            Err(ShroudError::LeakageDetected { field: "emoji".to_string() })
        );
        assert_eq!(strip_and_verify(&record, ScanPolicy::DenyList), Ok(()));
    }

    #[test]
    fn policy_parse() {
        assert_eq!("deny-list".parse::<ScanPolicy>(), Ok(ScanPolicy::DenyList));
        assert!("lenient".parse::<ScanPolicy>().is_err());
    }

    const SAFE: [&str; 8] = ["message", "chat", "content", "payload", "hop", "route", "count", "kind"];
    const LEAKY: [&str; 8] = ["ip", "device", "location", "fingerprint", "email", "phone", "user", "name"];

    fn join(words: &[&str], camel: bool) -> String {
        if !camel {
            return words.join("_");
        }
        words
            .iter()
            .enumerate()
            .map(|(index, word)| {
                if index == 0 {
                    (*word).to_string()
                } else {
                    let mut chars = word.chars();
                    chars
                        .next()
                        .map(|first| first.to_uppercase().chain(chars).collect::<String>())
                        .unwrap_or_default()
                }
            })
            .collect()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn prop_forbidden_token_anywhere_is_caught(
            prefix in prop::sample::subsequence(SAFE.to_vec(), 0..3),
            leaky in prop::sample::select(LEAKY.to_vec()),
            suffix in prop::sample::subsequence(SAFE.to_vec(), 0..3),
            camel in any::<bool>(),
        ) {
            let words: Vec<&str> = prefix.into_iter().chain([leaky]).chain(suffix).collect();
            let name = join(&words, camel);
            prop_assert!(is_forbidden(&name), "{} not flagged", name);
        }

        #[test]
        fn prop_safe_words_pass(
            words in prop::sample::subsequence(SAFE.to_vec(), 1..4),
            camel in any::<bool>(),
        ) {
            let name = join(&words, camel);
            prop_assert!(!is_forbidden(&name), "{} flagged", name);
        }
    }
}
