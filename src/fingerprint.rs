// 🔏 Fingerprint Engine - checksum + word count for an incoming record
//
// The checksum is a CHANGE DETECTOR over the exact wire payload, not a
// semantic equality test: keys are hashed in the order they were received.
// Two payloads that differ only in key order hash differently.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Fields whose text is counted towards an agency's word count.
pub const WORD_COUNT_FIELDS: [&str; 2] = ["name", "display_name"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Lowercase hex SHA-256 (64 chars)
    pub checksum: String,
    pub word_count: i64,
}

/// Fingerprint a record exactly as received.
pub fn fingerprint(record: &Value) -> Fingerprint {
    Fingerprint {
        checksum: checksum(record),
        word_count: count_words(&identifying_text(record)),
    }
}

/// SHA-256 over the compact JSON serialization, in received key order.
pub fn checksum(record: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(record.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Number of whitespace-delimited, non-empty tokens.
pub fn count_words(text: &str) -> i64 {
    text.split_whitespace().count() as i64
}

/// Space-joined name fields. Absent or non-string fields contribute nothing.
pub fn identifying_text(record: &Value) -> String {
    WORD_COUNT_FIELDS
        .iter()
        .filter_map(|field| record.get(field).and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fingerprint_is_deterministic() {
        let record = json!({
            "name": "Agency for International Development",
            "display_name": "Agency for International Development",
            "slug": "agency-for-international-development",
        });

        let first = fingerprint(&record);
        let second = fingerprint(&record);

        assert_eq!(first, second);
        assert_eq!(first.checksum.len(), 64, "SHA-256 hash should be 64 hex characters");
        assert_eq!(first.word_count, 8);
    }

    #[test]
    fn test_word_count_ignores_extra_whitespace() {
        assert_eq!(count_words("  Alpha \t Agency\n\nRenamed  "), 3);
        assert_eq!(count_words(""), 0);
        assert_eq!(count_words("   "), 0);
    }

    #[test]
    fn test_absent_name_fields_count_zero() {
        let record = json!({ "slug": "nameless" });
        assert_eq!(fingerprint(&record).word_count, 0);

        let partial = json!({ "name": "Alpha", "display_name": null });
        assert_eq!(fingerprint(&partial).word_count, 1);
    }

    #[test]
    fn test_non_name_fields_do_not_count() {
        let record = json!({
            "name": "Alpha",
            "display_name": "Alpha Agency",
            "sortable_name": "Alpha Agency, The Very Long Sortable",
            "short_name": "AA",
        });
        assert_eq!(fingerprint(&record).word_count, 3);
    }

    #[test]
    fn test_checksum_is_sensitive_to_key_order() {
        // Documented behavior: reordered keys are a different payload.
        let a: Value = serde_json::from_str(r#"{"slug":"a","name":"Alpha"}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"name":"Alpha","slug":"a"}"#).unwrap();

        assert_ne!(checksum(&a), checksum(&b));
        assert_eq!(fingerprint(&a).word_count, fingerprint(&b).word_count);
    }

    #[test]
    fn test_checksum_detects_value_change() {
        let before = json!({"slug": "a", "name": "Alpha", "display_name": "Alpha Agency"});
        let after = json!({"slug": "a", "name": "Alpha", "display_name": "Alpha Agency Renamed"});
        assert_ne!(checksum(&before), checksum(&after));
    }
}
