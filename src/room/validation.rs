//! Sanitizers for untrusted join-time fields

use serde_json::Value;

/// Name used when the client sends nothing usable
pub const DEFAULT_NAME: &str = "Anonymous";

/// Maximum display name length in characters
pub const NAME_MAX_LENGTH: usize = 16;

/// Coerces raw display names into bounded, non-empty strings
#[derive(Debug, Clone)]
pub struct NameSanitizer {
    default_value: String,
    max_length: usize,
}

impl NameSanitizer {
    pub fn new(default_value: impl Into<String>, max_length: usize) -> Self {
        Self {
            default_value: default_value.into(),
            max_length,
        }
    }

    pub fn sanitize(&self, value: &Value) -> String {
        let Value::String(raw) = value else {
            return self.default_value.clone();
        };

        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return self.default_value.clone();
        }

        trimmed.chars().take(self.max_length).collect()
    }
}

impl Default for NameSanitizer {
    fn default() -> Self {
        Self::new(DEFAULT_NAME, NAME_MAX_LENGTH)
    }
}

/// Maps a symbolic skin id or a numeric index onto the allowed skin list.
///
/// The first allowed skin is the fallback for anything unrecognized.
#[derive(Debug, Clone)]
pub struct SkinSanitizer {
    skins: Vec<String>,
}

impl SkinSanitizer {
    /// `skins` must be non-empty; room configuration validation guarantees it.
    pub fn new(skins: Vec<String>) -> Self {
        debug_assert!(!skins.is_empty());
        Self { skins }
    }

    pub fn default_skin(&self) -> &str {
        self.skins.first().map(String::as_str).unwrap_or_default()
    }

    pub fn sanitize(&self, value: &Value) -> String {
        match value {
            Value::String(s) => {
                if self.skins.iter().any(|skin| skin == s) {
                    return s.clone();
                }
                self.sanitize_number(parse_numeric(s))
            }
            Value::Number(n) => self.sanitize_number(n.as_f64().unwrap_or(f64::NAN)),
            _ => self.default_skin().to_string(),
        }
    }

    fn sanitize_number(&self, value: f64) -> String {
        if !value.is_finite() {
            return self.default_skin().to_string();
        }

        let index = value.floor();
        if index < 0.0 || index >= self.skins.len() as f64 {
            return self.default_skin().to_string();
        }

        self.skins[index as usize].clone()
    }
}

/// Numeric reading of a string; blank strings read as zero, garbage as NaN.
///
/// Unsigned `0x`, `0o` and `0b` literals are read in their radix.
fn parse_numeric(raw: &str) -> f64 {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return 0.0;
    }

    let radix = match trimmed.get(..2) {
        Some("0x" | "0X") => Some(16),
        Some("0o" | "0O") => Some(8),
        Some("0b" | "0B") => Some(2),
        _ => None,
    };

    match radix {
        Some(radix) => parse_radix(&trimmed[2..], radix),
        None => trimmed.parse::<f64>().unwrap_or(f64::NAN),
    }
}

fn parse_radix(digits: &str, radix: u32) -> f64 {
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return f64::NAN;
    }
    // Overflowing literals are far outside any skin list anyway
    u64::from_str_radix(digits, radix)
        .map(|v| v as f64)
        .unwrap_or(f64::INFINITY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sanitize_name(raw: &Value) -> String {
        NameSanitizer::default().sanitize(raw)
    }

    fn sanitize_cosmetic(raw: &Value, allowed: &[String]) -> String {
        SkinSanitizer::new(allowed.to_vec()).sanitize(raw)
    }

    fn skins() -> Vec<String> {
        vec!["a".to_string(), "b".to_string(), "c".to_string()]
    }

    #[test]
    fn name_falls_back_for_unusable_input() {
        assert_eq!(sanitize_name(&json!(null)), DEFAULT_NAME);
        assert_eq!(sanitize_name(&json!(42)), DEFAULT_NAME);
        assert_eq!(sanitize_name(&json!(["bob"])), DEFAULT_NAME);
        assert_eq!(sanitize_name(&json!("")), DEFAULT_NAME);
        assert_eq!(sanitize_name(&json!("   \t ")), DEFAULT_NAME);
    }

    #[test]
    fn name_is_trimmed_and_truncated() {
        assert_eq!(sanitize_name(&json!("  bob  ")), "bob");
        let long = "abcdefghijklmnopqrstuvwxyz";
        let out = sanitize_name(&json!(long));
        assert_eq!(out, "abcdefghijklmnop");
        assert_eq!(out.chars().count(), NAME_MAX_LENGTH);
    }

    #[test]
    fn name_truncation_counts_characters() {
        let name = "ééééééééééééééééééé";
        let out = sanitize_name(&json!(name));
        assert_eq!(out.chars().count(), NAME_MAX_LENGTH);
    }

    #[test]
    fn cosmetic_scenarios() {
        assert_eq!(sanitize_cosmetic(&json!("2"), &skins()), "c");
        assert_eq!(sanitize_cosmetic(&json!("5"), &skins()), "a");
        assert_eq!(sanitize_cosmetic(&json!("b"), &skins()), "b");
    }

    #[test]
    fn cosmetic_numeric_indexes_are_floored() {
        assert_eq!(sanitize_cosmetic(&json!(1), &skins()), "b");
        assert_eq!(sanitize_cosmetic(&json!(1.9), &skins()), "b");
        assert_eq!(sanitize_cosmetic(&json!("2.5"), &skins()), "c");
        assert_eq!(sanitize_cosmetic(&json!(" 1 "), &skins()), "b");
        assert_eq!(sanitize_cosmetic(&json!(2.999), &skins()), "c");
    }

    #[test]
    fn cosmetic_reads_radix_prefixed_indexes() {
        assert_eq!(sanitize_cosmetic(&json!("0x2"), &skins()), "c");
        assert_eq!(sanitize_cosmetic(&json!("0B1"), &skins()), "b");
        assert_eq!(sanitize_cosmetic(&json!(" 0o2 "), &skins()), "c");
        assert_eq!(sanitize_cosmetic(&json!("0x"), &skins()), "a");
        assert_eq!(sanitize_cosmetic(&json!("0x+1"), &skins()), "a");
        assert_eq!(sanitize_cosmetic(&json!("-0x1"), &skins()), "a");
        assert_eq!(sanitize_cosmetic(&json!("0b12"), &skins()), "a");
        assert_eq!(sanitize_cosmetic(&json!("0xffffffffffffffffff"), &skins()), "a");
    }

    #[test]
    fn cosmetic_is_total() {
        let allowed = skins();
        let inputs = [
            json!(null),
            json!(true),
            json!({"skin": "b"}),
            json!([1]),
            json!(-1),
            json!(-0.5),
            json!(3),
            json!(1e300),
            json!(u64::MAX),
            json!("NaN"),
            json!("inf"),
            json!("-infinity"),
            json!("not a skin"),
            json!(""),
        ];
        for input in inputs {
            let out = sanitize_cosmetic(&input, &allowed);
            assert!(allowed.contains(&out), "{input} produced {out}");
        }
        assert_eq!(sanitize_cosmetic(&json!(-0.5), &allowed), "a");
        assert_eq!(sanitize_cosmetic(&json!("NaN"), &allowed), "a");
    }
}
