//! Request validation: collects per-field messages and renders them as JSON.

use serde::Serialize;
use std::collections::BTreeMap;

/// Field errors gathered while checking one request.
#[derive(Debug, Default, Serialize)]
pub struct Validator {
    pub errors: BTreeMap<&'static str, Vec<String>>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_field_error(&mut self, field: &'static str, message: impl Into<String>) {
        self.errors.entry(field).or_default().push(message.into());
    }

    /// Record `message` against `field` unless `ok` holds.
    pub fn check_field(&mut self, ok: bool, field: &'static str, message: impl Into<String>) {
        if !ok {
            self.add_field_error(field, message);
        }
    }
}

pub fn not_blank(value: &str) -> bool {
    !value.trim().is_empty()
}

/// At most `n` characters (not bytes).
pub fn max_chars(value: &str, n: usize) -> bool {
    value.chars().count() <= n
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_blank() {
        assert!(not_blank("x"));
        assert!(!not_blank(""));
        assert!(!not_blank(" \t\n"));
    }

    #[test]
    fn test_max_chars_counts_characters() {
        assert!(max_chars("héllo", 5));
        assert!(!max_chars("héllo", 4));
        assert!(max_chars("", 0));
    }

    #[test]
    fn test_collects_errors_per_field() {
        let mut v = Validator::new();
        assert!(v.is_valid());

        v.check_field(true, "secret", "unused");
        v.check_field(false, "secret", "secret is required");
        v.check_field(false, "secret", "secret exceeds maximum size");
        v.check_field(false, "exp", "expiration must be at least 1 second");

        assert!(!v.is_valid());
        assert_eq!(v.errors["secret"].len(), 2);

        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(
            json["errors"]["exp"][0],
            "expiration must be at least 1 second"
        );
    }
}
