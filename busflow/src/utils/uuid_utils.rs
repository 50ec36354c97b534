//! Identifier generation.

use uuid::Uuid;

/// Generates a message identifier in the bus's `urn:uuid:` form.
#[must_use]
pub fn generate_message_id() -> String {
    format!("urn:uuid:{}", Uuid::new_v4())
}

/// Generates a fresh correlation key for an outbound asynchronous call.
#[must_use]
pub fn generate_correlation_key() -> String {
    Uuid::now_v7().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_id_format() {
        let id = generate_message_id();
        assert!(id.starts_with("urn:uuid:"));
        assert_eq!(id.len(), "urn:uuid:".len() + 36);
    }

    #[test]
    fn test_correlation_keys_are_unique() {
        let a = generate_correlation_key();
        let b = generate_correlation_key();
        assert_ne!(a, b);
        assert_eq!(Uuid::parse_str(&a).unwrap().get_version_num(), 7);
    }
}
