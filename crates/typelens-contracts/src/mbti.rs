/// The sixteen four-letter classification codes, in the order the product
/// has always listed them.
pub const MBTI_TYPES: &[&str] = &[
    "INTJ", "INTP", "ENTJ", "ENTP", "INFJ", "INFP", "ENFJ", "ENFP", "ISTJ", "ISFJ", "ESTJ",
    "ESFJ", "ISTP", "ISFP", "ESTP", "ESFP",
];

/// Sentinel used wherever a type could not be determined.
pub const UNKNOWN_TYPE: &str = "Unknown";

pub fn is_valid_code(code: &str) -> bool {
    MBTI_TYPES.iter().any(|known| *known == code)
}

/// Uppercases and validates a user-supplied code. Returns `None` for
/// anything that is not one of the sixteen codes.
pub fn normalize_code(raw: &str) -> Option<String> {
    let candidate = raw.trim().to_ascii_uppercase();
    is_valid_code(&candidate).then_some(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sixteen_codes_all_valid() {
        assert_eq!(MBTI_TYPES.len(), 16);
        for code in MBTI_TYPES {
            assert!(is_valid_code(code));
        }
    }

    #[test]
    fn normalize_accepts_lowercase_with_whitespace() {
        assert_eq!(normalize_code(" intj "), Some("INTJ".to_string()));
    }

    #[test]
    fn normalize_rejects_junk() {
        assert_eq!(normalize_code("ABCD"), None);
        assert_eq!(normalize_code(""), None);
        assert_eq!(normalize_code("INT"), None);
    }
}
