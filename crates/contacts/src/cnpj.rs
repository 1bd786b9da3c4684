//! CNPJ (Brazilian national registry number) helpers.

/// Format a CNPJ for display: `##.###.###/####-##`.
///
/// Only a string of exactly 14 digits is formatted; anything else is returned
/// unchanged. Absent input becomes an empty string.
pub fn format_cnpj(value: Option<&str>) -> String {
    let Some(raw) = value else {
        return String::new();
    };

    if raw.len() != 14 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return raw.to_string();
    }

    format!(
        "{}.{}.{}/{}-{}",
        &raw[0..2],
        &raw[2..5],
        &raw[5..8],
        &raw[8..12],
        &raw[12..14]
    )
}

/// Strip everything but digits (accepts both formatted and bare input).
pub fn normalize_cnpj(value: &str) -> String {
    value.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Validate a CNPJ's two check digits (mod-11 over the first 12 digits).
///
/// Accepts formatted or bare input. Repeated-digit sequences (e.g. fourteen
/// zeros) pass the checksum but are not registrable, so they are rejected.
pub fn is_valid_cnpj(value: &str) -> bool {
    let digits = normalize_cnpj(value);
    if digits.len() != 14 {
        return false;
    }

    let nums: Vec<u32> = digits.chars().filter_map(|c| c.to_digit(10)).collect();
    if nums.windows(2).all(|w| w[0] == w[1]) {
        return false;
    }

    check_digit(&nums[..12]) == nums[12] && check_digit(&nums[..13]) == nums[13]
}

fn check_digit(nums: &[u32]) -> u32 {
    // Weights cycle 2..=9 starting from the rightmost digit.
    let sum: u32 = nums
        .iter()
        .rev()
        .zip((2..=9).cycle())
        .map(|(d, w)| d * w)
        .sum();

    match sum % 11 {
        0 | 1 => 0,
        rest => 11 - rest,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn formats_a_plain_14_digit_string() {
        assert_eq!(format_cnpj(Some("11222333000181")), "11.222.333/0001-81");
    }

    #[test]
    fn leaves_other_lengths_unchanged() {
        assert_eq!(format_cnpj(Some("123")), "123");
        assert_eq!(format_cnpj(Some("112223330001811")), "112223330001811");
        assert_eq!(format_cnpj(Some("")), "");
    }

    #[test]
    fn leaves_non_numeric_input_unchanged() {
        assert_eq!(format_cnpj(Some("11.222.333/0001-81")), "11.222.333/0001-81");
        assert_eq!(format_cnpj(Some("abcdefghijklmn")), "abcdefghijklmn");
    }

    #[test]
    fn absent_input_becomes_empty_string() {
        assert_eq!(format_cnpj(None), "");
    }

    #[test]
    fn normalize_strips_punctuation() {
        assert_eq!(normalize_cnpj("11.222.333/0001-81"), "11222333000181");
    }

    #[test]
    fn validates_known_good_cnpj() {
        assert!(is_valid_cnpj("11.222.333/0001-81"));
        assert!(is_valid_cnpj("11222333000181"));
    }

    #[test]
    fn rejects_bad_check_digits() {
        assert!(!is_valid_cnpj("11222333000182"));
    }

    #[test]
    fn rejects_repeated_digit_sequences() {
        assert!(!is_valid_cnpj("00000000000000"));
        assert!(!is_valid_cnpj("11111111111111"));
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(!is_valid_cnpj("1122233300018"));
        assert!(!is_valid_cnpj(""));
    }

    proptest! {
        #[test]
        fn any_14_digit_string_formats_to_the_mask(raw in "[0-9]{14}") {
            let out = format_cnpj(Some(&raw));
            prop_assert_eq!(out.len(), 18);
            prop_assert_eq!(&out[2..3], ".");
            prop_assert_eq!(&out[6..7], ".");
            prop_assert_eq!(&out[10..11], "/");
            prop_assert_eq!(&out[15..16], "-");
            prop_assert_eq!(normalize_cnpj(&out), raw);
        }

        #[test]
        fn any_other_length_is_unchanged(raw in "[0-9]{0,13}|[0-9]{15,20}") {
            prop_assert_eq!(format_cnpj(Some(&raw)), raw);
        }
    }
}
