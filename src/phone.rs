//! Destination number normalization.
//!
//! Best-effort only: strips formatting and adds the default country code to
//! bare 10-digit national numbers. This is not E.164 validation; callers that
//! need international correctness must pass pre-formatted numbers.

/// Country code prepended to bare national numbers.
pub const DEFAULT_COUNTRY_CODE: char = '1';

const NATIONAL_NUMBER_LEN: usize = 10;

/// Reduce a free-form destination to the dialable digit string the gateway expects.
///
/// ```
/// use whatsapp_relay::phone::normalize;
///
/// assert_eq!(normalize("(555) 123-4567"), "15551234567");
/// assert_eq!(normalize("+1 555 123 4567"), "15551234567");
/// ```
pub fn normalize(raw: &str) -> String {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();

    if digits.len() == NATIONAL_NUMBER_LEN && !digits.starts_with(DEFAULT_COUNTRY_CODE) {
        let mut canonical = String::with_capacity(NATIONAL_NUMBER_LEN + 1);
        canonical.push(DEFAULT_COUNTRY_CODE);
        canonical.push_str(&digits);
        canonical
    } else {
        digits
    }
}
