use lazy_static::lazy_static;
use regex::Regex;

/// Accepts `+55` with 10 or 11 digits, or `+1` with exactly 10 digits.
/// Anything else is rejected as is; nothing is normalized.
pub fn is_valid_phone(phone: &str) -> bool {
    lazy_static! {
        static ref BR_RE: Regex = Regex::new(r"^\+55\d{10,11}$").unwrap();
        static ref US_RE: Regex = Regex::new(r"^\+1\d{10}$").unwrap();
    }
    BR_RE.is_match(phone) || US_RE.is_match(phone)
}
