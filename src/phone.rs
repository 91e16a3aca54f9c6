/// Strips everything but ASCII digits and prepends `country_code` when missing.
///
/// Empty input stays empty; callers reject it with their own validation.
pub fn normalize(raw: &str, country_code: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() || digits.starts_with(country_code) {
        digits
    } else {
        format!("{}{}", country_code, digits)
    }
}
