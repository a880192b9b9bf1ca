use shared_models::error::AppError;

/// Normalizes a phone number to the E.164-without-leading-plus digit
/// string used throughout conversation identifiers (see
/// `shared_models::ids::ConversationId`). Accepts numbers with or without
/// a leading `+`, spaces, hyphens, or parens; rejects anything that
/// doesn't reduce to a plausible national/international number.
pub fn normalize_phone_digits(raw: &str) -> Result<String, AppError> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();

    if digits.is_empty() {
        return Err(AppError::ValidationError(format!("empty phone number: {raw:?}")));
    }
    if digits.len() < 10 || digits.len() > 15 {
        return Err(AppError::ValidationError(format!(
            "phone number has implausible length: {raw:?}"
        )));
    }

    // US numbers are frequently submitted without the country code; assume
    // NANP when exactly 10 digits.
    if digits.len() == 10 {
        return Ok(format!("1{digits}"));
    }

    Ok(digits)
}

/// Renders digits back out in `+1 (555) 123-4567`-style form for inclusion
/// in outbound SMS copy. Falls back to a bare `+digits` rendering for
/// non-NANP numbers.
pub fn display_phone(digits: &str) -> String {
    if digits.len() == 11 && digits.starts_with('1') {
        let area = &digits[1..4];
        let exchange = &digits[4..7];
        let line = &digits[7..11];
        return format!("+1 ({area}) {exchange}-{line}");
    }
    format!("+{digits}")
}
