//! Common validation rules shared across request payloads.

use chrono_tz::Tz;
use validator::ValidationError;

pub const DATE_FORMATS: [&str; 4] = ["DD/MM/YYYY", "MM/DD/YYYY", "YYYY-MM-DD", "DD.MM.YYYY"];

/// Validates password strength.
///
/// Requirements:
/// - 8-128 characters in length
/// - At least one letter and one digit
pub fn validate_password(password: &str) -> Result<(), ValidationError> {
    let length = password.chars().count();
    if !(8..=128).contains(&length) {
        return Err(ValidationError::new("password_invalid_length"));
    }
    let has_letter = password.chars().any(|c| c.is_alphabetic());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    if !has_letter || !has_digit {
        return Err(ValidationError::new("password_too_weak"));
    }
    Ok(())
}

/// Validates an IANA timezone name such as `Europe/London`.
pub fn validate_timezone(value: &str) -> Result<(), ValidationError> {
    value
        .parse::<Tz>()
        .map(|_| ())
        .map_err(|_| ValidationError::new("unknown_timezone"))
}

pub fn validate_date_format(value: &str) -> Result<(), ValidationError> {
    if DATE_FORMATS.contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::new("unsupported_date_format"))
    }
}

/// Validates an ISO 4217 style code: three ASCII letters, any case.
pub fn validate_currency(value: &str) -> Result<(), ValidationError> {
    if value.len() == 3 && value.chars().all(|c| c.is_ascii_alphabetic()) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_currency"))
    }
}

/// Validates that a monetary amount is finite and strictly positive.
pub fn validate_positive_amount(amount: f64) -> Result<(), ValidationError> {
    if amount.is_finite() && amount > 0.0 {
        Ok(())
    } else {
        Err(ValidationError::new("amount_not_positive"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_rejects_short() {
        assert!(validate_password("abc1").is_err());
    }

    #[test]
    fn password_requires_letter_and_digit() {
        assert!(validate_password("onlyletters").is_err());
        assert!(validate_password("1234567890").is_err());
        assert!(validate_password("counsel2024").is_ok());
    }

    #[test]
    fn timezone_accepts_iana_names() {
        assert!(validate_timezone("America/New_York").is_ok());
        assert!(validate_timezone("Mars/Olympus").is_err());
    }

    #[test]
    fn currency_requires_three_letters() {
        assert!(validate_currency("usd").is_ok());
        assert!(validate_currency("US1").is_err());
        assert!(validate_currency("EURO").is_err());
    }

    #[test]
    fn amount_must_be_positive() {
        assert!(validate_positive_amount(0.0).is_err());
        assert!(validate_positive_amount(f64::NAN).is_err());
        assert!(validate_positive_amount(250.75).is_ok());
    }
}
