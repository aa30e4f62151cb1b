//! Input normalization shared by the entity constructors.

use uninexus_core::{DomainError, DomainResult};

pub const MAX_NAME_LEN: usize = 100;
pub const MAX_TEXT_LEN: usize = 1000;

/// Trim and check a required display name.
pub fn required_name(field: &str, raw: &str) -> DomainResult<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(DomainError::validation(format!("{field} must not be empty")));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(DomainError::validation(format!(
            "{field} must be at most {MAX_NAME_LEN} characters"
        )));
    }
    Ok(name.to_string())
}

/// Trim optional free text; blank becomes `None`.
pub fn optional_text(field: &str, raw: Option<String>) -> DomainResult<Option<String>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let text = raw.trim();
    if text.is_empty() {
        return Ok(None);
    }
    if text.chars().count() > MAX_TEXT_LEN {
        return Err(DomainError::validation(format!(
            "{field} must be at most {MAX_TEXT_LEN} characters"
        )));
    }
    Ok(Some(text.to_string()))
}

/// Lower-case and sanity-check an email address.
pub fn normalize_email(raw: &str) -> DomainResult<String> {
    let email = raw.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if !valid {
        return Err(DomainError::validation("invalid email format"));
    }
    Ok(email)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_is_lowercased_and_trimmed() {
        assert_eq!(normalize_email("  A@X.com ").unwrap(), "a@x.com");
    }

    #[test]
    fn malformed_emails_rejected() {
        for bad in ["", "ax.com", "@x.com", "a@", "a@b@c", "a b@x.com"] {
            assert!(normalize_email(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn blank_optional_text_is_none() {
        assert_eq!(optional_text("description", Some("   ".into())).unwrap(), None);
        assert_eq!(
            optional_text("description", Some(" hi ".into())).unwrap(),
            Some("hi".to_string())
        );
    }

    #[test]
    fn long_names_rejected() {
        let long = "x".repeat(MAX_NAME_LEN + 1);
        assert!(required_name("name", &long).is_err());
        assert!(required_name("name", "   ").is_err());
    }
}
