//! Request body validation.
//!
//! Every check runs so clients get the full list of failing fields at once.

use regex::Regex;
use std::sync::LazyLock;

use super::error::FieldError;

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());

const PASSWORD_MIN_LEN: usize = 8;
const PASSWORD_SPECIALS: &str = "@$!%*?&";
const NAME_MAX_LEN: usize = 50;

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

fn check_email(email: Option<&str>, errors: &mut Vec<FieldError>) {
    match email {
        None | Some("") => errors.push(FieldError::new("email", "Email is required")),
        Some(e) if !is_valid_email(e) => {
            errors.push(FieldError::new("email", "Please provide a valid email address"))
        }
        Some(_) => {}
    }
}

fn check_password_strength(password: Option<&str>, errors: &mut Vec<FieldError>) {
    let Some(password) = password.filter(|p| !p.is_empty()) else {
        errors.push(FieldError::new("password", "Password is required"));
        return;
    };
    if password.chars().count() < PASSWORD_MIN_LEN {
        errors.push(FieldError::new(
            "password",
            "Password must be at least 8 characters long",
        ));
        return;
    }
    let lower = password.chars().any(|c| c.is_ascii_lowercase());
    let upper = password.chars().any(|c| c.is_ascii_uppercase());
    let digit = password.chars().any(|c| c.is_ascii_digit());
    let special = password.chars().any(|c| PASSWORD_SPECIALS.contains(c));
    if !(lower && upper && digit && special) {
        errors.push(FieldError::new(
            "password",
            "Password must contain at least one uppercase letter, one lowercase letter, one number, and one special character",
        ));
    }
}

fn check_name(field: &str, label: &str, value: Option<&str>, errors: &mut Vec<FieldError>) {
    let Some(value) = value else {
        return;
    };
    if value.trim().is_empty() {
        errors.push(FieldError::new(field, format!("{label} cannot be empty")));
    } else if value.chars().count() > NAME_MAX_LEN {
        errors.push(FieldError::new(
            field,
            format!("{label} cannot exceed {NAME_MAX_LEN} characters"),
        ));
    }
}

/// Registration: email, strong password, optional names.
pub fn validate_register(
    email: Option<&str>,
    password: Option<&str>,
    first_name: Option<&str>,
    last_name: Option<&str>,
) -> Result<(), Vec<FieldError>> {
    let mut errors = Vec::new();
    check_email(email, &mut errors);
    check_password_strength(password, &mut errors);
    check_name("firstName", "First name", first_name, &mut errors);
    check_name("lastName", "Last name", last_name, &mut errors);
    finish(errors)
}

/// Login only needs a well-formed email and some password.
pub fn validate_login(email: Option<&str>, password: Option<&str>) -> Result<(), Vec<FieldError>> {
    let mut errors = Vec::new();
    check_email(email, &mut errors);
    if password.is_none_or(str::is_empty) {
        errors.push(FieldError::new("password", "Password is required"));
    }
    finish(errors)
}

pub fn validate_demo_login(email: Option<&str>) -> Result<(), Vec<FieldError>> {
    let mut errors = Vec::new();
    check_email(email, &mut errors);
    finish(errors)
}

fn finish(errors: Vec<FieldError>) -> Result<(), Vec<FieldError>> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
