//! Building blocks for the per-form schemas: trimming, length limits,
//! sanitisation and email checks. Failures are collected per field so that the
//! server log can name them while the client only sees a generic message.

use lettre::Address;
use regex::Regex;
use std::{fmt::Display, sync::OnceLock};

pub const MAX_EMAIL_LENGTH: usize = 254;
pub const MAX_CAPTCHA_TOKEN_LENGTH: usize = 4096;

static HTML_TAG: OnceLock<Regex> = OnceLock::new();

/// Removes HTML tags and any stray angle brackets, then trims.
pub fn strip_html(input: &str) -> String {
    let tag = HTML_TAG.get_or_init(|| Regex::new("<[^>]*>").expect("static pattern"));
    tag.replace_all(input, "")
        .chars()
        .filter(|c| !matches!(c, '<' | '>'))
        .collect::<String>()
        .trim()
        .to_string()
}

/// [`strip_html`] plus removal of the characters that delimit string literals
/// in the downstream filter syntax.
pub fn sanitize_input(input: &str) -> String {
    strip_quotes(&strip_html(input))
}

/// Drops angle brackets, quotes and backslashes without touching anything else.
pub fn strip_unsafe_chars(input: &str) -> String {
    input
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | '"' | '\'' | '\\'))
        .collect()
}

fn strip_quotes(input: &str) -> String {
    input
        .chars()
        .filter(|c| !matches!(c, '"' | '\'' | '\\'))
        .collect()
}

/// Shape check for an already trimmed address.
pub fn is_email_shaped(email: &str) -> bool {
    let Ok(address) = email.parse::<Address>() else {
        return false;
    };
    let Some((_, top_level)) = address.domain().rsplit_once('.') else {
        return false;
    };
    top_level.len() >= 2 && top_level.chars().all(|c| c.is_ascii_alphabetic())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub problem: Problem,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Problem {
    Required,
    TooShort,
    TooLong,
    InvalidFormat,
    InvalidCharacters,
    UnexpectedShape,
}

impl Display for Problem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Problem::Required => "required",
            Problem::TooShort => "too short",
            Problem::TooLong => "too long",
            Problem::InvalidFormat => "invalid format",
            Problem::InvalidCharacters => "invalid characters",
            Problem::UnexpectedShape => "unexpected shape",
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidationErrors(Vec<FieldError>);

impl ValidationErrors {
    /// The body was JSON but could not be read as the form's schema.
    pub fn unexpected_shape() -> Self {
        Self(vec![FieldError {
            field: "body",
            problem: Problem::UnexpectedShape,
        }])
    }

    pub fn fields(&self) -> &[FieldError] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Lists field names and problems, never values.
impl Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (index, error) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", error.field, error.problem)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

/// Accumulates field failures. Checks return the normalised value, or an
/// empty value once a failure has been recorded; call [`Validator::finish`]
/// before using any of them.
#[derive(Default)]
pub struct Validator {
    errors: Vec<FieldError>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject(&mut self, field: &'static str, problem: Problem) {
        self.errors.push(FieldError { field, problem });
    }

    /// Trimmed text whose length must lie within `min..=max` characters.
    pub fn required_text(
        &mut self,
        field: &'static str,
        value: Option<&str>,
        min: usize,
        max: usize,
    ) -> String {
        let Some(value) = value else {
            self.reject(field, Problem::Required);
            return String::new();
        };
        let trimmed = value.trim();
        let length = trimmed.chars().count();
        if length == 0 && min > 0 {
            self.reject(field, Problem::Required);
        } else if length < min {
            self.reject(field, Problem::TooShort);
        } else if length > max {
            self.reject(field, Problem::TooLong);
        } else {
            return trimmed.to_string();
        }
        String::new()
    }

    /// Trimmed text of at most `max` characters. Absent and blank values both
    /// come back as `None`.
    pub fn optional_text(
        &mut self,
        field: &'static str,
        value: Option<&str>,
        max: usize,
    ) -> Option<String> {
        let trimmed = value?.trim();
        if trimmed.chars().count() > max {
            self.reject(field, Problem::TooLong);
            return None;
        }
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }

    /// Trimmed, lower-cased address. Quotes and backslashes are refused
    /// outright since the address is interpolated into a quoted filter
    /// literal downstream.
    pub fn email(&mut self, field: &'static str, value: Option<&str>, min: usize) -> String {
        let email = self.required_text(field, value, min, MAX_EMAIL_LENGTH);
        if email.is_empty() {
            return email;
        }
        if !is_email_shaped(&email) {
            self.reject(field, Problem::InvalidFormat);
            return String::new();
        }
        let email = email.to_lowercase();
        if email.contains(['\'', '"', '\\']) {
            self.reject(field, Problem::InvalidCharacters);
            return String::new();
        }
        email
    }

    /// Challenge token as supplied by the widget; not trimmed.
    pub fn captcha_token(&mut self, field: &'static str, value: Option<&str>) -> String {
        match value {
            None | Some("") => {
                self.reject(field, Problem::Required);
                String::new()
            }
            Some(token) if token.chars().count() > MAX_CAPTCHA_TOKEN_LENGTH => {
                self.reject(field, Problem::TooLong);
                String::new()
            }
            Some(token) => token.to_string(),
        }
    }

    pub fn finish(self) -> Result<(), ValidationErrors> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationErrors(self.errors))
        }
    }
}
