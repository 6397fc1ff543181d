//! Validation gate applied to every candidate post before persistence.

use crate::domain::error::PostValidationError;
use crate::domain::words::{extract_words, is_excluded};

pub const MAX_BODY_CHARS: usize = 1000;

/// Check a candidate post; the first failing rule wins.
pub fn validate_post(id: &str, body: &str) -> Result<(), PostValidationError> {
    if id.is_empty() {
        return Err(PostValidationError::InvalidId);
    }

    if body.chars().count() > MAX_BODY_CHARS {
        return Err(PostValidationError::TooLong);
    }

    // Only the first space is removed here.
    if body.replacen(' ', "", 1).is_empty() {
        return Err(PostValidationError::EmptyBody);
    }

    if body.chars().all(is_excluded) {
        return Err(PostValidationError::OnlyExcludedCharacters);
    }

    if extract_words(body).is_empty() {
        return Err(PostValidationError::OnlyExcludedCharacters);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_regular_body() {
        assert_eq!(validate_post("post-1", "Hello world foo"), Ok(()));
    }

    #[test]
    fn rejects_empty_id() {
        assert_eq!(
            validate_post("", "Hello"),
            Err(PostValidationError::InvalidId)
        );
    }

    #[test]
    fn rejects_body_over_limit() {
        let body = "a".repeat(MAX_BODY_CHARS + 1);
        assert_eq!(
            validate_post("post-1", &body),
            Err(PostValidationError::TooLong)
        );

        let body = "a".repeat(MAX_BODY_CHARS);
        assert_eq!(validate_post("post-1", &body), Ok(()));
    }

    #[test]
    fn limit_counts_characters() {
        let body = "é".repeat(MAX_BODY_CHARS);
        assert_eq!(validate_post("post-1", &body), Ok(()));
    }

    #[test]
    fn rejects_empty_and_single_space_bodies() {
        assert_eq!(
            validate_post("post-1", ""),
            Err(PostValidationError::EmptyBody)
        );
        assert_eq!(
            validate_post("post-1", " "),
            Err(PostValidationError::EmptyBody)
        );
    }

    #[test]
    fn rejects_bodies_made_of_excluded_characters() {
        for body in ["  ", "...", "!?", "- _ =", "(){}[]<>", "\\|/~`"] {
            assert_eq!(
                validate_post("post-1", body),
                Err(PostValidationError::OnlyExcludedCharacters),
                "body {body:?}"
            );
        }
    }

    #[test]
    fn one_real_word_is_enough() {
        assert_eq!(validate_post("post-1", "ok ?"), Ok(()));
        assert_eq!(validate_post("post-1", "?? x"), Ok(()));
    }
}
