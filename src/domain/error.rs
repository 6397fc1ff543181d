use thiserror::Error;

/// Reasons a candidate post is rejected before anything is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PostValidationError {
    #[error("Invalid post id")]
    InvalidId,
    #[error("Post body is too long")]
    TooLong,
    #[error("Post body is empty")]
    EmptyBody,
    #[error("Post body contains only excluded characters")]
    OnlyExcludedCharacters,
}
