//! Posts handlers

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::response::IntoResponse;

use crate::application::posts::PostError;
use crate::cache::StatsError;

use super::error::ApiError;
use super::models::{
    CreatePostRequest, CreatePostResponse, PostIdQuery, PostResponse, PostStatResponse,
};
use super::state::ApiState;

const INVALID_POST: &str = "Invalid post";
const INVALID_POST_ID: &str = "Invalid Post ID";

pub async fn create_post(
    State(state): State<ApiState>,
    payload: Result<Json<CreatePostRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) =
        payload.map_err(|err| ApiError::bad_request(INVALID_POST, Some(err.body_text())))?;

    // Presence is checked before trimming; a blank body is left to post validation.
    let post_id = present(request.post_id).ok_or_else(|| ApiError::bad_request(INVALID_POST, None))?;
    let content = present(request.content).ok_or_else(|| ApiError::bad_request(INVALID_POST, None))?;

    if !has_id_character(&post_id) {
        return Err(ApiError::bad_request(INVALID_POST_ID, None));
    }

    let post = state
        .posts
        .create_post(post_id.trim(), content.trim())
        .await
        .map_err(post_to_api)?;

    Ok(Json(CreatePostResponse { data: post }))
}

pub async fn find_post(
    State(state): State<ApiState>,
    Query(query): Query<PostIdQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let id = non_empty(query.id).ok_or_else(|| ApiError::bad_request(INVALID_POST_ID, None))?;

    let post = state.posts.find_post(&id).await.map_err(post_to_api)?;

    Ok(Json(PostResponse { post }))
}

pub async fn post_stats(
    State(state): State<ApiState>,
    Query(query): Query<PostIdQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let id = non_empty(query.id).ok_or_else(|| ApiError::bad_request(INVALID_POST_ID, None))?;

    let stat = state.stats.get_stat(&id).await.map_err(stats_to_api)?;

    Ok(Json(PostStatResponse { post: stat }))
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.is_empty())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Ids must carry at least one of `[a-z0-9-_]`, compared case-insensitively.
fn has_id_character(id: &str) -> bool {
    id.to_lowercase()
        .chars()
        .any(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

pub(crate) fn post_to_api(err: PostError) -> ApiError {
    match err {
        PostError::Invalid(invalid) => ApiError::bad_request(invalid.to_string(), None),
        PostError::Duplicate => ApiError::conflict(err.to_string()),
        PostError::NotFound => ApiError::not_found(err.to_string()),
        PostError::BadRequest(ref source) => {
            ApiError::bad_request(err.to_string(), Some(source.to_string()))
        }
        PostError::Unavailable(source) => ApiError::unavailable(Some(source.to_string())),
    }
}

pub(crate) fn stats_to_api(err: StatsError) -> ApiError {
    match err {
        StatsError::NotFound => ApiError::not_found(err.to_string()),
        StatsError::Repo(source) => ApiError::unavailable(Some(source.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use super::*;
    use crate::application::repos::RepoError;
    use crate::domain::error::PostValidationError;

    #[test]
    fn id_character_check_is_case_insensitive() {
        assert!(has_id_character("Post-1"));
        assert!(has_id_character("ABC"));
        assert!(has_id_character("___"));
        assert!(!has_id_character("!!!"));
        assert!(!has_id_character("éàü"));
    }

    #[test]
    fn blank_fields_count_as_missing() {
        assert_eq!(non_empty(Some("  id  ".to_string())).as_deref(), Some("id"));
        assert_eq!(non_empty(Some("   ".to_string())), None);
        assert_eq!(non_empty(None), None);
    }

    #[test]
    fn whitespace_only_field_is_present() {
        assert_eq!(present(Some("   ".to_string())).as_deref(), Some("   "));
        assert_eq!(present(Some(String::new())), None);
        assert_eq!(present(None), None);
    }

    #[test]
    fn post_errors_map_to_statuses() {
        assert_eq!(
            post_to_api(PostError::Invalid(PostValidationError::TooLong)).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(post_to_api(PostError::Duplicate).status(), StatusCode::CONFLICT);
        assert_eq!(post_to_api(PostError::NotFound).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            post_to_api(PostError::BadRequest("pool closed".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            post_to_api(PostError::Unavailable(RepoError::Timeout)).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn stats_errors_map_to_statuses() {
        assert_eq!(stats_to_api(StatsError::NotFound).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            stats_to_api(StatsError::Repo(RepoError::Timeout)).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
