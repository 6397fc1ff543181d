use serde::{Deserialize, Serialize};

use crate::domain::entities::{PostRecord, PostStatRecord};

#[derive(Debug, Deserialize)]
pub struct CreatePostRequest {
    pub post_id: Option<String>,
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PostIdQuery {
    pub id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreatePostResponse {
    pub data: PostRecord,
}

#[derive(Debug, Serialize)]
pub struct PostResponse {
    pub post: PostRecord,
}

#[derive(Debug, Serialize)]
pub struct PostStatResponse {
    pub post: PostStatRecord,
}
