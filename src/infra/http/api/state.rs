use std::sync::Arc;

use crate::application::posts::PostService;
use crate::application::repos::HealthRepo;
use crate::cache::PopularityCache;

use super::rate_limit::ApiRateLimiter;

#[derive(Clone)]
pub struct ApiState {
    pub posts: Arc<PostService>,
    pub stats: PopularityCache,
    pub health: Arc<dyn HealthRepo>,
    pub rate_limiter: Arc<ApiRateLimiter>,
}
