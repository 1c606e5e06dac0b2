//! 应用共享状态

use std::sync::Arc;

use reporter_admin::{PaginationConfig, SystemMonitor};
use reporter_database::Repositories;
use reporter_integration::OAuthClient;
use reporter_workflow::DocumentWorkflow;

use crate::auth::AuthService;

/// 所有处理器共享的状态
#[derive(Clone)]
pub struct AppState {
    pub repos: Repositories,
    pub workflow: Arc<DocumentWorkflow>,
    pub auth: Arc<AuthService>,
    pub oauth: Arc<OAuthClient>,
    pub monitor: Arc<SystemMonitor>,
    pub pagination: PaginationConfig,
}
