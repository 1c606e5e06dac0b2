//! Web服务器

use std::net::SocketAddr;
use std::time::Instant;

use axum::{
    extract::{Request, State},
    middleware::{self, Next},
    response::Response,
    routing::{get, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::auth::{
    auth_middleware, change_password, current_user, google_login, google_login_url, login_handler,
    update_profile,
};
use crate::handlers::{
    create_doctor, create_patient, delete_doctor, delete_patient, get_doctor, get_patient, health,
    list_doctors, list_patients, metrics, update_doctor, update_patient,
};
use crate::reports::{create_report, delete_report, get_report, list_reports, update_report};
use crate::state::AppState;
use crate::templates::{
    create_template, delete_template, get_template, list_templates, sync_template,
    update_template,
};

/// 路由选项
#[derive(Debug, Clone, Copy)]
pub struct ServerOptions {
    pub enable_cors: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self { enable_cors: true }
    }
}

pub struct WebServer {
    addr: SocketAddr,
    app: Router,
}

impl WebServer {
    pub fn new(addr: SocketAddr, state: AppState, options: ServerOptions) -> Self {
        let app = create_app(state, options);
        Self { addr, app }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        info!("Starting web server on {}", self.addr);

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| anyhow::anyhow!("Failed to start web server: {}", e))?;

        info!("Web server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received");
    }
}

/// 构建完整路由
pub fn create_app(state: AppState, options: ServerOptions) -> Router {
    let app = Router::new()
        // 健康检查与指标（无需token）
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .nest("/api/v1", api_routes(state.clone()))
        .layer(middleware::from_fn_with_state(state.clone(), track_metrics))
        .with_state(state);

    let layers = ServiceBuilder::new().layer(TraceLayer::new_for_http());
    if options.enable_cors {
        app.layer(layers.layer(CorsLayer::permissive()))
    } else {
        app.layer(layers)
    }
}

/// API v1 路由
fn api_routes(state: AppState) -> Router<AppState> {
    let protected = Router::new()
        .route("/doctor", get(list_doctors).post(create_doctor))
        .route(
            "/doctor/:id",
            get(get_doctor).put(update_doctor).delete(delete_doctor),
        )
        .route("/patient", get(list_patients).post(create_patient))
        .route(
            "/patient/:id",
            get(get_patient).put(update_patient).delete(delete_patient),
        )
        .route("/template", get(list_templates).post(create_template))
        .route(
            "/template/:id",
            get(get_template).put(update_template).delete(delete_template),
        )
        .route("/template/:id/sync", post(sync_template))
        .route("/usg-report", get(list_reports).post(create_report))
        .route(
            "/usg-report/:id",
            get(get_report).put(update_report).delete(delete_report),
        )
        .route("/user/me", get(current_user).put(update_profile))
        .route("/user/me/password", put(change_password))
        .route("/auth/get-google-login-url", get(google_login_url))
        .route("/auth/google-login", post(google_login))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware));

    Router::new()
        // 认证路由（无需token）
        .route("/auth/login", post(login_handler))
        .merge(protected)
}

/// 请求计数与耗时
async fn track_metrics(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(request).await;
    state
        .monitor
        .record_http_request(&method, &path, response.status().as_u16(), started.elapsed());
    response
}
