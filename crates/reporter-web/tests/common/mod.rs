//! 测试用的应用装配：内存存储 + 记录调用的文档服务

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::http::{header::AUTHORIZATION, HeaderValue};
use axum_test::{TestRequest, TestServer};
use reporter_admin::{PaginationConfig, SystemMonitor};
use reporter_core::NewUser;
use reporter_database::{MemoryStore, Repositories};
use reporter_integration::{GoogleWorkspaceClient, OAuthClient, OAuthSettings};
use reporter_web::{create_app, AppState, AuthService, ServerOptions};
use reporter_workflow::testing::RecordingDocumentService;
use reporter_workflow::{DocumentWorkflow, DriveFolders};
use serde_json::{json, Value};
use tokio::sync::Notify;

pub const USERNAME: &str = "reception";
pub const PASSWORD: &str = "secret123";

pub struct TestApp {
    pub server: TestServer,
    pub store: Arc<MemoryStore>,
    pub repos: Repositories,
    pub documents: Arc<RecordingDocumentService>,
    pub monitor: Arc<SystemMonitor>,
    pub token: String,
}

pub fn folders() -> DriveFolders {
    DriveFolders {
        templates: "templates".to_string(),
        deleted_templates: "deleted-templates".to_string(),
        reports: "reports".to_string(),
        deleted_reports: "deleted-reports".to_string(),
    }
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_pagination(PaginationConfig {
            page_size: 10,
            max_page_size: 100,
        })
        .await
    }

    pub async fn with_pagination(pagination: PaginationConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let repos = Repositories::from_backend(store.clone());
        let documents = Arc::new(RecordingDocumentService::new());
        let monitor = Arc::new(SystemMonitor::new().unwrap());

        let workflow = DocumentWorkflow::new(
            documents.clone(),
            repos.clone(),
            folders(),
            Arc::new(Notify::new()),
        );
        let oauth = OAuthClient::new(
            GoogleWorkspaceClient::http_client(Duration::from_secs(5)).unwrap(),
            OAuthSettings {
                client_id: "client-123".to_string(),
                client_secret: "client-secret".to_string(),
                redirect_uri: "http://localhost:3000/oauth_callback".to_string(),
                auth_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
                token_url: "http://127.0.0.1:9/token".to_string(),
                scopes: vec!["https://www.googleapis.com/auth/drive".to_string()],
            },
        );

        let user = NewUser {
            first_name: "Front".to_string(),
            last_name: "Desk".to_string(),
            username: USERNAME.to_string(),
            password: PASSWORD.to_string(),
        }
        .into_user()
        .unwrap();
        let user = repos.users.create_user(user).await.unwrap();

        let auth = Arc::new(AuthService::new(repos.users.clone(), "test-secret", 24));
        let token = auth.issue_token(&user).unwrap();

        let state = AppState {
            repos: repos.clone(),
            workflow: Arc::new(workflow),
            auth,
            oauth: Arc::new(oauth),
            monitor: monitor.clone(),
            pagination,
        };
        let server = TestServer::new(create_app(state, ServerOptions::default())).unwrap();

        Self {
            server,
            store,
            repos,
            documents,
            monitor,
            token,
        }
    }

    fn bearer(&self) -> HeaderValue {
        HeaderValue::from_str(&format!("Bearer {}", self.token)).unwrap()
    }

    pub fn get(&self, path: &str) -> TestRequest {
        self.server.get(path).add_header(AUTHORIZATION, self.bearer())
    }

    pub fn post(&self, path: &str) -> TestRequest {
        self.server.post(path).add_header(AUTHORIZATION, self.bearer())
    }

    pub fn put(&self, path: &str) -> TestRequest {
        self.server.put(path).add_header(AUTHORIZATION, self.bearer())
    }

    pub fn delete(&self, path: &str) -> TestRequest {
        self.server.delete(path).add_header(AUTHORIZATION, self.bearer())
    }

    /// 通过接口创建记录并返回其 ID
    pub async fn create(&self, path: &str, body: Value) -> String {
        let response = self.post(path).json(&body).await;
        response.assert_status(axum::http::StatusCode::CREATED);
        response.json::<Value>()["id"]
            .as_str()
            .unwrap()
            .to_string()
    }

    pub async fn create_doctor(&self, name: &str) -> String {
        self.create(
            "/api/v1/doctor",
            json!({"name": name, "phone": "9876543210"}),
        )
        .await
    }

    pub async fn create_patient(&self, name: &str) -> String {
        self.create(
            "/api/v1/patient",
            json!({"name": name, "phone": "9123456789", "gender": "female", "age": 34}),
        )
        .await
    }
}
