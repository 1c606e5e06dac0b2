//! Google Drive / Docs 文档服务
//!
//! 报告模板与生成的报告都保存为 Google Docs 文档，本模块封装创建、复制、
//! 移动、读取名称与占位符替换等远程操作。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reporter_core::{ReporterError, Result};
use reporter_database::CredentialStore;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::oauth::OAuthClient;
use crate::placeholders::Placeholders;

/// Google Docs 文档的 MIME 类型
pub const GOOGLE_DOC_MIME_TYPE: &str = "application/vnd.google-apps.document";

/// 外部文档服务接口
#[async_trait]
pub trait DocumentService: Send + Sync {
    /// 在目录中新建空白文档，返回文档 ID
    async fn create_blank_document(&self, name: &str, folder_id: &str) -> Result<String>;

    /// 复制文档到目录，返回新文档 ID
    async fn clone_document(&self, source_id: &str, name: &str, folder_id: &str)
        -> Result<String>;

    /// 把文档移到另一个目录
    async fn move_document(
        &self,
        document_id: &str,
        from_folder: Option<&str>,
        to_folder: &str,
    ) -> Result<()>;

    /// 批量替换文档中的占位符
    async fn replace_placeholders(&self, document_id: &str, values: &Placeholders) -> Result<()>;

    /// 读取文档当前名称
    async fn document_name(&self, document_id: &str) -> Result<String>;
}

/// API 端点
#[derive(Debug, Clone)]
pub struct GoogleEndpoints {
    pub drive_api_base: String,
    pub docs_api_base: String,
}

impl Default for GoogleEndpoints {
    fn default() -> Self {
        Self {
            drive_api_base: "https://www.googleapis.com/drive/v3".to_string(),
            docs_api_base: "https://docs.googleapis.com/v1".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DriveFile {
    id: String,
    #[serde(default)]
    name: Option<String>,
}

/// 基于 REST API 的 Google 文档服务
pub struct GoogleWorkspaceClient {
    http: reqwest::Client,
    endpoints: GoogleEndpoints,
    oauth: OAuthClient,
    credentials: Arc<dyn CredentialStore>,
    refresh_lock: Mutex<()>,
}

impl GoogleWorkspaceClient {
    pub fn new(
        http: reqwest::Client,
        endpoints: GoogleEndpoints,
        oauth: OAuthClient,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            http,
            endpoints,
            oauth,
            credentials,
            refresh_lock: Mutex::new(()),
        }
    }

    /// 构建带超时的 HTTP 客户端
    pub fn http_client(timeout: Duration) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("Lab-Reporter/1.0")
            .build()
            .map_err(|e| ReporterError::Config(format!("Failed to build HTTP client: {}", e)))
    }

    /// 取得可用的访问令牌，过期时用刷新令牌换新并写回存储
    async fn access_token(&self) -> Result<String> {
        let credential = self
            .credentials
            .current()
            .await?
            .ok_or(ReporterError::GoogleLoginRequired)?;
        if !credential.is_expired(Utc::now()) {
            return Ok(credential.access_token);
        }

        let _guard = self.refresh_lock.lock().await;
        // 等锁期间可能已被其他请求刷新
        let credential = self
            .credentials
            .current()
            .await?
            .ok_or(ReporterError::GoogleLoginRequired)?;
        if !credential.is_expired(Utc::now()) {
            return Ok(credential.access_token);
        }
        if credential.refresh_token.is_none() {
            warn!("Stored Google credential expired without a refresh token");
            return Err(ReporterError::GoogleLoginRequired);
        }

        let refreshed = self.oauth.refresh(&credential).await?;
        self.credentials.set_current(refreshed.clone()).await?;
        Ok(refreshed.access_token)
    }

    async fn send(&self, operation: &str, request: reqwest::RequestBuilder) -> Result<Value> {
        let token = self.access_token().await?;
        let response = request.bearer_auth(token).send().await.map_err(|e| {
            error!("Google API {} request failed: {}", operation, e);
            ReporterError::External(format!("Google API {} failed: {}", operation, e))
        })?;

        let status = response.status();
        if status.is_success() {
            debug!("Google API {} succeeded", operation);
            return response.json::<Value>().await.map_err(|e| {
                ReporterError::External(format!("Invalid Google API {} response: {}", operation, e))
            });
        }

        let body = response.text().await.unwrap_or_default();
        error!("Google API {} returned {}: {}", operation, status, body);
        match status {
            reqwest::StatusCode::UNAUTHORIZED => Err(ReporterError::GoogleLoginRequired),
            reqwest::StatusCode::NOT_FOUND => Err(ReporterError::External(format!(
                "Google API {} failed: document not found",
                operation
            ))),
            _ => Err(ReporterError::External(format!(
                "Google API {} failed with status {}",
                operation, status
            ))),
        }
    }

    fn drive_url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoints.drive_api_base.trim_end_matches('/'), path)
    }

    fn docs_url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoints.docs_api_base.trim_end_matches('/'), path)
    }
}

fn parse_file(operation: &str, value: Value) -> Result<DriveFile> {
    serde_json::from_value(value).map_err(|e| {
        ReporterError::External(format!("Unexpected Google API {} response: {}", operation, e))
    })
}

#[async_trait]
impl DocumentService for GoogleWorkspaceClient {
    async fn create_blank_document(&self, name: &str, folder_id: &str) -> Result<String> {
        let request = self
            .http
            .post(self.drive_url("files"))
            .query(&[("fields", "id")])
            .json(&json!({
                "name": name,
                "mimeType": GOOGLE_DOC_MIME_TYPE,
                "parents": [folder_id],
            }));

        let file = parse_file("create", self.send("create", request).await?)?;
        info!("Created blank document {} ({})", file.id, name);
        Ok(file.id)
    }

    async fn clone_document(
        &self,
        source_id: &str,
        name: &str,
        folder_id: &str,
    ) -> Result<String> {
        let request = self
            .http
            .post(self.drive_url(&format!("files/{}/copy", source_id)))
            .query(&[("fields", "id")])
            .json(&json!({
                "name": name,
                "parents": [folder_id],
            }));

        let file = parse_file("copy", self.send("copy", request).await?)?;
        info!("Cloned document {} into {} ({})", source_id, file.id, name);
        Ok(file.id)
    }

    async fn move_document(
        &self,
        document_id: &str,
        from_folder: Option<&str>,
        to_folder: &str,
    ) -> Result<()> {
        let mut query = vec![("addParents", to_folder), ("fields", "id,parents")];
        if let Some(from_folder) = from_folder {
            query.push(("removeParents", from_folder));
        }
        let request = self
            .http
            .patch(self.drive_url(&format!("files/{}", document_id)))
            .query(&query)
            .json(&json!({}));

        self.send("move", request).await?;
        info!("Moved document {} to folder {}", document_id, to_folder);
        Ok(())
    }

    async fn replace_placeholders(&self, document_id: &str, values: &Placeholders) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        let request = self
            .http
            .post(self.docs_url(&format!("documents/{}:batchUpdate", document_id)))
            .json(&values.to_batch_update());

        self.send("batchUpdate", request).await?;
        debug!("Replaced placeholders in document {}", document_id);
        Ok(())
    }

    async fn document_name(&self, document_id: &str) -> Result<String> {
        let request = self
            .http
            .get(self.drive_url(&format!("files/{}", document_id)))
            .query(&[("fields", "id,name")]);

        let file = parse_file("get", self.send("get", request).await?)?;
        file.name.ok_or_else(|| {
            ReporterError::External(format!("Document {} has no name", document_id))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::{OAuthSettings, DEFAULT_SCOPES};
    use axum::extract::{Path, Query, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use reporter_core::OAuthCredential;
    use reporter_database::MemoryStore;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    /// 记录收到的请求
    #[derive(Clone, Default)]
    struct Recorder {
        calls: Arc<StdMutex<Vec<(String, Option<String>, Value)>>>,
    }

    impl Recorder {
        fn record(&self, op: &str, headers: &HeaderMap, body: Value) {
            let auth = headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            self.calls.lock().unwrap().push((op.to_string(), auth, body));
        }

        fn calls(&self) -> Vec<(String, Option<String>, Value)> {
            self.calls.lock().unwrap().clone()
        }
    }

    async fn spawn_fake_google(recorder: Recorder) -> String {
        let app = Router::new()
            .route(
                "/drive/files",
                post(
                    |State(r): State<Recorder>, headers: HeaderMap, Json(body): Json<Value>| async move {
                        r.record("create", &headers, body);
                        Json(json!({"id": "blank-doc"}))
                    },
                ),
            )
            .route(
                "/drive/files/:id/copy",
                post(
                    |State(r): State<Recorder>,
                     Path(id): Path<String>,
                     headers: HeaderMap,
                     Json(body): Json<Value>| async move {
                        r.record(&format!("copy:{}", id), &headers, body);
                        Json(json!({"id": format!("{}-copy", id)}))
                    },
                ),
            )
            .route(
                "/drive/files/:id",
                get(|Path(id): Path<String>| async move {
                    if id == "missing" {
                        Err(StatusCode::NOT_FOUND)
                    } else {
                        Ok(Json(json!({"id": id, "name": "Abdomen Template"})))
                    }
                })
                .patch(
                    |State(r): State<Recorder>,
                     Path(id): Path<String>,
                     Query(query): Query<HashMap<String, String>>,
                     headers: HeaderMap| async move {
                        r.record(&format!("move:{}", id), &headers, json!(query));
                        Json(json!({"id": id}))
                    },
                ),
            )
            .route(
                "/docs/documents/:id",
                post(
                    |State(r): State<Recorder>,
                     Path(id): Path<String>,
                     headers: HeaderMap,
                     Json(body): Json<Value>| async move {
                        r.record(&format!("batch:{}", id), &headers, body);
                        Json(json!({"documentId": id}))
                    },
                ),
            )
            .route(
                "/token",
                post(|body: String| async move {
                    assert!(body.contains("grant_type=refresh_token"));
                    Json(json!({
                        "access_token": "fresh-token",
                        "expires_in": 3600,
                        "token_type": "Bearer",
                    }))
                }),
            )
            .with_state(recorder);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    async fn client(base: &str, credential: Option<OAuthCredential>) -> (GoogleWorkspaceClient, MemoryStore) {
        let store = MemoryStore::new();
        if let Some(credential) = credential {
            store.set_current(credential).await.unwrap();
        }
        let http = reqwest::Client::new();
        let oauth = OAuthClient::new(
            http.clone(),
            OAuthSettings {
                client_id: "id".to_string(),
                client_secret: "secret".to_string(),
                redirect_uri: "http://localhost/cb".to_string(),
                auth_url: format!("{}/auth", base),
                token_url: format!("{}/token", base),
                scopes: DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
            },
        );
        let endpoints = GoogleEndpoints {
            drive_api_base: format!("{}/drive", base),
            docs_api_base: format!("{}/docs", base),
        };
        let client = GoogleWorkspaceClient::new(http, endpoints, oauth, Arc::new(store.clone()));
        (client, store)
    }

    fn credential(access_token: &str, expiry_date: Option<i64>) -> OAuthCredential {
        OAuthCredential {
            access_token: access_token.to_string(),
            refresh_token: Some("refresh".to_string()),
            scope: String::new(),
            token_type: "Bearer".to_string(),
            expiry_date,
        }
    }

    #[tokio::test]
    async fn test_missing_credential_requires_login() {
        let base = spawn_fake_google(Recorder::default()).await;
        let (client, _) = client(&base, None).await;

        let err = client.create_blank_document("Doc", "folder").await.unwrap_err();
        assert!(matches!(err, ReporterError::GoogleLoginRequired));
    }

    #[tokio::test]
    async fn test_create_and_clone_send_expected_requests() {
        let recorder = Recorder::default();
        let base = spawn_fake_google(recorder.clone()).await;
        let (client, _) = client(&base, Some(credential("valid-token", None))).await;

        let blank = client.create_blank_document("Abdomen", "templates").await.unwrap();
        assert_eq!(blank, "blank-doc");
        let cloned = client
            .clone_document("tmpl-1", "Ravi - 05-01-2020", "reports")
            .await
            .unwrap();
        assert_eq!(cloned, "tmpl-1-copy");

        let calls = recorder.calls();
        assert_eq!(calls[0].0, "create");
        assert_eq!(calls[0].1.as_deref(), Some("Bearer valid-token"));
        assert_eq!(
            calls[0].2,
            json!({"name": "Abdomen", "mimeType": GOOGLE_DOC_MIME_TYPE, "parents": ["templates"]})
        );
        assert_eq!(calls[1].0, "copy:tmpl-1");
        assert_eq!(calls[1].2, json!({"name": "Ravi - 05-01-2020", "parents": ["reports"]}));
    }

    #[tokio::test]
    async fn test_move_and_placeholders() {
        let recorder = Recorder::default();
        let base = spawn_fake_google(recorder.clone()).await;
        let (client, _) = client(&base, Some(credential("valid-token", None))).await;

        client
            .move_document("doc-9", Some("reports"), "deleted-reports")
            .await
            .unwrap();
        // 空集合不发请求
        client
            .replace_placeholders("doc-9", &Placeholders::new())
            .await
            .unwrap();
        client
            .replace_placeholders("doc-9", &Placeholders::new().with("name", "Ravi"))
            .await
            .unwrap();

        let calls = recorder.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0, "move:doc-9");
        assert_eq!(calls[0].2["addParents"], "deleted-reports");
        assert_eq!(calls[0].2["removeParents"], "reports");
        assert_eq!(calls[1].0, "batch:doc-9:batchUpdate");
        assert_eq!(
            calls[1].2["requests"][0]["replaceAllText"]["containsText"]["text"],
            "{{name}}"
        );
    }

    #[tokio::test]
    async fn test_expired_credential_is_refreshed_and_stored() {
        let recorder = Recorder::default();
        let base = spawn_fake_google(recorder.clone()).await;
        let (client, store) = client(&base, Some(credential("stale-token", Some(0)))).await;

        client.create_blank_document("Doc", "folder").await.unwrap();

        let calls = recorder.calls();
        assert_eq!(calls[0].1.as_deref(), Some("Bearer fresh-token"));
        let stored = store.current().await.unwrap().unwrap();
        assert_eq!(stored.access_token, "fresh-token");
        assert_eq!(stored.refresh_token.as_deref(), Some("refresh"));
    }

    #[tokio::test]
    async fn test_document_name_and_not_found() {
        let base = spawn_fake_google(Recorder::default()).await;
        let (client, _) = client(&base, Some(credential("valid-token", None))).await;

        assert_eq!(
            client.document_name("tmpl-1").await.unwrap(),
            "Abdomen Template"
        );
        let err = client.document_name("missing").await.unwrap_err();
        assert_eq!(err.kind(), "ExternalServiceError");
    }
}
