//! Google OAuth2 授权
//!
//! 生成授权链接、用授权码换取凭据、刷新过期的访问令牌。

use chrono::Utc;
use reporter_core::{OAuthCredential, ReporterError, Result};
use serde::Deserialize;
use tracing::{error, info};
use url::Url;

/// Drive 与 Docs 所需权限
pub const DEFAULT_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/drive",
    "https://www.googleapis.com/auth/documents",
];

/// OAuth 客户端参数
#[derive(Debug, Clone)]
pub struct OAuthSettings {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub auth_url: String,
    pub token_url: String,
    pub scopes: Vec<String>,
}

/// 令牌端点响应
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl TokenResponse {
    fn into_credential(self, previous_refresh_token: Option<String>) -> OAuthCredential {
        OAuthCredential {
            access_token: self.access_token,
            refresh_token: self.refresh_token.or(previous_refresh_token),
            scope: self.scope.unwrap_or_default(),
            token_type: self.token_type.unwrap_or_else(|| "Bearer".to_string()),
            expiry_date: self
                .expires_in
                .map(|secs| Utc::now().timestamp_millis() + secs * 1000),
        }
    }
}

/// OAuth2 客户端
#[derive(Debug, Clone)]
pub struct OAuthClient {
    http: reqwest::Client,
    settings: OAuthSettings,
}

impl OAuthClient {
    pub fn new(http: reqwest::Client, settings: OAuthSettings) -> Self {
        Self { http, settings }
    }

    /// 生成离线访问的授权链接
    pub fn authorization_url(&self) -> Result<String> {
        let scope = self.settings.scopes.join(" ");
        let url = Url::parse_with_params(
            &self.settings.auth_url,
            &[
                ("access_type", "offline"),
                ("prompt", "consent"),
                ("response_type", "code"),
                ("client_id", self.settings.client_id.as_str()),
                ("redirect_uri", self.settings.redirect_uri.as_str()),
                ("scope", scope.as_str()),
            ],
        )
        .map_err(|e| ReporterError::Config(format!("Invalid OAuth authorization URL: {}", e)))?;
        Ok(url.into())
    }

    /// 用授权码换取凭据
    pub async fn exchange_code(&self, code: &str) -> Result<OAuthCredential> {
        let response = self
            .request_token(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", self.settings.client_id.as_str()),
                ("client_secret", self.settings.client_secret.as_str()),
                ("redirect_uri", self.settings.redirect_uri.as_str()),
            ])
            .await?;

        info!("Exchanged Google authorization code for credentials");
        Ok(response.into_credential(None))
    }

    /// 刷新访问令牌，保留原刷新令牌（若响应未返回新的）
    pub async fn refresh(&self, credential: &OAuthCredential) -> Result<OAuthCredential> {
        let refresh_token = credential
            .refresh_token
            .as_deref()
            .ok_or(ReporterError::GoogleLoginRequired)?;

        let response = self
            .request_token(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.settings.client_id.as_str()),
                ("client_secret", self.settings.client_secret.as_str()),
            ])
            .await?;

        info!("Refreshed Google access token");
        Ok(response.into_credential(credential.refresh_token.clone()))
    }

    async fn request_token(&self, form: &[(&str, &str)]) -> Result<TokenResponse> {
        let response = self
            .http
            .post(&self.settings.token_url)
            .form(form)
            .send()
            .await
            .map_err(|e| ReporterError::External(format!("Token request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<TokenResponse>()
                .await
                .map_err(|e| ReporterError::External(format!("Invalid token response: {}", e)));
        }

        let body = response.text().await.unwrap_or_default();
        error!("Token endpoint returned {}: {}", status, body);
        if status == reqwest::StatusCode::BAD_REQUEST || status == reqwest::StatusCode::UNAUTHORIZED
        {
            // 授权码无效或刷新令牌被吊销，需要重新登录
            Err(ReporterError::GoogleLoginRequired)
        } else {
            Err(ReporterError::External(format!(
                "Token endpoint returned {}",
                status
            )))
        }
    }
}
