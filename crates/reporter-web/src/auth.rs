//! 用户认证
//!
//! 登录签发 HS256 JWT，中间件校验 `Authorization: Bearer` 并把当前用户放入请求扩展。
//! Google 授权链接与授权码换取也在这里。

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::Utc;
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use reporter_core::{
    sanitize, ReporterError, Result, User, UserProfileUpdate, MIN_PASSWORD_LENGTH,
};
use reporter_database::UserStore;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ApiResult, JsonBody};
use crate::state::AppState;
use crate::validation::{field, BodySchema, FieldKind, Mode};

const LOGIN_SCHEMA: BodySchema = BodySchema {
    fields: &[
        field("username", FieldKind::Text { min_len: 1 }, true),
        field("password", FieldKind::Secret { min_len: 1 }, true),
    ],
    immutable: &[],
};

const GOOGLE_LOGIN_SCHEMA: BodySchema = BodySchema {
    fields: &[field("code", FieldKind::Text { min_len: 1 }, true)],
    immutable: &[],
};

const PROFILE_SCHEMA: BodySchema = BodySchema {
    fields: &[
        field("firstName", FieldKind::Text { min_len: 1 }, false),
        field("lastName", FieldKind::Text { min_len: 1 }, false),
    ],
    immutable: &["username", "password"],
};

const PASSWORD_SCHEMA: BodySchema = BodySchema {
    fields: &[field(
        "password",
        FieldKind::Secret {
            min_len: MIN_PASSWORD_LENGTH,
        },
        true,
    )],
    immutable: &[],
};

/// JWT Claims
#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String, // 用户ID
    iat: usize,  // 签发时间
    exp: usize,  // 过期时间
}

/// 登录响应
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: Value,
}

/// 认证服务
pub struct AuthService {
    users: Arc<dyn UserStore>,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    token_expiry_hours: i64,
}

impl AuthService {
    pub fn new(users: Arc<dyn UserStore>, jwt_secret: &str, token_expiry_hours: u64) -> Self {
        Self {
            users,
            encoding_key: EncodingKey::from_secret(jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(jwt_secret.as_bytes()),
            token_expiry_hours: i64::try_from(token_expiry_hours).unwrap_or(24),
        }
    }

    /// 用户名密码登录
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResponse> {
        let user = self
            .users
            .find_user_by_username(username)
            .await?
            .ok_or_else(|| ReporterError::NotFound("User not found".to_string()))?;

        if !user.verify_password(password)? {
            return Err(ReporterError::Unauthenticated("Invalid password".to_string()));
        }

        Ok(LoginResponse {
            token: self.issue_token(&user)?,
            user: user_view(&user)?,
        })
    }

    /// 签发JWT
    pub fn issue_token(&self, user: &User) -> Result<String> {
        let now = Utc::now();
        let exp = now + chrono::Duration::hours(self.token_expiry_hours);
        let claims = Claims {
            sub: user.id.to_string(),
            iat: usize::try_from(now.timestamp()).unwrap_or(0),
            exp: usize::try_from(exp.timestamp()).unwrap_or(0),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| ReporterError::Internal(format!("Failed to sign token: {}", e)))
    }

    /// 验证JWT并取得对应用户
    pub async fn verify_token(&self, token: &str) -> Result<User> {
        let data = decode::<Claims>(token, &self.decoding_key, &Validation::new(Algorithm::HS256))
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => {
                    ReporterError::Unauthenticated("Token expired".to_string())
                }
                _ => ReporterError::Unauthenticated("Authentication invalid".to_string()),
            })?;

        let id = Uuid::parse_str(&data.claims.sub)
            .map_err(|_| ReporterError::Unauthenticated("Authentication invalid".to_string()))?;
        self.users
            .find_user_by_id(id)
            .await?
            .ok_or_else(|| ReporterError::Unauthenticated("User no longer exists".to_string()))
    }
}

fn user_view(user: &User) -> Result<Value> {
    Ok(sanitize(serde_json::to_value(user)?))
}

/// 认证中间件
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> ApiResult<Response> {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ReporterError::Unauthenticated("Authentication invalid".to_string()))?;

    let user = state.auth.verify_token(token).await?;
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// 登录处理器
pub async fn login_handler(
    State(state): State<AppState>,
    JsonBody(body): JsonBody,
) -> ApiResult<impl IntoResponse> {
    let fields = LOGIN_SCHEMA.validate(&body, Mode::Create)?;
    let username = text(&fields, "username");
    info!("Login attempt for user: {}", username);

    match state.auth.login(username, text(&fields, "password")).await {
        Ok(response) => {
            info!("User logged in successfully: {}", username);
            Ok(Json(response))
        }
        Err(e) => {
            warn!("Login failed for {}: {}", username, e);
            Err(e.into())
        }
    }
}

/// 获取当前用户信息
pub async fn current_user(Extension(user): Extension<User>) -> ApiResult<impl IntoResponse> {
    Ok(Json(user_view(&user)?))
}

/// 更新当前用户的姓名
pub async fn update_profile(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    JsonBody(body): JsonBody,
) -> ApiResult<impl IntoResponse> {
    let fields = PROFILE_SCHEMA.validate(&body, Mode::Update)?;
    let update = UserProfileUpdate {
        first_name: fields.get("firstName").and_then(Value::as_str).map(str::to_string),
        last_name: fields.get("lastName").and_then(Value::as_str).map(str::to_string),
    };

    let updated = state
        .repos
        .users
        .update_user_profile(user.id, update)
        .await?
        .ok_or_else(|| ReporterError::NotFound("User not found".to_string()))?;
    info!(user = %updated.username, "User profile updated");
    Ok(Json(user_view(&updated)?))
}

/// 修改当前用户的密码
pub async fn change_password(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    JsonBody(body): JsonBody,
) -> ApiResult<impl IntoResponse> {
    let fields = PASSWORD_SCHEMA.validate(&body, Mode::Create)?;
    if !state
        .repos
        .users
        .set_user_password(user.id, text(&fields, "password"))
        .await?
    {
        return Err(ReporterError::NotFound("User not found".to_string()).into());
    }
    info!(user = %user.username, "User password changed");
    Ok(axum::http::StatusCode::NO_CONTENT)
}

/// 返回 Google 授权链接
pub async fn google_login_url(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let url = state.oauth.authorization_url()?;
    Ok(Json(json!({ "url": url })))
}

/// 用授权码换取并保存 Google 凭据
pub async fn google_login(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    JsonBody(body): JsonBody,
) -> ApiResult<impl IntoResponse> {
    let fields = GOOGLE_LOGIN_SCHEMA.validate(&body, Mode::Create)?;
    let credential = state.oauth.exchange_code(text(&fields, "code")).await?;
    state.repos.credentials.set_current(credential).await?;

    info!(user = %user.username, "Google credentials stored");
    Ok(Json(json!({ "success": true })))
}

fn text<'a>(fields: &'a serde_json::Map<String, Value>, name: &str) -> &'a str {
    fields.get(name).and_then(Value::as_str).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reporter_core::NewUser;
    use reporter_database::MemoryStore;

    async fn service_with_user() -> (AuthService, User) {
        let store = Arc::new(MemoryStore::new());
        let user = NewUser {
            first_name: "Asha".to_string(),
            last_name: "Rao".to_string(),
            username: "asha".to_string(),
            password: "secret123".to_string(),
        }
        .into_user()
        .unwrap();
        let user = store.create_user(user).await.unwrap();
        (AuthService::new(store, "test-secret", 24), user)
    }

    #[tokio::test]
    async fn test_login_issues_verifiable_token() {
        let (auth, user) = service_with_user().await;
        let response = auth.login("asha", "secret123").await.unwrap();
        assert_eq!(response.user["username"], "asha");
        assert!(response.user.get("password").is_none());

        let verified = auth.verify_token(&response.token).await.unwrap();
        assert_eq!(verified.id, user.id);
    }

    #[tokio::test]
    async fn test_login_failures() {
        let (auth, _) = service_with_user().await;
        assert!(matches!(
            auth.login("nobody", "secret123").await,
            Err(ReporterError::NotFound(_))
        ));
        assert!(matches!(
            auth.login("asha", "wrong-password").await,
            Err(ReporterError::Unauthenticated(_))
        ));
    }

    #[tokio::test]
    async fn test_token_signed_with_other_secret_rejected() {
        let (auth, user) = service_with_user().await;
        let other = AuthService::new(Arc::new(MemoryStore::new()), "other-secret", 24);
        let token = other.issue_token(&user).unwrap();
        assert!(matches!(
            auth.verify_token(&token).await,
            Err(ReporterError::Unauthenticated(_))
        ));
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let (auth, user) = service_with_user().await;
        let past = Utc::now() - chrono::Duration::hours(2);
        let claims = Claims {
            sub: user.id.to_string(),
            iat: past.timestamp() as usize,
            exp: past.timestamp() as usize,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();

        match auth.verify_token(&token).await {
            Err(ReporterError::Unauthenticated(message)) => assert_eq!(message, "Token expired"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_token_for_deleted_user_rejected() {
        let store = Arc::new(MemoryStore::new());
        let user = store
            .create_user(
                NewUser {
                    first_name: "Ravi".to_string(),
                    last_name: "K".to_string(),
                    username: "ravi".to_string(),
                    password: "secret123".to_string(),
                }
                .into_user()
                .unwrap(),
            )
            .await
            .unwrap();
        let auth = AuthService::new(store.clone(), "test-secret", 24);
        let token = auth.issue_token(&user).unwrap();

        store.delete_user(user.id).await.unwrap();
        assert!(auth.verify_token(&token).await.is_err());
    }
}
