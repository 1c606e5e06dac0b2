//! 核心数据模型定义

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ReporterError, Result};

/// 文档集合中可存储的实体
pub trait Document: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// 集合（表）名
    const COLLECTION: &'static str;
    /// 错误信息中使用的资源名
    const RESOURCE: &'static str;

    /// 关联的外部文档 ID（Google Docs）
    fn backing_document(&self) -> Option<&str> {
        None
    }
}

/// 已持久化的记录：实体字段加上存储层维护的元数据
///
/// 序列化形状与文档数据库一致（`_id`、`__v`、`deleted`、时间戳），
/// 对外返回前需经过 [`crate::utils::sanitize`]。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Stored<T> {
    #[serde(rename = "_id")]
    pub id: Uuid,
    #[serde(rename = "__v")]
    pub revision: i32,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub body: T,
}

impl<T> Stored<T> {
    /// 新建记录，ID 为时间有序的 UUID
    pub fn new(body: T) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            revision: 0,
            deleted: false,
            created_at: now,
            updated_at: now,
            body,
        }
    }
}

/// 转诊/超声医生
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Doctor {
    pub name: String,
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Document for Doctor {
    const COLLECTION: &'static str = "doctors";
    const RESOURCE: &'static str = "Doctor";
}

/// 性别
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    /// 报告中使用的性别代码
    pub fn sex_code(&self) -> &'static str {
        match self {
            Gender::Male => "M",
            Gender::Female => "F",
        }
    }
}

/// 患者
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u8>,
    pub gender: Gender,
}

impl Document for Patient {
    const COLLECTION: &'static str = "patients";
    const RESOURCE: &'static str = "Patient";
}

/// 报告模板，内容保存在 Google Docs 文档中
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub name: String,
    pub drive_file_id: String,
}

impl Document for Template {
    const COLLECTION: &'static str = "templates";
    const RESOURCE: &'static str = "Template";

    fn backing_document(&self) -> Option<&str> {
        Some(&self.drive_file_id)
    }
}

/// 超声检查报告
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UsgReport {
    pub patient: Uuid,
    pub referrer: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sonologist: Option<Uuid>,
    pub date: DateTime<Utc>,
    pub part_of_scan: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub findings: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drive_file_id: Option<String>,
}

impl Document for UsgReport {
    const COLLECTION: &'static str = "usg_reports";
    const RESOURCE: &'static str = "USG Report";

    fn backing_document(&self) -> Option<&str> {
        self.drive_file_id.as_deref()
    }
}

/// 员工用户
///
/// 密码只以哈希形式保存，且从不序列化输出。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    #[serde(skip_serializing, default)]
    pub password: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// 校验明文密码
    pub fn verify_password(&self, password: &str) -> Result<bool> {
        bcrypt::verify(password, &self.password)
            .map_err(|e| ReporterError::Internal(format!("Failed to verify password: {}", e)))
    }
}

/// bcrypt 哈希成本
pub const PASSWORD_HASH_COST: u32 = 10;

/// 对明文密码做一次哈希
pub fn hash_password(password: &str) -> Result<String> {
    bcrypt::hash(password, PASSWORD_HASH_COST)
        .map_err(|e| ReporterError::Internal(format!("Failed to hash password: {}", e)))
}

/// 新用户
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub password: String,
}

/// 用户密码最小长度
pub const MIN_PASSWORD_LENGTH: usize = 6;

impl NewUser {
    /// 校验字段并哈希密码，生成待保存的用户
    pub fn into_user(self) -> Result<User> {
        let mut details = Vec::new();
        if self.first_name.trim().is_empty() {
            details.push("\"firstName\" is required".to_string());
        }
        if self.last_name.trim().is_empty() {
            details.push("\"lastName\" is required".to_string());
        }
        if self.username.trim().is_empty() {
            details.push("\"username\" is required".to_string());
        }
        if self.password.chars().count() < MIN_PASSWORD_LENGTH {
            details.push(format!(
                "\"password\" length must be at least {} characters long",
                MIN_PASSWORD_LENGTH
            ));
        }
        if !details.is_empty() {
            return Err(ReporterError::validation_details(details));
        }

        Ok(User {
            id: Uuid::now_v7(),
            first_name: self.first_name,
            last_name: self.last_name,
            username: self.username,
            password: hash_password(&self.password)?,
            created_at: Utc::now(),
        })
    }
}

/// 用户资料更新（不涉及密码）
#[derive(Debug, Clone, Default)]
pub struct UserProfileUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// Google OAuth 凭据
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OAuthCredential {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub token_type: String,
    /// 过期时间（毫秒时间戳）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<i64>,
}

impl OAuthCredential {
    /// 访问令牌是否已过期（预留一分钟余量）
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expiry_date {
            Some(expiry) => now.timestamp_millis() + 60_000 >= expiry,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_stored_serializes_document_shape() {
        let stored = Stored::new(Doctor {
            name: "Dr. Mehta".to_string(),
            phone: "9876543210".to_string(),
            email: None,
        });
        let value = serde_json::to_value(&stored).unwrap();

        assert_eq!(value["_id"], serde_json::json!(stored.id));
        assert_eq!(value["__v"], 0);
        assert_eq!(value["deleted"], false);
        assert_eq!(value["name"], "Dr. Mehta");
        assert!(value.get("email").is_none());
        assert!(value.get("createdAt").is_some());
    }

    #[test]
    fn test_stored_ids_are_time_ordered() {
        let first = Stored::new(());
        let second = Stored::new(());
        assert!(second.id > first.id);
    }

    #[test]
    fn test_gender_sex_code() {
        assert_eq!(Gender::Male.sex_code(), "M");
        assert_eq!(Gender::Female.sex_code(), "F");
        assert_eq!(serde_json::to_value(Gender::Female).unwrap(), "female");
    }

    #[test]
    fn test_user_password_never_serialized() {
        let user = NewUser {
            first_name: "Asha".to_string(),
            last_name: "Rao".to_string(),
            username: "asha".to_string(),
            password: "s3cret-pass".to_string(),
        }
        .into_user()
        .unwrap();

        assert_eq!(user.password.len(), 60);
        assert!(user.verify_password("s3cret-pass").unwrap());
        assert!(!user.verify_password("wrong").unwrap());

        let value = serde_json::to_value(&user).unwrap();
        assert!(value.get("password").is_none());
        assert_eq!(value["username"], "asha");
    }

    #[test]
    fn test_new_user_rejects_short_password() {
        let err = NewUser {
            first_name: "Asha".to_string(),
            last_name: "Rao".to_string(),
            username: "asha".to_string(),
            password: "123".to_string(),
        }
        .into_user()
        .unwrap_err();
        assert_eq!(err.kind(), "ValidationError");
    }

    #[test]
    fn test_credential_expiry() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let mut credential = OAuthCredential {
            access_token: "token".to_string(),
            refresh_token: None,
            scope: String::new(),
            token_type: "Bearer".to_string(),
            expiry_date: Some(now.timestamp_millis() + 30_000),
        };
        assert!(credential.is_expired(now));

        credential.expiry_date = Some(now.timestamp_millis() + 3_600_000);
        assert!(!credential.is_expired(now));

        credential.expiry_date = None;
        assert!(!credential.is_expired(now));
    }
}
