//! 存储接口
//!
//! PostgreSQL 与内存两种后端实现同一组 trait，行为保持一致。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reporter_core::{
    Doctor, Document, OAuthCredential, Patient, Result, Stored, Template, UsgReport, User,
    UserProfileUpdate,
};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::filter::Filter;
use crate::models::{DocumentMove, MoveStatus, NewDocumentMove, Relocation, SoftDeleted};

/// 文档集合存储
///
/// 除 `find_by_id` 外，所有读写都只作用于未删除的记录。
/// 列表按创建时间倒序、ID 倒序排列。
#[async_trait]
pub trait DocumentStore<T: Document>: Send + Sync {
    async fn insert(&self, body: T) -> Result<Stored<T>>;

    /// 按 ID 查找，包含已软删除的记录
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Stored<T>>>;

    async fn find_active(&self, id: Uuid) -> Result<Option<Stored<T>>>;

    /// 按一组 ID 批量查找，包含已软删除的记录；不存在的 ID 被忽略，结果无序
    async fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Stored<T>>> {
        let mut found = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.find_by_id(*id).await? {
                found.push(record);
            }
        }
        Ok(found)
    }

    async fn list(&self, filter: &Filter, skip: u64, take: u64) -> Result<Vec<Stored<T>>>;

    async fn count(&self, filter: &Filter) -> Result<u64>;

    /// 部分更新，`revision` 加一；记录不存在或已删除时返回 `None`
    async fn update_active(&self, id: Uuid, patch: Map<String, Value>)
        -> Result<Option<Stored<T>>>;

    /// 软删除；若给出 `relocation` 且记录有外部文档，同一事务内登记移动任务
    async fn soft_delete(
        &self,
        id: Uuid,
        relocation: Option<Relocation>,
    ) -> Result<Option<SoftDeleted<T>>>;
}

/// 员工用户存储
#[async_trait]
pub trait UserStore: Send + Sync {
    /// 新建用户，用户名重复时返回冲突错误
    async fn create_user(&self, user: User) -> Result<User>;

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>>;

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>>;

    /// 更新姓名，不触碰密码哈希
    async fn update_user_profile(&self, id: Uuid, update: UserProfileUpdate)
        -> Result<Option<User>>;

    /// 设置新密码（明文传入，内部哈希一次）
    async fn set_user_password(&self, id: Uuid, password: &str) -> Result<bool>;

    async fn delete_user(&self, id: Uuid) -> Result<bool>;
}

/// Google OAuth 凭据的单槽存储
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn current(&self) -> Result<Option<OAuthCredential>>;

    async fn set_current(&self, credential: OAuthCredential) -> Result<()>;
}

/// 文档移动发件箱
#[async_trait]
pub trait OutboxStore: Send + Sync {
    async fn enqueue_move(&self, new_move: NewDocumentMove) -> Result<DocumentMove>;

    /// 到期的待处理任务，按到期时间排序
    async fn due_moves(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<DocumentMove>>;

    async fn complete_move(&self, id: Uuid) -> Result<()>;

    /// 记录失败并安排下一次尝试
    async fn reschedule_move(
        &self,
        id: Uuid,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<()>;

    /// 放弃重试
    async fn fail_move(&self, id: Uuid, error: &str) -> Result<()>;

    async fn list_moves(&self, status: Option<MoveStatus>) -> Result<Vec<DocumentMove>>;
}

/// 同时实现全部存储接口的后端
pub trait Backend:
    DocumentStore<Doctor>
    + DocumentStore<Patient>
    + DocumentStore<Template>
    + DocumentStore<UsgReport>
    + UserStore
    + CredentialStore
    + OutboxStore
    + 'static
{
}

impl<B> Backend for B where
    B: DocumentStore<Doctor>
        + DocumentStore<Patient>
        + DocumentStore<Template>
        + DocumentStore<UsgReport>
        + UserStore
        + CredentialStore
        + OutboxStore
        + 'static
{
}

/// 按关注点拆分的存储句柄
#[derive(Clone)]
pub struct Repositories {
    pub doctors: Arc<dyn DocumentStore<Doctor>>,
    pub patients: Arc<dyn DocumentStore<Patient>>,
    pub templates: Arc<dyn DocumentStore<Template>>,
    pub reports: Arc<dyn DocumentStore<UsgReport>>,
    pub users: Arc<dyn UserStore>,
    pub credentials: Arc<dyn CredentialStore>,
    pub outbox: Arc<dyn OutboxStore>,
}

impl Repositories {
    pub fn from_backend<B: Backend>(backend: Arc<B>) -> Self {
        Self {
            doctors: backend.clone(),
            patients: backend.clone(),
            templates: backend.clone(),
            reports: backend.clone(),
            users: backend.clone(),
            credentials: backend.clone(),
            outbox: backend,
        }
    }
}
