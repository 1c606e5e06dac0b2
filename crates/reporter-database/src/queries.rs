//! PostgreSQL 存储后端

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reporter_core::{
    hash_password, Doctor, Document, OAuthCredential, Patient, ReporterError, Result, Stored,
    Template, UsgReport, User, UserProfileUpdate,
};
use serde_json::{Map, Value};
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use crate::connection::DatabasePool;
use crate::filter::{escape_like, Condition, Filter};
use crate::models::*;
use crate::store::{CredentialStore, DocumentStore, OutboxStore, UserStore};

const DOCUMENT_COLUMNS: &str = "id, body, deleted, revision, created_at, updated_at";

const MOVE_COLUMNS: &str = "id, document_id, from_folder, to_folder, status, attempts, \
                            last_error, next_attempt_at, created_at, updated_at";

/// 基于 PostgreSQL 的存储
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: DatabasePool,
}

impl PgStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }

    /// 创建数据库表
    pub async fn create_tables(&self) -> Result<()> {
        let pool = self.pool.pool();

        // 文档集合表
        for collection in [
            Doctor::COLLECTION,
            Patient::COLLECTION,
            Template::COLLECTION,
            UsgReport::COLLECTION,
        ] {
            sqlx::query(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS {collection} (
                    id UUID PRIMARY KEY,
                    body JSONB NOT NULL,
                    deleted BOOLEAN NOT NULL DEFAULT FALSE,
                    revision INTEGER NOT NULL DEFAULT 0,
                    created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                    updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
                )
                "#
            ))
            .execute(pool)
            .await
            .map_err(|e| ReporterError::Database(e.to_string()))?;
        }

        // 用户表
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id UUID PRIMARY KEY,
                first_name VARCHAR(255) NOT NULL,
                last_name VARCHAR(255) NOT NULL,
                username VARCHAR(255) UNIQUE NOT NULL,
                password VARCHAR(255) NOT NULL,
                deleted BOOLEAN NOT NULL DEFAULT FALSE,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(pool)
        .await
        .map_err(|e| ReporterError::Database(e.to_string()))?;

        // OAuth 凭据单槽表
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS oauth_credentials (
                slot SMALLINT PRIMARY KEY CHECK (slot = 1),
                content JSONB NOT NULL,
                updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(pool)
        .await
        .map_err(|e| ReporterError::Database(e.to_string()))?;

        // 文档移动发件箱
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS document_moves (
                id UUID PRIMARY KEY,
                document_id VARCHAR(255) NOT NULL,
                from_folder VARCHAR(255),
                to_folder VARCHAR(255) NOT NULL,
                status VARCHAR(20) NOT NULL DEFAULT 'PENDING',
                attempts INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                next_attempt_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(pool)
        .await
        .map_err(|e| ReporterError::Database(e.to_string()))?;

        self.create_indexes().await?;

        tracing::info!("Database tables created successfully");
        Ok(())
    }

    /// 创建数据库索引
    async fn create_indexes(&self) -> Result<()> {
        let pool = self.pool.pool();

        let mut indexes = Vec::new();
        for collection in [
            Doctor::COLLECTION,
            Patient::COLLECTION,
            Template::COLLECTION,
            UsgReport::COLLECTION,
        ] {
            indexes.push(format!(
                "CREATE INDEX IF NOT EXISTS idx_{collection}_active_recent \
                 ON {collection}(created_at DESC, id DESC) WHERE deleted = FALSE"
            ));
        }
        indexes.push(
            "CREATE INDEX IF NOT EXISTS idx_usg_reports_patient \
             ON usg_reports((body->>'patient'))"
                .to_string(),
        );
        indexes.push(
            "CREATE INDEX IF NOT EXISTS idx_usg_reports_referrer \
             ON usg_reports((body->>'referrer'))"
                .to_string(),
        );
        indexes.push(
            "CREATE INDEX IF NOT EXISTS idx_document_moves_due \
             ON document_moves(next_attempt_at) WHERE status = 'PENDING'"
                .to_string(),
        );

        for index_sql in indexes {
            sqlx::query(&index_sql)
                .execute(pool)
                .await
                .map_err(|e| ReporterError::Database(e.to_string()))?;
        }

        tracing::info!("Database indexes created successfully");
        Ok(())
    }
}

/// LIMIT/OFFSET 参数，超出 BIGINT 范围时取上限
fn sql_bound(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// 追加过滤条件（总是限定未删除）
fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &Filter) {
    builder.push(" WHERE deleted = FALSE");
    for condition in filter.conditions() {
        match condition {
            Condition::Equals { field, value } => {
                builder
                    .push(" AND body->>")
                    .push_bind(field.clone())
                    .push(" = ")
                    .push_bind(value.clone());
            }
            Condition::Contains { field, needle } => {
                builder
                    .push(" AND body->>")
                    .push_bind(field.clone())
                    .push(" ILIKE ")
                    .push_bind(format!("%{}%", escape_like(needle)))
                    .push(" ESCAPE '\\'");
            }
            Condition::DateRange {
                field,
                after,
                before,
            } => {
                if let Some(after) = after {
                    builder
                        .push(" AND (body->>")
                        .push_bind(field.clone())
                        .push(")::timestamptz >= ")
                        .push_bind(*after);
                }
                if let Some(before) = before {
                    builder
                        .push(" AND (body->>")
                        .push_bind(field.clone())
                        .push(")::timestamptz <= ")
                        .push_bind(*before);
                }
            }
        }
    }
}

#[async_trait]
impl<T: Document> DocumentStore<T> for PgStore {
    async fn insert(&self, body: T) -> Result<Stored<T>> {
        let stored = Stored::new(body);
        let row = DbDocument::from_stored(&stored)?;

        sqlx::query(&format!(
            "INSERT INTO {} ({}) VALUES ($1, $2, $3, $4, $5, $6)",
            T::COLLECTION,
            DOCUMENT_COLUMNS
        ))
        .bind(row.id)
        .bind(&row.body)
        .bind(row.deleted)
        .bind(row.revision)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(self.pool.pool())
        .await?;

        tracing::debug!(collection = T::COLLECTION, id = %stored.id, "Record inserted");
        Ok(stored)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Stored<T>>> {
        let row = sqlx::query_as::<_, DbDocument>(&format!(
            "SELECT {} FROM {} WHERE id = $1",
            DOCUMENT_COLUMNS,
            T::COLLECTION
        ))
        .bind(id)
        .fetch_optional(self.pool.pool())
        .await?;

        row.map(DbDocument::into_stored).transpose()
    }

    async fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Stored<T>>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, DbDocument>(&format!(
            "SELECT {} FROM {} WHERE id = ANY($1)",
            DOCUMENT_COLUMNS,
            T::COLLECTION
        ))
        .bind(ids)
        .fetch_all(self.pool.pool())
        .await?;

        rows.into_iter().map(DbDocument::into_stored).collect()
    }

    async fn find_active(&self, id: Uuid) -> Result<Option<Stored<T>>> {
        let row = sqlx::query_as::<_, DbDocument>(&format!(
            "SELECT {} FROM {} WHERE id = $1 AND deleted = FALSE",
            DOCUMENT_COLUMNS,
            T::COLLECTION
        ))
        .bind(id)
        .fetch_optional(self.pool.pool())
        .await?;

        row.map(DbDocument::into_stored).transpose()
    }

    async fn list(&self, filter: &Filter, skip: u64, take: u64) -> Result<Vec<Stored<T>>> {
        let mut builder = QueryBuilder::<Postgres>::new(format!(
            "SELECT {} FROM {}",
            DOCUMENT_COLUMNS,
            T::COLLECTION
        ));
        push_filter(&mut builder, filter);
        builder
            .push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(sql_bound(take))
            .push(" OFFSET ")
            .push_bind(sql_bound(skip));

        let rows = builder
            .build_query_as::<DbDocument>()
            .fetch_all(self.pool.pool())
            .await?;

        rows.into_iter().map(DbDocument::into_stored).collect()
    }

    async fn count(&self, filter: &Filter) -> Result<u64> {
        let mut builder =
            QueryBuilder::<Postgres>::new(format!("SELECT COUNT(*) FROM {}", T::COLLECTION));
        push_filter(&mut builder, filter);

        let count: i64 = builder
            .build_query_scalar()
            .fetch_one(self.pool.pool())
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn update_active(
        &self,
        id: Uuid,
        patch: Map<String, Value>,
    ) -> Result<Option<Stored<T>>> {
        let mut tx = self.pool.pool().begin().await?;

        let current = sqlx::query_as::<_, DbDocument>(&format!(
            "SELECT {} FROM {} WHERE id = $1 AND deleted = FALSE FOR UPDATE",
            DOCUMENT_COLUMNS,
            T::COLLECTION
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(current) = current else {
            return Ok(None);
        };

        let (body, _) = apply_patch::<T>(&current.body, &patch)?;
        let updated = sqlx::query_as::<_, DbDocument>(&format!(
            "UPDATE {} SET body = $2, revision = revision + 1, updated_at = NOW() \
             WHERE id = $1 RETURNING {}",
            T::COLLECTION,
            DOCUMENT_COLUMNS
        ))
        .bind(id)
        .bind(&body)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        updated.into_stored().map(Some)
    }

    async fn soft_delete(
        &self,
        id: Uuid,
        relocation: Option<Relocation>,
    ) -> Result<Option<SoftDeleted<T>>> {
        let mut tx = self.pool.pool().begin().await?;

        let deleted = sqlx::query_as::<_, DbDocument>(&format!(
            "UPDATE {} SET deleted = TRUE, revision = revision + 1, updated_at = NOW() \
             WHERE id = $1 AND deleted = FALSE RETURNING {}",
            T::COLLECTION,
            DOCUMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(deleted) = deleted else {
            return Ok(None);
        };
        let record: Stored<T> = deleted.into_stored()?;

        let mut queued_move = None;
        if let (Some(relocation), Some(document_id)) =
            (relocation.as_ref(), record.body.backing_document())
        {
            let pending = DocumentMove::pending(NewDocumentMove::new(document_id, relocation));
            insert_move(&mut *tx, &pending).await?;
            queued_move = Some(pending);
        }

        tx.commit().await?;
        tracing::info!(collection = T::COLLECTION, id = %id, "Record soft-deleted");
        Ok(Some(SoftDeleted {
            record,
            queued_move,
        }))
    }
}

async fn insert_move<'e, E>(executor: E, pending: &DocumentMove) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    sqlx::query(&format!(
        "INSERT INTO document_moves ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        MOVE_COLUMNS
    ))
    .bind(pending.id)
    .bind(&pending.document_id)
    .bind(&pending.from_folder)
    .bind(&pending.to_folder)
    .bind(pending.status.as_str())
    .bind(pending.attempts)
    .bind(&pending.last_error)
    .bind(pending.next_attempt_at)
    .bind(pending.created_at)
    .bind(pending.updated_at)
    .execute(executor)
    .await?;
    Ok(())
}

#[async_trait]
impl UserStore for PgStore {
    async fn create_user(&self, user: User) -> Result<User> {
        sqlx::query(
            r#"
            INSERT INTO users (id, first_name, last_name, username, password, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(user.id)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.username)
        .bind(&user.password)
        .bind(user.created_at)
        .execute(self.pool.pool())
        .await
        .map_err(|e| match ReporterError::from(e) {
            ReporterError::Conflict(_) => {
                ReporterError::Conflict(format!("Username '{}' is already taken", user.username))
            }
            other => other,
        })?;

        tracing::info!(username = %user.username, "User created");
        Ok(user)
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let result = sqlx::query_as::<_, DbUser>(
            "SELECT * FROM users WHERE id = $1 AND deleted = FALSE",
        )
        .bind(id)
        .fetch_optional(self.pool.pool())
        .await?;

        Ok(result.map(User::from))
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let result = sqlx::query_as::<_, DbUser>(
            "SELECT * FROM users WHERE username = $1 AND deleted = FALSE",
        )
        .bind(username)
        .fetch_optional(self.pool.pool())
        .await?;

        Ok(result.map(User::from))
    }

    async fn update_user_profile(
        &self,
        id: Uuid,
        update: UserProfileUpdate,
    ) -> Result<Option<User>> {
        let result = sqlx::query_as::<_, DbUser>(
            r#"
            UPDATE users
            SET first_name = COALESCE($2, first_name),
                last_name = COALESCE($3, last_name)
            WHERE id = $1 AND deleted = FALSE
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(update.first_name)
        .bind(update.last_name)
        .fetch_optional(self.pool.pool())
        .await?;

        Ok(result.map(User::from))
    }

    async fn set_user_password(&self, id: Uuid, password: &str) -> Result<bool> {
        let hashed = hash_password(password)?;
        let result = sqlx::query("UPDATE users SET password = $2 WHERE id = $1 AND deleted = FALSE")
            .bind(id)
            .bind(hashed)
            .execute(self.pool.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_user(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("UPDATE users SET deleted = TRUE WHERE id = $1 AND deleted = FALSE")
            .bind(id)
            .execute(self.pool.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn current(&self) -> Result<Option<OAuthCredential>> {
        let content: Option<Value> =
            sqlx::query_scalar("SELECT content FROM oauth_credentials WHERE slot = 1")
                .fetch_optional(self.pool.pool())
                .await?;

        content
            .map(|value| serde_json::from_value(value).map_err(ReporterError::from))
            .transpose()
    }

    async fn set_current(&self, credential: OAuthCredential) -> Result<()> {
        let content = serde_json::to_value(&credential)?;
        sqlx::query(
            r#"
            INSERT INTO oauth_credentials (slot, content, updated_at)
            VALUES (1, $1, NOW())
            ON CONFLICT (slot) DO UPDATE SET content = EXCLUDED.content, updated_at = NOW()
            "#,
        )
        .bind(content)
        .execute(self.pool.pool())
        .await?;

        tracing::info!("Stored Google OAuth credential");
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for PgStore {
    async fn enqueue_move(&self, new_move: NewDocumentMove) -> Result<DocumentMove> {
        let pending = DocumentMove::pending(new_move);
        insert_move(self.pool.pool(), &pending).await?;
        Ok(pending)
    }

    async fn due_moves(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<DocumentMove>> {
        let rows = sqlx::query_as::<_, DbDocumentMove>(&format!(
            "SELECT {} FROM document_moves \
             WHERE status = 'PENDING' AND next_attempt_at <= $1 \
             ORDER BY next_attempt_at ASC, id ASC LIMIT $2",
            MOVE_COLUMNS
        ))
        .bind(now)
        .bind(i64::from(limit))
        .fetch_all(self.pool.pool())
        .await?;

        Ok(rows.into_iter().map(DocumentMove::from).collect())
    }

    async fn complete_move(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE document_moves SET status = 'COMPLETED', attempts = attempts + 1, \
             last_error = NULL, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(self.pool.pool())
        .await?;
        Ok(())
    }

    async fn reschedule_move(
        &self,
        id: Uuid,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE document_moves SET attempts = attempts + 1, last_error = $2, \
             next_attempt_at = $3, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .bind(next_attempt_at)
        .execute(self.pool.pool())
        .await?;
        Ok(())
    }

    async fn fail_move(&self, id: Uuid, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE document_moves SET status = 'FAILED', attempts = attempts + 1, \
             last_error = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .execute(self.pool.pool())
        .await?;
        Ok(())
    }

    async fn list_moves(&self, status: Option<MoveStatus>) -> Result<Vec<DocumentMove>> {
        let mut builder =
            QueryBuilder::<Postgres>::new(format!("SELECT {} FROM document_moves", MOVE_COLUMNS));
        if let Some(status) = status {
            builder.push(" WHERE status = ").push_bind(status.as_str());
        }
        builder.push(" ORDER BY created_at ASC, id ASC");

        let rows = builder
            .build_query_as::<DbDocumentMove>()
            .fetch_all(self.pool.pool())
            .await?;
        Ok(rows.into_iter().map(DocumentMove::from).collect())
    }
}
