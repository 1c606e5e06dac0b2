//! 内存存储后端
//!
//! 用于测试与本地开发，语义与 PostgreSQL 后端一致。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reporter_core::{
    hash_password, Document, OAuthCredential, ReporterError, Result, Stored, User,
    UserProfileUpdate,
};
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::filter::Filter;
use crate::models::*;
use crate::store::{CredentialStore, DocumentStore, OutboxStore, UserStore};

#[derive(Debug, Clone)]
struct StoredUser {
    user: User,
    deleted: bool,
}

#[derive(Debug, Default)]
struct MemoryState {
    collections: HashMap<&'static str, Vec<DbDocument>>,
    users: Vec<StoredUser>,
    credential: Option<OAuthCredential>,
    moves: Vec<DocumentMove>,
}

impl MemoryState {
    fn collection(&self, name: &'static str) -> &[DbDocument] {
        self.collections.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    fn collection_mut(&mut self, name: &'static str) -> &mut Vec<DbDocument> {
        self.collections.entry(name).or_default()
    }

    fn active_user(&mut self, id: Uuid) -> Option<&mut StoredUser> {
        self.users.iter_mut().find(|u| u.user.id == id && !u.deleted)
    }

    fn pending_move(&mut self, id: Uuid) -> Result<&mut DocumentMove> {
        self.moves
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| ReporterError::NotFound(format!("Document move {} not found", id)))
    }
}

/// 内存存储，可在多个任务间共享
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// 按创建时间倒序、ID 倒序排列
fn newest_first(a: &DbDocument, b: &DbDocument) -> std::cmp::Ordering {
    b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id))
}

#[async_trait]
impl<T: Document> DocumentStore<T> for MemoryStore {
    async fn insert(&self, body: T) -> Result<Stored<T>> {
        let stored = Stored::new(body);
        let row = DbDocument::from_stored(&stored)?;
        let mut state = self.state.write().await;
        state.collection_mut(T::COLLECTION).push(row);
        Ok(stored)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Stored<T>>> {
        let state = self.state.read().await;
        state
            .collection(T::COLLECTION)
            .iter()
            .find(|row| row.id == id)
            .cloned()
            .map(DbDocument::into_stored)
            .transpose()
    }

    async fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Stored<T>>> {
        let state = self.state.read().await;
        state
            .collection(T::COLLECTION)
            .iter()
            .filter(|row| ids.contains(&row.id))
            .cloned()
            .map(DbDocument::into_stored)
            .collect()
    }

    async fn find_active(&self, id: Uuid) -> Result<Option<Stored<T>>> {
        let state = self.state.read().await;
        state
            .collection(T::COLLECTION)
            .iter()
            .find(|row| row.id == id && !row.deleted)
            .cloned()
            .map(DbDocument::into_stored)
            .transpose()
    }

    async fn list(&self, filter: &Filter, skip: u64, take: u64) -> Result<Vec<Stored<T>>> {
        let state = self.state.read().await;
        let mut rows: Vec<&DbDocument> = state
            .collection(T::COLLECTION)
            .iter()
            .filter(|row| !row.deleted && filter.matches(&row.body))
            .collect();
        rows.sort_by(|a, b| newest_first(a, b));

        rows.into_iter()
            .skip(usize::try_from(skip).unwrap_or(usize::MAX))
            .take(usize::try_from(take).unwrap_or(usize::MAX))
            .cloned()
            .map(DbDocument::into_stored)
            .collect()
    }

    async fn count(&self, filter: &Filter) -> Result<u64> {
        let state = self.state.read().await;
        let count = state
            .collection(T::COLLECTION)
            .iter()
            .filter(|row| !row.deleted && filter.matches(&row.body))
            .count();
        Ok(count as u64)
    }

    async fn update_active(
        &self,
        id: Uuid,
        patch: Map<String, Value>,
    ) -> Result<Option<Stored<T>>> {
        let mut state = self.state.write().await;
        let Some(row) = state
            .collection_mut(T::COLLECTION)
            .iter_mut()
            .find(|row| row.id == id && !row.deleted)
        else {
            return Ok(None);
        };

        let (body, _) = apply_patch::<T>(&row.body, &patch)?;
        row.body = body;
        row.revision += 1;
        row.updated_at = Utc::now();
        row.clone().into_stored().map(Some)
    }

    async fn soft_delete(
        &self,
        id: Uuid,
        relocation: Option<Relocation>,
    ) -> Result<Option<SoftDeleted<T>>> {
        let mut state = self.state.write().await;
        let Some(row) = state
            .collection_mut(T::COLLECTION)
            .iter_mut()
            .find(|row| row.id == id && !row.deleted)
        else {
            return Ok(None);
        };

        row.deleted = true;
        row.revision += 1;
        row.updated_at = Utc::now();
        let record: Stored<T> = row.clone().into_stored()?;

        let queued_move = match (relocation.as_ref(), record.body.backing_document()) {
            (Some(relocation), Some(document_id)) => {
                let pending = DocumentMove::pending(NewDocumentMove::new(document_id, relocation));
                state.moves.push(pending.clone());
                Some(pending)
            }
            _ => None,
        };

        Ok(Some(SoftDeleted {
            record,
            queued_move,
        }))
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn create_user(&self, user: User) -> Result<User> {
        let mut state = self.state.write().await;
        if state.users.iter().any(|u| u.user.username == user.username) {
            return Err(ReporterError::Conflict(format!(
                "Username '{}' is already taken",
                user.username
            )));
        }
        state.users.push(StoredUser {
            user: user.clone(),
            deleted: false,
        });
        Ok(user)
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let state = self.state.read().await;
        Ok(state
            .users
            .iter()
            .find(|u| u.user.id == id && !u.deleted)
            .map(|u| u.user.clone()))
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let state = self.state.read().await;
        Ok(state
            .users
            .iter()
            .find(|u| u.user.username == username && !u.deleted)
            .map(|u| u.user.clone()))
    }

    async fn update_user_profile(
        &self,
        id: Uuid,
        update: UserProfileUpdate,
    ) -> Result<Option<User>> {
        let mut state = self.state.write().await;
        Ok(state.active_user(id).map(|stored| {
            if let Some(first_name) = update.first_name {
                stored.user.first_name = first_name;
            }
            if let Some(last_name) = update.last_name {
                stored.user.last_name = last_name;
            }
            stored.user.clone()
        }))
    }

    async fn set_user_password(&self, id: Uuid, password: &str) -> Result<bool> {
        let hashed = hash_password(password)?;
        let mut state = self.state.write().await;
        Ok(state
            .active_user(id)
            .map(|stored| stored.user.password = hashed)
            .is_some())
    }

    async fn delete_user(&self, id: Uuid) -> Result<bool> {
        let mut state = self.state.write().await;
        Ok(state
            .active_user(id)
            .map(|stored| stored.deleted = true)
            .is_some())
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn current(&self) -> Result<Option<OAuthCredential>> {
        Ok(self.state.read().await.credential.clone())
    }

    async fn set_current(&self, credential: OAuthCredential) -> Result<()> {
        self.state.write().await.credential = Some(credential);
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for MemoryStore {
    async fn enqueue_move(&self, new_move: NewDocumentMove) -> Result<DocumentMove> {
        let pending = DocumentMove::pending(new_move);
        self.state.write().await.moves.push(pending.clone());
        Ok(pending)
    }

    async fn due_moves(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<DocumentMove>> {
        let state = self.state.read().await;
        let mut due: Vec<DocumentMove> = state
            .moves
            .iter()
            .filter(|m| m.status == MoveStatus::Pending && m.next_attempt_at <= now)
            .cloned()
            .collect();
        due.sort_by(|a, b| {
            a.next_attempt_at
                .cmp(&b.next_attempt_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn complete_move(&self, id: Uuid) -> Result<()> {
        let mut state = self.state.write().await;
        let entry = state.pending_move(id)?;
        entry.status = MoveStatus::Completed;
        entry.attempts += 1;
        entry.last_error = None;
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn reschedule_move(
        &self,
        id: Uuid,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let entry = state.pending_move(id)?;
        entry.attempts += 1;
        entry.last_error = Some(error.to_string());
        entry.next_attempt_at = next_attempt_at;
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn fail_move(&self, id: Uuid, error: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let entry = state.pending_move(id)?;
        entry.status = MoveStatus::Failed;
        entry.attempts += 1;
        entry.last_error = Some(error.to_string());
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn list_moves(&self, status: Option<MoveStatus>) -> Result<Vec<DocumentMove>> {
        let state = self.state.read().await;
        Ok(state
            .moves
            .iter()
            .filter(|m| status.map_or(true, |s| m.status == s))
            .cloned()
            .collect())
    }
}
