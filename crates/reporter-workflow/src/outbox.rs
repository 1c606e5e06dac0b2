//! 文档移动发件箱后台任务
//!
//! 删除记录时登记的移动任务在这里执行：定时轮询到期任务，
//! 或在登记新任务时被立即唤醒。失败按指数退避重试，超过上限后标记失败。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reporter_core::Result;
use reporter_database::{DocumentMove, OutboxStore};
use reporter_integration::DocumentService;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// 轮询间隔下限，`tokio::time::interval` 不接受零间隔
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// 后台任务参数
#[derive(Debug, Clone)]
pub struct OutboxSettings {
    pub poll_interval: Duration,
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub batch_size: u32,
}

impl Default for OutboxSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            max_attempts: 5,
            base_backoff: Duration::from_secs(10),
            max_backoff: Duration::from_secs(3600),
            batch_size: 20,
        }
    }
}

impl OutboxSettings {
    /// 第 `attempts` 次失败后的等待时间
    pub fn backoff(&self, attempts: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempts.saturating_sub(1));
        self.base_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// 单轮处理统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutboxRunStats {
    pub completed: usize,
    pub rescheduled: usize,
    pub failed: usize,
}

type StatsObserver = Arc<dyn Fn(&OutboxRunStats) + Send + Sync>;

/// 文档移动后台任务
#[derive(Clone)]
pub struct OutboxWorker {
    outbox: Arc<dyn OutboxStore>,
    documents: Arc<dyn DocumentService>,
    settings: OutboxSettings,
    waker: Arc<Notify>,
    observer: Option<StatsObserver>,
}

impl OutboxWorker {
    pub fn new(
        outbox: Arc<dyn OutboxStore>,
        documents: Arc<dyn DocumentService>,
        settings: OutboxSettings,
    ) -> Self {
        Self {
            outbox,
            documents,
            settings,
            waker: Arc::new(Notify::new()),
            observer: None,
        }
    }

    /// 每轮处理后回调，用于上报指标
    pub fn with_observer(mut self, observer: impl Fn(&OutboxRunStats) + Send + Sync + 'static) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// 登记新任务后用于唤醒后台任务
    pub fn waker(&self) -> Arc<Notify> {
        self.waker.clone()
    }

    /// 处理一批到期任务
    pub async fn run_once(&self) -> Result<OutboxRunStats> {
        let due = self
            .outbox
            .due_moves(Utc::now(), self.settings.batch_size.max(1))
            .await?;
        let mut stats = OutboxRunStats::default();

        for entry in due {
            match self.process(&entry).await {
                Ok(MoveOutcome::Completed) => stats.completed += 1,
                Ok(MoveOutcome::Rescheduled) => stats.rescheduled += 1,
                Ok(MoveOutcome::Failed) => stats.failed += 1,
                Err(e) => error!(id = %entry.id, "Failed to update document move: {}", e),
            }
        }

        if stats != OutboxRunStats::default() {
            info!(
                completed = stats.completed,
                rescheduled = stats.rescheduled,
                failed = stats.failed,
                "Processed document moves"
            );
        }
        if let Some(observer) = &self.observer {
            observer(&stats);
        }
        Ok(stats)
    }

    async fn process(&self, entry: &DocumentMove) -> Result<MoveOutcome> {
        let result = self
            .documents
            .move_document(
                &entry.document_id,
                entry.from_folder.as_deref(),
                &entry.to_folder,
            )
            .await;

        let error = match result {
            Ok(()) => {
                self.outbox.complete_move(entry.id).await?;
                debug!(id = %entry.id, document = %entry.document_id, "Document move completed");
                return Ok(MoveOutcome::Completed);
            }
            Err(e) => e.to_string(),
        };

        let attempts = u32::try_from(entry.attempts).unwrap_or(0) + 1;
        if attempts >= self.settings.max_attempts {
            error!(
                id = %entry.id,
                document = %entry.document_id,
                attempts,
                "Giving up on document move: {}", error
            );
            self.outbox.fail_move(entry.id, &error).await?;
            return Ok(MoveOutcome::Failed);
        }

        let delay = self.settings.backoff(attempts);
        let next_attempt_at = Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::hours(1));
        warn!(
            id = %entry.id,
            document = %entry.document_id,
            attempts,
            retry_in_secs = delay.as_secs(),
            "Document move failed, will retry: {}", error
        );
        self.outbox
            .reschedule_move(entry.id, next_attempt_at, &error)
            .await?;
        Ok(MoveOutcome::Rescheduled)
    }

    /// 启动后台循环
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = self.settings.poll_interval.max(MIN_POLL_INTERVAL);
            let mut interval = tokio::time::interval(period);
            info!(
                poll_interval_secs = self.settings.poll_interval.as_secs(),
                "Document move worker started"
            );
            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = self.waker.notified() => {}
                }
                if let Err(e) = self.run_once().await {
                    error!("Document move worker iteration failed: {}", e);
                }
            }
        })
    }
}

enum MoveOutcome {
    Completed,
    Rescheduled,
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{DocumentOperation, RecordingDocumentService};
    use reporter_database::{MemoryStore, MoveStatus, NewDocumentMove};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn settings(max_attempts: u32) -> OutboxSettings {
        OutboxSettings {
            poll_interval: Duration::from_millis(20),
            max_attempts,
            base_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            batch_size: 10,
        }
    }

    async fn queue(store: &MemoryStore, document: &str) -> DocumentMove {
        store
            .enqueue_move(NewDocumentMove {
                document_id: document.to_string(),
                from_folder: Some("reports".to_string()),
                to_folder: "deleted-reports".to_string(),
            })
            .await
            .unwrap()
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let settings = OutboxSettings {
            base_backoff: Duration::from_secs(10),
            max_backoff: Duration::from_secs(60),
            ..OutboxSettings::default()
        };
        assert_eq!(settings.backoff(1), Duration::from_secs(10));
        assert_eq!(settings.backoff(2), Duration::from_secs(20));
        assert_eq!(settings.backoff(3), Duration::from_secs(40));
        assert_eq!(settings.backoff(4), Duration::from_secs(60));
        assert_eq!(settings.backoff(40), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_successful_move_completes_entry() {
        let store = Arc::new(MemoryStore::new());
        let documents = Arc::new(RecordingDocumentService::new());
        queue(&store, "doc-1").await;

        let worker = OutboxWorker::new(store.clone(), documents.clone(), settings(3));
        let stats = worker.run_once().await.unwrap();
        assert_eq!(stats.completed, 1);
        assert_eq!(documents.moves().len(), 1);

        let completed = store.list_moves(Some(MoveStatus::Completed)).await.unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(worker.run_once().await.unwrap(), OutboxRunStats::default());
    }

    #[tokio::test]
    async fn test_failures_retry_then_give_up() {
        let store = Arc::new(MemoryStore::new());
        let documents = Arc::new(RecordingDocumentService::new());
        documents.fail(DocumentOperation::Move);
        queue(&store, "doc-1").await;

        let worker = OutboxWorker::new(store.clone(), documents.clone(), settings(3));
        assert_eq!(worker.run_once().await.unwrap().rescheduled, 1);
        assert_eq!(worker.run_once().await.unwrap().rescheduled, 1);
        assert_eq!(worker.run_once().await.unwrap().failed, 1);
        assert_eq!(worker.run_once().await.unwrap(), OutboxRunStats::default());

        let failed = store.list_moves(Some(MoveStatus::Failed)).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].attempts, 3);
        assert!(failed[0].last_error.as_deref().unwrap_or("").contains("Simulated"));
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failure() {
        let store = Arc::new(MemoryStore::new());
        let documents = Arc::new(RecordingDocumentService::new());
        documents.fail(DocumentOperation::Move);
        queue(&store, "doc-1").await;

        let worker = OutboxWorker::new(store.clone(), documents.clone(), settings(5));
        worker.run_once().await.unwrap();
        documents.recover(DocumentOperation::Move);
        assert_eq!(worker.run_once().await.unwrap().completed, 1);
    }

    #[tokio::test]
    async fn test_spawned_worker_wakes_on_notify() {
        let store = Arc::new(MemoryStore::new());
        let documents = Arc::new(RecordingDocumentService::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();

        let mut slow = settings(3);
        slow.poll_interval = Duration::from_secs(3600);
        let worker = OutboxWorker::new(store.clone(), documents.clone(), slow)
            .with_observer(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        let waker = worker.waker();
        let handle = worker.spawn();

        // 第一次 tick 立即触发
        tokio::time::sleep(Duration::from_millis(50)).await;
        queue(&store, "doc-7").await;
        waker.notify_one();
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        assert!(runs.load(Ordering::SeqCst) >= 2);
        assert_eq!(documents.moves().len(), 1);
    }

    #[tokio::test]
    async fn test_zero_interval_and_batch_still_drain_queue() {
        let store = Arc::new(MemoryStore::new());
        let documents = Arc::new(RecordingDocumentService::new());
        queue(&store, "doc-3").await;

        let mut zero = settings(3);
        zero.poll_interval = Duration::ZERO;
        zero.batch_size = 0;
        let handle = OutboxWorker::new(store.clone(), documents.clone(), zero).spawn();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());
        handle.abort();

        assert_eq!(documents.moves().len(), 1);
        let completed = store.list_moves(Some(MoveStatus::Completed)).await.unwrap();
        assert_eq!(completed.len(), 1);
    }
}
