//! 分页
//!
//! 多取一条记录判断是否还有下一页，总页数由同一过滤条件的计数得出。

use reporter_core::{Document, ReporterError, Result, Stored};
use serde::Serialize;

use crate::filter::Filter;
use crate::store::DocumentStore;

/// 分页请求，`page` 从 1 开始
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    page: u64,
    limit: u64,
}

impl PageRequest {
    pub fn new(page: u64, limit: u64) -> Result<Self> {
        if page == 0 {
            return Err(ReporterError::validation("\"page\" must be greater than or equal to 1"));
        }
        if limit == 0 {
            return Err(ReporterError::validation("\"limit\" must be greater than or equal to 1"));
        }
        Ok(Self { page, limit })
    }

    pub fn page(&self) -> u64 {
        self.page
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// 跳过的记录数
    pub fn skip(&self) -> u64 {
        (self.page - 1).saturating_mul(self.limit)
    }

    /// 实际读取的记录数（多取一条）
    pub fn fetch_size(&self) -> u64 {
        self.limit + 1
    }
}

/// 分页结果
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub data: Vec<T>,
    pub has_more: bool,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
    pub total: u64,
}

impl<T> Page<T> {
    /// 由多取一条的结果与总数组装分页
    pub fn from_overfetch(mut rows: Vec<T>, total: u64, request: PageRequest) -> Self {
        let has_more = rows.len() as u64 > request.limit;
        rows.truncate(request.limit as usize);
        Self {
            data: rows,
            has_more,
            page: request.page,
            limit: request.limit,
            total_pages: total.div_ceil(request.limit),
            total,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            data: self.data.into_iter().map(f).collect(),
            has_more: self.has_more,
            page: self.page,
            limit: self.limit,
            total_pages: self.total_pages,
            total: self.total,
        }
    }
}

/// 对集合执行过滤分页查询
pub async fn paginate<T: Document>(
    store: &dyn DocumentStore<T>,
    filter: &Filter,
    request: PageRequest,
) -> Result<Page<Stored<T>>> {
    let (rows, total) = tokio::try_join!(
        store.list(filter, request.skip(), request.fetch_size()),
        store.count(filter),
    )?;
    tracing::debug!(
        collection = T::COLLECTION,
        page = request.page,
        limit = request.limit,
        total,
        "Paginated query executed"
    );
    Ok(Page::from_overfetch(rows, total, request))
}
