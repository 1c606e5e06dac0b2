//! # Reporter 数据库模块
//!
//! 负责医生、患者、模板、超声报告等记录的存储，提供存储接口、
//! 列表过滤与分页，以及 PostgreSQL 与内存两种后端。

pub mod connection;
pub mod filter;
pub mod memory;
pub mod models;
pub mod pagination;
pub mod queries;
pub mod store;

// 重新导出主要类型
pub use connection::{DatabasePool, PoolSettings};
pub use filter::{Condition, Filter};
pub use memory::MemoryStore;
pub use models::*;
pub use pagination::{paginate, Page, PageRequest};
pub use queries::PgStore;
pub use store::{Backend, CredentialStore, DocumentStore, OutboxStore, Repositories, UserStore};
