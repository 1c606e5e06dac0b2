//! # Reporter 工作流模块
//!
//! 提供报告文档的生成与回收流程，包括：
//! - 文档生成状态机：描述创建、替换、保存以及失败补偿的阶段转换
//! - 文档生成流程：模板与超声报告的创建、同步和删除
//! - 发件箱后台任务：可靠地把已删除记录的文档移入回收目录

pub mod documents;
pub mod outbox;
pub mod state_machine;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// 重新导出主要类型
pub use documents::{
    report_document_name, report_placeholders, DocumentWorkflow, DriveFolders, NewReport,
};
pub use outbox::{OutboxRunStats, OutboxSettings, OutboxWorker};
pub use state_machine::{GenerationEvent, GenerationSaga, GenerationStage, GenerationStateMachine};
