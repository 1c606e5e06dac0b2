//! 文档生成状态机
//!
//! 描述“创建外部文档 → 替换占位符 → 保存记录”流程的阶段转换，
//! 以及任一步失败后的补偿分支。

use reporter_core::{ReporterError, Result};
use std::collections::HashMap;

/// 生成流程阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GenerationStage {
    /// 引用已解析，尚未产生外部副作用
    Resolved,
    /// 外部文档已创建（空白或复制）
    DocumentCreated,
    /// 占位符已替换
    Substituted,
    /// 记录已保存，流程完成
    Persisted,
    /// 某步失败，正在回收外部文档
    Compensating,
    /// 外部文档已移入回收目录
    Compensated,
    /// 回收失败，外部文档成为孤儿
    Orphaned,
}

/// 阶段转换事件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GenerationEvent {
    CreateDocument,
    Substitute,
    Persist,
    StepFailed,
    CompensationSucceeded,
    CompensationFailed,
}

/// 文档生成状态机
#[derive(Debug)]
pub struct GenerationStateMachine {
    transitions: HashMap<(GenerationStage, GenerationEvent), GenerationStage>,
}

impl GenerationStateMachine {
    /// 创建新的状态机实例
    pub fn new() -> Self {
        use GenerationEvent as E;
        use GenerationStage as S;

        let mut transitions = HashMap::new();

        // 正常流程
        transitions.insert((S::Resolved, E::CreateDocument), S::DocumentCreated);
        transitions.insert((S::Resolved, E::Persist), S::Persisted);
        transitions.insert((S::DocumentCreated, E::Substitute), S::Substituted);
        transitions.insert((S::DocumentCreated, E::Persist), S::Persisted);
        transitions.insert((S::Substituted, E::Persist), S::Persisted);

        // 补偿流程
        transitions.insert((S::DocumentCreated, E::StepFailed), S::Compensating);
        transitions.insert((S::Substituted, E::StepFailed), S::Compensating);
        transitions.insert((S::Compensating, E::CompensationSucceeded), S::Compensated);
        transitions.insert((S::Compensating, E::CompensationFailed), S::Orphaned);

        Self { transitions }
    }

    /// 检查状态转换是否有效
    pub fn can_transition(&self, from: GenerationStage, event: GenerationEvent) -> bool {
        self.transitions.contains_key(&(from, event))
    }

    /// 执行状态转换
    pub fn transition(
        &self,
        from: GenerationStage,
        event: GenerationEvent,
    ) -> Result<GenerationStage> {
        self.transitions.get(&(from, event)).copied().ok_or_else(|| {
            ReporterError::Internal(format!(
                "Invalid document generation transition: {:?} --{:?}-->",
                from, event
            ))
        })
    }

    /// 是否为终止阶段
    pub fn is_terminal(&self, stage: GenerationStage) -> bool {
        !self.transitions.keys().any(|(from, _)| *from == stage)
    }
}

impl Default for GenerationStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// 单次生成流程的进度
#[derive(Debug)]
pub struct GenerationSaga<'a> {
    machine: &'a GenerationStateMachine,
    stage: GenerationStage,
}

impl<'a> GenerationSaga<'a> {
    pub fn new(machine: &'a GenerationStateMachine) -> Self {
        Self {
            machine,
            stage: GenerationStage::Resolved,
        }
    }

    pub fn stage(&self) -> GenerationStage {
        self.stage
    }

    pub fn advance(&mut self, event: GenerationEvent) -> Result<GenerationStage> {
        self.stage = self.machine.transition(self.stage, event)?;
        tracing::debug!(stage = ?self.stage, "Document generation advanced");
        Ok(self.stage)
    }

    /// 当前阶段是否已有外部副作用需要补偿
    pub fn has_external_effect(&self) -> bool {
        matches!(
            self.stage,
            GenerationStage::DocumentCreated | GenerationStage::Substituted
        )
    }
}
