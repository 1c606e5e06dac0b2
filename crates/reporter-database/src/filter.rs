//! 列表查询过滤条件
//!
//! 过滤条件作用于记录的 JSON 字段（驼峰命名，如 `partOfScan`）。
//! 存储后端总是额外限定 `deleted = false`，这里不单独表示。

use chrono::{DateTime, Utc};
use serde_json::Value;

/// 单个过滤条件
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// 字段值精确相等
    Equals { field: String, value: String },
    /// 大小写不敏感的子串匹配，匹配值按字面处理
    Contains { field: String, needle: String },
    /// 闭区间日期范围，缺失的一端不设限
    DateRange {
        field: String,
        after: Option<DateTime<Utc>>,
        before: Option<DateTime<Utc>>,
    },
}

impl Condition {
    pub fn field(&self) -> &str {
        match self {
            Condition::Equals { field, .. }
            | Condition::Contains { field, .. }
            | Condition::DateRange { field, .. } => field,
        }
    }

    /// 在 JSON 记录上求值
    pub fn matches(&self, body: &Value) -> bool {
        let target = body.get(self.field());
        match self {
            Condition::Equals { value, .. } => match target {
                Some(Value::String(s)) => s == value,
                Some(Value::Number(n)) => n.to_string() == *value,
                Some(Value::Bool(b)) => b.to_string() == *value,
                _ => false,
            },
            Condition::Contains { needle, .. } => target
                .and_then(Value::as_str)
                .map(|s| s.to_lowercase().contains(&needle.to_lowercase()))
                .unwrap_or(false),
            Condition::DateRange { after, before, .. } => {
                let Some(date) = target
                    .and_then(Value::as_str)
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|d| d.with_timezone(&Utc))
                else {
                    return false;
                };
                after.map_or(true, |a| date >= a) && before.map_or(true, |b| date <= b)
            }
        }
    }
}

/// 多个条件的合取
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 精确匹配；值缺失时不加条件
    pub fn equals(mut self, field: &str, value: Option<impl Into<String>>) -> Self {
        if let Some(value) = value {
            self.conditions.push(Condition::Equals {
                field: field.to_string(),
                value: value.into(),
            });
        }
        self
    }

    /// 子串匹配；值缺失时不加条件
    pub fn contains(mut self, field: &str, needle: Option<impl Into<String>>) -> Self {
        if let Some(needle) = needle {
            self.conditions.push(Condition::Contains {
                field: field.to_string(),
                needle: needle.into(),
            });
        }
        self
    }

    /// 日期范围；两端都缺失时不加条件
    pub fn date_range(
        mut self,
        field: &str,
        after: Option<DateTime<Utc>>,
        before: Option<DateTime<Utc>>,
    ) -> Self {
        if after.is_some() || before.is_some() {
            self.conditions.push(Condition::DateRange {
                field: field.to_string(),
                after,
                before,
            });
        }
        self
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn matches(&self, body: &Value) -> bool {
        self.conditions.iter().all(|c| c.matches(body))
    }
}

/// 转义 LIKE 模式中的通配符
pub fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
