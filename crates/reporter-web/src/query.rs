//! 列表查询参数
//!
//! 查询参数先按资源的参数表校验，再转换为存储层的 [`Filter`] 与分页请求。
//! 未给出的参数不产生任何条件。

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use reporter_admin::PaginationConfig;
use reporter_core::utils::parse_date;
use reporter_core::{ReporterError, Result};
use reporter_database::{Filter, PageRequest};
use uuid::Uuid;

/// 参数的匹配方式
#[derive(Debug, Clone, Copy)]
pub enum ParamKind {
    /// 精确匹配
    Exact,
    /// 记录 ID，精确匹配
    Id,
    /// 枚举值，精确匹配
    OneOf(&'static [&'static str]),
    /// 不区分大小写的子串匹配
    Substring,
    /// 日期下界（含）
    DateAfter,
    /// 日期上界（含）
    DateBefore,
}

/// 单个查询参数
#[derive(Debug, Clone, Copy)]
pub struct QueryParam {
    /// 查询参数名
    pub name: &'static str,
    /// 对应的记录字段
    pub field: &'static str,
    pub kind: ParamKind,
}

const fn param(name: &'static str, field: &'static str, kind: ParamKind) -> QueryParam {
    QueryParam { name, field, kind }
}

/// 资源的可用查询参数
#[derive(Debug, Clone, Copy)]
pub struct QuerySchema {
    pub params: &'static [QueryParam],
}

pub const DOCTOR_QUERY: QuerySchema = QuerySchema {
    params: &[
        param("name", "name", ParamKind::Substring),
        param("phone", "phone", ParamKind::Exact),
    ],
};

pub const PATIENT_QUERY: QuerySchema = QuerySchema {
    params: &[
        param("name", "name", ParamKind::Substring),
        param("phone", "phone", ParamKind::Exact),
        param("gender", "gender", ParamKind::OneOf(&["male", "female"])),
    ],
};

pub const TEMPLATE_QUERY: QuerySchema = QuerySchema {
    params: &[param("name", "name", ParamKind::Substring)],
};

pub const USG_REPORT_QUERY: QuerySchema = QuerySchema {
    params: &[
        param("patient", "patient", ParamKind::Id),
        param("referrer", "referrer", ParamKind::Id),
        param("sonologist", "sonologist", ParamKind::Id),
        param("partOfScan", "partOfScan", ParamKind::Substring),
        param("findings", "findings", ParamKind::Substring),
        param("date_after", "date", ParamKind::DateAfter),
        param("date_before", "date", ParamKind::DateBefore),
    ],
};

type DateBounds = (Option<DateTime<Utc>>, Option<DateTime<Utc>>);

/// 校验后的列表查询
#[derive(Debug, Clone)]
pub struct ListQuery {
    pub filter: Filter,
    pub page: PageRequest,
}

impl QuerySchema {
    /// 校验原始参数并构造过滤条件与分页请求
    pub fn parse(
        &self,
        raw: &HashMap<String, String>,
        pagination: &PaginationConfig,
    ) -> Result<ListQuery> {
        let mut problems = Vec::new();

        let mut keys: Vec<&String> = raw.keys().collect();
        keys.sort();
        for key in keys {
            let known = matches!(key.as_str(), "page" | "limit")
                || self.params.iter().any(|p| p.name == key);
            if !known {
                problems.push(format!("\"{}\" is not allowed", key));
            }
        }

        let page = match raw.get("page") {
            Some(value) => parse_bounded(value, "page", 1, u64::MAX)
                .map_err(|e| problems.push(e))
                .ok(),
            None => Some(1),
        };
        let limit = match raw.get("limit") {
            Some(value) => parse_bounded(value, "limit", 1, pagination.max_page_size)
                .map_err(|e| problems.push(e))
                .ok(),
            None => Some(pagination.page_size),
        };

        let mut filter = Filter::new();
        let mut ranges: BTreeMap<&'static str, DateBounds> = BTreeMap::new();

        for spec in self.params {
            let Some(value) = raw.get(spec.name) else {
                continue;
            };
            match spec.kind {
                ParamKind::Exact => filter = filter.equals(spec.field, Some(value.as_str())),
                ParamKind::Substring => filter = filter.contains(spec.field, Some(value.as_str())),
                ParamKind::Id => match Uuid::parse_str(value) {
                    Ok(id) => filter = filter.equals(spec.field, Some(id.to_string())),
                    Err(_) => problems.push(format!("\"{}\" must be a valid id", spec.name)),
                },
                ParamKind::OneOf(allowed) => {
                    if allowed.contains(&value.as_str()) {
                        filter = filter.equals(spec.field, Some(value.as_str()));
                    } else {
                        problems.push(format!(
                            "\"{}\" must be one of [{}]",
                            spec.name,
                            allowed.join(", ")
                        ));
                    }
                }
                ParamKind::DateAfter | ParamKind::DateBefore => {
                    let Some(date) = parse_date(value) else {
                        problems.push(format!("\"{}\" must be a valid date", spec.name));
                        continue;
                    };
                    let slot = ranges.entry(spec.field).or_default();
                    if matches!(spec.kind, ParamKind::DateAfter) {
                        slot.0 = Some(date);
                    } else {
                        slot.1 = Some(date);
                    }
                }
            }
        }

        for (field, (after, before)) in ranges {
            filter = filter.date_range(field, after, before);
        }

        if !problems.is_empty() {
            return Err(ReporterError::validation_details(problems));
        }
        let (Some(page), Some(limit)) = (page, limit) else {
            return Err(ReporterError::validation("Invalid pagination parameters"));
        };

        tracing::debug!(page, limit, conditions = filter.conditions().len(), "List query parsed");
        Ok(ListQuery {
            filter,
            page: PageRequest::new(page, limit)?,
        })
    }
}

fn parse_bounded(value: &str, name: &str, min: u64, max: u64) -> std::result::Result<u64, String> {
    let number: u64 = value
        .trim()
        .parse()
        .map_err(|_| format!("\"{}\" must be a number", name))?;
    if number < min {
        return Err(format!("\"{}\" must be greater than or equal to {}", name, min));
    }
    if number > max {
        return Err(format!("\"{}\" must be less than or equal to {}", name, max));
    }
    Ok(number)
}
