//! 通用工具函数

use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use serde_json::Value;

/// 手机号格式：10 位，以 6-9 开头
const PHONE_PATTERN: &str = r"^[6-9]\d{9}$";

const EMAIL_PATTERN: &str = r"^[^@\s]+@[^@\s]+\.[^@\s]+$";

static PHONE: OnceLock<Option<Regex>> = OnceLock::new();
static EMAIL: OnceLock<Option<Regex>> = OnceLock::new();

fn matches(cell: &'static OnceLock<Option<Regex>>, pattern: &str, input: &str) -> bool {
    cell.get_or_init(|| Regex::new(pattern).ok())
        .as_ref()
        .is_some_and(|re| re.is_match(input))
}

/// 验证手机号
pub fn is_valid_phone(phone: &str) -> bool {
    matches(&PHONE, PHONE_PATTERN, phone)
}

/// 验证邮箱地址
pub fn is_valid_email(email: &str) -> bool {
    matches(&EMAIL, EMAIL_PATTERN, email)
}

/// 解析日期
///
/// 接受 RFC 3339、`YYYY-MM-DDTHH:MM:SS`（按 UTC）、`YYYY-MM-DD` 与 `MM-DD-YYYY`，
/// 纯日期取当天 UTC 零点。
pub fn parse_date(input: &str) -> Option<DateTime<Utc>> {
    let input = input.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(input, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(dt.and_utc());
    }
    ["%Y-%m-%d", "%m-%d-%Y"]
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(input, format).ok())
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// 报告文档命名使用的日期格式，如 `05-01-2020`
pub fn format_document_date(date: &DateTime<Utc>) -> String {
    date.format("%d-%m-%Y").to_string()
}

/// 报告正文占位符使用的日期格式，如 `05/01/2020`
pub fn format_display_date(date: &DateTime<Utc>) -> String {
    date.format("%d/%m/%Y").to_string()
}

/// 清洗对外输出的记录
///
/// `_id` 改名为 `id`，移除 `__v` 与 `deleted`，并递归处理嵌套对象（`id` 字段本身除外）。
/// 数组中的元素逐个处理。
pub fn sanitize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            let mut renamed_id = None;
            for (key, field) in map {
                match key.as_str() {
                    "_id" => renamed_id = Some(field),
                    "__v" | "deleted" => {}
                    "id" => {
                        out.insert(key, field);
                    }
                    _ => {
                        out.insert(key, sanitize(field));
                    }
                }
            }
            if let Some(id) = renamed_id {
                out.insert("id".to_string(), id);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize).collect()),
        other => other,
    }
}

/// 对可选记录执行清洗，缺失时原样返回 `None`
pub fn sanitize_opt(value: Option<Value>) -> Option<Value> {
    value.map(sanitize)
}
