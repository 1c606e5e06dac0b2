//! 请求体校验
//!
//! 每种资源一份字段表。新建时检查必填字段，更新时所有字段可选；
//! 未知字段、类型错误、格式错误都汇总为一个验证错误。
//! 校验通过的值会被规范化（ID 转为标准形式，日期转为 RFC 3339）。

use reporter_core::utils::{is_valid_email, is_valid_phone, parse_date};
use reporter_core::{ReporterError, Result};
use serde_json::{Map, Value};
use uuid::Uuid;

/// 字段类型与约束
#[derive(Debug, Clone, Copy)]
pub enum FieldKind {
    /// 非空字符串，可设最小长度
    Text { min_len: usize },
    /// 密码等原样保存的字符串，长度按原值计算
    Secret { min_len: usize },
    /// 手机号
    Phone,
    Email,
    /// 整数区间（含端点）
    Integer { min: i64, max: i64 },
    /// 枚举字符串
    OneOf(&'static [&'static str]),
    /// 记录 ID
    Id,
    Date,
}

/// 字段定义
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    /// 新建时必填
    pub required: bool,
}

pub const fn field(name: &'static str, kind: FieldKind, required: bool) -> FieldSpec {
    FieldSpec {
        name,
        kind,
        required,
    }
}

/// 资源请求体结构
#[derive(Debug, Clone, Copy)]
pub struct BodySchema {
    pub fields: &'static [FieldSpec],
    /// 只能在新建时给出的字段
    pub immutable: &'static [&'static str],
}

/// 校验模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Create,
    Update,
}

pub const DOCTOR_SCHEMA: BodySchema = BodySchema {
    fields: &[
        field("name", FieldKind::Text { min_len: 1 }, true),
        field("phone", FieldKind::Phone, true),
        field("email", FieldKind::Email, false),
    ],
    immutable: &[],
};

pub const PATIENT_SCHEMA: BodySchema = BodySchema {
    fields: &[
        field("name", FieldKind::Text { min_len: 1 }, true),
        field("phone", FieldKind::Phone, false),
        field("email", FieldKind::Email, false),
        field("age", FieldKind::Integer { min: 0, max: 120 }, false),
        field("gender", FieldKind::OneOf(&["male", "female"]), true),
    ],
    immutable: &[],
};

pub const TEMPLATE_SCHEMA: BodySchema = BodySchema {
    fields: &[
        field("name", FieldKind::Text { min_len: 3 }, true),
        field("template", FieldKind::Id, false),
    ],
    immutable: &["template", "driveFileId"],
};

pub const USG_REPORT_SCHEMA: BodySchema = BodySchema {
    fields: &[
        field("patient", FieldKind::Id, true),
        field("referrer", FieldKind::Id, true),
        field("sonologist", FieldKind::Id, false),
        field("date", FieldKind::Date, true),
        field("partOfScan", FieldKind::Text { min_len: 1 }, true),
        field("findings", FieldKind::Text { min_len: 0 }, false),
        field("template", FieldKind::Id, false),
    ],
    immutable: &["template", "driveFileId"],
};

impl BodySchema {
    /// 校验请求体，返回规范化后的字段
    pub fn validate(&self, body: &Value, mode: Mode) -> Result<Map<String, Value>> {
        let object = body
            .as_object()
            .ok_or_else(|| ReporterError::validation("\"value\" must be of type object"))?;

        let mut problems = Vec::new();
        let mut normalized = Map::new();

        for (key, value) in object {
            if mode == Mode::Update && self.immutable.contains(&key.as_str()) {
                problems.push(format!("\"{}\" cannot be changed after creation", key));
                continue;
            }
            let Some(spec) = self.fields.iter().find(|f| f.name == key) else {
                problems.push(format!("\"{}\" is not allowed", key));
                continue;
            };
            if value.is_null() {
                if spec.required {
                    problems.push(format!("\"{}\" must not be null", key));
                } else if mode == Mode::Update {
                    // 更新时 null 表示清除可选字段
                    normalized.insert(key.clone(), Value::Null);
                }
                continue;
            }
            match check(spec, value) {
                Ok(value) => {
                    normalized.insert(key.clone(), value);
                }
                Err(problem) => problems.push(problem),
            }
        }

        if mode == Mode::Create {
            for spec in self.fields.iter().filter(|f| f.required) {
                if !object.contains_key(spec.name) {
                    problems.push(format!("\"{}\" is required", spec.name));
                }
            }
        } else if normalized.is_empty() && problems.is_empty() {
            problems.push("\"value\" must contain at least one field".to_string());
        }

        if problems.is_empty() {
            Ok(normalized)
        } else {
            Err(ReporterError::validation_details(problems))
        }
    }
}

fn check(spec: &FieldSpec, value: &Value) -> std::result::Result<Value, String> {
    let name = spec.name;
    match spec.kind {
        FieldKind::Text { min_len } => {
            let text = as_str(name, value)?;
            if min_len > 0 && text.trim().chars().count() < min_len {
                return Err(if min_len > 1 {
                    format!("\"{}\" length must be at least {} characters long", name, min_len)
                } else {
                    format!("\"{}\" is not allowed to be empty", name)
                });
            }
            Ok(Value::String(text.to_string()))
        }
        FieldKind::Secret { min_len } => {
            let secret = as_str(name, value)?;
            if secret.is_empty() {
                return Err(format!("\"{}\" is not allowed to be empty", name));
            }
            if secret.chars().count() < min_len {
                return Err(format!(
                    "\"{}\" length must be at least {} characters long",
                    name, min_len
                ));
            }
            Ok(Value::String(secret.to_string()))
        }
        FieldKind::Phone => {
            let phone = as_str(name, value)?;
            if !is_valid_phone(phone) {
                return Err(format!(
                    "\"{}\" with value \"{}\" fails to match the required pattern: /^[6-9]\\d{{9}}$/",
                    name, phone
                ));
            }
            Ok(Value::String(phone.to_string()))
        }
        FieldKind::Email => {
            let email = as_str(name, value)?;
            if !is_valid_email(email) {
                return Err(format!("\"{}\" must be a valid email", name));
            }
            Ok(Value::String(email.to_string()))
        }
        FieldKind::Integer { min, max } => {
            let number = value
                .as_i64()
                .ok_or_else(|| format!("\"{}\" must be an integer", name))?;
            if number < min {
                return Err(format!("\"{}\" must be greater than or equal to {}", name, min));
            }
            if number > max {
                return Err(format!("\"{}\" must be less than or equal to {}", name, max));
            }
            Ok(Value::from(number))
        }
        FieldKind::OneOf(allowed) => {
            let text = as_str(name, value)?;
            if !allowed.contains(&text) {
                return Err(format!("\"{}\" must be one of [{}]", name, allowed.join(", ")));
            }
            Ok(Value::String(text.to_string()))
        }
        FieldKind::Id => {
            let id = as_str(name, value)?;
            let id = Uuid::parse_str(id).map_err(|_| format!("\"{}\" must be a valid id", name))?;
            Ok(Value::String(id.to_string()))
        }
        FieldKind::Date => {
            let text = as_str(name, value)?;
            let date = parse_date(text).ok_or_else(|| format!("\"{}\" must be a valid date", name))?;
            serde_json::to_value(date).map_err(|e| e.to_string())
        }
    }
}

fn as_str<'a>(name: &str, value: &'a Value) -> std::result::Result<&'a str, String> {
    value
        .as_str()
        .ok_or_else(|| format!("\"{}\" must be a string", name))
}

/// 取出已校验的 ID 字段
pub fn id_field(fields: &Map<String, Value>, name: &str) -> Option<Uuid> {
    fields
        .get(name)
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
}

/// 解析路径中的记录 ID
pub fn parse_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|_| ReporterError::validation("\"id\" must be a valid id"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn details(err: ReporterError) -> Vec<String> {
        match err {
            ReporterError::Validation { details, .. } => details,
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_doctor_create_requires_fields() {
        let err = DOCTOR_SCHEMA.validate(&json!({}), Mode::Create).unwrap_err();
        let details = details(err);
        assert!(details.contains(&"\"name\" is required".to_string()));
        assert!(details.contains(&"\"phone\" is required".to_string()));
    }

    #[test]
    fn test_phone_pattern() {
        let err = DOCTOR_SCHEMA
            .validate(&json!({"name": "Dr. A", "phone": "3123456789"}), Mode::Create)
            .unwrap_err();
        assert!(details(err)[0].contains("fails to match the required pattern"));

        assert!(DOCTOR_SCHEMA
            .validate(&json!({"name": "Dr. A", "phone": "9123456789"}), Mode::Create)
            .is_ok());
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let err = PATIENT_SCHEMA
            .validate(
                &json!({"name": "A", "gender": "male", "deleted": true}),
                Mode::Create,
            )
            .unwrap_err();
        assert_eq!(details(err), vec!["\"deleted\" is not allowed".to_string()]);
    }

    #[test]
    fn test_patient_age_bounds_and_gender() {
        let err = PATIENT_SCHEMA
            .validate(
                &json!({"name": "A", "gender": "other", "age": 130}),
                Mode::Create,
            )
            .unwrap_err();
        let details = details(err);
        assert_eq!(details.len(), 2);
        assert!(details.iter().any(|d| d.contains("less than or equal to 120")));
        assert!(details.iter().any(|d| d.contains("must be one of [male, female]")));
    }

    #[test]
    fn test_template_update_rejects_source() {
        let id = Uuid::now_v7().to_string();
        let err = TEMPLATE_SCHEMA
            .validate(&json!({"name": "Abdomen", "template": id}), Mode::Update)
            .unwrap_err();
        assert_eq!(
            details(err),
            vec!["\"template\" cannot be changed after creation".to_string()]
        );

        let err = TEMPLATE_SCHEMA
            .validate(&json!({"driveFileId": "doc-2"}), Mode::Update)
            .unwrap_err();
        assert!(details(err)[0].contains("driveFileId"));
    }

    #[test]
    fn test_template_name_min_length() {
        let err = TEMPLATE_SCHEMA
            .validate(&json!({"name": "ab"}), Mode::Create)
            .unwrap_err();
        assert!(details(err)[0].contains("at least 3 characters"));
    }

    #[test]
    fn test_report_date_is_normalized() {
        let patient = Uuid::now_v7();
        let fields = USG_REPORT_SCHEMA
            .validate(
                &json!({
                    "patient": patient.to_string().to_uppercase(),
                    "referrer": Uuid::now_v7().to_string(),
                    "date": "2024-03-05",
                    "partOfScan": "Abdomen",
                }),
                Mode::Create,
            )
            .unwrap();
        assert_eq!(fields["date"], json!("2024-03-05T00:00:00Z"));
        assert_eq!(id_field(&fields, "patient"), Some(patient));
    }

    #[test]
    fn test_update_allows_clearing_optional_fields() {
        let fields = PATIENT_SCHEMA
            .validate(&json!({"email": null}), Mode::Update)
            .unwrap();
        assert_eq!(fields["email"], Value::Null);

        let err = PATIENT_SCHEMA
            .validate(&json!({"name": null}), Mode::Update)
            .unwrap_err();
        assert!(details(err)[0].contains("must not be null"));
    }

    #[test]
    fn test_update_requires_some_field() {
        assert!(DOCTOR_SCHEMA.validate(&json!({}), Mode::Update).is_err());
    }

    #[test]
    fn test_parse_id() {
        assert!(parse_id("not-an-id").is_err());
        assert!(parse_id(&Uuid::now_v7().to_string()).is_ok());
    }

    #[test]
    fn test_secret_length_counts_surrounding_spaces() {
        const SCHEMA: BodySchema = BodySchema {
            fields: &[field("password", FieldKind::Secret { min_len: 6 }, true)],
            immutable: &[],
        };

        let fields = SCHEMA
            .validate(&json!({"password": "  abcd  "}), Mode::Create)
            .unwrap();
        assert_eq!(fields["password"], "  abcd  ");

        let err = SCHEMA
            .validate(&json!({"password": "abcd "}), Mode::Create)
            .unwrap_err();
        assert!(details(err)[0].contains("at least 6 characters"));
        assert!(SCHEMA.validate(&json!({"password": ""}), Mode::Create).is_err());
    }
}
