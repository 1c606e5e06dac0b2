//! 文档占位符替换
//!
//! 模板文档中以 `{{key}}` 标记占位符，替换时区分大小写。

use std::collections::BTreeMap;

use serde_json::{json, Value};

/// 占位符键值集合
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Placeholders {
    values: BTreeMap<String, String>,
}

impl Placeholders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// 生成 Docs `batchUpdate` 请求体
    pub fn to_batch_update(&self) -> Value {
        let requests: Vec<Value> = self
            .iter()
            .map(|(key, value)| {
                json!({
                    "replaceAllText": {
                        "containsText": {
                            "text": format!("{{{{{}}}}}", key),
                            "matchCase": true,
                        },
                        "replaceText": value,
                    }
                })
            })
            .collect();
        json!({ "requests": requests })
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Placeholders {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut placeholders = Self::new();
        for (key, value) in iter {
            placeholders.insert(key, value);
        }
        placeholders
    }
}
