// 该文件是 Tianmu （天目） 项目的一部分。
// src/model/schema.rs - 结构化输出描述与校验
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use serde_json::{Map, Value, json};
use thiserror::Error;

/// 期望的 AI 返回结构。所有对象字段都是必填字段。
#[derive(Debug, Clone, PartialEq)]
pub enum Schema {
  String,
  Integer,
  Number,
  Boolean,
  Array(Box<Schema>),
  Object(Vec<(&'static str, Schema)>),
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("字段 `{path}` 应为 {expected}")]
pub struct SchemaViolation {
  pub path: String,
  pub expected: String,
}

impl Schema {
  pub fn object<I: IntoIterator<Item = (&'static str, Schema)>>(fields: I) -> Self {
    Schema::Object(fields.into_iter().collect())
  }

  pub fn array_of(item: Schema) -> Self {
    Schema::Array(Box::new(item))
  }

  /// 标准检测项：`label`、`bbox`、`confidence` 以及额外字段
  pub fn detection_item<I: IntoIterator<Item = (&'static str, Schema)>>(extra: I) -> Self {
    let mut fields = vec![
      ("label", Schema::String),
      ("bbox", Schema::array_of(Schema::Integer)),
    ];
    fields.extend(extra);
    fields.push(("confidence", Schema::Number));
    Schema::Object(fields)
  }

  fn type_name(&self) -> &'static str {
    match self {
      Schema::String => "STRING",
      Schema::Integer => "INTEGER",
      Schema::Number => "NUMBER",
      Schema::Boolean => "BOOLEAN",
      Schema::Array(_) => "ARRAY",
      Schema::Object(_) => "OBJECT",
    }
  }

  /// 转换为 OpenAPI 子集形式的 JSON 描述（Gemini `responseSchema`）
  pub fn to_json(&self) -> Value {
    match self {
      Schema::Array(item) => json!({ "type": self.type_name(), "items": item.to_json() }),
      Schema::Object(fields) => {
        let properties: Map<String, Value> = fields
          .iter()
          .map(|(name, schema)| (name.to_string(), schema.to_json()))
          .collect();
        let names: Vec<&str> = fields.iter().map(|(name, _)| *name).collect();
        json!({
          "type": self.type_name(),
          "properties": properties,
          "required": names,
          "propertyOrdering": names,
        })
      }
      _ => json!({ "type": self.type_name() }),
    }
  }

  /// 严格校验：缺少字段或类型不符都视为违反结构
  pub fn validate(&self, value: &Value) -> Result<(), SchemaViolation> {
    self.validate_at(value, "$")
  }

  fn validate_at(&self, value: &Value, path: &str) -> Result<(), SchemaViolation> {
    let violation = || SchemaViolation {
      path: path.to_string(),
      expected: self.type_name().to_lowercase(),
    };

    match (self, value) {
      (Schema::String, Value::String(_)) => Ok(()),
      (Schema::Boolean, Value::Bool(_)) => Ok(()),
      (Schema::Number, Value::Number(_)) => Ok(()),
      (Schema::Integer, Value::Number(n)) => {
        let integral = n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0);
        if integral { Ok(()) } else { Err(violation()) }
      }
      (Schema::Array(item), Value::Array(values)) => values
        .iter()
        .enumerate()
        .try_for_each(|(i, v)| item.validate_at(v, &format!("{}[{}]", path, i))),
      (Schema::Object(fields), Value::Object(map)) => {
        for (name, schema) in fields {
          let child = format!("{}.{}", path, name);
          match map.get(*name) {
            Some(v) => schema.validate_at(v, &child)?,
            None => {
              return Err(SchemaViolation {
                path: child,
                expected: format!("必填的 {}", schema.type_name().to_lowercase()),
              });
            }
          }
        }
        Ok(())
      }
      _ => Err(violation()),
    }
  }
}
