// 该文件是 Tianmu （天目） 项目的一部分。
// src/output.rs - 输出定义
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

use serde::{Deserialize, Serialize};

pub mod draw;

/// 结果表中的特殊行类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowKind {
  /// 照片元数据行，展示时高亮并始终排在最后
  Metadata,
}

/// 结果表中的一行
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRow {
  pub field: String,
  pub value: String,
  #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
  pub kind: Option<RowKind>,
}

impl ResultRow {
  pub fn new(field: impl Into<String>, value: impl Into<String>) -> Self {
    Self {
      field: field.into(),
      value: value.into(),
      kind: None,
    }
  }

  pub fn metadata(field: impl Into<String>, value: impl Into<String>) -> Self {
    Self {
      kind: Some(RowKind::Metadata),
      ..Self::new(field, value)
    }
  }

  /// 分节标题行，例如 `─── Items ───`
  pub fn section(title: &str) -> Self {
    Self::new(format!("─── {} ───", title), "")
  }

  pub fn is_metadata(&self) -> bool {
    self.kind == Some(RowKind::Metadata)
  }
}

/// 稳定排序：元数据行放到最后，其余行保持原有顺序
pub fn sort_metadata_last(rows: &mut [ResultRow]) {
  rows.sort_by_key(ResultRow::is_metadata);
}
