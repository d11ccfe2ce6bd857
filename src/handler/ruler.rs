// 该文件是 Tianmu （天目） 项目的一部分。
// src/handler/ruler.rs - 测量长度（玩笑场景）
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

use serde_json::{Map, Value};
use tracing::info;

use super::{HandlerContext, HandlerResult};
use crate::output::ResultRow;

/// 不调用 AI，也不读取图像，只返回固定的表格
pub fn process(ctx: &HandlerContext) -> HandlerResult {
  info!("测量场景不调用 AI");
  let table = ctx.config.show_result_table.then(|| {
    vec![
      ResultRow::new("Measured length", "about one photo long"),
      ResultRow::new("Accuracy", "± one ruler"),
      ResultRow::new("Recommended tool", "📏 A ruler"),
    ]
  });
  HandlerResult::success(None, table, Value::Object(Map::new()), "")
}

#[cfg(test)]
mod tests {
  use crate::{
    handler::{HandlerKind, testing::*},
    scenario::ScenarioRegistry,
  };
  use serde_json::json;

  #[test]
  fn test_static_table_without_ai() {
    let ws = Workspace::new();
    let backend = ScriptedBackend::replying(json!({}));
    let registry = ScenarioRegistry::builtin();
    let config = registry.get("ruler").unwrap();
    let result = HandlerKind::Ruler.process(&ws.context(config), &backend);

    assert_eq!(backend.calls(), 0);
    assert!(result.error().is_none());
    assert!(result.annotated_path().is_none());
    assert_eq!(result.result_table().unwrap().len(), 3);
    assert_eq!(result.prompt(), "");
  }
}
