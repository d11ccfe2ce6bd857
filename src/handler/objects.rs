// 该文件是 Tianmu （天目） 项目的一部分。
// src/handler/objects.rs - 通用目标检测
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

use serde::Deserialize;

use super::{AnalysisHandler, BoxItem, class_count_rows};
use crate::{
  model::{Detection, Schema},
  output::ResultRow,
  scenario::ScenarioConfig,
};

pub struct Objects;

#[derive(Debug, Deserialize)]
pub struct Response {
  objects: Vec<BoxItem>,
}

impl AnalysisHandler for Objects {
  type Response = Response;

  fn prompt(&self, config: &ScenarioConfig) -> String {
    format!(
      "Identify all large, clearly recognizable objects in the image.\n\n\
       Only include objects you can identify with at least {}% confidence. \
       Ignore small, secondary and background elements.\n\n\
       For each object provide:\n\
       - label: short class name in English (e.g. \"car\", \"tree\", \"dog\")\n\
       - bbox: [y_min, x_min, y_max, x_max] integers 0-1000\n\
       - description: one sentence about the object\n\
       - confidence: float 0.0 to 1.0\n\n\
       Return an empty objects array if nothing qualifies.",
      config.threshold_percent()
    )
  }

  fn schema(&self) -> Schema {
    Schema::object([("objects", Schema::array_of(BoxItem::schema()))])
  }

  fn detections(&self, response: &Response, _config: &ScenarioConfig) -> Vec<Detection> {
    response.objects.iter().map(BoxItem::to_detection).collect()
  }

  fn table(&self, _response: &Response, kept: &[Detection], _config: &ScenarioConfig) -> Vec<ResultRow> {
    class_count_rows(kept, "Total objects")
  }
}
