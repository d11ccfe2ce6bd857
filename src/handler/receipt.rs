// 该文件是 Tianmu （天目） 项目的一部分。
// src/handler/receipt.rs - 小票识别
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

use image::Rgb;
use serde::Deserialize;

use super::{AnalysisHandler, BoxItem, capitalize, or_dash};
use crate::{
  model::{Detection, Schema},
  output::{ResultRow, draw::ColorMap},
  scenario::ScenarioConfig,
};

pub struct Receipt;

#[derive(Debug, Deserialize)]
pub struct LineItem {
  name: String,
  price: String,
}

#[derive(Debug, Deserialize)]
pub struct Response {
  objects: Vec<BoxItem>,
  category: String,
  items: Vec<LineItem>,
  seller: String,
  date: String,
  time: String,
  total: String,
}

impl AnalysisHandler for Receipt {
  type Response = Response;

  fn prompt(&self, config: &ScenarioConfig) -> String {
    format!(
      "Read the receipt in this image.\n\n\
       Only include data you can read with at least {}% confidence.\n\n\
       objects: key areas of the receipt\n\
       - label: \"header\" (store name or logo), \"item\" (product line) or \"total\"\n\
       - bbox: [y_min, x_min, y_max, x_max] integers 0-1000\n\
       - description: what the area shows\n\
       - confidence: float 0.0 to 1.0\n\n\
       category: one of \"groceries\", \"fuel\", \"restaurant\", \"pharmacy\", \"electronics\", \
       \"clothing\", \"transport\", \"utilities\", \"entertainment\", \"other\" \
       (empty string if this is not a receipt)\n\
       items: purchased products or services, each with name and price as strings\n\
       seller, date, time, total: strings, empty when not visible\n\n\
       Use empty lists and empty strings if the receipt cannot be read.",
      config.threshold_percent()
    )
  }

  fn schema(&self) -> Schema {
    Schema::object([
      ("objects", Schema::array_of(BoxItem::schema())),
      ("category", Schema::String),
      (
        "items",
        Schema::array_of(Schema::object([
          ("name", Schema::String),
          ("price", Schema::String),
        ])),
      ),
      ("seller", Schema::String),
      ("date", Schema::String),
      ("time", Schema::String),
      ("total", Schema::String),
    ])
  }

  fn detections(&self, response: &Response, _config: &ScenarioConfig) -> Vec<Detection> {
    response.objects.iter().map(BoxItem::to_detection).collect()
  }

  fn colors(&self, _detections: &[Detection]) -> ColorMap {
    ColorMap::from_pairs(&[
      ("header", Rgb([0x45, 0xB7, 0xD1])),
      ("item", Rgb([0x4E, 0xCD, 0xC4])),
      ("total", Rgb([0xFF, 0x6B, 0x6B])),
    ])
  }

  fn table(&self, r: &Response, _kept: &[Detection], _config: &ScenarioConfig) -> Vec<ResultRow> {
    let mut rows = vec![
      ResultRow::new("🏷 Category", capitalize(&or_dash(&r.category))),
      ResultRow::section("Items"),
    ];
    rows.extend(
      r.items
        .iter()
        .map(|item| ResultRow::new(or_dash(&item.name), or_dash(&item.price))),
    );
    rows.extend([
      ResultRow::section("Summary"),
      ResultRow::new("Seller", or_dash(&r.seller)),
      ResultRow::new("Date", or_dash(&r.date)),
      ResultRow::new("Time", or_dash(&r.time)),
      ResultRow::new("Total", or_dash(&r.total)),
    ]);
    rows
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::handler::{HandlerKind, testing::*};
  use serde_json::json;

  #[test]
  fn test_sections() {
    let ws = Workspace::new();
    let backend = ScriptedBackend::replying(json!({
      "objects": [],
      "category": "groceries",
      "items": [{"name": "Milk", "price": "1.99"}, {"name": "Bread", "price": "2.49"}],
      "seller": "Corner Shop",
      "date": "2026-01-02",
      "time": "",
      "total": "4.48"
    }));
    let config = ScenarioConfig::new(HandlerKind::Receipt, "r", "").with_annotated_image(false);
    let result = HandlerKind::Receipt.process(&ws.context(&config), &backend);
    let fields: Vec<&str> = result
      .result_table()
      .unwrap()
      .iter()
      .map(|r| r.field.as_str())
      .collect();
    assert_eq!(
      fields,
      [
        "🏷 Category",
        "─── Items ───",
        "Milk",
        "Bread",
        "─── Summary ───",
        "Seller",
        "Date",
        "Time",
        "Total"
      ]
    );
    let table = result.result_table().unwrap();
    assert_eq!(value_of(table, "🏷 Category"), Some("Groceries"));
    assert_eq!(value_of(table, "Time"), Some("—"));
  }
}
